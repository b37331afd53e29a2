use std::sync::Arc;

use tracing::warn;

use super::{DynIndicator, EmaCross};

/// Registered indicators, kept in registration order.
#[derive(Default, Clone)]
pub struct IndicatorRegistry {
    entries: Vec<Arc<dyn DynIndicator>>,
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in indicator.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmaCross));
        registry
    }

    /// Register an indicator. A second registration under the same id replaces
    /// the first in place and returns it.
    pub fn register(&mut self, indicator: Arc<dyn DynIndicator>) -> Option<Arc<dyn DynIndicator>> {
        let id = indicator.id();
        match self.entries.iter_mut().find(|e| e.id() == id) {
            Some(slot) => {
                warn!(indicator = id, "indicator registered twice, replacing previous");
                Some(std::mem::replace(slot, indicator))
            }
            None => {
                self.entries.push(indicator);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DynIndicator>> {
        self.entries.iter().find(|e| e.id() == id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn DynIndicator>> {
        self.entries.clone()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id() != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{Indicator, IndicatorRender};
    use crate::types::Candle;

    #[derive(Debug)]
    struct Dummy;

    impl Indicator for Dummy {
        type Config = ();
        const ID: &'static str = "dummy";
        const LABEL: &'static str = "Dummy";

        fn compute(&self, _candles: &[Candle], _config: &()) -> IndicatorRender {
            IndicatorRender::default()
        }
    }

    #[derive(Debug)]
    struct OtherDummy;

    impl Indicator for OtherDummy {
        type Config = ();
        const ID: &'static str = "dummy";
        const LABEL: &'static str = "Replacement";

        fn compute(&self, _candles: &[Candle], _config: &()) -> IndicatorRender {
            IndicatorRender::default()
        }
    }

    #[test]
    fn keeps_registration_order() {
        let mut registry = IndicatorRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(EmaCross));
        registry.register(Arc::new(Dummy));

        let ids: Vec<&str> = registry.get_all().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["emaCross", "dummy"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("emaCross").unwrap().label(), "EMA Cross Scanner");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_id_last_wins_in_place() {
        let mut registry = IndicatorRegistry::new();
        registry.register(Arc::new(Dummy));
        registry.register(Arc::new(EmaCross));

        let previous = registry.register(Arc::new(OtherDummy));
        assert_eq!(previous.unwrap().label(), "Dummy");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("dummy").unwrap().label(), "Replacement");

        let ids: Vec<&str> = registry.get_all().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["dummy", "emaCross"]);
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = IndicatorRegistry::with_builtin();
        registry.register(Arc::new(Dummy));

        assert!(registry.remove("dummy"));
        assert!(!registry.remove("dummy"));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get("emaCross").is_none());
    }
}
