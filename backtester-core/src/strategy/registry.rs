//! Strategy lookup by name.

use super::{dca, rsi, DollarCostAverage, RsiStrategy, Strategy, StrategyError};
use crate::config::StrategySettings;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Strategy factories keyed by lowercase name.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(dca::NAME, Arc::new(|| Box::new(DollarCostAverage) as Box<dyn Strategy>));
        registry.register(rsi::NAME, Arc::new(|| Box::new(RsiStrategy::default()) as Box<dyn Strategy>));
        registry
    }

    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        self.factories.insert(name.trim().to_lowercase(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// A fresh, unconfigured instance.
    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>, StrategyError> {
        self.factories
            .get(&name.trim().to_lowercase())
            .map(|factory| factory())
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))
    }

    /// An instance configured from `settings`.
    ///
    /// Fails when the name is unknown, the custom settings are rejected, or
    /// simultaneous processing is requested from a strategy without it.
    pub fn build(&self, settings: &StrategySettings) -> Result<Box<dyn Strategy>, StrategyError> {
        let mut strategy = self.create(&settings.name)?;
        strategy.set_custom_settings(&settings.custom_settings)?;
        if settings.use_simultaneous_signal_processing && !strategy.supports_simultaneous_processing() {
            return Err(StrategyError::SimultaneousUnsupported(strategy.name().to_string()));
        }
        Ok(strategy)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry").field("strategies", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataEvent, SignalEvent};
    use crate::strategy::StrategyContext;
    use serde_json::Value;

    struct SingleOnly;

    impl Strategy for SingleOnly {
        fn name(&self) -> &str {
            "single"
        }
        fn description(&self) -> &str {
            ""
        }
        fn supports_simultaneous_processing(&self) -> bool {
            false
        }
        fn set_custom_settings(&mut self, _: &BTreeMap<String, Value>) -> Result<(), StrategyError> {
            Ok(())
        }
        fn on_signal(&mut self, data: &DataEvent, _: &StrategyContext<'_>) -> Result<SignalEvent, StrategyError> {
            Ok(SignalEvent::new(data, crate::event::Direction::DoNothing))
        }
    }

    fn settings(name: &str, simultaneous: bool) -> StrategySettings {
        StrategySettings {
            name: name.into(),
            use_simultaneous_signal_processing: simultaneous,
            custom_settings: BTreeMap::new(),
        }
    }

    #[test]
    fn defaults_are_registered() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["dollarcostaverage".to_string(), "rsi".to_string()]);
        assert!(registry.contains("RSI"));
        assert_eq!(registry.create("DollarCostAverage").unwrap().name(), "dollarcostaverage");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry = StrategyRegistry::with_defaults();
        assert!(matches!(registry.create("test"), Err(StrategyError::UnknownStrategy(_))));
        assert!(matches!(registry.build(&settings("test", true)), Err(StrategyError::UnknownStrategy(_))));
    }

    #[test]
    fn simultaneous_mode_needs_support() {
        let mut registry = StrategyRegistry::with_defaults();
        registry.register("single", Arc::new(|| Box::new(SingleOnly) as Box<dyn Strategy>));
        assert!(registry.build(&settings("single", false)).is_ok());
        assert!(matches!(
            registry.build(&settings("single", true)),
            Err(StrategyError::SimultaneousUnsupported(_))
        ));
        assert!(registry.build(&settings("rsi", true)).is_ok());
    }

    #[test]
    fn custom_settings_are_applied_on_build() {
        let registry = StrategyRegistry::with_defaults();
        let mut s = settings("rsi", false);
        s.custom_settings.insert("rsi-period".into(), Value::from(0));
        assert!(matches!(registry.build(&s), Err(StrategyError::InvalidSetting { .. })));
    }
}
