//! Property tests for registry membership.
//!
//! Random sequences of create / clear / clear-all against a plain `Vec`
//! model: the listing always matches the model in creation order and ids
//! are never handed out twice.

use backtester_core::domain::RunId;
use backtester_core::Config;
use backtester_runner::{ManagerSettings, RunManager, Services};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Create,
    /// Clear the n-th live entry (modulo the registry size).
    Clear(usize),
    ClearAll,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Create),
        2 => any::<usize>().prop_map(Op::Clear),
        1 => Just(Op::ClearAll),
    ]
}

fn config() -> Config {
    serde_json::from_value(json!({
        "strategy_settings": {"name": "dollarcostaverage"},
        "currency_settings": [{
            "exchange_name": "binance", "asset": "spot", "base": "BTC", "quote": "USDT",
            "spot_details": {"initial_base_funds": 0.0, "initial_quote_funds": 100.0}
        }],
        "data_settings": {"interval_secs": 60, "csv_data": {"path": "unused.csv"}}
    }))
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn listing_tracks_a_simple_model(ops in prop::collection::vec(arb_op(), 1..40)) {
        let manager = RunManager::new(ManagerSettings::default(), Services::default());
        let mut model: Vec<RunId> = Vec::new();
        let mut issued: HashSet<RunId> = HashSet::new();

        for op in ops {
            match op {
                Op::Create => {
                    let id = manager.create_from_config(config()).unwrap();
                    prop_assert!(issued.insert(id), "id {} issued twice", id);
                    model.push(id);
                }
                Op::Clear(n) if !model.is_empty() => {
                    let id = model.remove(n % model.len());
                    prop_assert_eq!(manager.clear_run(id).unwrap().id, id);
                }
                Op::Clear(_) => {}
                Op::ClearAll => {
                    let (cleared, remaining) = manager.clear_all_runs();
                    let cleared: Vec<RunId> = cleared.iter().map(|r| r.id).collect();
                    prop_assert_eq!(cleared, std::mem::take(&mut model));
                    prop_assert!(remaining.is_empty());
                }
            }

            let listed: Vec<RunId> = manager.list().iter().map(|r| r.id).collect();
            prop_assert_eq!(&listed, &model);
        }
    }
}
