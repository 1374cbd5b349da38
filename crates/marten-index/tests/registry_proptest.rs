//! Property tests for the registry invariants.

use std::collections::HashSet;
use std::sync::Arc;

use marten_index::{Fingerprint, Index, IndexRegistry, MemoryIndex};
use proptest::prelude::*;

fn test_index(db: &str, id: &str, exprs: &[String]) -> Arc<dyn Index> {
    let fingerprints = exprs.iter().map(|e| Fingerprint::of(e)).collect();
    Arc::new(MemoryIndex::new(db, "t", id, fingerprints))
}

fn exprs_and_permutation() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    prop::collection::vec("[a-z]{1,8}", 1..5).prop_flat_map(|exprs| {
        let shuffled = Just(exprs.clone()).prop_shuffle();
        (Just(exprs), shuffled)
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // Expression-based lookup is invariant under permutation of the
    // expression list.
    #[test]
    fn proptest_expression_lookup_ignores_order((exprs, shuffled) in exprs_and_permutation()) {
        let registry = IndexRegistry::default();
        registry.add_index(test_index("d", "i1", &exprs)).unwrap().ready();

        let by_original = registry.index_by_expression("d", &exprs).unwrap();
        let by_shuffled = registry.index_by_expression("d", &shuffled).unwrap();
        prop_assert_eq!(by_original.id(), "i1");
        prop_assert_eq!(by_shuffled.id(), "i1");

        registry.release_index(by_original.as_ref());
        registry.release_index(by_shuffled.as_ref());
    }

    // Of any sequence of adds, exactly those not colliding on id or on
    // fingerprint multiset succeed.
    #[test]
    fn proptest_uniqueness_matches_model(ops in prop::collection::vec((0u8..4, 0u8..4), 1..12)) {
        let registry = IndexRegistry::default();
        let mut seen_ids: HashSet<u8> = HashSet::new();
        let mut seen_exprs: HashSet<u8> = HashSet::new();

        for (id_choice, expr_choice) in ops {
            let id = format!("idx{id_choice}");
            let exprs = vec![format!("col{expr_choice}")];
            let result = registry.add_index(test_index("d", &id, &exprs));

            let fresh = !seen_ids.contains(&id_choice) && !seen_exprs.contains(&expr_choice);
            if fresh {
                result.unwrap().ready();
                seen_ids.insert(id_choice);
                seen_exprs.insert(expr_choice);
            } else {
                prop_assert!(result.is_err());
            }
        }

        // Every accepted index stayed selectable.
        for id_choice in &seen_ids {
            let id = format!("idx{id_choice}");
            prop_assert!(registry.index("d", &id).is_some());
        }
    }

    // The drain signal fires exactly on the release that balances the
    // retains.
    #[test]
    fn proptest_drain_fires_on_last_release(retains in 1usize..10) {
        let registry = IndexRegistry::default();
        registry.add_index(test_index("d", "i1", &["e1".to_string()])).unwrap().ready();

        let held: Vec<_> = (0..retains)
            .map(|_| registry.index_by_expression("d", &["e1"]).unwrap())
            .collect();

        let mut done = registry.delete_index("d", "i1").unwrap();
        prop_assert!(!done.try_wait());

        for (i, idx) in held.iter().enumerate() {
            registry.release_index(idx.as_ref());
            let drained = done.try_wait();
            prop_assert_eq!(drained, i == retains - 1);
        }

        prop_assert!(registry.index("d", "i1").is_none());
    }
}
