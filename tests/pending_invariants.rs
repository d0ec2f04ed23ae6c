use std::collections::HashSet;

use bond_sync_client::pending::{OperationKey, Outcome, PendingOperationTracker};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Begin(u8),
    Complete(u8, bool),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4).prop_map(Step::Begin),
        (0u8..4, any::<bool>()).prop_map(|(key, ok)| Step::Complete(key, ok)),
    ]
}

proptest! {
    #[test]
    fn at_most_one_pending_operation_per_key(steps in prop::collection::vec(step(), 1..64)) {
        let tracker = PendingOperationTracker::new();
        let mut model = HashSet::new();

        for step in steps {
            match step {
                Step::Begin(key) => {
                    let admitted = tracker.try_begin(&OperationKey::new(format!("op_{key}")));
                    prop_assert_eq!(admitted, model.insert(key));
                }
                Step::Complete(key, ok) => {
                    let outcome = if ok { Outcome::Success } else { Outcome::Failure };
                    let released = tracker.complete(&OperationKey::new(format!("op_{key}")), outcome);
                    prop_assert_eq!(released.is_some(), model.remove(&key));
                }
            }

            let pending = tracker.pending();
            let keys: HashSet<_> = pending.iter().map(|op| op.key.clone()).collect();
            prop_assert_eq!(keys.len(), pending.len());
            prop_assert_eq!(pending.len(), model.len());
        }
    }
}
