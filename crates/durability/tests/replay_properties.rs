//! Property-based tests for replay
//!
//! - Replaying `K+1..N` on a snapshot at `K` equals replaying `1..N` from scratch
//! - `update(M)` delivers exactly `M..=last`, once each, in order

use std::ops::ControlFlow;

use prevail_core::{LogEntry, SequenceNumber, Timestamp, Transaction};
use prevail_durability::{
    BincodeCodec, FileTransactionLog, MemoryTransactionLog, RecoveryCoordinator, SnapshotStore,
    TransactionLog, WalConfig,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Ledger {
    balance: i64,
    history: Vec<(i64, u64)>,
}

/// Order-sensitive: the same ops in another order give another history.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Op {
    Credit(i64),
    Debit(i64),
    Halve,
}

impl Transaction<Ledger> for Op {
    fn execute_on(&self, state: &mut Ledger, execution_time: Timestamp) {
        match self {
            Op::Credit(n) => state.balance += n,
            Op::Debit(n) => state.balance -= n,
            Op::Halve => state.balance /= 2,
        }
        state
            .history
            .push((state.balance, execution_time.as_micros()));
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..1000).prop_map(Op::Credit),
        (0i64..1000).prop_map(Op::Debit),
        Just(Op::Halve),
    ]
}

fn apply_all(ops: &[Op]) -> Ledger {
    let mut state = Ledger::default();
    for (i, op) in ops.iter().enumerate() {
        op.execute_on(&mut state, Timestamp::from_secs(i as u64 + 1));
    }
    state
}

fn collect_sequences<L: TransactionLog<Op>>(log: &mut L, initial: SequenceNumber) -> Vec<u64> {
    let mut seen = Vec::new();
    let mut subscriber = |e: &LogEntry<Op>| {
        seen.push(e.sequence);
        ControlFlow::Continue(())
    };
    log.update(&mut subscriber, initial).unwrap();
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_replay_from_snapshot_matches_full_replay(
        ops in prop::collection::vec(op_strategy(), 1..40),
        snapshot_at in any::<prop::sample::Index>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let k = snapshot_at.index(ops.len()) as u64;

        {
            let store: SnapshotStore<Ledger> =
                SnapshotStore::new(temp_dir.path(), Box::new(BincodeCodec)).unwrap();
            let log: FileTransactionLog<Op> = FileTransactionLog::open(
                temp_dir.path(),
                Box::new(BincodeCodec),
                WalConfig::for_testing(),
            )
            .unwrap();
            let mut live = RecoveryCoordinator::new(store, log)
                .recover(Ledger::default())
                .unwrap();

            for (i, op) in ops.iter().enumerate() {
                let time = Timestamp::from_secs(i as u64 + 1);
                live.log.log(op, time).unwrap();
                op.execute_on(&mut live.state, time);
                if i as u64 + 1 == k {
                    live.store.write(&live.state, k).unwrap();
                }
            }
        }

        let store: SnapshotStore<Ledger> =
            SnapshotStore::new(temp_dir.path(), Box::new(BincodeCodec)).unwrap();
        let log: FileTransactionLog<Op> = FileTransactionLog::open(
            temp_dir.path(),
            Box::new(BincodeCodec),
            WalConfig::for_testing(),
        )
        .unwrap();
        let recovered = RecoveryCoordinator::new(store, log)
            .recover(Ledger::default())
            .unwrap();

        prop_assert_eq!(recovered.snapshot_version, k);
        prop_assert_eq!(recovered.stats.entries_replayed, ops.len() as u64 - k);
        prop_assert_eq!(recovered.next_sequence, ops.len() as u64 + 1);
        prop_assert_eq!(recovered.state, apply_all(&ops));
    }

    #[test]
    fn prop_update_delivers_exact_contiguous_range(
        baseline in 1u64..1000,
        count in 0u64..60,
        offset in any::<prop::sample::Index>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig::new()
            .with_segment_size(1024)
            .with_buffered_sync_bytes(512);
        let mut file_log: FileTransactionLog<Op> =
            FileTransactionLog::open(temp_dir.path(), Box::new(BincodeCodec), config).unwrap();
        let mut memory_log = MemoryTransactionLog::<Op>::new();

        prop_assert!(collect_sequences(&mut file_log, baseline).is_empty());
        prop_assert!(collect_sequences(&mut memory_log, baseline).is_empty());
        for i in 0..count {
            let op = Op::Credit(i as i64);
            prop_assert_eq!(file_log.log(&op, Timestamp::EPOCH).unwrap(), baseline + i);
            prop_assert_eq!(memory_log.log(&op, Timestamp::EPOCH).unwrap(), baseline + i);
        }

        let m = baseline + offset.index(count as usize + 1) as u64;
        let expected: Vec<u64> = (m..baseline + count).collect();
        prop_assert_eq!(collect_sequences(&mut file_log, m), expected.clone());
        prop_assert_eq!(collect_sequences(&mut memory_log, m), expected);
    }
}
