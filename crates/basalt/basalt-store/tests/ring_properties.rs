use basalt_events::OhlcvRow;
use basalt_store::{RingConfig, RingStoreWriter};
use proptest::prelude::*;

fn bar(ts: u64) -> OhlcvRow {
    OhlcvRow::flat(ts, ts as f64, ts)
}

proptest! {
    #[test]
    fn last_n_is_ordered_and_bounded(
        capacity in 1usize..64,
        written in 0u64..300,
        n in 0usize..128,
    ) {
        let mut w = RingStoreWriter::create_private(&["T"], RingConfig::new(capacity)).unwrap();
        for ts in 0..written {
            w.append("T", bar(ts)).unwrap();
        }
        let rows = w.reader().view_last_n("T", n).unwrap();

        let bound = n.min(capacity).min(written as usize);
        prop_assert_eq!(rows.len(), bound);
        for pair in rows.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        if let Some(last) = rows.last() {
            prop_assert_eq!(last.timestamp, written - 1);
        }
    }

    #[test]
    fn overflow_keeps_exactly_the_newest_capacity_rows(
        capacity in 1usize..64,
        extra in 1u64..200,
    ) {
        let written = capacity as u64 + extra;
        let mut w = RingStoreWriter::create_private(&["T"], RingConfig::new(capacity)).unwrap();
        for ts in 0..written {
            w.append("T", bar(ts)).unwrap();
        }
        let rows = w.reader().view_last_n("T", capacity).unwrap();
        let expected: Vec<u64> = (written - capacity as u64..written).collect();
        prop_assert_eq!(rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn since_returns_only_newer_rows(
        capacity in 1usize..64,
        written in 0u64..200,
        cutoff in 0u64..220,
    ) {
        let mut w = RingStoreWriter::create_private(&["T"], RingConfig::new(capacity)).unwrap();
        for ts in 0..written {
            w.append("T", bar(ts)).unwrap();
        }
        let rows = w.reader().view_since("T", cutoff).unwrap();
        let oldest_held = written.saturating_sub(capacity as u64);
        let expected: Vec<u64> = (oldest_held.max(cutoff + 1)..written).collect();
        prop_assert_eq!(rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn epoch_parity_follows_the_bracket(ops in prop::collection::vec(0u8..3, 1..100)) {
        let mut w = RingStoreWriter::create_private(&["T"], RingConfig::new(8)).unwrap();
        let mut open = false;
        for (ts, op) in ops.into_iter().enumerate() {
            match op {
                0 if !open => { w.begin_write("T").unwrap(); open = true; }
                1 if open => { w.commit_row("T", bar(ts as u64)).unwrap(); }
                2 if open => { w.end_write("T").unwrap(); open = false; }
                _ => {}
            }
            prop_assert_eq!(w.epoch("T").unwrap() % 2 == 1, open);
        }
    }
}
