//! [`HistoryBackend`] implementations for both stores.
//!
//! The disk-resident tree and the in-memory store answer the same
//! contract, so upper layers pick a backend by workload size and nothing
//! else changes.

use histree_core::{
    AttrInterval, AttributeId, Error, HistoryBackend, IntervalIter, Result, TIME_OPEN,
};
use rustc_hash::FxHashSet;

use crate::lazy::LazyIntervalStore;
use crate::tree::HistoryTree;

impl HistoryBackend for HistoryTree {
    fn start_time(&self) -> i64 {
        HistoryTree::start_time(self)
    }

    fn end_time(&self) -> i64 {
        HistoryTree::end_time(self)
    }

    fn insert(&self, interval: AttrInterval) -> Result<()> {
        HistoryTree::insert(self, interval)
    }

    fn query_at(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        HistoryTree::query_at(self, attr, t)
    }

    fn query_range(&self, attrs: &[AttributeId], qs: i64, qe: i64) -> Result<IntervalIter<'_>> {
        Ok(Box::new(HistoryTree::query_range(self, attrs, qs, qe)?))
    }

    fn close(&self) -> Result<()> {
        HistoryTree::close(self)
    }

    fn is_closed(&self) -> bool {
        HistoryTree::is_closed(self)
    }
}

impl HistoryBackend for LazyIntervalStore {
    fn start_time(&self) -> i64 {
        LazyIntervalStore::start_time(self)
    }

    fn end_time(&self) -> i64 {
        LazyIntervalStore::end_time(self)
    }

    fn insert(&self, interval: AttrInterval) -> Result<()> {
        LazyIntervalStore::insert(self, interval)
    }

    fn query_at(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        let (start, end) = (self.start_time(), self.end_time());
        if t < start || t > end {
            return Err(Error::time_range(t, start, end));
        }
        Ok(self.find_at(attr, t))
    }

    fn query_range(&self, attrs: &[AttributeId], qs: i64, qe: i64) -> Result<IntervalIter<'_>> {
        if qs > qe {
            return Err(Error::time_range(qe, qs, TIME_OPEN));
        }
        let wanted: FxHashSet<AttributeId> = attrs.iter().copied().collect();
        let matches: Vec<AttrInterval> = self
            .intersecting(qs, qe)
            .into_iter()
            .filter(|iv| wanted.contains(&iv.attr))
            .collect();
        Ok(Box::new(matches.into_iter().map(Ok)))
    }

    fn close(&self) -> Result<()> {
        LazyIntervalStore::close(self);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        LazyIntervalStore::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HtConfig;
    use histree_core::Value;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn a(id: u32) -> AttributeId {
        AttributeId::new(id)
    }

    /// The contract every backend answers identically.
    fn exercise_shared_contract<B: HistoryBackend>(backend: &B) {
        backend
            .insert(AttrInterval::new(a(1), 0, 10, Value::Str("A".into())))
            .unwrap();
        backend
            .insert(AttrInterval::new(a(1), 10, 20, Value::Str("B".into())))
            .unwrap();
        backend
            .insert(AttrInterval::new(a(1), 20, TIME_OPEN, Value::Str("C".into())))
            .unwrap();

        let at = |t: i64| {
            backend
                .query_at(a(1), t)
                .unwrap()
                .map(|iv| iv.value)
        };
        assert_eq!(at(15), Some(Value::Str("B".into())));
        assert_eq!(at(25), Some(Value::Str("C".into())));

        let ranged: Vec<Value> = backend
            .query_range(&[a(1)], 5, 15)
            .unwrap()
            .map(|r| r.map(|iv| iv.value))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            ranged,
            vec![Value::Str("A".into()), Value::Str("B".into())]
        );

        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(
            backend.insert(AttrInterval::new(a(1), 30, 40, Value::Null)),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_shared_contract_on_tree() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(&dir.path().join("b.ht"), HtConfig::new(0)).unwrap();
        exercise_shared_contract(&tree);
    }

    #[test]
    fn test_shared_contract_on_lazy_store() {
        exercise_shared_contract(&LazyIntervalStore::new(0));
    }

    #[test]
    fn test_lazy_query_at_outside_span_is_time_range() {
        let store = LazyIntervalStore::new(10);
        store
            .insert(AttrInterval::new(a(1), 10, 20, Value::Null))
            .unwrap();
        assert!(matches!(
            HistoryBackend::query_at(&store, a(1), 5),
            Err(Error::TimeRange { time: 5, .. })
        ));
        assert!(matches!(
            HistoryBackend::query_at(&store, a(1), 21),
            Err(Error::TimeRange { time: 21, .. })
        ));
    }

    // ========== Backend Parity ==========

    fn sort_key(iv: &AttrInterval) -> (u32, i64, i64) {
        (iv.attr.as_u32(), iv.start, iv.end)
    }

    /// Both backends must answer every query identically for data with
    /// non-overlapping per-attribute intervals arriving mildly shuffled.
    #[test]
    fn test_backends_agree_on_shuffled_data() {
        let dir = tempdir().unwrap();
        let cfg = HtConfig::new(0)
            .with_block_size(2048)
            .with_max_children(3)
            .with_max_intervals(4);
        let tree = HistoryTree::create(&dir.path().join("p.ht"), cfg).unwrap();
        let store = LazyIntervalStore::new(0);

        let mut rng = StdRng::seed_from_u64(7);
        let mut intervals = Vec::new();
        for attr in 0..4u32 {
            let mut t = 0i64;
            for _ in 0..40 {
                let d = rng.gen_range(1..20);
                intervals.push(AttrInterval::new(a(attr), t, t + d, Value::Int(t)));
                t += d;
            }
        }
        // Mild shuffle, the roughly-ordered arrival a real producer gives
        // the tree.
        for i in 0..intervals.len() {
            let j = (i + rng.gen_range(0..4)).min(intervals.len() - 1);
            intervals.swap(i, j);
        }
        for iv in &intervals {
            tree.insert(iv.clone()).unwrap();
            store.insert(iv.clone()).unwrap();
        }
        assert_eq!(tree.end_time(), store.end_time());

        let attrs: Vec<AttributeId> = (0..4).map(a).collect();
        let end = store.end_time();
        for _ in 0..200 {
            let t = rng.gen_range(0..end);
            for &attr in &attrs {
                assert_eq!(
                    HistoryBackend::query_at(&tree, attr, t).unwrap(),
                    HistoryBackend::query_at(&store, attr, t).unwrap(),
                    "attr {attr} at {t}"
                );
            }
        }
        for _ in 0..50 {
            let qs = rng.gen_range(0..end);
            let qe = rng.gen_range(qs..=end);
            let mut from_tree: Vec<AttrInterval> = tree
                .query_range(&attrs, qs, qe)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            let mut from_store: Vec<AttrInterval> = HistoryBackend::query_range(&store, &attrs, qs, qe)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            from_tree.sort_by_key(sort_key);
            from_store.sort_by_key(sort_key);
            assert_eq!(from_tree, from_store, "range [{qs}, {qe}]");
        }
    }
}
