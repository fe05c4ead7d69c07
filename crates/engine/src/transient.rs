//! Transient state: per-attribute stacks of still-ongoing values
//!
//! Backends only store finished intervals, so the end of the current value
//! is unknown until the next change arrives. This layer holds that open tail.
//! Each attribute carries a stack: pushing a value covers the one below it,
//! and popping resumes it. Every transition flushes the segment the outgoing
//! value actually covered, `[covered_from, t)`, and rebases the survivor to
//! start at `t`. An attribute's flushed segments therefore never overlap.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use histree_core::{AttrInterval, AttributeId, Error, Result, Value, TIME_OPEN};

/// One still-ongoing value: current as of `start`, end unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct OngoingEntry {
    /// Time this value became (or resumed being) current.
    pub start: i64,
    /// The ongoing value.
    pub value: Value,
}

type OngoingStack = SmallVec<[OngoingEntry; 4]>;

/// Per-attribute ongoing-value stacks behind one lock.
#[derive(Debug, Default)]
pub struct TransientState {
    stacks: Mutex<FxHashMap<AttributeId, OngoingStack>>,
}

impl TransientState {
    /// Create an empty transient layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current value of `attr` at time `t`.
    ///
    /// Returns the segment the outgoing value covered, ready for backend
    /// insertion. `None` when there was no previous value or it covered
    /// nothing (`t` equal to its start).
    pub fn set(&self, attr: AttributeId, t: i64, value: Value) -> Result<Option<AttrInterval>> {
        let mut stacks = self.stacks.lock();
        let stack = stacks.entry(attr).or_default();
        let Some(top) = stack.last_mut() else {
            stack.push(OngoingEntry { start: t, value });
            return Ok(None);
        };
        if t < top.start {
            return Err(Error::time_range(t, top.start, TIME_OPEN));
        }
        let flushed = (top.start < t)
            .then(|| AttrInterval::new(attr, top.start, t, top.value.clone()));
        *top = OngoingEntry { start: t, value };
        Ok(flushed)
    }

    /// Push a value over the current one at time `t`.
    ///
    /// The covered value keeps its place in the stack and resumes when the
    /// pushed one is popped. Returns the segment the covered value flushes.
    pub fn push(&self, attr: AttributeId, t: i64, value: Value) -> Result<Option<AttrInterval>> {
        let mut stacks = self.stacks.lock();
        let stack = stacks.entry(attr).or_default();
        let flushed = match stack.last_mut() {
            Some(top) => {
                if t < top.start {
                    return Err(Error::time_range(t, top.start, TIME_OPEN));
                }
                let flushed = (top.start < t)
                    .then(|| AttrInterval::new(attr, top.start, t, top.value.clone()));
                top.start = t;
                flushed
            }
            None => None,
        };
        stack.push(OngoingEntry { start: t, value });
        Ok(flushed)
    }

    /// Pop the current value of `attr` at time `t`, resuming the one below.
    ///
    /// Returns the segment the popped value covered.
    pub fn pop(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        let mut stacks = self.stacks.lock();
        let stack = stacks.get_mut(&attr).ok_or(Error::NoOngoing(attr))?;
        let current = stack.last().ok_or(Error::NoOngoing(attr))?;
        if t < current.start {
            return Err(Error::time_range(t, current.start, TIME_OPEN));
        }
        let top = stack.pop().ok_or(Error::NoOngoing(attr))?;
        let flushed = (top.start < t)
            .then(|| AttrInterval::new(attr, top.start, t, top.value));
        if let Some(resumed) = stack.last_mut() {
            resumed.start = t;
        } else {
            stacks.remove(&attr);
        }
        Ok(flushed)
    }

    /// The ongoing value of `attr`, if any.
    pub fn current(&self, attr: AttributeId) -> Option<OngoingEntry> {
        self.stacks.lock().get(&attr).and_then(|s| s.last()).cloned()
    }

    /// All ongoing values, in attribute order.
    pub fn currents(&self) -> Vec<(AttributeId, OngoingEntry)> {
        let stacks = self.stacks.lock();
        let mut out: Vec<(AttributeId, OngoingEntry)> = stacks
            .iter()
            .filter_map(|(&attr, stack)| stack.last().map(|e| (attr, e.clone())))
            .collect();
        out.sort_by_key(|(attr, _)| *attr);
        out
    }

    /// Drop every ongoing value of `attr` without flushing anything.
    ///
    /// Covered entries never resume once their cover is final, so the
    /// whole stack goes. Discarding an attribute with no ongoing value is
    /// a no-op.
    pub fn discard(&self, attr: AttributeId) {
        self.stacks.lock().remove(&attr);
    }

    /// Whether any attribute has an ongoing value.
    pub fn is_empty(&self) -> bool {
        self.stacks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(id: u32) -> AttributeId {
        AttributeId::new(id)
    }

    fn iv(attr: u32, start: i64, end: i64, value: Value) -> AttrInterval {
        AttrInterval::new(a(attr), start, end, value)
    }

    #[test]
    fn test_set_flushes_previous_segment() {
        let ts = TransientState::new();
        assert_eq!(ts.set(a(1), 10, Value::Int(1)).unwrap(), None);
        assert_eq!(
            ts.set(a(1), 25, Value::Int(2)).unwrap(),
            Some(iv(1, 10, 25, Value::Int(1)))
        );
        assert_eq!(
            ts.current(a(1)),
            Some(OngoingEntry { start: 25, value: Value::Int(2) })
        );
    }

    #[test]
    fn test_set_at_same_time_replaces_without_segment() {
        let ts = TransientState::new();
        ts.set(a(1), 10, Value::Int(1)).unwrap();
        assert_eq!(ts.set(a(1), 10, Value::Int(2)).unwrap(), None);
        assert_eq!(ts.current(a(1)).unwrap().value, Value::Int(2));
    }

    #[test]
    fn test_push_and_pop_resume_covered_value() {
        let ts = TransientState::new();
        ts.set(a(1), 0, Value::Str("idle".into())).unwrap();

        // Cover "idle" with "irq" for [10, 30).
        assert_eq!(
            ts.push(a(1), 10, Value::Str("irq".into())).unwrap(),
            Some(iv(1, 0, 10, Value::Str("idle".into())))
        );
        assert_eq!(ts.current(a(1)).unwrap().value, Value::Str("irq".into()));

        assert_eq!(
            ts.pop(a(1), 30).unwrap(),
            Some(iv(1, 10, 30, Value::Str("irq".into())))
        );
        // "idle" resumed at 30, not at its original start.
        assert_eq!(
            ts.current(a(1)),
            Some(OngoingEntry { start: 30, value: Value::Str("idle".into()) })
        );
    }

    #[test]
    fn test_pop_last_entry_clears_attribute() {
        let ts = TransientState::new();
        ts.push(a(1), 5, Value::Int(7)).unwrap();
        assert_eq!(ts.pop(a(1), 9).unwrap(), Some(iv(1, 5, 9, Value::Int(7))));
        assert!(ts.is_empty());
        assert!(matches!(ts.pop(a(1), 12), Err(Error::NoOngoing(_))));
    }

    #[test]
    fn test_pop_without_ongoing_is_error() {
        let ts = TransientState::new();
        assert!(matches!(ts.pop(a(3), 10), Err(Error::NoOngoing(id)) if id == a(3)));
    }

    #[test]
    fn test_time_regression_is_rejected() {
        let ts = TransientState::new();
        ts.set(a(1), 50, Value::Int(1)).unwrap();
        assert!(matches!(ts.set(a(1), 40, Value::Int(2)), Err(Error::TimeRange { time: 40, .. })));
        assert!(matches!(ts.push(a(1), 49, Value::Int(2)), Err(Error::TimeRange { .. })));
        ts.push(a(1), 60, Value::Int(2)).unwrap();
        assert!(matches!(ts.pop(a(1), 59), Err(Error::TimeRange { .. })));
        // The rejected pop must leave the stack intact.
        assert_eq!(ts.current(a(1)).unwrap().value, Value::Int(2));
    }

    #[test]
    fn test_zero_duration_pop_flushes_nothing() {
        let ts = TransientState::new();
        ts.set(a(1), 0, Value::Int(1)).unwrap();
        ts.push(a(1), 10, Value::Int(2)).unwrap();
        assert_eq!(ts.pop(a(1), 10).unwrap(), None);
        // The resumed value covers from the pop time.
        assert_eq!(ts.current(a(1)).unwrap().start, 10);
    }

    #[test]
    fn test_discard_drops_whole_stack_without_flushing() {
        let ts = TransientState::new();
        ts.set(a(2), 0, Value::Int(20)).unwrap();
        ts.set(a(1), 5, Value::Int(10)).unwrap();
        ts.push(a(1), 8, Value::Int(11)).unwrap();

        ts.discard(a(1));
        // Top and covered entry are both gone; the other attribute stays.
        assert_eq!(ts.current(a(1)), None);
        assert!(matches!(ts.pop(a(1), 12), Err(Error::NoOngoing(_))));
        assert_eq!(
            ts.currents(),
            vec![(a(2), OngoingEntry { start: 0, value: Value::Int(20) })]
        );

        ts.discard(a(1));
        ts.discard(a(2));
        assert!(ts.is_empty());
    }

    #[test]
    fn test_currents_lists_in_attribute_order() {
        let ts = TransientState::new();
        ts.set(a(5), 0, Value::Int(5)).unwrap();
        ts.set(a(2), 0, Value::Int(2)).unwrap();
        let currents = ts.currents();
        assert_eq!(currents[0].0, a(2));
        assert_eq!(currents[1].0, a(5));
        assert!(!ts.is_empty());
    }
}
