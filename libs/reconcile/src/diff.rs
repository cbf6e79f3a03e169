//! Snapshot diffing into lifecycle events.

use std::collections::BTreeSet;

/// A lifecycle transition for one member of a watched set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleEvent<T> {
    /// The member appeared and should be started.
    Start(T),

    /// The member disappeared and should be stopped.
    Stop(T),
}

impl<T> LifecycleEvent<T> {
    /// The member this event refers to.
    pub fn item(&self) -> &T {
        match self {
            Self::Start(item) | Self::Stop(item) => item,
        }
    }

    /// Returns true for `Start` events.
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start(_))
    }
}

/// Diff two snapshots.
///
/// Returns a `Stop` for every member of `previous - current` followed by a
/// `Start` for every member of `current - previous`. Membership is full
/// value equality, so a member whose value changed is stopped and started.
pub fn diff_sets<T>(previous: &BTreeSet<T>, current: &BTreeSet<T>) -> Vec<LifecycleEvent<T>>
where
    T: Ord + Clone,
{
    let stops = previous
        .difference(current)
        .cloned()
        .map(LifecycleEvent::Stop);
    let starts = current
        .difference(previous)
        .cloned()
        .map(LifecycleEvent::Start);

    stops.chain(starts).collect()
}

/// Stateful differ over a sequence of snapshots.
///
/// Starts from an implicit empty snapshot, so the first call to
/// [`DiffEngine::advance`] starts every member.
#[derive(Debug, Clone)]
pub struct DiffEngine<T> {
    previous: BTreeSet<T>,
}

impl<T: Ord + Clone> DiffEngine<T> {
    /// Create a differ whose previous snapshot is empty.
    pub fn new() -> Self {
        Self {
            previous: BTreeSet::new(),
        }
    }

    /// Feed the next snapshot and return the transitions it causes.
    pub fn advance(&mut self, current: BTreeSet<T>) -> Vec<LifecycleEvent<T>> {
        let events = diff_sets(&self.previous, &current);
        self.previous = current;
        events
    }

    /// The last snapshot fed in.
    pub fn current(&self) -> &BTreeSet<T> {
        &self.previous
    }
}

impl<T: Ord + Clone> Default for DiffEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(items: &[(u8, &str)]) -> BTreeSet<(u8, String)> {
        items.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_first_snapshot_starts_everything() {
        let mut engine = DiffEngine::new();
        let events = engine.advance(set(&[(1, "a"), (2, "b")]));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(LifecycleEvent::is_start));
    }

    #[test]
    fn test_identical_snapshot_is_silent() {
        let mut engine = DiffEngine::new();
        engine.advance(set(&[(1, "a")]));

        assert!(engine.advance(set(&[(1, "a")])).is_empty());
    }

    #[test]
    fn test_changed_value_is_stop_then_start() {
        let mut engine = DiffEngine::new();
        engine.advance(set(&[(1, "a")]));

        let events = engine.advance(set(&[(1, "b")]));
        assert_eq!(
            events,
            vec![
                LifecycleEvent::Stop((1, "a".to_string())),
                LifecycleEvent::Start((1, "b".to_string())),
            ]
        );
    }

    #[test]
    fn test_stops_precede_starts() {
        let mut engine = DiffEngine::new();
        engine.advance(set(&[(5, "e"), (9, "i")]));

        let events = engine.advance(set(&[(1, "a"), (9, "i")]));
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_start());
        assert_eq!(events[0].item().0, 5);
        assert!(events[1].is_start());
        assert_eq!(events[1].item().0, 1);
        assert_eq!(engine.current().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_diff_is_exact_set_difference(
            a in proptest::collection::btree_set(0u16..64, 0..32),
            b in proptest::collection::btree_set(0u16..64, 0..32),
        ) {
            let events = diff_sets(&a, &b);

            let stops: BTreeSet<u16> = events.iter().filter(|e| !e.is_start()).map(|e| *e.item()).collect();
            let starts: BTreeSet<u16> = events.iter().filter(|e| e.is_start()).map(|e| *e.item()).collect();

            let only_a: BTreeSet<u16> = a.difference(&b).copied().collect();
            let only_b: BTreeSet<u16> = b.difference(&a).copied().collect();

            prop_assert_eq!(&stops, &only_a);
            prop_assert_eq!(&starts, &only_b);
            prop_assert_eq!(events.len(), stops.len() + starts.len());

            let first_start = events.iter().position(LifecycleEvent::is_start).unwrap_or(events.len());
            prop_assert!(events[first_start..].iter().all(LifecycleEvent::is_start));
        }
    }
}
