//! Per-turn intent collection

use std::collections::{BTreeMap, BTreeSet};

use crate::game::state::{BotIntent, ParticipantId};
use crate::ws::protocol::Intent;

/// Intents gathered for one turn window
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedWindow {
    /// Intent of every live bot, including held-over ones
    pub intents: BTreeMap<ParticipantId, BotIntent>,
    /// Bots that sent nothing in this window
    pub skipped: Vec<ParticipantId>,
}

/// Holds the sticky intent of each live bot and tracks who has
/// submitted in the current window.
#[derive(Debug, Clone, Default)]
pub struct IntentCollector {
    intents: BTreeMap<ParticipantId, BotIntent>,
    submitted: BTreeSet<ParticipantId>,
}

impl IntentCollector {
    pub fn new(ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            intents: ids.into_iter().map(|id| (id, BotIntent::default())).collect(),
            submitted: BTreeSet::new(),
        }
    }

    /// Start over for a new round with default intents
    pub fn reset(&mut self, ids: impl IntoIterator<Item = ParticipantId>) {
        *self = Self::new(ids);
    }

    /// Merge an intent into the current window. A second intent in the
    /// same window overwrites the fields it carries. Returns false for a
    /// bot that is not collected.
    pub fn submit(&mut self, id: ParticipantId, intent: &Intent) -> bool {
        let Some(stored) = self.intents.get_mut(&id) else {
            return false;
        };
        stored.merge(intent);
        self.submitted.insert(id);
        true
    }

    /// Stop collecting for a bot (died or disconnected)
    pub fn remove(&mut self, id: ParticipantId) {
        self.intents.remove(&id);
        self.submitted.remove(&id);
    }

    pub fn retain(&mut self, live: &[ParticipantId]) {
        self.intents.retain(|id, _| live.contains(id));
        self.submitted.retain(|id| live.contains(id));
    }

    pub fn all_submitted(&self) -> bool {
        self.intents.keys().all(|id| self.submitted.contains(id))
    }

    /// Close the window. Intents arriving afterwards count for the next one.
    pub fn close(&mut self) -> ClosedWindow {
        let skipped = self
            .intents
            .keys()
            .filter(|id| !self.submitted.contains(id))
            .copied()
            .collect();
        self.submitted.clear();

        ClosedWindow {
            intents: self.intents.clone(),
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed(v: f64) -> Intent {
        Intent {
            target_speed: Some(v),
            ..Intent::default()
        }
    }

    #[test]
    fn missing_intents_are_skipped_and_held() {
        let mut collector = IntentCollector::new([1, 2]);
        assert!(collector.submit(1, &speed(8.0)));
        assert!(collector.submit(2, &speed(4.0)));
        let first = collector.close();
        assert!(first.skipped.is_empty());

        for _ in 0..3 {
            assert!(collector.submit(2, &speed(4.0)));
            let window = collector.close();
            assert_eq!(window.skipped, vec![1]);
            assert_eq!(window.intents[&1].target_speed, 8.0);
        }
    }

    #[test]
    fn late_intent_counts_for_next_window() {
        let mut collector = IntentCollector::new([1]);
        let closed = collector.close();
        assert_eq!(closed.intents[&1].target_speed, 0.0);
        assert_eq!(closed.skipped, vec![1]);

        collector.submit(1, &speed(6.0));
        let next = collector.close();
        assert_eq!(closed.intents[&1].target_speed, 0.0);
        assert_eq!(next.intents[&1].target_speed, 6.0);
        assert!(next.skipped.is_empty());
    }

    #[test]
    fn resubmitting_in_a_window_merges() {
        let mut collector = IntentCollector::new([1]);
        collector.submit(
            1,
            &Intent {
                turn_rate: Some(5.0),
                ..Intent::default()
            },
        );
        collector.submit(1, &speed(3.0));
        let window = collector.close();
        assert_eq!(window.intents[&1].turn_rate, 5.0);
        assert_eq!(window.intents[&1].target_speed, 3.0);
    }

    #[test]
    fn removed_bots_are_not_waited_for() {
        let mut collector = IntentCollector::new([1, 2]);
        collector.submit(1, &speed(1.0));
        assert!(!collector.all_submitted());
        collector.remove(2);
        assert!(collector.all_submitted());
        assert!(!collector.submit(2, &speed(1.0)));
        assert!(!collector.close().intents.contains_key(&2));
    }
}
