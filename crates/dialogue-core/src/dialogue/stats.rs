//! Dialogue end-state statistics

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Counts of finished dialogues per end state, split by who started them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueStats<E>
where
    E: Copy + Eq + Hash,
{
    self_initiated: HashMap<E, u64>,
    other_initiated: HashMap<E, u64>,
}

impl<E> DialogueStats<E>
where
    E: Copy + Eq + Hash + fmt::Debug,
{
    /// Create zeroed counters for every end state
    pub fn new(end_states: impl IntoIterator<Item = E>) -> Self {
        let self_initiated: HashMap<E, u64> =
            end_states.into_iter().map(|end_state| (end_state, 0)).collect();
        let other_initiated = self_initiated.clone();
        Self {
            self_initiated,
            other_initiated,
        }
    }

    /// Counters of dialogues started by the local agent
    pub fn self_initiated(&self) -> &HashMap<E, u64> {
        &self.self_initiated
    }

    /// Counters of dialogues started by the opponent
    pub fn other_initiated(&self) -> &HashMap<E, u64> {
        &self.other_initiated
    }

    /// Record one dialogue finishing in `end_state`
    ///
    /// # Panics
    ///
    /// Panics if `end_state` was not registered at construction.
    pub fn add_dialogue_endstate(&mut self, end_state: E, is_self_initiated: bool) {
        let counters = if is_self_initiated {
            &mut self.self_initiated
        } else {
            &mut self.other_initiated
        };
        match counters.get_mut(&end_state) {
            Some(count) => *count += 1,
            None => panic!("End state not present! {:?}", end_state),
        }
    }

    /// Total number of recorded dialogues
    pub fn total(&self) -> u64 {
        self.self_initiated.values().sum::<u64>() + self.other_initiated.values().sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Outcome {
        Agreed,
        Refused,
        Unregistered,
    }

    #[test]
    fn test_counters_split_by_initiator() {
        let mut stats = DialogueStats::new([Outcome::Agreed, Outcome::Refused]);
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.self_initiated()[&Outcome::Agreed], 0);

        stats.add_dialogue_endstate(Outcome::Agreed, true);
        stats.add_dialogue_endstate(Outcome::Agreed, true);
        stats.add_dialogue_endstate(Outcome::Refused, false);

        assert_eq!(stats.self_initiated()[&Outcome::Agreed], 2);
        assert_eq!(stats.self_initiated()[&Outcome::Refused], 0);
        assert_eq!(stats.other_initiated()[&Outcome::Refused], 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    #[should_panic(expected = "End state not present!")]
    fn test_unknown_end_state_panics() {
        let mut stats = DialogueStats::new([Outcome::Agreed]);
        stats.add_dialogue_endstate(Outcome::Unregistered, false);
    }
}
