//! Protocol rules
//!
//! A [`Rules`] value is built once per protocol and shared by every dialogue
//! of that protocol. It holds the performatives a dialogue may start with, the
//! performatives that end it, and the reply graph.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Immutable descriptor of a protocol's reply structure
#[derive(Debug, Clone)]
pub struct Rules<T>
where
    T: Copy + Eq + Hash,
{
    initial_performatives: HashSet<T>,
    terminal_performatives: HashSet<T>,
    valid_replies: HashMap<T, HashSet<T>>,
}

impl<T> Rules<T>
where
    T: Copy + Eq + Hash + fmt::Display,
{
    /// Create rules from the initial set, the terminal set and the reply graph
    pub fn new<I, R>(
        initial_performatives: impl IntoIterator<Item = T>,
        terminal_performatives: impl IntoIterator<Item = T>,
        valid_replies: I,
    ) -> Self
    where
        I: IntoIterator<Item = (T, R)>,
        R: IntoIterator<Item = T>,
    {
        Self {
            initial_performatives: initial_performatives.into_iter().collect(),
            terminal_performatives: terminal_performatives.into_iter().collect(),
            valid_replies: valid_replies
                .into_iter()
                .map(|(performative, replies)| (performative, replies.into_iter().collect()))
                .collect(),
        }
    }

    /// Performatives a dialogue may start with
    pub fn initial_performatives(&self) -> &HashSet<T> {
        &self.initial_performatives
    }

    /// Performatives that end a dialogue
    pub fn terminal_performatives(&self) -> &HashSet<T> {
        &self.terminal_performatives
    }

    /// The full reply graph
    pub fn valid_replies(&self) -> &HashMap<T, HashSet<T>> {
        &self.valid_replies
    }

    /// Whether `performative` may open a dialogue
    pub fn is_initial(&self, performative: T) -> bool {
        self.initial_performatives.contains(&performative)
    }

    /// Whether `performative` ends a dialogue
    pub fn is_terminal(&self, performative: T) -> bool {
        self.terminal_performatives.contains(&performative)
    }

    /// Performatives that are valid replies to `performative`
    ///
    /// # Panics
    ///
    /// Panics if `performative` is not part of the reply graph. Every
    /// performative a protocol can emit must have an entry, possibly empty.
    pub fn get_valid_replies(&self, performative: T) -> &HashSet<T> {
        match self.valid_replies.get(&performative) {
            Some(replies) => replies,
            None => panic!("this performative '{}' is not supported", performative),
        }
    }

    /// Whether `reply` is allowed as an answer to `target`
    pub fn is_valid_reply(&self, target: T, reply: T) -> bool {
        self.get_valid_replies(target).contains(&reply)
    }
}

/// Render a performative set deterministically for error messages
pub(crate) fn describe_performatives<T: fmt::Display>(performatives: &HashSet<T>) -> String {
    let mut names: Vec<String> = performatives.iter().map(|p| p.to_string()).collect();
    names.sort();
    format!("{{{}}}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Perf {
        Open,
        Answer,
        Close,
        Unknown,
    }

    impl fmt::Display for Perf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Perf::Open => "open",
                Perf::Answer => "answer",
                Perf::Close => "close",
                Perf::Unknown => "unknown",
            };
            write!(f, "{}", name)
        }
    }

    fn rules() -> Rules<Perf> {
        Rules::new(
            [Perf::Open],
            [Perf::Close],
            [
                (Perf::Open, vec![Perf::Answer, Perf::Close]),
                (Perf::Answer, vec![Perf::Close]),
                (Perf::Close, vec![]),
            ],
        )
    }

    #[test]
    fn test_rules_sets() {
        let rules = rules();
        assert!(rules.is_initial(Perf::Open));
        assert!(!rules.is_initial(Perf::Answer));
        assert!(rules.is_terminal(Perf::Close));
        assert_eq!(rules.valid_replies().len(), 3);
    }

    #[test]
    fn test_valid_replies() {
        let rules = rules();
        assert!(rules.is_valid_reply(Perf::Open, Perf::Answer));
        assert!(!rules.is_valid_reply(Perf::Answer, Perf::Open));
        assert!(rules.get_valid_replies(Perf::Close).is_empty());
        assert_eq!(
            describe_performatives(rules.get_valid_replies(Perf::Open)),
            "{answer, close}"
        );
    }

    #[test]
    #[should_panic(expected = "this performative 'unknown' is not supported")]
    fn test_unsupported_performative_panics() {
        rules().get_valid_replies(Perf::Unknown);
    }
}
