//! Subscription bookkeeping: who currently needs which topic.
//!
//! Pure data structure. The controller decides what to compute based on the
//! answers it gets here; nothing in this module triggers work.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::model::{FalseColoring, Representation};

/// Identity of a consumer (a view, a dock, the controller itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Reserved for the controller's own permanent subscriptions.
    pub const CONTROLLER: SubscriberId = SubscriberId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber {}", self.0)
    }
}

/// One scalar band plane of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageBandId {
    pub repr: Representation,
    pub band: usize,
}

impl ImageBandId {
    pub fn new(repr: Representation, band: usize) -> Self {
        Self { repr, band }
    }
}

/// Set of `(subscriber, topic)` pairs for one kind of topic.
#[derive(Debug, Clone)]
pub struct SubscriptionSet<T> {
    entries: HashSet<(SubscriberId, T)>,
}

impl<T> Default for SubscriptionSet<T> {
    fn default() -> Self {
        Self {
            entries: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> SubscriptionSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest of `subscriber` in `topic`.
    ///
    /// Returns true only when `topic` had no subscriber before, i.e. when the
    /// caller has to start computing it.
    pub fn subscribe(&mut self, subscriber: SubscriberId, topic: T) -> bool {
        let first = !self.is_subscribed(topic);
        let inserted = self.entries.insert((subscriber, topic));
        first && inserted
    }

    /// Remove the pair. Unknown pairs are ignored. Returns whether it existed.
    pub fn unsubscribe(&mut self, subscriber: SubscriberId, topic: T) -> bool {
        self.entries.remove(&(subscriber, topic))
    }

    pub fn is_subscribed(&self, topic: T) -> bool {
        self.entries.iter().any(|(_, t)| *t == topic)
    }

    pub fn has_any_subscriber(&self, topic: T) -> bool {
        self.is_subscribed(topic)
    }

    pub fn subscriber_count(&self, topic: T) -> usize {
        self.entries.iter().filter(|(_, t)| *t == topic).count()
    }

    /// Live topics, each reported once.
    pub fn topics(&self) -> HashSet<T> {
        self.entries.iter().map(|(_, t)| *t).collect()
    }

    /// Live topics matching `pred`, each reported once.
    pub fn topics_where(&self, mut pred: impl FnMut(&T) -> bool) -> HashSet<T> {
        self.entries
            .iter()
            .map(|(_, t)| *t)
            .filter(|t| pred(t))
            .collect()
    }

    /// Number of `(subscriber, topic)` pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All subscriptions tracked by the controller.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    pub repr: SubscriptionSet<Representation>,
    pub image_band: SubscriptionSet<ImageBandId>,
    pub false_color: SubscriptionSet<FalseColoring>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SubscriberId = SubscriberId::new(1);
    const B: SubscriberId = SubscriberId::new(2);

    #[test]
    fn test_first_subscriber_transition() {
        let mut set = SubscriptionSet::new();
        assert!(set.subscribe(A, Representation::Grad));
        assert!(!set.subscribe(A, Representation::Grad));
        assert!(!set.subscribe(B, Representation::Grad));
        assert_eq!(set.subscriber_count(Representation::Grad), 2);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_liveness_follows_pairs() {
        let mut set = SubscriptionSet::new();
        assert!(!set.is_subscribed(Representation::Img));

        set.subscribe(A, Representation::Img);
        set.subscribe(B, Representation::Img);
        set.unsubscribe(A, Representation::Img);
        assert!(set.has_any_subscriber(Representation::Img));

        set.unsubscribe(B, Representation::Img);
        assert!(!set.is_subscribed(Representation::Img));

        // live again after dropping to zero
        assert!(set.subscribe(B, Representation::Img));
    }

    #[test]
    fn test_subscribe_unsubscribe_restores_state() {
        let mut set = SubscriptionSet::new();
        set.subscribe(A, FalseColoring::Pca);

        for topic in FalseColoring::all() {
            let before = set.is_subscribed(*topic);
            set.subscribe(B, *topic);
            set.unsubscribe(B, *topic);
            assert_eq!(set.is_subscribed(*topic), before);
        }
        assert!(set.is_subscribed(FalseColoring::Pca));
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let mut set: SubscriptionSet<ImageBandId> = SubscriptionSet::new();
        assert!(!set.unsubscribe(A, ImageBandId::new(Representation::Img, 3)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_topics_are_deduplicated() {
        let mut set = SubscriptionSet::new();
        set.subscribe(A, ImageBandId::new(Representation::Img, 1));
        set.subscribe(B, ImageBandId::new(Representation::Img, 1));
        set.subscribe(B, ImageBandId::new(Representation::Grad, 0));

        assert_eq!(set.topics().len(), 2);
        let img = set.topics_where(|id| id.repr == Representation::Img);
        assert_eq!(img.len(), 1);
        assert!(img.contains(&ImageBandId::new(Representation::Img, 1)));
    }
}
