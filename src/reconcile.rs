//! Streaming reconciliation and rate-bounded delivery.
//!
//! Engines stream either the full text so far or deltas, and some can
//! replace earlier output. [`StreamAccumulator`] folds all three into one
//! monotonic "text so far". [`DeliveryThrottle`] bounds how often that text
//! reaches the caller; [`Reconciler`] combines the two so that the first
//! value goes out immediately, held values go out when the interval elapses,
//! and the final value is always flushed.

use std::time::Duration;

use tokio::time::Instant;

use crate::engine::EngineChunk;

/// Accumulated text of one generation.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    full_text: String,
    revision: u64,
    delivered_revision: u64,
}

impl StreamAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `chunk` in. Returns whether the text changed.
    ///
    /// A [`EngineChunk::Text`] that starts with the accumulated text
    /// replaces it; any other text chunk, shorter ones included, is
    /// appended as a delta.
    pub fn absorb(&mut self, chunk: EngineChunk) -> bool {
        let changed = match chunk {
            EngineChunk::Text(text) if text.starts_with(&self.full_text) => {
                if text.len() == self.full_text.len() {
                    false
                } else {
                    self.full_text = text;
                    true
                }
            }
            EngineChunk::Text(delta) => {
                self.full_text.push_str(&delta);
                !delta.is_empty()
            }
            EngineChunk::Replace(text) => {
                if text == self.full_text {
                    false
                } else {
                    self.full_text = text;
                    true
                }
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// The text so far.
    pub fn text(&self) -> &str {
        &self.full_text
    }

    /// Whether the caller has not seen the current text yet.
    pub fn has_undelivered(&self) -> bool {
        self.revision != self.delivered_revision
    }

    /// Mark the current text delivered and return it.
    pub fn mark_delivered(&mut self) -> &str {
        self.delivered_revision = self.revision;
        &self.full_text
    }

    /// Consume the accumulator, returning the text.
    pub fn into_text(self) -> String {
        self.full_text
    }
}

/// Minimum spacing between deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl DeliveryThrottle {
    /// A throttle allowing one delivery per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a delivery at `now` is allowed.
    pub fn ready(&self, now: Instant) -> bool {
        self.next_slot().is_none_or(|slot| now >= slot)
    }

    /// Earliest time the next delivery is allowed; `None` if immediately.
    pub fn next_slot(&self) -> Option<Instant> {
        self.last.map(|last| last + self.interval)
    }

    /// Record a delivery at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// Accumulator plus throttle for one generation.
#[derive(Debug, Clone)]
pub struct Reconciler {
    accumulator: StreamAccumulator,
    throttle: DeliveryThrottle,
}

impl Reconciler {
    /// A reconciler delivering at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            accumulator: StreamAccumulator::new(),
            throttle: DeliveryThrottle::new(interval),
        }
    }

    /// Fold in `chunk`; returns the text to deliver now, if the throttle
    /// allows it.
    pub fn push(&mut self, chunk: EngineChunk) -> Option<String> {
        self.accumulator.absorb(chunk);
        self.take_due()
    }

    /// When held text becomes deliverable. `None` when nothing is held.
    pub fn due_at(&self) -> Option<Instant> {
        if !self.accumulator.has_undelivered() {
            return None;
        }
        Some(self.throttle.next_slot().unwrap_or_else(Instant::now))
    }

    /// Deliver held text if the throttle allows it now.
    pub fn take_due(&mut self) -> Option<String> {
        let now = Instant::now();
        if !self.accumulator.has_undelivered() || !self.throttle.ready(now) {
            return None;
        }
        self.throttle.record(now);
        Some(self.accumulator.mark_delivered().to_owned())
    }

    /// Deliver held text regardless of the throttle.
    pub fn flush(&mut self) -> Option<String> {
        if !self.accumulator.has_undelivered() {
            return None;
        }
        self.throttle.record(Instant::now());
        Some(self.accumulator.mark_delivered().to_owned())
    }

    /// The text so far.
    pub fn text(&self) -> &str {
        self.accumulator.text()
    }

    /// Consume, returning the final text.
    pub fn into_text(self) -> String {
        self.accumulator.into_text()
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn text(s: &str) -> EngineChunk {
        EngineChunk::Text(s.to_owned())
    }

    #[test]
    fn cumulative_chunks_grow_monotonically() {
        let sequences: [&[&str]; 3] = [
            &["H", "He", "Hello", "Hello,", "Hello, world"],
            &["", "a", "ab", "abc"],
            &["The", "The quick", "The quick brown", "The quick brown fox"],
        ];
        for sequence in sequences {
            let mut acc = StreamAccumulator::new();
            let mut previous = String::new();
            for chunk in sequence {
                acc.absorb(text(chunk));
                assert!(acc.text().starts_with(&previous));
                assert!(acc.text().len() >= previous.len());
                previous = acc.text().to_owned();
            }
            assert_eq!(acc.text(), *sequence.last().unwrap());
        }
    }

    #[test]
    fn pure_deltas_concatenate_in_order() {
        let sequences: [&[&str]; 3] = [
            &["Hel", "lo", ", wor", "ld"],
            &["a", "b", "c", "d", "e"],
            &["one ", "two ", "three"],
        ];
        for sequence in sequences {
            let mut acc = StreamAccumulator::new();
            for chunk in sequence {
                acc.absorb(text(chunk));
            }
            assert_eq!(acc.text(), sequence.concat());
        }
    }

    #[test]
    fn shorter_non_prefix_chunk_is_appended() {
        let mut acc = StreamAccumulator::new();
        acc.absorb(text("Hello world"));
        acc.absorb(text("!"));
        assert_eq!(acc.text(), "Hello world!");
    }

    #[test]
    fn explicit_replace_overrides_prefix_rule() {
        let mut acc = StreamAccumulator::new();
        acc.absorb(text("Hello wrold"));
        assert!(acc.absorb(EngineChunk::Replace("Hello world".into())));
        assert_eq!(acc.text(), "Hello world");
    }

    #[test]
    fn delivery_tracks_revisions() {
        let mut acc = StreamAccumulator::new();
        assert!(!acc.has_undelivered());
        acc.absorb(text("abc"));
        assert!(acc.has_undelivered());
        assert_eq!(acc.mark_delivered(), "abc");
        assert!(!acc.has_undelivered());
        acc.absorb(text("abc"));
        assert!(!acc.has_undelivered());
        acc.absorb(EngineChunk::Replace("xyz".into()));
        assert!(acc.has_undelivered());
    }

    #[tokio::test(start_paused = true)]
    async fn first_value_is_immediate_then_throttled() {
        let mut reconciler = Reconciler::new(Duration::from_millis(100));
        assert_eq!(reconciler.push(text("a")).as_deref(), Some("a"));
        assert_eq!(reconciler.push(text("ab")), None);
        assert_eq!(reconciler.push(text("abc")), None);

        let due = reconciler.due_at().unwrap();
        sleep_until_due(Some(due)).await;
        assert_eq!(reconciler.take_due().as_deref(), Some("abc"));
        assert!(reconciler.due_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_delivers_held_value_once() {
        let mut reconciler = Reconciler::new(Duration::from_secs(10));
        reconciler.push(text("a"));
        reconciler.push(text("ab"));
        assert_eq!(reconciler.flush().as_deref(), Some("ab"));
        assert_eq!(reconciler.flush(), None);
        assert_eq!(reconciler.into_text(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn value_after_interval_goes_straight_out() {
        let mut reconciler = Reconciler::new(Duration::from_millis(100));
        reconciler.push(text("a"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(reconciler.push(text("ab")).as_deref(), Some("ab"));
    }
}
