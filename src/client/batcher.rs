//! Routing-hint coalescing.
//!
//! Browsers emit candidates in bursts during negotiation. Sending each one
//! as its own frame multiplies message volume for no benefit, so hints are
//! queued and flushed either when the queue reaches a size threshold or
//! when a short delay expires, whichever comes first.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub max_batch: usize,
    pub max_delay: Duration,
}

#[derive(Debug)]
pub struct HintBatcher {
    config: BatcherConfig,
    queue: Vec<String>,
    deadline: Option<Instant>,
}

impl HintBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            queue: Vec::new(),
            deadline: None,
        }
    }

    /// Queues a hint. Returns the full batch when the size threshold is
    /// reached; otherwise arms the delay timer and returns nothing.
    pub fn push(&mut self, hint: String, now: Instant) -> Option<Vec<String>> {
        self.queue.push(hint);
        if self.queue.len() >= self.config.max_batch {
            self.deadline = None;
            return Some(std::mem::take(&mut self.queue));
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.config.max_delay);
        }
        None
    }

    /// The instant at which a pending batch must be flushed, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flushes if the delay has expired.
    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<String>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(std::mem::take(&mut self.queue))
            }
            _ => None,
        }
    }

    /// Unconditional flush, used on hangup and teardown so queued hints
    /// never leak into the next call.
    pub fn drain(&mut self) -> Vec<String> {
        self.deadline = None;
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batcher(max_batch: usize, max_delay_ms: u64) -> HintBatcher {
        HintBatcher::new(BatcherConfig {
            max_batch,
            max_delay: Duration::from_millis(max_delay_ms),
        })
    }

    #[test]
    fn flushes_at_size_threshold() {
        let mut b = batcher(3, 50);
        let now = Instant::now();
        assert!(b.push("a".into(), now).is_none());
        assert!(b.push("b".into(), now).is_none());
        let batch = b.push("c".into(), now).unwrap();
        assert_eq!(batch, vec!["a", "b", "c"]);
        assert!(b.is_empty());
        assert!(b.deadline().is_none());
    }

    #[test]
    fn flushes_at_deadline() {
        let mut b = batcher(10, 50);
        let start = Instant::now();
        b.push("a".into(), start);
        b.push("b".into(), start + Duration::from_millis(10));
        assert!(b.flush_due(start + Duration::from_millis(49)).is_none());
        let batch = b.flush_due(start + Duration::from_millis(50)).unwrap();
        assert_eq!(batch, vec!["a", "b"]);
    }

    #[test]
    fn deadline_is_set_by_first_hint_of_a_batch() {
        let mut b = batcher(10, 50);
        let start = Instant::now();
        b.push("a".into(), start);
        let first_deadline = b.deadline().unwrap();
        b.push("b".into(), start + Duration::from_millis(30));
        assert_eq!(b.deadline().unwrap(), first_deadline);
    }

    #[test]
    fn drain_clears_everything() {
        let mut b = batcher(10, 50);
        b.push("a".into(), Instant::now());
        assert_eq!(b.drain(), vec!["a"]);
        assert!(b.is_empty());
        assert!(b.deadline().is_none());
        assert!(b.drain().is_empty());
    }
}
