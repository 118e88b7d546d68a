//! In-memory transaction log

use std::collections::VecDeque;
use std::ops::ControlFlow;

use prevail_core::{LogEntry, SequenceNumber, Subscriber, Timestamp};

use super::subscription::{Subscription, SubscriberSet};
use super::{check_replay_start, LogError, TransactionLog, UpdateStats};

/// Transaction log held entirely in memory.
///
/// Same sequencing, baseline and subscription rules as
/// [`FileTransactionLog`](super::FileTransactionLog); nothing survives the
/// process.
///
/// By default every entry is kept so any subscriber can replay from the
/// start, which means memory grows with every logged transaction. Bound it
/// with [`with_retention`](Self::with_retention) or drop entries explicitly
/// with [`discard_through`](Self::discard_through); replaying from a
/// discarded sequence then fails with [`LogError::MissingEntries`].
pub struct MemoryTransactionLog<T> {
    entries: VecDeque<LogEntry<T>>,
    next_sequence: Option<SequenceNumber>,
    max_retained: Option<usize>,
    subscribers: SubscriberSet<T>,
}

impl<T> MemoryTransactionLog<T> {
    /// Empty log with no baseline.
    pub fn new() -> Self {
        MemoryTransactionLog {
            entries: VecDeque::new(),
            next_sequence: None,
            max_retained: None,
            subscribers: SubscriberSet::new(),
        }
    }

    /// Empty log whose first entry gets sequence `next`.
    pub fn starting_at(next: SequenceNumber) -> Self {
        MemoryTransactionLog {
            next_sequence: Some(next),
            ..Self::new()
        }
    }

    /// Keep at most `max_entries` of the newest entries.
    pub fn with_retention(mut self, max_entries: usize) -> Self {
        self.max_retained = Some(max_entries);
        self.enforce_retention();
        self
    }

    /// Drop retained entries up to and including `sequence`. Returns how
    /// many were dropped.
    pub fn discard_through(&mut self, sequence: SequenceNumber) -> usize {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .map_or(false, |e| e.sequence <= sequence)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    fn enforce_retention(&mut self) {
        if let Some(max) = self.max_retained {
            while self.entries.len() > max {
                self.entries.pop_front();
            }
        }
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retained entries in sequence order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry<T>> {
        self.entries.iter()
    }

    /// Live subscriptions that have not ended.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.active()
    }

    fn first_available(&self, next: SequenceNumber) -> SequenceNumber {
        self.entries.front().map(|e| e.sequence).unwrap_or(next)
    }
}

impl<T> Default for MemoryTransactionLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> TransactionLog<T> for MemoryTransactionLog<T> {
    fn log(
        &mut self,
        transaction: &T,
        execution_time: Timestamp,
    ) -> Result<SequenceNumber, LogError> {
        let sequence = self.next_sequence.ok_or(LogError::BaselineNotEstablished)?;
        let entry = LogEntry::new(sequence, transaction.clone(), execution_time);
        self.subscribers.publish(&entry);
        self.entries.push_back(entry);
        self.enforce_retention();
        self.next_sequence = Some(sequence + 1);
        Ok(sequence)
    }

    fn update(
        &mut self,
        subscriber: &mut dyn Subscriber<T>,
        initial: SequenceNumber,
    ) -> Result<UpdateStats, LogError> {
        let mut stats = UpdateStats::default();

        let next = match self.next_sequence {
            Some(next) => next,
            None => {
                self.next_sequence = Some(initial);
                return Ok(stats);
            }
        };

        if !check_replay_start(initial, next)? {
            return Ok(stats);
        }

        let first = self.first_available(next);
        if initial < first {
            return Err(LogError::MissingEntries {
                requested: initial,
                first_available: first,
            });
        }

        let start = (initial - first) as usize;
        for entry in self.entries.range(start..) {
            stats.record(entry.sequence);
            if let ControlFlow::Break(()) = subscriber.receive(entry) {
                stats.stopped = true;
                break;
            }
        }

        Ok(stats)
    }

    fn subscribe(
        &mut self,
        mut subscriber: Box<dyn Subscriber<T>>,
        initial: SequenceNumber,
    ) -> Result<Subscription, LogError> {
        let stats = self.update(subscriber.as_mut(), initial)?;
        if stats.stopped {
            return Ok(Subscription::finished());
        }
        Ok(self.subscribers.register(subscriber))
    }

    fn next_sequence(&self) -> Option<SequenceNumber> {
        self.next_sequence
    }
}

impl<T> std::fmt::Debug for MemoryTransactionLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransactionLog")
            .field("entries", &self.entries.len())
            .field("max_retained", &self.max_retained)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}
