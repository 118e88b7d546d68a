//! File-backed transaction log
//!
//! Entries live in the segmented WAL (see [`crate::wal`]) inside the log
//! directory. Opening the log:
//!
//! 1. Takes an exclusive advisory lock on `.wal.lock`
//! 2. Scans every segment, checking headers, checksums and sequence contiguity
//! 3. Cuts off a torn record at the tail of the last segment
//! 4. Resumes appending to the last segment
//!
//! Damage anywhere other than the tail of the last segment fails the open.

use std::fs::{File, OpenOptions};
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use prevail_core::{LogEntry, SequenceNumber, Subscriber, Timestamp};
use tracing::{debug, info, warn};

use super::subscription::{Subscription, SubscriberSet};
use super::{check_replay_start, LogError, TransactionLog, UpdateStats};
use crate::codec::Codec;
use crate::wal::{
    DurabilityMode, WalConfig, WalCounters, WalReader, WalRecord, WalSegment, WalWriter,
};

/// Name of the lock file held by the writer of a log directory.
pub const LOCK_FILE_NAME: &str = ".wal.lock";

/// Transaction log stored as a segmented WAL.
pub struct FileTransactionLog<T> {
    dir: PathBuf,
    codec: Box<dyn Codec<T>>,
    writer: WalWriter,
    reader: WalReader,
    next_sequence: Option<SequenceNumber>,
    subscribers: SubscriberSet<T>,
    /// Held for the lifetime of the log; the lock is released on drop
    _lock: File,
}

impl<T> FileTransactionLog<T> {
    /// Open (or create) the log in `dir`.
    ///
    /// Fails with [`LogError::Locked`] if another writer has the directory
    /// and with [`LogError::Corruption`] if stored entries are damaged.
    pub fn open(
        dir: impl AsRef<Path>,
        codec: Box<dyn Codec<T>>,
        config: WalConfig,
    ) -> Result<Self, LogError> {
        config.validate()?;

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock = acquire_lock(&dir)?;

        let reader = WalReader::new(&dir);
        let scan = reader.scan()?;

        if let Some(number) = scan.incomplete_segment {
            let path = WalSegment::segment_path(&dir, number);
            warn!(
                target: "prevail::wal",
                segment = number,
                path = %path.display(),
                "Removing WAL segment with incomplete header"
            );
            std::fs::remove_file(&path)?;
        }

        if let Some(ref truncate) = scan.truncate_info {
            warn!(
                target: "prevail::wal",
                segment = truncate.segment_number,
                valid_end = truncate.valid_end,
                bytes = truncate.bytes_to_truncate(),
                "Truncating torn record at WAL tail"
            );
            let mut segment = WalSegment::open_append(&dir, truncate.segment_number)?;
            segment.truncate(truncate.valid_end)?;
        }

        let next_sequence = scan.next_sequence();
        let last_sequence = match next_sequence {
            Some(next) if scan.record_count() > 0 => Some(next - 1),
            _ => None,
        };
        let durability = config.durability;
        let writer = WalWriter::open(&dir, config, last_sequence)?;

        info!(
            target: "prevail::wal",
            dir = %dir.display(),
            segments = scan.segments.len(),
            records = scan.record_count(),
            next_sequence = ?next_sequence,
            durability = durability.description(),
            codec = codec.codec_id(),
            "Transaction log opened"
        );

        Ok(FileTransactionLog {
            dir,
            codec,
            writer,
            reader,
            next_sequence,
            subscribers: SubscriberSet::new(),
            _lock: lock,
        })
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durability mode of the writer.
    pub fn durability(&self) -> DurabilityMode {
        self.writer.durability()
    }

    /// Sequence of the last entry known to be on disk.
    ///
    /// In `Always` mode this is the last logged entry. In `Standard` mode it
    /// trails until the next sync.
    pub fn durable_through(&self) -> Option<SequenceNumber> {
        self.writer.durable_through()
    }

    /// Cumulative WAL counters.
    pub fn counters(&self) -> WalCounters {
        self.writer.counters()
    }

    /// Live subscriptions that have not ended.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.active()
    }

    /// Oldest retained sequence number, reading segment headers.
    fn first_available(
        &self,
        segments: &[u64],
        next: SequenceNumber,
    ) -> Result<SequenceNumber, LogError> {
        match segments.first() {
            Some(&number) => Ok(self.read_base(number)?),
            None => Ok(next),
        }
    }

    fn read_base(&self, number: u64) -> Result<SequenceNumber, LogError> {
        let segment = WalSegment::open_read(&self.dir, number).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData || e.kind() == io::ErrorKind::UnexpectedEof {
                LogError::Corruption {
                    segment: Some(number),
                    detail: e.to_string(),
                }
            } else {
                LogError::Io(e)
            }
        })?;
        Ok(segment.base_sequence())
    }

    fn decode(&self, segment: u64, record: &WalRecord) -> Result<LogEntry<T>, LogError> {
        let mut bytes = record.transaction.as_slice();
        let transaction = self
            .codec
            .read(&mut bytes)
            .map_err(|e| LogError::Corruption {
                segment: Some(segment),
                detail: format!("entry {} cannot be decoded: {}", record.sequence, e),
            })?;
        Ok(LogEntry::new(record.sequence, transaction, record.execution_time))
    }
}

impl<T: Clone + Send + 'static> TransactionLog<T> for FileTransactionLog<T> {
    fn log(
        &mut self,
        transaction: &T,
        execution_time: Timestamp,
    ) -> Result<SequenceNumber, LogError> {
        let sequence = self.next_sequence.ok_or(LogError::BaselineNotEstablished)?;

        let mut payload = Vec::new();
        self.codec.write(transaction, &mut payload)?;
        self.writer
            .append(&WalRecord::new(sequence, execution_time, payload))?;
        self.next_sequence = Some(sequence + 1);

        if self.subscribers.active() > 0 {
            let entry = LogEntry::new(sequence, transaction.clone(), execution_time);
            self.subscribers.publish(&entry);
        }

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
                info!(
                    target: "prevail::wal",
                    baseline = initial,
                    "Baseline established for empty transaction log"
                );
                self.next_sequence = Some(initial);
                return Ok(stats);
            }
        };

        if !check_replay_start(initial, next)? {
            return Ok(stats);
        }

        let segments = self.reader.list_segments()?;
        let first = self.first_available(&segments, next)?;
        if initial < first {
            return Err(LogError::MissingEntries {
                requested: initial,
                first_available: first,
            });
        }

        // Start at the last segment whose base is at or before `initial`.
        let mut start = 0;
        for (idx, &number) in segments.iter().enumerate().skip(1) {
            if self.read_base(number)? > initial {
                break;
            }
            start = idx;
        }

        let mut expected = initial;
        let last_idx = segments.len() - 1;
        'segments: for (idx, &number) in segments.iter().enumerate().skip(start) {
            let read = self.reader.read_segment(number, idx == last_idx)?;
            for record in read.records.iter().filter(|r| r.sequence >= initial) {
                if record.sequence != expected {
                    return Err(LogError::Corruption {
                        segment: Some(number),
                        detail: format!(
                            "expected entry {}, found {}",
                            expected, record.sequence
                        ),
                    });
                }
                let entry = self.decode(number, record)?;
                stats.record(entry.sequence);
                expected += 1;
                if let ControlFlow::Break(()) = subscriber.receive(&entry) {
                    stats.stopped = true;
                    break 'segments;
                }
            }
        }

        if !stats.stopped && expected != next {
            return Err(LogError::Corruption {
                segment: segments.last().copied(),
                detail: format!(
                    "log ends at entry {} but entries through {} were logged",
                    expected.saturating_sub(1),
                    next - 1
                ),
            });
        }

        debug!(
            target: "prevail::wal",
            initial,
            delivered = stats.delivered,
            "Replayed transaction log"
        );

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

    fn flush(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync_if_overdue(&mut self) -> Result<bool, LogError> {
        Ok(self.writer.sync_if_overdue()?)
    }
}

impl<T> std::fmt::Debug for FileTransactionLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransactionLog")
            .field("dir", &self.dir)
            .field("codec", &self.codec.codec_id())
            .field("next_sequence", &self.next_sequence)
            .field("writer", &self.writer)
            .finish()
    }
}

fn acquire_lock(dir: &Path) -> Result<File, LogError> {
    let path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if is_contended(&e) => Err(LogError::Locked { path }),
        Err(e) => Err(LogError::Io(e)),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
