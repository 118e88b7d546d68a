//! WAL writer with durability mode support.
//!
//! The writer appends records to the active segment, rotates segments when
//! they fill up, and tracks how far the log is known to be on disk.

use std::path::{Path, PathBuf};
use std::time::Instant;

use prevail_core::SequenceNumber;

use super::config::WalConfig;
use super::format::{WalRecord, WalSegment, SEGMENT_HEADER_SIZE};
use super::DurabilityMode;
use crate::fsutil::sync_dir;

/// Cumulative WAL operation counters.
///
/// These counters accumulate over the lifetime of the WalWriter
/// and are never reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalCounters {
    /// Total WAL record appends
    pub wal_appends: u64,
    /// Total durability barrier (sync/fsync) calls
    pub sync_calls: u64,
    /// Total bytes written to WAL segments
    pub bytes_written: u64,
    /// Total nanoseconds spent in sync/fsync calls
    pub sync_nanos: u64,
    /// Segments created by this writer
    pub segments_created: u64,
}

/// Appends records to WAL segments.
///
/// The writer does not assign sequence numbers; it writes what it is given.
/// The caller guarantees records arrive in sequence order.
///
/// # Segment Rotation
///
/// When the next record would push the active segment past
/// `WalConfig::segment_size`, the active segment is closed (synced, then
/// immutable) and a new one is created whose header carries the record's
/// sequence number as its base.
pub struct WalWriter {
    /// Active segment; `None` until the first append on an empty log
    segment: Option<WalSegment>,

    /// WAL directory
    wal_dir: PathBuf,

    /// Configuration
    config: WalConfig,

    /// Number of the active segment, or of the last one seen on disk
    current_segment_number: u64,

    /// Bytes written since last fsync (for Standard mode)
    bytes_since_sync: u64,

    /// Writes since last fsync (for Standard mode)
    writes_since_sync: usize,

    /// Last fsync time (for Standard mode)
    last_sync_time: Instant,

    /// Sequence of the last record written
    last_appended: Option<SequenceNumber>,

    /// Sequence of the last record known to be fsynced
    durable_through: Option<SequenceNumber>,

    /// A new segment exists whose directory entry is not yet synced
    dir_sync_pending: bool,

    /// A failed append could not be rolled back; the segment tail is unknown
    poisoned: bool,

    counters: WalCounters,

    #[cfg(test)]
    faults: Faults,
}

/// Injected failures for exercising error paths.
#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    segment_syncs: u32,
    dir_syncs: u32,
}

#[cfg(test)]
impl Faults {
    fn trip(counter: &mut u32, what: &str) -> std::io::Result<()> {
        if *counter > 0 {
            *counter -= 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected {} failure", what),
            ));
        }
        Ok(())
    }
}

impl WalWriter {
    /// Open a writer on `wal_dir`.
    ///
    /// The latest segment, if any, is reopened for appending; its tail must
    /// already be clean (see `WalReader::scan`). `last_sequence` is the
    /// sequence of the last record on disk, which counts as durable.
    pub fn open(
        wal_dir: impl Into<PathBuf>,
        config: WalConfig,
        last_sequence: Option<SequenceNumber>,
    ) -> std::io::Result<Self> {
        let wal_dir = wal_dir.into();
        std::fs::create_dir_all(&wal_dir)?;

        let latest = Self::find_latest_segment(&wal_dir)?;
        let segment = match latest {
            Some(number) => Some(WalSegment::open_append(&wal_dir, number)?),
            None => None,
        };

        Ok(WalWriter {
            segment,
            wal_dir,
            config,
            current_segment_number: latest.unwrap_or(0),
            bytes_since_sync: 0,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            last_appended: last_sequence,
            durable_through: last_sequence,
            dir_sync_pending: false,
            poisoned: false,
            counters: WalCounters::default(),
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    /// Append a record to the WAL.
    ///
    /// Respects the configured durability mode:
    /// - `Always`: Writes and fsyncs before returning
    /// - `Standard`: Writes, fsyncs when a batch/byte/interval threshold is hit
    ///
    /// An append either succeeds or leaves the log as it was: if the write
    /// or a sync it triggers fails, the segment is cut back to where it was
    /// and the record counts as never written, so the caller may retry the
    /// same sequence. If the cut itself fails the writer refuses all further
    /// appends.
    pub fn append(&mut self, record: &WalRecord) -> std::io::Result<()> {
        if self.poisoned {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "WAL writer disabled after a failed rollback",
            ));
        }

        let bytes = record.to_bytes();
        let segment = self.segment_for(record.sequence, bytes.len() as u64)?;

        let position = segment.size();
        if let Err(e) = segment.write(&bytes) {
            self.roll_back(position);
            return Err(e);
        }

        let previous_appended = self.last_appended;
        self.bytes_since_sync += bytes.len() as u64;
        self.writes_since_sync += 1;
        self.last_appended = Some(record.sequence);

        if let Err(e) = self.maybe_sync() {
            self.roll_back(position);
            self.last_appended = previous_appended;
            self.bytes_since_sync -= bytes.len() as u64;
            self.writes_since_sync -= 1;
            return Err(e);
        }

        self.counters.wal_appends += 1;
        self.counters.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Cut the active segment back to `position`, poisoning the writer if
    /// that fails.
    fn roll_back(&mut self, position: u64) {
        let Some(segment) = self.segment.as_mut() else {
            return;
        };
        if let Err(e) = segment.truncate(position) {
            tracing::error!(
                target: "prevail::wal",
                segment = segment.segment_number(),
                position,
                error = %e,
                "Failed to cut back WAL record; refusing further appends"
            );
            self.poisoned = true;
        }
    }

    /// Active segment that can take `len` more bytes, rotating or creating
    /// one as needed.
    fn segment_for(
        &mut self,
        sequence: SequenceNumber,
        len: u64,
    ) -> std::io::Result<&mut WalSegment> {
        let rotate = match &self.segment {
            None => true,
            Some(segment) => {
                segment.size() > SEGMENT_HEADER_SIZE as u64
                    && segment.size() + len > self.config.segment_size
            }
        };

        if rotate {
            self.rotate_segment(sequence)?;
        }
        if self.dir_sync_pending {
            self.sync_wal_dir()?;
            self.dir_sync_pending = false;
        }

        match self.segment.as_mut() {
            Some(segment) => Ok(segment),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no active WAL segment",
            )),
        }
    }

    /// Handle fsync based on durability mode.
    fn maybe_sync(&mut self) -> std::io::Result<()> {
        let due = match self.config.durability {
            DurabilityMode::Always => true,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                self.writes_since_sync >= batch_size
                    || self.bytes_since_sync >= self.config.buffered_sync_bytes
                    || self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms
            }
        };

        if due {
            self.sync_active()?;
        }
        Ok(())
    }

    fn sync_active(&mut self) -> std::io::Result<()> {
        #[cfg(test)]
        Faults::trip(&mut self.faults.segment_syncs, "segment sync")?;

        if let Some(ref mut segment) = self.segment {
            let start = Instant::now();
            segment.sync()?;
            self.counters.sync_calls += 1;
            self.counters.sync_nanos += start.elapsed().as_nanos() as u64;
        }
        self.mark_synced();
        Ok(())
    }

    /// Reset sync tracking counters.
    fn mark_synced(&mut self) {
        self.bytes_since_sync = 0;
        self.writes_since_sync = 0;
        self.last_sync_time = Instant::now();
        self.durable_through = self.last_appended;
    }

    /// Close the active segment (if any) and start a new one whose first
    /// record will carry `base_sequence`.
    ///
    /// The new segment becomes active as soon as its file exists; syncing
    /// the directory entry is left to the caller via `dir_sync_pending`, so
    /// a failed directory sync is retried instead of recreating the file.
    fn rotate_segment(&mut self, base_sequence: SequenceNumber) -> std::io::Result<()> {
        if let Some(ref mut segment) = self.segment {
            segment.close()?;
            self.mark_synced();
        }

        let number = self.current_segment_number + 1;
        let segment = WalSegment::create(&self.wal_dir, number, base_sequence)?;

        tracing::debug!(
            target: "prevail::wal",
            segment = number,
            base_sequence,
            "Created WAL segment"
        );

        self.current_segment_number = number;
        self.segment = Some(segment);
        self.dir_sync_pending = true;
        self.counters.segments_created += 1;
        Ok(())
    }

    fn sync_wal_dir(&mut self) -> std::io::Result<()> {
        #[cfg(test)]
        Faults::trip(&mut self.faults.dir_syncs, "directory sync")?;

        sync_dir(&self.wal_dir)
    }

    /// Force any written records to disk, regardless of durability mode.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.has_unsynced_data() {
            self.sync_active()?;
        }
        Ok(())
    }

    /// Sync if the Standard interval has elapsed and there is unsynced data.
    ///
    /// Call this periodically so Standard mode honors its `interval_ms`
    /// even when no new writes arrive. Returns `true` if a sync was performed.
    pub fn sync_if_overdue(&mut self) -> std::io::Result<bool> {
        if !self.has_unsynced_data() {
            return Ok(false);
        }

        if let DurabilityMode::Standard { interval_ms, .. } = self.config.durability {
            if self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms {
                self.sync_active()?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Make the next `count` segment syncs fail.
    #[cfg(test)]
    pub(crate) fn fail_segment_syncs(&mut self, count: u32) {
        self.faults.segment_syncs = count;
    }

    /// Make the next `count` directory syncs fail.
    #[cfg(test)]
    pub(crate) fn fail_dir_syncs(&mut self, count: u32) {
        self.faults.dir_syncs = count;
    }

    /// Whether records were written but not yet fsynced.
    pub fn has_unsynced_data(&self) -> bool {
        self.last_appended != self.durable_through
    }

    /// Sequence of the last record known to be on disk.
    pub fn durable_through(&self) -> Option<SequenceNumber> {
        self.durable_through
    }

    /// Sequence of the last record written.
    pub fn last_appended(&self) -> Option<SequenceNumber> {
        self.last_appended
    }

    /// Durability mode of this writer.
    pub fn durability(&self) -> DurabilityMode {
        self.config.durability
    }

    /// Get the current segment number (0 before the first segment exists).
    pub fn current_segment(&self) -> u64 {
        self.current_segment_number
    }

    /// Get the current segment size in bytes.
    pub fn current_segment_size(&self) -> u64 {
        self.segment.as_ref().map(WalSegment::size).unwrap_or(0)
    }

    /// Get a snapshot of cumulative WAL counters.
    pub fn counters(&self) -> WalCounters {
        self.counters.clone()
    }

    /// Get the WAL directory path.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Find the latest segment number in the WAL directory.
    fn find_latest_segment(dir: &Path) -> std::io::Result<Option<u64>> {
        let mut latest = None;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let number = entry
                .file_name()
                .to_str()
                .and_then(WalSegment::parse_segment_number);
            latest = latest.max(number);
        }
        Ok(latest)
    }

    /// Close the writer, ensuring all data is flushed.
    pub fn close(mut self) -> std::io::Result<()> {
        self.flush()?;
        if let Some(ref mut segment) = self.segment {
            segment.close()?;
        }
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if self.has_unsynced_data() {
            if let Some(ref mut segment) = self.segment {
                let _ = segment.sync();
            }
        }
    }
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("wal_dir", &self.wal_dir)
            .field("segment", &self.current_segment_number)
            .field("last_appended", &self.last_appended)
            .field("durable_through", &self.durable_through)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader::WalReader;
    use prevail_core::Timestamp;
    use tempfile::tempdir;

    fn make_writer(dir: &Path, config: WalConfig, last: Option<u64>) -> WalWriter {
        WalWriter::open(dir, config, last).unwrap()
    }

    fn make_record(sequence: u64) -> WalRecord {
        WalRecord::new(sequence, Timestamp::from_secs(sequence), vec![1, 2, 3])
    }

    fn relaxed() -> WalConfig {
        WalConfig::for_testing().with_durability(DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 10_000,
        })
    }

    #[test]
    fn test_no_segment_until_first_append() {
        let dir = tempdir().unwrap();
        let writer = make_writer(dir.path(), WalConfig::for_testing(), None);

        assert_eq!(writer.current_segment(), 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_first_append_creates_segment_with_base() {
        let dir = tempdir().unwrap();
        let mut writer = make_writer(dir.path(), WalConfig::for_testing(), None);
        writer.append(&make_record(7)).unwrap();

        assert!(WalSegment::segment_path(dir.path(), 1).exists());
        let segment = WalSegment::open_read(dir.path(), 1).unwrap();
        assert_eq!(segment.base_sequence(), 7);
    }

    #[test]
    fn test_always_mode_is_durable_immediately() {
        let dir = tempdir().unwrap();
        let mut writer = make_writer(dir.path(), WalConfig::for_testing(), None);

        writer.append(&make_record(1)).unwrap();
        assert_eq!(writer.durable_through(), Some(1));
        assert!(!writer.has_unsynced_data());
        assert_eq!(writer.counters().sync_calls, 1);
    }

    #[test]
    fn test_standard_mode_defers_sync() {
        let dir = tempdir().unwrap();
        let mut writer = make_writer(dir.path(), relaxed(), None);

        writer.append(&make_record(1)).unwrap();
        writer.append(&make_record(2)).unwrap();
        assert_eq!(writer.last_appended(), Some(2));
        assert_eq!(writer.durable_through(), None);
        assert!(!writer.sync_if_overdue().unwrap());

        writer.flush().unwrap();
        assert_eq!(writer.durable_through(), Some(2));
    }

    #[test]
    fn test_standard_mode_batch_threshold() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing().with_durability(DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 3,
        });
        let mut writer = make_writer(dir.path(), config, None);

        for seq in 1..=4 {
            writer.append(&make_record(seq)).unwrap();
        }
        assert_eq!(writer.durable_through(), Some(3));
    }

    #[test]
    fn test_sync_if_overdue_zero_interval() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing().with_durability(DurabilityMode::Standard {
            interval_ms: 0,
            batch_size: 10_000,
        });
        let mut writer = make_writer(dir.path(), config, None);

        // zero interval syncs on append
        writer.append(&make_record(1)).unwrap();
        assert_eq!(writer.durable_through(), Some(1));
        assert!(!writer.sync_if_overdue().unwrap());
    }

    #[test]
    fn test_segment_rotation() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new()
            .with_segment_size(1024)
            .with_buffered_sync_bytes(512);
        let mut writer = make_writer(dir.path(), config, None);

        for seq in 1..=20 {
            writer
                .append(&WalRecord::new(seq, Timestamp::EPOCH, vec![0; 100]))
                .unwrap();
        }

        assert!(writer.current_segment() > 1, "should have rotated");
        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.segments.len() as u64, writer.current_segment());
        assert_eq!(scan.first_sequence(), Some(1));
        assert_eq!(scan.next_sequence(), Some(21));
    }

    #[test]
    fn test_oversized_record_gets_own_segment() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new()
            .with_segment_size(1024)
            .with_buffered_sync_bytes(512);
        let mut writer = make_writer(dir.path(), config, None);

        writer
            .append(&WalRecord::new(1, Timestamp::EPOCH, vec![0; 4096]))
            .unwrap();
        writer
            .append(&WalRecord::new(2, Timestamp::EPOCH, vec![0; 8]))
            .unwrap();

        assert_eq!(writer.current_segment(), 2);
        assert_eq!(WalReader::new(dir.path()).scan().unwrap().record_count(), 2);
    }

    #[test]
    fn test_resume_existing_segment() {
        let dir = tempdir().unwrap();
        {
            let mut writer = make_writer(dir.path(), WalConfig::for_testing(), None);
            writer.append(&make_record(1)).unwrap();
        }

        let mut writer = make_writer(dir.path(), WalConfig::for_testing(), Some(1));
        assert_eq!(writer.current_segment(), 1);
        assert_eq!(writer.durable_through(), Some(1));
        writer.append(&make_record(2)).unwrap();
        writer.close().unwrap();

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.segments.len(), 1);
        assert_eq!(scan.next_sequence(), Some(3));
    }

    #[test]
    fn test_failed_sync_rolls_back_record() {
        let dir = tempdir().unwrap();
        let mut writer = make_writer(dir.path(), WalConfig::for_testing(), None);
        writer.append(&make_record(1)).unwrap();
        let size_before = writer.current_segment_size();

        writer.fail_segment_syncs(1);
        assert!(writer.append(&make_record(2)).is_err());
        assert_eq!(writer.current_segment_size(), size_before);
        assert_eq!(writer.last_appended(), Some(1));
        assert_eq!(writer.durable_through(), Some(1));
        assert_eq!(writer.counters().wal_appends, 1);

        // The rejected sequence is free to be written again
        writer.append(&make_record(2)).unwrap();
        writer.append(&make_record(3)).unwrap();

        // scan rejects duplicate or skipped sequences
        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.record_count(), 3);
        assert_eq!(scan.next_sequence(), Some(4));
    }

    #[test]
    fn test_failed_sync_in_standard_batch_rolls_back_only_the_trigger() {
        let dir = tempdir().unwrap();
        let config = WalConfig::for_testing().with_durability(DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 2,
        });
        let mut writer = make_writer(dir.path(), config, None);
        writer.append(&make_record(1)).unwrap();

        writer.fail_segment_syncs(1);
        assert!(writer.append(&make_record(2)).is_err());
        assert_eq!(writer.last_appended(), Some(1));
        assert!(writer.has_unsynced_data());

        writer.append(&make_record(2)).unwrap();
        assert_eq!(writer.durable_through(), Some(2));
        assert_eq!(WalReader::new(dir.path()).scan().unwrap().next_sequence(), Some(3));
    }

    #[test]
    fn test_failed_dir_sync_keeps_new_segment() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new()
            .with_segment_size(1024)
            .with_buffered_sync_bytes(512);
        let mut writer = make_writer(dir.path(), config, None);
        writer
            .append(&WalRecord::new(1, Timestamp::EPOCH, vec![0; 600]))
            .unwrap();
        assert_eq!(writer.current_segment(), 1);

        writer.fail_dir_syncs(1);
        let second = WalRecord::new(2, Timestamp::EPOCH, vec![0; 600]);
        assert!(writer.append(&second).is_err());
        assert_eq!(writer.current_segment(), 2);

        // Retrying reuses segment 2 rather than trying to create it again
        writer.append(&second).unwrap();
        writer
            .append(&WalRecord::new(3, Timestamp::EPOCH, vec![0; 600]))
            .unwrap();
        assert_eq!(writer.current_segment(), 3);

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.segments.len(), 3);
        assert_eq!(scan.first_sequence(), Some(1));
        assert_eq!(scan.next_sequence(), Some(4));
    }

    #[test]
    fn test_drop_syncs_pending_data() {
        let dir = tempdir().unwrap();
        {
            let mut writer = make_writer(dir.path(), relaxed(), None);
            writer.append(&make_record(1)).unwrap();
        }

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.record_count(), 1);
    }
}
