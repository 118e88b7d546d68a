//! WAL reader for open-time scanning and replay.
//!
//! The reader never skips a damaged record. The only damage it tolerates is
//! a torn tail in the last segment: a record the writer had not finished
//! when the process died. Everything else is reported as corruption.

use std::path::{Path, PathBuf};

use prevail_core::SequenceNumber;

use super::format::{WalRecord, WalRecordError, WalSegment, SEGMENT_HEADER_SIZE};

/// Reason why record reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// Successfully read all records to end of data
    EndOfData,
    /// Partial record at end of segment (expected after crash)
    PartialRecord,
    /// Zero-filled bytes at end of segment (expected after crash on
    /// filesystems that extend the file before the data lands)
    ZeroFill,
}

/// Records read from one segment.
#[derive(Debug)]
pub struct SegmentRead {
    /// Segment number
    pub segment_number: u64,
    /// Sequence number of the first record of the segment
    pub base_sequence: SequenceNumber,
    /// Valid records in order
    pub records: Vec<WalRecord>,
    /// Position where valid data ends
    pub valid_end: u64,
    /// File size as found
    pub file_size: u64,
    /// Why reading stopped
    pub stop_reason: ReadStopReason,
}

impl SegmentRead {
    /// Sequence number the record after this segment's last must carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.base_sequence + self.records.len() as u64
    }
}

/// Summary of one segment found by [`WalReader::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    /// Segment number
    pub segment_number: u64,
    /// Sequence number of the first record of the segment
    pub base_sequence: SequenceNumber,
    /// Number of valid records
    pub record_count: u64,
}

impl SegmentSummary {
    /// Sequence number the record after this segment's last must carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.base_sequence + self.record_count
    }
}

/// Result of scanning all WAL segments of a directory.
#[derive(Debug, Default)]
pub struct WalScan {
    /// Readable segments in order
    pub segments: Vec<SegmentSummary>,

    /// Torn tail to cut off the last segment, if any
    pub truncate_info: Option<TruncateInfo>,

    /// Last segment whose header never finished being written, if any
    pub incomplete_segment: Option<u64>,
}

impl WalScan {
    /// Sequence number the next appended record gets, `None` for an empty log.
    pub fn next_sequence(&self) -> Option<SequenceNumber> {
        self.segments.last().map(SegmentSummary::next_sequence)
    }

    /// Sequence number of the oldest retained record.
    ///
    /// Equals `next_sequence()` when segments exist but hold no records.
    pub fn first_sequence(&self) -> Option<SequenceNumber> {
        self.segments.first().map(|s| s.base_sequence)
    }

    /// Total number of records across all segments.
    pub fn record_count(&self) -> u64 {
        self.segments.iter().map(|s| s.record_count).sum()
    }
}

/// Information about a segment that needs truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncateInfo {
    /// Segment number
    pub segment_number: u64,

    /// Position where valid data ends
    pub valid_end: u64,

    /// Original file size
    pub original_size: u64,
}

impl TruncateInfo {
    /// Get the number of bytes that need to be truncated.
    pub fn bytes_to_truncate(&self) -> u64 {
        self.original_size - self.valid_end
    }
}

/// WAL reader for iterating over records in segments.
#[derive(Debug, Clone)]
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    /// Create a reader over the segments in `wal_dir`.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        WalReader {
            wal_dir: wal_dir.into(),
        }
    }

    /// Directory the reader scans.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// List all segment numbers in the WAL directory, ascending.
    pub fn list_segments(&self) -> Result<Vec<u64>, WalReaderError> {
        let entries = std::fs::read_dir(&self.wal_dir).map_err(|e| self.io_error(e))?;

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.io_error(e))?;
            let name = entry.file_name();
            if let Some(number) = name.to_str().and_then(WalSegment::parse_segment_number) {
                segments.push(number);
            }
        }

        segments.sort_unstable();
        Ok(segments)
    }

    /// Read all records from a single segment.
    ///
    /// A partial or zero-filled tail is accepted only when `is_last` is set;
    /// in any other segment it means data was lost and is reported as
    /// corruption. Record sequence numbers must count up from the segment's
    /// base sequence.
    pub fn read_segment(
        &self,
        segment_number: u64,
        is_last: bool,
    ) -> Result<SegmentRead, WalReaderError> {
        let path = WalSegment::segment_path(&self.wal_dir, segment_number);
        let mut segment = WalSegment::open_read(&self.wal_dir, segment_number).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData
                || e.kind() == std::io::ErrorKind::UnexpectedEof
            {
                WalReaderError::InvalidHeader {
                    segment: segment_number,
                    detail: e.to_string(),
                }
            } else {
                WalReaderError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        let buffer = segment.read_body().map_err(|e| WalReaderError::Io {
            path: path.clone(),
            source: e,
        })?;

        let base_sequence = segment.base_sequence();
        let header_size = SEGMENT_HEADER_SIZE as u64;
        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut stop_reason = ReadStopReason::EndOfData;

        while offset < buffer.len() {
            let remaining = &buffer[offset..];
            match WalRecord::from_bytes(remaining) {
                Ok((record, consumed)) => {
                    let expected = base_sequence + records.len() as u64;
                    if record.sequence != expected {
                        return Err(WalReaderError::OutOfSequence {
                            segment: segment_number,
                            expected,
                            found: record.sequence,
                        });
                    }
                    records.push(record);
                    offset += consumed;
                }
                Err(e) => {
                    let torn = match e {
                        WalRecordError::InsufficientData => Some(ReadStopReason::PartialRecord),
                        _ if remaining.iter().all(|b| *b == 0) => Some(ReadStopReason::ZeroFill),
                        _ => None,
                    };
                    match torn {
                        Some(reason) if is_last => {
                            stop_reason = reason;
                            break;
                        }
                        _ => {
                            return Err(WalReaderError::CorruptRecord {
                                segment: segment_number,
                                offset: header_size + offset as u64,
                                detail: e.to_string(),
                            })
                        }
                    }
                }
            }
        }

        Ok(SegmentRead {
            segment_number,
            base_sequence,
            records,
            valid_end: header_size + offset as u64,
            file_size: header_size + buffer.len() as u64,
            stop_reason,
        })
    }

    /// Scan every segment, validating headers and sequence contiguity.
    ///
    /// Segments must continue exactly where the previous one ended. Older
    /// segments may have been removed, so the first segment may start at
    /// any sequence.
    pub fn scan(&self) -> Result<WalScan, WalReaderError> {
        let mut numbers = self.list_segments()?;
        let mut scan = WalScan::default();

        if let Some(&last) = numbers.last() {
            let path = WalSegment::segment_path(&self.wal_dir, last);
            let len = std::fs::metadata(&path)
                .map_err(|e| WalReaderError::Io { path, source: e })?
                .len();
            if len < SEGMENT_HEADER_SIZE as u64 {
                scan.incomplete_segment = Some(last);
                numbers.pop();
            }
        }

        let count = numbers.len();
        for (idx, number) in numbers.into_iter().enumerate() {
            let read = self.read_segment(number, idx + 1 == count)?;

            if let Some(previous) = scan.segments.last() {
                if read.base_sequence != previous.next_sequence() {
                    return Err(WalReaderError::OutOfSequence {
                        segment: number,
                        expected: previous.next_sequence(),
                        found: read.base_sequence,
                    });
                }
            }

            if read.valid_end < read.file_size {
                scan.truncate_info = Some(TruncateInfo {
                    segment_number: number,
                    valid_end: read.valid_end,
                    original_size: read.file_size,
                });
            }

            scan.segments.push(SegmentSummary {
                segment_number: number,
                base_sequence: read.base_sequence,
                record_count: read.records.len() as u64,
            });
        }

        Ok(scan)
    }

    fn io_error(&self, source: std::io::Error) -> WalReaderError {
        WalReaderError::Io {
            path: self.wal_dir.clone(),
            source,
        }
    }
}

/// WAL reader errors.
#[derive(Debug, thiserror::Error)]
pub enum WalReaderError {
    /// I/O error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File or directory being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Segment header is unreadable or does not match its file name
    #[error("invalid header in segment {segment}: {detail}")]
    InvalidHeader {
        /// Segment number
        segment: u64,
        /// What was wrong
        detail: String,
    },

    /// A record failed its checksum or could not be parsed
    #[error("corrupt record in segment {segment} at offset {offset}: {detail}")]
    CorruptRecord {
        /// Segment number
        segment: u64,
        /// Byte offset of the record within the segment file
        offset: u64,
        /// What was wrong
        detail: String,
    },

    /// A record or segment does not continue the sequence
    #[error("segment {segment} out of sequence: expected {expected}, found {found}")]
    OutOfSequence {
        /// Segment number
        segment: u64,
        /// Sequence number that should have been there
        expected: SequenceNumber,
        /// Sequence number that was there
        found: SequenceNumber,
    },
}

impl WalReaderError {
    /// Segment the error was found in, if it concerns stored data.
    pub fn segment(&self) -> Option<u64> {
        match self {
            WalReaderError::Io { .. } => None,
            WalReaderError::InvalidHeader { segment, .. }
            | WalReaderError::CorruptRecord { segment, .. }
            | WalReaderError::OutOfSequence { segment, .. } => Some(*segment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prevail_core::Timestamp;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_segment(dir: &Path, number: u64, base: u64, sequences: &[u64]) -> WalSegment {
        let mut segment = WalSegment::create(dir, number, base).unwrap();
        for seq in sequences {
            let record = WalRecord::new(*seq, Timestamp::from_secs(*seq), vec![*seq as u8; 4]);
            segment.write(&record.to_bytes()).unwrap();
        }
        segment
    }

    fn append_raw(dir: &Path, number: u64, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(WalSegment::segment_path(dir, number))
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let scan = WalReader::new(dir.path()).scan().unwrap();

        assert!(scan.segments.is_empty());
        assert_eq!(scan.next_sequence(), None);
        assert_eq!(scan.first_sequence(), None);
    }

    #[test]
    fn test_list_ignores_other_files() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 2, 1, &[]);
        write_segment(dir.path(), 1, 1, &[]);
        std::fs::write(dir.path().join("0000000000000000001.snapshot"), b"x").unwrap();
        std::fs::write(dir.path().join("wal-1.seg"), b"x").unwrap();

        assert_eq!(WalReader::new(dir.path()).list_segments().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_scan_across_segments() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 5, &[5, 6, 7]);
        write_segment(dir.path(), 2, 8, &[8, 9]);

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.segments.len(), 2);
        assert_eq!(scan.first_sequence(), Some(5));
        assert_eq!(scan.next_sequence(), Some(10));
        assert_eq!(scan.record_count(), 5);
        assert!(scan.truncate_info.is_none());
    }

    #[test]
    fn test_empty_last_segment_fixes_next_sequence() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 12, &[]);

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.next_sequence(), Some(12));
        assert_eq!(scan.record_count(), 0);
    }

    #[test]
    fn test_torn_tail_in_last_segment() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1, 2]);
        let partial = WalRecord::new(3, Timestamp::EPOCH, vec![3; 16]).to_bytes();
        append_raw(dir.path(), 1, &partial[..partial.len() - 5]);

        let reader = WalReader::new(dir.path());
        let read = reader.read_segment(1, true).unwrap();
        assert_eq!(read.records.len(), 2);
        assert_eq!(read.stop_reason, ReadStopReason::PartialRecord);

        let scan = reader.scan().unwrap();
        assert_eq!(scan.next_sequence(), Some(3));
        let truncate = scan.truncate_info.unwrap();
        assert_eq!(truncate.bytes_to_truncate(), partial.len() as u64 - 5);
    }

    #[test]
    fn test_zero_filled_tail_is_torn() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1]);
        append_raw(dir.path(), 1, &[0u8; 40]);

        let read = WalReader::new(dir.path()).read_segment(1, true).unwrap();
        assert_eq!(read.records.len(), 1);
        assert_eq!(read.stop_reason, ReadStopReason::ZeroFill);
    }

    #[test]
    fn test_torn_tail_in_earlier_segment_is_corruption() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1]);
        append_raw(dir.path(), 1, &[9, 0, 0]);
        write_segment(dir.path(), 2, 2, &[2]);

        let err = WalReader::new(dir.path()).scan().unwrap_err();
        assert!(matches!(
            err,
            WalReaderError::CorruptRecord { segment: 1, .. }
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_corruption_even_at_tail() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1, 2]);
        let path = WalSegment::segment_path(dir.path(), 1);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = WalReader::new(dir.path()).scan().unwrap_err();
        assert!(matches!(err, WalReaderError::CorruptRecord { .. }));
        assert_eq!(err.segment(), Some(1));
    }

    #[test]
    fn test_record_sequence_gap_detected() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1, 3]);

        let err = WalReader::new(dir.path()).scan().unwrap_err();
        assert!(matches!(
            err,
            WalReaderError::OutOfSequence {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_segment_sequence_gap_detected() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1, 2]);
        write_segment(dir.path(), 2, 4, &[4]);

        let err = WalReader::new(dir.path()).scan().unwrap_err();
        assert!(matches!(
            err,
            WalReaderError::OutOfSequence {
                segment: 2,
                expected: 3,
                found: 4
            }
        ));
    }

    #[test]
    fn test_incomplete_header_on_last_segment() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 1, 1, &[1]);
        std::fs::write(WalSegment::segment_path(dir.path(), 2), b"PRV").unwrap();

        let scan = WalReader::new(dir.path()).scan().unwrap();
        assert_eq!(scan.incomplete_segment, Some(2));
        assert_eq!(scan.next_sequence(), Some(2));
    }

    #[test]
    fn test_bad_magic_is_invalid_header() {
        let dir = tempdir().unwrap();
        std::fs::write(WalSegment::segment_path(dir.path(), 1), [7u8; 64]).unwrap();

        let err = WalReader::new(dir.path()).scan().unwrap_err();
        assert!(matches!(err, WalReaderError::InvalidHeader { segment: 1, .. }));
    }
}
