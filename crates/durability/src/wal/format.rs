//! WAL segment file and record format.
//!
//! WAL segments are named `wal-NNNNNN.seg` where `NNNNNN` is a zero-padded segment number.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (32 bytes)          │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ Record 2                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//!
//! Payload:
//! ┌──────────────┬──────────────────┬──────────────────────────────────────┐
//! │ Sequence (8) │ Exec Time (8)    │ Transaction (codec-encoded)          │
//! └──────────────┴──────────────────┴──────────────────────────────────────┘
//! ```

use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use prevail_core::{SequenceNumber, Timestamp};

/// Magic bytes identifying a WAL segment file: "PRVL"
pub const SEGMENT_MAGIC: [u8; 4] = *b"PRVL";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Current WAL record format version
pub const WAL_RECORD_FORMAT_VERSION: u8 = 1;

/// Bytes in a record besides the transaction: version + sequence + time + CRC
const RECORD_OVERHEAD: usize = 1 + 8 + 8 + 4;

/// WAL segment header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "PRVL"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Segment number (monotonically increasing)
    pub segment_number: u64,

    /// Sequence number of the first record this segment holds or will hold
    pub base_sequence: SequenceNumber,
}

impl SegmentHeader {
    /// Create a new segment header.
    pub fn new(segment_number: u64, base_sequence: SequenceNumber) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            base_sequence,
        }
    }

    /// Serialize header to bytes. The last 8 bytes are reserved (zero).
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.base_sequence.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        SegmentHeader {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            format_version: u32::from_le_bytes(le_array(&bytes[4..8])),
            segment_number: u64::from_le_bytes(le_array(&bytes[8..16])),
            base_sequence: u64::from_le_bytes(le_array(&bytes[16..24])),
        }
    }

    /// Validate the header has correct magic bytes and a known version.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.format_version == SEGMENT_FORMAT_VERSION
    }
}

/// WAL segment file handle.
///
/// A segment is a single WAL file containing multiple records.
/// Only the active segment is writable; closed segments are immutable.
pub struct WalSegment {
    file: File,
    header: SegmentHeader,
    /// Current write position (bytes from start)
    write_position: u64,
    path: PathBuf,
    closed: bool,
}

impl WalSegment {
    /// Create a new WAL segment and write its header.
    pub fn create(
        dir: &Path,
        segment_number: u64,
        base_sequence: SequenceNumber,
    ) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;

        let header = SegmentHeader::new(segment_number, base_sequence);
        file.write_all(&header.to_bytes())?;

        Ok(WalSegment {
            file,
            header,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: false,
        })
    }

    /// Open an existing WAL segment for reading.
    pub fn open_read(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let file = OpenOptions::new().read(true).open(&path)?;
        Self::from_file(file, path, segment_number, true)
    }

    /// Open an existing WAL segment for appending.
    pub fn open_append(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Self::from_file(file, path, segment_number, false)
    }

    fn from_file(
        mut file: File,
        path: PathBuf,
        segment_number: u64,
        closed: bool,
    ) -> std::io::Result<Self> {
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SegmentHeader::from_bytes(&header_bytes);

        if !header.is_valid() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid segment header in {}", path.display()),
            ));
        }

        if header.segment_number != segment_number {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Segment number mismatch: expected {}, got {}",
                    segment_number, header.segment_number
                ),
            ));
        }

        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(WalSegment {
            file,
            header,
            write_position,
            path,
            closed,
        })
    }

    /// Generate segment file path.
    ///
    /// Format: `wal-NNNNNN.seg` where NNNNNN is zero-padded segment number.
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("wal-{:06}.seg", segment_number))
    }

    /// Parse a segment number from a file name.
    pub fn parse_segment_number(file_name: &str) -> Option<u64> {
        let digits = file_name.strip_prefix("wal-")?.strip_suffix(".seg")?;
        if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Get segment number.
    pub fn segment_number(&self) -> u64 {
        self.header.segment_number
    }

    /// Sequence number of the first record in this segment.
    pub fn base_sequence(&self) -> SequenceNumber {
        self.header.base_sequence
    }

    /// Get current segment size in bytes.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes to segment and update write position.
    ///
    /// Returns an error if the segment is closed.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Cannot write to closed segment",
            ));
        }

        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// Sync segment data to disk.
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_data()
    }

    /// Mark segment as closed (immutable). Syncs data to disk first.
    pub fn close(&mut self) -> std::io::Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }

    /// Read everything after the header.
    pub fn read_body(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        self.file.read_to_end(&mut buffer)?;
        self.file.seek(SeekFrom::Start(self.write_position))?;
        Ok(buffer)
    }

    /// Truncate segment at the given position.
    ///
    /// Used when opening the log to remove a torn record.
    pub fn truncate(&mut self, position: u64) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Cannot truncate closed segment",
            ));
        }

        self.file.set_len(position)?;
        self.file.sync_all()?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// One transaction as stored in the WAL.
///
/// Each record is self-delimiting with a length prefix and CRC32 checksum.
/// Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Sequence number of the entry
    pub sequence: SequenceNumber,

    /// Execution time of the transaction
    pub execution_time: Timestamp,

    /// Codec-encoded transaction
    pub transaction: Vec<u8>,
}

impl WalRecord {
    /// Create a new WAL record.
    pub fn new(sequence: SequenceNumber, execution_time: Timestamp, transaction: Vec<u8>) -> Self {
        WalRecord {
            sequence,
            execution_time,
            transaction,
        }
    }

    /// Serialize record to bytes (for writing to WAL).
    ///
    /// Format: length (4) + format_version (1) + payload + crc32 (4)
    ///
    /// The length field contains the size of (format_version + payload + crc32).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(RECORD_OVERHEAD - 4 + self.transaction.len());
        payload.push(WAL_RECORD_FORMAT_VERSION);
        payload.extend_from_slice(&self.sequence.to_le_bytes());
        payload.extend_from_slice(&self.execution_time.as_micros().to_le_bytes());
        payload.extend_from_slice(&self.transaction);

        let crc = compute_crc(&payload);

        let total_len = payload.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        record.extend_from_slice(&(total_len as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record.extend_from_slice(&crc.to_le_bytes());

        record
    }

    /// Deserialize record from bytes.
    ///
    /// Returns (record, bytes_consumed) on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalRecordError> {
        if bytes.len() < 4 {
            return Err(WalRecordError::InsufficientData);
        }

        let length = u32::from_le_bytes(le_array(&bytes[0..4])) as usize;

        if length < RECORD_OVERHEAD {
            return Err(WalRecordError::InvalidFormat);
        }

        if bytes.len() < 4 + length {
            return Err(WalRecordError::InsufficientData);
        }

        let body = &bytes[4..4 + length];
        let payload = &body[..length - 4];
        let stored_crc = u32::from_le_bytes(le_array(&body[length - 4..]));

        let computed_crc = compute_crc(payload);
        if computed_crc != stored_crc {
            return Err(WalRecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let format_version = payload[0];
        if format_version != WAL_RECORD_FORMAT_VERSION {
            return Err(WalRecordError::UnsupportedVersion(format_version));
        }

        let sequence = u64::from_le_bytes(le_array(&payload[1..9]));
        let execution_time = Timestamp::from_micros(u64::from_le_bytes(le_array(&payload[9..17])));
        let transaction = payload[17..].to_vec();

        Ok((
            WalRecord {
                sequence,
                execution_time,
                transaction,
            },
            4 + length,
        ))
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Copy an exactly-sized slice into a fixed array. Callers slice to `N`.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// WAL record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalRecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Record format is invalid
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_segment_header_roundtrip() {
        let header = SegmentHeader::new(12345, 678);

        let parsed = SegmentHeader::from_bytes(&header.to_bytes());

        assert_eq!(parsed, header);
        assert!(parsed.is_valid());
        assert_eq!(&header.to_bytes()[24..], &[0u8; 8]);
    }

    #[test]
    fn test_segment_header_invalid_magic() {
        let mut header = SegmentHeader::new(1, 1);
        header.magic = *b"XXXX";
        assert!(!header.is_valid());
    }

    #[test]
    fn test_segment_path_format() {
        let dir = Path::new("/tmp/wal");
        assert_eq!(
            WalSegment::segment_path(dir, 1),
            PathBuf::from("/tmp/wal/wal-000001.seg")
        );
        assert_eq!(WalSegment::parse_segment_number("wal-000042.seg"), Some(42));
        assert_eq!(
            WalSegment::parse_segment_number("wal-1234567.seg"),
            Some(1_234_567)
        );
        assert_eq!(WalSegment::parse_segment_number("wal-42.seg"), None);
        assert_eq!(WalSegment::parse_segment_number("wal-00004x.seg"), None);
        assert_eq!(
            WalSegment::parse_segment_number("0000000000000000042.snapshot"),
            None
        );
    }

    #[test]
    fn test_segment_create_and_reopen() {
        let dir = tempdir().unwrap();

        let mut segment = WalSegment::create(dir.path(), 3, 100).unwrap();
        segment.write(b"abc").unwrap();
        segment.close().unwrap();
        assert!(segment.write(b"more").is_err());

        let mut reopened = WalSegment::open_read(dir.path(), 3).unwrap();
        assert_eq!(reopened.segment_number(), 3);
        assert_eq!(reopened.base_sequence(), 100);
        assert_eq!(reopened.size(), SEGMENT_HEADER_SIZE as u64 + 3);
        assert_eq!(reopened.read_body().unwrap(), b"abc");
    }

    #[test]
    fn test_segment_number_mismatch_rejected() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 1, 1).unwrap();
        std::fs::rename(
            WalSegment::segment_path(dir.path(), 1),
            WalSegment::segment_path(dir.path(), 2),
        )
        .unwrap();

        assert!(WalSegment::open_read(dir.path(), 2).is_err());
    }

    #[test]
    fn test_segment_truncate() {
        let dir = tempdir().unwrap();
        let mut segment = WalSegment::create(dir.path(), 1, 1).unwrap();
        segment.write(&[7u8; 20]).unwrap();
        segment.truncate(SEGMENT_HEADER_SIZE as u64 + 5).unwrap();
        segment.write(&[9u8; 2]).unwrap();

        let mut reopened = WalSegment::open_read(dir.path(), 1).unwrap();
        assert_eq!(reopened.read_body().unwrap(), vec![7, 7, 7, 7, 7, 9, 9]);
    }

    #[test]
    fn test_record_roundtrip() {
        let record = WalRecord::new(42, Timestamp::from_secs(9), vec![1, 2, 3, 4]);
        let bytes = record.to_bytes();

        let (parsed, consumed) = WalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_record_empty_transaction() {
        let record = WalRecord::new(1, Timestamp::EPOCH, Vec::new());
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 4 + RECORD_OVERHEAD);
        assert_eq!(WalRecord::from_bytes(&bytes).unwrap().0, record);
    }

    #[test]
    fn test_record_consecutive_parse() {
        let mut bytes = WalRecord::new(1, Timestamp::EPOCH, vec![1]).to_bytes();
        bytes.extend(WalRecord::new(2, Timestamp::EPOCH, vec![2, 2]).to_bytes());

        let (first, consumed) = WalRecord::from_bytes(&bytes).unwrap();
        let (second, _) = WalRecord::from_bytes(&bytes[consumed..]).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.transaction, vec![2, 2]);
    }

    #[test]
    fn test_record_truncated() {
        let bytes = WalRecord::new(1, Timestamp::EPOCH, vec![0; 32]).to_bytes();
        for cut in [0, 3, 4, 20, bytes.len() - 1] {
            assert_eq!(
                WalRecord::from_bytes(&bytes[..cut]),
                Err(WalRecordError::InsufficientData),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_record_checksum_mismatch() {
        let mut bytes = WalRecord::new(1, Timestamp::EPOCH, vec![5; 8]).to_bytes();
        bytes[10] ^= 0xFF;

        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_record_zero_length_is_invalid() {
        assert_eq!(
            WalRecord::from_bytes(&[0u8; 64]),
            Err(WalRecordError::InvalidFormat)
        );
    }
}
