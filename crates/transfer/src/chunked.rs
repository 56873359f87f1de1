use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Block size used when fingerprinting a whole source.
const FINGERPRINT_BLOCK: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 over an entire source and returns the hex-encoded digest.
pub fn fingerprint_source(source: &dyn ChunkSource) -> Result<String, TransferError> {
    let len = source.len();
    let mut hasher = Sha256::new();
    let mut offset = 0u64;
    while offset < len {
        let n = (len - offset).min(FINGERPRINT_BLOCK as u64) as usize;
        let block = source.read_range(offset, n)?;
        hasher.update(&block);
        offset += n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Chunk plan
// ---------------------------------------------------------------------------

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

impl ChunkDescriptor {
    /// Byte range `[offset, offset + size)` covered by this chunk.
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }
}

/// Deterministic partition of `[0, file_size)` into fixed-size chunks.
///
/// Every chunk is `chunk_size` bytes except the last, which holds the
/// remainder and is never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plans chunks for a file of `file_size` bytes.
    ///
    /// Rejects empty files, files above `max_file_size` and a zero chunk
    /// size. No I/O is performed.
    pub fn new(file_size: u64, chunk_size: u64, max_file_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        if file_size == 0 {
            return Err(TransferError::EmptyFile);
        }
        if file_size > max_file_size {
            return Err(TransferError::FileTooLarge {
                size: file_size,
                max: max_file_size,
            });
        }
        let total = file_size.div_ceil(chunk_size);
        let total_chunks =
            u32::try_from(total).map_err(|_| TransferError::InvalidChunkSize(chunk_size))?;
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Returns the descriptor for `index`, or `None` past the last chunk.
    pub fn descriptor(&self, index: u32) -> Option<ChunkDescriptor> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = u64::from(index) * self.chunk_size;
        let size = self.chunk_size.min(self.file_size - offset);
        Some(ChunkDescriptor {
            index,
            offset,
            size,
        })
    }

    /// Size in bytes of chunk `index` (0 when out of range).
    pub fn chunk_len(&self, index: u32) -> u64 {
        self.descriptor(index).map_or(0, |d| d.size)
    }

    /// All chunks in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = ChunkDescriptor> + '_ {
        (0..self.total_chunks).filter_map(|i| self.descriptor(i))
    }
}

// ---------------------------------------------------------------------------
// Chunk sources
// ---------------------------------------------------------------------------

/// A random-access byte source that chunks are read from.
pub trait ChunkSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Reads exactly `size` bytes starting at `offset`.
    fn read_range(&self, offset: u64, size: usize) -> Result<Vec<u8>, TransferError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file on disk read with seek + read.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    len: u64,
}

impl FileSource {
    /// Opens `path` for chunked reading.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, size: usize) -> Result<Vec<u8>, TransferError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// An in-memory source.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ChunkSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, size: usize) -> Result<Vec<u8>, TransferError> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(size);
        match self.data.get(start..end) {
            Some(slice) => Ok(slice.to_vec()),
            None => Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} past end of {} bytes", self.data.len()),
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk payloads
// ---------------------------------------------------------------------------

/// Chunk bytes plus their SHA-256 checksum, ready for transmission.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub descriptor: ChunkDescriptor,
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Reads the bytes described by `descriptor` and checksums them.
pub fn read_chunk(
    source: &dyn ChunkSource,
    descriptor: ChunkDescriptor,
) -> Result<Chunk, TransferError> {
    let data = source.read_range(descriptor.offset, descriptor.size as usize)?;
    let checksum = checksum_bytes(&data);
    Ok(Chunk {
        descriptor,
        data,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MAX: u64 = u64::MAX;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    /// Asserts the plan covers `[0, file_size)` with no gaps or overlaps.
    fn assert_covers(plan: &ChunkPlan) {
        let mut expected_offset = 0;
        for (i, d) in plan.iter().enumerate() {
            assert_eq!(d.index as usize, i);
            assert_eq!(d.offset, expected_offset, "gap or overlap at chunk {i}");
            assert!(d.size > 0, "empty chunk {i}");
            assert!(d.size <= plan.chunk_size());
            expected_offset = d.byte_range().end;
        }
        assert_eq!(expected_offset, plan.file_size());
        assert_eq!(plan.iter().count() as u32, plan.total_chunks());
    }

    #[test]
    fn coverage_for_boundary_sizes() {
        let c = 1024;
        for size in [1, c - 1, c, c + 1, 10 * c, 37 * c + 5] {
            let plan = ChunkPlan::new(size, c, MAX).unwrap();
            assert_eq!(plan.total_chunks() as u64, size.div_ceil(c), "size {size}");
            assert_covers(&plan);
        }
    }

    #[test]
    fn zero_length_file_rejected() {
        assert!(matches!(
            ChunkPlan::new(0, 1024, MAX),
            Err(TransferError::EmptyFile)
        ));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkPlan::new(10, 0, MAX),
            Err(TransferError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn oversized_file_rejected() {
        let err = ChunkPlan::new(101, 10, 100).unwrap_err();
        assert!(matches!(
            err,
            TransferError::FileTooLarge { size: 101, max: 100 }
        ));
        assert!(ChunkPlan::new(100, 10, 100).is_ok());
    }

    #[test]
    fn last_chunk_holds_remainder() {
        let plan = ChunkPlan::new(10, 4, MAX).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        let last = plan.descriptor(2).unwrap();
        assert_eq!(last.offset, 8);
        assert_eq!(last.size, 2);
        assert_eq!(plan.chunk_len(0), 4);
        assert!(plan.descriptor(3).is_none());
        assert_eq!(plan.chunk_len(3), 0);
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        let mb = 1024 * 1024;
        let plan = ChunkPlan::new(10 * mb, mb, MAX).unwrap();
        assert_eq!(plan.total_chunks(), 10);
        assert_eq!(plan.descriptor(9).unwrap().size, mb);
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[test]
    fn fingerprint_matches_whole_buffer_checksum() {
        // Larger than one fingerprint block to exercise the loop.
        let data: Vec<u8> = (0..FINGERPRINT_BLOCK * 2 + 17).map(|i| i as u8).collect();
        let source = MemorySource::new(data.clone());
        assert_eq!(fingerprint_source(&source).unwrap(), checksum_bytes(&data));
    }

    #[test]
    fn file_source_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.wav", b"AABBCCDDEE");

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.path(), path.as_path());

        let plan = ChunkPlan::new(source.len(), 4, MAX).unwrap();
        let chunks: Vec<_> = plan
            .iter()
            .map(|d| read_chunk(&source, d).unwrap())
            .collect();
        assert_eq!(chunks[0].data, b"AABB");
        assert_eq!(chunks[1].data, b"CCDD");
        assert_eq!(chunks[2].data, b"EE");
        assert_eq!(chunks[2].checksum, checksum_bytes(b"EE"));

        // Out of order reads work too.
        assert_eq!(read_chunk(&source, plan.descriptor(1).unwrap()).unwrap().data, b"CCDD");
    }

    #[test]
    fn file_source_fingerprint_matches_contents() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "a.mp3", data);
        let source = FileSource::open(&path).unwrap();
        assert_eq!(fingerprint_source(&source).unwrap(), checksum_bytes(data));
    }

    #[test]
    fn memory_source_read_past_end_fails() {
        let source = MemorySource::new(b"abc".to_vec());
        assert!(source.read_range(2, 2).is_err());
        assert_eq!(source.read_range(1, 2).unwrap(), b"bc");
    }
}
