//! Physical memory access over raw memory images
use crate::error::AnalysisError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Random-access, read-only view of a physical memory image.
///
/// Byte offset in the image *is* the physical address. Reads take `&self`
/// and carry no cursor, so an image can be shared freely between walkers.
pub trait PhysicalMemory: Send + Sync {
    /// Size of the image in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Fails with [`AnalysisError::OutOfRange`] when any part of the range
    /// lies outside the image; nothing is read in that case.
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError>;

    /// Read exactly `length` bytes at `offset`.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, AnalysisError> {
        let mut buf = vec![0u8; length];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    fn read_u8(&self, offset: u64) -> Result<u8, AnalysisError> {
        let mut buf = [0u8; 1];
        self.read_into(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&self, offset: u64) -> Result<u32, AnalysisError> {
        let mut buf = [0u8; 4];
        self.read_into(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, offset: u64) -> Result<u64, AnalysisError> {
        let mut buf = [0u8; 8];
        self.read_into(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Bounds-checked copy shared by the slice-backed images.
fn read_slice(bytes: &[u8], offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError> {
    let size = bytes.len() as u64;
    let length = buf.len();
    let out_of_range = || AnalysisError::OutOfRange {
        offset,
        length,
        size,
    };

    let end = offset
        .checked_add(length as u64)
        .ok_or_else(out_of_range)?;
    if end > size {
        return Err(out_of_range());
    }

    buf.copy_from_slice(&bytes[offset as usize..end as usize]);
    Ok(())
}

/// Memory mapped file handle
pub struct MemoryMap {
    _file: File,
    mapped: Mmap,
}

impl MemoryMap {
    /// Create a new memory map from a file path
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, AnalysisError> {
        let file = File::open(file_path)?;
        // The image is opened read-only and never written through the map.
        let mapped = unsafe { Mmap::map(&file)? };
        Ok(MemoryMap {
            _file: file,
            mapped,
        })
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }
}

impl PhysicalMemory for MemoryMap {
    fn size(&self) -> u64 {
        self.mapped.len() as u64
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError> {
        read_slice(&self.mapped, offset, buf)
    }
}

/// Image held in an owned buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    bytes: Vec<u8>,
}

impl MemoryBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryBuffer { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for MemoryBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        MemoryBuffer::new(bytes)
    }
}

impl PhysicalMemory for MemoryBuffer {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<(), AnalysisError> {
        read_slice(&self.bytes, offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> MemoryBuffer {
        let mut bytes = vec![0u8; 64];
        bytes[8..16].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        bytes[16..20].copy_from_slice(&0xcafe_babeu32.to_le_bytes());
        bytes[20] = 0x7f;
        MemoryBuffer::new(bytes)
    }

    #[test]
    fn test_typed_reads_are_little_endian() {
        let image = sample();
        assert_eq!(image.read_u64(8).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(image.read_u32(16).unwrap(), 0xcafe_babe);
        assert_eq!(image.read_u8(20).unwrap(), 0x7f);
    }

    #[test]
    fn test_reads_are_independent() {
        let image = sample();
        let first = image.read(8, 4).unwrap();
        let _ = image.read(40, 8).unwrap();
        assert_eq!(image.read(8, 4).unwrap(), first);
    }

    #[test]
    fn test_read_at_end_of_image() {
        let image = sample();
        assert_eq!(image.read(56, 8).unwrap().len(), 8);
        assert!(image.read(64, 0).is_ok());
    }

    #[test]
    fn test_read_past_end_fails() {
        let image = sample();
        match image.read(60, 8) {
            Err(AnalysisError::OutOfRange {
                offset,
                length,
                size,
            }) => {
                assert_eq!(offset, 60);
                assert_eq!(length, 8);
                assert_eq!(size, 64);
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_offset_overflow_is_out_of_range() {
        let image = sample();
        assert!(matches!(
            image.read_u64(u64::MAX - 2),
            Err(AnalysisError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_memory_map_reads_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(&[0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9])?;
        temp_file.flush()?;

        let map = MemoryMap::new(temp_file.path())?;
        assert_eq!(map.size(), 10);
        assert_eq!(map.read(6, 4)?, vec![6, 7, 8, 9]);
        assert!(map.read(7, 4).is_err());
        Ok(())
    }
}
