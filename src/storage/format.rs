//! Binary cassette layout

use bytemuck::{Pod, Zeroable};

/// File magic bytes: "PLBK\r\n\x1a\n"
pub const FILE_MAGIC: [u8; 8] = [0x50, 0x4C, 0x42, 0x4B, 0x0D, 0x0A, 0x1A, 0x0A];

/// Current format version
pub const FILE_VERSION: u32 = 1;

/// File header size
pub const HEADER_SIZE: usize = 16;

/// Frame header size
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a single frame may carry
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// File header (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FileHeader {
    /// Magic bytes for file format identification
    pub magic: [u8; 8],

    /// Format version (little-endian on disk)
    pub version: u32,

    /// Reserved for future use
    pub reserved: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), HEADER_SIZE);

/// Header preceding each encoded interaction (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameHeader {
    /// Payload length (little-endian on disk)
    pub length: u32,

    /// CRC32 of the payload (little-endian on disk)
    pub crc: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FrameHeader>(), FRAME_HEADER_SIZE);

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION.to_le(),
            reserved: 0,
        }
    }
}

impl FileHeader {
    /// Format version in native byte order
    #[must_use]
    pub fn version(&self) -> u32 {
        u32::from_le(self.version)
    }
}

impl FrameHeader {
    /// Build a frame header for `payload`
    #[must_use]
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            length: (payload.len() as u32).to_le(),
            crc: crc32fast::hash(payload).to_le(),
        }
    }

    /// Payload length in native byte order
    #[must_use]
    pub fn length(&self) -> usize {
        u32::from_le(self.length) as usize
    }

    /// Payload CRC in native byte order
    #[must_use]
    pub fn crc(&self) -> u32 {
        u32::from_le(self.crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<FileHeader>(), 16);
        assert_eq!(std::mem::size_of::<FrameHeader>(), 8);
    }

    #[test]
    fn test_default_header() {
        let header = FileHeader::default();
        assert_eq!(header.magic, FILE_MAGIC);
        assert_eq!(header.version(), FILE_VERSION);
        assert_eq!(&bytemuck::bytes_of(&header)[8..12], &1u32.to_le_bytes());
    }

    #[test]
    fn test_frame_header_crc() {
        let frame = FrameHeader::for_payload(b"hello");
        assert_eq!(frame.length(), 5);
        assert_eq!(frame.crc(), crc32fast::hash(b"hello"));
    }
}
