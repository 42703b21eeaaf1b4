//! Cassette file reader

use std::fs::File;
use std::path::Path;

use bytemuck::pod_read_unaligned;
use memmap2::Mmap;
use tracing::debug;

use super::codec;
use super::format::{FileHeader, FrameHeader, FILE_MAGIC, FILE_VERSION, FRAME_HEADER_SIZE, HEADER_SIZE};
use crate::interaction::Interaction;
use crate::{PlaybackError, Result};

/// Reader for cassette files
pub struct CassetteReader {
    _file: File,
    mmap: Option<Mmap>,
}

impl CassetteReader {
    /// Open an existing cassette file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be opened or mapped
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        // Zero-length files are valid empty cassettes and cannot be mapped portably
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { _file: file, mmap })
    }

    /// Raw file contents
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }

    /// Decode every interaction in the file
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the file is corrupt
    pub fn interactions(&self) -> Result<Vec<Interaction>> {
        decode_stream(self.as_bytes())
    }
}

/// Decode a complete cassette byte stream
///
/// An empty stream is an empty cassette.
///
/// # Errors
///
/// Returns `Decode` with the absolute offset of the first problem
pub fn decode_stream(data: &[u8]) -> Result<Vec<Interaction>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    if data.len() < HEADER_SIZE {
        return Err(PlaybackError::decode(
            0,
            format!("file header truncated: {} of {HEADER_SIZE} bytes", data.len()),
        ));
    }

    let header: FileHeader = pod_read_unaligned(&data[..HEADER_SIZE]);
    validate_header(&header)?;

    let mut interactions = Vec::new();
    let mut offset = HEADER_SIZE;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < FRAME_HEADER_SIZE {
            return Err(PlaybackError::decode(
                offset,
                format!("frame header truncated: {remaining} of {FRAME_HEADER_SIZE} bytes"),
            ));
        }

        let frame: FrameHeader = pod_read_unaligned(&data[offset..offset + FRAME_HEADER_SIZE]);
        let payload_offset = offset + FRAME_HEADER_SIZE;
        let length = frame.length();

        if length > data.len() - payload_offset {
            return Err(PlaybackError::decode(
                offset,
                format!(
                    "frame length {length} extends beyond end of data ({} bytes left)",
                    data.len() - payload_offset
                ),
            ));
        }

        let payload = &data[payload_offset..payload_offset + length];
        let actual = crc32fast::hash(payload);
        if actual != frame.crc() {
            return Err(PlaybackError::decode(
                offset,
                format!(
                    "CRC mismatch: expected {:#x}, got {actual:#x}",
                    frame.crc()
                ),
            ));
        }

        let interaction = codec::decode_at(payload, payload_offset)?;

        let expected = interactions.len() as u64 + 1;
        if interaction.sequence != expected {
            return Err(PlaybackError::decode(
                payload_offset,
                format!(
                    "sequence number {} out of order, expected {expected}",
                    interaction.sequence
                ),
            ));
        }

        interactions.push(interaction);
        offset = payload_offset + length;
    }

    debug!("Decoded {} interactions ({} bytes)", interactions.len(), data.len());
    Ok(interactions)
}

/// Validate cassette file magic and version
///
/// # Errors
///
/// Returns error if magic or version is invalid
pub fn validate_header(header: &FileHeader) -> Result<()> {
    if header.magic != FILE_MAGIC {
        return Err(PlaybackError::decode(
            0,
            format!(
                "invalid magic bytes: expected {:?}, got {:?}",
                FILE_MAGIC, header.magic
            ),
        ));
    }

    if header.version() != FILE_VERSION {
        return Err(PlaybackError::decode(
            8,
            format!(
                "unsupported version {}, expected {FILE_VERSION}",
                header.version()
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{RequestSnapshot, ResponseSnapshot};
    use crate::storage::writer::{encode_stream, CassetteWriter};
    use tempfile::{NamedTempFile, TempDir};

    fn interactions(n: u64) -> Vec<Interaction> {
        (1..=n)
            .map(|sequence| Interaction {
                sequence,
                request: RequestSnapshot::new("GET", format!("/test/{sequence}")),
                response: ResponseSnapshot::new(200, format!("Response {sequence}")),
            })
            .collect()
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode_stream(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_header_only_stream() {
        let data = encode_stream(&[]).unwrap();
        assert_eq!(data.len(), HEADER_SIZE);
        assert!(decode_stream(&data).unwrap().is_empty());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roundtrip.cassette");
        let original = interactions(10);

        CassetteWriter::write(&path, &original).unwrap();

        let reader = CassetteReader::open(&path).unwrap();
        assert_eq!(reader.interactions().unwrap(), original);
    }

    #[test]
    fn test_open_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let reader = CassetteReader::open(file.path()).unwrap();
        assert!(reader.as_bytes().is_empty());
        assert!(reader.interactions().unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut data = encode_stream(&interactions(1)).unwrap();
        data[0] = b'X';
        let err = decode_stream(&data).unwrap_err();
        assert!(matches!(err, PlaybackError::Decode { offset: 0, .. }));
    }

    #[test]
    fn test_crc_mismatch_reports_frame_offset() {
        let mut data = encode_stream(&interactions(2)).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;

        match decode_stream(&data).unwrap_err() {
            PlaybackError::Decode { offset, reason } => {
                assert!(offset > HEADER_SIZE, "second frame, not the first");
                assert!(reason.contains("CRC"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_frame() {
        let data = encode_stream(&interactions(1)).unwrap();
        let err = decode_stream(&data[..data.len() - 1]).unwrap_err();
        match err {
            PlaybackError::Decode { offset, reason } => {
                assert_eq!(offset, HEADER_SIZE);
                assert!(reason.contains("beyond end"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_sequence_gap_rejected() {
        let mut list = interactions(3);
        list[2].sequence = 5;
        let data = encode_stream(&list).unwrap();
        let err = decode_stream(&data).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }
}
