//! Cassette file writer

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytemuck::bytes_of;

use super::codec;
use super::format::{FileHeader, FrameHeader, FRAME_HEADER_SIZE, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::interaction::Interaction;
use crate::{PlaybackError, Result};

/// Writer for cassette files
///
/// Frames go to a sibling temporary file which replaces the destination on
/// [`finalize`](Self::finalize), so readers never see a half-written cassette.
pub struct CassetteWriter {
    out: BufWriter<File>,
    tmp_path: PathBuf,
    path: PathBuf,
    interaction_count: u64,
}

impl CassetteWriter {
    /// Start a new cassette file at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the temporary file cannot be created
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temp_path_for(path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut out = BufWriter::new(file);
        out.write_all(bytes_of(&FileHeader::default()))?;

        Ok(Self {
            out,
            tmp_path,
            path: path.to_path_buf(),
            interaction_count: 0,
        })
    }

    /// Append one interaction frame
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the write fails
    pub fn append(&mut self, interaction: &Interaction) -> Result<()> {
        write_frame(&mut self.out, interaction)?;
        self.interaction_count += 1;
        Ok(())
    }

    /// Number of frames written so far
    #[must_use]
    pub fn interaction_count(&self) -> u64 {
        self.interaction_count
    }

    /// Flush, sync and move the cassette into place
    ///
    /// # Errors
    ///
    /// Returns error if flush or rename fails
    pub fn finalize(self) -> Result<()> {
        let file = self
            .out
            .into_inner()
            .map_err(|e| PlaybackError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    /// Write a whole cassette to `path`
    ///
    /// # Errors
    ///
    /// Returns error if encoding or any file operation fails
    pub fn write(path: &Path, interactions: &[Interaction]) -> Result<()> {
        let mut writer = Self::create(path)?;
        for interaction in interactions {
            writer.append(interaction)?;
        }
        writer.finalize()
    }
}

/// Encode a complete cassette byte stream
///
/// # Errors
///
/// Returns error if any interaction cannot be encoded
pub fn encode_stream(interactions: &[Interaction]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(HEADER_SIZE);
    data.extend_from_slice(bytes_of(&FileHeader::default()));
    for interaction in interactions {
        write_frame(&mut data, interaction)?;
    }
    Ok(data)
}

fn write_frame<W: Write>(out: &mut W, interaction: &Interaction) -> Result<()> {
    let payload = codec::encode(interaction)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(PlaybackError::DataTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    let frame = FrameHeader::for_payload(&payload);
    debug_assert_eq!(bytes_of(&frame).len(), FRAME_HEADER_SIZE);

    out.write_all(bytes_of(&frame))?;
    out.write_all(&payload)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
