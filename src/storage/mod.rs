//! Binary storage format for cassettes
//!
//! A cassette file is a [`FileHeader`] followed by one frame per interaction.
//! Each frame is a [`FrameHeader`] (payload length and CRC32) and a payload
//! produced by [`codec::encode`].

pub mod codec;
mod format;
mod reader;
mod writer;

pub use format::{
    FileHeader, FrameHeader, FILE_MAGIC, FILE_VERSION, FRAME_HEADER_SIZE, HEADER_SIZE,
    MAX_FRAME_SIZE,
};
pub use reader::{decode_stream, validate_header, CassetteReader};
pub use writer::{encode_stream, CassetteWriter};
