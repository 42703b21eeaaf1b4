//! Cassette store
//!
//! Ordered interactions plus a replay cursor. Recording only appends,
//! replaying only advances the cursor.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::interaction::{Interaction, RequestSnapshot, ResponseSnapshot};
use crate::storage::{self, codec, CassetteReader, CassetteWriter};
use crate::Result;

/// Where a cassette was loaded from and is persisted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CassetteSource {
    /// A file on disk
    File(PathBuf),
    /// An in-memory buffer owned by the embedder
    Memory,
}

impl fmt::Display for CassetteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str("<memory>"),
        }
    }
}

/// Ordered sequence of interactions with a replay cursor
#[derive(Debug, Clone)]
pub struct Cassette {
    interactions: Vec<Interaction>,
    cursor: usize,
    source: CassetteSource,
    persisted_len: usize,
}

impl Cassette {
    /// Create an empty cassette
    #[must_use]
    pub fn empty(source: CassetteSource) -> Self {
        Self {
            interactions: Vec::new(),
            cursor: 0,
            source,
            persisted_len: 0,
        }
    }

    /// Load a cassette from a file
    ///
    /// A missing or empty file yields an empty cassette bound to `path`.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the file is corrupt, `Io` if it cannot be read
    pub fn load(path: &Path) -> Result<Self> {
        let source = CassetteSource::File(path.to_path_buf());

        let reader = match CassetteReader::open(path) {
            Ok(reader) => reader,
            Err(crate::PlaybackError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("Cassette {} does not exist yet", path.display());
                return Ok(Self::empty(source));
            }
            Err(e) => return Err(e),
        };

        let interactions = reader.interactions()?;
        info!(
            "Loaded cassette {} ({} interactions)",
            path.display(),
            interactions.len()
        );
        Ok(Self::from_interactions(interactions, source))
    }

    /// Decode a cassette from an in-memory buffer
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the bytes are corrupt
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let interactions = storage::decode_stream(data)?;
        Ok(Self::from_interactions(interactions, CassetteSource::Memory))
    }

    fn from_interactions(interactions: Vec<Interaction>, source: CassetteSource) -> Self {
        let persisted_len = interactions.len();
        Self {
            interactions,
            cursor: 0,
            source,
            persisted_len,
        }
    }

    /// Record a new interaction and return its sequence number
    ///
    /// # Errors
    ///
    /// Returns `DataTooLarge` if the snapshots cannot be encoded; the
    /// cassette is left unchanged
    pub fn append(&mut self, request: RequestSnapshot, response: ResponseSnapshot) -> Result<u64> {
        let interaction = Interaction {
            sequence: self.interactions.len() as u64 + 1,
            request,
            response,
        };
        codec::validate(&interaction)?;

        let sequence = interaction.sequence;
        self.interactions.push(interaction);
        Ok(sequence)
    }

    /// Take the interaction at the cursor and advance past it
    pub fn next_interaction(&mut self) -> Option<&Interaction> {
        let interaction = self.interactions.get(self.cursor)?;
        self.cursor += 1;
        Some(interaction)
    }

    /// Interaction at the cursor, without advancing
    #[must_use]
    pub fn peek(&self) -> Option<&Interaction> {
        self.interactions.get(self.cursor)
    }

    /// Write every interaction, in order, to `destination`
    ///
    /// # Errors
    ///
    /// Returns error if encoding or any file operation fails
    pub fn persist(&mut self, destination: &Path) -> Result<()> {
        CassetteWriter::write(destination, &self.interactions)?;
        if self.source == CassetteSource::File(destination.to_path_buf()) {
            self.persisted_len = self.interactions.len();
        }
        info!(
            "Persisted cassette {} ({} interactions)",
            destination.display(),
            self.interactions.len()
        );
        Ok(())
    }

    /// Persist to the file this cassette came from, if it has one
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub fn persist_to_source(&mut self) -> Result<bool> {
        match self.source.clone() {
            CassetteSource::File(path) => {
                self.persist(&path)?;
                Ok(true)
            }
            CassetteSource::Memory => Ok(false),
        }
    }

    /// Encode the cassette as a byte stream
    ///
    /// # Errors
    ///
    /// Returns error if an interaction cannot be encoded
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        storage::encode_stream(&self.interactions)
    }

    /// Encode the cassette into `out`
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// All interactions in sequence order
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Check if the cassette holds no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Replay cursor (interactions already served)
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Interactions not yet served
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.interactions.len() - self.cursor
    }

    /// Whether interactions were appended since the last load or persist
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.interactions.len() != self.persisted_len
    }

    /// Where this cassette lives
    #[must_use]
    pub fn source(&self) -> &CassetteSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaybackError;
    use tempfile::TempDir;

    fn exchange(i: usize) -> (RequestSnapshot, ResponseSnapshot) {
        (
            RequestSnapshot::new("GET", format!("/api/test/{i}")),
            ResponseSnapshot::new(200, format!("Response {i}")),
        )
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.cassette");

        let cassette = Cassette::load(&path).unwrap();
        assert!(cassette.is_empty());
        assert_eq!(cassette.cursor(), 0);
        assert_eq!(cassette.source(), &CassetteSource::File(path));
    }

    #[test]
    fn test_append_assigns_contiguous_sequence() {
        let mut cassette = Cassette::empty(CassetteSource::Memory);
        for i in 0..5 {
            let (request, response) = exchange(i);
            let sequence = cassette.append(request, response).unwrap();
            assert_eq!(sequence, i as u64 + 1);
        }

        let sequences: Vec<_> = cassette.interactions().iter().map(|i| i.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert!(cassette.is_dirty());
    }

    #[test]
    fn test_append_rejects_unencodable_without_mutation() {
        let mut cassette = Cassette::empty(CassetteSource::Memory);
        let (mut request, response) = exchange(0);
        request.method = "M".repeat(u16::MAX as usize + 1);

        let err = cassette.append(request, response).unwrap_err();
        assert!(matches!(err, PlaybackError::DataTooLarge { .. }));
        assert!(cassette.is_empty());
    }

    #[test]
    fn test_cursor_advances_to_exhaustion() {
        let mut cassette = Cassette::empty(CassetteSource::Memory);
        for i in 0..2 {
            let (request, response) = exchange(i);
            cassette.append(request, response).unwrap();
        }

        assert_eq!(cassette.next_interaction().unwrap().sequence, 1);
        assert_eq!(cassette.peek().unwrap().sequence, 2);
        assert_eq!(cassette.next_interaction().unwrap().sequence, 2);
        assert!(cassette.next_interaction().is_none());
        assert_eq!(cassette.cursor(), 2);
        assert_eq!(cassette.remaining(), 0);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.cassette");

        let mut cassette = Cassette::load(&path).unwrap();
        for i in 0..3 {
            let (request, response) = exchange(i);
            cassette.append(request, response).unwrap();
        }
        cassette.next_interaction();

        assert!(cassette.persist_to_source().unwrap());
        assert!(!cassette.is_dirty());

        let reloaded = Cassette::load(&path).unwrap();
        assert_eq!(reloaded.interactions(), cassette.interactions());
        assert_eq!(reloaded.cursor(), 0, "loading always starts at the beginning");
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_persist_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("twice.cassette");

        let mut cassette = Cassette::load(&path).unwrap();
        let (request, response) = exchange(0);
        cassette.append(request, response).unwrap();

        cassette.persist(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        cassette.persist(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_memory_roundtrip() {
        let mut cassette = Cassette::empty(CassetteSource::Memory);
        let (request, response) = exchange(1);
        cassette.append(request, response).unwrap();

        let mut buffer = Vec::new();
        cassette.write_to(&mut buffer).unwrap();

        let restored = Cassette::from_bytes(&buffer).unwrap();
        assert_eq!(restored.interactions(), cassette.interactions());
        assert_eq!(restored.source(), &CassetteSource::Memory);
        assert!(!cassette.clone().persist_to_source().unwrap());
    }

    #[test]
    fn test_corrupt_file_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.cassette");
        std::fs::write(&path, b"not a cassette at all").unwrap();

        let err = Cassette::load(&path).unwrap_err();
        assert!(matches!(err, PlaybackError::Decode { offset: 0, .. }));
    }
}
