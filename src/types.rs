use std::fmt;
use std::sync::Arc;

/// Identifier of a file produced during a run.
///
/// Files are produced either by a file-load unit or as an output of an
/// execution unit. Identifiers are allocated by
/// [`ExecutionDag`](crate::dag::ExecutionDag) and are unique within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Identifier of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(pub u64);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec#{}", self.0)
    }
}

/// Immutable content of a produced file.
///
/// Cloning is cheap: the bytes are shared. The blake3 hash is computed once
/// at construction and is what the result cache keys on.
#[derive(Clone, PartialEq, Eq)]
pub struct FileHandle {
    content: Arc<[u8]>,
    hash: String,
}

impl FileHandle {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let hash = blake3::hash(&bytes).to_hex().to_string();
        Self {
            content: Arc::from(bytes),
            hash,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Hex-encoded blake3 hash of the content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Content as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("len", &self.content.len())
            .field("hash", &self.hash)
            .finish()
    }
}
