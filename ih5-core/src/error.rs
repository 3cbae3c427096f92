//! Error taxonomy for container chains and the overlay.

use std::path::PathBuf;

/// Result type for chain and overlay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for chain and overlay operations.
///
/// Caller-misuse variants (`InvalidName`, `InvalidKey`, `ReadOnly`,
/// `PathConflict`, `ForbiddenValue`, `NotOpen`, `Lifecycle`) are raised
/// before any side effect. Integrity, chain and manifest errors are never
/// repaired silently.
#[derive(Debug)]
pub enum Error {
    /// Record name contains characters outside `[A-Za-z0-9-]`
    InvalidName(String),
    /// File lacks the format magic string or is too short
    NotAContainer(PathBuf),
    /// User block parses but violates invariants
    CorruptUserBlock { path: PathBuf, reason: String },
    /// Serialized user block does not fit the reserved region
    UserBlockTooSmall { path: PathBuf, need: usize, have: usize },
    /// File was not created with a reserved user block
    NoReservedUserBlock(PathBuf),
    /// Qualified hashsum names an unknown algorithm
    UnsupportedHashAlg(String),
    /// Stored and recomputed payload hashsums differ
    IntegrityFailure {
        path: PathBuf,
        stored: String,
        computed: String,
    },
    /// UUID mismatch, index ordering, predecessor linkage or uniqueness violation
    BrokenChain { path: PathBuf, reason: String },
    /// Tail file has no payload hashsum and the chain was opened read-only
    IncompleteTail(PathBuf),
    /// Write attempted on a read-only chain
    ReadOnly,
    /// Writing over an existing group or dataset without deleting it first
    PathConflict(String),
    /// Name or attribute key violates character or reserved-symbol rules
    InvalidKey(String),
    /// Attempt to write a reserved sentinel value
    ForbiddenValue(String),
    /// A non-base container is flagged as a stub
    StubNotBase(PathBuf),
    /// Manifest sidecar absent, wrong UUID, or wrong hashsum
    ManifestMismatch { path: PathBuf, reason: String },
    /// Use of a closed chain
    NotOpen,
    /// Path or attribute does not exist in the merged view
    NotFound(String),
    /// Path segment inside an existing dataset value
    NotAGroup(String),
    /// Patch lifecycle misuse (commit without patch, discard of base, ...)
    Lifecycle(String),
    /// Chain creation refused because files of that name already exist
    RecordExists(PathBuf),
    /// No files found for the record name
    RecordNotFound(PathBuf),
    /// Error bubbled up from the tree store
    Storage(ih5_tree::Error),
    /// Underlying I/O failure
    Io(std::io::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidName(name) => write!(f, "invalid record name: '{name}'"),
            Error::NotAContainer(p) => {
                write!(f, "{}: does not look like a valid container file", p.display())
            }
            Error::CorruptUserBlock { path, reason } => {
                write!(f, "{}: corrupt user block: {reason}", path.display())
            }
            Error::UserBlockTooSmall { path, need, have } => write!(
                f,
                "{}: serialized user block needs {need} bytes, only {have} reserved",
                path.display()
            ),
            Error::NoReservedUserBlock(p) => {
                write!(f, "{}: no user block reserved, cannot write", p.display())
            }
            Error::UnsupportedHashAlg(alg) => write!(f, "unsupported hashsum algorithm: {alg}"),
            Error::IntegrityFailure {
                path,
                stored,
                computed,
            } => write!(
                f,
                "{}: file has been modified, stored hashsum {stored} != computed {computed}",
                path.display()
            ),
            Error::BrokenChain { path, reason } => {
                write!(f, "{}: broken container chain: {reason}", path.display())
            }
            Error::IncompleteTail(p) => write!(
                f,
                "{}: tail container has no hashsum, reopen writable to complete it",
                p.display()
            ),
            Error::ReadOnly => write!(f, "chain is opened read-only, create a patch first"),
            Error::PathConflict(p) => {
                write!(f, "'{p}' already exists, delete it first to replace it")
            }
            Error::InvalidKey(k) => write!(f, "invalid key: '{k}'"),
            Error::ForbiddenValue(msg) => write!(f, "forbidden value: {msg}"),
            Error::StubNotBase(p) => {
                write!(f, "{}: only the base container may be a stub", p.display())
            }
            Error::ManifestMismatch { path, reason } => {
                write!(f, "{}: manifest mismatch: {reason}", path.display())
            }
            Error::NotOpen => write!(f, "record is not open"),
            Error::NotFound(p) => write!(f, "'{p}' does not exist"),
            Error::NotAGroup(p) => write!(f, "cannot access path inside a value: '{p}'"),
            Error::Lifecycle(msg) => write!(f, "{msg}"),
            Error::RecordExists(p) => write!(f, "{}: record already exists", p.display()),
            Error::RecordNotFound(p) => write!(f, "{}: no container files found", p.display()),
            Error::Storage(e) => write!(f, "storage error: {e}"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ih5_tree::Error> for Error {
    fn from(e: ih5_tree::Error) -> Self {
        match e {
            ih5_tree::Error::ReadOnly => Error::ReadOnly,
            ih5_tree::Error::NotFound(p) => Error::NotFound(p),
            ih5_tree::Error::AlreadyExists(p) => Error::PathConflict(p),
            ih5_tree::Error::NotAGroup(p) => Error::NotAGroup(p),
            ih5_tree::Error::Io(e) => Error::Io(e),
            other => Error::Storage(other),
        }
    }
}
