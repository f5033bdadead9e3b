use thiserror::Error;

/// Top-level editor errors (I/O and lifecycle).
///
/// Data-shape problems never surface here: route resolution failures and
/// structural mismatches are reported as [`MutationError`] internally and
/// reach the public API as `false`/`None`.
///
/// [`MutationError`]: crate::MutationError
#[derive(Error, Debug)]
pub enum EditorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document is not file-backed")]
    NotFileBacked,

    #[error("no document loaded")]
    NotLoaded,

    #[error("failed to persist temporary file: {0}")]
    Persist(#[from] tempfile::PersistError),
}
