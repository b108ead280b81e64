use camino::Utf8PathBuf;

/// Failure opening a persistent backend. Kept separate from the
/// `eyre::Result` the `Database` trait itself returns, since callers
/// constructing a store want to match on *why* the open failed (e.g. to
/// decide whether to create the directory and retry).
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("store path does not exist: {0}")]
    MissingPath(Utf8PathBuf),

    #[error("failed to open store at {path}")]
    Backend {
        path: Utf8PathBuf,
        #[source]
        source: eyre::Error,
    },
}
