use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// On-disk location of a persistent `Database` backend. Backends that have
/// no on-disk presence (the in-memory store used by tests) ignore this.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Utf8PathBuf,
}

impl StoreConfig {
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }
}
