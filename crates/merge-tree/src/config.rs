use camino::Utf8PathBuf;
use perspectivedb_types::{validate_version_size, VersionError};
use serde::{Deserialize, Serialize};

/// The name reserved for the local tree; no perspective may be configured
/// with this name.
pub const LOCAL_PERSPECTIVE: &str = "local";
/// The name of the scratch tree that holds remote items and computed
/// merges pending promotion to local.
pub const STAGE_PERSPECTIVE: &str = "stage";

/// Configuration for one [`crate::merge_tree::MergeTree`]: where its
/// underlying store lives, the fixed widths used by its key encoding, and
/// which remote perspectives it tracks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeTreeConfig {
    pub path: Utf8PathBuf,
    /// `iSize`: width in bytes of the insertion sequence, `1..=6`.
    pub insertion_size: usize,
    /// `vSize`: width in bytes of a version, `1..=6`.
    pub version_size: usize,
    pub perspectives: Vec<String>,
}

impl MergeTreeConfig {
    pub fn validate(&self) -> Result<(), VersionError> {
        validate_version_size(self.version_size)?;
        validate_version_size(self.insertion_size)?;
        Ok(())
    }

    /// Remote perspectives as typed [`Perspective`] values, excluding the
    /// reserved local/stage names.
    pub fn remote_perspectives(&self) -> impl Iterator<Item = &str> {
        self.perspectives
            .iter()
            .map(String::as_str)
            .filter(|p| *p != LOCAL_PERSPECTIVE && *p != STAGE_PERSPECTIVE)
    }

    /// Loads a config from a TOML file at `path`.
    pub fn load(path: &Utf8PathBuf) -> eyre::Result<Self> {
        use eyre::WrapErr;

        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read merge tree config at {path}"))?;
        toml::from_str(&raw).wrap_err_with(|| format!("failed to parse merge tree config at {path}"))
    }

    /// Saves this config as TOML to `path`.
    pub fn save(&self, path: &Utf8PathBuf) -> eyre::Result<()> {
        use eyre::WrapErr;

        let raw = toml::to_string_pretty(self).wrap_err("failed to serialize merge tree config")?;
        std::fs::write(path, raw)
            .wrap_err_with(|| format!("failed to write merge tree config at {path}"))
    }
}
