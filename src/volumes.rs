//! Well-known container volume locations shared by workers and the
//! controller.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Mount point under which every execution volume is exposed.
pub const VOLUME_MOUNT: &str = "/plz";

/// Volume name holding files the command writes as output.
pub const OUTPUT_DIRECTORY: &str = "output";

/// Volume name holding measurement artifacts.
pub const MEASURES_DIRECTORY: &str = "measures";

/// Absolute path of the output volume inside the container.
pub const OUTPUT_DIRECTORY_PATH: &str = "/plz/output";

/// Absolute path of the measures volume inside the container.
pub const MEASURES_DIRECTORY_PATH: &str = "/plz/measures";

/// File name of the summary measures under a measures directory.
pub const SUMMARY_MEASURES_FILE: &str = "summary";

/// Volume declaration mounted into a worker container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Volume {
    /// Empty directory created at startup, named relative to
    /// [`VOLUME_MOUNT`].
    EmptyDirectory {
        /// Relative directory name (for example `output/3`).
        name: Utf8PathBuf,
    },
}

impl Volume {
    /// Declares an empty directory volume.
    #[must_use]
    pub fn empty_directory(name: impl Into<Utf8PathBuf>) -> Self {
        Self::EmptyDirectory { name: name.into() }
    }

    /// Returns the relative volume name.
    #[must_use]
    pub fn name(&self) -> &Utf8Path {
        match self {
            Self::EmptyDirectory { name } => name,
        }
    }

    /// Returns where the volume is mounted inside the container.
    #[must_use]
    pub fn mount_path(&self) -> Utf8PathBuf {
        Utf8Path::new(VOLUME_MOUNT).join(self.name())
    }
}
