//! Per-shape container configuration and artifact retrieval.

use std::collections::BTreeMap;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::containers::{ByteStream, Containers};
use crate::volumes::{
    MEASURES_DIRECTORY, MEASURES_DIRECTORY_PATH, OUTPUT_DIRECTORY, OUTPUT_DIRECTORY_PATH,
    SUMMARY_MEASURES_FILE, Volume,
};

use super::{CompositionError, IndexRange};

/// Key holding the output directory of an atomic execution.
pub const OUTPUT_DIRECTORY_KEY: &str = "output_directory";
/// Key holding the measures directory of an atomic execution.
pub const MEASURES_DIRECTORY_KEY: &str = "measures_directory";
/// Key holding the summary measures file of an atomic execution.
pub const SUMMARY_MEASURES_PATH_KEY: &str = "summary_measures_path";
/// Key holding the index → output directory table.
pub const INDEX_TO_OUTPUT_DIRECTORY_KEY: &str = "index_to_output_directory";
/// Key holding the index → measures directory table.
pub const INDEX_TO_MEASURES_DIRECTORY_KEY: &str = "index_to_measures_directory";
/// Key holding the index → summary measures file table.
pub const INDEX_TO_SUMMARY_MEASURES_PATH_KEY: &str = "index_to_summary_measures_path";
/// Key holding the index range descriptor.
pub const INDICES_KEY: &str = "indices";

/// Directory label (`None` for atomic executions, the index otherwise)
/// paired with the tar stream of its files.
pub type DirectoryTarball = (Option<String>, ByteStream);

/// Value of one startup configuration key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Single absolute path.
    Path(Utf8PathBuf),
    /// Absolute path per index.
    PathTable(BTreeMap<u32, Utf8PathBuf>),
    /// Index range the worker has to process.
    Indices {
        /// Range rendered as `[start, end]`.
        range: IndexRange,
    },
}

/// Configuration consumed by the worker entrypoint: keys plus the empty
/// directories to mount.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WorkerStartupConfig {
    config_keys: BTreeMap<String, ConfigValue>,
    volumes: Vec<Volume>,
}

impl WorkerStartupConfig {
    /// Configuration keys by name.
    #[must_use]
    pub const fn config_keys(&self) -> &BTreeMap<String, ConfigValue> {
        &self.config_keys
    }

    /// Looks up one configuration key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.config_keys.get(key)
    }

    /// Volumes to mount, in declaration order.
    #[must_use]
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }
}

/// Strategy matching the composition an instance runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceComposition {
    /// One execution writing straight into the output and measures roots.
    Atomic,
    /// One sub-directory per index under each root.
    Indices(IndexRange),
}

impl InstanceComposition {
    /// Picks the strategy for an optional index range.
    #[must_use]
    pub const fn create_for(index_range_to_run: Option<IndexRange>) -> Self {
        match index_range_to_run {
            None => Self::Atomic,
            Some(range) => Self::Indices(range),
        }
    }

    /// Index range handled by the instance, if any.
    #[must_use]
    pub const fn index_range(self) -> Option<IndexRange> {
        match self {
            Self::Atomic => None,
            Self::Indices(range) => Some(range),
        }
    }

    /// Computes the volumes and path tables the container needs.
    #[must_use]
    pub fn get_startup_config(self) -> WorkerStartupConfig {
        match self {
            Self::Atomic => atomic_startup_config(),
            Self::Indices(range) => indices_startup_config(range),
        }
    }

    /// Fetches the output files, scoped to `output_path` inside each output
    /// directory when given.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::InvalidOutputPath`] when `output_path`
    /// climbs out of the output directory, and
    /// [`CompositionError::Containers`] when the runtime cannot deliver a
    /// directory.
    pub async fn get_output_dirs_and_tarballs(
        self,
        execution_id: &str,
        containers: &dyn Containers,
        output_path: Option<&str>,
    ) -> Result<Vec<DirectoryTarball>, CompositionError> {
        let scoped = scoped_output_path(output_path)?;
        let mut tarballs = Vec::new();
        for index in self.labels() {
            let mut path = directory_for(OUTPUT_DIRECTORY_PATH, index);
            if let Some(relative) = &scoped {
                path.push(relative);
            }
            debug!(%execution_id, %path, "fetching output files");
            let tarball = containers.get_files(execution_id, &path).await?;
            tarballs.push((index.map(|value| value.to_string()), tarball));
        }
        Ok(tarballs)
    }

    /// Fetches the measures directories.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::Containers`] when the runtime cannot
    /// deliver a directory.
    pub async fn get_measures_dirs_and_tarballs(
        self,
        execution_id: &str,
        containers: &dyn Containers,
    ) -> Result<Vec<DirectoryTarball>, CompositionError> {
        let mut tarballs = Vec::new();
        for index in self.labels() {
            let path = directory_for(MEASURES_DIRECTORY_PATH, index);
            debug!(%execution_id, %path, "fetching measures");
            let tarball = containers.get_files(execution_id, &path).await?;
            tarballs.push((index.map(|value| value.to_string()), tarball));
        }
        Ok(tarballs)
    }

    /// Assembles per-index measures into one structure: the accessor's
    /// result for atomic executions, an index-keyed map otherwise.
    #[must_use]
    pub fn compose_measures<T, F>(self, mut measures_from_index: F) -> ComposedMeasures<T>
    where
        F: FnMut(Option<u32>) -> T,
    {
        match self {
            Self::Atomic => ComposedMeasures::Atomic(measures_from_index(None)),
            Self::Indices(range) => ComposedMeasures::Indices(
                range
                    .indices()
                    .map(|index| (index, measures_from_index(Some(index))))
                    .collect(),
            ),
        }
    }

    /// Like [`Self::compose_measures`] for fallible accessors.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `measures_from_index`.
    pub fn try_compose_measures<T, E, F>(
        self,
        mut measures_from_index: F,
    ) -> Result<ComposedMeasures<T>, E>
    where
        F: FnMut(Option<u32>) -> Result<T, E>,
    {
        match self {
            Self::Atomic => measures_from_index(None).map(ComposedMeasures::Atomic),
            Self::Indices(range) => range
                .indices()
                .map(|index| measures_from_index(Some(index)).map(|measures| (index, measures)))
                .collect::<Result<BTreeMap<_, _>, E>>()
                .map(ComposedMeasures::Indices),
        }
    }

    /// `None` once for atomic executions, every index otherwise.
    fn labels(self) -> Vec<Option<u32>> {
        match self {
            Self::Atomic => vec![None],
            Self::Indices(range) => range.indices().map(Some).collect(),
        }
    }
}

/// Measures assembled by [`InstanceComposition::compose_measures`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComposedMeasures<T> {
    /// Measures of an atomic execution.
    Atomic(T),
    /// Measures keyed by index.
    Indices(BTreeMap<u32, T>),
}

fn atomic_startup_config() -> WorkerStartupConfig {
    let config_keys = BTreeMap::from([
        (
            OUTPUT_DIRECTORY_KEY.to_owned(),
            ConfigValue::Path(OUTPUT_DIRECTORY_PATH.into()),
        ),
        (
            MEASURES_DIRECTORY_KEY.to_owned(),
            ConfigValue::Path(MEASURES_DIRECTORY_PATH.into()),
        ),
        (
            SUMMARY_MEASURES_PATH_KEY.to_owned(),
            ConfigValue::Path(Utf8Path::new(MEASURES_DIRECTORY_PATH).join(SUMMARY_MEASURES_FILE)),
        ),
    ]);
    WorkerStartupConfig {
        config_keys,
        volumes: vec![
            Volume::empty_directory(OUTPUT_DIRECTORY),
            Volume::empty_directory(MEASURES_DIRECTORY),
        ],
    }
}

fn indices_startup_config(range: IndexRange) -> WorkerStartupConfig {
    let table = |root: &str| -> BTreeMap<u32, Utf8PathBuf> {
        range
            .indices()
            .map(|index| (index, directory_for(root, Some(index))))
            .collect()
    };
    let summaries = range
        .indices()
        .map(|index| {
            (
                index,
                directory_for(MEASURES_DIRECTORY_PATH, Some(index)).join(SUMMARY_MEASURES_FILE),
            )
        })
        .collect();

    let config_keys = BTreeMap::from([
        (
            INDEX_TO_OUTPUT_DIRECTORY_KEY.to_owned(),
            ConfigValue::PathTable(table(OUTPUT_DIRECTORY_PATH)),
        ),
        (
            INDEX_TO_MEASURES_DIRECTORY_KEY.to_owned(),
            ConfigValue::PathTable(table(MEASURES_DIRECTORY_PATH)),
        ),
        (
            INDEX_TO_SUMMARY_MEASURES_PATH_KEY.to_owned(),
            ConfigValue::PathTable(summaries),
        ),
        (INDICES_KEY.to_owned(), ConfigValue::Indices { range }),
    ]);
    let volumes = range
        .indices()
        .flat_map(|index| {
            [OUTPUT_DIRECTORY, MEASURES_DIRECTORY]
                .map(|root| Volume::empty_directory(directory_for(root, Some(index))))
        })
        .collect();

    WorkerStartupConfig {
        config_keys,
        volumes,
    }
}

fn directory_for(root: &str, index: Option<u32>) -> Utf8PathBuf {
    let base = Utf8Path::new(root);
    index.map_or_else(|| base.to_path_buf(), |position| base.join(position.to_string()))
}

/// Normalises a user-supplied output sub-path: leading slashes are dropped
/// and parent components rejected so the path stays under the root.
fn scoped_output_path(output_path: Option<&str>) -> Result<Option<Utf8PathBuf>, CompositionError> {
    let Some(raw) = output_path else {
        return Ok(None);
    };
    let relative = Utf8Path::new(raw.trim_start_matches('/'));
    if relative
        .components()
        .any(|component| matches!(component, Utf8Component::ParentDir))
    {
        return Err(CompositionError::InvalidOutputPath {
            path: raw.to_owned(),
        });
    }
    if relative.as_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(relative.to_path_buf()))
}
