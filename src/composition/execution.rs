//! Reportable tree of sub-executions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{CompositionError, IndexRange};

/// How an execution is composed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "CompositionRecord", into = "CompositionRecord")]
pub enum ExecutionComposition {
    /// Something actually ran; there are no sub-executions.
    Atomic {
        /// Execution that ran.
        execution_id: String,
    },
    /// Several sub-executions, each processing some of the indices.
    Indices(IndicesComposition),
}

impl ExecutionComposition {
    /// Leaf composition for an execution that ran by itself.
    #[must_use]
    pub fn atomic(execution_id: impl Into<String>) -> Self {
        Self::Atomic {
            execution_id: execution_id.into(),
        }
    }

    /// Fan-out composition over `range` with no sub-execution yet.
    #[must_use]
    pub fn indices(execution_id: impl Into<String>, range: IndexRange) -> Self {
        Self::Indices(IndicesComposition::new(execution_id, range))
    }

    /// Execution this node describes.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Atomic { execution_id } => execution_id,
            Self::Indices(indices) => &indices.execution_id,
        }
    }

    /// Returns the fan-out node, if this is one.
    #[must_use]
    pub const fn as_indices(&self) -> Option<&IndicesComposition> {
        match self {
            Self::Atomic { .. } => None,
            Self::Indices(indices) => Some(indices),
        }
    }

    /// Returns the fan-out node for mutation, if this is one.
    pub const fn as_indices_mut(&mut self) -> Option<&mut IndicesComposition> {
        match self {
            Self::Atomic { .. } => None,
            Self::Indices(indices) => Some(indices),
        }
    }

    /// Ids of every atomic execution reachable from this node, in index
    /// order. Executions covering several indices are listed once.
    #[must_use]
    pub fn atomic_execution_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_atomic_ids(&mut ids);
        ids
    }

    fn collect_atomic_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Self::Atomic { execution_id } => {
                if !ids.contains(&execution_id.as_str()) {
                    ids.push(execution_id);
                }
            }
            Self::Indices(indices) => {
                for child in indices.indices_to_compositions.values().flatten() {
                    child.collect_atomic_ids(ids);
                }
            }
        }
    }

    /// Renders the nested reporting record.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Fan-out node mapping each index to the sub-execution that handles it.
///
/// The map is not injective: one sub-execution may cover several indices.
///
/// The seal is runtime state: it is neither written to the record nor
/// compared by `==`, and a deserialised node always starts unsealed.
#[derive(Clone, Debug)]
pub struct IndicesComposition {
    execution_id: String,
    range: IndexRange,
    indices_to_compositions: BTreeMap<u32, Option<ExecutionComposition>>,
    tombstone_execution_ids: BTreeSet<String>,
    sealed: bool,
}

impl IndicesComposition {
    /// Creates a node over `range` where no index has run yet.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, range: IndexRange) -> Self {
        Self {
            execution_id: execution_id.into(),
            range,
            indices_to_compositions: range.indices().map(|index| (index, None)).collect(),
            tombstone_execution_ids: BTreeSet::new(),
            sealed: false,
        }
    }

    /// Execution owning the fan-out.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Indices covered by the fan-out.
    #[must_use]
    pub const fn range(&self) -> IndexRange {
        self.range
    }

    /// Sub-composition for `index`, or `None` when it has not run yet or is
    /// out of range.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&ExecutionComposition> {
        self.indices_to_compositions.get(&index).and_then(Option::as_ref)
    }

    /// Index → sub-composition map; `None` marks indices still pending.
    #[must_use]
    pub const fn indices_to_compositions(&self) -> &BTreeMap<u32, Option<ExecutionComposition>> {
        &self.indices_to_compositions
    }

    /// Sub-executions that were started and later invalidated.
    #[must_use]
    pub const fn tombstone_execution_ids(&self) -> &BTreeSet<String> {
        &self.tombstone_execution_ids
    }

    /// Indices without a sub-composition, in ascending order.
    #[must_use]
    pub fn pending_indices(&self) -> Vec<u32> {
        self.indices_to_compositions
            .iter()
            .filter(|(_, composition)| composition.is_none())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Whether every index has a sub-composition.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.indices_to_compositions.values().all(Option::is_some)
    }

    /// Whether the owning execution finished and the node is frozen.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freezes the node once the owning execution reached a terminal state.
    pub const fn seal(&mut self) {
        self.sealed = true;
    }

    /// Records the sub-composition that handled `index`, returning the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::Sealed`] after [`Self::seal`],
    /// [`CompositionError::IndexOutOfRange`] for indices outside the range,
    /// and [`CompositionError::Tombstoned`] when the sub-execution was
    /// tombstoned.
    pub fn set_composition(
        &mut self,
        index: u32,
        composition: ExecutionComposition,
    ) -> Result<Option<ExecutionComposition>, CompositionError> {
        self.ensure_mutable()?;
        if self
            .tombstone_execution_ids
            .contains(composition.execution_id())
        {
            return Err(CompositionError::Tombstoned {
                execution_id: composition.execution_id().to_owned(),
            });
        }
        let slot = self.indices_to_compositions.get_mut(&index).ok_or(
            CompositionError::IndexOutOfRange {
                index,
                range: self.range,
            },
        )?;
        Ok(slot.replace(composition))
    }

    /// Invalidates a sub-execution: every index it covered becomes pending
    /// again and its id joins the tombstones. Returns the cleared indices.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::Sealed`] after [`Self::seal`].
    pub fn tombstone(&mut self, execution_id: &str) -> Result<Vec<u32>, CompositionError> {
        self.ensure_mutable()?;
        let mut cleared = Vec::new();
        for (index, slot) in &mut self.indices_to_compositions {
            if slot
                .as_ref()
                .is_some_and(|composition| composition.execution_id() == execution_id)
            {
                *slot = None;
                cleared.push(*index);
            }
        }
        self.tombstone_execution_ids.insert(execution_id.to_owned());
        Ok(cleared)
    }

    fn ensure_mutable(&self) -> Result<(), CompositionError> {
        if self.sealed {
            return Err(CompositionError::Sealed {
                execution_id: self.execution_id.clone(),
            });
        }
        Ok(())
    }
}

impl PartialEq for IndicesComposition {
    fn eq(&self, other: &Self) -> bool {
        self.execution_id == other.execution_id
            && self.range == other.range
            && self.indices_to_compositions == other.indices_to_compositions
            && self.tombstone_execution_ids == other.tombstone_execution_ids
    }
}

impl Eq for IndicesComposition {}

/// Wire shape shared by both variants; atomic nodes omit the fan-out
/// fields.
///
/// A fan-out's range is implied by its index keys. Empty fan-outs have no
/// keys, so they carry it in `range` instead.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct CompositionRecord {
    execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    indices_to_compositions: Option<BTreeMap<u32, Option<CompositionRecord>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tombstone_executions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<IndexRange>,
}

impl From<ExecutionComposition> for CompositionRecord {
    fn from(value: ExecutionComposition) -> Self {
        match value {
            ExecutionComposition::Atomic { execution_id } => Self {
                execution_id,
                indices_to_compositions: None,
                tombstone_executions: None,
                range: None,
            },
            ExecutionComposition::Indices(indices) => Self {
                range: indices.range.is_empty().then_some(indices.range),
                execution_id: indices.execution_id,
                indices_to_compositions: Some(
                    indices
                        .indices_to_compositions
                        .into_iter()
                        .map(|(index, child)| (index, child.map(Self::from)))
                        .collect(),
                ),
                tombstone_executions: Some(indices.tombstone_execution_ids.into_iter().collect()),
            },
        }
    }
}

impl TryFrom<CompositionRecord> for ExecutionComposition {
    type Error = CompositionError;

    fn try_from(record: CompositionRecord) -> Result<Self, Self::Error> {
        let CompositionRecord {
            execution_id,
            indices_to_compositions,
            tombstone_executions,
            range: empty_range,
        } = record;
        let Some(children) = indices_to_compositions else {
            return Ok(Self::Atomic { execution_id });
        };

        let range = if children.is_empty() {
            match empty_range {
                Some(declared) if declared.is_empty() => declared,
                Some(_) => {
                    return Err(CompositionError::SparseIndices { execution_id });
                }
                None => IndexRange::new(0, 0)?,
            }
        } else {
            dense_range(&execution_id, children.keys().copied())?
        };
        let mut compositions = BTreeMap::new();
        for (index, child) in children {
            compositions.insert(index, child.map(Self::try_from).transpose()?);
        }
        let tombstone_execution_ids: BTreeSet<String> =
            tombstone_executions.unwrap_or_default().into_iter().collect();

        if let Some(live) = compositions
            .values()
            .flatten()
            .find(|child| tombstone_execution_ids.contains(child.execution_id()))
        {
            return Err(CompositionError::Tombstoned {
                execution_id: live.execution_id().to_owned(),
            });
        }

        Ok(Self::Indices(IndicesComposition {
            execution_id,
            range,
            indices_to_compositions: compositions,
            tombstone_execution_ids,
            sealed: false,
        }))
    }
}

/// Recovers `[first, last + 1)` from ascending keys, rejecting gaps.
fn dense_range(
    execution_id: &str,
    mut keys: impl ExactSizeIterator<Item = u32> + DoubleEndedIterator,
) -> Result<IndexRange, CompositionError> {
    let count = keys.len();
    let Some(first) = keys.next() else {
        return IndexRange::new(0, 0);
    };
    let last = keys.next_back().unwrap_or(first);
    let end = last.checked_add(1).ok_or_else(|| CompositionError::SparseIndices {
        execution_id: execution_id.to_owned(),
    })?;
    let range = IndexRange::new(first, end)?;
    if usize::try_from(range.len()).ok() != Some(count) {
        return Err(CompositionError::SparseIndices {
            execution_id: execution_id.to_owned(),
        });
    }
    Ok(range)
}
