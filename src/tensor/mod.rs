//! Symbolic tensors: declared families and their instances over concrete indices.

use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::{self, format_err};
use derive_builder::Builder;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::emit::{block_key, CxxEmitter, Emitter};
use crate::index::{contractable, Index, IndexFactory, IndexRange};
use crate::listing::TensorUnit;

#[cfg(test)]
#[path = "tensor_tests.rs"]
mod tensor_tests;

// ==================
// Struct definitions
// ==================

// ----------
// TensorSpec
// ----------

/// A structure describing one member of a tensor family: a label, an optional numeric tag
/// distinguishing members of the same family, and the ordered ranges of its indices.
#[derive(Builder, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct TensorSpec {
    /// The label of the tensor, *e.g.* `t2` or `v2`.
    #[builder(setter(into))]
    label: String,

    /// The numeric tag of the family member, if any.
    #[builder(default = "None")]
    tag: Option<usize>,

    /// The ranges of the indices in declared order.
    #[builder(setter(custom))]
    ranges: Vec<IndexRange>,

    /// Boolean indicating if this tensor plays the role of a projector, *i.e.* if it defines
    /// the left-hand side of an equation.
    #[builder(default = "false")]
    projector: bool,

    /// Boolean indicating if the excitations carried by this tensor are restricted to alpha spin.
    #[builder(default = "false")]
    alpha: bool,
}

impl TensorSpecBuilder {
    pub fn ranges(&mut self, ranges: &[IndexRange]) -> &mut Self {
        self.ranges = Some(ranges.to_vec());
        self
    }

    fn validate(&self) -> Result<(), String> {
        let label = self.label.as_ref().ok_or("No tensor label set.")?;
        if label.is_empty() {
            return Err("Tensor labels must not be empty.".to_string());
        }
        let ranges = self.ranges.as_ref().ok_or("No index ranges set.")?;
        if !matches!(ranges.len(), 0 | 2 | 4) {
            return Err(format!(
                "Tensor `{label}` has rank {}, but only ranks 0, 2, and 4 are supported.",
                ranges.len()
            ));
        }
        Ok(())
    }
}

impl TensorSpec {
    /// Returns a builder to construct a new tensor specification.
    pub fn builder() -> TensorSpecBuilder {
        TensorSpecBuilder::default()
    }

    /// Constructs an operand tensor specification.
    ///
    /// # Errors
    ///
    /// Errors when the label is empty or the rank is not 0, 2, or 4.
    pub fn operand(
        label: &str,
        tag: Option<usize>,
        ranges: &[IndexRange],
    ) -> Result<Self, anyhow::Error> {
        Self::builder()
            .label(label)
            .tag(tag)
            .ranges(ranges)
            .build()
            .map_err(|err| format_err!(err))
    }

    /// Constructs a projector tensor specification.
    ///
    /// # Errors
    ///
    /// Errors when the label is empty or the rank is not 0, 2, or 4.
    pub fn projector(
        label: &str,
        tag: Option<usize>,
        ranges: &[IndexRange],
    ) -> Result<Self, anyhow::Error> {
        Self::builder()
            .label(label)
            .tag(tag)
            .ranges(ranges)
            .projector(true)
            .build()
            .map_err(|err| format_err!(err))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tag(&self) -> Option<usize> {
        self.tag
    }

    pub fn ranges(&self) -> &[IndexRange] {
        &self.ranges
    }

    pub fn rank(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_projector(&self) -> bool {
        self.projector
    }

    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    /// Creates an instance of this tensor over fresh indices handed out by `factory`.
    pub fn instantiate(&self, factory: &mut IndexFactory) -> Tensor {
        Tensor {
            label: self.label.clone(),
            tag: self.tag,
            indices: self
                .ranges
                .iter()
                .map(|range| factory.next_index(*range))
                .collect(),
            declared: self.ranges.clone(),
            projector: self.projector,
            alpha: self.alpha,
        }
    }

    /// Emits the storage unit for this tensor label.
    pub fn generate(&self) -> String {
        CxxEmitter::default().tensor_unit(&TensorUnit::new(&self.label, self.rank()))
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}[{}]",
            self.label,
            self.tag.map(|t| t.to_string()).unwrap_or_default(),
            self.ranges.iter().join(",")
        )
    }
}

// ------
// Tensor
// ------

/// A tensor instance over concrete indices. Two tensors are equal when their labels, tags, and
/// index ranges agree; index identities are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tensor {
    label: String,
    tag: Option<usize>,
    indices: Vec<Index>,

    /// The ranges the tensor was declared over, by position. A general declaration stays general
    /// after its index has been resolved.
    declared: Vec<IndexRange>,

    projector: bool,
    alpha: bool,
}

impl Tensor {
    /// Creates a tensor instance directly from its parts.
    pub fn new(label: &str, tag: Option<usize>, indices: &[Index], projector: bool) -> Self {
        Self {
            label: label.to_string(),
            tag,
            indices: indices.to_vec(),
            declared: indices.iter().map(|index| index.range()).collect(),
            projector,
            alpha: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tag(&self) -> Option<usize> {
        self.tag
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    pub fn is_projector(&self) -> bool {
        self.projector
    }

    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    pub(crate) fn set_alpha(&mut self, alpha: bool) {
        self.alpha = alpha;
    }

    pub fn declared_ranges(&self) -> &[IndexRange] {
        &self.declared
    }

    pub(crate) fn set_declared_ranges(&mut self, ranges: &[IndexRange]) {
        self.declared = ranges.to_vec();
    }

    /// Returns `true` if the index at every position can be contracted with the range declared
    /// there, *i.e.* if this index order addresses a block the tensor actually has.
    pub fn fits_declared(&self) -> bool {
        self.indices.len() == self.declared.len()
            && self
                .indices
                .iter()
                .zip(self.declared.iter())
                .all(|(index, range)| contractable(index.range(), *range))
    }

    /// Returns `true` if every index of this tensor runs over the active range.
    pub fn all_active(&self) -> bool {
        self.indices
            .iter()
            .all(|index| index.range() == IndexRange::Active)
    }

    /// Returns the string of range tags of the indices, *e.g.* `xxca`.
    pub fn range_signature(&self) -> String {
        self.indices.iter().map(|index| index.range().tag()).collect()
    }

    /// Returns a copy of this tensor with its indices in a different order.
    #[must_use]
    pub fn with_indices(&self, indices: &[Index]) -> Self {
        Self {
            indices: indices.to_vec(),
            ..self.clone()
        }
    }

    /// Returns a copy of this tensor with every index found in `map` replaced by its image.
    #[must_use]
    pub fn relabelled(&self, map: &IndexMap<Index, Index>) -> Self {
        Self {
            indices: self
                .indices
                .iter()
                .map(|index| *map.get(index).unwrap_or(index))
                .collect(),
            ..self.clone()
        }
    }

    /// Returns the block key expression of this tensor instance. The key lists the indices in
    /// reverse order.
    pub fn block_key(&self) -> String {
        block_key(&self.indices)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.tag == other.tag
            && self.indices.len() == other.indices.len()
            && self
                .indices
                .iter()
                .zip(other.indices.iter())
                .all(|(a, b)| a.range() == b.range())
    }
}

impl Eq for Tensor {}

impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
        self.tag.hash(state);
        for index in self.indices.iter() {
            index.range().hash(state);
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.label,
            self.indices.iter().map(|index| index.str(false)).join(", ")
        )
    }
}
