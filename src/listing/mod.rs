//! Language-neutral listing of the derived equations, ready to be rendered by an
//! [`Emitter`](crate::emit::Emitter).

use std::fmt;

use anyhow::{self, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log;

use crate::active::{Active, Rdm};
use crate::emit::RdmSource;
use crate::equation::Equation;
use crate::index::Index;
use crate::tensor::{Tensor, TensorSpec};

#[cfg(test)]
#[path = "listing_tests.rs"]
mod listing_tests;

// ==========
// TensorUnit
// ==========

/// The storage declaration for one tensor label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorUnit {
    label: String,
    rank: usize,
}

impl TensorUnit {
    pub fn new(label: &str, rank: usize) -> Self {
        Self {
            label: label.to_string(),
            rank,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

// ==========
// ActiveUnit
// ==========

/// A helper unit filling the block storage of one distinct active part.
#[derive(Clone, Debug)]
pub struct ActiveUnit {
    name: String,
    active: Active,
    source: RdmSource,
}

impl ActiveUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active(&self) -> &Active {
        &self.active
    }

    pub fn source(&self) -> RdmSource {
        self.source
    }

    /// Returns the indices of the stored block, in storage order.
    pub fn indices(&self) -> Vec<Index> {
        self.active.storage_indices()
    }

    pub fn rdms(&self) -> &[Rdm] {
        self.active.rdms()
    }

    pub fn merged(&self) -> Option<&Tensor> {
        self.active.merged()
    }
}

/// A reference from an accumulation to an active helper unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveRef {
    pub name: String,

    /// The indices of the term addressing the stored block, in storage order.
    pub indices: Vec<Index>,
}

// ============
// EquationUnit
// ============

/// One accumulation statement together with the loops enclosing it.
#[derive(Clone, Debug)]
pub struct Accumulation {
    /// The left-hand side, addressed by the projector indices. `None` for scalar targets.
    pub target: Option<Tensor>,

    /// The loop indices: the target indices in declared order, then the remaining indices by
    /// number.
    pub loops: Vec<Index>,

    pub factor: f64,

    pub scalar: Option<String>,

    pub operands: Vec<Tensor>,

    pub active: Option<ActiveRef>,

    /// Boolean indicating if the reference enters through derivative RDMs.
    pub deriv: bool,

    /// A readable rendering of the term.
    pub comment: String,
}

/// The unit of one equation.
#[derive(Clone, Debug)]
pub struct EquationUnit {
    /// The labels of the merged source equations.
    pub labels: Vec<String>,

    /// The name of the host storage accumulated into.
    pub tree_label: String,

    /// Flags recording whether any term differentiates the bra or the ket.
    pub braket: (bool, bool),

    pub accumulations: Vec<Accumulation>,
}

// =======
// Listing
// =======

/// The complete derivation output: tensor declarations, active helper units, and equation units.
#[derive(Clone, Debug)]
pub struct Listing {
    method: String,
    tensors: IndexMap<String, TensorUnit>,
    actives: Vec<ActiveUnit>,

    /// Positions into [`Self::actives`] keyed by the content key of the relabelled active part.
    active_keys: IndexMap<String, usize>,

    equations: Vec<EquationUnit>,
}

impl Listing {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            tensors: IndexMap::new(),
            actives: vec![],
            active_keys: IndexMap::new(),
            equations: vec![],
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn tensors(&self) -> impl Iterator<Item = &TensorUnit> + '_ {
        self.tensors.values()
    }

    pub fn actives(&self) -> &[ActiveUnit] {
        &self.actives
    }

    pub fn equations(&self) -> &[EquationUnit] {
        &self.equations
    }

    /// Returns the tree labels of the equation units in order.
    pub fn tree_labels(&self) -> Vec<&str> {
        self.equations
            .iter()
            .map(|unit| unit.tree_label.as_str())
            .collect()
    }

    /// Declares the storage of a tensor label. Declaring a label again is a no-op.
    ///
    /// # Errors
    ///
    /// Errors when the label has already been declared with a different rank.
    pub fn add_tensor(&mut self, spec: &TensorSpec) -> Result<(), anyhow::Error> {
        if let Some(unit) = self.tensors.get(spec.label()) {
            ensure!(
                unit.rank == spec.rank(),
                "Tensor `{}` is declared with ranks {} and {}.",
                spec.label(),
                unit.rank,
                spec.rank()
            );
        } else {
            self.tensors.insert(
                spec.label().to_string(),
                TensorUnit::new(spec.label(), spec.rank()),
            );
        }
        Ok(())
    }

    /// Registers an active part, reusing an existing helper unit with the same content up to
    /// index renaming.
    fn register_active(&mut self, active: &Active, source: RdmSource) -> ActiveRef {
        let storage = active.storage_indices();
        let private = active
            .indices()
            .iter()
            .filter(|index| !storage.contains(index))
            .copied()
            .collect_vec();
        let map = storage
            .iter()
            .chain(private.iter())
            .enumerate()
            .map(|(num, index)| (*index, index.with_num(num)))
            .collect::<IndexMap<_, _>>();
        let key = format!("{source:?}:{}", active.relabelled(&map).key());
        let pos = match self.active_keys.get(&key) {
            Some(pos) => *pos,
            None => {
                let pos = self.actives.len();
                self.actives.push(ActiveUnit {
                    name: format!("Gamma{pos}"),
                    active: active.clone(),
                    source,
                });
                self.active_keys.insert(key, pos);
                pos
            }
        };
        ActiveRef {
            name: self.actives[pos].name.clone(),
            indices: storage,
        }
    }

    /// Lowers an equation into an equation unit, registering the active helper units it needs.
    ///
    /// # Errors
    ///
    /// Errors when the equation belongs to a different method.
    pub fn add_equation(&mut self, equation: &Equation) -> Result<(), anyhow::Error> {
        ensure!(
            equation.method() == self.method,
            "Equation `{}` of {} cannot be listed under {}.",
            equation.label(),
            equation.method(),
            self.method
        );
        let mut braket = (false, false);
        let mut accumulations = vec![];
        for term in equation.terms() {
            braket.0 |= term.braket().0;
            braket.1 |= term.braket().1;
            let source = if term.is_derivative() {
                RdmSource::Derivative
            } else {
                RdmSource::Reference
            };
            let active = term
                .active()
                .map(|active| self.register_active(active, source));

            let target_indices = term
                .target()
                .map(|target| target.indices().to_vec())
                .unwrap_or_default();
            let rest = term
                .operands()
                .iter()
                .flat_map(|operand| operand.indices().iter().copied())
                .chain(
                    active
                        .iter()
                        .flat_map(|active| active.indices.iter().copied()),
                )
                .filter(|index| !target_indices.contains(index))
                .unique()
                .sorted_by_key(|index| index.num())
                .collect_vec();
            let loops = target_indices
                .iter()
                .copied()
                .unique()
                .chain(rest)
                .collect_vec();

            accumulations.push(Accumulation {
                target: term.target().cloned(),
                loops,
                factor: term.factor(),
                scalar: term.scalar().map(|s| s.to_string()),
                operands: term.operands().to_vec(),
                active,
                deriv: term.is_derivative(),
                comment: term.to_string(),
            });
        }
        log::info!(
            "Listed equation `{}` into `{}`: {} accumulation(s), {} active unit(s) so far.",
            equation.sources().join(" + "),
            equation.tree_label(),
            accumulations.len(),
            self.actives.len()
        );
        self.equations.push(EquationUnit {
            labels: equation.sources().to_vec(),
            tree_label: equation.tree_label().to_string(),
            braket,
            accumulations,
        });
        Ok(())
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Theory: {}", self.method)?;
        writeln!(f, "Tensor units: {}", self.tensors.keys().join(", "))?;
        writeln!(f, "Active units: {}", self.actives.len())?;
        for unit in self.equations.iter() {
            writeln!(
                f,
                "  {:<6} <- {} ({} accumulation(s))",
                unit.tree_label,
                unit.labels.join(" + "),
                unit.accumulations.len()
            )?;
        }
        Ok(())
    }
}
