//! Products of operators and their full contraction.

use std::fmt;

use anyhow::{self, format_err};
use approx::abs_diff_eq;
use indexmap::IndexMap;
use itertools::Itertools;
use log;

use crate::index::{Index, SpinFactory};
use crate::operator::{Operator, Slot};
use crate::tensor::Tensor;


/// An enumerated type for the states of a diagram in the contraction search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagramState {
    /// No contraction has been carried out yet.
    Uncontracted,

    /// Some, but not all, non-active operators have been contracted.
    PartiallyContracted,

    /// Every non-active operator has been contracted. Only active operators may remain.
    FullyContracted,

    /// The diagram cannot contribute: its factor vanishes or its creation and annihilation
    /// operators can no longer be paired up.
    Dead,
}

/// An ordered product of operators together with the factor and the index constraints
/// accumulated while contracting it.
#[derive(Clone, Debug)]
pub struct Diagram {
    ops: Vec<Operator>,

    fac: f64,

    /// Index rewrites as `(old, new)` pairs, from contractions and from general indices assigned
    /// to the active range.
    deltas: Vec<(Index, Index)>,

    steps: usize,
}

impl Diagram {
    /// Builds the diagram for the product of `tensors`, in order.
    ///
    /// # Errors
    ///
    /// Errors when a tensor cannot be turned into an operator.
    pub fn new(tensors: &[Tensor]) -> Result<Self, anyhow::Error> {
        let mut spins = SpinFactory::default();
        let ops = tensors
            .iter()
            .map(|tensor| Operator::from_tensor(tensor, &mut spins))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ops,
            fac: 1.0,
            deltas: vec![],
            steps: 0,
        })
    }

    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    pub fn fac(&self) -> f64 {
        self.fac
    }

    pub fn deltas(&self) -> &[(Index, Index)] {
        &self.deltas
    }

    /// Returns the number of contraction steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn num_dagger(&self) -> usize {
        self.ops.iter().map(|op| op.num_dagger()).sum()
    }

    pub fn num_nodagger(&self) -> usize {
        self.ops.iter().map(|op| op.num_nodagger()).sum()
    }

    pub fn num_general(&self) -> usize {
        self.ops.iter().map(|op| op.num_general()).sum()
    }

    pub fn state(&self) -> DiagramState {
        if abs_diff_eq!(self.fac, 0.0) || self.num_dagger() != self.num_nodagger() {
            DiagramState::Dead
        } else if self.ops.iter().all(|op| op.contracted()) {
            DiagramState::FullyContracted
        } else if self.steps == 0 {
            DiagramState::Uncontracted
        } else {
            DiagramState::PartiallyContracted
        }
    }

    /// Returns the tensors of the operators with their current indices.
    pub fn tensors(&self) -> Vec<Tensor> {
        self.ops.iter().map(|op| op.to_tensor()).collect()
    }

    /// Returns the remaining active slots in product order.
    pub fn active_slots(&self) -> Vec<Slot> {
        self.ops
            .iter()
            .flat_map(|op| op.active_slots().copied())
            .collect()
    }

    /// Enumerates every fully contracted diagram: each split of the general indices into active
    /// and non-active ones is tried, and the non-active operators of each split are contracted in
    /// all possible ways.
    ///
    /// # Errors
    ///
    /// Errors when the contraction search violates an operator precondition.
    pub fn get_all(&self) -> Result<Vec<Diagram>, anyhow::Error> {
        let ngeneral = self.num_general();
        let mut leaves = vec![];
        for bits in 0..(1usize << ngeneral) {
            let mut split = self.clone();
            let mut remaining = bits;
            for op in split.ops.iter_mut() {
                split.deltas.extend(op.mutate_general(&mut remaining));
            }
            leaves.extend(split.contract_all()?);
        }
        log::debug!(
            "{} general split(s) of `{}` yield {} fully contracted diagram(s).",
            1usize << ngeneral,
            self.ops.iter().map(|op| op.label()).join(" "),
            leaves.len()
        );
        Ok(leaves)
    }

    /// Recursively contracts this diagram, returning every fully contracted descendant.
    ///
    /// # Errors
    ///
    /// Errors when the contraction search violates an operator precondition.
    pub fn contract_all(self) -> Result<Vec<Diagram>, anyhow::Error> {
        match self.state() {
            DiagramState::FullyContracted => return Ok(vec![self]),
            DiagramState::Dead => return Ok(vec![]),
            DiagramState::Uncontracted | DiagramState::PartiallyContracted => {}
        }
        let mut leaves = vec![];
        for skip in 0..self.num_nodagger() {
            if let Some(next) = self.reduce_one_noactive(skip)? {
                leaves.extend(next.contract_all()?);
            }
        }
        Ok(leaves)
    }

    fn offsets(&self) -> Vec<usize> {
        self.ops
            .iter()
            .scan(0, |acc, op| {
                let offset = *acc;
                *acc += op.slots().len();
                Some(offset)
            })
            .collect()
    }

    /// Contracts the first uncontracted non-active creation operator with the `skip`-th
    /// uncontracted non-active annihilation operator of the product, on a copy of this diagram.
    ///
    /// # Returns
    ///
    /// The contracted copy, or `None` if the pair cannot be contracted.
    ///
    /// # Errors
    ///
    /// Errors when no creation operator or no `skip`-th annihilation operator remains.
    pub fn reduce_one_noactive(&self, skip: usize) -> Result<Option<Diagram>, anyhow::Error> {
        let mut next = self.clone();
        let offsets = next.offsets();
        let k = next
            .ops
            .iter()
            .position(|op| op.num_dagger() > 0)
            .ok_or_else(|| format_err!("No creation operator left to contract in `{self}`."))?;
        let mut paired = next.ops[k].first_dagger_noactive()?;
        paired.position += offsets[k];

        let mut remaining = skip;
        let mut found = None;
        for (j, op) in next.ops.iter_mut().enumerate() {
            let n = op.num_nodagger();
            if remaining < n {
                found = Some((j, op.contract(&paired, offsets[j], remaining)));
                break;
            }
            remaining -= n;
        }
        let (j, contraction) = found.ok_or_else(|| {
            format_err!("Annihilation operator #{skip} does not exist in `{self}`.")
        })?;
        let Some(contraction) = contraction else {
            return Ok(None);
        };

        let partner_position = offsets[j] + contraction.position;
        let (lo, hi) = if paired.position < partner_position {
            (paired.position, partner_position)
        } else {
            (partner_position, paired.position)
        };
        let between = next
            .ops
            .iter()
            .flat_map(|op| op.slots())
            .enumerate()
            .filter(|(p, slot)| *p > lo && *p < hi && slot.is_live())
            .count();
        let sign = if between % 2 == 0 { 1.0 } else { -1.0 };
        next.fac *= sign * contraction.factor;

        let mut indices = IndexMap::new();
        for old in [paired.index, contraction.partner] {
            if !old.identical(&contraction.survivor) {
                indices.insert(old, contraction.survivor);
                next.deltas.push((old, contraction.survivor));
            }
        }
        let mut spins = IndexMap::new();
        if !contraction.closed_loop() {
            spins.insert(contraction.old_spin.num(), contraction.new_spin);
            spins.insert(paired.spin.num(), contraction.new_spin);
        }
        for op in next.ops.iter_mut() {
            op.refresh_indices(&indices, &spins);
        }
        next.steps += 1;
        Ok(Some(next))
    }
}

impl fmt::Display for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:+.2} {}",
            self.fac,
            self.ops.iter().map(|op| op.to_string()).join(" | ")
        )
    }
}
