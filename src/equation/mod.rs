//! Equations: labelled sums of fully contracted terms.

use std::fmt;

use anyhow::{self, ensure, format_err};
use approx::abs_diff_eq;
use derive_builder::Builder;
use indexmap::IndexMap;
use itertools::Itertools;
use log;
use serde::{Deserialize, Serialize};

use crate::active::Active;
use crate::diagram::Diagram;
use crate::emit::{CxxEmitter, Emitter};
use crate::index::{Index, IndexFactory, SpinFactory};
use crate::listing::Listing;
use crate::operator::Operator;
use crate::tensor::{Tensor, TensorSpec};

#[cfg(test)]
#[path = "equation_tests.rs"]
mod equation_tests;

/// Threshold below which a summed term factor is considered zero.
const ZERO_THRESHOLD: f64 = 1e-12;

// ========
// TreeType
// ========

/// An enumerated type for the kind of quantity an equation computes, used by the host package to
/// place the generated code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeType {
    #[default]
    Residual,
    Energy,
    Source,
    Norm,
    Density,
    Density1,
    Density2,
    Deci,
}

impl TreeType {
    /// Returns the name of the storage the host package provides for this kind of quantity.
    pub fn label(&self) -> &'static str {
        match self {
            TreeType::Residual => "r",
            TreeType::Energy => "energy",
            TreeType::Source => "s",
            TreeType::Norm => "n",
            TreeType::Density => "den2",
            TreeType::Density1 => "den1",
            TreeType::Density2 => "Den1",
            TreeType::Deci => "deci",
        }
    }
}

impl fmt::Display for TreeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TreeType::Residual => "residual",
            TreeType::Energy => "energy",
            TreeType::Source => "source",
            TreeType::Norm => "norm",
            TreeType::Density => "density",
            TreeType::Density1 => "density1",
            TreeType::Density2 => "density2",
            TreeType::Deci => "deci",
        };
        write!(f, "{name}")
    }
}

// ====
// Term
// ====

/// One fully contracted contribution to an equation.
#[derive(Clone, Debug)]
pub struct Term {
    /// The projector defining the left-hand side, if any.
    target: Option<Tensor>,

    operands: Vec<Tensor>,

    active: Option<Active>,

    factor: f64,

    /// The name of an external scalar multiplying the term, *e.g.* `e0`.
    scalar: Option<String>,

    /// Flags for derivatives with respect to the bra and ket reference coefficients.
    braket: (bool, bool),
}

impl Term {
    /// Builds the term of a fully contracted diagram. The active operators left over are reduced
    /// into RDMs, and an all-active operand labelled `merge_label` is folded into them.
    ///
    /// # Returns
    ///
    /// The term, or `None` if its RDM contributions cancel.
    ///
    /// # Errors
    ///
    /// Errors when the active reduction fails.
    pub fn from_diagram(
        diagram: &Diagram,
        spec: &EquationSpec,
    ) -> Result<Option<Self>, anyhow::Error> {
        let mut target = None;
        let mut operands = vec![];
        for tensor in diagram.tensors() {
            if tensor.is_projector() && target.is_none() {
                target = Some(tensor);
            } else {
                operands.push(tensor);
            }
        }

        let slots = diagram.active_slots();
        let active = if slots.is_empty() {
            None
        } else {
            let mut active = Active::reduce(&slots)?;
            if active.is_zero() {
                return Ok(None);
            }
            if let Some(label) = spec.merge_label.as_ref() {
                if let Some(pos) = operands
                    .iter()
                    .position(|op| op.label() == label && op.rank() > 0 && op.all_active())
                {
                    active.fold(operands.remove(pos))?;
                }
            }
            Some(active)
        };

        Ok(Some(Self {
            target,
            operands,
            active,
            factor: spec.factor * diagram.fac(),
            scalar: spec.scalar.clone(),
            braket: spec.braket,
        }))
    }

    pub fn target(&self) -> Option<&Tensor> {
        self.target.as_ref()
    }

    pub fn operands(&self) -> &[Tensor] {
        &self.operands
    }

    pub fn active(&self) -> Option<&Active> {
        self.active.as_ref()
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn scalar(&self) -> Option<&str> {
        self.scalar.as_deref()
    }

    pub fn braket(&self) -> (bool, bool) {
        self.braket
    }

    /// Returns `true` if the term involves derivative RDMs.
    pub fn is_derivative(&self) -> bool {
        self.braket.0 || self.braket.1
    }

    /// Returns every index of the term in order of first appearance: target, operands, then the
    /// folded operand and the remaining active indices.
    pub fn indices(&self) -> Vec<Index> {
        self.target
            .iter()
            .chain(self.operands.iter())
            .chain(self.active.iter().flat_map(|active| active.merged()))
            .flat_map(|tensor| tensor.indices().iter().copied())
            .chain(
                self.active
                    .iter()
                    .flat_map(|active| active.indices().iter().copied()),
            )
            .unique()
            .collect()
    }

    fn relabelled(&self, target: Option<Tensor>, operands: Vec<Tensor>) -> (Self, String) {
        let staged = Self {
            target,
            operands,
            ..self.clone()
        };
        let map = staged
            .indices()
            .into_iter()
            .enumerate()
            .map(|(num, index)| (index, index.with_num(num)))
            .collect::<IndexMap<_, _>>();
        let (active, scale) = match staged.active.as_ref() {
            Some(active) => {
                let (normalised, scale) = active.relabelled(&map).normalised();
                (Some(normalised), scale)
            }
            None => (None, 1.0),
        };
        let relabelled = Self {
            target: staged.target.as_ref().map(|t| t.relabelled(&map)),
            operands: staged.operands.iter().map(|t| t.relabelled(&map)).collect(),
            active,
            factor: staged.factor * scale,
            scalar: staged.scalar.clone(),
            braket: staged.braket,
        };
        let key = relabelled.key();
        (relabelled, key)
    }

    /// Returns the structural key of the term, excluding its overall factor.
    pub fn key(&self) -> String {
        let tensor_key = |t: &Tensor| format!("{}#{:?}{t}", t.label(), t.tag());
        format!(
            "{}|{}|{}|{}|{:?}",
            self.target.as_ref().map(tensor_key).unwrap_or_default(),
            self.operands.iter().map(tensor_key).join("*"),
            self.active
                .as_ref()
                .map(|active| active.key())
                .unwrap_or_default(),
            self.scalar.as_deref().unwrap_or_default(),
            self.braket
        )
    }

    /// Brings the term into canonical form. Every pair ordering of the projector and of each
    /// operand that fits the declared ranges is tried, together with every ordering of the
    /// operands sorted by label; indices are renumbered in order of first appearance and
    /// the ordering with the smallest key is chosen.
    ///
    /// # Returns
    ///
    /// The canonical term and its key.
    ///
    /// # Errors
    ///
    /// Errors when a tensor cannot be turned into an operator.
    pub fn canonicalised(&self) -> Result<(Self, String), anyhow::Error> {
        let target_orderings = match self.target.as_ref() {
            Some(target) => pair_orderings(target, true)?
                .into_iter()
                .map(Some)
                .collect_vec(),
            None => vec![None],
        };
        let operand_orderings = self
            .operands
            .iter()
            .map(|operand| pair_orderings(operand, false))
            .collect::<Result<Vec<_>, _>>()?;
        let sort_key = |t: &Tensor| (t.label().to_string(), t.tag());
        let n = self.operands.len();

        let mut best: Option<(Self, String)> = None;
        for order in (0..n).permutations(n) {
            let sorted = order
                .iter()
                .map(|&i| sort_key(&self.operands[i]))
                .tuple_windows()
                .all(|(a, b)| a <= b);
            if !sorted {
                continue;
            }
            let choices = order
                .iter()
                .map(|&i| operand_orderings[i].iter())
                .multi_cartesian_product()
                .map(|choice| choice.into_iter().cloned().collect_vec());
            // `multi_cartesian_product` of nothing yields nothing.
            let choices: Vec<Vec<Tensor>> = if n == 0 {
                vec![vec![]]
            } else {
                choices.collect()
            };
            for target in target_orderings.iter() {
                for operands in choices.iter() {
                    let candidate = self.relabelled(target.clone(), operands.clone());
                    if best.as_ref().map_or(true, |(_, key)| candidate.1 < *key) {
                        best = Some(candidate);
                    }
                }
            }
        }
        best.ok_or_else(|| format_err!("No canonical ordering found for term `{self}`."))
    }
}

/// Returns the pair orderings of `tensor` whose indices still fit the declared ranges, starting
/// with the current one. A position declared general accepts any resolved range.
fn pair_orderings(tensor: &Tensor, proj: bool) -> Result<Vec<Tensor>, anyhow::Error> {
    let mut op = Operator::from_tensor(tensor, &mut SpinFactory::default())?;
    let mut orderings = vec![tensor.clone()];
    while op.permute(proj).0 {
        let permuted = tensor.with_indices(op.to_tensor().indices());
        if permuted.fits_declared() {
            orderings.push(permuted);
        }
    }
    Ok(orderings)
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lhs = self
            .target
            .as_ref()
            .map(|t| t.indices().iter().join(", "))
            .unwrap_or_default();
        write!(f, "[{lhs}] <- {:+.2}", self.factor)?;
        if let Some(scalar) = self.scalar.as_ref() {
            write!(f, " {scalar}")?;
        }
        for operand in self.operands.iter() {
            write!(f, " {operand}")?;
        }
        if let Some(active) = self.active.as_ref() {
            write!(f, " {{{active}}}")?;
        }
        Ok(())
    }
}

// ============
// EquationSpec
// ============

/// A structure describing an equation: the tensor families whose cartesian product defines its
/// terms, and the prefactors applied to all of them.
#[derive(Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct EquationSpec {
    /// The name of the method, *e.g.* `CASPT2`.
    #[builder(setter(into))]
    method: String,

    #[builder(setter(into))]
    label: String,

    /// The tensor families, in product order.
    #[builder(setter(custom))]
    families: Vec<Vec<TensorSpec>>,

    #[builder(default = "1.0")]
    factor: f64,

    /// The name of an external scalar multiplying every term.
    #[builder(setter(into, strip_option), default = "None")]
    scalar: Option<String>,

    /// Flags for derivatives with respect to the bra and ket reference coefficients.
    #[builder(default = "(false, false)")]
    braket: (bool, bool),

    /// The label of the all-active operand to be folded into the active part of each term.
    #[builder(default = "None")]
    merge_label: Option<String>,
}

impl EquationSpecBuilder {
    pub fn families(&mut self, families: &[Vec<TensorSpec>]) -> &mut Self {
        self.families = Some(families.to_vec());
        self
    }

    fn validate(&self) -> Result<(), String> {
        let families = self.families.as_ref().ok_or("No tensor families set.")?;
        if families.is_empty() || families.iter().any(|family| family.is_empty()) {
            return Err("Tensor families must not be empty.".to_string());
        }
        if let Some((true, true)) = self.braket {
            return Err("An equation cannot differentiate both bra and ket at once.".to_string());
        }
        Ok(())
    }
}

impl EquationSpec {
    /// Returns a builder to construct a new equation specification.
    pub fn builder() -> EquationSpecBuilder {
        EquationSpecBuilder::default()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

// ========
// Equation
// ========

/// A labelled sum of canonical terms computing one quantity.
#[derive(Clone, Debug)]
pub struct Equation {
    method: String,
    label: String,

    /// The labels of the equations merged into this one, its own first.
    sources: Vec<String>,

    kind: TreeType,
    subkind: Option<TreeType>,

    /// The terms keyed by their canonical keys.
    terms: IndexMap<String, Term>,
}

impl Equation {
    /// Builds the equation described by `spec`: one diagram per element of the cartesian product
    /// of its tensor families, each fully contracted, with equivalent terms combined.
    ///
    /// # Errors
    ///
    /// Errors when a diagram cannot be built or contracted.
    pub fn new(spec: &EquationSpec) -> Result<Self, anyhow::Error> {
        let mut equation = Self {
            method: spec.method.clone(),
            label: spec.label.clone(),
            sources: vec![spec.label.clone()],
            kind: TreeType::default(),
            subkind: None,
            terms: IndexMap::new(),
        };
        let mut ndiagrams = 0;
        let mut nleaves = 0;
        for product in spec
            .families
            .iter()
            .map(|family| family.iter())
            .multi_cartesian_product()
        {
            let mut factory = IndexFactory::default();
            let tensors = product
                .iter()
                .map(|tensor| tensor.instantiate(&mut factory))
                .collect_vec();
            let diagram = Diagram::new(&tensors).map_err(|err| {
                format_err!("{err} (while building a term of equation `{}`)", spec.label)
            })?;
            ndiagrams += 1;
            for leaf in diagram.get_all()? {
                nleaves += 1;
                if let Some(term) = Term::from_diagram(&leaf, spec)? {
                    equation.accumulate(term)?;
                }
            }
        }
        equation.tidy();
        log::debug!(
            "Equation `{}`: {ndiagrams} diagram(s), {nleaves} contraction(s), {} distinct term(s).",
            equation.label,
            equation.terms.len()
        );
        Ok(equation)
    }

    fn accumulate(&mut self, term: Term) -> Result<(), anyhow::Error> {
        let (canonical, key) = term.canonicalised()?;
        if let Some(existing) = self.terms.get_mut(&key) {
            existing.factor += canonical.factor;
        } else {
            self.terms.insert(key, canonical);
        }
        Ok(())
    }

    fn tidy(&mut self) {
        self.terms
            .retain(|_, term| !abs_diff_eq!(term.factor, 0.0, epsilon = ZERO_THRESHOLD));
        self.terms.sort_keys();
    }

    /// Merges the terms of `other` into this equation, summing the factors of equivalent terms
    /// and dropping those that cancel.
    ///
    /// # Errors
    ///
    /// Errors when the two equations belong to different methods.
    pub fn merge(&mut self, other: &Equation) -> Result<(), anyhow::Error> {
        ensure!(
            self.method == other.method,
            "Unable to merge equation `{}` of {} into `{}` of {}.",
            other.label,
            other.method,
            self.label,
            self.method
        );
        for (key, term) in other.terms.iter() {
            if let Some(existing) = self.terms.get_mut(key) {
                existing.factor += term.factor;
            } else {
                self.terms.insert(key.clone(), term.clone());
            }
        }
        self.sources.extend(other.sources.iter().cloned());
        self.tidy();
        Ok(())
    }

    /// Tags the equation with the kind of quantity it computes. The subkind, when given, takes
    /// precedence.
    pub fn set_tree_type(&mut self, kind: TreeType, subkind: Option<TreeType>) {
        self.kind = kind;
        self.subkind = subkind;
    }

    pub fn tree_type(&self) -> TreeType {
        self.subkind.unwrap_or(self.kind)
    }

    /// Returns the name of the host storage this equation accumulates into.
    pub fn tree_label(&self) -> &'static str {
        self.tree_type().label()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Returns the terms in canonical order.
    pub fn terms(&self) -> impl Iterator<Item = &Term> + '_ {
        self.terms.values()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    /// Emits the unit of this equation, preceded by the active helper units its statements read.
    /// Helper numbering starts at `Gamma0` on every call; equations sharing one output should be
    /// added to a single [`Listing`] instead.
    ///
    /// # Errors
    ///
    /// Errors when a term refers to an index that no loop provides.
    pub fn generate(&self) -> Result<String, anyhow::Error> {
        let mut listing = Listing::new(&self.method);
        listing.add_equation(self)?;
        let emitter = CxxEmitter::default();
        let mut out = String::new();
        for unit in listing.actives() {
            out.push_str(&emitter.active_unit(unit)?);
        }
        for unit in listing.equations() {
            out.push_str(&emitter.equation_unit(unit)?);
        }
        Ok(out)
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({}, {} term(s))",
            self.sources.join(" + "),
            self.tree_type(),
            self.terms.len()
        )?;
        for term in self.terms.values() {
            writeln!(f, "  {term}")?;
        }
        Ok(())
    }
}
