//! Active-space reduction of operator strings into spin-free reduced density matrices.
//!
//! After all closed and virtual operators of a diagram have been contracted, the remaining
//! active operators form a string whose expectation value over the reference is expressed through
//! spin-free reduced density matrices (RDMs). The string is brought into normal order (all
//! creation operators to the left) by repeated use of
//! ```math
//!     a_p a^\dagger_q = \delta_{pq} - a^\dagger_q a_p,
//! ```
//! and each normal-ordered leaf is identified with one RDM, possibly multiplied by Kronecker
//! deltas between active indices.

use std::fmt;

use anyhow::{self, ensure, format_err};
use approx::abs_diff_eq;
use indexmap::IndexMap;
use itertools::Itertools;
use log;

use crate::emit::{CxxEmitter, RdmSource};
use crate::index::{Index, Spin};
use crate::operator::{Role, Slot};
use crate::permutation::Permutation;
use crate::tensor::Tensor;


/// Threshold below which an accumulated RDM factor is considered zero.
const ZERO_THRESHOLD: f64 = 1e-12;

// ===
// Rdm
// ===

/// A spin-free reduced density matrix $`\Gamma_{p_0 q_0, p_1 q_1, \ldots}`$ scaled by a factor and
/// subject to Kronecker-delta constraints between active indices.
#[derive(Clone, Debug, PartialEq)]
pub struct Rdm {
    /// The indices in the order $`p_0, q_0, p_1, q_1, \ldots`$, where $`p_k`$ is a creation index
    /// and $`q_k`$ its spin partner.
    indices: Vec<Index>,

    /// The delta constraints. Each pair is ordered by index number and the list is sorted.
    deltas: Vec<(Index, Index)>,

    factor: f64,
}

impl Rdm {
    /// Creates an RDM term, normalising the ordering of its delta constraints.
    pub fn new(indices: &[Index], deltas: &[(Index, Index)], factor: f64) -> Self {
        let mut deltas = deltas
            .iter()
            .map(|&(a, b)| if a.num() <= b.num() { (a, b) } else { (b, a) })
            .collect_vec();
        deltas.sort();
        Self {
            indices: indices.to_vec(),
            deltas,
            factor,
        }
    }

    /// Returns the rank of the RDM, *i.e.* half the number of its indices.
    pub fn rank(&self) -> usize {
        self.indices.len() / 2
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn deltas(&self) -> &[(Index, Index)] {
        &self.deltas
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Returns `true` if `other` has the same indices and delta constraints.
    pub fn same_structure(&self, other: &Rdm) -> bool {
        self.indices == other.indices && self.deltas == other.deltas
    }

    /// Returns a copy with every index found in `map` replaced by its image.
    #[must_use]
    pub fn relabelled(&self, map: &IndexMap<Index, Index>) -> Self {
        let get = |index: &Index| *map.get(index).unwrap_or(index);
        Self::new(
            &self.indices.iter().map(get).collect_vec(),
            &self
                .deltas
                .iter()
                .map(|(a, b)| (get(a), get(b)))
                .collect_vec(),
            self.factor,
        )
    }

    /// Returns the structural key of the RDM, excluding its factor.
    pub fn structure_key(&self) -> String {
        format!(
            "rdm{}({})[{}]",
            self.rank(),
            self.indices.iter().join(","),
            self.deltas
                .iter()
                .map(|(a, b)| format!("{a}={b}"))
                .join(",")
        )
    }

    /// Emits the accumulation of this RDM into the block `odata` addressed by `loops`.
    ///
    /// # Errors
    ///
    /// Errors when an index of the RDM or of its delta constraints is absent from `loops`.
    pub fn generate(&self, loops: &[Index], source: RdmSource) -> Result<String, anyhow::Error> {
        CxxEmitter::default().rdm(self, loops, None, source)
    }

    /// Emits the accumulation of this RDM multiplied by a block of `merged`, summing over the
    /// indices of `merged` absent from `loops`.
    ///
    /// # Errors
    ///
    /// Errors when an index of the RDM or of its delta constraints is absent from both `loops`
    /// and `merged`.
    pub fn generate_mult(
        &self,
        loops: &[Index],
        merged: &Tensor,
        source: RdmSource,
    ) -> Result<String, anyhow::Error> {
        CxxEmitter::default().rdm(self, loops, Some(merged), source)
    }
}

impl fmt::Display for Rdm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.deltas.is_empty() {
            write!(
                f,
                "[{}] ",
                self.deltas
                    .iter()
                    .map(|(a, b)| format!("{a}={b}"))
                    .join(", ")
            )?;
        }
        write!(
            f,
            "{:+.2} Gamma{}({})",
            self.factor,
            self.rank(),
            self.indices.iter().join(", ")
        )
    }
}

// ============
// Normal order
// ============

#[derive(Clone, Debug)]
struct ActiveString {
    ops: Vec<(Index, Role, Spin)>,
    factor: f64,
    deltas: Vec<(Index, Index)>,
}

impl ActiveString {
    fn reduce(self, leaves: &mut Vec<Rdm>) -> Result<(), anyhow::Error> {
        let swap = self
            .ops
            .windows(2)
            .position(|pair| pair[0].1 == Role::Annihilation && pair[1].1 == Role::Creation);
        let Some(k) = swap else {
            leaves.push(self.into_rdm()?);
            return Ok(());
        };

        let mut swapped = self.clone();
        swapped.ops.swap(k, k + 1);
        swapped.factor *= -1.0;
        swapped.reduce(leaves)?;

        let mut contracted = self;
        let (ann, _, ann_spin) = contracted.ops.remove(k);
        let (cre, _, cre_spin) = contracted.ops.remove(k);
        contracted.deltas.push((ann, cre));
        if ann_spin.same_label(&cre_spin) {
            contracted.factor *= ann_spin.loop_factor();
        } else {
            let coupled = ann_spin.coupled_onto(&cre_spin);
            contracted
                .ops
                .iter_mut()
                .filter(|(_, _, spin)| spin.same_label(&ann_spin) || spin.same_label(&cre_spin))
                .for_each(|(_, _, spin)| *spin = coupled);
        }
        contracted.reduce(leaves)
    }

    fn into_rdm(self) -> Result<Rdm, anyhow::Error> {
        let (creations, annihilations): (Vec<_>, Vec<_>) = self
            .ops
            .iter()
            .partition(|(_, role, _)| role.is_creation());
        ensure!(
            creations.len() == annihilations.len(),
            "Unbalanced active string: {} creation and {} annihilation operators.",
            creations.len(),
            annihilations.len()
        );
        let partners = creations
            .iter()
            .map(|(cre, _, spin)| {
                annihilations
                    .iter()
                    .find(|(_, _, ann_spin)| ann_spin.same_label(spin))
                    .map(|(ann, _, _)| (*cre, *ann))
                    .ok_or_else(|| format_err!("Creation operator `{cre}` has no spin partner."))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let actual = annihilations.iter().map(|(ann, _, _)| *ann).collect_vec();
        let desired = partners.iter().rev().map(|(_, ann)| *ann).collect_vec();
        let sign = Permutation::sort_between(&actual, &desired)?.sign();
        let indices = partners
            .iter()
            .flat_map(|(cre, ann)| [*cre, *ann])
            .collect_vec();
        Ok(Rdm::new(&indices, &self.deltas, self.factor * sign))
    }
}

// ======
// Active
// ======

/// The active-space part of a term: the sum of RDM contributions over the active indices, and
/// optionally an all-active operand folded into it.
#[derive(Clone, Debug)]
pub struct Active {
    /// All active indices, sorted by number.
    indices: Vec<Index>,

    rdms: Vec<Rdm>,

    /// An all-active operand whose indices are summed inside the active part.
    merged: Option<Tensor>,
}

impl Active {
    /// Reduces the active slots of a fully contracted diagram into RDMs. Identical RDMs are
    /// combined and those whose factors cancel are dropped.
    ///
    /// # Errors
    ///
    /// Errors when the slots do not form a balanced string of spin pairs.
    pub fn reduce(slots: &[Slot]) -> Result<Self, anyhow::Error> {
        let string = ActiveString {
            ops: slots
                .iter()
                .map(|slot| (slot.index(), slot.role(), slot.spin()))
                .collect(),
            factor: 1.0,
            deltas: vec![],
        };
        let mut leaves = vec![];
        string.reduce(&mut leaves)?;
        let nleaves = leaves.len();

        let mut rdms: Vec<Rdm> = vec![];
        for leaf in leaves {
            if let Some(existing) = rdms.iter_mut().find(|rdm| rdm.same_structure(&leaf)) {
                existing.factor += leaf.factor;
            } else {
                rdms.push(leaf);
            }
        }
        rdms.retain(|rdm| !abs_diff_eq!(rdm.factor, 0.0, epsilon = ZERO_THRESHOLD));
        log::debug!(
            "Active string of {} operators reduced to {nleaves} leaves and {} RDM terms.",
            slots.len(),
            rdms.len()
        );

        let mut indices = slots.iter().map(|slot| slot.index()).collect_vec();
        indices.sort_by_key(|index| index.num());
        indices.dedup();
        Ok(Self {
            indices,
            rdms,
            merged: None,
        })
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn rdms(&self) -> &[Rdm] {
        &self.rdms
    }

    pub fn merged(&self) -> Option<&Tensor> {
        self.merged.as_ref()
    }

    /// Returns `true` if every RDM contribution has cancelled.
    pub fn is_zero(&self) -> bool {
        self.rdms.is_empty()
    }

    /// Folds an all-active operand into the active part.
    ///
    /// # Errors
    ///
    /// Errors when `tensor` has a non-active index or when an operand is already folded in.
    pub fn fold(&mut self, tensor: Tensor) -> Result<(), anyhow::Error> {
        ensure!(
            tensor.all_active(),
            "Only all-active tensors can be folded into the active part, but `{tensor}` is not."
        );
        ensure!(
            self.merged.is_none(),
            "An operand has already been folded into the active part."
        );
        self.merged = Some(tensor);
        Ok(())
    }

    /// Returns the indices of the stored active block: all active indices except those of the
    /// folded operand.
    pub fn storage_indices(&self) -> Vec<Index> {
        self.indices
            .iter()
            .filter(|index| {
                self.merged
                    .as_ref()
                    .map_or(true, |merged| !merged.indices().contains(index))
            })
            .copied()
            .collect()
    }

    /// Returns a copy with every index found in `map` replaced by its image.
    #[must_use]
    pub fn relabelled(&self, map: &IndexMap<Index, Index>) -> Self {
        let mut indices = self
            .indices
            .iter()
            .map(|index| *map.get(index).unwrap_or(index))
            .collect_vec();
        indices.sort_by_key(|index| index.num());
        Self {
            indices,
            rdms: self.rdms.iter().map(|rdm| rdm.relabelled(map)).collect(),
            merged: self.merged.as_ref().map(|merged| merged.relabelled(map)),
        }
    }

    /// Sorts the RDM terms by structure and rescales them so that the first has unit factor.
    ///
    /// # Returns
    ///
    /// The normalised active part and the factor taken out of it.
    #[must_use]
    pub fn normalised(&self) -> (Self, f64) {
        let mut rdms = self.rdms.clone();
        rdms.sort_by_cached_key(|rdm| rdm.structure_key());
        let scale = rdms.first().map_or(1.0, |rdm| rdm.factor);
        rdms.iter_mut().for_each(|rdm| rdm.factor /= scale);
        (
            Self {
                indices: self.indices.clone(),
                rdms,
                merged: self.merged.clone(),
            },
            scale,
        )
    }

    /// Returns a key identifying the content of the active part, factors included. The key does
    /// not depend on the order of the RDM terms.
    pub fn key(&self) -> String {
        format!(
            "Gamma({})<{}>{{{}}}",
            self.indices.iter().join(","),
            self.merged
                .as_ref()
                .map(|merged| format!("{}{:?}", merged, merged.tag()))
                .unwrap_or_default(),
            self.rdms
                .iter()
                .map(|rdm| format!("{:.8}*{}", rdm.factor, rdm.structure_key()))
                .sorted()
                .join("+")
        )
    }

    /// Emits the helper unit computing this active part into storage `name`.
    ///
    /// # Errors
    ///
    /// Errors when an RDM refers to an index absent from the active part.
    pub fn generate(&self, name: &str, source: RdmSource) -> Result<String, anyhow::Error> {
        CxxEmitter::default().active(name, self, source)
    }
}

impl fmt::Display for Active {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.rdms.iter().map(|rdm| rdm.to_string()).join(" ")
        )?;
        if let Some(merged) = self.merged.as_ref() {
            write!(f, " * {merged}")?;
        }
        Ok(())
    }
}
