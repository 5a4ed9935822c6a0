//! Second-quantised spin-summed operators and their contraction algebra.

use std::fmt;

use anyhow::{self, bail, format_err};
use indexmap::IndexMap;
use itertools::Itertools;

use crate::index::{Index, IndexRange, Spin, SpinFactory};
use crate::permutation::Permutation;
use crate::tensor::Tensor;

#[cfg(test)]
#[path = "operator_tests.rs"]
mod operator_tests;

// ==================
// Struct definitions
// ==================

// ----
// Slot
// ----

/// An enumerated type for the role of an elementary operator in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Variant for creation operators $`a^\dagger`$.
    Creation,

    /// Variant for annihilation operators $`a`$.
    Annihilation,
}

impl Role {
    pub fn is_creation(&self) -> bool {
        matches!(self, Role::Creation)
    }
}

/// An enumerated type for the contraction state of a slot. A slot only ever moves from
/// [`SlotKind::Normal`] to [`SlotKind::Contracted`], or from [`SlotKind::Normal`] to
/// [`SlotKind::Active`] when a general index is assigned to the active range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// The slot has been contracted out.
    Contracted,

    /// The slot still holds an elementary operator to be contracted.
    Normal,

    /// The slot holds an active-space operator left for reduced-density-matrix reduction.
    Active,
}

/// One elementary operator within an [`Operator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    index: Index,
    role: Role,
    kind: SlotKind,
    spin: Spin,
}

impl Slot {
    fn new(index: Index, role: Role, spin: Spin) -> Self {
        let kind = if index.range() == IndexRange::Active {
            SlotKind::Active
        } else {
            SlotKind::Normal
        };
        Self {
            index,
            role,
            kind,
            spin,
        }
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn spin(&self) -> Spin {
        self.spin
    }

    /// Returns `true` if the slot has not been contracted out.
    pub fn is_live(&self) -> bool {
        self.kind != SlotKind::Contracted
    }

    fn is_normal(&self, role: Role) -> bool {
        self.kind == SlotKind::Normal && self.role == role
    }

    fn is_active(&self, role: Role) -> bool {
        self.kind == SlotKind::Active && self.role == role
    }
}

// -----------
// Contraction
// -----------

/// A creation operator taken out of an operator by [`Operator::first_dagger_noactive`], waiting
/// to be paired with an annihilation operator.
#[derive(Clone, Copy, Debug)]
pub struct Paired {
    /// The index of the creation operator.
    pub index: Index,

    /// The spin label of the creation operator.
    pub spin: Spin,

    /// The position of the creation operator in the product the operator belongs to.
    pub position: usize,
}

/// The outcome of a successful contraction step.
#[derive(Clone, Copy, Debug)]
pub struct Contraction {
    /// The spin factor of the step: the loop factor when a spin loop is closed, or 1 otherwise.
    pub factor: f64,

    /// The position of the annihilation partner within its operator.
    pub position: usize,

    /// The spin label replaced by the step.
    pub old_spin: Spin,

    /// The spin label that replaces [`Self::old_spin`].
    pub new_spin: Spin,

    /// The index of the annihilation partner before the step.
    pub partner: Index,

    /// The index that remains visible after the step.
    pub survivor: Index,
}

impl Contraction {
    /// Returns `true` if this step closed a spin loop.
    pub fn closed_loop(&self) -> bool {
        self.old_spin.same_label(&self.new_spin)
    }
}

// --------
// Operator
// --------

/// An enumerated type for the variants of spin-summed operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorVariant {
    /// Excitation operators with at least one index of specific range.
    Excitation,

    /// Hamiltonian-like operators whose indices all run over the general range.
    General,

    /// Operators lying entirely within the active space.
    Active,
}

impl OperatorVariant {
    fn from_ranges(ranges: &[IndexRange]) -> Self {
        if ranges.is_empty() {
            OperatorVariant::Excitation
        } else if ranges.iter().all(|range| range.is_general()) {
            OperatorVariant::General
        } else if ranges.iter().all(|range| *range == IndexRange::Active) {
            OperatorVariant::Active
        } else {
            OperatorVariant::Excitation
        }
    }
}

/// A spin-summed one- or two-body operator built from a tensor.
///
/// The one-body operator $`E(i_0, i_1)`$ has slots $`a^\dagger_{i_0} a_{i_1}`$. The two-body
/// operator $`E(i_0, i_1, i_2, i_3)`$ has slots $`a^\dagger_{i_0} a^\dagger_{i_1} a_{i_2}
/// a_{i_3}`$ with spin pairs $`(i_0, i_3)`$ and $`(i_1, i_2)`$. The slot order is always the
/// index order of the underlying tensor.
#[derive(Clone, Debug)]
pub struct Operator {
    variant: OperatorVariant,
    label: String,
    tag: Option<usize>,
    projector: bool,
    alpha: bool,
    slots: Vec<Slot>,

    /// The ranges of the underlying tensor as declared, in construction order.
    declared: Vec<IndexRange>,

    /// The current ordering of the spin pairs, as positions into the construction order.
    perm: Vec<usize>,
}

impl Operator {
    /// Constructs an operator from a tensor instance, drawing one spin label per spin pair from
    /// `spins`.
    ///
    /// # Errors
    ///
    /// Errors when the tensor rank is not 0, 2, or 4.
    pub fn from_tensor(tensor: &Tensor, spins: &mut SpinFactory) -> Result<Self, anyhow::Error> {
        let indices = tensor.indices();
        let alpha = tensor.is_alpha();
        let slots = match indices {
            [] => vec![],
            [i0, i1] => {
                let s0 = spins.next_spin(alpha);
                vec![
                    Slot::new(*i0, Role::Creation, s0),
                    Slot::new(*i1, Role::Annihilation, s0),
                ]
            }
            [i0, i1, i2, i3] => {
                let s0 = spins.next_spin(alpha);
                let s1 = spins.next_spin(alpha);
                vec![
                    Slot::new(*i0, Role::Creation, s0),
                    Slot::new(*i1, Role::Creation, s1),
                    Slot::new(*i2, Role::Annihilation, s1),
                    Slot::new(*i3, Role::Annihilation, s0),
                ]
            }
            _ => bail!(
                "Unable to build an operator from `{tensor}`: rank {} is not supported.",
                indices.len()
            ),
        };
        let ranges = indices.iter().map(|index| index.range()).collect_vec();
        Ok(Self {
            variant: OperatorVariant::from_ranges(&ranges),
            label: tensor.label().to_string(),
            tag: tensor.tag(),
            projector: tensor.is_projector(),
            alpha,
            perm: (0..slots.len() / 2).collect(),
            slots,
            declared: tensor.declared_ranges().to_vec(),
        })
    }

    pub fn variant(&self) -> OperatorVariant {
        self.variant
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_projector(&self) -> bool {
        self.projector
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Returns the tensor whose indices are the current slot indices in slot order.
    pub fn to_tensor(&self) -> Tensor {
        let mut tensor = Tensor::new(
            &self.label,
            self.tag,
            &self.slots.iter().map(|slot| slot.index).collect_vec(),
            self.projector,
        );
        tensor.set_alpha(self.alpha);
        tensor.set_declared_ranges(&self.declared);
        tensor
    }

    /// Returns `true` if no slot of this operator remains to be contracted.
    pub fn contracted(&self) -> bool {
        self.slots.iter().all(|slot| slot.kind != SlotKind::Normal)
    }

    /// Returns `true` if this operator still carries general indices to be contracted.
    pub fn general(&self) -> bool {
        self.num_general() > 0
    }

    /// Counts the uncontracted slots over the general range.
    pub fn num_general(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.kind == SlotKind::Normal && slot.index.range().is_general())
            .count()
    }

    pub fn num_active_dagger(&self) -> usize {
        self.count_slots(|slot| slot.is_active(Role::Creation))
    }

    pub fn num_active_nodagger(&self) -> usize {
        self.count_slots(|slot| slot.is_active(Role::Annihilation))
    }

    pub fn num_dagger(&self) -> usize {
        self.count_slots(|slot| slot.is_normal(Role::Creation))
    }

    pub fn num_nodagger(&self) -> usize {
        self.count_slots(|slot| slot.is_normal(Role::Annihilation))
    }

    fn count_slots<F: Fn(&Slot) -> bool>(&self, pred: F) -> usize {
        self.slots.iter().filter(|slot| pred(slot)).count()
    }

    /// Assigns uncontracted general slots to the active range according to `bits`. One bit is
    /// consumed per general slot in slot order, least-significant bit first; a set bit turns the
    /// slot active. The consumed bits are shifted out of `bits`.
    ///
    /// # Returns
    ///
    /// The re-tagged indices as `(old, new)` pairs.
    pub fn mutate_general(&mut self, bits: &mut usize) -> Vec<(Index, Index)> {
        let mut retags = vec![];
        for slot in self
            .slots
            .iter_mut()
            .filter(|slot| slot.kind == SlotKind::Normal && slot.index.range().is_general())
        {
            if *bits & 1 == 1 {
                let old = slot.index;
                slot.index = old.with_range(IndexRange::Active);
                slot.kind = SlotKind::Active;
                retags.push((old, slot.index));
            }
            *bits >>= 1;
        }
        retags
    }

    /// Takes out the first uncontracted, non-active creation operator, marking its slot as
    /// contracted. The returned position is local to this operator.
    ///
    /// # Errors
    ///
    /// Errors when no such creation operator remains.
    pub fn first_dagger_noactive(&mut self) -> Result<Paired, anyhow::Error> {
        let (position, slot) = self
            .slots
            .iter_mut()
            .find_position(|slot| slot.is_normal(Role::Creation))
            .ok_or_else(|| {
                format_err!(
                    "Operator `{}` has no uncontracted non-active creation operator left.",
                    self.label
                )
            })?;
        slot.kind = SlotKind::Contracted;
        Ok(Paired {
            index: slot.index,
            spin: slot.spin,
            position,
        })
    }

    /// Attempts to contract `paired` with the `skip`-th uncontracted annihilation operator of
    /// this operator, whose slots start at position `offset` in the product.
    ///
    /// A closed-range pair only contracts when the creation operator stands to the left of the
    /// annihilation operator, and a virtual-range pair only when it stands to the right. A
    /// general-general pair resolves to whichever of the two the ordering permits.
    ///
    /// # Returns
    ///
    /// The contraction outcome, or `None` if the pair is not contractable. The annihilation slot
    /// is marked as contracted only on success.
    pub fn contract(&mut self, paired: &Paired, offset: usize, skip: usize) -> Option<Contraction> {
        let (position, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.is_normal(Role::Annihilation))
            .nth(skip)?;
        if !paired.index.contractable(&slot.index) {
            return None;
        }
        let creation_left = paired.position < offset + position;
        let resolved = match (paired.index.range(), slot.index.range()) {
            (IndexRange::General, IndexRange::General) => {
                if creation_left {
                    IndexRange::Closed
                } else {
                    IndexRange::Virtual
                }
            }
            (IndexRange::General, range) | (range, _) => range,
        };
        let allowed = match resolved {
            IndexRange::Closed => creation_left,
            IndexRange::Virtual => !creation_left,
            IndexRange::Active | IndexRange::General => false,
        };
        if !allowed {
            return None;
        }

        slot.kind = SlotKind::Contracted;
        let (factor, old_spin, new_spin) = if paired.spin.same_label(&slot.spin) {
            (slot.spin.loop_factor(), slot.spin, slot.spin)
        } else {
            (1.0, slot.spin, slot.spin.coupled_onto(&paired.spin))
        };
        Some(Contraction {
            factor,
            position,
            old_spin,
            new_spin,
            partner: slot.index,
            survivor: Self::survive(&paired.index, &slot.index, resolved),
        })
    }

    /// Selects the index that remains visible after contracting creation index `a` with
    /// annihilation index `b` over the `resolved` range. A general index never survives over a
    /// specific one; otherwise the creation index survives, re-tagged to `resolved`.
    pub fn survive(a: &Index, b: &Index, resolved: IndexRange) -> Index {
        if a.range().is_general() && !b.range().is_general() {
            *b
        } else {
            a.with_range(resolved)
        }
    }

    /// Rewrites slot indices through `indices` and slot spins through `spins` (keyed by spin
    /// label number).
    ///
    /// # Returns
    ///
    /// `true` if the operator is fully contracted afterwards.
    pub fn refresh_indices(
        &mut self,
        indices: &IndexMap<Index, Index>,
        spins: &IndexMap<usize, Spin>,
    ) -> bool {
        for slot in self.slots.iter_mut() {
            if let Some(index) = indices.get(&slot.index) {
                slot.index = *index;
            }
            if let Some(spin) = spins.get(&slot.spin.num()) {
                slot.spin = *spin;
            }
        }
        self.contracted()
    }

    /// Returns the spin pairs in construction order as `(creation, annihilation)` slots.
    fn construction_pairs(&self) -> Vec<(Slot, Slot)> {
        let n = self.slots.len();
        let mut pairs = vec![None; self.perm.len()];
        for (k, &p) in self.perm.iter().enumerate() {
            pairs[p] = Some((self.slots[k], self.slots[n - 1 - k]));
        }
        pairs.into_iter().flatten().collect()
    }

    fn arrange(pairs: &[(Slot, Slot)], perm: &[usize]) -> Vec<Slot> {
        perm.iter()
            .map(|&p| pairs[p].0)
            .chain(perm.iter().rev().map(|&p| pairs[p].1))
            .collect()
    }

    /// Advances the operator to the next ordering of its spin pairs. For a projector (`proj`
    /// set), orderings that alter the range signature are skipped.
    ///
    /// # Returns
    ///
    /// Whether a new ordering was produced, and the sign of the slot reordering. When the
    /// orderings are exhausted the operator returns to its construction order and `false` is
    /// returned.
    pub fn permute(&mut self, proj: bool) -> (bool, f64) {
        let pairs = self.construction_pairs();
        let base_signature = Self::arrange(&pairs, &(0..pairs.len()).collect_vec())
            .iter()
            .map(|slot| slot.index.range())
            .collect_vec();
        let before = self.slots.iter().map(|slot| slot.index).collect_vec();
        loop {
            if !next_permutation(&mut self.perm) {
                self.slots = Self::arrange(&pairs, &self.perm);
                return (false, 1.0);
            }
            let slots = Self::arrange(&pairs, &self.perm);
            if proj
                && slots
                    .iter()
                    .map(|slot| slot.index.range())
                    .ne(base_signature.iter().copied())
            {
                continue;
            }
            self.slots = slots;
            let after = self.slots.iter().map(|slot| slot.index).collect_vec();
            let sign = Permutation::sort_between(&before, &after)
                .map(|perm| perm.sign())
                .unwrap_or(1.0);
            return (true, sign);
        }
    }

    /// Returns `true` if `other` is the same operator over identical indices with identical
    /// contraction states.
    pub fn identical(&self, other: &Operator) -> bool {
        self.variant == other.variant
            && self.label == other.label
            && self.tag == other.tag
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(other.slots.iter())
                .all(|(a, b)| a.index.identical(&b.index) && a.role == b.role && a.kind == b.kind)
    }

    /// Returns the active slots in slot order.
    pub fn active_slots(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.kind == SlotKind::Active)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.variant {
            OperatorVariant::Excitation => "E",
            OperatorVariant::General => "H",
            OperatorVariant::Active => "A",
        };
        let body = self
            .slots
            .iter()
            .map(|slot| {
                let mark = match slot.kind {
                    SlotKind::Contracted => "*",
                    SlotKind::Normal => "",
                    SlotKind::Active => "~",
                };
                format!(
                    "{}{mark}({})",
                    slot.index.str(slot.role.is_creation()),
                    slot.spin
                )
            })
            .join(" ");
        write!(f, "{prefix}[{}] {body}", self.label)
    }
}

/// Rearranges `v` into the lexicographically next permutation. When `v` is the last permutation
/// it is reset to the first one and `false` is returned.
fn next_permutation(v: &mut [usize]) -> bool {
    let n = v.len();
    if n < 2 {
        return false;
    }
    let Some(i) = (0..n - 1).rev().find(|&i| v[i] < v[i + 1]) else {
        v.reverse();
        return false;
    };
    let j = (i + 1..n)
        .rev()
        .find(|&j| v[j] > v[i])
        .unwrap_or(i + 1);
    v.swap(i, j);
    v[i + 1..].reverse();
    true
}
