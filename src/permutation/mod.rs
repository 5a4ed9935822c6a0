//! Permutations of finite ordered sets, used for index sorting and operator reordering.

use std::collections::HashSet;
use std::fmt;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use indexmap::IndexSet;
use itertools::Itertools;
use ndarray::{ArrayD, ArrayViewD};


/// A structure to manage permutation actions of a finite set.
#[derive(Builder, Clone, Debug, PartialEq, Eq, Hash)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Permutation {
    /// The rank of the permutation, *i.e.* the number of elements in the finite set on which the
    /// permutation acts.
    rank: usize,

    /// If the permutation is to act on an ordered sequence of $`n`$ integers, $`0, 1, \ldots, n`$
    /// where $`n`$ is [`Self::rank`], then this gives the result of the action.
    #[builder(setter(custom))]
    image: Vec<usize>,

    #[builder(setter(skip), default = "self.calc_cycles()")]
    cycles: Vec<Vec<usize>>,
}

impl PermutationBuilder {
    fn image(&mut self, perm: &[usize]) -> &mut Self {
        self.image = Some(perm.to_vec());
        self
    }

    fn validate(&self) -> Result<(), String> {
        let rank = self.rank.ok_or("The rank for this permutation has not been set.")?;
        let image = self
            .image
            .as_ref()
            .ok_or("The image for this permutation has not been set.")?;
        if image.len() != rank {
            return Err(format!(
                "The permutation image `{image:?}` does not contain {rank} elements."
            ));
        }
        if image.iter().any(|&i| i >= rank)
            || image.iter().cloned().collect::<HashSet<usize>>().len() != rank
        {
            return Err(format!(
                "The permutation image `{image:?}` is not a rearrangement of 0..{rank}."
            ));
        }
        Ok(())
    }

    fn calc_cycles(&self) -> Vec<Vec<usize>> {
        let rank = self.rank.unwrap_or_default();
        let image = match self.image.as_ref() {
            Some(image) if image.len() == rank => image,
            _ => return vec![],
        };
        let mut remaining_indices = (0..rank).rev().collect::<IndexSet<usize>>();
        let mut cycles: Vec<Vec<usize>> = Vec::with_capacity(rank);
        while let Some(start) = remaining_indices.pop() {
            let mut cycle: Vec<usize> = Vec::with_capacity(remaining_indices.len() + 1);
            cycle.push(start);
            let mut idx = start;
            while image[idx] != start {
                idx = image[idx];
                if !remaining_indices.shift_remove(&idx) {
                    break;
                }
                cycle.push(idx);
            }
            cycles.push(cycle);
        }
        cycles.sort_by_key(|cycle| (!cycle.len(), cycle.clone()));
        cycles
    }
}

impl Permutation {
    /// Returns a builder to construct a new permutation.
    #[must_use]
    fn builder() -> PermutationBuilder {
        PermutationBuilder::default()
    }

    /// Constructs a permutation from its image.
    ///
    /// # Errors
    ///
    /// Errors when `image` is not a rearrangement of `0..image.len()`.
    pub fn from_image(image: &[usize]) -> Result<Self, anyhow::Error> {
        Self::builder()
            .rank(image.len())
            .image(image)
            .build()
            .map_err(|err| format_err!(err))
    }

    /// Constructs the permutation that sorts `from` into the order of `to`: the $`k`$-th entry of
    /// the image is the position in `from` of the $`k`$-th element of `to`.
    ///
    /// # Errors
    ///
    /// Errors when the two sequences are not rearrangements of each other, *e.g.* when an element
    /// of `to` is absent from `from`.
    pub fn sort_between<T: PartialEq + fmt::Debug>(
        from: &[T],
        to: &[T],
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            from.len() == to.len(),
            "Unable to sort `{from:?}` into `{to:?}`: lengths differ."
        );
        let image = to
            .iter()
            .map(|t| {
                from.iter()
                    .position(|f| f == t)
                    .ok_or_else(|| format_err!("`{t:?}` is absent from `{from:?}`."))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_image(&image)
    }

    /// Returns the rank of the permutation.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the image of the permutation.
    pub fn image(&self) -> &Vec<usize> {
        &self.image
    }

    /// Obtains the cycle representation of the permutation.
    pub fn cycles(&self) -> &Vec<Vec<usize>> {
        &self.cycles
    }

    /// Returns the parity of the permutation as $`\pm 1`$.
    pub fn sign(&self) -> f64 {
        let transpositions = self.rank - self.cycles.len();
        if transpositions % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Rearranges `items` so that the $`k`$-th element of the result is `items[image[k]]`.
    ///
    /// # Errors
    ///
    /// Errors when the number of items does not match the rank.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Result<Vec<T>, anyhow::Error> {
        ensure!(
            items.len() == self.rank,
            "Unable to permute {} items with a permutation of rank {}.",
            items.len(),
            self.rank
        );
        Ok(self.image.iter().map(|&i| items[i].clone()).collect())
    }

    /// Adds `fac` times `block`, sorted from declared order into loop order, to `out`. Axis $`k`$
    /// of the sorted block is axis `image[k]` of `block`. The emitted `sort_indices` accumulates
    /// in exactly this way.
    ///
    /// # Errors
    ///
    /// Errors when the dimensionality of `block` does not match the rank, or when `out` does not
    /// have the shape of the sorted block.
    pub fn sort_block(
        &self,
        block: ArrayViewD<f64>,
        fac: f64,
        out: &mut ArrayD<f64>,
    ) -> Result<(), anyhow::Error> {
        ensure!(
            block.ndim() == self.rank,
            "Unable to sort a block of dimension {} with a permutation of rank {}.",
            block.ndim(),
            self.rank
        );
        let sorted = block.permuted_axes(self.image.clone());
        ensure!(
            sorted.shape() == out.shape(),
            "Unable to add a sorted block of shape {:?} to an output of shape {:?}.",
            sorted.shape(),
            out.shape()
        );
        out.scaled_add(fac, &sorted);
        Ok(())
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.image.iter().join(","))
    }
}
