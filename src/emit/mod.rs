//! Rendering of a [`Listing`] into source text for the host package.

use anyhow::{self, ensure, format_err};
use indexmap::IndexMap;
use itertools::Itertools;

use crate::active::{Active, Rdm};
use crate::index::Index;
use crate::listing::{Accumulation, ActiveUnit, EquationUnit, Listing, TensorUnit};
use crate::permutation::Permutation;
use crate::tensor::Tensor;


const VERSION: &str = env!("CARGO_PKG_VERSION");

/// An enumerated type for the reference density matrices an RDM term reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RdmSource {
    /// The RDMs of the reference wavefunction.
    Reference,

    /// The derivatives of the reference RDMs with respect to the reference coefficients.
    Derivative,
}

impl RdmSource {
    /// Returns the name of the host storage holding the RDMs of rank `rank`.
    pub fn storage(&self, rank: usize) -> String {
        match self {
            RdmSource::Reference => format!("rdm{rank}"),
            RdmSource::Derivative => format!("rdm{rank}deriv"),
        }
    }
}

// =================
// Trait definitions
// =================

/// Trait for rendering the units of a listing as source text.
pub trait Emitter {
    /// Renders the header framing the listing.
    fn header(&self, listing: &Listing) -> String;

    /// Renders the storage declaration of one tensor label.
    fn tensor_unit(&self, unit: &TensorUnit) -> String;

    /// Renders one active helper unit.
    fn active_unit(&self, unit: &ActiveUnit) -> Result<String, anyhow::Error>;

    /// Renders one equation unit.
    fn equation_unit(&self, unit: &EquationUnit) -> Result<String, anyhow::Error>;

    /// Renders the footer framing the listing.
    fn footer(&self, listing: &Listing) -> String;

    /// Renders the whole listing: header, tensor units, active units, equation units, footer.
    fn render(&self, listing: &Listing) -> Result<String, anyhow::Error> {
        let mut out = self.header(listing);
        for unit in listing.tensors() {
            out.push_str(&self.tensor_unit(unit));
        }
        out.push('\n');
        for unit in listing.actives() {
            out.push_str(&self.active_unit(unit)?);
        }
        for unit in listing.equations() {
            out.push_str(&self.equation_unit(unit)?);
        }
        out.push_str(&self.footer(listing));
        Ok(out)
    }
}

// ==========
// CodeWriter
// ==========

#[derive(Debug, Default)]
struct CodeWriter {
    out: String,
    depth: usize,
}

impl CodeWriter {
    fn line<S: AsRef<str>>(&mut self, text: S) {
        self.out.push_str(&"  ".repeat(self.depth));
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open<S: AsRef<str>>(&mut self, text: S) {
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn close_n(&mut self, n: usize) {
        (0..n).for_each(|_| self.close());
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Returns the column-major element offset of `indices` within their block, the first index
/// running fastest.
fn offset(indices: &[Index]) -> String {
    match indices.split_first() {
        None => "0".to_string(),
        Some((first, [])) => first.str_elem(),
        Some((first, rest)) => format!(
            "{}+{}->size()*({})",
            first.str_elem(),
            first.str_gen(),
            offset(rest)
        ),
    }
}

/// Returns the block key expression for `indices`, which lists them in reverse order.
pub(crate) fn block_key(indices: &[Index]) -> String {
    format!(
        "vec({})",
        indices
            .iter()
            .rev()
            .map(|index| format!("{}->key()", index.str_gen()))
            .join(", ")
    )
}

fn block_loop(index: &Index) -> String {
    format!(
        "for (auto& {} : {}) {{",
        index.str_gen(),
        index.range().block_list()
    )
}

fn element_loop(index: &Index) -> String {
    let elem = index.str_elem();
    format!(
        "for (int {elem} = 0; {elem} != {}->size(); ++{elem}) {{",
        index.str_gen()
    )
}

/// Returns a valid identifier for a tensor label.
fn ident(label: &str) -> String {
    if label.starts_with(|c: char| c.is_ascii_digit()) {
        format!("tensor_{label}")
    } else {
        label.to_string()
    }
}

fn resolve(remap: &IndexMap<Index, Index>, mut index: Index) -> Index {
    while let Some(next) = remap.get(&index) {
        index = *next;
    }
    index
}

// ==========
// CxxEmitter
// ==========

/// An emitter producing C++ against a block-sparse storage layer: tensors are `BlockStore<N>`
/// objects whose blocks are fetched by key vectors, and index ranges are lists of blocks
/// (`closed_`, `active_`, `virt_`).
#[derive(Clone, Copy, Debug, Default)]
pub struct CxxEmitter;

impl CxxEmitter {
    /// Emits the accumulation of `rdm`, optionally multiplied by a block of `merged`, into
    /// `odata` addressed by `loops`.
    ///
    /// # Errors
    ///
    /// Errors when an index of the RDM or of its delta constraints is provided neither by
    /// `loops` nor by `merged`.
    pub fn rdm(
        &self,
        rdm: &Rdm,
        loops: &[Index],
        merged: Option<&Tensor>,
        source: RdmSource,
    ) -> Result<String, anyhow::Error> {
        let mut w = CodeWriter::default();
        self.write_rdm(&mut w, rdm, loops, merged, source)?;
        Ok(w.finish())
    }

    fn write_rdm(
        &self,
        w: &mut CodeWriter,
        rdm: &Rdm,
        loops: &[Index],
        merged: Option<&Tensor>,
        source: RdmSource,
    ) -> Result<(), anyhow::Error> {
        let private = merged
            .map(|merged| {
                merged
                    .indices()
                    .iter()
                    .filter(|index| !loops.contains(index))
                    .unique()
                    .copied()
                    .collect_vec()
            })
            .unwrap_or_default();
        let known = |index: &Index| loops.contains(index) || private.contains(index);

        // Delta constraints remove one index each. Between two looped indices a guard is
        // emitted; a summed index is simply pinned to its partner.
        let mut remap: IndexMap<Index, Index> = IndexMap::new();
        let mut guards = vec![];
        for &(a, b) in rdm.deltas() {
            ensure!(
                known(&a) && known(&b),
                "Delta constraint `{a} = {b}` refers to an index outside `{}`.",
                loops.iter().chain(private.iter()).join(", ")
            );
            let (a, b) = (resolve(&remap, a), resolve(&remap, b));
            if a == b {
                continue;
            }
            let (kept, removed) = match (loops.contains(&a), loops.contains(&b)) {
                (true, false) => (a, b),
                (false, true) => (b, a),
                (both_looped, _) => {
                    if both_looped {
                        guards.push((a, b));
                    }
                    if a.num() <= b.num() {
                        (a, b)
                    } else {
                        (b, a)
                    }
                }
            };
            remap.insert(removed, kept);
        }
        let map = |indices: &[Index]| {
            indices
                .iter()
                .map(|index| resolve(&remap, *index))
                .collect_vec()
        };
        if let Some(missing) = rdm.indices().iter().find(|index| !known(index)) {
            return Err(format_err!(
                "RDM index `{missing}` is absent from `{}`.",
                loops.iter().chain(private.iter()).join(", ")
            ));
        }

        let storage = source.storage(rdm.rank());
        let fac = format!("{:.2}", rdm.factor());
        w.open("{");
        // `sort_indices<perm>(in, out, fac, dims...)` adds `fac` times the sorted block to `out`
        // (see `Permutation::sort_block`), so it may follow other terms of the same block.
        let sortable = merged.is_none()
            && remap.is_empty()
            && rdm.indices().len() == loops.len()
            && rdm.indices().iter().all_unique()
            && rdm.indices().iter().all(|index| loops.contains(index));
        if sortable {
            let perm = Permutation::sort_between(rdm.indices(), loops)?;
            w.line(format!(
                "std::vector<size_t> i0hash = {};",
                block_key(rdm.indices())
            ));
            w.line(format!(
                "std::unique_ptr<double[]> i0data = {storage}->get_block(i0hash);"
            ));
            w.line(format!(
                "sort_indices<{perm}>(i0data, odata, {fac}, {});",
                rdm.indices()
                    .iter()
                    .map(|index| format!("{}->size()", index.str_gen()))
                    .join(", ")
            ));
            w.close();
            return Ok(());
        }

        let mut depth = 0;
        if !guards.is_empty() {
            w.open(format!(
                "if ({}) {{",
                guards
                    .iter()
                    .map(|(a, b)| format!("{} == {}", a.str_gen(), b.str_gen()))
                    .join(" && ")
            ));
            depth += 1;
        }
        for index in private.iter().filter(|index| !remap.contains_key(*index)) {
            w.open(block_loop(index));
            depth += 1;
        }
        w.line(format!(
            "std::vector<size_t> i0hash = {};",
            block_key(&map(rdm.indices()))
        ));
        w.line(format!(
            "std::unique_ptr<double[]> i0data = {storage}->get_block(i0hash);"
        ));
        let mut rhs = format!("({fac}) * i0data[{}]", offset(&map(rdm.indices())));
        if let Some(merged) = merged {
            w.line(format!(
                "std::vector<size_t> i1hash = {};",
                block_key(&map(merged.indices()))
            ));
            w.line(format!(
                "std::unique_ptr<double[]> i1data = {}->get_block(i1hash);",
                ident(merged.label())
            ));
            rhs.push_str(&format!(" * i1data[{}]", offset(&map(merged.indices()))));
        }
        for index in loops
            .iter()
            .chain(private.iter())
            .filter(|index| !remap.contains_key(*index))
        {
            w.open(element_loop(index));
            depth += 1;
        }
        w.line(format!("odata[{}] += {rhs};", offset(&map(loops))));
        w.close_n(depth);
        w.close();
        Ok(())
    }

    /// Emits the helper unit computing `active` into the block storage `name`.
    ///
    /// # Errors
    ///
    /// Errors when an RDM refers to an index absent from the active part.
    pub fn active(
        &self,
        name: &str,
        active: &Active,
        source: RdmSource,
    ) -> Result<String, anyhow::Error> {
        let loops = active.storage_indices();
        let mut w = CodeWriter::default();
        w.line(format!(
            "// {name}({}) = {active}",
            loops.iter().join(", ")
        ));
        let store = format!("BlockStore<{}>", loops.len());
        w.line(format!(
            "std::shared_ptr<{store}> {name} = std::make_shared<{store}>(\"{name}\");"
        ));
        w.open(format!("void compute_{name}() {{"));
        for index in loops.iter() {
            w.open(block_loop(index));
        }
        w.line(format!("std::vector<size_t> ohash = {};", block_key(&loops)));
        w.line(format!(
            "std::unique_ptr<double[]> odata = {name}->move_block(ohash);"
        ));
        for rdm in active.rdms() {
            self.write_rdm(&mut w, rdm, &loops, active.merged(), source)?;
        }
        w.line(format!("{name}->put_block(ohash, odata);"));
        w.close_n(loops.len());
        w.close();
        w.line("");
        Ok(w.finish())
    }

    fn write_accumulation(
        &self,
        w: &mut CodeWriter,
        tree_label: &str,
        acc: &Accumulation,
    ) -> Result<(), anyhow::Error> {
        let target = acc
            .target
            .as_ref()
            .map(|target| target.indices().to_vec())
            .unwrap_or_default();
        let ntarget = acc
            .loops
            .iter()
            .take_while(|index| target.contains(index))
            .count();
        let fetched = acc
            .operands
            .iter()
            .map(|operand| (ident(operand.label()), operand.indices().to_vec()))
            .chain(
                acc.active
                    .iter()
                    .map(|active| (active.name.clone(), active.indices.clone())),
            )
            .chain(
                (acc.deriv && acc.active.is_none())
                    .then(|| (RdmSource::Derivative.storage(0), vec![])),
            )
            .collect_vec();
        for (label, indices) in fetched.iter() {
            if let Some(missing) = indices.iter().find(|index| !acc.loops.contains(index)) {
                return Err(format_err!(
                    "Index `{missing}` of `{label}` is not provided by the loops `{}`.",
                    acc.loops.iter().join(", ")
                ));
            }
        }

        w.line(format!("// {}", acc.comment));
        w.open("{");
        for index in acc.loops[..ntarget].iter() {
            w.open(block_loop(index));
        }
        w.line(format!("std::vector<size_t> ohash = {};", block_key(&target)));
        w.line(format!(
            "std::unique_ptr<double[]> odata = {tree_label}->move_block(ohash);"
        ));
        for index in acc.loops[ntarget..].iter() {
            w.open(block_loop(index));
        }
        for (i, (label, indices)) in fetched.iter().enumerate() {
            w.line(format!(
                "std::vector<size_t> i{i}hash = {};",
                block_key(indices)
            ));
            w.line(format!(
                "std::unique_ptr<double[]> i{i}data = {label}->get_block(i{i}hash);"
            ));
        }
        for index in acc.loops.iter() {
            w.open(element_loop(index));
        }
        let mut rhs = format!("({:.2})", acc.factor);
        if let Some(scalar) = acc.scalar.as_ref() {
            rhs.push_str(&format!(" * {scalar}"));
        }
        for (i, (_, indices)) in fetched.iter().enumerate() {
            rhs.push_str(&format!(" * i{i}data[{}]", offset(indices)));
        }
        w.line(format!("odata[{}] += {rhs};", offset(&target)));
        w.close_n(acc.loops.len());
        w.close_n(acc.loops.len() - ntarget);
        w.line(format!("{tree_label}->put_block(ohash, odata);"));
        w.close_n(ntarget);
        w.close();
        Ok(())
    }
}

impl Emitter for CxxEmitter {
    fn header(&self, listing: &Listing) -> String {
        let method = listing.method();
        format!(
            "//\n\
             // Generated by smith {VERSION}.\n\
             // Spin-free multireference equations for {method}.\n\
             //\n\
             \n\
             #include \"block_store.h\"\n\
             #include \"sort_indices.h\"\n\
             // sort_indices<perm>(in, out, fac, dims...) accumulates: out += fac * sorted(in).\n\
             \n\
             std::string theory=\"{method}\";\n\
             \n"
        )
    }

    fn tensor_unit(&self, unit: &TensorUnit) -> String {
        let rank = unit.rank();
        let label = unit.label();
        let key = (0..rank).rev().map(|i| format!("i{i}->key()")).join(", ");
        let store = format!("BlockStore<{rank}>");
        format!(
            "// {label}: rank-{rank} blocks keyed by vec({key}).\n\
             std::shared_ptr<{store}> {0} = std::make_shared<{store}>(\"{label}\");\n",
            ident(label)
        )
    }

    fn active_unit(&self, unit: &ActiveUnit) -> Result<String, anyhow::Error> {
        self.active(unit.name(), unit.active(), unit.source())
    }

    fn equation_unit(&self, unit: &EquationUnit) -> Result<String, anyhow::Error> {
        let name = unit
            .labels
            .first()
            .ok_or_else(|| format_err!("Equation unit for `{}` has no label.", unit.tree_label))?;
        let mut w = CodeWriter::default();
        w.line(format!(
            "// {} <- {}{}",
            unit.tree_label,
            unit.labels.join(" + "),
            match unit.braket {
                (true, true) => " (bra and ket derivatives)",
                (true, false) => " (bra derivative)",
                (false, true) => " (ket derivative)",
                (false, false) => "",
            }
        ));
        w.open(format!("void compute_{name}() {{"));
        for acc in unit.accumulations.iter() {
            self.write_accumulation(&mut w, &unit.tree_label, acc)?;
        }
        w.close();
        w.line("");
        Ok(w.finish())
    }

    fn footer(&self, listing: &Listing) -> String {
        let trees = listing.tree_labels().into_iter().unique().collect_vec();
        format!(
            "// Trees: {}\n\
             std::vector<std::string> trees = {{{}}};\n",
            trees.join(", "),
            trees.iter().map(|tree| format!("\"{tree}\"")).join(", ")
        )
    }
}
