//! Generation of the internally contracted CASPT2 equations.
//!
//! The first-order wavefunction is expanded in the nine classes of two-body excitations
//! $`E_{ij} E_{kl}`$ that do not vanish on a CASSCF reference. Each class contributes one
//! projector, one amplitude `t2` and one adjoint amplitude `t2dagger`, all sharing the class tag.
//! The residual, source, norm, density, and CI-derivative equations are products of these
//! families with the general one- and two-body operators `f1`, `h1`, and `v2`.

use std::fmt;

use anyhow::{self, format_err};
use derive_builder::Builder;
use itertools::Itertools;
use log;
use serde::{Deserialize, Serialize};

use crate::drivers::SmithDriver;
use crate::emit::{CxxEmitter, Emitter};
use crate::equation::{Equation, EquationSpec, TreeType};
use crate::index::IndexRange;
use crate::io::format::{
    log_display, log_section, log_subtitle, log_title, smith_output, smith_warn, yes_no,
};
use crate::listing::Listing;
use crate::tensor::TensorSpec;


use IndexRange::{Active as X, Closed as C, General as G, Virtual as A};

// ==================
// Struct definitions
// ==================

// ---------
// Equations
// ---------

/// An enumerated type for the equation sets the CASPT2 driver can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Caspt2Equation {
    /// The amplitude residual $`\langle \Omega | f - E_0 | T \rangle`$ (`ra` and `rb`).
    Residual,

    /// The source term $`\langle \Omega | H | 0 \rangle`$ (`ec` and `ed`).
    Source,

    /// The norm of the first-order wavefunction (`ca`).
    Norm,

    /// The one-body density from $`T^\dagger E_{pq} T`$ (`da`).
    Density,

    /// The one-body density from $`E_{pq} T`$ (`db`).
    Density1,

    /// The two-body-derived density $`\langle \Omega | T \rangle`$ (`d2a`).
    Density2,

    /// The derivative of the Hylleraas functional with respect to the CI coefficients (`dedci`).
    Deci,
}

impl Caspt2Equation {
    /// Returns every equation set in emission order.
    pub fn all() -> Vec<Self> {
        vec![
            Caspt2Equation::Residual,
            Caspt2Equation::Source,
            Caspt2Equation::Norm,
            Caspt2Equation::Density,
            Caspt2Equation::Density1,
            Caspt2Equation::Density2,
            Caspt2Equation::Deci,
        ]
    }

    /// Returns the tree kind and subkind of the equation built for this set.
    pub fn tree_type(&self) -> (TreeType, Option<TreeType>) {
        match self {
            Caspt2Equation::Residual => (TreeType::Residual, None),
            Caspt2Equation::Source => (TreeType::Residual, Some(TreeType::Source)),
            Caspt2Equation::Norm => (TreeType::Residual, Some(TreeType::Norm)),
            Caspt2Equation::Density => (TreeType::Residual, Some(TreeType::Density)),
            Caspt2Equation::Density1 => (TreeType::Residual, Some(TreeType::Density1)),
            Caspt2Equation::Density2 => (TreeType::Residual, Some(TreeType::Density2)),
            Caspt2Equation::Deci => (TreeType::Residual, Some(TreeType::Deci)),
        }
    }
}

impl fmt::Display for Caspt2Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Caspt2Equation::Residual => "Residual",
            Caspt2Equation::Source => "Source",
            Caspt2Equation::Norm => "Norm",
            Caspt2Equation::Density => "Density",
            Caspt2Equation::Density1 => "Density1",
            Caspt2Equation::Density2 => "Density2",
            Caspt2Equation::Deci => "CI derivative",
        };
        write!(f, "{name}")
    }
}

// ----------
// Parameters
// ----------

fn default_theory() -> String {
    "CASPT2".to_string()
}

fn default_merge_label() -> Option<String> {
    Some("f1".to_string())
}

/// A structure containing control parameters for CASPT2 equation generation.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Caspt2Params {
    /// The name of the theory written into the generated listing.
    #[builder(setter(into), default = "default_theory()")]
    pub theory: String,

    /// The equation sets to emit, in order.
    #[builder(setter(custom), default = "Caspt2Equation::all()")]
    pub equations: Vec<Caspt2Equation>,

    /// Boolean indicating if storage declarations for the operand tensors are to be emitted.
    #[builder(default = "true")]
    pub emit_tensor_units: bool,

    /// The label of the all-active operand folded into the active intermediates. If `None`, no
    /// operand is folded.
    #[builder(default = "default_merge_label()")]
    pub merge_label: Option<String>,

    /// Boolean indicating if the one-body density operator `1b` is restricted to alpha spin.
    #[builder(default = "false")]
    pub spin_resolved_density: bool,
}

impl Caspt2Params {
    /// Returns a builder to construct a [`Caspt2Params`] structure.
    pub fn builder() -> Caspt2ParamsBuilder {
        Caspt2ParamsBuilder::default()
    }
}

impl Caspt2ParamsBuilder {
    pub fn equations(&mut self, equations: &[Caspt2Equation]) -> &mut Self {
        self.equations = Some(equations.to_vec());
        self
    }
}

impl Default for Caspt2Params {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to construct a default `Caspt2Params`.")
    }
}

impl fmt::Display for Caspt2Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Theory: {}", self.theory)?;
        writeln!(
            f,
            "Equation sets: {}",
            self.equations.iter().map(|eq| eq.to_string()).join(", ")
        )?;
        writeln!(
            f,
            "Emit tensor storage: {}",
            yes_no(self.emit_tensor_units)
        )?;
        writeln!(
            f,
            "Folded active operand: {}",
            self.merge_label.as_deref().unwrap_or("--")
        )?;
        writeln!(
            f,
            "Alpha-restricted one-body density: {}",
            yes_no(self.spin_resolved_density)
        )?;
        Ok(())
    }
}

// --------
// Families
// --------

/// The tensor families entering the CASPT2 equations.
#[derive(Clone, Debug)]
pub struct Caspt2Families {
    /// The projectors onto the excitation classes, labelled `proj` and tagged by class.
    pub proj: Vec<TensorSpec>,

    /// The amplitudes, with the ranges of each class permuted as $`(j, i, l, k)`$.
    pub t2: Vec<TensorSpec>,

    pub t2dagger: Vec<TensorSpec>,

    pub f1: Vec<TensorSpec>,

    pub h1: Vec<TensorSpec>,

    pub v2: Vec<TensorSpec>,

    /// The one-body density operator.
    pub ex1b: Vec<TensorSpec>,
}

/// Returns `true` if the excitation class with projector ranges $`(l, k, j, i)`$ is one of the
/// nine internally contracted CASPT2 classes.
fn is_caspt2_class(l: IndexRange, k: IndexRange, j: IndexRange, i: IndexRange) -> bool {
    matches!(
        (l, k, j, i),
        (C, C, A, A)
            | (X, C, A, A)
            | (X, X, A, A)
            | (C, C, X, A)
            | (C, C, X, X)
            | (X, C, X, X)
            | (X, X, X, A)
            | (C, X, X, A)
            | (X, C, X, A)
    )
}

impl Caspt2Families {
    /// Builds the CASPT2 tensor families.
    ///
    /// # Errors
    ///
    /// Errors when a tensor specification cannot be constructed.
    pub fn new(spin_resolved_density: bool) -> Result<Self, anyhow::Error> {
        let ranges = [C, X, A];
        let mut proj = vec![];
        let mut t2 = vec![];
        let mut t2dagger = vec![];
        for (i, j, k, l) in ranges
            .iter()
            .cartesian_product(ranges.iter())
            .cartesian_product(ranges.iter())
            .cartesian_product(ranges.iter())
            .map(|(((i, j), k), l)| (*i, *j, *k, *l))
        {
            if !is_caspt2_class(l, k, j, i) {
                continue;
            }
            let tag = Some(proj.len());
            proj.push(TensorSpec::projector("proj", tag, &[l, k, j, i])?);
            t2dagger.push(TensorSpec::operand("t2dagger", tag, &[l, k, j, i])?);
            t2.push(TensorSpec::operand("t2", tag, &[j, i, l, k])?);
        }
        let ex1b = TensorSpec::builder()
            .label("1b")
            .ranges(&[G, G])
            .projector(true)
            .alpha(spin_resolved_density)
            .build()
            .map_err(|err| format_err!(err))?;
        Ok(Self {
            proj,
            t2,
            t2dagger,
            f1: vec![TensorSpec::operand("f1", None, &[G, G])?],
            h1: vec![TensorSpec::operand("h1", None, &[G, G])?],
            v2: vec![TensorSpec::operand("v2", None, &[G, G, G, G])?],
            ex1b: vec![ex1b],
        })
    }

    /// Returns the operand tensors whose storage the generated code uses, in declaration order.
    pub fn operands(&self) -> impl Iterator<Item = &TensorSpec> + '_ {
        self.t2
            .iter()
            .chain(self.f1.iter())
            .chain(self.v2.iter())
            .chain(self.h1.iter())
            .chain(self.t2dagger.iter())
    }
}

// ------
// Result
// ------

/// A structure containing the results of CASPT2 equation generation.
#[derive(Clone, Debug)]
pub struct Caspt2Result {
    listing: Listing,

    /// The number of distinct terms of each emitted equation, keyed by tree label.
    term_counts: Vec<(String, usize)>,

    /// The rendered source text.
    text: String,
}

impl Caspt2Result {
    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    pub fn term_counts(&self) -> &[(String, usize)] {
        &self.term_counts
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Caspt2Result {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.listing)?;
        writeln!(
            f,
            "Generated {} line(s) of source text.",
            self.text.lines().count()
        )
    }
}

// ------
// Driver
// ------

/// A driver for the generation of the CASPT2 equations.
#[derive(Clone, Builder)]
pub struct Caspt2Driver<'a> {
    /// The control parameters.
    parameters: &'a Caspt2Params,

    /// The result of the generation.
    #[builder(default = "None")]
    result: Option<Caspt2Result>,
}

impl<'a> Caspt2Driver<'a> {
    /// Returns a builder to construct a [`Caspt2Driver`] structure.
    pub fn builder() -> Caspt2DriverBuilder<'a> {
        Caspt2DriverBuilder::default()
    }

    /// Builds the equation of one equation set, merging its constituent equations and tagging
    /// it with its tree type.
    fn build_equation(
        &self,
        set: Caspt2Equation,
        families: &Caspt2Families,
    ) -> Result<Equation, anyhow::Error> {
        let params = self.parameters;
        let spec = |label: &str,
                    product: &[&Vec<TensorSpec>],
                    factor: f64,
                    scalar: Option<&str>,
                    braket: (bool, bool)|
         -> Result<EquationSpec, anyhow::Error> {
            let mut builder = EquationSpec::builder();
            builder
                .method(params.theory.as_str())
                .label(label)
                .families(&product.iter().map(|family| (*family).clone()).collect_vec())
                .factor(factor)
                .braket(braket)
                .merge_label(params.merge_label.clone());
            if let Some(scalar) = scalar {
                builder.scalar(scalar);
            }
            builder.build().map_err(|err| format_err!(err))
        };
        let f = families;
        let none = (false, false);
        let bra = (true, false);
        let ket = (false, true);
        let specs = match set {
            Caspt2Equation::Residual => vec![
                spec("ra", &[&f.proj, &f.f1, &f.t2], 1.0, None, none)?,
                spec("rb", &[&f.proj, &f.t2], -1.0, Some("e0"), none)?,
            ],
            Caspt2Equation::Source => vec![
                spec("ec", &[&f.proj, &f.v2], 0.5, None, none)?,
                spec("ed", &[&f.proj, &f.h1], 1.0, None, none)?,
            ],
            Caspt2Equation::Norm => vec![spec("ca", &[&f.proj, &f.t2], 1.0, None, none)?],
            Caspt2Equation::Density => {
                vec![spec("da", &[&f.t2dagger, &f.ex1b, &f.t2], 1.0, None, none)?]
            }
            Caspt2Equation::Density1 => vec![spec("db", &[&f.ex1b, &f.t2], 1.0, None, none)?],
            Caspt2Equation::Density2 => vec![spec("d2a", &[&f.proj, &f.t2], 1.0, None, none)?],
            Caspt2Equation::Deci => vec![
                spec("dedcia", &[&f.t2dagger, &f.f1, &f.t2], 2.0, None, bra)?,
                spec("dedcic", &[&f.t2dagger, &f.t2], -2.0, Some("e0"), bra)?,
                spec("dedcie", &[&f.t2dagger, &f.v2], 1.0, None, bra)?,
                spec("dedcif", &[&f.t2dagger, &f.v2], 1.0, None, ket)?,
                spec("dedcig", &[&f.t2dagger, &f.h1], 2.0, None, bra)?,
                spec("dedcih", &[&f.t2dagger, &f.h1], 2.0, None, ket)?,
            ],
        };

        let mut equations = specs
            .iter()
            .map(|spec| {
                let equation = Equation::new(spec)?;
                smith_output!(
                    "  {:<8} {:>6} term(s)",
                    spec.label(),
                    equation.num_terms()
                );
                Ok(equation)
            })
            .collect::<Result<Vec<_>, anyhow::Error>>()?
            .into_iter();
        let mut equation = equations
            .next()
            .ok_or_else(|| format_err!("No equations defined for `{set}`."))?;
        for other in equations {
            equation.merge(&other)?;
        }
        let (kind, subkind) = set.tree_type();
        equation.set_tree_type(kind, subkind);
        if equation.num_terms() == 0 {
            smith_warn!("Every term of `{set}` cancels.");
        }
        Ok(equation)
    }

    fn generate(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        log_title("CASPT2 Equation Generation");
        smith_output!("");
        log_display(params);
        smith_output!("");

        let families = Caspt2Families::new(params.spin_resolved_density)?;
        log::debug!(
            "{} excitation classes: {}",
            families.proj.len(),
            families.proj.iter().join(", ")
        );

        let mut listing = Listing::new(&params.theory);
        if params.emit_tensor_units {
            for spec in families.operands() {
                listing.add_tensor(spec)?;
            }
        }

        let mut term_counts = vec![];
        for set in params.equations.iter() {
            let equation = log_section(&set.to_string(), || {
                let equation = self.build_equation(*set, &families)?;
                smith_output!(
                    "  {:<8} {:>6} term(s) into `{}`",
                    equation.sources().join("+"),
                    equation.num_terms(),
                    equation.tree_label()
                );
                Ok(equation)
            })?;
            listing.add_equation(&equation)?;
            term_counts.push((equation.tree_label().to_string(), equation.num_terms()));
            smith_output!("");
        }

        let text = CxxEmitter::default().render(&listing)?;
        let result = Caspt2Result {
            listing,
            term_counts,
            text,
        };
        log_subtitle("Listing summary");
        smith_output!("");
        log_display(&result);
        smith_output!("");
        self.result = Some(result);
        Ok(())
    }
}

impl<'a> SmithDriver for Caspt2Driver<'a> {
    type Params = Caspt2Params;

    type Outcome = Caspt2Result;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No CASPT2 generation results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.generate()
    }
}
