//! # smith: A Generator of Spin-Free Multireference Electron-Correlation Programs
//!
//! `smith` derives the working equations of internally contracted multireference methods, such
//! as CASPT2, and writes them out as procedural source code for a host quantum-chemistry package.
//! Starting from symbolic tensors made of second-quantised operators, it
//! - enumerates every full contraction of each operator product (Wick's theorem),
//! - reduces the operators left in the active space into spin-free reduced density matrices,
//! - brings every term into a canonical form so that equivalent terms are combined, and
//! - renders the resulting equations as loop nests over block-sparse tensor storage.
//!
//! ## Organisation
//!
//! - [`index`]: orbital indices, their ranges, and spin labels.
//! - [`tensor`]: symbolic tensors, both as declared families and as instances over indices.
//! - [`operator`]: tensors as strings of creation and annihilation operators, and the
//!   contraction of a pair of operators.
//! - [`diagram`]: operator products and the enumeration of their full contractions.
//! - [`active`]: reduction of active-space operator strings into reduced density matrices.
//! - [`equation`]: labelled sums of canonical terms.
//! - [`listing`]: the language-neutral description of the generated program.
//! - [`emit`]: rendering of a listing into C++ source text.
//! - [`drivers`]: complete equation generations, currently CASPT2.
//! - [`interfaces`] and [`io`]: the command line, YAML run configurations, and file output.
//!
//! ## Examples and usage
//!
//! For most items (structs, enums, functions, and traits), their usages are illustrated in test
//! functions. The `smith` binary runs the full CASPT2 generation by default:
//!
//! ```text
//! smith --output caspt2.cc
//! smith --config run.yml --output residual.cc -v
//! ```
//!
//! ## License
//!
//! GNU Lesser General Public License v3.0.

pub mod active;
pub mod diagram;
pub mod drivers;
pub mod emit;
pub mod equation;
pub mod index;
pub mod interfaces;
pub mod io;
pub mod listing;
pub mod operator;
pub mod permutation;
pub mod tensor;
