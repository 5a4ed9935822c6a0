use crate::emit::RdmSource;
use crate::equation::{Equation, EquationSpec, TreeType};
use crate::index::{Index, IndexRange};
use crate::listing::Listing;
use crate::tensor::TensorSpec;

use IndexRange::{Active as X, Closed as C, Virtual as A};

fn residual(label: &str, t: &str) -> Equation {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label(label)
        .families(&[
            vec![TensorSpec::projector("proj", None, &[X, X]).unwrap()],
            vec![TensorSpec::operand(t, None, &[X, X]).unwrap()],
        ])
        .build()
        .unwrap();
    Equation::new(&spec).unwrap()
}

#[test]
fn test_listing_tensor_units() {
    let mut listing = Listing::new("CASPT2");
    listing
        .add_tensor(&TensorSpec::operand("t2", Some(0), &[C, C, A, A]).unwrap())
        .unwrap();
    listing
        .add_tensor(&TensorSpec::operand("t2", Some(1), &[X, C, A, A]).unwrap())
        .unwrap();
    listing
        .add_tensor(&TensorSpec::operand("f1", None, &[C, A]).unwrap())
        .unwrap();
    let labels = listing.tensors().map(|unit| unit.label()).collect::<Vec<_>>();
    assert_eq!(labels, vec!["t2", "f1"]);

    assert!(listing
        .add_tensor(&TensorSpec::operand("f1", None, &[]).unwrap())
        .is_err());
}

#[test]
fn test_listing_shares_active_units() {
    let mut listing = Listing::new("CASPT2");
    listing.add_equation(&residual("ra", "t2")).unwrap();
    listing.add_equation(&residual("rb", "t2dagger")).unwrap();
    assert_eq!(listing.actives().len(), 1);
    assert_eq!(listing.actives()[0].name(), "Gamma0");
    assert_eq!(listing.actives()[0].source(), RdmSource::Reference);
    assert_eq!(listing.actives()[0].indices().len(), 4);
    assert_eq!(listing.actives()[0].rdms().len(), 2);
    assert!(listing.actives()[0].merged().is_none());

    let unit = &listing.equations()[1];
    assert_eq!(unit.labels, vec!["rb".to_string()]);
    assert_eq!(unit.accumulations.len(), 1);
    let acc = &unit.accumulations[0];
    assert_eq!(acc.active.as_ref().unwrap().name, "Gamma0");
    assert_eq!(
        acc.loops,
        (0..4).map(|num| Index::new(num, X)).collect::<Vec<_>>()
    );
    assert!(!acc.deriv);
    assert_eq!(listing.tree_labels(), vec!["r", "r"]);
}

#[test]
fn test_listing_derivative_actives_are_distinct() {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("dedci")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[X, X]).unwrap()],
            vec![TensorSpec::operand("t2", None, &[X, X]).unwrap()],
        ])
        .braket((false, true))
        .build()
        .unwrap();
    let mut deriv = Equation::new(&spec).unwrap();
    deriv.set_tree_type(TreeType::Deci, None);

    let mut listing = Listing::new("CASPT2");
    listing.add_equation(&residual("ra", "t2")).unwrap();
    listing.add_equation(&deriv).unwrap();
    assert_eq!(listing.actives().len(), 2);
    assert_eq!(listing.actives()[1].source(), RdmSource::Derivative);
    assert_eq!(listing.equations()[1].braket, (false, true));
    assert_eq!(listing.tree_labels(), vec!["r", "deci"]);
}

#[test]
fn test_listing_rejects_foreign_method() {
    let spec = EquationSpec::builder()
        .method("MRCI")
        .label("ra")
        .families(&[vec![TensorSpec::operand("h1", None, &[C, C]).unwrap()]])
        .build()
        .unwrap();
    let mut listing = Listing::new("CASPT2");
    assert!(listing.add_equation(&Equation::new(&spec).unwrap()).is_err());
}

#[test]
fn test_listing_display() {
    let mut listing = Listing::new("CASPT2");
    listing
        .add_tensor(&TensorSpec::operand("t2", None, &[X, X]).unwrap())
        .unwrap();
    listing.add_equation(&residual("ra", "t2")).unwrap();
    let text = listing.to_string();
    assert!(text.starts_with("Theory: CASPT2\n"));
    assert!(text.contains("Tensor units: t2\n"));
    assert!(text.contains("Active units: 1\n"));
    assert!(text.contains("r      <- ra (1 accumulation(s))"));
}
