use approx::assert_abs_diff_eq;
use itertools::Itertools;
use proptest::prelude::*;

use crate::equation::{Equation, EquationSpec, TreeType};
use crate::index::IndexRange;
use crate::tensor::TensorSpec;

use IndexRange::{Active as X, Closed as C, General as G, Virtual as A};

fn single_excitation(factor: f64) -> EquationSpec {
    EquationSpec::builder()
        .method("CASPT2")
        .label("test")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[C, A]).unwrap()],
            vec![TensorSpec::operand("t1", None, &[A, C]).unwrap()],
        ])
        .factor(factor)
        .build()
        .unwrap()
}

fn active_residual() -> EquationSpec {
    EquationSpec::builder()
        .method("CASPT2")
        .label("ra")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[X, X]).unwrap()],
            vec![TensorSpec::operand("t2", None, &[X, X]).unwrap()],
        ])
        .build()
        .unwrap()
}

#[test]
fn test_equation_spec_validation() {
    assert!(EquationSpec::builder()
        .method("CASPT2")
        .label("empty")
        .build()
        .is_err());
    assert!(EquationSpec::builder()
        .method("CASPT2")
        .label("empty")
        .families(&[vec![]])
        .build()
        .is_err());
    assert!(EquationSpec::builder()
        .method("CASPT2")
        .label("both")
        .families(&[vec![TensorSpec::operand("h1", None, &[C, C]).unwrap()]])
        .braket((true, true))
        .build()
        .is_err());
    assert_eq!(single_excitation(1.0).label(), "test");
}

#[test]
fn test_equation_single_excitation() {
    let equation = Equation::new(&single_excitation(1.0)).unwrap();
    assert_eq!(equation.num_terms(), 1);
    let term = equation.terms().next().unwrap();
    assert_abs_diff_eq!(term.factor(), 2.0);
    assert!(term.active().is_none());
    assert_eq!(term.to_string(), "[c0, a1] <- +2.00 t1(a1, c0)");
    assert_eq!(equation.tree_label(), "r");
    assert_eq!(equation.sources(), &["test".to_string()]);
}

#[test]
fn test_equation_two_body_closed_terms() {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("closed")
        .families(&[vec![TensorSpec::operand("v2", None, &[C, C, C, C]).unwrap()]])
        .build()
        .unwrap();
    let equation = Equation::new(&spec).unwrap();
    let terms = equation.terms().map(|term| term.to_string()).collect_vec();
    assert_eq!(
        terms,
        vec![
            "[] <- -2.00 v2(c0, c1, c0, c1)".to_string(),
            "[] <- +4.00 v2(c0, c1, c1, c0)".to_string(),
        ]
    );
}

#[test]
fn test_equation_general_pair_swaps_combine() {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("v2")
        .families(&[vec![TensorSpec::operand("v2", None, &[G, G, G, G]).unwrap()]])
        .build()
        .unwrap();
    let equation = Equation::new(&spec).unwrap();
    assert_eq!(equation.num_terms(), 5);
    let factors = equation
        .terms()
        .map(|term| term.factor())
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();
    for (factor, expected) in factors.iter().zip([-2.0, -2.0, 1.0, 4.0, 4.0]) {
        assert_abs_diff_eq!(*factor, expected);
    }

    let mut negated = Equation::new(&spec).unwrap();
    negated.merge(&Equation::new(
        &EquationSpec::builder()
            .method("CASPT2")
            .label("v2neg")
            .families(&[vec![TensorSpec::operand("v2", None, &[G, G, G, G]).unwrap()]])
            .factor(-1.0)
            .build()
            .unwrap(),
    )
    .unwrap())
    .unwrap();
    assert_eq!(negated.num_terms(), 0);
}

#[test]
fn test_equation_equivalent_products_combine() {
    let t1 = TensorSpec::operand("t1", None, &[A, C]).unwrap();
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("twice")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[C, A]).unwrap()],
            vec![t1.clone(), t1],
        ])
        .build()
        .unwrap();
    let equation = Equation::new(&spec).unwrap();
    assert_eq!(equation.num_terms(), 1);
    assert_abs_diff_eq!(equation.terms().next().unwrap().factor(), 4.0);

    let tagged = EquationSpec::builder()
        .method("CASPT2")
        .label("tagged")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[C, A]).unwrap()],
            vec![
                TensorSpec::operand("t1", Some(0), &[A, C]).unwrap(),
                TensorSpec::operand("t1", Some(1), &[A, C]).unwrap(),
            ],
        ])
        .build()
        .unwrap();
    assert_eq!(Equation::new(&tagged).unwrap().num_terms(), 2);
}

#[test]
fn test_equation_merge_doubles_and_cancels() {
    let mut equation = Equation::new(&active_residual()).unwrap();
    let copy = equation.clone();
    equation.merge(&copy).unwrap();
    assert_eq!(equation.num_terms(), 1);
    assert_abs_diff_eq!(equation.terms().next().unwrap().factor(), 2.0);
    assert_eq!(equation.sources(), &["ra".to_string(), "ra".to_string()]);

    let mut positive = Equation::new(&single_excitation(1.0)).unwrap();
    let negative = Equation::new(&single_excitation(-1.0)).unwrap();
    positive.merge(&negative).unwrap();
    assert_eq!(positive.num_terms(), 0);

    let other_method = Equation::new(
        &EquationSpec::builder()
            .method("MRCI")
            .label("test")
            .families(&[vec![TensorSpec::operand("h1", None, &[C, C]).unwrap()]])
            .build()
            .unwrap(),
    )
    .unwrap();
    assert!(positive.merge(&other_method).is_err());
}

#[test]
fn test_equation_tree_types() {
    let mut equation = Equation::new(&single_excitation(1.0)).unwrap();
    assert_eq!(equation.tree_type(), TreeType::Residual);
    equation.set_tree_type(TreeType::Residual, Some(TreeType::Source));
    assert_eq!(equation.tree_type(), TreeType::Source);
    assert_eq!(equation.tree_label(), "s");
    equation.set_tree_type(TreeType::Density2, None);
    assert_eq!(equation.tree_label(), "Den1");
    assert_eq!(TreeType::Density1.to_string(), "density1");
    assert_eq!(
        serde_yaml::from_str::<TreeType>("deci").unwrap(),
        TreeType::Deci
    );
}

#[test]
fn test_equation_generate_single_excitation() {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("rb")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[C, A]).unwrap()],
            vec![TensorSpec::operand("t1", None, &[A, C]).unwrap()],
        ])
        .factor(-1.0)
        .scalar("e0")
        .build()
        .unwrap();
    let code = Equation::new(&spec).unwrap().generate().unwrap();
    assert!(code.contains("void compute_rb() {"));
    assert!(code.contains("for (auto& c0 : closed_) {"));
    assert!(code.contains("std::unique_ptr<double[]> odata = r->move_block(ohash);"));
    assert!(code.contains("std::unique_ptr<double[]> i0data = t1->get_block(i0hash);"));
    assert!(code.contains(
        "odata[ic0+c0->size()*(ia1)] += (-2.00) * e0 * i0data[ia1+a1->size()*(ic0)];"
    ));
    assert!(code.contains("r->put_block(ohash, odata);"));
}

#[test]
fn test_equation_generate_active_residual() {
    let equation = Equation::new(&active_residual()).unwrap();
    let code = equation.generate().unwrap();
    let helper = code.find("void compute_Gamma0() {").unwrap();
    let unit = code.find("void compute_ra() {").unwrap();
    assert!(helper < unit);
    assert!(code.contains(
        "std::shared_ptr<BlockStore<4>> Gamma0 = std::make_shared<BlockStore<4>>(\"Gamma0\");"
    ));
    assert!(code[..unit].contains("rdm2->get_block(i0hash)"));

    let body = &code[unit..];
    assert_eq!(body.matches("+=").count(), 1);
    assert!(body.contains("+= (1.00) * i0data"));
    assert!(body.contains("std::unique_ptr<double[]> i1data = Gamma0->get_block(i1hash);"));
    assert!(!body.contains("rdm2"));

    let mut doubled = equation.clone();
    doubled.merge(&equation).unwrap();
    let code = doubled.generate().unwrap();
    assert_eq!(code.matches("void compute_Gamma").count(), 1);
    let body = &code[code.find("void compute_ra() {").unwrap()..];
    assert_eq!(body.matches("+=").count(), 1);
    assert!(body.contains("+= (2.00) * i0data"));
}

#[test]
fn test_equation_generate_derivative_without_active() {
    let spec = EquationSpec::builder()
        .method("CASPT2")
        .label("dedci")
        .families(&[
            vec![TensorSpec::projector("proj", None, &[C, A]).unwrap()],
            vec![TensorSpec::operand("t1", None, &[A, C]).unwrap()],
        ])
        .braket((true, false))
        .build()
        .unwrap();
    let equation = Equation::new(&spec).unwrap();
    assert!(equation.terms().all(|term| term.is_derivative()));
    let code = equation.generate().unwrap();
    assert!(code.contains("(bra derivative)"));
    assert!(code.contains("rdm0deriv->get_block(i1hash)"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]
    #[test]
    fn test_equation_merge_commutes(a in -8i32..8, b in -8i32..8) {
        let (a, b) = (f64::from(a) * 0.5, f64::from(b) * 0.5);
        let ea = Equation::new(&single_excitation(a)).unwrap();
        let eb = Equation::new(&single_excitation(b)).unwrap();

        let mut ab = ea.clone();
        ab.merge(&eb).unwrap();
        let mut ba = eb.clone();
        ba.merge(&ea).unwrap();

        let factors = |eq: &Equation| eq.terms().map(|term| term.factor()).collect_vec();
        prop_assert_eq!(factors(&ab), factors(&ba));
        prop_assert_eq!(ab.num_terms(), usize::from(a + b != 0.0));
    }
}
