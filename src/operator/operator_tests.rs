use approx::assert_abs_diff_eq;

use crate::index::{Index, IndexFactory, IndexRange, SpinFactory};
use crate::operator::{Operator, OperatorVariant, Paired, Role, SlotKind};
use crate::tensor::{Tensor, TensorSpec};

use IndexRange::{Active as X, Closed as C, General as G, Virtual as A};

fn build(label: &str, ranges: &[IndexRange], factory: &mut IndexFactory) -> Tensor {
    TensorSpec::operand(label, None, ranges)
        .unwrap()
        .instantiate(factory)
}

#[test]
fn test_operator_construction() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();

    let f1 = Operator::from_tensor(&build("f1", &[G, G], &mut factory), &mut spins).unwrap();
    assert_eq!(f1.variant(), OperatorVariant::General);
    assert_eq!(f1.slots()[0].role(), Role::Creation);
    assert_eq!(f1.slots()[1].role(), Role::Annihilation);
    assert!(f1.slots()[0].spin().same_label(&f1.slots()[1].spin()));
    assert!(f1.general());
    assert_eq!(f1.num_general(), 2);

    let t2 = Operator::from_tensor(&build("t2", &[X, C, A, A], &mut factory), &mut spins).unwrap();
    assert_eq!(t2.variant(), OperatorVariant::Excitation);
    let slots = t2.slots();
    assert!(slots[0].spin().same_label(&slots[3].spin()));
    assert!(slots[1].spin().same_label(&slots[2].spin()));
    assert!(!slots[0].spin().same_label(&slots[1].spin()));
    assert_eq!(slots[0].kind(), SlotKind::Active);
    assert_eq!(t2.num_active_dagger(), 1);
    assert_eq!(t2.num_active_nodagger(), 0);
    assert_eq!(t2.num_dagger(), 1);
    assert_eq!(t2.num_nodagger(), 2);
    assert!(!t2.contracted());

    let gamma = Operator::from_tensor(&build("p", &[X, X], &mut factory), &mut spins).unwrap();
    assert_eq!(gamma.variant(), OperatorVariant::Active);
    assert!(gamma.contracted());
    assert_eq!(gamma.active_slots().count(), 2);

    let odd = Tensor::new(
        "odd",
        None,
        &[Index::new(90, C), Index::new(91, C), Index::new(92, C)],
        false,
    );
    assert!(Operator::from_tensor(&odd, &mut spins).is_err());
}

#[test]
fn test_operator_mutate_general() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();
    let mut v2 =
        Operator::from_tensor(&build("v2", &[G, G, G, G], &mut factory), &mut spins).unwrap();

    // Bits 0b0101: slots 0 and 2 become active.
    let mut bits = 0b0101;
    let retags = v2.mutate_general(&mut bits);
    assert_eq!(bits, 0);
    assert_eq!(retags.len(), 2);
    assert_eq!(retags[0].0, Index::new(0, G));
    assert_eq!(retags[0].1, Index::new(0, X));
    assert_eq!(retags[1].1, Index::new(2, X));
    assert_eq!(v2.slots()[0].kind(), SlotKind::Active);
    assert_eq!(v2.slots()[1].kind(), SlotKind::Normal);
    assert_eq!(v2.slots()[2].kind(), SlotKind::Active);
    assert_eq!(v2.num_general(), 2);

    // Remaining bits carry over to the next operator.
    let mut h1 = Operator::from_tensor(&build("h1", &[G, G], &mut factory), &mut spins).unwrap();
    let mut bits = 0b10;
    h1.mutate_general(&mut bits);
    assert_eq!(h1.slots()[0].kind(), SlotKind::Normal);
    assert_eq!(h1.slots()[1].kind(), SlotKind::Active);
}

#[test]
fn test_operator_first_dagger_noactive() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();
    let mut t2 =
        Operator::from_tensor(&build("t2", &[X, C, A, A], &mut factory), &mut spins).unwrap();

    let paired = t2.first_dagger_noactive().unwrap();
    assert_eq!(paired.position, 1);
    assert_eq!(paired.index.range(), C);
    assert_eq!(t2.slots()[1].kind(), SlotKind::Contracted);
    assert!(t2.first_dagger_noactive().is_err());
}

#[test]
fn test_operator_contraction_ordering_rules() {
    let mut spins = SpinFactory::default();
    let s0 = spins.next_spin(false);
    let mut factory = IndexFactory::default();

    // Closed pair: creation left of annihilation contracts.
    let mut op = Operator::from_tensor(&build("h1", &[C, C], &mut factory), &mut spins).unwrap();
    let left = Paired {
        index: Index::new(50, C),
        spin: s0,
        position: 0,
    };
    let contraction = op.contract(&left, 2, 0).unwrap();
    assert_abs_diff_eq!(contraction.factor, 1.0);
    assert_eq!(contraction.survivor, Index::new(50, C));
    assert!(!contraction.closed_loop());
    assert_eq!(op.slots()[1].kind(), SlotKind::Contracted);

    // Closed pair with the creation to the right vanishes.
    let mut op = Operator::from_tensor(&build("h1", &[C, C], &mut factory), &mut spins).unwrap();
    let right = Paired {
        index: Index::new(51, C),
        spin: s0,
        position: 5,
    };
    assert!(op.contract(&right, 0, 0).is_none());
    assert_eq!(op.slots()[1].kind(), SlotKind::Normal);

    // Virtual pair only contracts with the annihilation to the left.
    let mut op = Operator::from_tensor(&build("t1", &[A, A], &mut factory), &mut spins).unwrap();
    let virt_left = Paired {
        index: Index::new(52, A),
        spin: s0,
        position: 0,
    };
    assert!(op.contract(&virt_left, 2, 0).is_none());
    let virt_right = Paired {
        index: Index::new(53, A),
        spin: s0,
        position: 9,
    };
    assert!(op.contract(&virt_right, 2, 0).is_some());

    // Mismatched specific ranges never contract.
    let mut op = Operator::from_tensor(&build("t1", &[C, C], &mut factory), &mut spins).unwrap();
    assert!(op.contract(&virt_right, 0, 0).is_none());
}

#[test]
fn test_operator_general_resolution_and_survival() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();
    let s = spins.next_spin(false);

    let mut op = Operator::from_tensor(&build("f1", &[G, G], &mut factory), &mut spins).unwrap();
    let g_left = Paired {
        index: Index::new(40, G),
        spin: s,
        position: 0,
    };
    let contraction = op.contract(&g_left, 4, 0).unwrap();
    assert_eq!(contraction.survivor, Index::new(40, C));
    assert_eq!(contraction.partner, Index::new(1, G));

    let mut op = Operator::from_tensor(&build("f1", &[G, G], &mut factory), &mut spins).unwrap();
    let g_right = Paired {
        index: Index::new(41, G),
        spin: s,
        position: 10,
    };
    let contraction = op.contract(&g_right, 0, 0).unwrap();
    assert_eq!(contraction.survivor, Index::new(41, A));

    assert_eq!(
        Operator::survive(&Index::new(7, G), &Index::new(8, C), C),
        Index::new(8, C)
    );
    assert_eq!(
        Operator::survive(&Index::new(7, C), &Index::new(8, G), C),
        Index::new(7, C)
    );
    assert_eq!(
        Operator::survive(&Index::new(7, A), &Index::new(8, A), A),
        Index::new(7, A)
    );
}

#[test]
fn test_operator_spin_loop_factor() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();
    let mut op = Operator::from_tensor(&build("h1", &[C, C], &mut factory), &mut spins).unwrap();
    let paired = op.first_dagger_noactive().unwrap();
    let contraction = op.contract(&paired, 0, 0).unwrap();
    assert!(contraction.closed_loop());
    assert_abs_diff_eq!(contraction.factor, 2.0);
    assert!(op.contracted());

    let alpha = TensorSpec::builder()
        .label("e1")
        .ranges(&[C, C])
        .alpha(true)
        .build()
        .unwrap()
        .instantiate(&mut factory);
    let mut op = Operator::from_tensor(&alpha, &mut spins).unwrap();
    let paired = op.first_dagger_noactive().unwrap();
    let contraction = op.contract(&paired, 0, 0).unwrap();
    assert_abs_diff_eq!(contraction.factor, 1.0);
}

#[test]
fn test_operator_permute() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();

    let t2 = build("t2", &[A, A, C, C], &mut factory);
    let mut op = Operator::from_tensor(&t2, &mut spins).unwrap();
    let (permuted, sign) = op.permute(false);
    assert!(permuted);
    assert_abs_diff_eq!(sign, 1.0);
    let nums = op
        .to_tensor()
        .indices()
        .iter()
        .map(|index| index.num())
        .collect::<Vec<_>>();
    assert_eq!(nums, vec![1, 0, 3, 2]);
    assert!(op.slots()[0].spin().same_label(&op.slots()[3].spin()));

    let (permuted, _) = op.permute(false);
    assert!(!permuted);
    assert!(op.to_tensor().indices() == t2.indices());

    // A projector keeps its range signature.
    let proj = TensorSpec::projector("proj", Some(3), &[C, X, X, A])
        .unwrap()
        .instantiate(&mut factory);
    let mut op = Operator::from_tensor(&proj, &mut spins).unwrap();
    assert!(!op.permute(true).0);
    assert!(op.permute(false).0);
    assert_eq!(op.to_tensor().range_signature(), "xcax");

    let h1 = build("h1", &[G, G], &mut factory);
    let mut op = Operator::from_tensor(&h1, &mut spins).unwrap();
    assert!(!op.permute(false).0);
}

#[test]
fn test_operator_identical_and_display() {
    let mut factory = IndexFactory::default();
    let mut spins = SpinFactory::default();
    let t1 = build("t1", &[A, C], &mut factory);
    let op = Operator::from_tensor(&t1, &mut spins).unwrap();
    let same = Operator::from_tensor(&t1, &mut spins).unwrap();
    assert!(op.identical(&same));

    let mut other = same.clone();
    let _ = other.first_dagger_noactive().unwrap();
    assert!(!op.identical(&other));
    assert_eq!(op.to_string(), "E[t1] a0+(s0) c1(s0)");
    assert_eq!(other.to_string(), "E[t1] a0+*(s1) c1(s1)");
}
