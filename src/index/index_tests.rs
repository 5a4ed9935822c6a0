use std::str::FromStr;

use proptest::prelude::*;

use crate::index::{contractable, Index, IndexFactory, IndexRange, Spin, SpinFactory};

fn any_range() -> impl Strategy<Value = IndexRange> {
    prop_oneof![
        Just(IndexRange::Closed),
        Just(IndexRange::Active),
        Just(IndexRange::Virtual),
        Just(IndexRange::General),
    ]
}

proptest! {
    #[test]
    fn test_index_contractable_reflexive_and_general_permissive(r in any_range()) {
        prop_assert!(contractable(r, r));
        prop_assert!(contractable(r, IndexRange::General));
        prop_assert!(contractable(IndexRange::General, r));
    }

    #[test]
    fn test_index_contractable_symmetric(a in any_range(), b in any_range()) {
        prop_assert_eq!(contractable(a, b), contractable(b, a));
    }
}

#[test]
fn test_index_contractable_distinct_concrete_ranges() {
    let concrete = [IndexRange::Closed, IndexRange::Active, IndexRange::Virtual];
    for a in concrete.iter() {
        for b in concrete.iter() {
            assert_eq!(contractable(*a, *b), a == b);
        }
    }
}

#[test]
fn test_index_display_and_identity() {
    let mut factory = IndexFactory::default();
    let c0 = factory.next_index(IndexRange::Closed);
    let g1 = factory.next_index(IndexRange::General);
    assert_eq!(c0.str(false), "c0");
    assert_eq!(c0.str(true), "c0+");
    assert_eq!(g1.str_gen(), "g1");
    assert_eq!(g1.str_elem(), "ig1");

    let a1 = g1.with_range(IndexRange::Virtual);
    assert_eq!(a1.num(), g1.num());
    assert!(!a1.identical(&g1));
    assert!(a1.identical(&Index::new(1, IndexRange::Virtual)));
    assert!(g1.contractable(&c0));
    assert!(!a1.contractable(&c0));
}

#[test]
fn test_index_range_parsing() {
    assert_eq!(IndexRange::from_str("c").unwrap(), IndexRange::Closed);
    assert_eq!(IndexRange::from_str("active").unwrap(), IndexRange::Active);
    assert_eq!(IndexRange::from_str("a").unwrap(), IndexRange::Virtual);
    assert_eq!(IndexRange::from_str("g").unwrap(), IndexRange::General);
    assert!(IndexRange::from_str("q").is_err());

    let ranges: Vec<IndexRange> = serde_yaml::from_str("[c, x, a, g]").unwrap();
    assert_eq!(
        ranges,
        vec![
            IndexRange::Closed,
            IndexRange::Active,
            IndexRange::Virtual,
            IndexRange::General
        ]
    );
}

#[test]
fn test_spin_coupling() {
    let mut spins = SpinFactory::default();
    let s0 = spins.next_spin(false);
    let s1 = spins.next_spin(true);
    assert_eq!(s0.loop_factor(), 2.0);
    assert_eq!(s1.loop_factor(), 1.0);

    let coupled = s1.coupled_onto(&s0);
    assert_eq!(coupled.num(), 0);
    assert!(coupled.is_alpha());
    assert!(coupled.same_label(&s0));
    assert_eq!(Spin::new(3, false).to_string(), "s3");
}
