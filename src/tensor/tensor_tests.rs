use indexmap::IndexMap;

use crate::index::{Index, IndexFactory, IndexRange};
use crate::tensor::{Tensor, TensorSpec};

use IndexRange::{Active as X, Closed as C, General as G, Virtual as A};

#[test]
fn test_tensor_spec_validation() {
    assert!(TensorSpec::operand("t2", Some(0), &[C, C, A, A]).is_ok());
    assert!(TensorSpec::operand("e0", None, &[]).is_ok());
    assert!(TensorSpec::operand("t3", None, &[C, C, A]).is_err());
    assert!(TensorSpec::operand("", None, &[C, A]).is_err());
    assert!(TensorSpec::builder().label("f1").build().is_err());

    let proj = TensorSpec::projector("proj", Some(4), &[X, C, X, A]).unwrap();
    assert!(proj.is_projector());
    assert_eq!(proj.rank(), 4);
    assert_eq!(proj.to_string(), "proj4[x,c,x,a]");
}

#[test]
fn test_tensor_instantiate_and_structural_equality() {
    let mut factory = IndexFactory::default();
    let spec = TensorSpec::operand("t2", Some(1), &[X, C, A, A]).unwrap();
    let t = spec.instantiate(&mut factory);
    let u = spec.instantiate(&mut factory);
    assert_eq!(t.indices()[0], Index::new(0, X));
    assert_eq!(u.indices()[0], Index::new(4, X));
    assert_eq!(t, u);
    assert_eq!(t.range_signature(), "xcaa");
    assert!(!t.all_active());

    let other_tag = TensorSpec::operand("t2", Some(2), &[X, C, A, A])
        .unwrap()
        .instantiate(&mut factory);
    assert_ne!(t, other_tag);

    let f1 = TensorSpec::operand("f1", None, &[G, G])
        .unwrap()
        .instantiate(&mut factory);
    assert_eq!(f1.to_string(), "f1(g12, g13)");
}

#[test]
fn test_tensor_block_key_and_relabelling() {
    let t = Tensor::new(
        "t2",
        None,
        &[
            Index::new(0, X),
            Index::new(1, C),
            Index::new(2, A),
            Index::new(3, A),
        ],
        false,
    );
    assert_eq!(
        t.block_key(),
        "vec(a3->key(), a2->key(), c1->key(), x0->key())"
    );
    assert_eq!(
        Tensor::new("e", None, &[], false).block_key(),
        "vec()"
    );

    let mut map = IndexMap::new();
    map.insert(Index::new(1, C), Index::new(7, C));
    let relabelled = t.relabelled(&map);
    assert_eq!(relabelled.indices()[1], Index::new(7, C));
    assert_eq!(relabelled.indices()[0], Index::new(0, X));
}

#[test]
fn test_tensor_fits_declared() {
    let mut factory = IndexFactory::default();
    let v2 = TensorSpec::operand("v2", None, &[G, G, G, G])
        .unwrap()
        .instantiate(&mut factory);
    let resolved = v2.with_indices(&[
        Index::new(0, C),
        Index::new(1, X),
        Index::new(2, X),
        Index::new(3, C),
    ]);
    assert_eq!(resolved.declared_ranges(), &[G, G, G, G]);
    assert!(resolved.fits_declared());
    assert!(resolved
        .with_indices(&[
            Index::new(1, X),
            Index::new(0, C),
            Index::new(3, C),
            Index::new(2, X),
        ])
        .fits_declared());

    let t2 = TensorSpec::operand("t2", None, &[X, C, A, A])
        .unwrap()
        .instantiate(&mut factory);
    assert!(t2.fits_declared());
    let swapped = t2.with_indices(&[
        t2.indices()[1],
        t2.indices()[0],
        t2.indices()[3],
        t2.indices()[2],
    ]);
    assert!(!swapped.fits_declared());
}

#[test]
fn test_tensor_spec_generate() {
    let unit = TensorSpec::operand("v2", None, &[G, G, G, G])
        .unwrap()
        .generate();
    assert!(unit.contains(
        "std::shared_ptr<BlockStore<4>> v2 = std::make_shared<BlockStore<4>>(\"v2\");"
    ));
}
