//! Property-based tests for the Context/ContextOp algebra.
//!
//! The laws verified here are the ones the rest of the system leans on:
//!  - basecount equals the number of populated leaves, always
//!  - op composition: applying a.apply(&b) equals applying a then b
//!  - refinement is reflexive and transitive, with Minimal at the bottom
//!  - canonical text round-trips for both value and operator trees

use aether_core::{BaseValue, CompoundDimension, Context, ContextOp, Dimension};
use proptest::prelude::*;
use std::cmp::Ordering;

fn dim_strategy() -> impl Strategy<Value = Dimension> {
    prop_oneof![
        "[a-c]".prop_map(Dimension::name),
        (0i64..3).prop_map(Dimension::index),
    ]
}

fn base_strategy() -> impl Strategy<Value = BaseValue> {
    prop_oneof![
        Just(BaseValue::Minimal),
        Just(BaseValue::Maximal),
        (-100i32..100).prop_map(|n| BaseValue::number(n as f64)),
        "[a-z]{0,4}".prop_map(BaseValue::string),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(BaseValue::Binary),
    ]
}

fn context_strategy() -> impl Strategy<Value = Context> {
    let leaf = prop::option::of(base_strategy()).prop_map(|b| match b {
        Some(v) => Context::with_base(v),
        None => Context::new(),
    });
    leaf.prop_recursive(3, 24, 4, |inner| {
        (
            prop::option::of(base_strategy()),
            prop::collection::btree_map(dim_strategy(), inner, 0..4),
        )
            .prop_map(|(base, children)| {
                let mut ctx = Context::new();
                if let Some(v) = base {
                    ctx.set_base(v);
                }
                for (d, child) in children {
                    ctx.assign_at(&CompoundDimension::new(vec![d]), &child);
                }
                ctx
            })
    })
}

fn op_strategy() -> impl Strategy<Value = ContextOp> {
    let leaf = (prop::option::of(base_strategy()), any::<bool>(), any::<bool>()).prop_map(
        |(base, cb, cd)| {
            let mut op = ContextOp::new();
            if let Some(v) = base {
                op.set_base(v);
            }
            op.set_clear_base(cb);
            op.set_clear_dims(cd);
            op
        },
    );
    leaf.prop_recursive(3, 24, 4, |inner| {
        (
            prop::option::of(base_strategy()),
            any::<bool>(),
            any::<bool>(),
            prop::collection::btree_map(dim_strategy(), inner, 0..4),
        )
            .prop_map(|(base, cb, cd, children)| {
                let mut op = ContextOp::new();
                if let Some(v) = base {
                    op.set_base(v);
                }
                op.set_clear_base(cb);
                op.set_clear_dims(cd);
                for (d, child) in children {
                    *op.value(d) = child;
                }
                op.normalize();
                op
            })
    })
}

/// Recompute the populated-leaf count the slow way.
fn true_basecount(ctx: &Context) -> usize {
    ctx.base().is_some() as usize
        + ctx.children().map(|(_, c)| true_basecount(c)).sum::<usize>()
}

fn check_counts(ctx: &Context) {
    assert_eq!(ctx.basecount(), true_basecount(ctx));
    for (_, child) in ctx.children() {
        check_counts(child);
    }
}

proptest! {
    #[test]
    fn basecount_invariant_holds(ctx in context_strategy()) {
        check_counts(&ctx);
    }

    #[test]
    fn basecount_invariant_survives_apply(
        mut ctx in context_strategy(),
        op in op_strategy()
    ) {
        ctx.apply(&op);
        check_counts(&ctx);
    }

    #[test]
    fn basecount_invariant_survives_path_mutation(
        mut ctx in context_strategy(),
        value in context_strategy(),
        dims in prop::collection::vec(dim_strategy(), 0..3)
    ) {
        let path = CompoundDimension::new(dims);
        ctx.assign_at(&path, &value);
        check_counts(&ctx);
        ctx.clear_at(&path);
        check_counts(&ctx);
    }

    #[test]
    fn op_composition_matches_sequential(
        target in context_strategy(),
        a in op_strategy(),
        b in op_strategy()
    ) {
        let mut sequential = target.clone();
        sequential.apply(&a);
        sequential.apply(&b);

        let mut composed = a.clone();
        composed.apply(&b);
        let mut merged = target;
        merged.apply(&composed);

        prop_assert_eq!(merged.canonical(), sequential.canonical());
    }

    #[test]
    fn op_identity_is_neutral(target in context_strategy()) {
        let mut applied = target.clone();
        applied.apply(&ContextOp::new());
        prop_assert_eq!(applied.canonical(), target.canonical());
    }

    #[test]
    fn from_assign_forces_exact_value(
        mut target in context_strategy(),
        value in context_strategy()
    ) {
        target.apply(&ContextOp::from_assign(&value));
        prop_assert_eq!(target.canonical(), value.canonical());
    }

    #[test]
    fn refinement_is_reflexive(ctx in context_strategy()) {
        prop_assert!(ctx.refines_to(&ctx));
    }

    #[test]
    fn refinement_is_transitive(
        a in context_strategy(),
        b in context_strategy(),
        c in context_strategy()
    ) {
        if a.refines_to(&b) && b.refines_to(&c) {
            prop_assert!(a.refines_to(&c));
        }
    }

    #[test]
    fn empty_refines_to_everything(ctx in context_strategy()) {
        prop_assert!(Context::new().refines_to(&ctx));
    }

    #[test]
    fn canonical_round_trips_context(ctx in context_strategy()) {
        let parsed = Context::parse(&ctx.canonical()).unwrap();
        prop_assert_eq!(&parsed, &ctx);
        prop_assert_eq!(parsed.basecount(), ctx.basecount());
    }

    #[test]
    fn canonical_round_trips_op(op in op_strategy()) {
        let parsed = ContextOp::parse(&op.canonical()).unwrap();
        prop_assert_eq!(&parsed, &op);
        prop_assert_eq!(parsed.blankcount(), op.blankcount());
    }

    #[test]
    fn compare_is_antisymmetric(
        a in context_strategy(),
        b in context_strategy()
    ) {
        match a.compare(&b) {
            Ordering::Less => prop_assert_eq!(b.compare(&a), Ordering::Greater),
            Ordering::Greater => prop_assert_eq!(b.compare(&a), Ordering::Less),
            Ordering::Equal => prop_assert_eq!(b.compare(&a), Ordering::Equal),
        }
    }
}
