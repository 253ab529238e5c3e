//! Token accumulation.
//!
//! The scheduler holds at most one pending token. Each newly arriving
//! token is folded into it when the combined effect can still be
//! expressed as a single token; otherwise the pending one is flushed
//! first. Merging must preserve sequential semantics exactly: applying
//! the merged token equals applying the pending token and then the
//! incoming one.

use crate::token::{AsyncToken, TokenPayload};
use aether_core::{CompoundDimension, ContextOp, PathRelation};

/// Outcome of trying to fold one token into another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merge {
    Merged,
    /// The pair has no single-token equivalent; flush the pending token.
    NotRepresentable,
}

/// Fold `incoming` into `pending`.
///
/// Tokens merge only when they share an origin and a flag word, and when
/// their paths are related by ancestry. Disjoint paths would need a
/// common-ancestor operator that touches nodes neither token named, so
/// they never merge.
pub fn merge(pending: &mut AsyncToken, incoming: &AsyncToken) -> Merge {
    if pending.origin != incoming.origin || pending.flags != incoming.flags {
        return Merge::NotRepresentable;
    }
    match pending.path.relation(&incoming.path) {
        PathRelation::Equal => merge_equal(pending, incoming),
        PathRelation::Ancestor(rest) => merge_below(pending, &rest, incoming),
        PathRelation::Descendant(rest) => merge_above(pending, &rest, incoming),
        PathRelation::Disjoint => return Merge::NotRepresentable,
    }
    Merge::Merged
}

/// Both tokens address the same node.
fn merge_equal(pending: &mut AsyncToken, incoming: &AsyncToken) {
    match &incoming.payload {
        // a structural replace or clear makes the older token irrelevant
        TokenPayload::Assign(_) | TokenPayload::Clear => {
            pending.payload = incoming.payload.clone();
        }
        TokenPayload::Apply(op) => match &mut pending.payload {
            TokenPayload::Assign(value) => value.apply(op),
            TokenPayload::Apply(prev) => prev.apply(op),
            TokenPayload::Clear => {
                let mut combined = ContextOp::clear_all();
                combined.apply(op);
                pending.payload = TokenPayload::Apply(combined);
            }
        },
    }
}

/// The incoming token addresses a node `rest` below the pending one.
fn merge_below(pending: &mut AsyncToken, rest: &CompoundDimension, incoming: &AsyncToken) {
    match &mut pending.payload {
        // a pending assign carries the whole subtree; edit it in place
        TokenPayload::Assign(value) => match &incoming.payload {
            TokenPayload::Assign(sub) => value.assign_at(rest, sub),
            TokenPayload::Apply(op) => value.apply_at(rest, op),
            TokenPayload::Clear => value.clear_at(rest),
        },
        TokenPayload::Apply(prev) => {
            prev.apply(&incoming.payload_as_op().wrap_at(rest));
        }
        TokenPayload::Clear => {
            let mut combined = ContextOp::clear_all();
            combined.apply(&incoming.payload_as_op().wrap_at(rest));
            pending.payload = TokenPayload::Apply(combined);
        }
    }
}

/// The incoming token addresses a node `rest` above the pending one.
fn merge_above(pending: &mut AsyncToken, rest: &CompoundDimension, incoming: &AsyncToken) {
    match &incoming.payload {
        // the ancestor replace or clear covers the pending subtree
        TokenPayload::Assign(_) | TokenPayload::Clear => {
            pending.path = incoming.path.clone();
            pending.payload = incoming.payload.clone();
        }
        TokenPayload::Apply(op) => {
            // rebase the pending token to the ancestor, then compose
            let mut combined = pending.payload_as_op().wrap_at(rest);
            combined.apply(op);
            pending.path = incoming.path.clone();
            pending.payload = TokenPayload::Apply(combined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenFlags;
    use aether_core::Context;
    use aether_share::{Origin, ParticipantId, ParticipantKey};

    fn path(s: &str) -> CompoundDimension {
        CompoundDimension::parse(s).unwrap()
    }

    fn ctx(s: &str) -> Context {
        Context::parse(s).unwrap()
    }

    fn op(s: &str) -> ContextOp {
        ContextOp::parse(s).unwrap()
    }

    /// Applying the merged token must equal applying both in order.
    fn assert_merges(state: &str, first: AsyncToken, second: AsyncToken) {
        let mut sequential = ctx(state);
        run(&mut sequential, &first);
        run(&mut sequential, &second);

        let mut pending = first;
        assert_eq!(merge(&mut pending, &second), Merge::Merged);
        let mut merged = ctx(state);
        run(&mut merged, &pending);

        assert_eq!(merged.canonical(), sequential.canonical());
    }

    fn run(state: &mut Context, token: &AsyncToken) {
        match &token.payload {
            TokenPayload::Assign(value) => state.assign_at(&token.path, value),
            TokenPayload::Apply(o) => state.apply_at(&token.path, o),
            TokenPayload::Clear => state.clear_at(&token.path),
        }
    }

    #[test]
    fn test_same_node_assign_wins() {
        assert_merges(
            "<a:<1>>",
            AsyncToken::apply(path("a"), op("[b:[2]]")),
            AsyncToken::assign(path("a"), ctx("<9>")),
        );
    }

    #[test]
    fn test_same_node_assign_then_apply() {
        assert_merges(
            "<a:<1+x:<0>>>",
            AsyncToken::assign(path("a"), ctx("<b:<2>>")),
            AsyncToken::apply(path("a"), op("[c:[3]+b:[-]]")),
        );
    }

    #[test]
    fn test_same_node_apply_compose() {
        assert_merges(
            "<a:<1+b:<2>>>",
            AsyncToken::apply(path("a"), op("[--+b:[5]]")),
            AsyncToken::apply(path("a"), op("[c:[7]]")),
        );
    }

    #[test]
    fn test_same_node_clear_then_apply() {
        assert_merges(
            "<a:<1+b:<2+c:<3>>>>",
            AsyncToken::clear(path("a")),
            AsyncToken::apply(path("a"), op("[b:[9]]")),
        );
    }

    #[test]
    fn test_deeper_edit_of_pending_assign() {
        assert_merges(
            "<a:<0>>",
            AsyncToken::assign(path("a"), ctx("<b:<1>>")),
            AsyncToken::apply(path("a:b"), op("[c:[2]]")),
        );
        assert_merges(
            "<a:<0>>",
            AsyncToken::assign(path("a"), ctx("<b:<1>>")),
            AsyncToken::clear(path("a:b")),
        );
        assert_merges(
            "<a:<0>>",
            AsyncToken::assign(path("a"), ctx("<b:<1>>")),
            AsyncToken::assign(path("a:c"), ctx("<4>")),
        );
    }

    #[test]
    fn test_deeper_edit_of_pending_apply() {
        assert_merges(
            "<a:<b:<1>+c:<2>>>",
            AsyncToken::apply(path("a"), op("[--+b:[3]]")),
            AsyncToken::assign(path("a:c"), ctx("<5>")),
        );
    }

    #[test]
    fn test_deeper_edit_of_pending_clear() {
        assert_merges(
            "<a:<b:<1>+c:<2>>>",
            AsyncToken::clear(path("a")),
            AsyncToken::assign(path("a:b"), ctx("<7>")),
        );
    }

    #[test]
    fn test_ancestor_assign_covers_pending() {
        assert_merges(
            "<a:<b:<1>>>",
            AsyncToken::apply(path("a:b"), op("[2]")),
            AsyncToken::assign(path("a"), ctx("<c:<3>>")),
        );
        assert_merges(
            "<a:<b:<1>>>",
            AsyncToken::assign(path("a:b"), ctx("<2>")),
            AsyncToken::clear(path("a")),
        );
    }

    #[test]
    fn test_ancestor_apply_rebases_pending() {
        assert_merges(
            "<a:<b:<1>+c:<2>>>",
            AsyncToken::assign(path("a:b"), ctx("<8>")),
            AsyncToken::apply(path("a"), op("[--+b:[9:[0]]]")),
        );
        assert_merges(
            "<a:<b:<1>+c:<2>>>",
            AsyncToken::clear(path("a:b")),
            AsyncToken::apply(path("a"), op("[c:[-]]")),
        );
    }

    #[test]
    fn test_disjoint_paths_do_not_merge() {
        let mut pending = AsyncToken::assign(path("a:b"), ctx("<1>"));
        let incoming = AsyncToken::assign(path("a:c"), ctx("<2>"));
        assert_eq!(merge(&mut pending, &incoming), Merge::NotRepresentable);
        // pending must be untouched after a refused merge
        assert_eq!(pending.path, path("a:b"));
    }

    #[test]
    fn test_mismatched_identity_does_not_merge() {
        let origin = Origin::of(ParticipantKey::local(ParticipantId(1)));
        let mut pending = AsyncToken::clear(path("a")).with_origin(origin);
        let incoming = AsyncToken::clear(path("a"));
        assert_eq!(merge(&mut pending, &incoming), Merge::NotRepresentable);

        let mut pending = AsyncToken::clear(path("a"));
        let incoming = AsyncToken::clear(path("a")).with_flags(TokenFlags::fenced());
        assert_eq!(merge(&mut pending, &incoming), Merge::NotRepresentable);
    }
}
