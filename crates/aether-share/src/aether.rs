//! The shared tree: Context state plus attached observers.
//!
//! Observers live in a sparse tree parallel to the value tree; each observer
//! node tracks a `headcount` (participants at or below it) so unobserved
//! branches can be pruned cheaply. Mutations propagate three ways:
//!
//!  - downward: participants attached inside the mutated subtree receive the
//!    change projected onto their attachment point,
//!  - at the node: participants attached exactly there receive the payload,
//!  - upward: participants at strict ancestors receive the payload plus the
//!    path from their attachment point to the mutated node.
//!
//! Mutators return the resulting `Delivery` list instead of invoking
//! callbacks inline; the caller (normally the scheduler) routes them through
//! the fan-out machinery, which also applies suppression rules.

use crate::error::{Result, ShareError};
use crate::participant::{
    Notification, NotifyKind, Origin, Participant, ParticipantKey, SinkId,
};
use aether_core::{CompoundDimension, Context, ContextOp, Dimension};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One pending notification: who gets it and what they get.
#[derive(Clone)]
pub struct Delivery {
    pub key: ParticipantKey,
    pub participant: Arc<dyn Participant>,
    pub event: Notification,
}

#[derive(Default)]
struct ObserverNode {
    participants: Vec<(ParticipantKey, Arc<dyn Participant>)>,
    children: BTreeMap<Dimension, ObserverNode>,
    headcount: usize,
}

impl ObserverNode {
    fn is_empty(&self) -> bool {
        self.headcount == 0
    }

    /// Collect every participant in this subtree with its path relative to
    /// this node.
    fn collect(
        &self,
        rel: &CompoundDimension,
        out: &mut Vec<(ParticipantKey, Arc<dyn Participant>, CompoundDimension)>,
    ) {
        for (key, p) in &self.participants {
            out.push((*key, p.clone(), rel.clone()));
        }
        for (d, child) in &self.children {
            let mut deeper = rel.clone();
            deeper.push(d.clone());
            child.collect(&deeper, out);
        }
    }
}

type Attached = (ParticipantKey, Arc<dyn Participant>, CompoundDimension);

/// A Context tree with attached participants.
#[derive(Default)]
pub struct Aether {
    state: Context,
    observers: ObserverNode,
    registry: HashMap<ParticipantKey, CompoundDimension>,
}

impl Aether {
    pub fn new() -> Self {
        Aether::default()
    }

    pub fn state(&self) -> &Context {
        &self.state
    }

    /// Current value at a path, if any content exists there.
    pub fn view(&self, path: &CompoundDimension) -> Option<&Context> {
        self.state.get_at(path)
    }

    pub fn participant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn attachment(&self, key: &ParticipantKey) -> Option<&CompoundDimension> {
        self.registry.get(key)
    }

    /// Attach a participant at `path`.
    pub fn join(
        &mut self,
        key: ParticipantKey,
        path: CompoundDimension,
        participant: Arc<dyn Participant>,
    ) -> Result<()> {
        if self.registry.contains_key(&key) {
            return Err(ShareError::DuplicateParticipant(key));
        }
        let mut node = &mut self.observers;
        node.headcount += 1;
        for d in path.dims() {
            node = node.children.entry(d.clone()).or_default();
            node.headcount += 1;
        }
        node.participants.push((key, participant));
        self.registry.insert(key, path);
        debug!(participant = ?key, "joined");
        Ok(())
    }

    /// Detach a participant; returns its attachment path.
    pub fn leave(&mut self, key: ParticipantKey) -> Result<CompoundDimension> {
        let path = self
            .registry
            .remove(&key)
            .ok_or(ShareError::UnknownParticipant(key))?;
        Self::detach(&mut self.observers, path.dims(), &key);
        debug!(participant = ?key, "left");
        Ok(path)
    }

    fn detach(node: &mut ObserverNode, dims: &[Dimension], key: &ParticipantKey) {
        node.headcount -= 1;
        match dims.split_first() {
            None => node.participants.retain(|(k, _)| k != key),
            Some((d, rest)) => {
                if let Some(child) = node.children.get_mut(d) {
                    Self::detach(child, rest, key);
                    if child.is_empty() {
                        node.children.remove(d);
                    }
                }
            }
        }
    }

    /// Participants at strict ancestors of `path` (with the suffix from
    /// their attachment down to `path`) and participants at or below `path`
    /// (with their path relative to `path`).
    fn split_observers(&self, path: &CompoundDimension) -> (Vec<Attached>, Vec<Attached>) {
        let mut ancestors = Vec::new();
        let mut below = Vec::new();
        let dims = path.dims();
        let mut node = &self.observers;
        for (depth, d) in dims.iter().enumerate() {
            let suffix = CompoundDimension::new(dims[depth..].to_vec());
            for (key, p) in &node.participants {
                ancestors.push((*key, p.clone(), suffix.clone()));
            }
            match node.children.get(d) {
                Some(child) => node = child,
                None => return (ancestors, below),
            }
        }
        node.collect(&CompoundDimension::root(), &mut below);
        (ancestors, below)
    }

    fn prior_content(&self, path: &CompoundDimension, rel: &CompoundDimension) -> bool {
        self.state
            .get_at(path)
            .and_then(|t| t.get_at(rel))
            .is_some_and(|c| !c.is_empty())
    }

    /// Structural replace at `path`.
    pub fn assign(
        &mut self,
        path: &CompoundDimension,
        value: &Context,
        origin: Origin,
        sequence: u64,
    ) -> Vec<Delivery> {
        let target_empty = self.state.get_at(path).map_or(true, |c| c.is_empty());
        if value.is_empty() && target_empty {
            return Vec::new();
        }
        let (ancestors, below) = self.split_observers(path);
        let prior: Vec<bool> = below
            .iter()
            .map(|(_, _, rel)| self.prior_content(path, rel))
            .collect();
        self.state.assign_at(path, value);

        let mut out = Vec::new();
        for ((key, p, rel), had) in below.into_iter().zip(prior) {
            match value.get_at(&rel) {
                Some(sub) if !sub.is_empty() => out.push(delivery(
                    key,
                    p,
                    NotifyKind::Assign(sub.clone()),
                    CompoundDimension::root(),
                    origin,
                    sequence,
                )),
                _ if had => out.push(delivery(
                    key,
                    p,
                    NotifyKind::Clear,
                    CompoundDimension::root(),
                    origin,
                    sequence,
                )),
                _ => {}
            }
        }
        for (key, p, suffix) in ancestors {
            out.push(delivery(
                key,
                p,
                NotifyKind::Assign(value.clone()),
                suffix,
                origin,
                sequence,
            ));
        }
        out
    }

    /// Apply an operator at `path`.
    pub fn apply(
        &mut self,
        path: &CompoundDimension,
        op: &ContextOp,
        origin: Origin,
        sequence: u64,
    ) -> Vec<Delivery> {
        if op.is_empty() {
            return Vec::new();
        }
        let (ancestors, below) = self.split_observers(path);
        let prior: Vec<bool> = below
            .iter()
            .map(|(_, _, rel)| self.prior_content(path, rel))
            .collect();
        self.state.apply_at(path, op);

        let mut out = Vec::new();
        for ((key, p, rel), had) in below.into_iter().zip(prior) {
            match project_op(op, &rel) {
                OpProjection::Op(sub) if !sub.is_empty() => out.push(delivery(
                    key,
                    p,
                    NotifyKind::Apply(sub.clone()),
                    CompoundDimension::root(),
                    origin,
                    sequence,
                )),
                OpProjection::Cleared if had => out.push(delivery(
                    key,
                    p,
                    NotifyKind::Clear,
                    CompoundDimension::root(),
                    origin,
                    sequence,
                )),
                _ => {}
            }
        }
        for (key, p, suffix) in ancestors {
            out.push(delivery(
                key,
                p,
                NotifyKind::Apply(op.clone()),
                suffix,
                origin,
                sequence,
            ));
        }
        out
    }

    /// Clear the subtree at `path`.
    pub fn clear(
        &mut self,
        path: &CompoundDimension,
        origin: Origin,
        sequence: u64,
    ) -> Vec<Delivery> {
        if self.state.get_at(path).map_or(true, |c| c.is_empty()) {
            return Vec::new();
        }
        let (ancestors, below) = self.split_observers(path);
        let prior: Vec<bool> = below
            .iter()
            .map(|(_, _, rel)| self.prior_content(path, rel))
            .collect();
        self.state.clear_at(path);

        let mut out = Vec::new();
        for ((key, p, rel), had) in below.into_iter().zip(prior) {
            let _ = rel;
            if had {
                out.push(delivery(
                    key,
                    p,
                    NotifyKind::Clear,
                    CompoundDimension::root(),
                    origin,
                    sequence,
                ));
            }
        }
        for (key, p, suffix) in ancestors {
            out.push(delivery(key, p, NotifyKind::Clear, suffix, origin, sequence));
        }
        out
    }

    /// Prune without upward propagation: drop all content below `path`.
    /// Observed positions that had content still learn they were cleared;
    /// nothing above the pruned subtree is told anything.
    pub fn clear_no_propagate(&mut self, path: &CompoundDimension, sequence: u64) -> Vec<Delivery> {
        if self.state.get_at(path).map_or(true, |c| c.is_empty()) {
            return Vec::new();
        }
        let (_, below) = self.split_observers(path);
        let prior: Vec<bool> = below
            .iter()
            .map(|(_, _, rel)| self.prior_content(path, rel))
            .collect();
        self.state.clear_at(path);

        below
            .into_iter()
            .zip(prior)
            .filter(|(_, had)| *had)
            .map(|((key, p, _), _)| {
                delivery(
                    key,
                    p,
                    NotifyKind::Clear,
                    CompoundDimension::root(),
                    Origin::anonymous(),
                    sequence,
                )
            })
            .collect()
    }

    /// Detach every participant owned by `sink`, kicking each one.
    pub fn detach_sink(&mut self, sink: SinkId, sequence: u64) -> Vec<Delivery> {
        let keys: Vec<ParticipantKey> = self
            .registry
            .keys()
            .filter(|k| k.sink == Some(sink))
            .copied()
            .collect();
        let mut out = Vec::new();
        for key in keys {
            if let Some(d) = self.kick_one(key, sequence) {
                out.push(d);
            }
        }
        out
    }

    /// Tear the whole tree down: every participant is kicked, bottom-up,
    /// and all state is dropped.
    pub fn teardown(&mut self, sequence: u64) -> Vec<Delivery> {
        let keys: Vec<ParticipantKey> = self.registry.keys().copied().collect();
        let mut out = Vec::new();
        for key in keys {
            if let Some(d) = self.kick_one(key, sequence) {
                out.push(d);
            }
        }
        self.state.clear();
        out
    }

    fn kick_one(&mut self, key: ParticipantKey, sequence: u64) -> Option<Delivery> {
        let path = self.registry.get(&key)?.clone();
        let mut node = &self.observers;
        for d in path.dims() {
            node = node.children.get(d)?;
        }
        let participant = node
            .participants
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, p)| p.clone())?;
        self.leave(key).ok()?;
        Some(delivery(
            key,
            participant,
            NotifyKind::Kick,
            CompoundDimension::root(),
            Origin::anonymous(),
            sequence,
        ))
    }
}

fn delivery(
    key: ParticipantKey,
    participant: Arc<dyn Participant>,
    kind: NotifyKind,
    path: CompoundDimension,
    origin: Origin,
    sequence: u64,
) -> Delivery {
    Delivery {
        key,
        participant,
        event: Notification {
            kind,
            path,
            origin,
            sequence,
        },
    }
}

enum OpProjection<'a> {
    Op(&'a ContextOp),
    Cleared,
    Untouched,
}

/// Project an op onto a path below its target. When the op does not mention
/// a component, a `clear_dims` at the last mentioned node means the whole
/// branch was deleted; otherwise the branch is untouched.
fn project_op<'a>(op: &'a ContextOp, rel: &CompoundDimension) -> OpProjection<'a> {
    let mut node = op;
    for d in rel.dims() {
        match node.child(d) {
            Some(child) => node = child,
            None => {
                return if node.clear_dims() {
                    OpProjection::Cleared
                } else {
                    OpProjection::Untouched
                }
            }
        }
    }
    OpProjection::Op(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ParticipantId;
    use parking_lot::Mutex;

    /// Test participant that records everything it is told.
    struct Recorder {
        events: Mutex<Vec<Notification>>,
        pure: bool,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                events: Mutex::new(Vec::new()),
                pure: false,
            })
        }

        fn events(&self) -> Vec<Notification> {
            self.events.lock().clone()
        }
    }

    impl Participant for Recorder {
        fn pure(&self) -> bool {
            self.pure
        }

        fn notify(&self, event: Notification) {
            self.events.lock().push(event);
        }
    }

    fn deliver(deliveries: Vec<Delivery>) {
        for d in deliveries {
            let event = if d.participant.pure() {
                d.event.operator_form()
            } else {
                d.event
            };
            d.participant.notify(event);
        }
    }

    fn key(n: u64) -> ParticipantKey {
        ParticipantKey::local(ParticipantId(n))
    }

    #[test]
    fn test_spec_scenario_projection() {
        let mut aether = Aether::new();
        let at_temp = Recorder::new();
        let at_reactor = Recorder::new();
        let elsewhere = Recorder::new();
        aether
            .join(key(1), "reactor:core:temp".into(), at_temp.clone())
            .unwrap();
        aether
            .join(key(2), "reactor".into(), at_reactor.clone())
            .unwrap();
        aether
            .join(key(3), "turbine".into(), elsewhere.clone())
            .unwrap();

        let op = ContextOp::parse("[reactor:[core:[--+temp:[10+--]]]]").unwrap();
        let deliveries = aether.apply(
            &CompoundDimension::root(),
            &op,
            Origin::anonymous(),
            1,
        );
        deliver(deliveries);

        // participant at reactor:core:temp sees its local slice
        let events = at_temp.events();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            NotifyKind::Apply(sub) => {
                let mut local = Context::new();
                local.apply(sub);
                assert_eq!(local.canonical(), "<10>");
            }
            other => panic!("unexpected {:?}", other),
        }

        // participant at reactor sees the full op with its sub-path
        let events = at_reactor.events();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            NotifyKind::Apply(sub) => {
                let mut local = Context::new();
                local.apply(sub);
                assert_eq!(local.canonical(), "<core:<temp:<10>>>");
            }
            other => panic!("unexpected {:?}", other),
        }

        // unrelated participant sees nothing
        assert!(elsewhere.events().is_empty());
    }

    #[test]
    fn test_ancestor_gets_path() {
        let mut aether = Aether::new();
        let at_reactor = Recorder::new();
        aether
            .join(key(1), "reactor".into(), at_reactor.clone())
            .unwrap();

        let value = Context::parse("<10>").unwrap();
        deliver(aether.assign(&"reactor:core:temp".into(), &value, Origin::anonymous(), 1));

        let events = at_reactor.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path.to_string(), "core:temp");
        assert_eq!(events[0].kind, NotifyKind::Assign(value));
    }

    #[test]
    fn test_descendant_clear_on_overwrite() {
        let mut aether = Aether::new();
        let deep = Recorder::new();
        aether.join(key(1), "a:b".into(), deep.clone()).unwrap();

        deliver(aether.assign(
            &"a:b".into(),
            &Context::parse("<1>").unwrap(),
            Origin::anonymous(),
            1,
        ));
        // overwrite `a` with content that has nothing under b
        deliver(aether.assign(
            &"a".into(),
            &Context::parse("<c:<2>>").unwrap(),
            Origin::anonymous(),
            2,
        ));

        let events = deep.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, NotifyKind::Clear);
    }

    #[test]
    fn test_clear_on_empty_is_silent() {
        let mut aether = Aether::new();
        let watcher = Recorder::new();
        aether.join(key(1), "a".into(), watcher.clone()).unwrap();
        deliver(aether.clear(&"a".into(), Origin::anonymous(), 1));
        assert!(watcher.events().is_empty());
    }

    #[test]
    fn test_headcount_and_leave() {
        let mut aether = Aether::new();
        aether.join(key(1), "a:b".into(), Recorder::new()).unwrap();
        aether.join(key(2), "a".into(), Recorder::new()).unwrap();
        assert_eq!(aether.participant_count(), 2);

        aether.leave(key(1)).unwrap();
        assert_eq!(aether.participant_count(), 1);
        assert!(matches!(
            aether.leave(key(1)),
            Err(ShareError::UnknownParticipant(_))
        ));
    }

    #[test]
    fn test_pure_participant_gets_operator_form() {
        let mut aether = Aether::new();
        let pure = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
            pure: true,
        });
        aether.join(key(1), "a".into(), pure.clone()).unwrap();

        deliver(aether.assign(
            &"a".into(),
            &Context::parse("<5>").unwrap(),
            Origin::anonymous(),
            1,
        ));
        deliver(aether.clear(&"a".into(), Origin::anonymous(), 2));

        let events = pure.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, NotifyKind::Apply(_)));
        assert_eq!(events[1].kind, NotifyKind::Apply(ContextOp::clear_all()));
    }

    #[test]
    fn test_teardown_kicks_everyone() {
        let mut aether = Aether::new();
        let a = Recorder::new();
        let b = Recorder::new();
        aether.join(key(1), "x".into(), a.clone()).unwrap();
        aether.join(key(2), "y:z".into(), b.clone()).unwrap();

        deliver(aether.teardown(9));
        assert_eq!(a.events()[0].kind, NotifyKind::Kick);
        assert_eq!(b.events()[0].kind, NotifyKind::Kick);
        assert_eq!(aether.participant_count(), 0);
        assert!(aether.state().is_empty());
    }

    #[test]
    fn test_clear_no_propagate() {
        let mut aether = Aether::new();
        let above = Recorder::new();
        let inside = Recorder::new();
        aether.join(key(1), CompoundDimension::root(), above.clone()).unwrap();
        aether.join(key(2), "a:b".into(), inside.clone()).unwrap();

        deliver(aether.assign(
            &"a:b".into(),
            &Context::parse("<1>").unwrap(),
            Origin::anonymous(),
            1,
        ));
        deliver(aether.clear_no_propagate(&"a".into(), 2));

        // the observer inside the pruned branch hears a clear; the ancestor
        // hears nothing beyond the original assign
        assert_eq!(inside.events().len(), 2);
        assert_eq!(inside.events()[1].kind, NotifyKind::Clear);
        assert_eq!(above.events().len(), 1);
    }
}
