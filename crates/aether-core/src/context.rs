//! The Context tree: an optional leaf payload plus dimension-keyed children.
//!
//! Invariant maintained by every mutator: `basecount` equals the number of
//! non-empty leaf values in the subtree, i.e.
//! `basecount == sum(child.basecount) + (1 if base is set)`.
//!
//! The canonical string of a node is memoized and invalidated along the
//! mutation path only; untouched siblings keep their cached renderings.

use crate::base::BaseValue;
use crate::dimension::{CompoundDimension, Dimension};
use crate::error::Result;
use crate::op::ContextOp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Memoized canonical rendering. Cloning clones the cached string; equality
/// ignores the cache entirely.
#[derive(Default)]
pub(crate) struct CanonCache(Mutex<Option<String>>);

impl CanonCache {
    pub(crate) fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    pub(crate) fn set(&self, s: String) {
        *self.0.lock() = Some(s);
    }

    pub(crate) fn invalidate(&self) {
        *self.0.lock() = None;
    }
}

impl Clone for CanonCache {
    fn clone(&self) -> Self {
        CanonCache(Mutex::new(self.0.lock().clone()))
    }
}

impl fmt::Debug for CanonCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CanonCache")
    }
}

impl PartialEq for CanonCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Serialize dimension-keyed child maps as pair lists; enum-keyed maps do
/// not survive self-describing formats like JSON otherwise.
pub(crate) mod children_serde {
    use super::Dimension;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<V: Serialize, S: Serializer>(
        map: &BTreeMap<Dimension, V>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let pairs: Vec<(&Dimension, &V)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, V: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<BTreeMap<Dimension, V>, D::Error> {
        let pairs: Vec<(Dimension, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// A tree-structured value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub(crate) base: Option<BaseValue>,
    #[serde(with = "children_serde")]
    pub(crate) children: BTreeMap<Dimension, Context>,
    pub(crate) basecount: usize,
    #[serde(skip)]
    pub(crate) canon: CanonCache,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn with_base(value: BaseValue) -> Self {
        Context {
            base: Some(value),
            children: BTreeMap::new(),
            basecount: 1,
            canon: CanonCache::default(),
        }
    }

    /// Parse the canonical text form, `<...>`.
    pub fn parse(s: &str) -> Result<Self> {
        crate::canonical::parse_context(s)
    }

    pub fn base(&self) -> Option<&BaseValue> {
        self.base.as_ref()
    }

    pub fn basecount(&self) -> usize {
        self.basecount
    }

    /// A context is empty when no leaf in its subtree carries a value.
    pub fn is_empty(&self) -> bool {
        self.basecount == 0
    }

    pub fn child(&self, dim: &Dimension) -> Option<&Context> {
        self.children.get(dim)
    }

    pub fn children(&self) -> impl Iterator<Item = (&Dimension, &Context)> {
        self.children.iter()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Follow a path; `None` if any component is absent.
    pub fn get_at(&self, path: &CompoundDimension) -> Option<&Context> {
        let mut node = self;
        for d in path.dims() {
            node = node.children.get(d)?;
        }
        Some(node)
    }

    /// Attach `child` directly under `dim`, keeping it even when it is
    /// structurally empty. The wire codecs rebuild decoded trees through
    /// this; the path mutators prune empty children instead.
    pub fn insert_child(&mut self, dim: Dimension, child: Context) {
        self.canon.invalidate();
        self.children.insert(dim, child);
        self.recount();
    }

    /// Structural replace.
    pub fn assign(&mut self, other: &Context) {
        *self = other.clone();
    }

    /// Structural replace of the subtree at `path`, demand-creating the
    /// spine and pruning it again if the assigned value is empty.
    pub fn assign_at(&mut self, path: &CompoundDimension, value: &Context) {
        self.mutate_at(path, &mut |node| node.assign(value));
    }

    /// Apply an operator to this node (see `ContextOp` for the semantics).
    pub fn apply(&mut self, op: &ContextOp) {
        self.canon.invalidate();
        if op.clear_dims() {
            self.children.retain(|d, _| op.child(d).is_some());
        }
        if let Some(b) = op.base() {
            self.base = Some(b.clone());
        } else if op.clear_base() {
            self.base = None;
        }
        for (d, child_op) in op.children() {
            let child = self.children.entry(d.clone()).or_default();
            child.apply(child_op);
        }
        self.children.retain(|_, c| !c.is_empty());
        self.recount();
    }

    /// Apply an operator to the node at `path`.
    pub fn apply_at(&mut self, path: &CompoundDimension, op: &ContextOp) {
        self.mutate_at(path, &mut |node| node.apply(op));
    }

    /// Remove everything below and at this node.
    pub fn clear(&mut self) {
        self.canon.invalidate();
        self.base = None;
        self.children.clear();
        self.basecount = 0;
    }

    /// Clear the subtree at `path`.
    pub fn clear_at(&mut self, path: &CompoundDimension) {
        self.mutate_at(path, &mut |node| node.clear());
    }

    pub fn set_base(&mut self, value: BaseValue) {
        self.canon.invalidate();
        if self.base.is_none() {
            self.basecount += 1;
        }
        self.base = Some(value);
    }

    pub fn clear_base(&mut self) {
        self.canon.invalidate();
        if self.base.take().is_some() {
            self.basecount -= 1;
        }
    }

    /// Run a mutator on the node at `path`, maintaining basecounts and
    /// canonical caches along the spine and pruning emptied children.
    fn mutate_at(&mut self, path: &CompoundDimension, f: &mut dyn FnMut(&mut Context)) {
        self.mutate_at_dims(path.dims(), f);
    }

    fn mutate_at_dims(&mut self, dims: &[Dimension], f: &mut dyn FnMut(&mut Context)) {
        self.canon.invalidate();
        match dims.split_first() {
            None => f(self),
            Some((d, rest)) => {
                self.children
                    .entry(d.clone())
                    .or_default()
                    .mutate_at_dims(rest, f);
                if self.children.get(d).is_some_and(|c| c.is_empty()) {
                    self.children.remove(d);
                }
                self.recount();
            }
        }
    }

    pub(crate) fn recount(&mut self) {
        self.basecount = self.base.is_some() as usize
            + self.children.values().map(|c| c.basecount).sum::<usize>();
    }

    /// Refinement over trees: every leaf of `self` must refine to the
    /// corresponding leaf of `other`, and `self` may not carry content under
    /// a dimension absent from `other`.
    pub fn refines_to(&self, other: &Context) -> bool {
        match (&self.base, &other.base) {
            (Some(a), Some(b)) => {
                if !a.refines_to(b) {
                    return false;
                }
            }
            (Some(a), None) => {
                // Minimal carries no information, so it may refine to an
                // absent leaf.
                if !matches!(a, BaseValue::Minimal) {
                    return false;
                }
            }
            _ => {}
        }
        for (d, child) in &self.children {
            match other.children.get(d) {
                Some(other_child) => {
                    if !child.refines_to(other_child) {
                        return false;
                    }
                }
                None => {
                    if !child.is_empty() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Lexicographic total order over trees: base first (absent orders
    /// before present), then children in dimension order.
    pub fn compare(&self, other: &Context) -> Ordering {
        match (&self.base, &other.base) {
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = a.compare(b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, None) => {}
        }
        let mut a_iter = self.children.iter();
        let mut b_iter = other.children.iter();
        loop {
            match (a_iter.next(), b_iter.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some((ad, ac)), Some((bd, bc))) => {
                    let ord = ad.cmp(bd).then_with(|| ac.compare(bc));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }

    /// Canonical rendering `<base+dim:<...>+...>`, memoized.
    pub fn canonical(&self) -> String {
        if let Some(s) = self.canon.get() {
            return s;
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(b) = &self.base {
            parts.push(b.canonical());
        }
        for (d, c) in &self.children {
            parts.push(format!("{}:{}", d, c.canonical()));
        }
        let rendered = format!("<{}>", parts.join("+"));
        self.canon.set(rendered.clone());
        rendered
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
