//! ContextOp: the operator form of a Context.
//!
//! An op carries the same tree shape as a Context plus two blanking flags
//! per node: `clear_base` (drop the leaf value) and `clear_dims` (drop every
//! child dimension the op does not itself mention). `blankcount` counts the
//! blanking flags in a subtree so "explicitly clears something" and "no-op"
//! can be told apart cheaply.
//!
//! Ops compose: `a.apply(&b)` produces the op whose effect on any Context
//! equals applying `a` then `b`. `ContextOp::new()` is the identity of that
//! monoid. The composition law is what the accumulation scheduler leans on,
//! and is pinned by the property suite in `tests/`.

use crate::base::BaseValue;
use crate::context::{children_serde, CanonCache, Context};
use crate::dimension::{CompoundDimension, Dimension};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An operation over Context trees.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextOp {
    pub(crate) base: Option<BaseValue>,
    pub(crate) clear_base: bool,
    pub(crate) clear_dims: bool,
    #[serde(with = "children_serde")]
    pub(crate) children: BTreeMap<Dimension, ContextOp>,
    pub(crate) basecount: usize,
    pub(crate) blankcount: usize,
    #[serde(skip)]
    pub(crate) canon: CanonCache,
}

impl ContextOp {
    /// The identity op: applying it changes nothing.
    pub fn new() -> Self {
        ContextOp::default()
    }

    /// The op that clears a node outright: `[---]`.
    pub fn clear_all() -> Self {
        let mut op = ContextOp::new();
        op.clear_base = true;
        op.clear_dims = true;
        op.blankcount = 2;
        op
    }

    /// The op whose effect on any Context is exactly `value`: every node
    /// carries both blanking flags so prior content cannot leak through.
    pub fn from_assign(value: &Context) -> Self {
        let mut op = ContextOp {
            base: value.base.clone(),
            clear_base: true,
            clear_dims: true,
            ..ContextOp::default()
        };
        for (d, c) in value.children() {
            op.children.insert(d.clone(), ContextOp::from_assign(c));
        }
        op.recount();
        op
    }

    /// Parse the canonical text form, `[...]`.
    pub fn parse(s: &str) -> Result<Self> {
        crate::canonical::parse_op(s)
    }

    pub fn base(&self) -> Option<&BaseValue> {
        self.base.as_ref()
    }

    pub fn clear_base(&self) -> bool {
        self.clear_base
    }

    pub fn clear_dims(&self) -> bool {
        self.clear_dims
    }

    pub fn basecount(&self) -> usize {
        self.basecount
    }

    pub fn blankcount(&self) -> usize {
        self.blankcount
    }

    /// An op is empty (the identity) when it neither sets nor clears
    /// anything anywhere in its subtree.
    pub fn is_empty(&self) -> bool {
        self.basecount == 0 && self.blankcount == 0
    }

    pub fn child(&self, dim: &Dimension) -> Option<&ContextOp> {
        self.children.get(dim)
    }

    pub fn children(&self) -> impl Iterator<Item = (&Dimension, &ContextOp)> {
        self.children.iter()
    }

    /// Project the sub-op at `path`, if the op reaches that deep.
    pub fn at(&self, path: &CompoundDimension) -> Option<&ContextOp> {
        let mut node = self;
        for d in path.dims() {
            node = node.children.get(d)?;
        }
        Some(node)
    }

    pub fn set_base(&mut self, value: BaseValue) {
        self.canon.invalidate();
        if self.base.is_none() {
            self.basecount += 1;
        }
        self.base = Some(value);
    }

    pub fn set_clear_base(&mut self, flag: bool) {
        self.canon.invalidate();
        if self.clear_base != flag {
            self.clear_base = flag;
            if flag {
                self.blankcount += 1;
            } else {
                self.blankcount -= 1;
            }
        }
    }

    pub fn set_clear_dims(&mut self, flag: bool) {
        self.canon.invalidate();
        if self.clear_dims != flag {
            self.clear_dims = flag;
            if flag {
                self.blankcount += 1;
            } else {
                self.blankcount -= 1;
            }
        }
    }

    /// Demand-create and return the child op under `dim`.
    pub fn value(&mut self, dim: Dimension) -> &mut ContextOp {
        self.canon.invalidate();
        self.children.entry(dim).or_default()
    }

    /// Recompute counts after hand-construction through `value`.
    pub fn normalize(&mut self) {
        self.canon.invalidate();
        for child in self.children.values_mut() {
            child.normalize();
        }
        self.children.retain(|_, c| !c.is_empty());
        self.recount();
    }

    /// Nest this op under `path`: the result, applied at some node, has the
    /// same effect as applying `self` at that node's `path` descendant.
    pub fn wrap_at(self, path: &CompoundDimension) -> ContextOp {
        let mut op = self;
        for d in path.dims().iter().rev() {
            let mut parent = ContextOp::new();
            parent.children.insert(d.clone(), op);
            parent.recount();
            op = parent;
        }
        op
    }

    /// Force both blanking flags on every node, turning this op into an
    /// exact one: applying it leaves precisely the content the op mentions,
    /// as if the target had been cleared first.
    pub fn make_exact(&mut self) {
        self.canon.invalidate();
        self.clear_base = true;
        self.clear_dims = true;
        for child in self.children.values_mut() {
            child.make_exact();
        }
        self.recount();
    }

    /// Compose: `self` becomes the op equivalent to applying `self` then
    /// `other` in sequence.
    pub fn apply(&mut self, other: &ContextOp) {
        self.canon.invalidate();
        let self_cleared_dims = self.clear_dims;
        if other.clear_dims {
            self.children.retain(|d, _| other.children.contains_key(d));
            self.clear_dims = true;
        }
        if let Some(b) = &other.base {
            self.base = Some(b.clone());
        } else if other.clear_base {
            self.base = None;
            self.clear_base = true;
        }
        for (d, child_op) in &other.children {
            match self.children.get_mut(d) {
                Some(child) => child.apply(child_op),
                None => {
                    let mut child = child_op.clone();
                    if self_cleared_dims {
                        // self already blanked this dimension, so the
                        // composed child must blank it before running.
                        child.make_exact();
                    }
                    self.children.insert(d.clone(), child);
                }
            }
        }
        self.children.retain(|_, c| !c.is_empty());
        self.recount();
    }

    pub(crate) fn recount(&mut self) {
        self.basecount = self.base.is_some() as usize
            + self.children.values().map(|c| c.basecount).sum::<usize>();
        self.blankcount = self.clear_base as usize
            + self.clear_dims as usize
            + self.children.values().map(|c| c.blankcount).sum::<usize>();
    }

    /// Canonical rendering `[base+marker+dim:[...]+...]` with `-` for
    /// clear-base, `--` for clear-dims and `---` for both, memoized.
    pub fn canonical(&self) -> String {
        if let Some(s) = self.canon.get() {
            return s;
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(b) = &self.base {
            parts.push(b.canonical());
        }
        match (self.clear_base, self.clear_dims) {
            (true, true) => parts.push("---".to_string()),
            (false, true) => parts.push("--".to_string()),
            (true, false) => parts.push("-".to_string()),
            (false, false) => {}
        }
        for (d, c) in &self.children {
            parts.push(format!("{}:{}", d, c.canonical()));
        }
        let rendered = format!("[{}]", parts.join("+"));
        self.canon.set(rendered.clone());
        rendered
    }
}

impl fmt::Display for ContextOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
