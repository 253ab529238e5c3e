//! Leaf payloads and their refinement order.
//!
//! A `BaseValue` is the opaque payload a Context node may carry. Values form
//! a partial refinement order: `Minimal` refines to everything, everything
//! refines to `Maximal`, and the remaining variants refine only to equal
//! values (and to `Maximal`). A separate total order exists purely for
//! canonicalization and lexicographic tree comparison.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A leaf payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BaseValue {
    /// Minimally defined: present but carries no information.
    Minimal,
    /// Maximally defined: the top of the refinement order.
    Maximal,
    Number(f64),
    Str(String),
    Binary(Vec<u8>),
    /// A bound external object, identified by alias with an opaque payload.
    Bound { alias: String, data: Vec<u8> },
}

impl BaseValue {
    pub fn number(n: f64) -> Self {
        BaseValue::Number(n)
    }

    pub fn string(s: impl Into<String>) -> Self {
        BaseValue::Str(s.into())
    }

    /// Partial refinement order: does `self` refine to `other`?
    ///
    /// Reflexive and transitive. `Minimal` refines to everything; everything
    /// refines to `Maximal`; otherwise only equal values are related.
    pub fn refines_to(&self, other: &BaseValue) -> bool {
        match (self, other) {
            (BaseValue::Minimal, _) => true,
            (_, BaseValue::Maximal) => true,
            (a, b) => a.equals(b),
        }
    }

    /// Structural equality (bitwise for numbers, so NaN equals NaN).
    pub fn equals(&self, other: &BaseValue) -> bool {
        match (self, other) {
            (BaseValue::Number(a), BaseValue::Number(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    /// Total order used for canonicalization: variant rank first, then
    /// payload. Numbers compare with `total_cmp` so the order is total.
    pub fn compare(&self, other: &BaseValue) -> Ordering {
        fn rank(v: &BaseValue) -> u8 {
            match v {
                BaseValue::Minimal => 0,
                BaseValue::Number(_) => 1,
                BaseValue::Str(_) => 2,
                BaseValue::Binary(_) => 3,
                BaseValue::Bound { .. } => 4,
                BaseValue::Maximal => 5,
            }
        }
        match (self, other) {
            (BaseValue::Number(a), BaseValue::Number(b)) => a.total_cmp(b),
            (BaseValue::Str(a), BaseValue::Str(b)) => a.cmp(b),
            (BaseValue::Binary(a), BaseValue::Binary(b)) => a.cmp(b),
            (
                BaseValue::Bound { alias: a, data: ad },
                BaseValue::Bound { alias: b, data: bd },
            ) => a.cmp(b).then_with(|| ad.cmp(bd)),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Canonical text form. `_` is Minimal, `^` is Maximal, strings are
    /// quoted, binary is `#hex`, bound objects are `@alias#hex`.
    pub fn canonical(&self) -> String {
        match self {
            BaseValue::Minimal => "_".to_string(),
            BaseValue::Maximal => "^".to_string(),
            BaseValue::Number(n) => format_number(*n),
            BaseValue::Str(s) => quote(s),
            BaseValue::Binary(b) => format!("#{}", hex(b)),
            BaseValue::Bound { alias, data } => format!("@{}#{}", alias, hex(data)),
        }
    }
}

impl fmt::Display for BaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        // `{}` prints "10" for 10.0, which the literal parser reads back
        // as Number(10.0).
        format!("{}", n)
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_refines_to_everything() {
        let values = [
            BaseValue::Minimal,
            BaseValue::Maximal,
            BaseValue::number(3.5),
            BaseValue::string("x"),
            BaseValue::Binary(vec![1, 2]),
        ];
        for v in &values {
            assert!(BaseValue::Minimal.refines_to(v));
        }
    }

    #[test]
    fn test_maximal_is_top() {
        let values = [
            BaseValue::Minimal,
            BaseValue::number(3.5),
            BaseValue::string("x"),
        ];
        for v in &values {
            assert!(v.refines_to(&BaseValue::Maximal));
            assert!(!BaseValue::Maximal.refines_to(v));
        }
        assert!(BaseValue::Maximal.refines_to(&BaseValue::Maximal));
    }

    #[test]
    fn test_refinement_reflexive() {
        let v = BaseValue::string("hello");
        assert!(v.refines_to(&v));
    }

    #[test]
    fn test_unrelated_values_do_not_refine() {
        assert!(!BaseValue::number(1.0).refines_to(&BaseValue::number(2.0)));
        assert!(!BaseValue::string("a").refines_to(&BaseValue::number(1.0)));
    }

    #[test]
    fn test_total_order() {
        assert_eq!(
            BaseValue::number(1.0).compare(&BaseValue::number(2.0)),
            Ordering::Less
        );
        assert_eq!(
            BaseValue::Minimal.compare(&BaseValue::Maximal),
            Ordering::Less
        );
        assert_eq!(
            BaseValue::number(1.0).compare(&BaseValue::string("a")),
            Ordering::Less
        );
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(BaseValue::number(10.0).canonical(), "10");
        assert_eq!(BaseValue::number(2.5).canonical(), "2.5");
        assert_eq!(BaseValue::Minimal.canonical(), "_");
        assert_eq!(BaseValue::Maximal.canonical(), "^");
        assert_eq!(BaseValue::string("a\"b").canonical(), "\"a\\\"b\"");
        assert_eq!(BaseValue::Binary(vec![0xab, 0x01]).canonical(), "#ab01");
    }
}
