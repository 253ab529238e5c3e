//! Path keys for the Context tree.
//!
//! A `Dimension` is a single ordered path component, either a symbolic name
//! or an integer index. A `CompoundDimension` is an ordered sequence of
//! dimensions naming a node relative to some tree root, rendered with `:`
//! separators ("reactor:core:temp").

use crate::error::{ParseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single path component. Indices order before names.
///
/// `Name` never holds text that reads as an integer: `name`, `parse` and
/// the wire decoder all route such strings to `Index`, so every dimension
/// has exactly one canonical spelling.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Index(i64),
    Name(String),
}

impl Dimension {
    pub fn name(s: impl Into<String>) -> Self {
        let s = s.into();
        match s.parse::<i64>() {
            Ok(i) => Dimension::Index(i),
            Err(_) => Dimension::Name(s),
        }
    }

    pub fn index(i: i64) -> Self {
        Dimension::Index(i)
    }

    /// Parse a single component: all-digit (with optional sign) becomes an
    /// index, anything else a name. Names may not be empty or start with `-`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(ParseError::BadDimension {
                at: 0,
                reason: "empty component",
            });
        }
        if let Ok(i) = s.parse::<i64>() {
            return Ok(Dimension::Index(i));
        }
        if s.starts_with('-') {
            return Err(ParseError::BadDimension {
                at: 0,
                reason: "name may not start with '-'",
            });
        }
        Ok(Dimension::Name(s.to_string()))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Index(i) => write!(f, "{}", i),
            Dimension::Name(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Dimension {
    fn from(s: &str) -> Self {
        Dimension::parse(s).unwrap_or_else(|_| Dimension::Name(s.to_string()))
    }
}

impl From<i64> for Dimension {
    fn from(i: i64) -> Self {
        Dimension::Index(i)
    }
}

/// How one path stands relative to another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathRelation {
    /// The paths are identical.
    Equal,
    /// `self` is a strict ancestor of the other path; carries the remainder
    /// from `self` down to the other path.
    Ancestor(CompoundDimension),
    /// `self` is a strict descendant of the other path; carries the
    /// remainder from the other path down to `self`.
    Descendant(CompoundDimension),
    /// Neither path contains the other.
    Disjoint,
}

/// An ordered sequence of dimensions; a path from a tree root.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompoundDimension(Vec<Dimension>);

impl CompoundDimension {
    pub fn root() -> Self {
        CompoundDimension(Vec::new())
    }

    pub fn new(dims: Vec<Dimension>) -> Self {
        CompoundDimension(dims)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.0
    }

    pub fn push(&mut self, dim: Dimension) {
        self.0.push(dim);
    }

    /// A new path with `rest` appended.
    pub fn join(&self, rest: &CompoundDimension) -> CompoundDimension {
        let mut dims = self.0.clone();
        dims.extend_from_slice(&rest.0);
        CompoundDimension(dims)
    }

    /// Parse a `:`-separated path. The empty string is the root path.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut dims = Vec::new();
        for part in s.split(':') {
            dims.push(Dimension::parse(part)?);
        }
        Ok(CompoundDimension(dims))
    }

    /// Ancestry relation between `self` and `other`.
    pub fn relation(&self, other: &CompoundDimension) -> PathRelation {
        let common = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if common == self.0.len() && common == other.0.len() {
            PathRelation::Equal
        } else if common == self.0.len() {
            PathRelation::Ancestor(CompoundDimension(other.0[common..].to_vec()))
        } else if common == other.0.len() {
            PathRelation::Descendant(CompoundDimension(self.0[common..].to_vec()))
        } else {
            PathRelation::Disjoint
        }
    }
}

impl fmt::Display for CompoundDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl FromStr for CompoundDimension {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        CompoundDimension::parse(s)
    }
}

impl From<&str> for CompoundDimension {
    fn from(s: &str) -> Self {
        CompoundDimension::parse(s).unwrap_or_else(|_| CompoundDimension::root())
    }
}

impl FromIterator<Dimension> for CompoundDimension {
    fn from_iter<T: IntoIterator<Item = Dimension>>(iter: T) -> Self {
        CompoundDimension(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_ordering() {
        assert!(Dimension::index(3) < Dimension::name("a"));
        assert!(Dimension::name("a") < Dimension::name("b"));
        assert!(Dimension::index(-1) < Dimension::index(2));
    }

    #[test]
    fn test_numeric_name_normalizes_to_index() {
        assert_eq!(Dimension::name("10"), Dimension::index(10));
        assert_eq!(Dimension::name("-3"), Dimension::index(-3));
        assert_eq!(Dimension::name("x10"), Dimension::Name("x10".into()));

        let d = Dimension::name("10");
        assert_eq!(Dimension::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn test_parse_path() {
        let path = CompoundDimension::parse("reactor:core:2").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.dims()[2], Dimension::index(2));
        assert_eq!(path.to_string(), "reactor:core:2");
    }

    #[test]
    fn test_relation() {
        let a = CompoundDimension::parse("reactor").unwrap();
        let b = CompoundDimension::parse("reactor:core:temp").unwrap();
        let c = CompoundDimension::parse("turbine").unwrap();

        assert_eq!(
            a.relation(&b),
            PathRelation::Ancestor(CompoundDimension::parse("core:temp").unwrap())
        );
        assert_eq!(
            b.relation(&a),
            PathRelation::Descendant(CompoundDimension::parse("core:temp").unwrap())
        );
        assert_eq!(a.relation(&a), PathRelation::Equal);
        assert_eq!(a.relation(&c), PathRelation::Disjoint);
    }

    #[test]
    fn test_root_relation() {
        let root = CompoundDimension::root();
        let b = CompoundDimension::parse("x:y").unwrap();
        assert_eq!(root.relation(&b), PathRelation::Ancestor(b.clone()));
        assert_eq!(root.relation(&root), PathRelation::Equal);
    }

    #[test]
    fn test_join() {
        let a = CompoundDimension::parse("reactor").unwrap();
        let b = CompoundDimension::parse("core:temp").unwrap();
        assert_eq!(a.join(&b).to_string(), "reactor:core:temp");
    }
}
