//! Declared output types of graph nodes.
use std::fmt::{self, Display};

use itertools::{EitherOrBoth, Itertools};
use smallvec::SmallVec;

/// Represents the type of a node, either the argument bundle or an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTy {
    Args,
    Array(ArrayTy),
}

impl NodeTy {
    /// Returns the array type, if this node produces an array.
    pub fn array(&self) -> Option<&ArrayTy> {
        match self {
            NodeTy::Array(ty) => Some(ty),
            NodeTy::Args => None,
        }
    }
}

impl Display for NodeTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTy::Args => write!(f, "args"),
            NodeTy::Array(ty) => write!(f, "{ty}"),
        }
    }
}

/// Represents the shape of an `f64` array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArrayTy {
    pub shape: SmallVec<[usize; 4]>,
}

impl ArrayTy {
    /// Creates a new array type with the specified shape.
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: SmallVec::from_slice(shape),
        }
    }

    /// The rank-0 array type.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for ArrayTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f64[{}]", self.shape.iter().join(", "))
    }
}

impl From<&[usize]> for ArrayTy {
    fn from(shape: &[usize]) -> Self {
        Self::new(shape)
    }
}

/// Broadcasts dimensions of two shapes to determine the resulting shape.
pub(crate) fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Option<SmallVec<[usize; 4]>> {
    // numpy rules: align trailing axes, a length of 1 stretches to match
    let lhs = lhs.iter().rev().copied();
    let rhs = rhs.iter().rev().copied();
    let mut dims = lhs
        .zip_longest(rhs)
        .map(|x| match x {
            EitherOrBoth::Both(lhs, rhs) if lhs == rhs => Some(lhs),
            EitherOrBoth::Both(lhs, rhs) if lhs == 1 || rhs == 1 => Some(lhs.max(rhs)),
            EitherOrBoth::Both(_, _) => None,
            EitherOrBoth::Left(lhs) => Some(lhs),
            EitherOrBoth::Right(rhs) => Some(rhs),
        })
        .collect::<Option<SmallVec<[usize; 4]>>>()?;
    dims.reverse();
    Some(dims)
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn test_broadcast_dims() {
        assert_eq!(broadcast_dims(&[3, 1], &[4]), Some(smallvec![3, 4]));
        assert_eq!(broadcast_dims(&[], &[2, 2]), Some(smallvec![2, 2]));
        assert_eq!(broadcast_dims(&[5, 2], &[5, 2]), Some(smallvec![5, 2]));
        assert_eq!(broadcast_dims(&[3], &[4]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ArrayTy::new(&[2, 3]).to_string(), "f64[2, 3]");
        assert_eq!(ArrayTy::scalar().to_string(), "f64[]");
        assert_eq!(NodeTy::Args.to_string(), "args");
    }
}
