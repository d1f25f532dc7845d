//! Provides a hashable constant payload for `Constant` nodes.
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use ndarray::{ArrayD, IxDyn};

use crate::ArrayTy;

/// Constant array data, compared and hashed bitwise so it can key the interning table.
#[derive(Clone)]
pub struct Literal {
    data: Arc<ArrayD<f64>>,
}

impl Literal {
    pub fn new(data: ArrayD<f64>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Creates a rank-0 literal.
    pub fn scalar(value: f64) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Creates a literal of the given shape filled with `value`.
    pub fn full(shape: &[usize], value: f64) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Creates a literal from row-major data.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f64>) -> Result<Self, ndarray::ShapeError> {
        Ok(Self::new(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    pub fn array(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn ty(&self) -> ArrayTy {
        ArrayTy::new(self.data.shape())
    }

    /// Returns the value shared by every element, if there is one.
    pub fn uniform(&self) -> Option<f64> {
        let mut iter = self.data.iter();
        let first = *iter.next()?;
        iter.all(|x| x.to_bits() == first.to_bits()).then_some(first)
    }

    /// True when every element compares equal to `value`, so `-0.0` counts as zero.
    /// An empty literal never matches.
    pub fn is_all(&self, value: f64) -> bool {
        !self.data.is_empty() && self.data.iter().all(|&x| x == value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::scalar(value)
    }
}

impl From<ArrayD<f64>> for Literal {
    fn from(data: ArrayD<f64>) -> Self {
        Literal::new(data)
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            || (self.data.shape() == other.data.shape()
                && self
                    .data
                    .iter()
                    .zip(other.data.iter())
                    .all(|(a, b)| a.to_bits() == b.to_bits()))
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.shape().hash(state);
        for x in self.data.iter() {
            x.to_bits().hash(state);
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Literal").field("ty", &self.ty()).finish()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uniform() {
            Some(x) if self.data.ndim() == 0 => write!(f, "{x}"),
            Some(x) => write!(f, "{x} as {}", self.ty()),
            None => write!(f, "{}", self.ty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash(lit: &Literal) -> u64 {
        let mut hasher = DefaultHasher::new();
        lit.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_bitwise_equality() {
        let a = Literal::from_shape_vec(&[2], vec![1.0, 2.0]).unwrap();
        let b = Literal::from_shape_vec(&[2], vec![1.0, 2.0]).unwrap();
        let c = Literal::from_shape_vec(&[1, 2], vec![1.0, 2.0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(a, c);
        assert_eq!(Literal::scalar(f64::NAN), Literal::scalar(f64::NAN));
    }

    #[test]
    fn test_uniform() {
        assert_eq!(Literal::full(&[3, 2], 0.0).uniform(), Some(0.0));
        assert!(Literal::scalar(1.0).is_all(1.0));
        let mixed = Literal::from_shape_vec(&[2], vec![1.0, 0.0]).unwrap();
        assert_eq!(mixed.uniform(), None);
        assert!(!Literal::full(&[0], 0.0).is_all(0.0));
        // zero matches either sign, interning still tells them apart
        assert!(Literal::scalar(-0.0).is_all(0.0));
        assert!(Literal::full(&[2], 0.0).is_all(-0.0));
        assert_ne!(Literal::scalar(-0.0), Literal::scalar(0.0));
    }
}
