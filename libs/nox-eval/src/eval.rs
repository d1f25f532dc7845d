//! Evaluation functions for every node variant.
use ndarray::{ArrayD, ArrayViewD, Axis, ErrorKind, IxDyn, ShapeError, Zip};

use crate::{Args, NodeKind, StepError, Value, ty::broadcast_dims};

impl NodeKind {
    /// Computes this node's value from the values of its operands, in [`NodeKind::operands`] order.
    pub fn evaluate(&self, operands: &[&Value]) -> Result<Value, StepError> {
        let array = |i: usize| operand(operands, i);
        let result = match self {
            NodeKind::Sentinel => return Err(StepError::Sentinel),
            NodeKind::Argument(a) => {
                let args = operands
                    .first()
                    .and_then(|v| v.as_args())
                    .ok_or(StepError::OperandKind("argument bundle"))?;
                argument(args, &a.name, &a.ty.shape)?
            }
            NodeKind::Constant(c) => c.array().clone(),
            NodeKind::Add(_) => binary(array(0)?, array(1)?, |a, b| a + b)?,
            NodeKind::Multiply(_) => binary(array(0)?, array(1)?, |a, b| a * b)?,
            NodeKind::Divide(_) => binary(array(0)?, array(1)?, |a, b| a / b)?,
            NodeKind::Power(_) => binary(array(0)?, array(1)?, f64::powf)?,
            NodeKind::Negative(_) => array(0)?.mapv(|x| -x),
            NodeKind::Reciprocal(_) => array(0)?.mapv(f64::recip),
            NodeKind::Sqrt(_) => array(0)?.mapv(f64::sqrt),
            NodeKind::Exp(_) => array(0)?.mapv(f64::exp),
            NodeKind::Log(_) => array(0)?.mapv(f64::ln),
            NodeKind::Sin(_) => array(0)?.mapv(f64::sin),
            NodeKind::Cos(_) => array(0)?.mapv(f64::cos),
            NodeKind::Sum(s) => {
                let x = array(0)?;
                if s.axis >= x.ndim() {
                    return Err(ShapeError::from_kind(ErrorKind::OutOfBounds).into());
                }
                x.sum_axis(Axis(s.axis))
            }
            NodeKind::Reshape(r) => array(0)?.to_shape(IxDyn(&r.new_sizes))?.into_owned(),
            NodeKind::Transpose(t) => {
                let x = array(0)?;
                if t.permutation.len() != x.ndim() {
                    return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
                }
                x.clone().permuted_axes(IxDyn(&t.permutation))
            }
            NodeKind::Broadcast(b) => array(0)?
                .broadcast(IxDyn(&b.sizes))
                .ok_or(ShapeError::from_kind(ErrorKind::IncompatibleShape))?
                .to_owned(),
            NodeKind::Stack(s) => {
                let views = (0..operands.len())
                    .map(|i| array(i).map(|x| x.view()))
                    .collect::<Result<Vec<ArrayViewD<'_, f64>>, _>>()?;
                ndarray::stack(Axis(s.axis), &views)?
            }
            NodeKind::Take(_) => take(array(0)?, array(1)?)?,
        };
        Ok(Value::Array(result))
    }
}

fn operand<'a>(operands: &[&'a Value], index: usize) -> Result<&'a ArrayD<f64>, StepError> {
    operands
        .get(index)
        .and_then(|v| v.as_array())
        .ok_or(StepError::OperandKind("array"))
}

fn argument(args: &Args, name: &str, shape: &[usize]) -> Result<ArrayD<f64>, StepError> {
    let value = args
        .get(name)
        .ok_or_else(|| StepError::MissingArgument(name.to_string()))?;
    if value.shape() != shape {
        return Err(StepError::ArgumentShape {
            name: name.to_string(),
            expected: shape.into(),
            found: value.shape().to_vec(),
        });
    }
    Ok(value.clone())
}

/// Applies `f` element wise after broadcasting both operands to a common shape.
fn binary(
    lhs: &ArrayD<f64>,
    rhs: &ArrayD<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<ArrayD<f64>, StepError> {
    let incompatible = || ShapeError::from_kind(ErrorKind::IncompatibleShape);
    let shape = broadcast_dims(lhs.shape(), rhs.shape()).ok_or_else(incompatible)?;
    let lhs = lhs.broadcast(IxDyn(&shape)).ok_or_else(incompatible)?;
    let rhs = rhs.broadcast(IxDyn(&shape)).ok_or_else(incompatible)?;
    Ok(Zip::from(&lhs).and(&rhs).map_collect(|&a, &b| f(a, b)))
}

fn take(array: &ArrayD<f64>, indices: &ArrayD<f64>) -> Result<ArrayD<f64>, StepError> {
    if array.ndim() == 0 || indices.ndim() != 1 {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }
    let len = array.len_of(Axis(0));
    let indices = indices
        .iter()
        .map(|&index| {
            if index.fract() == 0.0 && index >= 0.0 && (index as usize) < len {
                Ok(index as usize)
            } else {
                Err(StepError::IndexOutOfBounds { index, len })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(array.select(Axis(0), &indices))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn, array};

    use super::*;
    use crate::{BinaryOp, NodeId, Stack, Take};

    fn value(x: ArrayD<f64>) -> Value {
        Value::Array(x)
    }

    fn binop() -> BinaryOp {
        BinaryOp {
            lhs: NodeId(1),
            rhs: NodeId(2),
        }
    }

    #[test]
    fn test_broadcast_binary() {
        let m = value(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        let row = value(array![10.0, 20.0].into_dyn());
        let out = NodeKind::Add(binop()).evaluate(&[&m, &row]).unwrap();
        assert_eq!(
            out.as_array().unwrap(),
            &array![[11.0, 22.0], [13.0, 24.0]].into_dyn()
        );
        let two = value(ArrayD::from_elem(IxDyn(&[]), 2.0));
        let out = NodeKind::Power(binop()).evaluate(&[&m, &two]).unwrap();
        assert_relative_eq!(out.as_array().unwrap()[[1, 1]], 16.0);
    }

    #[test]
    fn test_stack_and_take() {
        let a = value(array![1.0, 2.0].into_dyn());
        let b = value(array![3.0, 4.0].into_dyn());
        let stacked = NodeKind::Stack(Stack {
            nodes: vec![NodeId(1), NodeId(2)],
            axis: 0,
        })
        .evaluate(&[&a, &b])
        .unwrap();
        assert_eq!(
            stacked.as_array().unwrap(),
            &array![[1.0, 2.0], [3.0, 4.0]].into_dyn()
        );
        let take = NodeKind::Take(Take {
            array: NodeId(1),
            indices: NodeId(2),
        });
        let indices = value(array![1.0, 1.0, 0.0].into_dyn());
        let taken = take.evaluate(&[&stacked, &indices]).unwrap();
        assert_eq!(
            taken.as_array().unwrap(),
            &array![[3.0, 4.0], [3.0, 4.0], [1.0, 2.0]].into_dyn()
        );
        let bad = value(array![2.0].into_dyn());
        assert!(matches!(
            take.evaluate(&[&stacked, &bad]),
            Err(StepError::IndexOutOfBounds { len: 2, .. })
        ));
    }

    #[test]
    fn test_sentinel_is_not_evaluable() {
        assert!(matches!(
            NodeKind::Sentinel.evaluate(&[]),
            Err(StepError::Sentinel)
        ));
    }
}
