//! Provides error definitions.
use std::{borrow::Cow, time::Duration};

use smallvec::SmallVec;
use thiserror::Error;

use crate::{ArrayTy, EvaluationTrace, NodeId, NodeTy};

/// Enumerates the errors raised while building, rewriting, linearizing or evaluating a graph.
#[derive(Error, Debug)]
pub enum Error {
    /// A node failed validation at construction time.
    #[error("malformed graph: {0}")]
    Malformed(#[from] MalformedGraph),

    /// A rewrite revisited a node whose replacement was still being computed.
    #[error("cyclic dependency while rewriting: {}", .labels.join(" -> "))]
    CyclicDependency {
        chain: Vec<NodeId>,
        labels: Vec<String>,
    },

    /// A step of the tape interpreter failed.
    #[error(transparent)]
    Evaluation(#[from] Box<EvaluationError>),

    /// A simplification or optimization hook changed the declared type of a node.
    #[error("{pass} changed the type of {node} from {expected} to {found}")]
    ContractViolation {
        pass: &'static str,
        node: String,
        expected: NodeTy,
        found: NodeTy,
    },

    /// Error while rendering a diagnostic listing
    #[error("formatting error")]
    Fmt(#[from] std::fmt::Error),

    /// Internal error for inconsistent bookkeeping
    #[error("internal error: {0}")]
    Internal(#[from] TraversalError),
}

/// Construction-time validation failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedGraph {
    #[error("node {0} does not belong to this graph")]
    UnknownNode(NodeId),

    #[error("{label} expects {expected} operands, found {found}")]
    Arity {
        label: Cow<'static, str>,
        expected: usize,
        found: usize,
    },

    #[error("operand {0} must be an array")]
    ExpectedArray(NodeId),

    #[error("operand {0} must be the argument bundle")]
    ExpectedArgs(NodeId),

    #[error("shapes {lhs} and {rhs} cannot be broadcast together")]
    Broadcast { lhs: ArrayTy, rhs: ArrayTy },

    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },

    #[error("{0:?} is not a permutation of the array axes")]
    InvalidPermutation(SmallVec<[usize; 4]>),

    #[error("cannot reshape {from} elements into {to} elements")]
    ReshapeSize { from: usize, to: usize },

    #[error("cannot broadcast {ty} to {sizes:?}")]
    BroadcastSizes {
        ty: ArrayTy,
        sizes: SmallVec<[usize; 4]>,
    },

    #[error("stack requires at least one operand")]
    EmptyStack,

    #[error("stack operands must share a shape, found {expected} and {found}")]
    StackShape { expected: ArrayTy, found: ArrayTy },

    #[error("take indices must be a vector, found {0}")]
    TakeIndices(ArrayTy),

    #[error("argument names must not be empty")]
    EmptyArgumentName,
}

/// Failures raised by a single evaluation function.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("missing argument {0:?}")]
    MissingArgument(String),

    #[error("argument {name:?} has shape {found:?}, expected {expected}")]
    ArgumentShape {
        name: String,
        expected: ArrayTy,
        found: Vec<usize>,
    },

    #[error("expected {0} operand")]
    OperandKind(&'static str),

    #[error("index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: f64, len: usize },

    #[error("the argument bundle cannot be evaluated")]
    Sentinel,

    #[error("evaluation deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Interpreter failure together with every step executed before it.
#[derive(Error, Debug)]
#[error("evaluation failed at step {step} ({label}): {source}\n{trace}")]
pub struct EvaluationError {
    pub step: usize,
    pub node: NodeId,
    pub label: String,
    pub source: StepError,
    pub trace: EvaluationTrace,
}

/// Enumerates traversal and linearization consistency failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraversalError {
    #[error("operand {operand} of {node} is missing from the dependency order")]
    OperandNotOrdered { node: NodeId, operand: NodeId },

    #[error("operand {operand} of {node} is ordered after its user")]
    OperandOrderedLate { node: NodeId, operand: NodeId },

    #[error("traversal finished with {0} values on the stack")]
    UnbalancedStack(usize),
}
