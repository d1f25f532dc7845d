//! Provides the node variants of an evaluable graph along with their operand layout and type rules.
use std::{borrow::Cow, fmt};

use smallvec::{SmallVec, smallvec};

use crate::{ArrayTy, Graph, Literal, MalformedGraph, NodeTy, ty::broadcast_dims};

/// Index of a node inside its [`Graph`] arena.
///
/// Nodes are hash-consed, so two equal ids always denote the same structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The root sentinel standing for the runtime argument bundle.
    pub const SENTINEL: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Represents the closed set of node variants, each carrying its operands and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Sentinel,
    Argument(Argument),
    Constant(Literal),

    // Element wise binary ops
    Add(BinaryOp),
    Multiply(BinaryOp),
    Divide(BinaryOp),
    Power(BinaryOp),

    // Unary ops
    Negative(NodeId),
    Reciprocal(NodeId),
    Sqrt(NodeId),
    Exp(NodeId),
    Log(NodeId),
    Sin(NodeId),
    Cos(NodeId),

    // Shape ops
    Sum(Sum),
    Reshape(Reshape),
    Transpose(Transpose),
    Broadcast(Broadcast),

    // Nary ops
    Stack(Stack),

    // Indexing
    Take(Take),
}

/// A named array pulled out of the argument bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Argument {
    pub args: NodeId,
    pub name: String,
    pub ty: ArrayTy,
}

/// Operands of an element wise binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryOp {
    pub lhs: NodeId,
    pub rhs: NodeId,
}

/// Sum over a single axis, removing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sum {
    pub expr: NodeId,
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reshape {
    pub expr: NodeId,
    pub new_sizes: SmallVec<[usize; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transpose {
    pub expr: NodeId,
    pub permutation: SmallVec<[usize; 4]>,
}

/// Broadcast to `sizes`, aligning the operand with the trailing axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Broadcast {
    pub expr: NodeId,
    pub sizes: SmallVec<[usize; 4]>,
}

/// Stacks equally shaped operands along a new axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stack {
    pub nodes: Vec<NodeId>,
    pub axis: usize,
}

/// Selects rows of `array` along its first axis; `indices` are checked at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Take {
    pub array: NodeId,
    pub indices: NodeId,
}

impl NodeKind {
    /// Short name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Sentinel => "args",
            NodeKind::Argument(_) => "argument",
            NodeKind::Constant(_) => "constant",
            NodeKind::Add(_) => "add",
            NodeKind::Multiply(_) => "multiply",
            NodeKind::Divide(_) => "divide",
            NodeKind::Power(_) => "power",
            NodeKind::Negative(_) => "negative",
            NodeKind::Reciprocal(_) => "reciprocal",
            NodeKind::Sqrt(_) => "sqrt",
            NodeKind::Exp(_) => "exp",
            NodeKind::Log(_) => "log",
            NodeKind::Sin(_) => "sin",
            NodeKind::Cos(_) => "cos",
            NodeKind::Sum(_) => "sum",
            NodeKind::Reshape(_) => "reshape",
            NodeKind::Transpose(_) => "transpose",
            NodeKind::Broadcast(_) => "broadcast",
            NodeKind::Stack(_) => "stack",
            NodeKind::Take(_) => "take",
        }
    }

    /// Diagnostic label including the payload, e.g. `argument(x)` or `sum(axis = 1)`.
    pub fn label(&self) -> String {
        match self {
            NodeKind::Argument(a) => format!("argument({})", a.name),
            NodeKind::Constant(c) => format!("constant({c})"),
            NodeKind::Sum(s) => format!("sum(axis = {})", s.axis),
            NodeKind::Reshape(r) => format!("reshape({:?})", r.new_sizes.as_slice()),
            NodeKind::Transpose(t) => format!("transpose({:?})", t.permutation.as_slice()),
            NodeKind::Broadcast(b) => format!("broadcast({:?})", b.sizes.as_slice()),
            NodeKind::Stack(s) => format!("stack(axis = {})", s.axis),
            kind => kind.name().to_string(),
        }
    }

    /// Direct operands, in evaluation argument order.
    pub fn operands(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            NodeKind::Sentinel | NodeKind::Constant(_) => smallvec![],
            NodeKind::Argument(a) => smallvec![a.args],
            NodeKind::Add(b) | NodeKind::Multiply(b) | NodeKind::Divide(b) | NodeKind::Power(b) => {
                smallvec![b.lhs, b.rhs]
            }
            NodeKind::Negative(x)
            | NodeKind::Reciprocal(x)
            | NodeKind::Sqrt(x)
            | NodeKind::Exp(x)
            | NodeKind::Log(x)
            | NodeKind::Sin(x)
            | NodeKind::Cos(x) => smallvec![*x],
            NodeKind::Sum(s) => smallvec![s.expr],
            NodeKind::Reshape(r) => smallvec![r.expr],
            NodeKind::Transpose(t) => smallvec![t.expr],
            NodeKind::Broadcast(b) => smallvec![b.expr],
            NodeKind::Stack(s) => s.nodes.iter().copied().collect(),
            NodeKind::Take(t) => smallvec![t.array, t.indices],
        }
    }

    /// Name under which the operand at `index` is passed to the evaluation function.
    pub fn operand_name(&self, index: usize) -> Cow<'static, str> {
        match self {
            NodeKind::Argument(_) => "args".into(),
            NodeKind::Add(_) | NodeKind::Multiply(_) | NodeKind::Divide(_) | NodeKind::Power(_) => {
                Cow::Borrowed(if index == 0 { "lhs" } else { "rhs" })
            }
            NodeKind::Stack(_) => format!("nodes[{index}]").into(),
            NodeKind::Take(_) => Cow::Borrowed(if index == 0 { "array" } else { "indices" }),
            _ => "expr".into(),
        }
    }

    /// Rebuilds the same variant around new operands, keeping the payload.
    pub fn with_operands(&self, operands: &[NodeId]) -> Result<NodeKind, MalformedGraph> {
        let expected = self.operands().len();
        if operands.len() != expected {
            return Err(MalformedGraph::Arity {
                label: self.name().into(),
                expected,
                found: operands.len(),
            });
        }
        let kind = match self {
            NodeKind::Sentinel | NodeKind::Constant(_) => self.clone(),
            NodeKind::Argument(a) => NodeKind::Argument(Argument {
                args: operands[0],
                ..a.clone()
            }),
            NodeKind::Add(_) => NodeKind::Add(BinaryOp::from_slice(operands)),
            NodeKind::Multiply(_) => NodeKind::Multiply(BinaryOp::from_slice(operands)),
            NodeKind::Divide(_) => NodeKind::Divide(BinaryOp::from_slice(operands)),
            NodeKind::Power(_) => NodeKind::Power(BinaryOp::from_slice(operands)),
            NodeKind::Negative(_) => NodeKind::Negative(operands[0]),
            NodeKind::Reciprocal(_) => NodeKind::Reciprocal(operands[0]),
            NodeKind::Sqrt(_) => NodeKind::Sqrt(operands[0]),
            NodeKind::Exp(_) => NodeKind::Exp(operands[0]),
            NodeKind::Log(_) => NodeKind::Log(operands[0]),
            NodeKind::Sin(_) => NodeKind::Sin(operands[0]),
            NodeKind::Cos(_) => NodeKind::Cos(operands[0]),
            NodeKind::Sum(s) => NodeKind::Sum(Sum {
                expr: operands[0],
                axis: s.axis,
            }),
            NodeKind::Reshape(r) => NodeKind::Reshape(Reshape {
                expr: operands[0],
                new_sizes: r.new_sizes.clone(),
            }),
            NodeKind::Transpose(t) => NodeKind::Transpose(Transpose {
                expr: operands[0],
                permutation: t.permutation.clone(),
            }),
            NodeKind::Broadcast(b) => NodeKind::Broadcast(Broadcast {
                expr: operands[0],
                sizes: b.sizes.clone(),
            }),
            NodeKind::Stack(s) => NodeKind::Stack(Stack {
                nodes: operands.to_vec(),
                axis: s.axis,
            }),
            NodeKind::Take(_) => NodeKind::Take(Take {
                array: operands[0],
                indices: operands[1],
            }),
        };
        Ok(kind)
    }

    /// Determines the declared type of this node, validating its operands against `graph`.
    pub(crate) fn ty(&self, graph: &Graph) -> Result<NodeTy, MalformedGraph> {
        let array = |id: NodeId| -> Result<ArrayTy, MalformedGraph> {
            match graph.try_ty(id)? {
                NodeTy::Array(ty) => Ok(ty.clone()),
                NodeTy::Args => Err(MalformedGraph::ExpectedArray(id)),
            }
        };
        let ty = match self {
            NodeKind::Sentinel => return Ok(NodeTy::Args),
            NodeKind::Argument(a) => {
                if a.name.is_empty() {
                    return Err(MalformedGraph::EmptyArgumentName);
                }
                if graph.try_ty(a.args)? != &NodeTy::Args {
                    return Err(MalformedGraph::ExpectedArgs(a.args));
                }
                a.ty.clone()
            }
            NodeKind::Constant(c) => c.ty(),
            NodeKind::Add(b) | NodeKind::Multiply(b) | NodeKind::Divide(b) | NodeKind::Power(b) => {
                let lhs = array(b.lhs)?;
                let rhs = array(b.rhs)?;
                match broadcast_dims(&lhs.shape, &rhs.shape) {
                    Some(shape) => ArrayTy { shape },
                    None => return Err(MalformedGraph::Broadcast { lhs, rhs }),
                }
            }
            NodeKind::Negative(x)
            | NodeKind::Reciprocal(x)
            | NodeKind::Sqrt(x)
            | NodeKind::Exp(x)
            | NodeKind::Log(x)
            | NodeKind::Sin(x)
            | NodeKind::Cos(x) => array(*x)?,
            NodeKind::Sum(s) => {
                let mut ty = array(s.expr)?;
                if s.axis >= ty.rank() {
                    return Err(MalformedGraph::AxisOutOfRange {
                        axis: s.axis,
                        rank: ty.rank(),
                    });
                }
                ty.shape.remove(s.axis);
                ty
            }
            NodeKind::Reshape(r) => {
                let ty = array(r.expr)?;
                let to = r.new_sizes.iter().product();
                if ty.len() != to {
                    return Err(MalformedGraph::ReshapeSize { from: ty.len(), to });
                }
                ArrayTy {
                    shape: r.new_sizes.clone(),
                }
            }
            NodeKind::Transpose(t) => {
                let ty = array(t.expr)?;
                let mut seen = t.permutation.clone();
                seen.sort_unstable();
                if !seen.iter().copied().eq(0..ty.rank()) {
                    return Err(MalformedGraph::InvalidPermutation(t.permutation.clone()));
                }
                ArrayTy {
                    shape: t.permutation.iter().map(|&i| ty.shape[i]).collect(),
                }
            }
            NodeKind::Broadcast(b) => {
                let ty = array(b.expr)?;
                match broadcast_dims(&ty.shape, &b.sizes) {
                    Some(shape) if shape == b.sizes => ArrayTy { shape },
                    _ => {
                        return Err(MalformedGraph::BroadcastSizes {
                            ty,
                            sizes: b.sizes.clone(),
                        });
                    }
                }
            }
            NodeKind::Stack(s) => {
                let (first, rest) = s.nodes.split_first().ok_or(MalformedGraph::EmptyStack)?;
                let expected = array(*first)?;
                for node in rest {
                    let found = array(*node)?;
                    if found != expected {
                        return Err(MalformedGraph::StackShape { expected, found });
                    }
                }
                if s.axis > expected.rank() {
                    return Err(MalformedGraph::AxisOutOfRange {
                        axis: s.axis,
                        rank: expected.rank() + 1,
                    });
                }
                let mut shape = expected.shape;
                shape.insert(s.axis, s.nodes.len());
                ArrayTy { shape }
            }
            NodeKind::Take(t) => {
                let array_ty = array(t.array)?;
                let indices = array(t.indices)?;
                if indices.rank() != 1 {
                    return Err(MalformedGraph::TakeIndices(indices));
                }
                if array_ty.rank() == 0 {
                    return Err(MalformedGraph::AxisOutOfRange { axis: 0, rank: 0 });
                }
                let mut shape = array_ty.shape;
                shape[0] = indices.shape[0];
                ArrayTy { shape }
            }
        };
        Ok(NodeTy::Array(ty))
    }
}

impl BinaryOp {
    fn from_slice(operands: &[NodeId]) -> Self {
        BinaryOp {
            lhs: operands[0],
            rhs: operands[1],
        }
    }
}

/// A node stored in the arena together with its declared type.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    pub ty: NodeTy,
}
