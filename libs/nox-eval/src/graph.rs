//! The node arena: hash-consed construction and graph builders.
use std::{collections::HashMap, fmt, sync::Arc};

use smallvec::SmallVec;

use crate::{
    Argument, ArrayTy, BinaryOp, Broadcast, Config, Dependencies, Error, Literal, MalformedGraph,
    NodeData, NodeId, NodeKind, NodeTy, Reshape, Stack, Sum, Take, Tape, Transpose,
    rewrite::RewriteCaches,
};

/// Arena of hash-consed nodes plus every cache derived from them.
///
/// Constructing a node that is structurally equal to an existing one returns the existing
/// [`NodeId`], so independently built graphs share their common subgraphs. Nodes are never
/// mutated or removed; rewriting only ever adds nodes.
pub struct Graph {
    nodes: Vec<NodeData>,
    interned: HashMap<NodeKind, NodeId>,
    pub(crate) config: Config,
    pub(crate) rewrites: RewriteCaches,
    pub(crate) simplified: HashMap<NodeId, NodeId>,
    pub(crate) optimized: HashMap<NodeId, NodeId>,
    pub(crate) dependencies: HashMap<NodeId, Arc<Dependencies>>,
    pub(crate) tapes: HashMap<NodeId, Arc<Tape>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            interned: HashMap::new(),
            rewrites: RewriteCaches::new(config.rewrite_cache_capacity),
            config,
            simplified: HashMap::new(),
            optimized: HashMap::new(),
            dependencies: HashMap::new(),
            tapes: HashMap::new(),
        };
        let sentinel = graph.insert(NodeKind::Sentinel, NodeTy::Args);
        debug_assert_eq!(sentinel, NodeId::SENTINEL);
        graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of nodes in the arena, the sentinel included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the sentinel is allocated on construction.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the canonical node for `kind`, validating its operands first.
    pub fn intern(&mut self, kind: NodeKind) -> Result<NodeId, Error> {
        if let Some(&id) = self.interned.get(&kind) {
            return Ok(id);
        }
        let ty = kind.ty(self)?;
        Ok(self.insert(kind, ty))
    }

    fn insert(&mut self, kind: NodeKind, ty: NodeTy) -> NodeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.interned.insert(kind.clone(), id);
        self.nodes.push(NodeData { kind, ty });
        id
    }

    /// Return the node for an id. Panics if the id belongs to another graph.
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn ty(&self, id: NodeId) -> &NodeTy {
        &self.node(id).ty
    }

    pub fn array_ty(&self, id: NodeId) -> Option<&ArrayTy> {
        self.ty(id).array()
    }

    pub(crate) fn try_ty(&self, id: NodeId) -> Result<&NodeTy, MalformedGraph> {
        self.nodes
            .get(id.index())
            .map(|n| &n.ty)
            .ok_or(MalformedGraph::UnknownNode(id))
    }

    pub(crate) fn check(&self, id: NodeId) -> Result<(), MalformedGraph> {
        self.try_ty(id).map(|_| ())
    }

    /// Diagnostic label such as `%4 multiply`.
    pub fn label(&self, id: NodeId) -> String {
        match self.nodes.get(id.index()) {
            Some(node) => format!("{id} {}", node.kind.label()),
            None => format!("{id} <unknown>"),
        }
    }

    pub fn literal(&self, id: NodeId) -> Option<&Literal> {
        match self.kind(id) {
            NodeKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// The root sentinel standing for the runtime argument bundle.
    pub fn sentinel(&self) -> NodeId {
        NodeId::SENTINEL
    }

    /// Creates a named argument of the given shape, read from the argument bundle.
    pub fn argument(&mut self, name: impl Into<String>, shape: &[usize]) -> Result<NodeId, Error> {
        self.intern(NodeKind::Argument(Argument {
            args: NodeId::SENTINEL,
            name: name.into(),
            ty: ArrayTy::new(shape),
        }))
    }

    pub fn constant(&mut self, literal: impl Into<Literal>) -> NodeId {
        let literal = literal.into();
        let ty = NodeTy::Array(literal.ty());
        self.insert(NodeKind::Constant(literal), ty)
    }

    /// Constant of the given shape with every element equal to `value`.
    pub fn full(&mut self, shape: &[usize], value: f64) -> NodeId {
        self.constant(Literal::full(shape, value))
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Add(BinaryOp { lhs, rhs }))
    }

    /// `lhs + -rhs`; there is no dedicated subtraction node.
    pub fn subtract(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, Error> {
        let rhs = self.negative(rhs)?;
        self.add(lhs, rhs)
    }

    pub fn multiply(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Multiply(BinaryOp { lhs, rhs }))
    }

    pub fn divide(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Divide(BinaryOp { lhs, rhs }))
    }

    pub fn power(&mut self, base: NodeId, exponent: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Power(BinaryOp {
            lhs: base,
            rhs: exponent,
        }))
    }

    pub fn negative(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Negative(expr))
    }

    pub fn reciprocal(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Reciprocal(expr))
    }

    pub fn sqrt(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Sqrt(expr))
    }

    pub fn exp(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Exp(expr))
    }

    pub fn log(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Log(expr))
    }

    pub fn sin(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Sin(expr))
    }

    pub fn cos(&mut self, expr: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Cos(expr))
    }

    /// Sums over `axis`, removing it from the shape.
    pub fn sum(&mut self, expr: NodeId, axis: usize) -> Result<NodeId, Error> {
        self.intern(NodeKind::Sum(Sum { expr, axis }))
    }

    pub fn reshape(&mut self, expr: NodeId, new_sizes: &[usize]) -> Result<NodeId, Error> {
        self.intern(NodeKind::Reshape(Reshape {
            expr,
            new_sizes: SmallVec::from_slice(new_sizes),
        }))
    }

    pub fn transpose(&mut self, expr: NodeId, permutation: &[usize]) -> Result<NodeId, Error> {
        self.intern(NodeKind::Transpose(Transpose {
            expr,
            permutation: SmallVec::from_slice(permutation),
        }))
    }

    pub fn broadcast(&mut self, expr: NodeId, sizes: &[usize]) -> Result<NodeId, Error> {
        self.intern(NodeKind::Broadcast(Broadcast {
            expr,
            sizes: SmallVec::from_slice(sizes),
        }))
    }

    pub fn stack(&mut self, nodes: Vec<NodeId>, axis: usize) -> Result<NodeId, Error> {
        self.intern(NodeKind::Stack(Stack { nodes, axis }))
    }

    /// Selects rows of `array` along its first axis.
    pub fn take(&mut self, array: NodeId, indices: NodeId) -> Result<NodeId, Error> {
        self.intern(NodeKind::Take(Take { array, indices }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_consing() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[3]).unwrap();
        let two = graph.constant(2.0);
        let a = graph.multiply(two, x).unwrap();
        let len = graph.len();
        let two_again = graph.constant(2.0);
        let x_again = graph.argument("x", &[3]).unwrap();
        let b = graph.multiply(two_again, x_again).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.len(), len);
        let c = graph.multiply(x, two).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_construction_validation() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[3]).unwrap();
        let y = graph.argument("y", &[4]).unwrap();
        assert!(matches!(
            graph.add(x, y),
            Err(Error::Malformed(MalformedGraph::Broadcast { .. }))
        ));
        assert!(matches!(
            graph.sum(x, 1),
            Err(Error::Malformed(MalformedGraph::AxisOutOfRange { axis: 1, rank: 1 }))
        ));
        assert!(matches!(
            graph.reshape(x, &[2, 2]),
            Err(Error::Malformed(MalformedGraph::ReshapeSize { from: 3, to: 4 }))
        ));
        assert!(matches!(
            graph.negative(NodeId::SENTINEL),
            Err(Error::Malformed(MalformedGraph::ExpectedArray(_)))
        ));
        assert!(matches!(
            graph.negative(NodeId(1000)),
            Err(Error::Malformed(MalformedGraph::UnknownNode(_)))
        ));
        assert!(matches!(
            graph.argument("", &[]),
            Err(Error::Malformed(MalformedGraph::EmptyArgumentName))
        ));
        assert!(matches!(
            graph.stack(vec![], 0),
            Err(Error::Malformed(MalformedGraph::EmptyStack))
        ));
    }

    #[test]
    fn test_declared_types() {
        let mut graph = Graph::new();
        let m = graph.argument("m", &[2, 3]).unwrap();
        let row = graph.argument("row", &[3]).unwrap();
        let sum = graph.add(m, row).unwrap();
        assert_eq!(graph.array_ty(sum), Some(&ArrayTy::new(&[2, 3])));
        let t = graph.transpose(m, &[1, 0]).unwrap();
        assert_eq!(graph.array_ty(t), Some(&ArrayTy::new(&[3, 2])));
        let s = graph.stack(vec![row, row], 1).unwrap();
        assert_eq!(graph.array_ty(s), Some(&ArrayTy::new(&[3, 2])));
        let b = graph.broadcast(row, &[4, 3]).unwrap();
        assert_eq!(graph.array_ty(b), Some(&ArrayTy::new(&[4, 3])));
        assert!(graph.broadcast(row, &[3, 4]).is_err());
        assert_eq!(graph.ty(graph.sentinel()), &NodeTy::Args);
    }
}
