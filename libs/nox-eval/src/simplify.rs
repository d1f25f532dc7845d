//! Simplification and backend optimization passes.
//!
//! Both passes are depth first fixpoint rewrites. Optimize consults the simplification hooks
//! before its own, and no simplification undoes an optimization, so optimizing twice is a no-op.
use tracing::{debug, debug_span, trace};

use crate::{Error, Graph, NodeId, NodeKind, RewriteOptions, RewriteRule, RuleKey, Value};

/// Which set of local hooks a pass consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Simplify,
    Optimize,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Simplify => "simplify",
            Pass::Optimize => "optimize",
        }
    }
}

impl RewriteRule for Pass {
    fn key(&self) -> RuleKey {
        RuleKey::new(self.name())
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Result<Option<NodeId>, Error> {
        let mut replacement = graph.simplify_hook(node)?;
        if replacement.is_none() && *self == Pass::Optimize {
            replacement = graph.optimize_hook(node)?;
        }
        if let Some(replacement) = replacement {
            graph.check_contract(self.name(), node, replacement)?;
        }
        Ok(replacement)
    }
}

impl Graph {
    /// Returns the simplified form of `node`, computing it on first use.
    pub fn simplified(&mut self, node: NodeId) -> Result<NodeId, Error> {
        if let Some(&simplified) = self.simplified.get(&node) {
            return Ok(simplified);
        }
        let _span = debug_span!("simplify", %node).entered();
        let result = self.rewrite(node, &Pass::Simplify, RewriteOptions::DEEP)?;
        self.check_contract(Pass::Simplify.name(), node, result)?;
        debug!(%node, %result, "simplified");
        self.simplified.insert(node, result);
        self.simplified.insert(result, result);
        Ok(result)
    }

    /// Returns the optimized form of `node`: the simplified graph with backend rewrites applied.
    pub fn optimized(&mut self, node: NodeId) -> Result<NodeId, Error> {
        if let Some(&optimized) = self.optimized.get(&node) {
            return Ok(optimized);
        }
        let simplified = self.simplified(node)?;
        let _span = debug_span!("optimize", %node).entered();
        let result = self.rewrite(simplified, &Pass::Optimize, RewriteOptions::DEEP)?;
        self.check_contract(Pass::Optimize.name(), node, result)?;
        debug!(%node, %result, "optimized");
        self.optimized.insert(node, result);
        self.optimized.insert(simplified, result);
        self.optimized.insert(result, result);
        self.simplified.entry(result).or_insert(result);
        Ok(result)
    }

    fn check_contract(
        &self,
        pass: &'static str,
        node: NodeId,
        replacement: NodeId,
    ) -> Result<(), Error> {
        let expected = self.ty(node);
        let found = self.ty(replacement);
        if self.config.check_contracts && expected != found {
            return Err(Error::ContractViolation {
                pass,
                node: self.label(node),
                expected: expected.clone(),
                found: found.clone(),
            });
        }
        Ok(())
    }

    fn simplify_hook(&mut self, node: NodeId) -> Result<Option<NodeId>, Error> {
        if let Some(folded) = self.fold(node) {
            return Ok(Some(folded));
        }
        let is = |graph: &Graph, id: NodeId, value: f64| {
            graph.literal(id).is_some_and(|l| l.is_all(value))
        };
        // identities only apply when the surviving operand already has the result type
        let same_ty = |graph: &Graph, id: NodeId| graph.ty(id) == graph.ty(node);
        let replacement = match self.kind(node).clone() {
            NodeKind::Add(b) if is(self, b.lhs, 0.0) && same_ty(self, b.rhs) => Some(b.rhs),
            NodeKind::Add(b) if is(self, b.rhs, 0.0) && same_ty(self, b.lhs) => Some(b.lhs),
            NodeKind::Multiply(b) if is(self, b.lhs, 1.0) && same_ty(self, b.rhs) => Some(b.rhs),
            NodeKind::Multiply(b) if is(self, b.rhs, 1.0) && same_ty(self, b.lhs) => Some(b.lhs),
            NodeKind::Divide(b) if is(self, b.rhs, 1.0) && same_ty(self, b.lhs) => Some(b.lhs),
            NodeKind::Power(b) if is(self, b.rhs, 1.0) && same_ty(self, b.lhs) => Some(b.lhs),
            NodeKind::Power(b) if is(self, b.rhs, 0.0) => match self.array_ty(node) {
                Some(ty) => {
                    let shape = ty.shape.clone();
                    Some(self.full(&shape, 1.0))
                }
                None => None,
            },
            NodeKind::Negative(x) => match *self.kind(x) {
                NodeKind::Negative(inner) => Some(inner),
                _ => None,
            },
            NodeKind::Reciprocal(x) => match *self.kind(x) {
                NodeKind::Reciprocal(inner) => Some(inner),
                _ => None,
            },
            NodeKind::Transpose(t) => t
                .permutation
                .iter()
                .copied()
                .eq(0..t.permutation.len())
                .then_some(t.expr),
            NodeKind::Reshape(r) => match self.kind(r.expr).clone() {
                _ if same_ty(self, r.expr) => Some(r.expr),
                NodeKind::Reshape(inner) => Some(self.reshape(inner.expr, &r.new_sizes)?),
                _ => None,
            },
            NodeKind::Broadcast(b) if same_ty(self, b.expr) => Some(b.expr),
            NodeKind::Sum(s) => match self.array_ty(s.expr) {
                Some(ty) if ty.shape.get(s.axis) == Some(&1) => {
                    let mut shape = ty.shape.clone();
                    shape.remove(s.axis);
                    Some(self.reshape(s.expr, &shape)?)
                }
                _ => None,
            },
            _ => None,
        };
        Ok(replacement)
    }

    fn optimize_hook(&mut self, node: NodeId) -> Result<Option<NodeId>, Error> {
        let replacement = match self.kind(node).clone() {
            NodeKind::Multiply(b) => match (self.kind(b.lhs).clone(), self.kind(b.rhs).clone()) {
                (_, NodeKind::Reciprocal(y)) => Some(self.divide(b.lhs, y)?),
                (NodeKind::Reciprocal(y), _) => Some(self.divide(b.rhs, y)?),
                _ => None,
            },
            NodeKind::Power(b) if self.ty(b.lhs) == self.ty(node) => {
                match self.literal(b.rhs).and_then(|l| l.uniform()) {
                    Some(-1.0) => Some(self.reciprocal(b.lhs)?),
                    Some(0.5) => Some(self.sqrt(b.lhs)?),
                    Some(2.0) => Some(self.multiply(b.lhs, b.lhs)?),
                    _ => None,
                }
            }
            _ => None,
        };
        Ok(replacement)
    }

    /// Pre-evaluates a node whose operands are all constants.
    fn fold(&mut self, node: NodeId) -> Option<NodeId> {
        let kind = self.kind(node);
        if matches!(kind, NodeKind::Sentinel | NodeKind::Constant(_)) {
            return None;
        }
        let operands = kind
            .operands()
            .iter()
            .map(|&op| self.literal(op).map(|l| Value::Array(l.array().clone())))
            .collect::<Option<Vec<_>>>()?;
        let refs: Vec<&Value> = operands.iter().collect();
        match kind.evaluate(&refs) {
            Ok(Value::Array(value)) => Some(self.constant(value)),
            Ok(Value::Args(_)) => None,
            Err(err) => {
                trace!(%node, %err, "skipping constant folding");
                None
            }
        }
    }
}
