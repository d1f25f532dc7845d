//! Dependency sets and the flattened execution tape.
use std::{collections::HashMap, sync::Arc};

use smallvec::SmallVec;
use tracing::debug;

use crate::{Error, Graph, NodeId, TraversalError};

/// Every transitive operand of a node, mapped to the size of that operand's own dependency set.
pub type Dependencies = HashMap<NodeId, usize>;

/// One instruction of a [`Tape`]: a node and the buffer slots of its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeStep {
    pub node: NodeId,
    pub operands: SmallVec<[usize; 4]>,
}

/// Topologically ordered instruction stream for a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tape {
    /// The sentinel followed by every dependency in ascending rank.
    pub ordered: Arc<[NodeId]>,
    /// One step per ordered node after the sentinel, then the target node itself.
    pub steps: Vec<TapeStep>,
}

impl Graph {
    /// Returns the transitive operands of `node` with their ranks, computing them bottom up.
    ///
    /// Every visited node keeps its own full set, so a chain of `n` nodes holds `O(n²)` entries.
    pub fn dependencies(&mut self, node: NodeId) -> Result<Arc<Dependencies>, Error> {
        self.check(node)?;
        let mut stack = vec![(node, false)];
        while let Some((id, expanded)) = stack.pop() {
            if self.dependencies.contains_key(&id) {
                continue;
            }
            let operands = self.kind(id).operands();
            if !expanded {
                stack.push((id, true));
                stack.extend(
                    operands
                        .iter()
                        .filter(|op| !self.dependencies.contains_key(*op))
                        .map(|&op| (op, false)),
                );
                continue;
            }
            let mut deps = Dependencies::new();
            for op in &operands {
                let child = self
                    .dependencies
                    .get(op)
                    .ok_or(TraversalError::OperandNotOrdered {
                        node: id,
                        operand: *op,
                    })?;
                deps.extend(child.iter().map(|(&n, &rank)| (n, rank)));
                deps.insert(*op, child.len());
            }
            self.dependencies.insert(id, Arc::new(deps));
        }
        Ok(self.dependencies[&node].clone())
    }

    /// True when `node` does not depend on the argument bundle and may be pre-evaluated.
    pub fn is_constant(&mut self, node: NodeId) -> Result<bool, Error> {
        if node == NodeId::SENTINEL {
            return Ok(false);
        }
        Ok(!self.dependencies(node)?.contains_key(&NodeId::SENTINEL))
    }

    /// The sentinel followed by every dependency of `node`, operands always before their users.
    pub fn ordered(&mut self, node: NodeId) -> Result<Arc<[NodeId]>, Error> {
        Ok(self.tape(node)?.ordered.clone())
    }

    /// Returns the cached tape for `node`, linearizing it on first use.
    pub fn tape(&mut self, node: NodeId) -> Result<Arc<Tape>, Error> {
        if let Some(tape) = self.tapes.get(&node) {
            return Ok(tape.clone());
        }
        let deps = self.dependencies(node)?;
        let mut ranked: Vec<(usize, NodeId)> = deps
            .iter()
            .filter(|(id, _)| **id != NodeId::SENTINEL)
            .map(|(&id, &rank)| (rank, id))
            .collect();
        ranked.sort_unstable();
        let ordered: Arc<[NodeId]> = std::iter::once(NodeId::SENTINEL)
            .chain(ranked.into_iter().map(|(_, id)| id))
            .collect();

        let index: HashMap<NodeId, usize> =
            ordered.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let targets: &[NodeId] = if node == NodeId::SENTINEL {
            &[]
        } else {
            std::slice::from_ref(&node)
        };
        let steps = ordered[1..]
            .iter()
            .chain(targets)
            .enumerate()
            .map(|(i, &id)| {
                let position = i + 1;
                let operands = self
                    .kind(id)
                    .operands()
                    .into_iter()
                    .map(|op| match index.get(&op) {
                        Some(&slot) if slot < position => Ok(slot),
                        Some(_) => Err(TraversalError::OperandOrderedLate {
                            node: id,
                            operand: op,
                        }),
                        None => Err(TraversalError::OperandNotOrdered {
                            node: id,
                            operand: op,
                        }),
                    })
                    .collect::<Result<SmallVec<[usize; 4]>, _>>()?;
                Ok(TapeStep { node: id, operands })
            })
            .collect::<Result<Vec<_>, TraversalError>>()?;

        debug!(%node, steps = steps.len(), "linearized");
        let tape = Arc::new(Tape { ordered, steps });
        self.tapes.insert(node, tape.clone());
        Ok(tape)
    }
}
