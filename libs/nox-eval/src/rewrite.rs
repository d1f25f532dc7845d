//! Deep rewriting of a graph with a user supplied local rule.
//!
//! The traversal is an explicit stack machine rather than native recursion, so arbitrarily
//! deep graphs cannot overflow the call stack. Every node reachable from the root is visited at
//! most once per rule: results are memoized in a cache keyed by the rule's [`RuleKey`] and the
//! traversal options, and only a bounded number of those caches are kept.
use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;
use tracing::trace;

use crate::{Error, Graph, NodeId, TraversalError};

/// Extra call-time argument distinguishing otherwise identical rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleArg {
    Int(i64),
    /// Bit pattern of an `f64`.
    Float(u64),
    Str(String),
}

impl From<i64> for RuleArg {
    fn from(value: i64) -> Self {
        RuleArg::Int(value)
    }
}

impl From<f64> for RuleArg {
    fn from(value: f64) -> Self {
        RuleArg::Float(value.to_bits())
    }
}

impl From<&str> for RuleArg {
    fn from(value: &str) -> Self {
        RuleArg::Str(value.to_string())
    }
}

/// Hashable descriptor of a rule together with its extra arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub name: &'static str,
    pub args: SmallVec<[RuleArg; 2]>,
}

impl RuleKey {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: SmallVec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<RuleArg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A local rewrite rule.
///
/// `rewrite` returns `None` to leave a node alone. Rules may call [`Graph::rewrite`] with
/// themselves to request the rewrite of another node; requesting a node that is still being
/// rewritten is reported as [`Error::CyclicDependency`].
pub trait RewriteRule {
    fn key(&self) -> RuleKey;

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Result<Option<NodeId>, Error>;
}

/// A rule backed by a closure.
pub struct FnRule<F> {
    key: RuleKey,
    func: F,
}

/// Adapts a closure into a [`RewriteRule`] identified by `key`.
pub fn rule_fn<F>(key: RuleKey, func: F) -> FnRule<F>
where
    F: Fn(&mut Graph, NodeId) -> Result<Option<NodeId>, Error>,
{
    FnRule { key, func }
}

impl<F> RewriteRule for FnRule<F>
where
    F: Fn(&mut Graph, NodeId) -> Result<Option<NodeId>, Error>,
{
    fn key(&self) -> RuleKey {
        self.key.clone()
    }

    fn rewrite(&self, graph: &mut Graph, node: NodeId) -> Result<Option<NodeId>, Error> {
        (self.func)(graph, node)
    }
}

/// Controls the order of rule application and whether replacements are rewritten again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RewriteOptions {
    /// Rewrite operands before offering the (rebuilt) node to the rule.
    pub depth_first: bool,
    /// Feed every replacement back through the traversal until a fixpoint is reached.
    pub recursive: bool,
}

impl RewriteOptions {
    /// Depth first, to a fixpoint. The configuration used by the simplify and optimize passes.
    pub const DEEP: Self = Self {
        depth_first: true,
        recursive: true,
    };

    /// Offer each node to the rule before its operands and apply a single substitution.
    pub const SHALLOW: Self = Self {
        depth_first: false,
        recursive: false,
    };
}

/// Memoized outcome for one input node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Replacement is being computed further up the work stack.
    Pending,
    /// Rewriting produced the input node itself.
    Unchanged,
    Replaced(NodeId),
}

#[derive(Debug, Default)]
struct RuleCache {
    slots: HashMap<NodeId, Slot>,
    /// Nodes currently marked pending, outermost first.
    in_flight: Vec<NodeId>,
}

impl RuleCache {
    fn begin(&mut self, node: NodeId) {
        self.slots.insert(node, Slot::Pending);
        self.in_flight.push(node);
    }

    fn settle(&mut self, node: NodeId, result: NodeId) {
        let slot = if result == node {
            Slot::Unchanged
        } else {
            Slot::Replaced(result)
        };
        self.slots.insert(node, slot);
        if self.in_flight.last() == Some(&node) {
            self.in_flight.pop();
        } else if let Some(pos) = self.in_flight.iter().rposition(|n| *n == node) {
            self.in_flight.remove(pos);
        }
    }

    /// Drops the pending markers pushed after `depth`.
    fn unwind(&mut self, depth: usize) {
        if depth >= self.in_flight.len() {
            return;
        }
        for node in self.in_flight.drain(depth..) {
            if self.slots.get(&node) == Some(&Slot::Pending) {
                self.slots.remove(&node);
            }
        }
    }
}

/// A rule descriptor plus the traversal options it was applied with.
type CacheKey = (RuleKey, RewriteOptions);

/// Per-rule caches, most recently used first.
#[derive(Debug)]
pub(crate) struct RewriteCaches {
    capacity: usize,
    entries: VecDeque<(CacheKey, RuleCache)>,
}

impl RewriteCaches {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, rule: &RuleKey) -> bool {
        self.entries.iter().any(|((k, _), _)| k == rule)
    }

    /// Returns the cache for `key`, creating it and evicting the least recently used idle cache
    /// if needed. Caches with nodes in flight are never evicted.
    fn get(&mut self, key: &CacheKey) -> &mut RuleCache {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(0) => {}
            Some(pos) => {
                if let Some(entry) = self.entries.remove(pos) {
                    self.entries.push_front(entry);
                }
            }
            None => {
                while self.entries.len() >= self.capacity {
                    let Some(pos) = self
                        .entries
                        .iter()
                        .rposition(|(_, cache)| cache.in_flight.is_empty())
                    else {
                        break;
                    };
                    if let Some(((evicted, _), _)) = self.entries.remove(pos) {
                        trace!(rule = evicted.name, "evicting rewrite cache");
                    }
                }
                self.entries.push_front((key.clone(), RuleCache::default()));
            }
        }
        &mut self.entries[0].1
    }
}

/// Tokens of the traversal work stack.
#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Look the node up or start rewriting it.
    Visit(NodeId),
    /// Operand results are on the value stack; rebuild the node around them.
    Rebuild(NodeId),
    /// The value on top of the stack is the final replacement for the node.
    Remember(NodeId),
}

impl Graph {
    /// Rewrites every node reachable from `root` with `rule` and returns the new root.
    ///
    /// Existing nodes are never modified; the result is either `root` itself or a node built
    /// from the rewritten operands.
    pub fn rewrite(
        &mut self,
        root: NodeId,
        rule: &dyn RewriteRule,
        options: RewriteOptions,
    ) -> Result<NodeId, Error> {
        self.check(root)?;
        let key = (rule.key(), options);
        let depth = self.rewrites.get(&key).in_flight.len();
        let result = self.rewrite_inner(root, rule, &key, options);
        if result.is_err() {
            self.rewrites.get(&key).unwind(depth);
        }
        result
    }

    fn rewrite_inner(
        &mut self,
        root: NodeId,
        rule: &dyn RewriteRule,
        key: &CacheKey,
        options: RewriteOptions,
    ) -> Result<NodeId, Error> {
        let mut stack = vec![Frame::Visit(root)];
        let mut values: Vec<NodeId> = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(node) => {
                    let slot = self.rewrites.get(key).slots.get(&node).copied();
                    match slot {
                        Some(Slot::Unchanged) => {
                            values.push(node);
                            continue;
                        }
                        Some(Slot::Replaced(result)) => {
                            values.push(result);
                            continue;
                        }
                        Some(Slot::Pending) => return Err(self.cycle_error(key, node)),
                        None => {}
                    }
                    self.rewrites.get(key).begin(node);
                    if !options.depth_first {
                        if let Some(replacement) = self.apply_rule(rule, node)? {
                            self.substitute(key, node, replacement, options, &mut stack, &mut values);
                            continue;
                        }
                    }
                    let operands = self.kind(node).operands();
                    stack.push(Frame::Rebuild(node));
                    stack.extend(operands.iter().rev().map(|&op| Frame::Visit(op)));
                }
                Frame::Rebuild(node) => {
                    let arity = self.kind(node).operands().len();
                    let split = values
                        .len()
                        .checked_sub(arity)
                        .ok_or(TraversalError::UnbalancedStack(values.len()))?;
                    let operands = values.split_off(split);
                    let rebuilt = self.recreate(node, &operands)?;
                    if options.depth_first {
                        if let Some(replacement) = self.apply_rule(rule, rebuilt)? {
                            self.substitute(key, node, replacement, options, &mut stack, &mut values);
                            continue;
                        }
                        if options.recursive && rebuilt != node {
                            // operands are fixpoints, so a rebuilt node the rule left alone is one too
                            let cache = self.rewrites.get(key);
                            cache.slots.entry(rebuilt).or_insert(Slot::Unchanged);
                        }
                    }
                    self.rewrites.get(key).settle(node, rebuilt);
                    values.push(rebuilt);
                }
                Frame::Remember(node) => {
                    let result = *values
                        .last()
                        .ok_or(TraversalError::UnbalancedStack(0))?;
                    self.rewrites.get(key).settle(node, result);
                }
            }
        }
        match values.as_slice() {
            [result] => Ok(*result),
            _ => Err(TraversalError::UnbalancedStack(values.len()).into()),
        }
    }

    fn substitute(
        &mut self,
        key: &CacheKey,
        node: NodeId,
        replacement: NodeId,
        options: RewriteOptions,
        stack: &mut Vec<Frame>,
        values: &mut Vec<NodeId>,
    ) {
        trace!(rule = key.0.name, %node, %replacement, "substitute");
        if options.recursive {
            stack.push(Frame::Remember(node));
            stack.push(Frame::Visit(replacement));
        } else {
            self.rewrites.get(key).settle(node, replacement);
            values.push(replacement);
        }
    }

    fn apply_rule(&mut self, rule: &dyn RewriteRule, node: NodeId) -> Result<Option<NodeId>, Error> {
        let replacement = rule.rewrite(self, node)?;
        if let Some(replacement) = replacement {
            self.check(replacement)?;
        }
        Ok(replacement.filter(|&r| r != node))
    }

    /// Rebuilds `node` around rewritten operands, reusing it when nothing changed.
    fn recreate(&mut self, node: NodeId, operands: &[NodeId]) -> Result<NodeId, Error> {
        let kind = self.kind(node);
        if kind.operands().as_slice() == operands {
            return Ok(node);
        }
        let kind = kind.with_operands(operands)?;
        self.intern(kind)
    }

    fn cycle_error(&self, key: &CacheKey, node: NodeId) -> Error {
        let in_flight = self
            .rewrites
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, cache)| cache.in_flight.as_slice())
            .unwrap_or_default();
        let start = in_flight.iter().position(|n| *n == node).unwrap_or(0);
        let chain: Vec<NodeId> = in_flight[start..]
            .iter()
            .copied()
            .chain(std::iter::once(node))
            .collect();
        let labels = chain.iter().map(|&n| self.label(n)).collect();
        Error::CyclicDependency { chain, labels }
    }
}
