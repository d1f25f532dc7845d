//! Tape interpreter.
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt::{self, Write},
    time::{Duration, Instant},
};

use indent_write::fmt::IndentWriter;
use ndarray::ArrayD;
use tracing::{debug, debug_span, trace};

use crate::{ArrayTy, Error, EvaluationError, Graph, NodeId, StepError};

/// Named runtime inputs, consumed by `Argument` nodes.
pub type Args = BTreeMap<String, ArrayD<f64>>;

/// The result of evaluating a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Array(ArrayD<f64>),
    Args(Args),
}

impl Value {
    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            Value::Array(x) => Some(x),
            Value::Args(_) => None,
        }
    }

    pub fn as_args(&self) -> Option<&Args> {
        match self {
            Value::Args(args) => Some(args),
            Value::Array(_) => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayD<f64>> {
        match self {
            Value::Array(x) => Some(x),
            Value::Args(_) => None,
        }
    }

    /// Short description of the value, e.g. `f64[2, 3]`.
    pub fn describe(&self) -> String {
        match self {
            Value::Array(x) => ArrayTy::new(x.shape()).to_string(),
            Value::Args(args) => format!("args({})", args.len()),
        }
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(x: ArrayD<f64>) -> Self {
        Value::Array(x)
    }
}

/// A step of the tape that completed before a failure.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub index: usize,
    pub node: NodeId,
    pub label: String,
    /// Operand name, tape slot and value description of each argument the step received.
    pub operands: Vec<(Cow<'static, str>, usize, String)>,
    pub result: String,
}

/// Every step executed so far, in tape order.
#[derive(Debug, Clone, Default)]
pub struct EvaluationTrace {
    pub steps: Vec<TraceStep>,
}

impl fmt::Display for EvaluationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "evaluation trace:")?;
        let mut writer = IndentWriter::new("  ", &mut *f as &mut dyn fmt::Write);
        for step in &self.steps {
            write!(writer, "{:>3}: {} (", step.index, step.label)?;
            for (i, (name, slot, ty)) in step.operands.iter().enumerate() {
                if i != 0 {
                    write!(writer, ", ")?;
                }
                write!(writer, "{name} = #{slot}: {ty}")?;
            }
            writeln!(writer, ") -> {}", step.result)?;
        }
        Ok(())
    }
}

/// Wall-clock duration of a single tape step.
#[derive(Debug, Clone)]
pub struct StepTiming {
    pub index: usize,
    pub node: NodeId,
    pub label: String,
    pub duration: Duration,
}

/// Per-step durations recorded by [`Graph::evaluate_with_times`].
#[derive(Debug, Clone, Default)]
pub struct Timings {
    pub steps: Vec<StepTiming>,
}

impl Timings {
    pub fn total(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }

    /// The slowest step, if any step ran.
    pub fn slowest(&self) -> Option<&StepTiming> {
        self.steps.iter().max_by_key(|s| s.duration)
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{:>3}: {:<32} {:?}", step.index, step.label, step.duration)?;
        }
        write!(f, "total: {:?}", self.total())
    }
}

impl Graph {
    /// Evaluates `node` against `args` by walking its tape.
    pub fn evaluate(&mut self, node: NodeId, args: &Args) -> Result<Value, Error> {
        self.run(node, args, None)
    }

    /// Like [`Graph::evaluate`], also recording how long each step took.
    pub fn evaluate_with_times(
        &mut self,
        node: NodeId,
        args: &Args,
    ) -> Result<(Value, Timings), Error> {
        let mut timings = Timings::default();
        let value = self.run(node, args, Some(&mut timings))?;
        Ok((value, timings))
    }

    fn run(
        &mut self,
        node: NodeId,
        args: &Args,
        mut timings: Option<&mut Timings>,
    ) -> Result<Value, Error> {
        let tape = self.tape(node)?;
        let _span = debug_span!("evaluate", %node, steps = tape.steps.len()).entered();
        let deadline = self.config.evaluation_deadline;
        let started = Instant::now();

        let mut results = Vec::with_capacity(tape.steps.len() + 1);
        results.push(Value::Args(args.clone()));
        for (i, step) in tape.steps.iter().enumerate() {
            let index = i + 1;
            let kind = self.kind(step.node);
            let outcome = match deadline {
                Some(limit) if started.elapsed() > limit => Err(StepError::DeadlineExceeded(limit)),
                _ => {
                    let operands: Vec<&Value> =
                        step.operands.iter().map(|&slot| &results[slot]).collect();
                    let step_start = Instant::now();
                    let outcome = kind.evaluate(&operands);
                    if let Some(timings) = timings.as_deref_mut() {
                        timings.steps.push(StepTiming {
                            index,
                            node: step.node,
                            label: self.label(step.node),
                            duration: step_start.elapsed(),
                        });
                    }
                    outcome
                }
            };
            match outcome {
                Ok(value) => {
                    trace!(index, node = %step.node, ty = %value.describe(), "step");
                    results.push(value);
                }
                Err(source) => {
                    let trace = self.trace(&tape.steps[..i], &results);
                    debug!(index, node = %step.node, %source, "evaluation failed");
                    return Err(Box::new(EvaluationError {
                        step: index,
                        node: step.node,
                        label: self.label(step.node),
                        source,
                        trace,
                    })
                    .into());
                }
            }
        }
        results
            .pop()
            .ok_or_else(|| crate::TraversalError::UnbalancedStack(0).into())
    }

    fn trace(&self, steps: &[crate::TapeStep], results: &[Value]) -> EvaluationTrace {
        let steps = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let kind = self.kind(step.node);
                TraceStep {
                    index: i + 1,
                    node: step.node,
                    label: self.label(step.node),
                    operands: step
                        .operands
                        .iter()
                        .enumerate()
                        .map(|(j, &slot)| (kind.operand_name(j), slot, results[slot].describe()))
                        .collect(),
                    result: results[i + 1].describe(),
                }
            })
            .collect();
        EvaluationTrace { steps }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn, array};

    use super::*;
    use crate::Config;

    fn scalar(x: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(&[]), x)
    }

    #[test]
    fn test_evaluate_polynomial() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[3]).unwrap();
        let x2 = graph.multiply(x, x).unwrap();
        let three = graph.constant(3.0);
        let root = graph.subtract(x2, three).unwrap();
        let args = Args::from([("x".to_string(), array![1.0, 2.0, 3.0].into_dyn())]);
        let out = graph.evaluate(root, &args).unwrap().into_array().unwrap();
        assert_eq!(out, array![-2.0, 1.0, 6.0].into_dyn());
    }

    #[test]
    fn test_timings_observe_every_step() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[]).unwrap();
        let s = graph.sin(x).unwrap();
        let root = graph.exp(s).unwrap();
        let args = Args::from([("x".to_string(), scalar(0.0))]);
        let (value, timings) = graph.evaluate_with_times(root, &args).unwrap();
        assert_relative_eq!(*value.as_array().unwrap().iter().next().unwrap(), 1.0);
        let tape = graph.tape(root).unwrap();
        assert_eq!(timings.steps.len(), tape.steps.len());
        let nodes: Vec<_> = timings.steps.iter().map(|s| s.node).collect();
        let expected: Vec<_> = tape.steps.iter().map(|s| s.node).collect();
        assert_eq!(nodes, expected);
        assert!(timings.total() >= timings.slowest().unwrap().duration);
        assert!(timings.to_string().contains("total"));
    }

    #[test]
    fn test_failure_carries_trace() {
        let mut graph = Graph::new();
        let table = graph.argument("table", &[2, 2]).unwrap();
        let rows = graph.argument("rows", &[1]).unwrap();
        let doubled = graph.add(table, table).unwrap();
        let root = graph.take(doubled, rows).unwrap();
        let args = Args::from([
            ("table".to_string(), array![[1.0, 2.0], [3.0, 4.0]].into_dyn()),
            ("rows".to_string(), array![5.0].into_dyn()),
        ]);
        let err = graph.evaluate(root, &args).unwrap_err();
        let Error::Evaluation(err) = err else {
            panic!("expected an evaluation error, got {err:?}");
        };
        assert!(matches!(
            err.source,
            StepError::IndexOutOfBounds { len: 2, .. }
        ));
        assert_eq!(err.node, root);
        let executed = graph.tape(root).unwrap().steps.len() - 1;
        assert_eq!(err.trace.steps.len(), executed);

        let message = err.to_string();
        let mut cursor = 0;
        for step in &err.trace.steps {
            let found = message[cursor..]
                .find(&step.label)
                .unwrap_or_else(|| panic!("{} missing from {message}", step.label));
            cursor += found + step.label.len();
        }
        assert!(message.contains("lhs = #"));
    }

    #[test]
    fn test_missing_argument() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[2]).unwrap();
        let root = graph.negative(x).unwrap();
        let err = graph.evaluate(root, &Args::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Evaluation(ref e) if matches!(e.source, StepError::MissingArgument(_))
        ));
        let args = Args::from([("x".to_string(), scalar(1.0))]);
        let err = graph.evaluate(root, &args).unwrap_err();
        assert!(matches!(
            err,
            Error::Evaluation(ref e) if matches!(e.source, StepError::ArgumentShape { .. })
        ));
    }

    #[test]
    fn test_deadline() {
        let mut graph = Graph::with_config(Config {
            evaluation_deadline: Some(Duration::ZERO),
            ..Default::default()
        });
        let x = graph.argument("x", &[]).unwrap();
        let mut node = x;
        for _ in 0..64 {
            node = graph.sin(node).unwrap();
        }
        let args = Args::from([("x".to_string(), scalar(1.0))]);
        let err = graph.evaluate(node, &args).unwrap_err();
        assert!(matches!(
            err,
            Error::Evaluation(ref e) if matches!(e.source, StepError::DeadlineExceeded(_))
        ));
    }
}
