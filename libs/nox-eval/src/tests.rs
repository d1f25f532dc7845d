use approx::assert_relative_eq;
use ndarray::{ArrayD, IxDyn, array};

use crate::*;

fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let collector = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(collector);
}

fn scalar(x: f64) -> ArrayD<f64> {
    ArrayD::from_elem(IxDyn(&[]), x)
}

fn args<const N: usize>(entries: [(&str, ArrayD<f64>); N]) -> Args {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

#[test]
fn test_simplify_then_evaluate() {
    trace_init();
    let mut graph = Graph::new();
    let x = graph.argument("x", &[]).unwrap();
    let two = graph.constant(2.0);
    let zero = graph.constant(0.0);
    let mul = graph.multiply(two, x).unwrap();
    let root = graph.add(mul, zero).unwrap();

    let simplified = graph.simplified(root).unwrap();
    assert_eq!(simplified, mul);
    let value = graph
        .evaluate(simplified, &args([("x", scalar(5.0))]))
        .unwrap()
        .into_array()
        .unwrap();
    assert_relative_eq!(value, scalar(10.0));
}

#[test]
fn test_independent_graphs_are_canonical() {
    fn build(graph: &mut Graph) -> NodeId {
        let v = graph.argument("v", &[3]).unwrap();
        let w = graph.argument("w", &[3]).unwrap();
        let dot = graph.multiply(v, w).unwrap();
        let s = graph.sum(dot, 0).unwrap();
        graph.sqrt(s).unwrap()
    }
    let mut graph = Graph::new();
    let a = build(&mut graph);
    let len = graph.len();
    let b = build(&mut graph);
    assert_eq!(a, b);
    assert_eq!(graph.len(), len);
}

#[test]
fn test_constant_folding_round_trip() {
    trace_init();
    let mut graph = Graph::new();
    let base = graph
        .constant(Literal::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap());
    let t = graph.transpose(base, &[1, 0]).unwrap();
    let e = graph.exp(t).unwrap();
    let s = graph.sum(e, 1).unwrap();
    let l = graph.log(s).unwrap();
    let half = graph.constant(0.5);
    let root = graph.power(l, half).unwrap();
    assert!(graph.is_constant(root).unwrap());

    let expected = graph
        .evaluate(root, &Args::new())
        .unwrap()
        .into_array()
        .unwrap();
    let folded = graph.simplified(root).unwrap();
    assert!(matches!(graph.kind(folded), NodeKind::Constant(_)));
    let value = graph
        .evaluate(folded, &Args::new())
        .unwrap()
        .into_array()
        .unwrap();
    assert_relative_eq!(value, expected, epsilon = 1e-12);
}

#[test]
fn test_optimized_matches_unoptimized() {
    let mut graph = Graph::new();
    let x = graph.argument("x", &[4]).unwrap();
    let y = graph.argument("y", &[4]).unwrap();
    let two = graph.constant(2.0);
    let one = graph.constant(1.0);
    let half = graph.constant(0.5);
    let recip = graph.reciprocal(y).unwrap();
    let ratio = graph.multiply(x, recip).unwrap();
    let sq = graph.power(ratio, two).unwrap();
    let shifted = graph.add(sq, one).unwrap();
    let norm = graph.power(shifted, half).unwrap();
    let root = graph.multiply(norm, one).unwrap();

    let inputs = args([
        ("x", array![1.0, 2.0, 3.0, 4.0].into_dyn()),
        ("y", array![2.0, 4.0, 8.0, 16.0].into_dyn()),
    ]);
    let expected = graph.evaluate(root, &inputs).unwrap().into_array().unwrap();
    let optimized = graph.optimized(root).unwrap();
    assert_ne!(optimized, root);
    assert_eq!(graph.ty(optimized), graph.ty(root));
    assert_eq!(graph.optimized(optimized).unwrap(), optimized);
    let value = graph
        .evaluate(optimized, &inputs)
        .unwrap()
        .into_array()
        .unwrap();
    assert_relative_eq!(value, expected, epsilon = 1e-12);

    let listing = graph.pretty_print(optimized).unwrap();
    assert!(listing.contains(" / "));
    assert!(listing.contains("sqrt("));
    assert!(!listing.contains(" ^ "));
}

#[test]
fn test_shape_ops_pipeline() {
    let mut graph = Graph::new();
    let m = graph.argument("m", &[2, 3]).unwrap();
    let rows = graph.argument("rows", &[3]).unwrap();
    let t = graph.transpose(m, &[1, 0]).unwrap();
    let picked = graph.take(t, rows).unwrap();
    let flat = graph.reshape(picked, &[6]).unwrap();
    let bias = graph.full(&[2, 6], 1.0);
    let b = graph.broadcast(flat, &[2, 6]).unwrap();
    let shifted = graph.add(b, bias).unwrap();
    let stacked = graph.stack(vec![shifted, shifted], 0).unwrap();
    let root = graph.sum(stacked, 0).unwrap();

    let inputs = args([
        ("m", array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn()),
        ("rows", array![2.0, 0.0, 1.0].into_dyn()),
    ]);
    let value = graph.evaluate(root, &inputs).unwrap().into_array().unwrap();
    let row = array![8.0, 14.0, 4.0, 10.0, 6.0, 12.0];
    let expected = ndarray::stack(ndarray::Axis(0), &[row.view(), row.view()])
        .unwrap()
        .into_dyn();
    assert_relative_eq!(value, expected);
}

#[test]
fn test_rewrite_with_rule_arguments() {
    let scale = |factor: f64| {
        rule_fn(
            RuleKey::new("scale_args").with_arg(factor),
            move |graph: &mut Graph, node| {
                if !matches!(graph.kind(node), NodeKind::Argument(_)) {
                    return Ok(None);
                }
                let c = graph.constant(factor);
                graph.multiply(c, node).map(Some)
            },
        )
    };
    let mut graph = Graph::new();
    let x = graph.argument("x", &[]).unwrap();
    let root = graph.sin(x).unwrap();
    let doubled = graph
        .rewrite(root, &scale(2.0), RewriteOptions::SHALLOW)
        .unwrap();
    let tripled = graph
        .rewrite(root, &scale(3.0), RewriteOptions::SHALLOW)
        .unwrap();
    assert_ne!(doubled, tripled);

    let inputs = args([("x", scalar(0.25))]);
    let value = graph.evaluate(tripled, &inputs).unwrap().into_array().unwrap();
    assert_relative_eq!(value, scalar(0.75_f64.sin()), epsilon = 1e-12);
}

#[test]
fn test_error_trace_lists_steps_in_order() {
    trace_init();
    let mut graph = Graph::new();
    let x = graph.argument("x", &[2]).unwrap();
    let idx = graph.argument("idx", &[1]).unwrap();
    let s = graph.sin(x).unwrap();
    let c = graph.cos(x).unwrap();
    let both = graph.add(s, c).unwrap();
    let root = graph.take(both, idx).unwrap();
    let err = graph
        .evaluate(
            root,
            &args([("x", array![0.0, 1.0].into_dyn()), ("idx", array![3.0].into_dyn())]),
        )
        .unwrap_err();
    let message = err.to_string();
    let tape = graph.tape(root).unwrap();
    let (last, executed) = tape.steps.split_last().unwrap();
    assert!(message.contains(&graph.label(last.node)));
    let mut cursor = message.find("evaluation trace:").unwrap();
    for step in executed {
        let label = graph.label(step.node);
        let found = message[cursor..]
            .find(&label)
            .unwrap_or_else(|| panic!("{label} missing from {message}"));
        cursor += found + label.len();
    }
}
