//! Text and graphviz renderings of a linearized graph.
use std::fmt::Write;

use itertools::Itertools;

use crate::{Error, Graph, NodeId, NodeKind};

impl Graph {
    /// Renders the tape of `node` as a listing of `let var_N = ...` bindings.
    ///
    /// `var_0` is the argument bundle and the last binding is `node` itself.
    pub fn pretty_print(&mut self, node: NodeId) -> Result<String, Error> {
        let tape = self.tape(node)?;
        let mut out = String::new();
        writeln!(out, "fn(var_0) {{")?;
        let mut writer = indent_write::fmt::IndentWriter::new("  ", &mut out);
        for (i, step) in tape.steps.iter().enumerate() {
            let kind = self.kind(step.node);
            write!(writer, "let var_{} = ", i + 1)?;
            let args = step.operands.iter().map(|slot| format!("var_{slot}"));
            match kind {
                NodeKind::Add(_) => write!(writer, "{}", args.format(" + "))?,
                NodeKind::Multiply(_) => write!(writer, "{}", args.format(" * "))?,
                NodeKind::Divide(_) => write!(writer, "{}", args.format(" / "))?,
                NodeKind::Power(_) => write!(writer, "{}", args.format(" ^ "))?,
                NodeKind::Negative(_) => write!(writer, "-{}", args.format(""))?,
                NodeKind::Argument(a) => write!(writer, "var_0.{}", a.name)?,
                NodeKind::Constant(c) => write!(writer, "constant({c})")?,
                _ => write!(writer, "{}({})", kind.label(), args.format(", "))?,
            }
            writeln!(writer, " : {}", self.ty(step.node))?;
        }
        drop(writer);
        write!(out, "}}")?;
        Ok(out)
    }

    /// Renders the dependency graph of `node` in graphviz dot syntax.
    pub fn graphviz(&mut self, node: NodeId) -> Result<String, Error> {
        let tape = self.tape(node)?;
        let mut out = String::new();
        writeln!(out, "digraph {{")?;
        writeln!(out, "  n{} [label=\"args\", shape=box];", NodeId::SENTINEL.index())?;
        for step in &tape.steps {
            let id = step.node;
            let label = self.kind(id).label().replace('"', "\\\"");
            writeln!(out, "  n{} [label=\"{label}\\n{}\"];", id.index(), self.ty(id))?;
            let kind = self.kind(id);
            for (i, op) in kind.operands().iter().enumerate() {
                writeln!(
                    out,
                    "  n{} -> n{} [label=\"{}\"];",
                    op.index(),
                    id.index(),
                    kind.operand_name(i)
                )?;
            }
        }
        write!(out, "}}")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_print() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[3]).unwrap();
        let two = graph.constant(2.0);
        let mul = graph.multiply(two, x).unwrap();
        let root = graph.sin(mul).unwrap();
        let listing = graph.pretty_print(root).unwrap();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines[0], "fn(var_0) {");
        assert!(lines.contains(&"  let var_1 = constant(2) : f64[]"));
        assert!(lines.contains(&"  let var_2 = var_0.x : f64[3]"));
        assert_eq!(lines[3], "  let var_3 = var_1 * var_2 : f64[3]");
        assert_eq!(lines[4], "  let var_4 = sin(var_3) : f64[3]");
        assert_eq!(lines[5], "}");
    }

    #[test]
    fn test_graphviz() {
        let mut graph = Graph::new();
        let x = graph.argument("x", &[]).unwrap();
        let root = graph.add(x, x).unwrap();
        let dot = graph.graphviz(root).unwrap();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains(&format!("n0 -> n{} [label=\"args\"]", x.index())));
        assert!(dot.contains(&format!("n{} -> n{} [label=\"lhs\"]", x.index(), root.index())));
        assert!(dot.ends_with('}'));
    }
}
