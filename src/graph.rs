// src/graph.rs
//
// The physics graph as Graphviz DOT, optionally rendered with `dot -T<ext>`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::quant::QuantKind;

fn node_shape(kind: QuantKind) -> &'static str {
    match kind {
        QuantKind::Value => "ellipse",
        QuantKind::Mask => "diamond",
        QuantKind::Field => "box",
    }
}

/// DOT source: one node per quantity, an edge parent -> child, and the solver
/// as a node between what it reads and what it writes.
pub fn to_dot(e: &Engine) -> String {
    let mut s = String::from("digraph physics {\n\trankdir=LR;\n");
    for q in e.quants() {
        let _ = writeln!(
            s,
            "\t{:?} [shape={}, label={:?}];",
            q.name(),
            node_shape(q.kind()),
            q.full_name()
        );
    }
    for q in e.quants() {
        for &p in q.parents() {
            let _ = writeln!(s, "\t{:?} -> {:?};", e.quant_by_id(p).name(), q.name());
        }
    }
    for eq in e.equations() {
        let (out, input) = (e.quant_by_id(eq.output).name(), e.quant_by_id(eq.input).name());
        let _ = writeln!(s, "\t{:?} -> {:?} [style=dashed, label=\"d/dt\"];", input, out);
    }
    if let Some((written, read)) = e.solver_dependencies() {
        s.push_str("\tsolver [shape=octagon, style=filled, fillcolor=lightgrey];\n");
        for r in read.iter().filter(|r| e.has_quant(r)) {
            let _ = writeln!(s, "\t{:?} -> solver;", r);
        }
        for w in written.iter().filter(|w| e.has_quant(w)) {
            let _ = writeln!(s, "\tsolver -> {:?};", w);
        }
    }
    s.push_str("}\n");
    s
}

/// Write `<file>.dot` (or `file` itself if it ends in `.dot`) and, for other
/// extensions, render it with graphviz to `file`. Returns the DOT path.
///
/// A missing or failing `dot` is logged, not an error.
pub fn save_graph(e: &Engine, file: &Path) -> Result<PathBuf> {
    let ext = file
        .extension()
        .and_then(|x| x.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let dot_path = if ext == "dot" {
        file.to_path_buf()
    } else {
        let mut p = file.as_os_str().to_owned();
        p.push(".dot");
        PathBuf::from(p)
    };
    if let Some(parent) = dot_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dot_path, to_dot(e))?;
    info!(path = %dot_path.display(), "graph saved");

    if ext.is_empty() || ext == "dot" {
        return Ok(dot_path);
    }
    match Command::new("dot")
        .arg(format!("-T{ext}"))
        .arg(&dot_path)
        .arg("-o")
        .arg(file)
        .status()
    {
        Ok(st) if st.success() => info!(path = %file.display(), "graph rendered"),
        Ok(st) => warn!(status = %st, "dot failed; only the .dot file was written"),
        Err(err) => warn!(%err, "graphviz 'dot' not available; only the .dot file was written"),
    }
    Ok(dot_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([2, 2, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("llg").unwrap();
        e.load("solver/euler").unwrap();
        e
    }

    #[test]
    fn dot_has_nodes_and_edges() {
        let dot = to_dot(&engine());
        assert!(dot.starts_with("digraph physics {"));
        assert!(dot.contains("\"torque\" [shape=box"));
        assert!(dot.contains("\"H\" -> \"torque\";"));
        assert!(dot.contains("\"torque\" -> \"m\" [style=dashed"));
        assert!(dot.contains("solver -> \"t\";"));
    }

    #[test]
    fn png_target_writes_dot_even_without_graphviz() {
        let dir = tempfile::tempdir().unwrap();
        let p = save_graph(&engine(), &dir.path().join("graph.png")).unwrap();
        assert_eq!(p.file_name().unwrap(), "graph.png.dot");
        assert!(p.exists());
    }
}
