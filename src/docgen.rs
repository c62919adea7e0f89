// src/docgen.rs
//
// LaTeX documentation of every registered module: description, provided
// quantities and dependency graph, generated by loading each module into a
// throwaway engine.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::graph::save_graph;
use crate::modules::{registry, ModuleSpec};

const BUILTINS: [&str; 3] = ["t", "dt", "step"];

fn tex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '_' | '%' | '&' | '#' | '$' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn no_slash(s: &str) -> String {
    s.replace('/', "-")
}

/// LaTeX subsection for one module, or an error if it does not load.
fn module_section(spec: &ModuleSpec, dir: &Path) -> Result<String> {
    let mut e = Engine::new(dir);
    e.set_grid_size([4, 4, 4])?;
    e.set_cell_size([1e-9, 1e-9, 1e-9])?;
    if spec.name.starts_with("solver/") {
        // solvers need an equation to integrate
        e.load("llg")?;
    }
    e.load(spec.name)?;

    let graph_base = format!("modules/{}", no_slash(spec.name));
    save_graph(&e, &dir.join(format!("{graph_base}.pdf")))?;

    let name = tex_escape(spec.name);
    let mut s = String::new();
    let _ = writeln!(s, "\\subsection{{{name}}}");
    let _ = writeln!(s, "\\label{{{}}}", spec.name);
    let _ = writeln!(s, "\\index{{{name}}}");
    let _ = writeln!(s);
    let _ = writeln!(s, "Load this module with \\texttt{{\\textbf{{load}}(\"{name}\")}}");
    let _ = writeln!(s, "\\subsubsection*{{Module description}}");
    let _ = writeln!(s, "{} \\\\", tex_escape(spec.description));

    let quants: Vec<_> = e
        .quants()
        .iter()
        .filter(|q| !BUILTINS.contains(&q.name()))
        .collect();
    if !quants.is_empty() {
        let _ = writeln!(s, "\\subsubsection*{{Module quantities}}");
        let _ = writeln!(s, "These quantities are provided by the module:\\\\");
        let _ = writeln!(s, "\\smallskip");
        let _ = writeln!(s, "\\begin{{tabular}}{{llll}}");
        let _ = writeln!(s, "name & unit & comp+kind & desc \\\\\\hline");
        for q in quants {
            let n = tex_escape(q.name());
            let _ = writeln!(
                s,
                "\\texttt{{{n}}}\\index{{{n}}} & {} & {} {} & {} \\\\",
                tex_escape(q.unit()),
                q.ncomp(),
                q.kind(),
                tex_escape(q.desc())
            );
        }
        let _ = writeln!(s, "\\end{{tabular}}\\\\");
    }

    let _ = writeln!(s, "\\subsubsection*{{Module graph}}");
    let _ = writeln!(s, "This is the dependency graph between this module's quantities:\\\\");
    let _ = writeln!(
        s,
        "\\includegraphics[height=5cm, width=\\textwidth, keepaspectratio=true]{{{graph_base}}}"
    );
    let _ = writeln!(s);
    Ok(s)
}

/// Write `modules.tex` (and one graph per module under `modules/`) into `dir`.
/// Modules that fail to load are skipped with a warning.
pub fn write_docs(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir.join("modules"))?;
    let mut tex = String::new();
    for spec in registry() {
        match module_section(spec, dir) {
            Ok(section) => tex.push_str(&section),
            Err(err) => warn!(module = spec.name, %err, "docgen failed"),
        }
    }
    let path = dir.join("modules.tex");
    std::fs::write(&path, tex)?;
    info!(path = %path.display(), "module documentation written");
    Ok(path)
}
