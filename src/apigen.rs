// src/apigen.rs
//
// Generates the Python client modules from the API command table:
//   mumax2.py          protocol plumbing, makearray, core commands
//   mumax2_geom.py     geometry masks
//   mumax2_magstate.py initial magnetization states

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::api::{Command, PyModule, COMMANDS};
use crate::error::Result;
use crate::ipc::{IN_FIFO, OUT_FIFO};

fn header() -> String {
    format!(
        r#"# Generated by {name} {version}. Do not edit.

import os
import json

_infifo = None
_outfifo = None


def _init():
    """Open the pipes to the engine. The order matters: the engine opens
    {out_fifo} for writing first, then {in_fifo} for reading."""
    global _infifo, _outfifo
    outputdir = os.environ["MUMAX2_OUTPUTDIR"]
    _infifo = open(os.path.join(outputdir, "{out_fifo}"), "r")
    _outfifo = open(os.path.join(outputdir, "{in_fifo}"), "w")


def call(command, args):
    """Send one command to the engine and return its result."""
    if _outfifo is None:
        _init()
    _outfifo.write(json.dumps([command, args]))
    _outfifo.write("\n")
    _outfifo.flush()
    line = _infifo.readline()
    if not line:
        raise RuntimeError("engine closed the connection")
    resp = json.loads(line)
    if "error" in resp:
        raise RuntimeError(command + ": " + resp["error"])
    return resp["ok"]


def makearray(ncomp, nx, ny, nz):
    """Zero array indexed [comp][x][y][z]."""
    return [[[[0.0 for k in range(nz)] for j in range(ny)] for i in range(nx)] for c in range(ncomp)]
"#,
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        in_fifo = IN_FIFO,
        out_fifo = OUT_FIFO,
    )
}

fn wrapper(c: &Command) -> String {
    let args = c.args.join(", ");
    let mut s = String::new();
    let _ = writeln!(s, "\n\ndef {}({}):", c.name, args);
    let _ = writeln!(s, "    \"\"\"{}\"\"\"", c.doc);
    let _ = writeln!(s, "    return call(\"{}\", [{}])", c.name, args);
    s
}

/// Source of one generated module.
pub fn python_source(module: PyModule) -> String {
    let mut s = match module {
        PyModule::Core => header(),
        _ => format!(
            "# Generated by {} {}. Do not edit.\n\nfrom mumax2 import call\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    };
    for c in COMMANDS.iter().filter(|c| c.module == module) {
        s.push_str(&wrapper(c));
    }
    s
}

pub fn file_name(module: PyModule) -> &'static str {
    match module {
        PyModule::Core => "mumax2.py",
        PyModule::Geom => "mumax2_geom.py",
        PyModule::Magstate => "mumax2_magstate.py",
    }
}

/// Write all client modules into `dir`.
pub fn write_python(dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for m in [PyModule::Core, PyModule::Geom, PyModule::Magstate] {
        let path = dir.join(file_name(m));
        std::fs::write(&path, python_source(m))?;
        written.push(path);
    }
    info!(dir = %dir.display(), "python client written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_gets_a_wrapper() {
        let all: String = [PyModule::Core, PyModule::Geom, PyModule::Magstate]
            .into_iter()
            .map(python_source)
            .collect();
        for c in COMMANDS {
            assert!(all.contains(&format!("def {}(", c.name)), "{}", c.name);
        }
        assert!(all.contains("def makearray(ncomp, nx, ny, nz):"));
    }

    #[test]
    fn wrappers_forward_arguments() {
        let core = python_source(PyModule::Core);
        assert!(core.contains("def setgridsize(nx, ny, nz):\n"));
        assert!(core.contains("    return call(\"setgridsize\", [nx, ny, nz])\n"));
        let mag = python_source(PyModule::Magstate);
        assert!(mag.contains("from mumax2 import call"));
        assert!(mag.contains("def vortex(circulation, polarization):"));
        assert!(!mag.contains("def setgridsize"));
    }

    #[test]
    fn files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_python(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(dir.path().join("mumax2_geom.py").exists());
    }
}
