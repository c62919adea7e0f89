// src/config.rs
//
// Run provenance written as config.json into each output directory.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub script: ScriptConfig,
    pub engine: EngineInfo,
    pub run: RunInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Script file as given on the command line.
    pub path: PathBuf,
    /// Interpreter used to run it (e.g. "python").
    pub command: String,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub binary: String,
    pub version: String,
    /// Registered module names at startup.
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub started_unix_s: Option<u64>,
}

impl RunConfig {
    pub fn new(script: &Path, command: &str, output_dir: &Path) -> Self {
        let run_id = script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        Self {
            script: ScriptConfig {
                path: script.to_path_buf(),
                command: command.to_string(),
                output_dir: output_dir.to_path_buf(),
            },
            engine: EngineInfo {
                binary: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                modules: crate::modules::registry().iter().map(|m| m.name.to_string()).collect(),
            },
            run: RunInfo {
                run_id,
                started_unix_s: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs()),
            },
        }
    }

    pub fn write_to_dir(&self, out_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(out_dir)?;
        let file = File::create(out_dir.join("config.json"))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
