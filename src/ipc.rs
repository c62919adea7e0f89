// src/ipc.rs
//
// JSON-lines protocol between a script client and the engine.
//
//   request:  ["command", [arg, ...]]
//   response: {"ok": value} | {"error": "message"}
//
// Transports: any BufRead/Write pair (stdin/stdout for `serve`), a file of
// requests (`replay`), or a pair of named pipes shared with a spawned script
// interpreter (`run_script`).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::Api;
use crate::apigen;
use crate::config::RunConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Engine-side names of the pipes (the client's out is our in).
pub const IN_FIFO: &str = "in.fifo";
pub const OUT_FIFO: &str = "out.fifo";

/// Parse one request line into (command, args).
pub fn parse_request(line: &str) -> Result<(String, Vec<Value>)> {
    let v: Value = serde_json::from_str(line)?;
    let bad = || EngineError::invalid_argument(format!("malformed request: {line}"));
    let items = v.as_array().ok_or_else(bad)?;
    let cmd = items.first().and_then(Value::as_str).ok_or_else(bad)?;
    let args = match items.get(1) {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(a)) => a.clone(),
        Some(_) => return Err(bad()),
    };
    if items.len() > 2 {
        return Err(bad());
    }
    Ok((cmd.to_string(), args))
}

/// Execute one request line and build its response.
pub fn handle_line(api: &mut Api, line: &str) -> Value {
    let res = parse_request(line).and_then(|(cmd, args)| api.call(&cmd, &args));
    match res {
        Ok(v) => json!({ "ok": v }),
        Err(err) => {
            warn!(%err, request = line, "command failed");
            json!({ "error": err.to_string() })
        }
    }
}

/// Serve requests until EOF, one response line per request line.
pub fn serve<R: BufRead, W: Write>(api: &mut Api, reader: R, mut writer: W) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let resp = handle_line(api, line);
        serde_json::to_writer(&mut writer, &resp)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    debug!("client closed the connection");
    Ok(())
}

/// Execute a file of requests, stopping at the first failure.
pub fn replay(api: &mut Api, path: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let resp = handle_line(api, line);
        if let Some(err) = resp.get("error").and_then(Value::as_str) {
            return Err(EngineError::invalid_argument(format!(
                "{}:{}: {}",
                path.display(),
                n + 1,
                err
            )));
        }
        info!(line = n + 1, response = %resp, "replayed");
    }
    Ok(())
}

/// Interpreter for a script file, from its extension.
pub fn command_for_file(script: &Path, override_cmd: Option<&str>) -> Result<String> {
    if let Some(c) = override_cmd {
        return Ok(c.to_string());
    }
    match script.extension().and_then(|e| e.to_str()) {
        Some("py") => Ok("python".to_string()),
        other => Err(EngineError::invalid_argument(format!(
            "cannot handle script files with extension {:?} (use --script-cmd)",
            other.unwrap_or("")
        ))),
    }
}

/// Default output directory: `<script>.out` next to the script.
pub fn default_output_dir(script: &Path) -> PathBuf {
    let mut p = script.as_os_str().to_owned();
    p.push(".out");
    PathBuf::from(p)
}

fn mkfifo(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let status = Command::new("mkfifo").arg(path).status()?;
    if !status.success() {
        return Err(EngineError::Subprocess(format!(
            "mkfifo {} returned {status}",
            path.display()
        )));
    }
    Ok(())
}

/// Forward a child stream to the log, line by line.
fn log_stream(prefix: String, stream: impl Read + Send + 'static) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
            info!(target: "llg_engine::script", "[{prefix}] {line}");
        }
    })
}

/// Run a script against a fresh engine whose output goes to `output_dir`.
///
/// The interpreter is started first; it must open `out.fifo` for reading and
/// then `in.fifo` for writing (the generated client does), which is the order
/// in which the engine opens the other ends.
pub fn run_script(script: &Path, output_dir: &Path, script_cmd: Option<&str>) -> Result<()> {
    let command = command_for_file(script, script_cmd)?;
    std::fs::create_dir_all(output_dir)?;
    RunConfig::new(script, &command, output_dir).write_to_dir(output_dir)?;
    apigen::write_python(output_dir)?;

    let in_path = output_dir.join(IN_FIFO);
    let out_path = output_dir.join(OUT_FIFO);
    mkfifo(&in_path)?;
    mkfifo(&out_path)?;

    let pythonpath = match std::env::var_os("PYTHONPATH") {
        Some(old) if !old.is_empty() => {
            let mut p = output_dir.as_os_str().to_owned();
            p.push(":");
            p.push(old);
            p
        }
        _ => output_dir.as_os_str().to_owned(),
    };

    let mut child = Command::new(&command)
        .arg(script)
        .env("MUMAX2_OUTPUTDIR", output_dir)
        .env("PYTHONPATH", pythonpath)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::Subprocess(format!("cannot start {command}: {e}")))?;
    info!(command = %command, script = %script.display(), pid = child.id(), "script started");

    let mut loggers = Vec::new();
    if let Some(out) = child.stdout.take() {
        loggers.push(log_stream(format!("{command}:out"), out));
    }
    if let Some(err) = child.stderr.take() {
        loggers.push(log_stream(format!("{command}:err"), err));
    }

    // If the child exits without ever connecting, open the far ends ourselves
    // so the blocking opens below return and the server sees EOF.
    let connected = Arc::new(AtomicBool::new(false));
    let watcher = {
        let connected = Arc::clone(&connected);
        let (in_path, out_path) = (in_path.clone(), out_path.clone());
        thread::spawn(move || -> std::io::Result<ExitStatus> {
            let status = child.wait()?;
            if !connected.load(Ordering::SeqCst) {
                let _r = File::open(&out_path)?;
                let _w = OpenOptions::new().write(true).open(&in_path)?;
            }
            Ok(status)
        })
    };

    let served = (|| -> Result<()> {
        let writer = OpenOptions::new().write(true).open(&out_path)?;
        let reader = BufReader::new(File::open(&in_path)?);
        connected.store(true, Ordering::SeqCst);
        let mut api = Api::new(Engine::new(output_dir));
        serve(&mut api, reader, writer)
    })();

    let status = watcher
        .join()
        .map_err(|_| EngineError::Subprocess("script watcher panicked".into()))??;
    for l in loggers {
        let _ = l.join();
    }
    let _ = std::fs::remove_file(&in_path);
    let _ = std::fs::remove_file(&out_path);

    served?;
    if !status.success() {
        return Err(EngineError::Subprocess(format!("{command} exited with {status}")));
    }
    info!(script = %script.display(), "script finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(dir: &Path) -> Api {
        Api::new(Engine::new(dir))
    }

    #[test]
    fn requests_parse() {
        let (c, a) = parse_request(r#"["setgridsize", [4, 4, 1]]"#).unwrap();
        assert_eq!(c, "setgridsize");
        assert_eq!(a.len(), 3);
        let (c, a) = parse_request(r#"["step"]"#).unwrap();
        assert_eq!(c, "step");
        assert!(a.is_empty());
        assert!(parse_request(r#"{"cmd": "x"}"#).is_err());
        assert!(parse_request(r#"["x", 1]"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn serve_answers_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = api(dir.path());
        let input = "[\"setgridsize\", [2, 2, 1]]\n\n[\"getgridsize\", []]\n[\"nosuch\", []]\n";
        let mut out = Vec::new();
        serve(&mut a, input.as_bytes(), &mut out).unwrap();
        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({ "ok": null }));
        assert_eq!(lines[1], json!({ "ok": [2, 2, 1] }));
        assert!(lines[2]["error"].as_str().unwrap().contains("unknown command"));
    }

    #[test]
    fn replay_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.jsonl");
        std::fs::write(
            &script,
            "# comment\n[\"setgridsize\", [2, 2, 1]]\n[\"setgridsize\", [2, 2, 1]]\n[\"echo\", [\"unreached\"]]\n",
        )
        .unwrap();
        let mut a = api(dir.path());
        let err = replay(&mut a, &script).unwrap_err().to_string();
        assert!(err.contains(":3:"), "{err}");
    }

    #[test]
    fn interpreter_from_extension() {
        assert_eq!(command_for_file(Path::new("a.py"), None).unwrap(), "python");
        assert_eq!(command_for_file(Path::new("a.py"), Some("python3")).unwrap(), "python3");
        assert!(command_for_file(Path::new("a.lua"), None).is_err());
        assert_eq!(default_output_dir(Path::new("t/pbc.py")), PathBuf::from("t/pbc.py.out"));
    }
}
