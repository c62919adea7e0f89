// tests/scripts.rs
//
// End-to-end sessions: JSON-lines request files replayed against a fresh
// engine, checking the files they leave in the output directory.
// Run with: cargo test --test scripts

use std::path::Path;

use serde_json::{json, Value};

use llg_engine::api::Api;
use llg_engine::engine::Engine;
use llg_engine::ipc::{handle_line, replay};
use llg_engine::ovf::read_ovf;

fn write_session(dir: &Path, name: &str, lines: &[Value]) -> std::path::PathBuf {
    let mut text = String::from("# recorded session\n");
    for l in lines {
        text.push_str(&l.to_string());
        text.push('\n');
    }
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn periodic_vortex_session() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pbc.out");
    let mut api = Api::new(Engine::new(&out));

    let setup = write_session(
        dir.path(),
        "setup.jsonl",
        &[
            json!(["setgridsize", [16, 16, 1]]),
            json!(["setcellsize", [5e-9, 5e-9, 3e-9]]),
            json!(["setperiodic", [1, 1, 0]]),
            json!(["load", ["micromagnetism"]]),
            json!(["load", ["solver/rk12"]]),
            json!(["setv", ["Msat", 800e3]]),
            json!(["setv", ["Aex", 1.3e-11]]),
            json!(["setv", ["alpha", 1.0]]),
            json!(["setv", ["m_maxerror", 1e-3]]),
        ],
    );
    replay(&mut api, &setup).unwrap();

    // the vortex array goes through the protocol like a script would send it
    let v = api.call("vortex", &[json!(1), json!(1)]).unwrap();
    api.call("setarray", &[json!("m"), v]).unwrap();
    let ellipse = api.call("ellipse", &[]).unwrap();
    api.call("setmask", &[json!("Msat"), ellipse]).unwrap();

    let run = write_session(
        dir.path(),
        "run.jsonl",
        &[
            json!(["autosave", ["m", "omf", ["text"], 1e-12]]),
            json!(["autotabulate", [["t", "m_avg", "maxtorque"], "datatable.txt", 1e-12]]),
            json!(["steps", [20]]),
            json!(["save", ["m", "png", ["2"], "m_z.png"]]),
        ],
    );
    replay(&mut api, &run).unwrap();

    assert_eq!(api.engine().step_count(), 20);
    let first = read_ovf(&out.join("m0000000.omf")).unwrap();
    assert_eq!(first.ncomp(), 3);
    assert_eq!(first.size(), [16, 16, 1]);
    assert!(out.join("m_z.png").exists());

    let table = std::fs::read_to_string(out.join("datatable.txt")).unwrap();
    let mut lines = table.lines();
    assert!(lines.next().unwrap().starts_with('#'));
    assert!(lines.count() >= 1);

    // vortex core stays in the middle and points up
    let mz = api.call("getcell", &[json!("m"), json!(8), json!(8), json!(0)]).unwrap();
    assert!(mz[2].as_f64().unwrap() > 0.5, "{mz}");
}

#[test]
fn current_paths_session() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("current.out");
    let mut api = Api::new(Engine::new(&out));

    // a positive and a negative charge at opposite corners
    let mut q = vec![vec![vec![vec![0.0; 1]; 8]; 8]; 1];
    q[0][1][1][0] = 1.0;
    q[0][6][6][0] = -1.0;

    let session = write_session(
        dir.path(),
        "current.jsonl",
        &[
            json!(["setgridsize", [8, 8, 1]]),
            json!(["setcellsize", [1e-9, 1e-9, 1e-9]]),
            json!(["load", ["current"]]),
            json!(["setmask", ["Q", q]]),
            json!(["setv", ["Q", 1e20]]),
            json!(["setv", ["rho", 1e-6]]),
            json!(["save", ["kern_el", "gplot", [], "kern_el.gplot"]]),
            json!(["save", ["E", "gplot", [], "E.gplot"]]),
            json!(["save", ["j", "omf", ["binary 4"], "j.omf"]]),
            json!(["printstats", []]),
            json!(["savegraph", ["graph.dot"]]),
        ],
    );
    replay(&mut api, &session).unwrap();

    for f in ["kern_el.gplot", "E.gplot", "j.omf", "graph.dot"] {
        assert!(out.join(f).exists(), "{f} missing");
    }
    let graph = std::fs::read_to_string(out.join("graph.dot")).unwrap();
    assert!(graph.contains("digraph"));
    assert!(graph.contains("kern_el"));

    // field points away from the positive charge, along +x+y between the two
    let e = api.call("getcell", &[json!("E"), json!(3), json!(3), json!(0)]).unwrap();
    assert!(e[0].as_f64().unwrap() > 0.0 && e[1].as_f64().unwrap() > 0.0, "{e}");
    let j = read_ovf(&out.join("j.omf")).unwrap();
    assert_eq!(j.size(), [8, 8, 1]);
}

#[test]
fn failing_request_reports_error_and_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = Api::new(Engine::new(dir.path()));
    let r = handle_line(&mut api, r#"["load", ["micromagnetism"]]"#);
    assert!(r["error"].as_str().unwrap().contains("grid"), "{r}");
    let r = handle_line(&mut api, r#"["setgridsize", [2, 2, 1]]"#);
    assert_eq!(r, json!({ "ok": null }));
    let r = handle_line(&mut api, r#"["run", [1e-12]]"#);
    assert!(r.get("error").is_some());
}
