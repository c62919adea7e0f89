// tests/validation.rs
//
// Physics sanity checks through the public engine API.
// Run with: cargo test --test validation

use llg_engine::engine::Engine;
use llg_engine::params::GAMMA0;

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn macrospin(dir: &std::path::Path, solver: &str) -> Engine {
    let mut e = Engine::new(dir);
    e.set_grid_size([1, 1, 1]).unwrap();
    e.set_cell_size([5e-9, 5e-9, 5e-9]).unwrap();
    e.load("zeeman").unwrap();
    e.load("llg").unwrap();
    e.load(solver).unwrap();
    e.set_scalar("Msat", 8e5).unwrap();
    e
}

#[test]
fn macrospin_precession_quarter_turn_about_hz() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = macrospin(dir.path(), "solver/rk12");
    e.set_scalar("maxdt", 1e-13).unwrap();

    // m starts along +x and precesses about +z without damping
    let h0 = 1e5;
    e.set_value("H_ext", &[0.0, 0.0, h0]).unwrap();
    let t_quarter = std::f64::consts::FRAC_PI_2 / (GAMMA0 * h0);
    e.run(t_quarter).unwrap();

    let m = e.get_value("m").unwrap();
    assert!(approx_eq(m[0], 0.0, 0.02), "mx = {}", m[0]);
    assert!(approx_eq(m[1], 1.0, 0.02), "my = {}", m[1]);
    assert!(approx_eq(m[2], 0.0, 1e-9), "mz = {}", m[2]);
    assert!(approx_eq(norm(&m), 1.0, 1e-9));
    assert!(e.time() >= t_quarter);
}

#[test]
fn euler_and_rk12_agree_on_short_precession() {
    let h0 = 2e5;
    let duration = 1e-11;
    let mut results = Vec::new();
    for solver in ["solver/euler", "solver/rk12"] {
        let dir = tempfile::tempdir().unwrap();
        let mut e = macrospin(dir.path(), solver);
        e.set_value("H_ext", &[0.0, 0.0, h0]).unwrap();
        if solver == "solver/euler" {
            e.set_scalar("dt", 1e-15).unwrap();
        } else {
            e.set_scalar("maxdt", 1e-14).unwrap();
        }
        e.run(duration).unwrap();
        results.push(e.get_value("m").unwrap());
    }
    let angle = GAMMA0 * h0 * duration;
    for m in &results {
        assert!(approx_eq(m[0], angle.cos(), 0.02), "{m:?}");
        assert!(approx_eq(m[1], angle.sin(), 0.02), "{m:?}");
    }
}

#[test]
fn damping_relaxes_towards_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = macrospin(dir.path(), "solver/rk12");
    e.set_scalar("alpha", 0.5).unwrap();
    e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();

    let mut last_mz = e.get_value("m").unwrap()[2];
    for _ in 0..5 {
        e.run(2e-10).unwrap();
        let mz = e.get_value("m").unwrap()[2];
        assert!(mz >= last_mz - 1e-9, "mz went back from {last_mz} to {mz}");
        last_mz = mz;
    }
    assert!(last_mz > 0.99, "mz = {last_mz}");
}

#[test]
fn am01_relaxes_towards_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = macrospin(dir.path(), "solver/am01");
    e.set_scalar("alpha", 1.0).unwrap();
    e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
    e.run(1e-9).unwrap();
    let m = e.get_value("m").unwrap();
    assert!(m[2] > 0.99, "{m:?}");
    assert!(e.get_scalar("bdf_iterations").unwrap() > 0.0);
}

#[test]
fn demag_of_a_cube_is_minus_one_third() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = Engine::new(dir.path());
    e.set_grid_size([1, 1, 1]).unwrap();
    e.set_cell_size([4e-9, 4e-9, 4e-9]).unwrap();
    e.load("demag").unwrap();
    let ms = 8e5;
    e.set_scalar("Msat", ms).unwrap();

    // m defaults to +x
    let h = e.get_value("H_d").unwrap();
    assert!(approx_eq(h[0], -ms / 3.0, 1e-3 * ms), "{h:?}");
    assert!(approx_eq(h[1], 0.0, 1e-6 * ms));
    assert!(approx_eq(h[2], 0.0, 1e-6 * ms));
}

#[test]
fn thin_film_demag_opposes_out_of_plane_magnetization() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = Engine::new(dir.path());
    e.set_grid_size([16, 16, 1]).unwrap();
    e.set_cell_size([5e-9, 5e-9, 1e-9]).unwrap();
    e.load("demag").unwrap();
    let ms = 8e5;
    e.set_scalar("Msat", ms).unwrap();
    let mut m = e.get_array("m").unwrap();
    m.set_uniform(&[0.0, 0.0, 1.0]);
    e.set_array("m", &m).unwrap();

    let h = e.get_value("H_d").unwrap();
    // close to -Ms for a film much wider than thick, edges pull it up a little
    assert!(h[2] < -0.8 * ms && h[2] > -ms, "{h:?}");
    assert!(approx_eq(h[0], 0.0, 1e-6 * ms));
}

#[test]
fn uniform_magnetization_has_no_exchange_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut e = Engine::new(dir.path());
    e.set_grid_size([4, 4, 2]).unwrap();
    e.set_cell_size([3e-9, 3e-9, 3e-9]).unwrap();
    e.load("exchange").unwrap();
    e.set_scalar("Msat", 8e5).unwrap();
    e.set_scalar("Aex", 1.3e-11).unwrap();
    let h = e.get_array("H_ex").unwrap();
    assert!(h.max_abs() < 1e-6, "max |H_ex| = {}", h.max_abs());
}
