// src/solver/euler.rs

use crate::engine::{Engine, Solver};
use crate::error::Result;
use crate::solver::{commit_output, input_snapshot, output_snapshot};

/// Fixed-step forward Euler: y += dt·dy.
pub struct EulerSolver;

impl Solver for EulerSolver {
    fn step(&mut self, e: &mut Engine) -> Result<()> {
        let equations = e.equations().to_vec();

        // All inputs first, then all outputs, without intermediate updates.
        let mut dys = Vec::with_capacity(equations.len());
        for eq in &equations {
            dys.push(input_snapshot(e, eq)?);
        }
        let dt = e.dt();
        for (eq, dy) in equations.iter().zip(dys) {
            let y0 = output_snapshot(e, eq)?;
            let mut y = y0.clone();
            y.madd(&y0, &dy, dt);
            commit_output(e, eq, y)?;
        }
        e.advance_time(dt);
        Ok(())
    }

    fn dependencies(&self) -> (Vec<String>, Vec<String>) {
        (
            vec!["t".into(), "step".into()],
            vec!["dt".into()],
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;

    #[test]
    fn euler_advances_time_and_step() {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("zeeman").unwrap();
        e.load("llg").unwrap();
        e.load("solver/euler").unwrap();
        e.set_scalar("Msat", 8e5).unwrap();
        e.set_value("H_ext", &[0.0, 0.0, 1e5]).unwrap();
        e.set_scalar("dt", 1e-14).unwrap();

        e.steps(10).unwrap();
        assert_eq!(e.step_count(), 10);
        assert!((e.time() - 1e-13).abs() < 1e-25);

        // precession about z keeps mz = 0 and |m| = 1
        let m = e.get_array("m").unwrap().vec3(0);
        assert!(m[2].abs() < 1e-12);
        assert!(((m[0] * m[0] + m[1] * m[1]).sqrt() - 1.0).abs() < 1e-12);
        assert!(m[1] > 0.0);
    }

    #[test]
    fn second_solver_is_rejected() {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        e.load("llg").unwrap();
        e.load("solver/euler").unwrap();
        assert!(matches!(
            e.load("solver/rk12"),
            Err(crate::error::EngineError::SolverAlreadySet)
        ));
    }

    #[test]
    fn solver_needs_an_equation() {
        let mut e = Engine::new(std::env::temp_dir());
        e.set_grid_size([1, 1, 1]).unwrap();
        e.set_cell_size([1e-9; 3]).unwrap();
        assert!(e.load("solver/euler").is_err());
    }
}
