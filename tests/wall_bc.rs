//! Boundary-condition end-to-end checks on wall-bounded and far-field
//! boxes.

use frsolver::disc::geometry::Geometry;
use frsolver::input::{Equation, Input};
use frsolver::solver::Solver;

fn channel_params() -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::NavierStokes);
    params.nx = 6;
    params.ny = 4;
    params.xmin = 0.0;
    params.xmax = 3.0;
    params.ymin = 0.0;
    params.ymax = 1.0;
    params.icType = 0;
    params.uBound = 0.3;
    params.vBound = 0.0;
    params.order = 2;
    params.dt = 0.001;
    params.bcBottom = "slip_wall".into();
    params.bcTop = "slip_wall".into();
    params.finalize();
    params
}

#[test]
fn slip_wall_channel_preserves_aligned_flow() {
    // Wall-parallel uniform flow between two slip walls is steady.
    let params = channel_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    for _ in 0..10 {
        solver.update(false);
    }
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!((ele.u_spts[[spt, 0]] - 1.0).abs() < 1e-11);
            assert!((ele.u_spts[[spt, 1]] - 0.3).abs() < 1e-11);
            assert!(ele.u_spts[[spt, 2]].abs() < 1e-11);
        }
    }
}

#[test]
fn opposing_wall_forces_cancel() {
    let params = channel_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();
    solver.update(false);

    let force = solver.compute_wall_force();
    // Pressure on the top and bottom walls is equal and opposite.
    assert!(force[0].abs() < 1e-12, "x-force: {}", force[0]);
    assert!(force[1].abs() < 1e-12, "y-force: {}", force[1]);
}

#[test]
fn characteristic_farfield_holds_freestream() {
    let mut params = channel_params();
    params.bcBottom = "char".into();
    params.bcTop = "char".into();
    params.bcLeft = "char".into();
    params.bcRight = "char".into();
    params.uBound = 0.2;
    params.vBound = 0.1;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    for _ in 0..10 {
        solver.update(false);
    }
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!(
                (ele.u_spts[[spt, 0]] - 1.0).abs() < 1e-9,
                "density drifted: {}",
                ele.u_spts[[spt, 0]]
            );
        }
    }
}

#[test]
fn no_mass_crosses_slip_walls() {
    let params = channel_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();
    solver.calc_residual(0);

    let flux = solver.compute_mass_flux();
    assert!(flux[0].abs() < 1e-12, "mass flux through walls: {}", flux[0]);
}
