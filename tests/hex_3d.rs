//! 3-D hex-element smoke tests: the full pipeline on a periodic cube.

use frsolver::disc::geometry::Geometry;
use frsolver::input::{Equation, Input};
use frsolver::solver::Solver;

fn cube_params() -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::AdvectionDiffusion);
    params.nDims_raw = Some(3);
    params.nx = 4;
    params.ny = 4;
    params.nz = 4;
    params.xmin = -3.0;
    params.xmax = 3.0;
    params.ymin = -3.0;
    params.ymax = 3.0;
    params.zmin = -3.0;
    params.zmax = 3.0;
    params.advectVx = 1.0;
    params.advectVy = 0.5;
    params.advectVz = -0.25;
    params.lambda = 1.0;
    params.icType = 2;
    params.order = 2;
    params.dt = 0.01;
    params.finalize();
    params
}

#[test]
fn constant_state_is_steady_in_three_dimensions() {
    let params = cube_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    for ele in solver.eles.iter_mut() {
        ele.u_spts.fill(0.7);
    }
    for _ in 0..3 {
        solver.update(false);
    }
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!((ele.u_spts[[spt, 0]] - 0.7).abs() < 1e-11);
        }
    }
}

#[test]
fn smooth_field_is_conserved_in_three_dimensions() {
    let params = cube_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let integrate = |solver: &Solver| -> f64 {
        let mut total = 0.0;
        for ele in &solver.eles {
            let op = &solver.opers[&(ele.etype, ele.order)];
            for spt in 0..ele.n_spts {
                total += op.qwts_spts[spt] * ele.det_jac_spts[spt] * ele.u_spts[[spt, 0]];
            }
        }
        total
    };

    let mass0 = integrate(&solver);
    for _ in 0..10 {
        solver.update(false);
    }
    let mass1 = integrate(&solver);
    assert!((mass1 - mass0).abs() < 1e-10);

    // Jacobians on the uniform cube mesh are constant and positive.
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!(ele.det_jac_spts[spt] > 0.0);
        }
    }
}
