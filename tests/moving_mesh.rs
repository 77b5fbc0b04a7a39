//! Deforming-mesh runs through the chain-rule divergence path.

use frsolver::input::{Equation, Input, Motion};
use frsolver::disc::geometry::Geometry;
use frsolver::solver::Solver;

fn deforming_params() -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::AdvectionDiffusion);
    params.nx = 6;
    params.ny = 6;
    params.xmin = -5.0;
    params.xmax = 5.0;
    params.ymin = -5.0;
    params.ymax = 5.0;
    params.advectVx = 1.0;
    params.advectVy = 0.0;
    params.lambda = 1.0;
    params.icType = 0;
    params.order = 3;
    params.dt = 0.005;
    params.motion = Some(Motion::Perturb);
    params.moveAx = 0.2;
    params.moveAy = 0.2;
    params.moveFx = 0.2;
    params.moveFy = 0.2;
    params.finalize();
    params
}

#[test]
fn perturbed_mesh_keeps_jacobians_positive() {
    let params = deforming_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    for _ in 0..20 {
        solver.update(false);
    }

    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!(ele.det_jac_spts[spt] > 0.0);
        }
        for fpt in 0..ele.n_fpts {
            assert!(ele.det_jac_fpts[fpt] > 0.0);
            // The normal magnitude was folded into the area element.
            let mut mag = 0.0;
            for dim in 0..2 {
                mag += ele.norm_fpts[[fpt, dim]] * ele.norm_fpts[[fpt, dim]];
            }
            if ele.da_fpts[fpt] > 0.0 {
                assert!((mag.sqrt() - 1.0).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn advection_on_deforming_mesh_stays_bounded() {
    // The Gaussian profile must stay within its initial bounds (up to a
    // small overshoot) while the mesh deforms under it.
    let params = deforming_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    for _ in 0..50 {
        solver.update(false);
    }

    let mut min_u: f64 = f64::INFINITY;
    let mut max_u: f64 = f64::NEG_INFINITY;
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            min_u = min_u.min(ele.u_spts[[spt, 0]]);
            max_u = max_u.max(ele.u_spts[[spt, 0]]);
        }
    }
    assert!(max_u < 1.1, "max overshoot: {}", max_u);
    assert!(min_u > -0.1, "min undershoot: {}", min_u);
    assert!(max_u > 0.5, "profile lost: {}", max_u);
}
