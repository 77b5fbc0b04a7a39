//! End-to-end advection tests on periodic Cartesian boxes.

use frsolver::disc::geometry::Geometry;
use frsolver::input::{Equation, Input};
use frsolver::solver::Solver;

fn advection_params() -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::AdvectionDiffusion);
    params.nx = 10;
    params.ny = 10;
    params.xmin = -5.0;
    params.xmax = 5.0;
    params.ymin = -5.0;
    params.ymax = 5.0;
    params.advectVx = 1.0;
    params.advectVy = 1.0;
    params.lambda = 1.0;
    params.icType = 0;
    params.testCase = 1;
    params.order = 3;
    params.timeType = 4;
    params.dt = 0.01;
    params.finalize();
    params
}

fn total_mass(solver: &Solver) -> f64 {
    let mut mass = 0.0;
    for ele in &solver.eles {
        let op = &solver.opers[&(ele.etype, ele.order)];
        for spt in 0..ele.n_spts {
            mass += op.qwts_spts[spt] * ele.det_jac_spts[spt] * ele.u_spts[[spt, 0]];
        }
    }
    mass
}

#[test]
fn gaussian_advects_with_small_error() {
    let params = advection_params();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let mass0 = total_mass(&solver);
    for _ in 0..100 {
        solver.update(false);
    }
    assert!((solver.time - 1.0).abs() < 1e-12);

    // Discrete conservation on the periodic box.
    let mass1 = total_mass(&solver);
    assert!(
        (mass1 - mass0).abs() < 1e-10,
        "mass drifted: {} -> {}",
        mass0,
        mass1
    );

    // Pointwise error against the translated Gaussian.
    let mut max_err: f64 = 0.0;
    for ele in &solver.eles {
        let exact = ele.exact_solution(&params, solver.time);
        for spt in 0..ele.n_spts {
            max_err = max_err.max((ele.u_spts[[spt, 0]] - exact[[spt, 0]]).abs());
        }
    }
    assert!(max_err < 1e-3, "Linf error too large: {}", max_err);
}

#[test]
fn diffusion_decays_sine_wave() {
    // Pure diffusion of the sine test profile: amplitude decays as
    // exp(-D k^2 t), exercising the full LDG viscous path.
    let mut params = advection_params();
    params.advectVx = 0.0;
    params.advectVy = 0.0;
    params.icType = 1;
    params.viscous = 1;
    params.diffD = 0.1;
    params.dt = 0.005;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let steps = 200;
    for _ in 0..steps {
        solver.update(false);
    }
    let t = solver.time;

    let k = 2.0 * std::f64::consts::PI / 10.0;
    let decay = (-params.diffD * k * k * t).exp();

    let mut max_amp: f64 = 0.0;
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            max_amp = max_amp.max((ele.u_spts[[spt, 0]] - 1.0).abs());
        }
    }
    assert!(
        (max_amp - decay).abs() < 0.02 * decay,
        "amplitude {} vs expected {}",
        max_amp,
        decay
    );
}

#[test]
#[ignore = "full periodic traversal; run with --ignored"]
fn gaussian_returns_after_one_period() {
    // One full periodic traversal: Linf density error stays below 1e-5
    // on the 20x20 box at p = 3.
    let mut params = advection_params();
    params.nx = 20;
    params.ny = 20;
    params.dt = 0.005;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let steps = (10.0 / params.dt).round() as usize;
    for _ in 0..steps {
        solver.update(false);
    }
    assert!((solver.time - 10.0).abs() < 1e-9);

    let mut max_err: f64 = 0.0;
    for ele in &solver.eles {
        let exact = ele.exact_solution(&params, 0.0);
        for spt in 0..ele.n_spts {
            max_err = max_err.max((ele.u_spts[[spt, 0]] - exact[[spt, 0]]).abs());
        }
    }
    assert!(max_err < 1e-5, "Linf error after one period: {}", max_err);
}
