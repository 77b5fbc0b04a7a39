//! Euler-equation end-to-end tests: freestream preservation and the
//! isentropic vortex on a periodic box.

use frsolver::disc::geometry::Geometry;
use frsolver::input::{Equation, Input, RiemannType};
use frsolver::solver::Solver;

fn vortex_params(nx: usize, order: usize) -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::NavierStokes);
    params.nx = nx;
    params.ny = nx;
    params.xmin = -5.0;
    params.xmax = 5.0;
    params.ymin = -5.0;
    params.ymax = 5.0;
    params.icType = 1;
    params.testCase = 1;
    params.order = order;
    params.timeType = 4;
    params.dt = 0.002;
    params.finalize();
    params
}

fn density_l2_error(solver: &Solver, params: &Input, t: f64) -> f64 {
    let mut err = 0.0;
    let mut vol = 0.0;
    for ele in &solver.eles {
        let op = &solver.opers[&(ele.etype, ele.order)];
        let exact = ele.exact_solution(params, t);
        for spt in 0..ele.n_spts {
            let w = op.qwts_spts[spt] * ele.det_jac_spts[spt];
            let d = ele.u_spts[[spt, 0]] - exact[[spt, 0]];
            err += w * d * d;
            vol += w;
        }
    }
    (err / vol).sqrt()
}

#[test]
fn freestream_is_preserved() {
    // Uniform flow is an exact solution on any static mesh; the
    // residual pipeline must not disturb it.
    let mut params = vortex_params(5, 3);
    params.icType = 0;
    params.uBound = 0.3;
    params.vBound = 0.2;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let reference: Vec<f64> = (0..params.nFields)
        .map(|k| solver.eles[0].u_spts[[0, k]])
        .collect();

    for _ in 0..5 {
        solver.update(false);
    }

    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            for k in 0..params.nFields {
                assert!(
                    (ele.u_spts[[spt, k]] - reference[k]).abs() < 1e-12,
                    "freestream disturbed in element {} field {}",
                    ele.id,
                    k
                );
            }
        }
    }
}

#[test]
fn freestream_is_preserved_with_roe() {
    let mut params = vortex_params(4, 2);
    params.icType = 0;
    params.riemannType = Some(RiemannType::Roe);
    params.uBound = 0.3;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();
    for _ in 0..3 {
        solver.update(false);
    }
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!((ele.u_spts[[spt, 0]] - 1.0).abs() < 1e-12);
        }
    }
}

#[test]
fn vortex_short_run_stays_accurate() {
    let params = vortex_params(10, 2);
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    for _ in 0..100 {
        solver.update(false);
    }
    let err = density_l2_error(&solver, &params, solver.time);
    assert!(err < 5e-3, "density L2 error after t=0.2: {}", err);

    // Density must stay strictly positive throughout.
    for ele in &solver.eles {
        for spt in 0..ele.n_spts {
            assert!(ele.u_spts[[spt, 0]] > 0.0);
        }
    }
}

#[test]
fn vortex_conserves_mass_and_energy() {
    let params = vortex_params(8, 3);
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    let integrate = |solver: &Solver, k: usize| -> f64 {
        let mut total = 0.0;
        for ele in &solver.eles {
            let op = &solver.opers[&(ele.etype, ele.order)];
            for spt in 0..ele.n_spts {
                total += op.qwts_spts[spt] * ele.det_jac_spts[spt] * ele.u_spts[[spt, k]];
            }
        }
        total
    };

    let mass0 = integrate(&solver, 0);
    let energy0 = integrate(&solver, 3);
    for _ in 0..50 {
        solver.update(false);
    }
    let mass1 = integrate(&solver, 0);
    let energy1 = integrate(&solver, 3);

    assert!((mass1 - mass0).abs() / mass0.abs() < 1e-11);
    assert!((energy1 - energy0).abs() / energy0.abs() < 1e-11);
}

#[test]
#[ignore = "one full vortex period; run with --ignored"]
fn vortex_translates_one_period() {
    // 20x20 box at p = 3, CFL-limited stepping, one full traversal:
    // the density L2 error stays below 1e-4.
    let mut params = vortex_params(20, 3);
    params.dtType = Some(frsolver::input::DtType::GlobalCfl);
    params.CFL = 0.05;
    params.finalize();

    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();

    while solver.time < 10.0 {
        solver.update(false);
    }
    let err = density_l2_error(&solver, &params, solver.time);
    assert!(err <= 1e-4, "density L2 error after one period: {}", err);
}
