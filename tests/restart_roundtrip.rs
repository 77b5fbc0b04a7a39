//! Restart-file round trip: write a snapshot, read it back into a fresh
//! solver, and recover the solution to near machine precision.

use frsolver::disc::geometry::Geometry;
use frsolver::input::{Equation, Input};
use frsolver::io::restart;
use frsolver::solver::Solver;

fn params_for(dir_tag: &str) -> Input {
    let mut params = Input::default();
    params.equation = Some(Equation::NavierStokes);
    params.nx = 4;
    params.ny = 4;
    params.xmin = -5.0;
    params.xmax = 5.0;
    params.ymin = -5.0;
    params.ymax = 5.0;
    params.icType = 1;
    params.order = 3;
    params.entropySensor = 1;
    params.dataFileName = format!("restart_test_{}", dir_tag);
    params.finalize();
    params
}

#[test]
fn write_then_read_recovers_solution() {
    let dir = std::env::temp_dir().join("frsolver_restart_test");
    let dir = dir.to_str().unwrap().to_string();

    let params = params_for("rt");
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    solver.initialize_solution();
    for _ in 0..3 {
        solver.update(false);
    }
    let time_written = solver.time;
    let iter_written = solver.iter;
    restart::write_restart(&mut solver, &dir).expect("restart write failed");

    // A fresh solver restarted from the file.
    let mut params2 = params_for("rt");
    params2.restart = 1;
    params2.restartIter = iter_written;
    params2.finalize();
    let geo2 = Geometry::create_mesh(&params2);
    let mut solver2 = Solver::setup(&params2, geo2);
    restart::read_restart_file(&mut solver2, &dir).expect("restart read failed");

    assert!((solver2.time - time_written).abs() < 1e-12);
    for (e1, e2) in solver.eles.iter().zip(&solver2.eles) {
        for spt in 0..e1.n_spts {
            for k in 0..4 {
                assert!(
                    (e1.u_spts[[spt, k]] - e2.u_spts[[spt, k]]).abs() < 1e-12,
                    "mismatch at element {} spt {} field {}",
                    e1.id,
                    spt,
                    k
                );
            }
        }
    }
}

#[test]
fn restart_interpolates_between_orders() {
    let dir = std::env::temp_dir().join("frsolver_restart_order_test");
    let dir = dir.to_str().unwrap().to_string();

    // Write at order 2 with a solution that is polynomial of degree 2,
    // so the inter-order interpolation to order 4 is exact.
    let mut params = params_for("order");
    params.order = 2;
    params.finalize();
    let geo = Geometry::create_mesh(&params);
    let mut solver = Solver::setup(&params, geo);
    for ele in solver.eles.iter_mut() {
        for spt in 0..ele.n_spts {
            let pt = ele.pos_spts[spt];
            ele.u_spts[[spt, 0]] = 1.0 + 0.01 * pt.x * pt.x;
            ele.u_spts[[spt, 1]] = 0.02 * pt.x;
            ele.u_spts[[spt, 2]] = 0.01 * pt.y;
            ele.u_spts[[spt, 3]] = 2.0 + 0.01 * pt.x * pt.y;
        }
    }
    solver.iter = 7;
    restart::write_restart(&mut solver, &dir).expect("restart write failed");

    let mut params2 = params_for("order");
    params2.order = 4;
    params2.restart = 1;
    params2.restartIter = 7;
    params2.finalize();
    let geo2 = Geometry::create_mesh(&params2);
    let mut solver2 = Solver::setup(&params2, geo2);
    restart::read_restart_file(&mut solver2, &dir).expect("restart read failed");

    // The restart stores primitives; converting back and interpolating
    // a quadratic stays exact up to the primitive/conservative round trip.
    for ele in &solver2.eles {
        for spt in 0..ele.n_spts {
            let pt = ele.pos_spts[spt];
            let expect = 1.0 + 0.01 * pt.x * pt.x;
            assert!(
                (ele.u_spts[[spt, 0]] - expect).abs() < 1e-9,
                "density mismatch at {:?}: {} vs {}",
                (pt.x, pt.y),
                ele.u_spts[[spt, 0]],
                expect
            );
        }
    }
}
