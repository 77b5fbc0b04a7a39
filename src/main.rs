use std::env;
use std::process;

use log::{error, info};

use frsolver::disc::geometry::Geometry;
use frsolver::error::SolverError;
use frsolver::input::{Input, MeshType};
use frsolver::io::{restart, write_to_vtu};
use frsolver::solver::Solver;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("logger init failed");

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} <input.json>", args[0]);
        process::exit(1);
    }

    if let Err(e) = run(&args[1]) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(input_path: &str) -> Result<(), SolverError> {
    let params = Input::from_file(input_path)?;
    info!(
        "frsolver: {}D order-{} run, {} iterations",
        params.nDims, params.order, params.iterMax
    );

    let geo = match params.mesh_type() {
        MeshType::Create => Geometry::create_mesh(&params),
        MeshType::Read => panic!("mesh-file reading is handled by the preprocessing layer"),
        MeshType::Overset => panic!("overset runs need the overset connectivity service attached"),
    };

    let mut solver = Solver::setup(&params, geo);

    if params.restart != 0 {
        restart::read_restart_file(&mut solver, ".")?;
    } else {
        solver.initialize_solution();
    }

    for _ in 0..params.iterMax {
        solver.update(false);

        if params.monitorResFreq > 0 && solver.iter % params.monitorResFreq == 0 {
            info!("{}", solver.monitor_line());
        }

        if params.plotFreq > 0 && solver.iter % params.plotFreq == 0 {
            restart::write_restart(&mut solver, ".")?;
            write_to_vtu::write_averages(&mut solver, &params.dataFileName);
        }
    }

    // Final snapshot plus the exact-solution error for test cases.
    restart::write_restart(&mut solver, ".")?;
    if params.testCase != 0 {
        let err = solver.integrate_error();
        info!("final error norms: {:?}", err);
    }
    info!(
        "done: {} iterations, t = {:.6e}",
        solver.iter, solver.time
    );

    Ok(())
}
