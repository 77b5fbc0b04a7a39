//! Restart snapshots: a VTK UnstructuredGrid XML stream with one Piece
//! per element, the simulation time in a leading XML comment, and (for
//! overset runs) the per-cell iblank tags in a second comment. The
//! values of each DataArray live on a single line in the tensor-product
//! plot ordering (corner nodes, flux points, solution points per row),
//! so the reader can slice out the interior solution-point block.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::{info, warn};
use ndarray::Array2;

use crate::disc::polynomials::lagrange;
use crate::error::SolverError;
use crate::input::{Equation, Input, MeshType};
use crate::disc::gauss_points::pts_1d;
use crate::disc::geometry::Iblank;
use crate::solver::Solver;

/// Restart/plot file path for one iteration.
pub fn restart_file_name(params: &Input, iter: usize) -> String {
    format!("{}_{:09}.vtu", params.dataFileName, iter)
}

/// Write the full-state snapshot for the current iteration.
pub fn write_restart(solver: &mut Solver, dir: &str) -> Result<String, SolverError> {
    let params = solver.params;
    let path = format!("{}/{}", dir, restart_file_name(params, solver.iter));
    if let Some(parent) = Path::new(&path).parent() {
        fs::create_dir_all(parent).map_err(|e| SolverError::OutputFile {
            path: path.clone(),
            source: e,
        })?;
    }

    // The corner/flux-point traces follow the current solution so the
    // plot vector is consistent with the interior state.
    solver.extrapolate_u();
    solver.extrapolate_u_mpts();
    if params.squeeze != 0 {
        solver.calc_avg_solution();
        solver.check_entropy_plot();
    }
    if params.entropySensor != 0 && params.equation() == Equation::NavierStokes {
        solver.calc_entropy_err_spts();
        solver.extrapolate_s_fpts();
        solver.extrapolate_s_mpts();
    }

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" ?>\n");
    out.push_str(&format!("<!-- TIME {:.15e} -->\n", solver.time));
    if params.mesh_type() == MeshType::Overset || params.writeIBLANK != 0 {
        out.push_str("<!-- IBLANK_CELL");
        for ib in &solver.geo.iblank_cell {
            let tag = match ib {
                Iblank::Normal => 1,
                Iblank::Hole => 0,
                Iblank::Fringe => -1,
            };
            out.push_str(&format!(" {}", tag));
        }
        out.push_str(" -->\n");
    }
    out.push_str("<VTKFile type=\"UnstructuredGrid\" version=\"0.1\" byte_order=\"LittleEndian\">\n");
    out.push_str("<UnstructuredGrid>\n");

    let ns = params.equation() == Equation::NavierStokes;
    let write_sensor = params.entropySensor != 0 && ns && params.nDims == 2;

    for ic in 0..solver.eles.len() {
        let ele = &solver.eles[ic];
        let op = &solver.opers[&(ele.etype, ele.order)];
        let v = ele.get_primitives_plot(op, params);
        let n1 = ele.order + 3;
        let n_cells = if params.nDims == 2 {
            (n1 - 1) * (n1 - 1)
        } else {
            (n1 - 1) * (n1 - 1) * (n1 - 1)
        };

        out.push_str(&format!(
            "<Piece NumberOfPoints=\"{}\" NumberOfCells=\"{}\">\n",
            ele.n_ppts, n_cells
        ));

        out.push_str("<Points>\n<DataArray type=\"Float64\" NumberOfComponents=\"3\" format=\"ascii\">\n");
        let mut line = String::new();
        for pt in &ele.pos_ppts {
            line.push_str(&format!("{:.15e} {:.15e} {:.15e} ", pt.x, pt.y, pt.z));
        }
        out.push_str(line.trim_end());
        out.push_str("\n</DataArray>\n</Points>\n");

        out.push_str("<PointData>\n");

        push_scalar_array(&mut out, "Density", (0..ele.n_ppts).map(|i| v[[i, 0]]));

        if ns {
            out.push_str("<DataArray type=\"Float64\" Name=\"Velocity\" NumberOfComponents=\"3\" format=\"ascii\">\n");
            let mut line = String::new();
            for i in 0..ele.n_ppts {
                let vz = if params.nDims == 3 { v[[i, 3]] } else { 0.0 };
                line.push_str(&format!("{:.15e} {:.15e} {:.15e} ", v[[i, 1]], v[[i, 2]], vz));
            }
            out.push_str(line.trim_end());
            out.push_str("\n</DataArray>\n");

            push_scalar_array(
                &mut out,
                "Pressure",
                (0..ele.n_ppts).map(|i| v[[i, params.nDims + 1]]),
            );
        }

        if write_sensor {
            let s = ele.get_entropy_err_plot(op);
            push_scalar_array(&mut out, "EntropyErr", s.iter().copied());
        }

        out.push_str("</PointData>\n");

        // Plot sub-cells over the tensor grid.
        out.push_str("<Cells>\n<DataArray type=\"Int32\" Name=\"connectivity\" format=\"ascii\">\n");
        let mut conn = String::new();
        if params.nDims == 2 {
            for j in 0..n1 - 1 {
                for i in 0..n1 - 1 {
                    let base = i + n1 * j;
                    conn.push_str(&format!(
                        "{} {} {} {} ",
                        base,
                        base + 1,
                        base + 1 + n1,
                        base + n1
                    ));
                }
            }
        } else {
            let p22 = n1 * n1;
            for k in 0..n1 - 1 {
                for j in 0..n1 - 1 {
                    for i in 0..n1 - 1 {
                        let base = i + n1 * j + p22 * k;
                        conn.push_str(&format!(
                            "{} {} {} {} {} {} {} {} ",
                            base,
                            base + 1,
                            base + 1 + n1,
                            base + n1,
                            base + p22,
                            base + 1 + p22,
                            base + 1 + n1 + p22,
                            base + n1 + p22
                        ));
                    }
                }
            }
        }
        out.push_str(conn.trim_end());
        out.push_str("\n</DataArray>\n<DataArray type=\"Int32\" Name=\"offsets\" format=\"ascii\">\n");
        let stride = if params.nDims == 2 { 4 } else { 8 };
        let mut offs = String::new();
        for c in 0..n_cells {
            offs.push_str(&format!("{} ", (c + 1) * stride));
        }
        out.push_str(offs.trim_end());
        out.push_str("\n</DataArray>\n<DataArray type=\"UInt8\" Name=\"types\" format=\"ascii\">\n");
        let vtk_type = if params.nDims == 2 { 9 } else { 12 };
        let mut types = String::new();
        for _ in 0..n_cells {
            types.push_str(&format!("{} ", vtk_type));
        }
        out.push_str(types.trim_end());
        out.push_str("\n</DataArray>\n</Cells>\n</Piece>\n");
    }

    out.push_str("</UnstructuredGrid>\n</VTKFile>\n");

    let mut file = File::create(&path).map_err(|e| SolverError::OutputFile {
        path: path.clone(),
        source: e,
    })?;
    file.write_all(out.as_bytes())
        .map_err(|e| SolverError::OutputFile {
            path: path.clone(),
            source: e,
        })?;

    Ok(path)
}

fn push_scalar_array(out: &mut String, name: &str, values: impl Iterator<Item = f64>) {
    out.push_str(&format!(
        "<DataArray type=\"Float64\" Name=\"{}\" format=\"ascii\">\n",
        name
    ));
    let mut line = String::new();
    for v in values {
        line.push_str(&format!("{:.15e} ", v));
    }
    out.push_str(line.trim_end());
    out.push_str("\n</DataArray>\n");
}

/// Restore a run from a restart file written at `restartIter`.
pub fn read_restart_file(solver: &mut Solver, dir: &str) -> Result<(), SolverError> {
    let params = solver.params;
    let path = format!(
        "{}/{}",
        dir,
        restart_file_name(params, params.restartIter)
    );
    info!("Solver: restarting from {}", path);

    let file = File::open(&path).map_err(|e| SolverError::RestartFile {
        path: path.clone(),
        source: e,
    })?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<Result<_, _>>()
        .map_err(|e| SolverError::RestartFile {
            path: path.clone(),
            source: e,
        })?;

    // Header: TIME and IBLANK comments, then the UnstructuredGrid tag.
    let mut found_time = false;
    let mut found_iblank = false;
    let mut found_ug = false;
    let mut cursor = 0;
    while cursor < lines.len() {
        let line = lines[cursor].trim();
        cursor += 1;
        if let Some(rest) = line.strip_prefix("<!--") {
            let rest = rest.trim();
            if let Some(t) = rest.strip_prefix("TIME") {
                let t = t.trim_end_matches("-->").trim();
                if let Ok(v) = t.parse::<f64>() {
                    solver.time = v;
                    solver.rk_time = v;
                    found_time = true;
                    info!("  restart time = {}", v);
                }
            } else if let Some(ib) = rest.strip_prefix("IBLANK_CELL") {
                found_iblank = true;
                let tags: Vec<i32> = ib
                    .trim_end_matches("-->")
                    .split_whitespace()
                    .filter_map(|s| s.parse().ok())
                    .collect();
                for (ic, &tag) in tags.iter().enumerate().take(solver.geo.iblank_cell.len()) {
                    solver.geo.iblank_cell[ic] = match tag {
                        0 => Iblank::Hole,
                        -1 => Iblank::Fringe,
                        _ => Iblank::Normal,
                    };
                }
            }
        } else if line.starts_with("<UnstructuredGrid>") {
            found_ug = true;
            break;
        }
    }

    if !found_time {
        warn!("unable to read simulation restart time");
    }
    if !found_ug {
        return Err(SolverError::RestartFormat { path });
    }
    if params.mesh_type() == MeshType::Overset && !found_iblank {
        warn!("IblankCell data not found in restart file");
    }

    for ic in 0..solver.eles.len() {
        cursor = read_piece(solver, ic, &lines, cursor, params);
    }

    info!("Solver: done reading restart file");
    Ok(())
}

/// Parse one element's Piece; returns the cursor past it. A missing or
/// malformed piece fills the element with a marker value and continues.
fn read_piece(
    solver: &mut Solver,
    ic: usize,
    lines: &[String],
    mut cursor: usize,
    params: &Input,
) -> usize {
    let ndims = params.nDims;
    let nfields = params.nFields;

    // Find the next Piece header.
    let mut n_cells = 0usize;
    let mut found = false;
    while cursor < lines.len() {
        let line = lines[cursor].trim().to_string();
        cursor += 1;
        if line.starts_with("<Piece") {
            if let Some(nc) = attr_value(&line, "NumberOfCells") {
                n_cells = nc;
                found = true;
            }
            break;
        }
    }
    if !found {
        warn!("restart-file element {} doesn't exist", ic);
        solver.eles[ic].u_spts.fill(100.0);
        return cursor;
    }

    let order_file = if ndims == 2 {
        (n_cells as f64).sqrt().round() as usize - 2
    } else {
        (n_cells as f64).cbrt().round() as usize - 2
    };
    let n_spts_file = (order_file + 1).pow(ndims as u32);

    let mut rho = vec![0.0; n_spts_file];
    let mut vel = vec![[0.0f64; 3]; n_spts_file];
    let mut pres = vec![0.0; n_spts_file];
    let mut entropy: Option<Vec<f64>> = None;

    let need_velocity = params.equation() == Equation::NavierStokes;
    let mut found_rho = false;
    let mut found_v = !need_velocity;
    let mut found_p = !need_velocity;

    while cursor < lines.len() && !lines[cursor].trim().starts_with("</Piece>") {
        let line = lines[cursor].trim().to_string();
        cursor += 1;
        if !line.starts_with("<DataArray") {
            continue;
        }
        let name = match attr_string(&line, "Name") {
            Some(n) => n,
            None => continue,
        };
        // The data sits on the following line.
        if cursor >= lines.len() {
            break;
        }
        let data: Vec<f64> = lines[cursor]
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();

        match name.as_str() {
            "Density" => {
                extract_spts_scalar(&data, order_file, ndims, 1, 0, &mut rho);
                found_rho = true;
            }
            "Velocity" => {
                let mut vx = vec![0.0; n_spts_file];
                let mut vy = vec![0.0; n_spts_file];
                let mut vz = vec![0.0; n_spts_file];
                extract_spts_scalar(&data, order_file, ndims, 3, 0, &mut vx);
                extract_spts_scalar(&data, order_file, ndims, 3, 1, &mut vy);
                extract_spts_scalar(&data, order_file, ndims, 3, 2, &mut vz);
                for i in 0..n_spts_file {
                    vel[i] = [vx[i], vy[i], vz[i]];
                }
                found_v = true;
            }
            "Pressure" => {
                extract_spts_scalar(&data, order_file, ndims, 1, 0, &mut pres);
                found_p = true;
            }
            "EntropyErr" => {
                let mut s = vec![0.0; n_spts_file];
                extract_spts_scalar(&data, order_file, ndims, 1, 0, &mut s);
                entropy = Some(s);
            }
            _ => {}
        }
    }
    // Move past the </Piece> line.
    if cursor < lines.len() {
        cursor += 1;
    }

    if !(found_rho && found_v && found_p) {
        warn!("restart data incomplete for element {}", ic);
        solver.eles[ic].u_spts.fill(100.0);
        return cursor;
    }

    // Conservative variables at the file's solution points.
    let mut u_file = Array2::<f64>::zeros((n_spts_file, nfields));
    match params.equation() {
        Equation::AdvectionDiffusion => {
            for i in 0..n_spts_file {
                u_file[[i, 0]] = rho[i];
            }
        }
        Equation::NavierStokes => {
            for i in 0..n_spts_file {
                u_file[[i, 0]] = rho[i];
                let mut v_sq = 0.0;
                for dim in 0..ndims {
                    u_file[[i, dim + 1]] = rho[i] * vel[i][dim];
                    v_sq += vel[i][dim] * vel[i][dim];
                }
                u_file[[i, ndims + 1]] = pres[i] / (params.gamma - 1.0) + 0.5 * rho[i] * v_sq;
            }
        }
    }

    let u_final = if order_file != params.order {
        let opp = restart_interp_operator(order_file, params.order, params);
        opp.dot(&u_file)
    } else {
        u_file
    };
    solver.eles[ic].set_u_spts_from(u_final);

    if let Some(s) = entropy {
        if order_file == params.order {
            for (i, v) in s.iter().enumerate() {
                solver.eles[ic].s_spts[i] = *v;
            }
        }
    }

    cursor
}

/// Pull the interior solution-point block (one component of an
/// `ncomp`-wide array) out of a plot-ordered data line.
fn extract_spts_scalar(
    data: &[f64],
    order: usize,
    ndims: usize,
    ncomp: usize,
    comp: usize,
    out: &mut [f64],
) {
    let n1 = order + 3;
    let n = order + 1;
    let at = |idx: usize| -> f64 {
        let flat = idx * ncomp + comp;
        if flat < data.len() {
            data[flat]
        } else {
            f64::NAN
        }
    };
    if ndims == 2 {
        for j in 0..n {
            for i in 0..n {
                out[i + n * j] = at((j + 1) * n1 + i + 1);
            }
        }
    } else {
        let p22 = n1 * n1;
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    out[i + n * (j + n * k)] = at((k + 1) * p22 + (j + 1) * n1 + i + 1);
                }
            }
        }
    }
}

/// Inter-order interpolation operator: tensor-product Lagrange values of
/// the old solution points evaluated at the new ones.
pub fn restart_interp_operator(order_old: usize, order_new: usize, params: &Input) -> Array2<f64> {
    let ndims = params.nDims;
    let pts_old = pts_1d(params.spts_type_quad, order_old);
    let pts_new = pts_1d(params.spts_type_quad, order_new);
    let n_old = (order_old + 1).pow(ndims as u32);
    let n_new = (order_new + 1).pow(ndims as u32);

    let mut opp = Array2::<f64>::zeros((n_new, n_old));
    let n1_old = order_old + 1;
    let n1_new = order_new + 1;
    for i_new in 0..n_new {
        let mut rem = i_new;
        let mut idx_new = [0usize; 3];
        for d in idx_new.iter_mut().take(ndims) {
            *d = rem % n1_new;
            rem /= n1_new;
        }
        for i_old in 0..n_old {
            let mut rem = i_old;
            let mut idx_old = [0usize; 3];
            for d in idx_old.iter_mut().take(ndims) {
                *d = rem % n1_old;
                rem /= n1_old;
            }
            let mut val = 1.0;
            for d in 0..ndims {
                val *= lagrange(&pts_old, pts_new[idx_new[d]], idx_old[d]);
            }
            opp[[i_new, i_old]] = val;
        }
    }
    opp
}

fn attr_value(line: &str, name: &str) -> Option<usize> {
    attr_string(line, name).and_then(|s| s.parse().ok())
}

fn attr_string(line: &str, name: &str) -> Option<String> {
    let key = format!("{}=\"", name);
    let start = line.find(&key)? + key.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}
