//! Lightweight monitoring output: one VTU file of per-cell averages on
//! the linear mesh, written through vtkio. Full-state snapshots (which
//! double as restart files) live in `restart.rs`.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataArray, DataSet, ElementType, IOBuffer,
    UnstructuredGridPiece, Version, VertexNumbers,
};
use vtkio::Vtk;

use crate::input::Equation;
use crate::solver::Solver;

static OUTPUT_DIR: Lazy<String> = Lazy::new(|| {
    let dir = "outputs";
    if !Path::new(dir).exists() {
        fs::create_dir_all(dir).expect("failed to create outputs directory");
    }
    dir.to_string()
});

/// Write cell-averaged conserved variables for quick inspection.
pub fn write_averages(solver: &mut Solver, name: &str) {
    let params = solver.params;
    solver.calc_avg_solution();

    let geo = &solver.geo;
    let mut vtk_points = Vec::with_capacity(3 * geo.n_verts);
    for pt in &geo.xv {
        vtk_points.push(pt.x);
        vtk_points.push(pt.y);
        vtk_points.push(pt.z);
    }

    let n_corners = geo.etype.n_nodes();
    let cell_type = match n_corners {
        4 => CellType::Quad,
        8 => CellType::Hexahedron,
        n => panic!("unsupported cell corner count {}", n),
    };

    let mut connectivity = Vec::with_capacity(geo.n_eles * n_corners);
    let mut cell_types = Vec::with_capacity(geo.n_eles);
    for ic in 0..geo.n_eles {
        for i in 0..n_corners {
            connectivity.push(geo.c2v(ic, i) as u64);
        }
        cell_types.push(cell_type);
    }

    let mut cell_arrays = Vec::new();
    let field_names: Vec<&str> = match params.equation() {
        Equation::AdvectionDiffusion => vec!["u"],
        Equation::NavierStokes => {
            if params.nDims == 2 {
                vec!["rho", "rhou", "rhov", "E"]
            } else {
                vec!["rho", "rhou", "rhov", "rhow", "E"]
            }
        }
    };
    for (k, field) in field_names.iter().enumerate() {
        let avgs: Vec<f64> = solver.eles.iter().map(|e| e.u_avg[k]).collect();
        cell_arrays.push(Attribute::DataArray(DataArray {
            name: (*field).to_string(),
            elem: ElementType::Scalars {
                num_comp: 1,
                lookup_table: None,
            },
            data: IOBuffer::F64(avgs),
        }));
    }

    let filename = format!("{}/{}_avg_{}.vtu", &*OUTPUT_DIR, name, solver.iter);
    let vtk_file = Vtk {
        version: Version::XML { major: 1, minor: 0 },
        title: "Cell Averages".into(),
        byte_order: ByteOrder::native(),
        data: DataSet::inline(UnstructuredGridPiece {
            points: IOBuffer::F64(vtk_points),
            cells: Cells {
                cell_verts: VertexNumbers::XML {
                    connectivity,
                    offsets: (0..geo.n_eles)
                        .map(|i| ((i + 1) * n_corners) as u64)
                        .collect(),
                },
                types: cell_types,
            },
            data: Attributes {
                point: vec![],
                cell: cell_arrays,
            },
        }),
        file_path: None,
    };

    vtk_file.export(&filename).expect("failed to write VTU file");
}

/// Sensor field for shock-capturing runs, one value per cell.
pub fn write_sensor(solver: &Solver, name: &str) {
    let geo = &solver.geo;
    let mut vtk_points = Vec::with_capacity(3 * geo.n_verts);
    for pt in &geo.xv {
        vtk_points.push(pt.x);
        vtk_points.push(pt.y);
        vtk_points.push(pt.z);
    }

    let n_corners = geo.etype.n_nodes();
    let cell_type = match n_corners {
        4 => CellType::Quad,
        8 => CellType::Hexahedron,
        n => panic!("unsupported cell corner count {}", n),
    };
    let mut connectivity = Vec::with_capacity(geo.n_eles * n_corners);
    let mut cell_types = Vec::with_capacity(geo.n_eles);
    for ic in 0..geo.n_eles {
        for i in 0..n_corners {
            connectivity.push(geo.c2v(ic, i) as u64);
        }
        cell_types.push(cell_type);
    }

    let sensors: Vec<f64> = solver.eles.iter().map(|e| e.sensor).collect();
    let filename = format!("{}/{}_sensor_{}.vtu", &*OUTPUT_DIR, name, solver.iter);
    let vtk_file = Vtk {
        version: Version::XML { major: 1, minor: 0 },
        title: "Shock Sensor".into(),
        byte_order: ByteOrder::native(),
        data: DataSet::inline(UnstructuredGridPiece {
            points: IOBuffer::F64(vtk_points),
            cells: Cells {
                cell_verts: VertexNumbers::XML {
                    connectivity,
                    offsets: (0..geo.n_eles)
                        .map(|i| ((i + 1) * n_corners) as u64)
                        .collect(),
                },
                types: cell_types,
            },
            data: Attributes {
                point: vec![],
                cell: vec![Attribute::DataArray(DataArray {
                    name: "sensor".to_string(),
                    elem: ElementType::Scalars {
                        num_comp: 1,
                        lookup_table: None,
                    },
                    data: IOBuffer::F64(sensors),
                })],
            },
        }),
        file_path: None,
    };

    vtk_file.export(&filename).expect("failed to write VTU file");
}
