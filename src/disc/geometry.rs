use std::f64::consts::PI;

use crate::disc::point::Point;
use crate::disc::shape::ElementType;
use crate::input::{Input, Motion};

/// Overset cell status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iblank {
    Normal,
    Hole,
    Fringe,
}

/// Boundary-condition families attachable to a box side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcType {
    Periodic,
    Characteristic,
    SupersonicInflow,
    SupersonicOutflow,
    SlipWall,
    AdiabaticNoSlip,
    IsothermalNoSlip,
    Dirichlet,
}

impl BcType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "periodic" => BcType::Periodic,
            "char" | "characteristic" | "farfield" => BcType::Characteristic,
            "sup_in" | "supersonic_inflow" => BcType::SupersonicInflow,
            "sup_out" | "supersonic_outflow" | "extrapolate" => BcType::SupersonicOutflow,
            "slip_wall" => BcType::SlipWall,
            "adiabatic_noslip" | "wall_adiabatic" => BcType::AdiabaticNoSlip,
            "isothermal_noslip" | "wall_isothermal" => BcType::IsothermalNoSlip,
            "dirichlet" => BcType::Dirichlet,
            other => panic!("unknown boundary condition '{}'", other),
        }
    }
}

/// What sits on the right side of a face descriptor.
#[derive(Debug, Clone)]
pub enum FaceConnect {
    Interior {
        ele_r: usize,
        face_r: usize,
        /// Translation applied to the right face to overlay the left one
        /// (nonzero only for periodic pairs).
        offset: Point,
    },
    Boundary {
        bc: BcType,
    },
    /// Partition boundary: the paired rank and its face id.
    Mpi {
        rank: usize,
        remote_face: usize,
    },
    /// Overset boundary: right state arrives from a donor grid.
    Overset,
}

/// Face descriptor produced by mesh construction.
#[derive(Debug, Clone)]
pub struct FaceInfo {
    pub ele_l: usize,
    pub face_l: usize,
    pub connect: FaceConnect,
}

/// The geometry service: vertex coordinates, connectivity, face lists,
/// prescribed mesh motion, and overset cell status.
pub struct Geometry {
    pub n_dims: usize,
    pub etype: ElementType,
    pub n_eles: usize,
    pub n_verts: usize,
    /// Initial vertex positions.
    pub xv0: Vec<Point>,
    /// Current vertex positions (equals xv0 on static meshes).
    pub xv: Vec<Point>,
    pub grid_vel: Vec<Point>,
    c2v: Vec<Vec<usize>>,
    pub faces: Vec<FaceInfo>,
    pub iblank_cell: Vec<Iblank>,
    bounds: [f64; 6],
}

impl Geometry {
    /// Cartesian box mesh per the configuration (meshType = create).
    pub fn create_mesh(params: &Input) -> Self {
        match params.nDims {
            2 => Self::create_mesh_2d(params),
            3 => Self::create_mesh_3d(params),
            n => panic!("unsupported number of dimensions {}", n),
        }
    }

    fn create_mesh_2d(params: &Input) -> Self {
        let (nx, ny) = (params.nx, params.ny);
        let (xmin, xmax) = (params.xmin, params.xmax);
        let (ymin, ymax) = (params.ymin, params.ymax);
        let dx = (xmax - xmin) / nx as f64;
        let dy = (ymax - ymin) / ny as f64;

        let mut xv = Vec::with_capacity((nx + 1) * (ny + 1));
        for j in 0..=ny {
            for i in 0..=nx {
                xv.push(Point::new(xmin + i as f64 * dx, ymin + j as f64 * dy, 0.0));
            }
        }

        let vid = |i: usize, j: usize| i + (nx + 1) * j;
        let cid = |i: usize, j: usize| i + nx * j;

        let mut c2v = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                c2v.push(vec![vid(i, j), vid(i + 1, j), vid(i + 1, j + 1), vid(i, j + 1)]);
            }
        }

        let bc_left = BcType::from_name(&params.bcLeft);
        let bc_right = BcType::from_name(&params.bcRight);
        let bc_bottom = BcType::from_name(&params.bcBottom);
        let bc_top = BcType::from_name(&params.bcTop);

        // Quad local faces: 0 bottom, 1 right, 2 top, 3 left.
        let mut faces = Vec::new();
        for j in 0..ny {
            for i in 1..nx {
                faces.push(FaceInfo {
                    ele_l: cid(i - 1, j),
                    face_l: 1,
                    connect: FaceConnect::Interior {
                        ele_r: cid(i, j),
                        face_r: 3,
                        offset: Point::zero(),
                    },
                });
            }
            if bc_left == BcType::Periodic || bc_right == BcType::Periodic {
                assert!(
                    bc_left == BcType::Periodic && bc_right == BcType::Periodic,
                    "periodic boundaries must pair left with right"
                );
                faces.push(FaceInfo {
                    ele_l: cid(nx - 1, j),
                    face_l: 1,
                    connect: FaceConnect::Interior {
                        ele_r: cid(0, j),
                        face_r: 3,
                        offset: Point::new(xmax - xmin, 0.0, 0.0),
                    },
                });
            } else {
                faces.push(FaceInfo {
                    ele_l: cid(0, j),
                    face_l: 3,
                    connect: FaceConnect::Boundary { bc: bc_left },
                });
                faces.push(FaceInfo {
                    ele_l: cid(nx - 1, j),
                    face_l: 1,
                    connect: FaceConnect::Boundary { bc: bc_right },
                });
            }
        }
        for i in 0..nx {
            for j in 1..ny {
                faces.push(FaceInfo {
                    ele_l: cid(i, j - 1),
                    face_l: 2,
                    connect: FaceConnect::Interior {
                        ele_r: cid(i, j),
                        face_r: 0,
                        offset: Point::zero(),
                    },
                });
            }
            if bc_bottom == BcType::Periodic || bc_top == BcType::Periodic {
                assert!(
                    bc_bottom == BcType::Periodic && bc_top == BcType::Periodic,
                    "periodic boundaries must pair bottom with top"
                );
                faces.push(FaceInfo {
                    ele_l: cid(i, ny - 1),
                    face_l: 2,
                    connect: FaceConnect::Interior {
                        ele_r: cid(i, 0),
                        face_r: 0,
                        offset: Point::new(0.0, ymax - ymin, 0.0),
                    },
                });
            } else {
                faces.push(FaceInfo {
                    ele_l: cid(i, 0),
                    face_l: 0,
                    connect: FaceConnect::Boundary { bc: bc_bottom },
                });
                faces.push(FaceInfo {
                    ele_l: cid(i, ny - 1),
                    face_l: 2,
                    connect: FaceConnect::Boundary { bc: bc_top },
                });
            }
        }

        let n_eles = nx * ny;
        let n_verts = xv.len();
        Geometry {
            n_dims: 2,
            etype: ElementType::Quad,
            n_eles,
            n_verts,
            xv0: xv.clone(),
            xv,
            grid_vel: vec![Point::zero(); n_verts],
            c2v,
            faces,
            iblank_cell: vec![Iblank::Normal; n_eles],
            bounds: [xmin, ymin, 0.0, xmax, ymax, 0.0],
        }
    }

    fn create_mesh_3d(params: &Input) -> Self {
        let (nx, ny, nz) = (params.nx, params.ny, params.nz);
        let (xmin, xmax) = (params.xmin, params.xmax);
        let (ymin, ymax) = (params.ymin, params.ymax);
        let (zmin, zmax) = (params.zmin, params.zmax);
        let dx = (xmax - xmin) / nx as f64;
        let dy = (ymax - ymin) / ny as f64;
        let dz = (zmax - zmin) / nz as f64;

        let mut xv = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    xv.push(Point::new(
                        xmin + i as f64 * dx,
                        ymin + j as f64 * dy,
                        zmin + k as f64 * dz,
                    ));
                }
            }
        }

        let vid = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cid = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let mut c2v = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    c2v.push(vec![
                        vid(i, j, k),
                        vid(i + 1, j, k),
                        vid(i + 1, j + 1, k),
                        vid(i, j + 1, k),
                        vid(i, j, k + 1),
                        vid(i + 1, j, k + 1),
                        vid(i + 1, j + 1, k + 1),
                        vid(i, j + 1, k + 1),
                    ]);
                }
            }
        }

        // Hex local faces: 0 bottom (z-), 1 top (z+), 2 left (x-),
        // 3 right (x+), 4 front (y-), 5 back (y+).
        let bc = [
            BcType::from_name(&params.bcBottom),
            BcType::from_name(&params.bcTop),
            BcType::from_name(&params.bcLeft),
            BcType::from_name(&params.bcRight),
            BcType::from_name(&params.bcFront),
            BcType::from_name(&params.bcBack),
        ];

        let mut faces = Vec::new();
        // x-normal faces.
        for k in 0..nz {
            for j in 0..ny {
                for i in 1..nx {
                    faces.push(FaceInfo {
                        ele_l: cid(i - 1, j, k),
                        face_l: 3,
                        connect: FaceConnect::Interior {
                            ele_r: cid(i, j, k),
                            face_r: 2,
                            offset: Point::zero(),
                        },
                    });
                }
                if bc[2] == BcType::Periodic {
                    faces.push(FaceInfo {
                        ele_l: cid(nx - 1, j, k),
                        face_l: 3,
                        connect: FaceConnect::Interior {
                            ele_r: cid(0, j, k),
                            face_r: 2,
                            offset: Point::new(xmax - xmin, 0.0, 0.0),
                        },
                    });
                } else {
                    faces.push(FaceInfo {
                        ele_l: cid(0, j, k),
                        face_l: 2,
                        connect: FaceConnect::Boundary { bc: bc[2] },
                    });
                    faces.push(FaceInfo {
                        ele_l: cid(nx - 1, j, k),
                        face_l: 3,
                        connect: FaceConnect::Boundary { bc: bc[3] },
                    });
                }
            }
        }
        // y-normal faces.
        for k in 0..nz {
            for i in 0..nx {
                for j in 1..ny {
                    faces.push(FaceInfo {
                        ele_l: cid(i, j - 1, k),
                        face_l: 5,
                        connect: FaceConnect::Interior {
                            ele_r: cid(i, j, k),
                            face_r: 4,
                            offset: Point::zero(),
                        },
                    });
                }
                if bc[4] == BcType::Periodic {
                    faces.push(FaceInfo {
                        ele_l: cid(i, ny - 1, k),
                        face_l: 5,
                        connect: FaceConnect::Interior {
                            ele_r: cid(i, 0, k),
                            face_r: 4,
                            offset: Point::new(0.0, ymax - ymin, 0.0),
                        },
                    });
                } else {
                    faces.push(FaceInfo {
                        ele_l: cid(i, 0, k),
                        face_l: 4,
                        connect: FaceConnect::Boundary { bc: bc[4] },
                    });
                    faces.push(FaceInfo {
                        ele_l: cid(i, ny - 1, k),
                        face_l: 5,
                        connect: FaceConnect::Boundary { bc: bc[5] },
                    });
                }
            }
        }
        // z-normal faces.
        for j in 0..ny {
            for i in 0..nx {
                for k in 1..nz {
                    faces.push(FaceInfo {
                        ele_l: cid(i, j, k - 1),
                        face_l: 1,
                        connect: FaceConnect::Interior {
                            ele_r: cid(i, j, k),
                            face_r: 0,
                            offset: Point::zero(),
                        },
                    });
                }
                if bc[0] == BcType::Periodic {
                    faces.push(FaceInfo {
                        ele_l: cid(i, j, nz - 1),
                        face_l: 1,
                        connect: FaceConnect::Interior {
                            ele_r: cid(i, j, 0),
                            face_r: 0,
                            offset: Point::new(0.0, 0.0, zmax - zmin),
                        },
                    });
                } else {
                    faces.push(FaceInfo {
                        ele_l: cid(i, j, 0),
                        face_l: 0,
                        connect: FaceConnect::Boundary { bc: bc[0] },
                    });
                    faces.push(FaceInfo {
                        ele_l: cid(i, j, nz - 1),
                        face_l: 1,
                        connect: FaceConnect::Boundary { bc: bc[1] },
                    });
                }
            }
        }

        let n_eles = nx * ny * nz;
        let n_verts = xv.len();
        Geometry {
            n_dims: 3,
            etype: ElementType::Hex,
            n_eles,
            n_verts,
            xv0: xv.clone(),
            xv,
            grid_vel: vec![Point::zero(); n_verts],
            c2v,
            faces,
            iblank_cell: vec![Iblank::Normal; n_eles],
            bounds: [xmin, ymin, zmin, xmax, ymax, zmax],
        }
    }

    pub fn c2v(&self, cell: usize, i: usize) -> usize {
        self.c2v[cell][i]
    }

    /// Initial node positions of one cell.
    pub fn nodes_of(&self, cell: usize) -> Vec<Point> {
        self.c2v[cell].iter().map(|&v| self.xv0[v]).collect()
    }

    /// Current node positions of one cell.
    pub fn current_nodes_of(&self, cell: usize) -> Vec<Point> {
        self.c2v[cell].iter().map(|&v| self.xv[v]).collect()
    }

    pub fn grid_vel_of(&self, cell: usize) -> Vec<Point> {
        self.c2v[cell].iter().map(|&v| self.grid_vel[v]).collect()
    }

    /// Advance every vertex along the prescribed motion family and set
    /// the analytic grid velocity at time `t`.
    pub fn move_mesh(&mut self, t: f64, params: &Input) {
        let motion = params.motion();
        if !motion.is_moving() {
            return;
        }

        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.bounds;
        let lx = xmax - xmin;
        let ly = ymax - ymin;
        let lz = if self.n_dims == 3 { zmax - zmin } else { 1.0 };

        match motion {
            Motion::Static => {}
            Motion::Perturb => {
                // Sinusoidal perturbation of every interior node.
                let wx = 2.0 * PI * params.moveFx;
                let wy = 2.0 * PI * params.moveFy;
                for (v, x0) in self.xv0.iter().enumerate() {
                    let sx = (PI * (x0.x - xmin) / lx).sin();
                    let sy = (PI * (x0.y - ymin) / ly).sin();
                    let sz = if self.n_dims == 3 {
                        (PI * (x0.z - zmin) / lz).sin()
                    } else {
                        1.0
                    };
                    let fac = sx * sy * sz;
                    self.xv[v].x = x0.x + params.moveAx * fac * (wx * t).sin();
                    self.xv[v].y = x0.y + params.moveAy * fac * (wy * t).sin();
                    self.grid_vel[v].x = params.moveAx * fac * wx * (wx * t).cos();
                    self.grid_vel[v].y = params.moveAy * fac * wy * (wy * t).cos();
                    if self.n_dims == 3 {
                        let wz = 2.0 * PI * params.moveFz;
                        self.xv[v].z = x0.z + params.moveAz * fac * (wz * t).sin();
                        self.grid_vel[v].z = params.moveAz * fac * wz * (wz * t).cos();
                    }
                }
            }
            Motion::LiangDeform => {
                // Deforming-square motion of Liang and Miyaji; the y
                // deflection oscillates at twice the x frequency.
                let wx = 2.0 * PI * params.moveFx;
                let wy = 2.0 * wx;
                for (v, x0) in self.xv0.iter().enumerate() {
                    let sx = (PI * (x0.x - xmin) / lx).sin();
                    let sy = (PI * (x0.y - ymin) / ly).sin();
                    self.xv[v].x = x0.x + params.moveAx * sx * sy * (wx * t).sin();
                    self.xv[v].y = x0.y + params.moveAy * sx * sy * (wy * t).sin();
                    self.grid_vel[v].x = params.moveAx * sx * sy * wx * (wx * t).cos();
                    self.grid_vel[v].y = params.moveAy * sx * sy * wy * (wy * t).cos();
                }
            }
            Motion::RigidRotation => {
                // Oscillatory rotation about the origin.
                let w = 2.0 * PI * params.moveFx;
                let theta = params.moveAx * (w * t).sin();
                let dtheta = params.moveAx * w * (w * t).cos();
                let (st, ct) = theta.sin_cos();
                for (v, x0) in self.xv0.iter().enumerate() {
                    let x = ct * x0.x - st * x0.y;
                    let y = st * x0.x + ct * x0.y;
                    self.xv[v].x = x;
                    self.xv[v].y = y;
                    self.grid_vel[v].x = -dtheta * y;
                    self.grid_vel[v].y = dtheta * x;
                }
            }
            Motion::RigidTranslation => {
                let wx = 2.0 * PI * params.moveFx;
                let wy = 2.0 * PI * params.moveFy;
                for (v, x0) in self.xv0.iter().enumerate() {
                    self.xv[v].x = x0.x + params.moveAx * (wx * t).sin();
                    self.xv[v].y = x0.y + params.moveAy * (wy * t).sin();
                    self.grid_vel[v].x = params.moveAx * wx * (wx * t).cos();
                    self.grid_vel[v].y = params.moveAy * wy * (wy * t).cos();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;

    fn box_params(nx: usize, ny: usize) -> Input {
        let mut params = Input::default();
        params.nx = nx;
        params.ny = ny;
        params.xmin = 0.0;
        params.xmax = 1.0;
        params.ymin = 0.0;
        params.ymax = 1.0;
        params.finalize();
        params
    }

    #[test]
    fn periodic_box_face_count() {
        // nx*ny cells, 2*nx*ny faces when fully periodic.
        let params = box_params(4, 3);
        let geo = Geometry::create_mesh(&params);
        assert_eq!(geo.n_eles, 12);
        assert_eq!(geo.faces.len(), 2 * 12);
        assert!(geo
            .faces
            .iter()
            .all(|f| matches!(f.connect, FaceConnect::Interior { .. })));
    }

    #[test]
    fn wall_box_has_boundary_faces() {
        let mut params = box_params(3, 3);
        params.bcLeft = "slip_wall".into();
        params.bcRight = "slip_wall".into();
        params.bcBottom = "slip_wall".into();
        params.bcTop = "slip_wall".into();
        let geo = Geometry::create_mesh(&params);
        let n_bnd = geo
            .faces
            .iter()
            .filter(|f| matches!(f.connect, FaceConnect::Boundary { .. }))
            .count();
        assert_eq!(n_bnd, 12);
        // interior: 2 * nx*(nx-1)
        assert_eq!(geo.faces.len() - n_bnd, 12);
    }

    #[test]
    fn cell_nodes_are_counterclockwise() {
        let params = box_params(2, 2);
        let geo = Geometry::create_mesh(&params);
        let nodes = geo.nodes_of(0);
        let area = 0.5
            * ((nodes[1].x - nodes[0].x) * (nodes[2].y - nodes[0].y)
                - (nodes[2].x - nodes[0].x) * (nodes[1].y - nodes[0].y));
        assert!(area > 0.0);
    }

    #[test]
    fn rigid_translation_has_consistent_velocity() {
        let mut params = box_params(2, 2);
        params.motion = Some(Motion::RigidTranslation);
        params.moveAx = 0.5;
        params.moveFx = 0.25;
        params.finalize();
        let mut geo = Geometry::create_mesh(&params);
        let t = 0.3;
        let dt = 1e-6;
        geo.move_mesh(t, &params);
        let x1 = geo.xv[0].x;
        let v = geo.grid_vel[0].x;
        geo.move_mesh(t + dt, &params);
        let x2 = geo.xv[0].x;
        assert!(((x2 - x1) / dt - v).abs() < 1e-4);
    }
}
