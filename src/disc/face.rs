use ndarray::{Array1, Array2, Array3};

use crate::disc::element::Element;
use crate::disc::flux::{
    ldg_solution, ldg_viscous_flux, primitives, roe_flux, rusanov_flux, viscous_flux,
};
use crate::disc::geometry::{BcType, FaceConnect, FaceInfo};
use crate::disc::point::Point;
use crate::input::{Equation, Input, RiemannType};

/// Transport seam for partition-boundary faces. The real message layer
/// lives outside the core; tests inject pair-swapping stubs.
pub trait Transport {
    fn exchange(&self, face_tag: usize, send: &Array2<f64>, recv: &mut Array2<f64>);
}

/// Variant-specific right side of a face.
pub enum FaceRight {
    Interior {
        ele_r: usize,
        fpt_r: Vec<usize>,
    },
    Boundary {
        bc: BcType,
    },
    Mpi {
        rank: usize,
        remote_face: usize,
        u_send: Array2<f64>,
        u_recv: Array2<f64>,
        du_send: Array3<f64>,
        du_recv: Array3<f64>,
    },
    Overset {
        u_recv: Array2<f64>,
        du_recv: Array3<f64>,
    },
}

/// One face of the mesh: the exclusive owner of the common-flux slots of
/// its two adjacent elements. All four kinds share the same contract:
/// gather traces, solve the Riemann problem, scatter the common values.
pub struct Face {
    pub id: usize,
    pub n_fpts: usize,
    pub n_fields: usize,
    pub n_dims: usize,
    pub ele_l: usize,
    pub fpt_l: Vec<usize>,
    pub right: FaceRight,

    u_l: Array2<f64>,
    u_r: Array2<f64>,
    du_l: Array3<f64>,
    du_r: Array3<f64>,
    norm: Array2<f64>,
    da: Array1<f64>,
    grid_vel: Array2<f64>,
    /// 1-D tensor quadrature weights over the face points.
    qwts: Vec<f64>,
}

impl Face {
    /// Establish the left (and right) flux-point correspondence. Right
    /// points are matched to left points by physical position, which
    /// absorbs any face rotation or flip; periodic pairs match after
    /// translating by the face offset.
    pub fn setup_face(id: usize, info: &FaceInfo, eles: &[Element], params: &Input) -> Self {
        let ele_l = &eles[info.ele_l];
        let n_face_fpts = ele_l.etype.n_fpts_face(ele_l.order);
        let n_fields = params.nFields;
        let n_dims = params.nDims;

        let fpt_l: Vec<usize> = (0..n_face_fpts)
            .map(|m| info.face_l * n_face_fpts + m)
            .collect();

        let right = match &info.connect {
            FaceConnect::Interior {
                ele_r,
                face_r,
                offset,
            } => {
                let ele_r_ref = &eles[*ele_r];
                let mut fpt_r = Vec::with_capacity(n_face_fpts);
                for &fl in &fpt_l {
                    let target = ele_l.pos_fpts[fl];
                    let mut best = usize::MAX;
                    let mut best_dist = f64::INFINITY;
                    for m in 0..n_face_fpts {
                        let fr = face_r * n_face_fpts + m;
                        let d = (ele_r_ref.pos_fpts[fr] + *offset - target).norm();
                        if d < best_dist {
                            best_dist = d;
                            best = fr;
                        }
                    }
                    assert!(
                        best_dist < 1e-8,
                        "face {}: flux points of elements {} and {} do not align",
                        id,
                        info.ele_l,
                        ele_r
                    );
                    fpt_r.push(best);
                }
                FaceRight::Interior {
                    ele_r: *ele_r,
                    fpt_r,
                }
            }
            FaceConnect::Boundary { bc } => FaceRight::Boundary { bc: *bc },
            FaceConnect::Mpi { rank, remote_face } => FaceRight::Mpi {
                rank: *rank,
                remote_face: *remote_face,
                u_send: Array2::zeros((n_face_fpts, n_fields)),
                u_recv: Array2::zeros((n_face_fpts, n_fields)),
                du_send: Array3::zeros((n_dims, n_face_fpts, n_fields)),
                du_recv: Array3::zeros((n_dims, n_face_fpts, n_fields)),
            },
            FaceConnect::Overset => FaceRight::Overset {
                u_recv: Array2::zeros((n_face_fpts, n_fields)),
                du_recv: Array3::zeros((n_dims, n_face_fpts, n_fields)),
            },
        };

        // Face quadrature weights: tensor product of the 1-D rule over
        // the face's tangential dimensions.
        let w1 = match params.spts_type_quad {
            crate::input::SptsType::Legendre => {
                crate::disc::gauss_points::legendre_points(ele_l.order + 1).1
            }
            crate::input::SptsType::Lobatto => {
                crate::disc::gauss_points::lobatto_points(ele_l.order + 1).1
            }
        };
        let qwts: Vec<f64> = if n_dims == 2 {
            w1.clone()
        } else {
            let n = ele_l.order + 1;
            let mut w = Vec::with_capacity(n * n);
            for b in 0..n {
                for a in 0..n {
                    w.push(w1[a] * w1[b]);
                }
            }
            w
        };

        Face {
            id,
            n_fpts: n_face_fpts,
            n_fields,
            n_dims,
            ele_l: info.ele_l,
            fpt_l,
            right,
            u_l: Array2::zeros((n_face_fpts, n_fields)),
            u_r: Array2::zeros((n_face_fpts, n_fields)),
            du_l: Array3::zeros((n_dims, n_face_fpts, n_fields)),
            du_r: Array3::zeros((n_dims, n_face_fpts, n_fields)),
            norm: Array2::zeros((n_face_fpts, n_dims)),
            da: Array1::zeros(n_face_fpts),
            grid_vel: Array2::zeros((n_face_fpts, n_dims)),
            qwts,
        }
    }

    /// Gather the left trace plus the left element's current normals.
    fn get_left_state(&mut self, eles: &[Element]) {
        let ele = &eles[self.ele_l];
        for (m, &fpt) in self.fpt_l.iter().enumerate() {
            for k in 0..self.n_fields {
                self.u_l[[m, k]] = ele.u_fpts[[fpt, k]];
            }
            for dim in 0..self.n_dims {
                self.norm[[m, dim]] = ele.norm_fpts[[fpt, dim]];
                self.grid_vel[[m, dim]] = ele.grid_vel_fpts[[fpt, dim]];
            }
            self.da[m] = ele.da_fpts[fpt];
        }
    }

    /// Gather (or synthesize) the right trace.
    fn get_right_state(&mut self, eles: &[Element], params: &Input) {
        match &self.right {
            FaceRight::Interior { ele_r, fpt_r } => {
                let ele = &eles[*ele_r];
                for (m, &fpt) in fpt_r.iter().enumerate() {
                    for k in 0..self.n_fields {
                        self.u_r[[m, k]] = ele.u_fpts[[fpt, k]];
                    }
                }
            }
            FaceRight::Boundary { bc } => {
                for m in 0..self.n_fpts {
                    let ghost = boundary_state(
                        *bc,
                        self.u_l.row(m),
                        &row(&self.norm, m),
                        &row(&self.grid_vel, m),
                        params,
                    );
                    for k in 0..self.n_fields {
                        self.u_r[[m, k]] = ghost[k];
                    }
                }
            }
            FaceRight::Mpi { u_recv, .. } => {
                self.u_r.assign(u_recv);
            }
            FaceRight::Overset { u_recv, .. } => {
                self.u_r.assign(u_recv);
            }
        }
    }

    fn get_right_gradient(&mut self, eles: &[Element]) {
        match &self.right {
            FaceRight::Interior { ele_r, fpt_r } => {
                let ele = &eles[*ele_r];
                for dim in 0..self.n_dims {
                    for (m, &fpt) in fpt_r.iter().enumerate() {
                        for k in 0..self.n_fields {
                            self.du_r[[dim, m, k]] = ele.du_fpts[[dim, fpt, k]];
                        }
                    }
                }
            }
            FaceRight::Boundary { .. } => {
                // Zero-jump gradient condition: mirror the interior trace.
                self.du_r.assign(&self.du_l);
            }
            FaceRight::Mpi { du_recv, .. } => {
                self.du_r.assign(du_recv);
            }
            FaceRight::Overset { du_recv, .. } => {
                self.du_r.assign(du_recv);
            }
        }
    }

    /// Post the left trace into the send buffer; the transport layer
    /// swaps buffers between the paired ranks.
    pub fn communicate(&mut self, eles: &[Element], transport: &dyn Transport) {
        self.get_left_state(eles);
        if let FaceRight::Mpi {
            u_send,
            u_recv,
            remote_face,
            ..
        } = &mut self.right
        {
            u_send.assign(&self.u_l);
            transport.exchange(*remote_face, u_send, u_recv);
        }
    }

    pub fn communicate_grad(&mut self, eles: &[Element], transport: &dyn Transport) {
        let ele = &eles[self.ele_l];
        for dim in 0..self.n_dims {
            for (m, &fpt) in self.fpt_l.iter().enumerate() {
                for k in 0..self.n_fields {
                    self.du_l[[dim, m, k]] = ele.du_fpts[[dim, fpt, k]];
                }
            }
        }
        if let FaceRight::Mpi {
            du_send,
            du_recv,
            remote_face,
            ..
        } = &mut self.right
        {
            du_send.assign(&self.du_l);
            for dim in 0..self.n_dims {
                let send2 = du_send.index_axis(ndarray::Axis(0), dim).to_owned();
                let mut recv2 = du_recv.index_axis(ndarray::Axis(0), dim).to_owned();
                transport.exchange(*remote_face, &send2, &mut recv2);
                du_recv.index_axis_mut(ndarray::Axis(0), dim).assign(&recv2);
            }
        }
    }

    /// Hand the overset communicator the physical flux-point positions
    /// it must interpolate donor data to.
    pub fn overset_points(&self, eles: &[Element]) -> Vec<Point> {
        let ele = &eles[self.ele_l];
        self.fpt_l.iter().map(|&fpt| ele.pos_fpts[fpt]).collect()
    }

    /// Deposit donor-interpolated state (overset faces only).
    pub fn set_overset_state(&mut self, u: &Array2<f64>) {
        if let FaceRight::Overset { u_recv, .. } = &mut self.right {
            u_recv.assign(u);
        }
    }

    pub fn set_overset_gradient(&mut self, du: &Array3<f64>) {
        if let FaceRight::Overset { du_recv, .. } = &mut self.right {
            du_recv.assign(du);
        }
    }

    /// Common inviscid normal flux; also deposits the LDG common
    /// solution when the run is viscous.
    pub fn calc_inviscid_flux(&mut self, eles: &mut [Element], params: &Input) {
        self.get_left_state(eles);
        self.get_right_state(eles, params);

        let moving = params.motion().is_moving();
        let use_roe = params.equation() == Equation::NavierStokes
            && params.riemann_type() == RiemannType::Roe
            && !moving;

        for m in 0..self.n_fpts {
            let norm = row(&self.norm, m);
            let mut vgn = 0.0;
            if moving {
                for dim in 0..self.n_dims {
                    vgn += self.grid_vel[[m, dim]] * norm[dim];
                }
            }

            let fn_c = if use_roe {
                roe_flux(self.u_l.row(m), self.u_r.row(m), &norm, params)
            } else {
                rusanov_flux(self.u_l.row(m), self.u_r.row(m), &norm, vgn, params)
            };

            let da_l = self.da[m];
            let ele_l = &mut eles[self.ele_l];
            for k in 0..self.n_fields {
                ele_l.fn_fpts[[self.fpt_l[m], k]] = fn_c[k] * da_l;
            }
            if let FaceRight::Interior { ele_r, fpt_r } = &self.right {
                let ele_r_mut = &mut eles[*ele_r];
                let da_r = ele_r_mut.da_fpts[fpt_r[m]];
                for k in 0..self.n_fields {
                    ele_r_mut.fn_fpts[[fpt_r[m], k]] = -fn_c[k] * da_r;
                }
            }

            if params.is_viscous() {
                let uc = ldg_solution(
                    self.u_l.row(m),
                    self.u_r.row(m),
                    self.n_fields,
                    params.LDG_penFact,
                );
                let ele_l = &mut eles[self.ele_l];
                for k in 0..self.n_fields {
                    ele_l.uc_fpts[[self.fpt_l[m], k]] = uc[k];
                }
                if let FaceRight::Interior { ele_r, fpt_r } = &self.right {
                    let ele_r_mut = &mut eles[*ele_r];
                    for k in 0..self.n_fields {
                        ele_r_mut.uc_fpts[[fpt_r[m], k]] = uc[k];
                    }
                }
            }
        }
    }

    /// Common viscous normal flux, added onto the inviscid common flux.
    pub fn calc_viscous_flux(&mut self, eles: &mut [Element], params: &Input) {
        self.get_left_state(eles);
        self.get_right_state(eles, params);
        {
            let ele = &eles[self.ele_l];
            for dim in 0..self.n_dims {
                for (m, &fpt) in self.fpt_l.iter().enumerate() {
                    for k in 0..self.n_fields {
                        self.du_l[[dim, m, k]] = ele.du_fpts[[dim, fpt, k]];
                    }
                }
            }
        }
        self.get_right_gradient(eles);

        let mut fv_l = Array2::<f64>::zeros((self.n_dims, self.n_fields));
        let mut fv_r = Array2::<f64>::zeros((self.n_dims, self.n_fields));
        let mut du = Array2::<f64>::zeros((self.n_dims, self.n_fields));

        for m in 0..self.n_fpts {
            let norm = row(&self.norm, m);

            fv_l.fill(0.0);
            for dim in 0..self.n_dims {
                for k in 0..self.n_fields {
                    du[[dim, k]] = self.du_l[[dim, m, k]];
                }
            }
            viscous_flux(self.u_l.row(m), &du, fv_l.view_mut(), params);

            fv_r.fill(0.0);
            for dim in 0..self.n_dims {
                for k in 0..self.n_fields {
                    du[[dim, k]] = self.du_r[[dim, m, k]];
                }
            }
            viscous_flux(self.u_r.row(m), &du, fv_r.view_mut(), params);

            let fn_v = ldg_viscous_flux(
                self.u_l.row(m),
                self.u_r.row(m),
                &fv_l,
                &fv_r,
                &norm,
                params,
            );

            let da_l = self.da[m];
            let ele_l = &mut eles[self.ele_l];
            for k in 0..self.n_fields {
                ele_l.fn_fpts[[self.fpt_l[m], k]] += fn_v[k] * da_l;
            }
            if let FaceRight::Interior { ele_r, fpt_r } = &self.right {
                let ele_r_mut = &mut eles[*ele_r];
                let da_r = ele_r_mut.da_fpts[fpt_r[m]];
                for k in 0..self.n_fields {
                    ele_r_mut.fn_fpts[[fpt_r[m], k]] -= fn_v[k] * da_r;
                }
            }
        }
    }

    /// Pressure (plus viscous) force on wall boundary faces; six slots:
    /// inviscid xyz then viscous xyz.
    pub fn compute_wall_force(&mut self, eles: &[Element], params: &Input) -> [f64; 6] {
        let mut force = [0.0; 6];
        let is_wall = matches!(
            self.right,
            FaceRight::Boundary {
                bc: BcType::SlipWall | BcType::AdiabaticNoSlip | BcType::IsothermalNoSlip
            }
        );
        if !is_wall || params.equation() != Equation::NavierStokes {
            return force;
        }

        self.get_left_state(eles);
        for m in 0..self.n_fpts {
            let (_, _, p) = primitives(self.u_l.row(m), self.n_dims, params.gamma);
            for dim in 0..self.n_dims {
                force[dim] += p * self.norm[[m, dim]] * self.da[m] * self.qwts[m];
            }
        }

        if params.is_viscous() {
            let ele = &eles[self.ele_l];
            let mut du = Array2::<f64>::zeros((self.n_dims, self.n_fields));
            let mut fv = Array2::<f64>::zeros((self.n_dims, self.n_fields));
            for (m, &fpt) in self.fpt_l.iter().enumerate() {
                for dim in 0..self.n_dims {
                    for k in 0..self.n_fields {
                        du[[dim, k]] = ele.du_fpts[[dim, fpt, k]];
                    }
                }
                fv.fill(0.0);
                viscous_flux(self.u_l.row(m), &du, fv.view_mut(), params);
                for dim1 in 0..self.n_dims {
                    let mut tn = 0.0;
                    for dim2 in 0..self.n_dims {
                        tn += fv[[dim2, dim1 + 1]] * self.norm[[m, dim2]];
                    }
                    force[3 + dim1] += tn * self.da[m] * self.qwts[m];
                }
            }
        }

        force
    }

    /// Quadrature of the common normal flux through a boundary face;
    /// interior faces deposit equal and opposite fluxes and contribute
    /// nothing to the domain total.
    pub fn compute_mass_flux(&mut self, eles: &[Element]) -> Vec<f64> {
        let mut flux = vec![0.0; self.n_fields];
        if !matches!(self.right, FaceRight::Boundary { .. }) {
            return flux;
        }
        let ele = &eles[self.ele_l];
        for (m, &fpt) in self.fpt_l.iter().enumerate() {
            for k in 0..self.n_fields {
                flux[k] += ele.fn_fpts[[fpt, k]] * self.qwts[m];
            }
        }
        flux
    }

    pub fn is_mpi(&self) -> bool {
        matches!(self.right, FaceRight::Mpi { .. })
    }

    pub fn is_overset(&self) -> bool {
        matches!(self.right, FaceRight::Overset { .. })
    }
}

fn row(arr: &Array2<f64>, i: usize) -> Vec<f64> {
    arr.row(i).to_vec()
}

/// Synthesize the ghost state for a boundary condition from the interior
/// trace and the freestream configuration.
pub fn boundary_state(
    bc: BcType,
    u_l: ndarray::ArrayView1<f64>,
    norm: &[f64],
    grid_vel: &[f64],
    params: &Input,
) -> Vec<f64> {
    let ndims = params.nDims;
    let nfields = params.nFields;
    let gamma = params.gamma;

    if params.equation() == Equation::AdvectionDiffusion {
        // Scalar transport: Dirichlet reflects through the boundary
        // value, everything else extrapolates.
        return match bc {
            BcType::Dirichlet => vec![2.0 * params.uBound - u_l[0]],
            _ => vec![u_l[0]],
        };
    }

    let (rho, vel, p) = primitives(u_l, ndims, gamma);
    let v_free = [params.uBound, params.vBound, params.wBound];
    let mut ghost = vec![0.0; nfields];

    let build = |rho_g: f64, vel_g: &[f64; 3], p_g: f64, out: &mut [f64]| {
        out[0] = rho_g;
        let mut v_sq = 0.0;
        for dim in 0..ndims {
            out[dim + 1] = rho_g * vel_g[dim];
            v_sq += vel_g[dim] * vel_g[dim];
        }
        out[ndims + 1] = p_g / (gamma - 1.0) + 0.5 * rho_g * v_sq;
    };

    match bc {
        BcType::SupersonicInflow => {
            build(params.rhoBound, &v_free, params.pBound, &mut ghost);
        }
        BcType::SupersonicOutflow => {
            build(rho, &vel, p, &mut ghost);
        }
        BcType::SlipWall => {
            // Mirror the wall-relative normal velocity.
            let mut vn_rel = 0.0;
            for dim in 0..ndims {
                vn_rel += (vel[dim] - grid_vel[dim]) * norm[dim];
            }
            let mut vel_g = [0.0; 3];
            for dim in 0..ndims {
                vel_g[dim] = vel[dim] - 2.0 * vn_rel * norm[dim];
            }
            build(rho, &vel_g, p, &mut ghost);
        }
        BcType::AdiabaticNoSlip => {
            let mut vel_g = [0.0; 3];
            for dim in 0..ndims {
                vel_g[dim] = 2.0 * grid_vel[dim] - vel[dim];
            }
            build(rho, &vel_g, p, &mut ghost);
        }
        BcType::IsothermalNoSlip => {
            let mut vel_g = [0.0; 3];
            for dim in 0..ndims {
                vel_g[dim] = 2.0 * grid_vel[dim] - vel[dim];
            }
            let rho_g = p / (params.RGas * params.TWall);
            build(rho_g, &vel_g, p, &mut ghost);
        }
        BcType::Characteristic => {
            // One-dimensional Riemann invariants normal to the face.
            let rho_inf = params.rhoBound;
            let p_inf = params.pBound;
            let c = (gamma * p / rho).sqrt();
            let c_inf = (gamma * p_inf / rho_inf).sqrt();

            let mut vn = 0.0;
            let mut vn_inf = 0.0;
            for dim in 0..ndims {
                vn += vel[dim] * norm[dim];
                vn_inf += v_free[dim] * norm[dim];
            }

            let r_plus = vn + 2.0 * c / (gamma - 1.0);
            let r_minus = vn_inf - 2.0 * c_inf / (gamma - 1.0);
            let vn_b = 0.5 * (r_plus + r_minus);
            let c_b = 0.25 * (gamma - 1.0) * (r_plus - r_minus);

            let (s_b, vel_ref, vn_ref) = if vn_b < 0.0 {
                // Inflow: entropy and tangential velocity from freestream.
                (p_inf / rho_inf.powf(gamma), v_free, vn_inf)
            } else {
                (p / rho.powf(gamma), vel, vn)
            };

            let rho_b = (c_b * c_b / (gamma * s_b)).powf(1.0 / (gamma - 1.0));
            let p_b = rho_b * c_b * c_b / gamma;
            let mut vel_b = [0.0; 3];
            for dim in 0..ndims {
                vel_b[dim] = vel_ref[dim] + (vn_b - vn_ref) * norm[dim];
            }
            build(rho_b, &vel_b, p_b, &mut ghost);
        }
        BcType::Dirichlet => {
            build(params.rhoBound, &v_free, params.pBound, &mut ghost);
        }
        BcType::Periodic => unreachable!("periodic faces are paired as interior faces"),
    }

    // Keep the inviscid path well-posed if a config drives a wall state
    // to vanishing density.
    if ghost[0] <= 0.0 {
        ghost.copy_from_slice(&u_l.to_vec());
    }

    ghost
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ns_params() -> Input {
        let mut params = Input::default();
        params.equation = Some(Equation::NavierStokes);
        params.finalize();
        params
    }

    #[test]
    fn slip_wall_kills_normal_velocity() {
        let params = ns_params();
        let u = array![1.0, 0.5, 0.3, 2.0];
        let ghost = boundary_state(BcType::SlipWall, u.view(), &[1.0, 0.0], &[0.0, 0.0], &params);
        // Average of interior and ghost normal momentum is zero.
        assert!((ghost[1] + u[1]).abs() < 1e-14);
        assert!((ghost[2] - u[2]).abs() < 1e-14);
        assert!((ghost[0] - u[0]).abs() < 1e-14);
    }

    #[test]
    fn adiabatic_wall_reverses_velocity() {
        let params = ns_params();
        let u = array![1.0, 0.5, 0.3, 2.0];
        let ghost = boundary_state(
            BcType::AdiabaticNoSlip,
            u.view(),
            &[0.0, 1.0],
            &[0.0, 0.0],
            &params,
        );
        assert!((ghost[1] + u[1]).abs() < 1e-14);
        assert!((ghost[2] + u[2]).abs() < 1e-14);
    }

    #[test]
    fn characteristic_recovers_freestream_at_freestream() {
        let mut params = ns_params();
        params.rhoBound = 1.0;
        params.uBound = 0.2;
        params.vBound = 0.1;
        params.pBound = 1.0 / 1.4;
        params.finalize();
        let rho = 1.0;
        let (vx, vy) = (0.2, 0.1);
        let p = 1.0 / 1.4;
        let e = p / 0.4 + 0.5 * rho * (vx * vx + vy * vy);
        let u = array![rho, rho * vx, rho * vy, e];
        let ghost = boundary_state(
            BcType::Characteristic,
            u.view(),
            &[1.0, 0.0],
            &[0.0, 0.0],
            &params,
        );
        for k in 0..4 {
            assert!((ghost[k] - u[k]).abs() < 1e-10, "field {}", k);
        }
    }

    #[test]
    fn supersonic_outflow_extrapolates() {
        let params = ns_params();
        let u = array![1.3, 2.0, 0.1, 4.0];
        let ghost = boundary_state(
            BcType::SupersonicOutflow,
            u.view(),
            &[1.0, 0.0],
            &[0.0, 0.0],
            &params,
        );
        for k in 0..4 {
            assert!((ghost[k] - u[k]).abs() < 1e-13);
        }
    }
}
