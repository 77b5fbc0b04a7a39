use ndarray::{Array2, ArrayView1, ArrayViewMut2};

use crate::input::{Equation, Input};

/// Primitive variables (rho, [u,v,w], p) from a conservative state.
pub fn primitives(u: ArrayView1<f64>, ndims: usize, gamma: f64) -> (f64, [f64; 3], f64) {
    let rho = u[0];
    let mut vel = [0.0; 3];
    let mut v_sq = 0.0;
    for dim in 0..ndims {
        vel[dim] = u[dim + 1] / rho;
        v_sq += vel[dim] * vel[dim];
    }
    let p = (gamma - 1.0) * (u[ndims + 1] - 0.5 * rho * v_sq);
    (rho, vel, p)
}

/// Physical inviscid flux at one point; `f` is (nDims, nFields).
pub fn inviscid_flux(u: ArrayView1<f64>, mut f: ArrayViewMut2<f64>, params: &Input) {
    let ndims = params.nDims;
    match params.equation() {
        Equation::AdvectionDiffusion => {
            let vel = [params.advectVx, params.advectVy, params.advectVz];
            for dim in 0..ndims {
                f[[dim, 0]] = vel[dim] * u[0];
            }
        }
        Equation::NavierStokes => {
            let (rho, vel, p) = primitives(u, ndims, params.gamma);
            let e = u[ndims + 1];
            for dim in 0..ndims {
                f[[dim, 0]] = rho * vel[dim];
                for j in 0..ndims {
                    f[[dim, j + 1]] = rho * vel[dim] * vel[j];
                }
                f[[dim, dim + 1]] += p;
                f[[dim, ndims + 1]] = vel[dim] * (e + p);
            }
        }
    }
}

/// Physical viscous flux, accumulated onto `f`. `du` is the physical
/// gradient of the conservative variables, (nDims, nFields).
pub fn viscous_flux(
    u: ArrayView1<f64>,
    du: &Array2<f64>,
    mut f: ArrayViewMut2<f64>,
    params: &Input,
) {
    let ndims = params.nDims;
    match params.equation() {
        Equation::AdvectionDiffusion => {
            for dim in 0..ndims {
                f[[dim, 0]] -= params.diffD * du[[dim, 0]];
            }
        }
        Equation::NavierStokes => {
            let gamma = params.gamma;
            let mu = params.mu_inf;
            let rho = u[0];
            let inv_rho = 1.0 / rho;
            let e_total = u[ndims + 1];

            let mut vel = [0.0; 3];
            for j in 0..ndims {
                vel[j] = u[j + 1] * inv_rho;
            }

            // Velocity gradients by the chain rule on conservative gradients.
            let mut dvel = [[0.0; 3]; 3];
            for i in 0..ndims {
                for j in 0..ndims {
                    dvel[i][j] = (du[[i, j + 1]] - vel[j] * du[[i, 0]]) * inv_rho;
                }
            }

            let mut div_v = 0.0;
            for i in 0..ndims {
                div_v += dvel[i][i];
            }

            // Internal-energy gradient for the heat-flux term.
            let mut de_int = [0.0; 3];
            for i in 0..ndims {
                let de = (du[[i, ndims + 1]] - (e_total * inv_rho) * du[[i, 0]]) * inv_rho;
                let mut dke = 0.0;
                for j in 0..ndims {
                    dke += vel[j] * dvel[i][j];
                }
                de_int[i] = de - dke;
            }

            let mut tau = [[0.0; 3]; 3];
            for i in 0..ndims {
                for j in 0..ndims {
                    tau[i][j] = mu * (dvel[i][j] + dvel[j][i]);
                }
                tau[i][i] -= 2.0 / 3.0 * mu * div_v;
            }

            let k_heat = mu * gamma / params.prandtl;
            for i in 0..ndims {
                for j in 0..ndims {
                    f[[i, j + 1]] -= tau[i][j];
                }
                let mut work = 0.0;
                for j in 0..ndims {
                    work += vel[j] * tau[i][j];
                }
                f[[i, ndims + 1]] -= work + k_heat * de_int[i];
            }
        }
    }
}

fn normal_flux_ns(u: ArrayView1<f64>, vel: &[f64; 3], p: f64, vn: f64, ndims: usize) -> Vec<f64> {
    let mut f = vec![0.0; ndims + 2];
    f[0] = u[0] * vn;
    for j in 0..ndims {
        f[j + 1] = u[0] * vel[j] * vn;
    }
    f[ndims + 1] = vn * (u[ndims + 1] + p);
    f
}

/// Rusanov (local Lax-Friedrichs) common normal flux per unit area.
/// `vgn` is the grid velocity projected on the outward normal; the
/// advection-diffusion branch doubles as the lambda-blended upwind flux.
pub fn rusanov_flux(
    u_l: ArrayView1<f64>,
    u_r: ArrayView1<f64>,
    norm: &[f64],
    vgn: f64,
    params: &Input,
) -> Vec<f64> {
    let ndims = params.nDims;
    let nfields = params.nFields;
    let mut fn_out = vec![0.0; nfields];

    match params.equation() {
        Equation::AdvectionDiffusion => {
            let vel = [params.advectVx, params.advectVy, params.advectVz];
            let mut an = -vgn;
            for dim in 0..ndims {
                an += vel[dim] * norm[dim];
            }
            fn_out[0] =
                0.5 * (an * (u_l[0] + u_r[0]) - params.lambda * an.abs() * (u_r[0] - u_l[0]));
        }
        Equation::NavierStokes => {
            let gamma = params.gamma;
            let (rho_l, vel_l, p_l) = primitives(u_l, ndims, gamma);
            let (rho_r, vel_r, p_r) = primitives(u_r, ndims, gamma);

            let mut vn_l = 0.0;
            let mut vn_r = 0.0;
            for dim in 0..ndims {
                vn_l += vel_l[dim] * norm[dim];
                vn_r += vel_r[dim] * norm[dim];
            }

            let c_l = (gamma * p_l / rho_l).max(0.0).sqrt();
            let c_r = (gamma * p_r / rho_r).max(0.0).sqrt();
            let wave_sp = ((vn_l - vgn).abs() + c_l).max((vn_r - vgn).abs() + c_r);

            let mut fn_l = normal_flux_ns(u_l, &vel_l, p_l, vn_l, ndims);
            let mut fn_r = normal_flux_ns(u_r, &vel_r, p_r, vn_r, ndims);
            for dim in 0..ndims {
                fn_l[dim + 1] += p_l * norm[dim];
                fn_r[dim + 1] += p_r * norm[dim];
            }

            for k in 0..nfields {
                fn_out[k] = 0.5 * (fn_l[k] + fn_r[k] - vgn * (u_l[k] + u_r[k]))
                    - 0.5 * wave_sp * (u_r[k] - u_l[k]);
            }
        }
    }

    fn_out
}

/// Roe approximate Riemann solver; static meshes only.
pub fn roe_flux(
    u_l: ArrayView1<f64>,
    u_r: ArrayView1<f64>,
    norm: &[f64],
    params: &Input,
) -> Vec<f64> {
    let ndims = params.nDims;
    let nfields = params.nFields;
    let gamma = params.gamma;

    let (rho_l, vel_l, p_l) = primitives(u_l, ndims, gamma);
    let (rho_r, vel_r, p_r) = primitives(u_r, ndims, gamma);

    let h_l = (u_l[ndims + 1] + p_l) / rho_l;
    let h_r = (u_r[ndims + 1] + p_r) / rho_r;

    // Roe averages.
    let sq_l = rho_l.sqrt();
    let sq_r = rho_r.sqrt();
    let inv_sq = 1.0 / (sq_l + sq_r);
    let rho_avg = sq_l * sq_r;
    let mut vel = [0.0; 3];
    for dim in 0..ndims {
        vel[dim] = (sq_l * vel_l[dim] + sq_r * vel_r[dim]) * inv_sq;
    }
    let h = (sq_l * h_l + sq_r * h_r) * inv_sq;
    let mut v_sq = 0.0;
    for dim in 0..ndims {
        v_sq += vel[dim] * vel[dim];
    }
    let c_sq = (gamma - 1.0) * (h - 0.5 * v_sq);
    let c = c_sq.max(1e-14).sqrt();

    let mut vn = 0.0;
    let mut vn_l = 0.0;
    let mut vn_r = 0.0;
    for dim in 0..ndims {
        vn += vel[dim] * norm[dim];
        vn_l += vel_l[dim] * norm[dim];
        vn_r += vel_r[dim] * norm[dim];
    }

    let d_rho = rho_r - rho_l;
    let d_p = p_r - p_l;
    let d_vn = vn_r - vn_l;

    // Wave strengths: two acoustic families plus the entropy wave.
    let alpha_m = (d_p - rho_avg * c * d_vn) / (2.0 * c_sq);
    let alpha_p = (d_p + rho_avg * c * d_vn) / (2.0 * c_sq);
    let alpha_0 = d_rho - d_p / c_sq;

    let lam_m = (vn - c).abs();
    let lam_p = (vn + c).abs();
    let lam_0 = vn.abs();

    let mut fn_l = normal_flux_ns(u_l, &vel_l, p_l, vn_l, ndims);
    let mut fn_r = normal_flux_ns(u_r, &vel_r, p_r, vn_r, ndims);
    for dim in 0..ndims {
        fn_l[dim + 1] += p_l * norm[dim];
        fn_r[dim + 1] += p_r * norm[dim];
    }

    let mut f = vec![0.0; nfields];
    for k in 0..nfields {
        f[k] = 0.5 * (fn_l[k] + fn_r[k]);
    }

    let mut diss = vec![0.0; nfields];
    diss[0] = lam_m * alpha_m + lam_0 * alpha_0 + lam_p * alpha_p;
    for dim in 0..ndims {
        diss[dim + 1] = lam_m * alpha_m * (vel[dim] - c * norm[dim])
            + lam_0 * alpha_0 * vel[dim]
            + lam_p * alpha_p * (vel[dim] + c * norm[dim]);
    }
    diss[ndims + 1] = lam_m * alpha_m * (h - c * vn)
        + lam_0 * alpha_0 * 0.5 * v_sq
        + lam_p * alpha_p * (h + c * vn);

    // Shear waves: velocity jump tangential to the face.
    let mut dv_t = [0.0; 3];
    for dim in 0..ndims {
        dv_t[dim] = (vel_r[dim] - vel_l[dim]) - d_vn * norm[dim];
    }
    let mut dvt_dot_v = 0.0;
    for dim in 0..ndims {
        diss[dim + 1] += lam_0 * rho_avg * dv_t[dim];
        dvt_dot_v += dv_t[dim] * vel[dim];
    }
    diss[ndims + 1] += lam_0 * rho_avg * dvt_dot_v;

    for k in 0..nfields {
        f[k] -= 0.5 * diss[k];
    }

    f
}

/// LDG common interface solution: centered average biased along the jump
/// by the penalty factor.
pub fn ldg_solution(
    u_l: ArrayView1<f64>,
    u_r: ArrayView1<f64>,
    nfields: usize,
    pen_fact: f64,
) -> Vec<f64> {
    let mut uc = vec![0.0; nfields];
    for k in 0..nfields {
        uc[k] = 0.5 * (u_l[k] + u_r[k]) - pen_fact * (u_l[k] - u_r[k]);
    }
    uc
}

/// LDG common viscous normal flux: centered viscous flux plus the
/// tau-penalty on the solution jump.
pub fn ldg_viscous_flux(
    u_l: ArrayView1<f64>,
    u_r: ArrayView1<f64>,
    fv_l: &Array2<f64>,
    fv_r: &Array2<f64>,
    norm: &[f64],
    params: &Input,
) -> Vec<f64> {
    let ndims = params.nDims;
    let nfields = params.nFields;
    let mut fn_out = vec![0.0; nfields];
    for k in 0..nfields {
        for dim in 0..ndims {
            fn_out[k] += 0.5 * (fv_l[[dim, k]] + fv_r[[dim, k]]) * norm[dim];
        }
        fn_out[k] += params.LDG_tau * (u_l[k] - u_r[k]);
    }
    fn_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ns_params(ndims: usize) -> Input {
        let mut params = Input::default();
        params.equation = Some(Equation::NavierStokes);
        params.nDims_raw = Some(ndims);
        params.finalize();
        params
    }

    #[test]
    fn rusanov_is_consistent() {
        // F(U,U,n) must equal the physical normal flux.
        let params = ns_params(2);
        let u = array![1.2, 0.3, -0.4, 2.5];
        let norm = [0.6, 0.8];
        let fc = rusanov_flux(u.view(), u.view(), &norm, 0.0, &params);

        let mut f = Array2::zeros((2, 4));
        inviscid_flux(u.view(), f.view_mut(), &params);
        for k in 0..4 {
            let fn_exact = f[[0, k]] * norm[0] + f[[1, k]] * norm[1];
            assert!((fc[k] - fn_exact).abs() < 1e-13, "field {}", k);
        }
    }

    #[test]
    fn roe_is_consistent() {
        let params = ns_params(2);
        let u = array![1.0, 0.1, 0.2, 1.9];
        let s = 1.0 / 2.0f64.sqrt();
        let norm = [s, s];
        let fc = roe_flux(u.view(), u.view(), &norm, &params);

        let mut f = Array2::zeros((2, 4));
        inviscid_flux(u.view(), f.view_mut(), &params);
        for k in 0..4 {
            let fn_exact = f[[0, k]] * norm[0] + f[[1, k]] * norm[1];
            assert!((fc[k] - fn_exact).abs() < 1e-13, "field {}", k);
        }
    }

    #[test]
    fn roe_consistent_in_three_dimensions() {
        let params = ns_params(3);
        let u = array![1.1, 0.2, -0.1, 0.3, 2.7];
        let norm = [0.0, 0.6, 0.8];
        let fc = roe_flux(u.view(), u.view(), &norm, &params);

        let mut f = Array2::zeros((3, 5));
        inviscid_flux(u.view(), f.view_mut(), &params);
        for k in 0..5 {
            let fn_exact: f64 = (0..3).map(|d| f[[d, k]] * norm[d]).sum();
            assert!((fc[k] - fn_exact).abs() < 1e-13, "field {}", k);
        }
    }

    #[test]
    fn advection_flux_upwinds() {
        let mut params = Input::default();
        params.advectVx = 1.0;
        params.advectVy = 0.0;
        params.lambda = 1.0;
        params.finalize();
        let u_l = array![2.0];
        let u_r = array![5.0];
        // Wind blows left to right: the fully upwind flux takes the left state.
        let f = rusanov_flux(u_l.view(), u_r.view(), &[1.0, 0.0], 0.0, &params);
        assert!((f[0] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn viscous_ad_flux_is_fickian() {
        let mut params = Input::default();
        params.diffD = 0.1;
        params.finalize();
        let u = array![1.0];
        let du = array![[2.0], [3.0]];
        let mut f = Array2::zeros((2, 1));
        viscous_flux(u.view(), &du, f.view_mut(), &params);
        assert!((f[[0, 0]] + 0.2).abs() < 1e-14);
        assert!((f[[1, 0]] + 0.3).abs() < 1e-14);
    }

    #[test]
    fn ldg_solution_reduces_to_average() {
        let u_l = array![1.0, 2.0];
        let u_r = array![3.0, 4.0];
        let uc = ldg_solution(u_l.view(), u_r.view(), 2, 0.0);
        assert!((uc[0] - 2.0).abs() < 1e-14);
        assert!((uc[1] - 3.0).abs() < 1e-14);
    }
}
