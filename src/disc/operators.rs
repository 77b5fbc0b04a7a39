use std::ops::AddAssign;

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView2, ArrayViewMut2};
use ndarray_linalg::Inverse;

use crate::disc::gauss_points::{pts_1d, qpt_weights};
use crate::disc::point::Point;
use crate::disc::polynomials::{d_lagrange, d_radau_left, d_radau_right, lagrange, legendre};
use crate::disc::shape::{loc_fpts, loc_ppts, loc_spts, ref_normals_fpts, ElementType};
use crate::input::Input;

/// Explicit-RK CFL limit of the FR scheme at polynomial order p.
pub fn cfl_limit(order: usize) -> f64 {
    1.0 / (2.0 * order as f64 + 1.0)
}

/// All reusable dense operators for one (element type, order) pair.
/// Built once at setup, read-only afterwards.
pub struct Operators {
    pub etype: ElementType,
    pub order: usize,
    pub n_spts: usize,
    pub n_fpts: usize,
    pub spts_1d: Vec<f64>,

    /// (nFpts, nSpts) solution extrapolation to flux points.
    pub opp_spts_to_fpts: Array2<f64>,
    /// (nNodes, nSpts) solution extrapolation to the element's corner nodes.
    pub opp_spts_to_mpts: Array2<f64>,
    /// (nPpts, nSpts) solution extrapolation to plot points.
    pub opp_spts_to_ppts: Array2<f64>,
    /// Per reference dimension, (nSpts, nSpts) nodal derivative.
    pub opp_grad_spts: Vec<Array2<f64>>,
    /// (nSpts, nFpts) divergence of the g_DG correction functions.
    pub opp_correct: Array2<f64>,
    /// Per reference dimension, opp_correct scaled by the reference normal.
    pub opp_correct_u: Vec<Array2<f64>>,

    /// Quadrature weights collocated at the solution points.
    pub qwts_spts: Array1<f64>,
    /// Modal (normalized tensor-Legendre) Vandermonde at the spts + inverse.
    pub vandermonde: Array2<f64>,
    pub inv_vandermonde: Array2<f64>,
}

impl Operators {
    pub fn new(etype: ElementType, order: usize, params: &Input) -> Self {
        if etype == ElementType::Tri {
            panic!("element type not yet implemented: triangle operators");
        }

        let ndims = etype.n_dims();
        let n_spts = etype.n_spts(order);
        let n_fpts = etype.n_fpts(order);
        let spts_1d = pts_1d(params.spts_type_quad, order);
        let spts = loc_spts(etype, order, params.spts_type_quad);
        let fpts = loc_fpts(etype, order, params.spts_type_quad);
        let ppts = loc_ppts(etype, order, params.spts_type_quad);
        let tnorm = ref_normals_fpts(etype, order);

        let opp_spts_to_fpts = interp_matrix(&spts_1d, &fpts, ndims);
        let opp_spts_to_ppts = interp_matrix(&spts_1d, &ppts, ndims);

        // Corner-node locations in the reference element, CCW per face.
        let corners: Vec<Point> = match etype {
            ElementType::Quad => vec![
                Point::new(-1.0, -1.0, 0.0),
                Point::new(1.0, -1.0, 0.0),
                Point::new(1.0, 1.0, 0.0),
                Point::new(-1.0, 1.0, 0.0),
            ],
            ElementType::Hex => vec![
                Point::new(-1.0, -1.0, -1.0),
                Point::new(1.0, -1.0, -1.0),
                Point::new(1.0, 1.0, -1.0),
                Point::new(-1.0, 1.0, -1.0),
                Point::new(-1.0, -1.0, 1.0),
                Point::new(1.0, -1.0, 1.0),
                Point::new(1.0, 1.0, 1.0),
                Point::new(-1.0, 1.0, 1.0),
            ],
            ElementType::Tri => unreachable!(),
        };
        let opp_spts_to_mpts = interp_matrix(&spts_1d, &corners, ndims);

        // Nodal derivative operators, one per reference direction.
        let mut opp_grad_spts = Vec::with_capacity(ndims);
        for dim in 0..ndims {
            let mut opp = Array2::<f64>::zeros((n_spts, n_spts));
            for (i, spt_i) in spts.iter().enumerate() {
                for (j, spt_j) in spts.iter().enumerate() {
                    let mut val = 1.0;
                    for d in 0..ndims {
                        let mode = index_1d(&spts_1d, spt_j[d]);
                        if d == dim {
                            val *= d_lagrange(&spts_1d, spt_i[d], mode);
                        } else {
                            val *= lagrange(&spts_1d, spt_i[d], mode);
                        }
                    }
                    opp[[i, j]] = val;
                }
            }
            opp_grad_spts.push(opp);
        }

        // Correction operator: the derivative of the DG (right-Radau)
        // correction function in the face-normal direction, collocated
        // on the tangential Lagrange basis.
        let mut opp_correct = Array2::<f64>::zeros((n_spts, n_fpts));
        for (f, fpt) in fpts.iter().enumerate() {
            let mut ndim = 0;
            let mut side = 0.0;
            for d in 0..ndims {
                if tnorm[[f, d]] != 0.0 {
                    ndim = d;
                    side = tnorm[[f, d]];
                }
            }
            for (i, spt) in spts.iter().enumerate() {
                let mut tang = 1.0;
                for d in 0..ndims {
                    if d != ndim {
                        let mode = index_1d(&spts_1d, fpt[d]);
                        tang *= lagrange(&spts_1d, spt[d], mode);
                    }
                }
                let dg = if side < 0.0 {
                    -d_radau_left(order, spt[ndim])
                } else {
                    d_radau_right(order, spt[ndim])
                };
                opp_correct[[i, f]] = dg * tang;
            }
        }

        let mut opp_correct_u = Vec::with_capacity(ndims);
        for dim in 0..ndims {
            let mut opp = Array2::<f64>::zeros((n_spts, n_fpts));
            for f in 0..n_fpts {
                for i in 0..n_spts {
                    opp[[i, f]] = opp_correct[[i, f]] * tnorm[[f, dim]];
                }
            }
            opp_correct_u.push(opp);
        }

        let qwts_spts = Array1::from(qpt_weights(params.spts_type_quad, order, ndims));

        // Normalized tensor-Legendre modal basis for the shock sensor.
        let mut vandermonde = Array2::<f64>::zeros((n_spts, n_spts));
        for (i, spt) in spts.iter().enumerate() {
            for m in 0..n_spts {
                let modes = decompose(m, order + 1, ndims);
                let mut val = 1.0;
                for d in 0..ndims {
                    let n = modes[d];
                    val *= legendre(n, spt[d]) * ((2.0 * n as f64 + 1.0) / 2.0).sqrt();
                }
                vandermonde[[i, m]] = val;
            }
        }
        let inv_vandermonde = vandermonde.inv().expect("Vandermonde matrix is singular");

        Operators {
            etype,
            order,
            n_spts,
            n_fpts,
            spts_1d,
            opp_spts_to_fpts,
            opp_spts_to_mpts,
            opp_spts_to_ppts,
            opp_grad_spts,
            opp_correct,
            opp_correct_u,
            qwts_spts,
            vandermonde,
            inv_vandermonde,
        }
    }

    pub fn apply_spts_fpts(&self, u_spts: ArrayView2<f64>, mut u_fpts: ArrayViewMut2<f64>) {
        u_fpts.assign(&self.opp_spts_to_fpts.dot(&u_spts));
    }

    pub fn apply_spts_mpts(&self, u_spts: ArrayView2<f64>, mut u_mpts: ArrayViewMut2<f64>) {
        u_mpts.assign(&self.opp_spts_to_mpts.dot(&u_spts));
    }

    pub fn apply_spts_ppts(&self, u_spts: ArrayView2<f64>, mut u_ppts: ArrayViewMut2<f64>) {
        u_ppts.assign(&self.opp_spts_to_ppts.dot(&u_spts));
    }

    /// Reference-space gradient of a nodal field; `du` is (nDims, nSpts, nFields).
    pub fn apply_grad_spts(&self, u_spts: ArrayView2<f64>, du_spts: &mut Array3<f64>) {
        for (dim, opp) in self.opp_grad_spts.iter().enumerate() {
            du_spts
                .slice_mut(s![dim, .., ..])
                .assign(&opp.dot(&u_spts));
        }
    }

    /// Reference gradient of each flux component:
    /// df[(d_deriv, d_flux)] = d F_{d_flux} / d xi_{d_deriv}.
    pub fn apply_grad_f_spts(&self, f_spts: &Array3<f64>, df_spts: &mut Array4<f64>) {
        for (d1, opp) in self.opp_grad_spts.iter().enumerate() {
            for d2 in 0..self.opp_grad_spts.len() {
                df_spts
                    .slice_mut(s![d1, d2, .., ..])
                    .assign(&opp.dot(&f_spts.slice(s![d2, .., ..])));
            }
        }
    }

    /// Standard conservative divergence of the reference flux.
    pub fn apply_div_f_spts(&self, f_spts: &Array3<f64>, mut div_f: ArrayViewMut2<f64>) {
        div_f.fill(0.0);
        for (dim, opp) in self.opp_grad_spts.iter().enumerate() {
            div_f += &opp.dot(&f_spts.slice(s![dim, .., ..]));
        }
    }

    /// Add the correction-function lift of the normal-flux jump.
    pub fn apply_correct_div_f(&self, dfn_fpts: ArrayView2<f64>, mut div_f: ArrayViewMut2<f64>) {
        div_f += &self.opp_correct.dot(&dfn_fpts);
    }

    /// Correct the reference gradient with the interface-solution jump
    /// and transform the result to the physical gradient in place.
    pub fn apply_correct_grad_u(
        &self,
        duc_fpts: ArrayView2<f64>,
        du_spts: &mut Array3<f64>,
        jginv_spts: &Array3<f64>,
        det_jac_spts: &Array1<f64>,
    ) {
        let ndims = self.opp_grad_spts.len();
        let nfields = duc_fpts.shape()[1];

        for (dim, opp) in self.opp_correct_u.iter().enumerate() {
            let lift = opp.dot(&duc_fpts);
            du_spts.slice_mut(s![dim, .., ..]).add_assign(&lift);
        }

        // du_phys_i = (1/detJ) sum_j JGinv_ji du_ref_j
        let mut du_ref = vec![0.0; ndims];
        for spt in 0..self.n_spts {
            let inv_det = 1.0 / det_jac_spts[spt];
            for k in 0..nfields {
                for (d, val) in du_ref.iter_mut().enumerate() {
                    *val = du_spts[[d, spt, k]];
                }
                for i in 0..ndims {
                    let mut acc = 0.0;
                    for (j, val) in du_ref.iter().enumerate() {
                        acc += jginv_spts[[spt, j, i]] * val;
                    }
                    du_spts[[i, spt, k]] = acc * inv_det;
                }
            }
        }
    }

    /// Extrapolate the normal component of the flux tensor to the flux
    /// points: disFn(f,k) = sum_d (opp F_d)(f,k) n(f,d), optionally
    /// scaled by the area element (physical-normal variant).
    pub fn apply_extrapolate_fn(
        &self,
        f_spts: &Array3<f64>,
        norms: ArrayView2<f64>,
        mut dis_fn: ArrayViewMut2<f64>,
        da: Option<&Array1<f64>>,
    ) {
        let ndims = self.opp_grad_spts.len();
        dis_fn.fill(0.0);
        for dim in 0..ndims {
            let f_fpts = self.opp_spts_to_fpts.dot(&f_spts.slice(s![dim, .., ..]));
            for fpt in 0..self.n_fpts {
                let scale = norms[[fpt, dim]] * da.map_or(1.0, |a| a[fpt]);
                for k in 0..dis_fn.shape()[1] {
                    dis_fn[[fpt, k]] += f_fpts[[fpt, k]] * scale;
                }
            }
        }
    }

    /// Quadrature mean of the solution over the element.
    pub fn calc_avg_u(
        &self,
        u_spts: ArrayView2<f64>,
        det_jac_spts: &Array1<f64>,
        u_avg: &mut [f64],
    ) {
        let nfields = u_spts.shape()[1];
        let mut vol = 0.0;
        u_avg.iter_mut().for_each(|v| *v = 0.0);
        for spt in 0..self.n_spts {
            let w = self.qwts_spts[spt] * det_jac_spts[spt];
            vol += w;
            for k in 0..nfields {
                u_avg[k] += w * u_spts[[spt, k]];
            }
        }
        for k in 0..nfields {
            u_avg[k] /= vol;
        }
    }

    /// Interpolate a nodal field to arbitrary reference locations.
    pub fn interpolate_spts_to_points(
        &self,
        field: ArrayView2<f64>,
        points: &[Point],
    ) -> Array2<f64> {
        let opp = interp_matrix(&self.spts_1d, points, self.opp_grad_spts.len());
        opp.dot(&field)
    }

    /// Modal-decay shock sensor (relative energy of the highest modes,
    /// log10 scale) of the leading field.
    pub fn shock_sensor(&self, u_spts: ArrayView2<f64>) -> f64 {
        let ndims = self.opp_grad_spts.len();
        let u0 = u_spts.slice(s![.., 0]);
        let modal = self.inv_vandermonde.dot(&u0);
        let mut total = 0.0;
        let mut top = 0.0;
        for (m, &coeff) in modal.iter().enumerate() {
            let modes = decompose(m, self.order + 1, ndims);
            let e = coeff * coeff;
            total += e;
            if modes.iter().take(ndims).any(|&n| n == self.order) {
                top += e;
            }
        }
        if total < 1e-14 {
            return -16.0;
        }
        (top / total).max(1e-16).log10()
    }
}

/// Tensor-product Lagrange interpolation matrix from the solution points
/// to an arbitrary point set.
fn interp_matrix(spts_1d: &[f64], points: &[Point], ndims: usize) -> Array2<f64> {
    let n1 = spts_1d.len();
    let n_spts = n1.pow(ndims as u32);
    let mut opp = Array2::<f64>::zeros((points.len(), n_spts));
    for (row, pt) in points.iter().enumerate() {
        for col in 0..n_spts {
            let modes = decompose(col, n1, ndims);
            let mut val = 1.0;
            for d in 0..ndims {
                val *= lagrange(spts_1d, pt[d], modes[d]);
            }
            opp[[row, col]] = val;
        }
    }
    opp
}

/// Split a flattened tensor index into per-dimension indices, x fastest.
fn decompose(index: usize, n1: usize, ndims: usize) -> [usize; 3] {
    let mut out = [0; 3];
    let mut rem = index;
    for d in 0..ndims {
        out[d] = rem % n1;
        rem /= n1;
    }
    out
}

/// Index of a coordinate within the 1-D point set.
fn index_1d(pts: &[f64], x: f64) -> usize {
    for (i, &p) in pts.iter().enumerate() {
        if (p - x).abs() < 1e-10 {
            return i;
        }
    }
    panic!("coordinate {} is not a solution-point abscissa", x);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn quad_opers(order: usize) -> Operators {
        let params = Input::default();
        Operators::new(ElementType::Quad, order, &params)
    }

    #[test]
    fn extrapolation_preserves_constants() {
        let opers = quad_opers(3);
        let u = Array2::from_elem((opers.n_spts, 1), 2.5);
        let mut uf = Array2::zeros((opers.n_fpts, 1));
        opers.apply_spts_fpts(u.view(), uf.view_mut());
        for fpt in 0..opers.n_fpts {
            assert!((uf[[fpt, 0]] - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn gradient_operator_differentiates_polynomials() {
        let params = Input::default();
        let opers = Operators::new(ElementType::Quad, 3, &params);
        let spts = loc_spts(ElementType::Quad, 3, params.spts_type_quad);
        // u = x^2 y  =>  du/dx = 2xy, du/dy = x^2
        let mut u = Array2::zeros((opers.n_spts, 1));
        for (i, pt) in spts.iter().enumerate() {
            u[[i, 0]] = pt.x * pt.x * pt.y;
        }
        let mut du = Array3::zeros((2, opers.n_spts, 1));
        opers.apply_grad_spts(u.view(), &mut du);
        for (i, pt) in spts.iter().enumerate() {
            assert!((du[[0, i, 0]] - 2.0 * pt.x * pt.y).abs() < 1e-11);
            assert!((du[[1, i, 0]] - pt.x * pt.x).abs() < 1e-11);
        }
    }

    #[test]
    fn correction_operator_is_finite_volume_at_p0() {
        // At p=0 the corrected divergence must reduce to the finite-volume
        // surface sum: each face contributes dFn/2 on the single spt.
        let opers = quad_opers(0);
        let mut dfn = Array2::zeros((4, 1));
        dfn.fill(1.0);
        let mut divf = Array2::zeros((1, 1));
        opers.apply_correct_div_f(dfn.view(), divf.view_mut());
        assert!((divf[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn interpolation_recovers_nodal_values() {
        let params = Input::default();
        let opers = Operators::new(ElementType::Quad, 2, &params);
        let spts = loc_spts(ElementType::Quad, 2, params.spts_type_quad);
        let mut u = Array2::zeros((opers.n_spts, 1));
        for (i, pt) in spts.iter().enumerate() {
            u[[i, 0]] = 3.0 * pt.x - pt.y + 0.5 * pt.x * pt.y;
        }
        let out = opers.interpolate_spts_to_points(u.view(), &spts);
        for i in 0..opers.n_spts {
            assert!((out[[i, 0]] - u[[i, 0]]).abs() < 1e-12);
        }
    }

    #[test]
    fn avg_of_linear_field_is_centroid_value() {
        let params = Input::default();
        let opers = Operators::new(ElementType::Quad, 2, &params);
        let spts = loc_spts(ElementType::Quad, 2, params.spts_type_quad);
        let mut u = Array2::zeros((opers.n_spts, 1));
        for (i, pt) in spts.iter().enumerate() {
            u[[i, 0]] = 1.0 + 2.0 * pt.x + 3.0 * pt.y;
        }
        let det = Array1::from_elem(opers.n_spts, 1.0);
        let mut avg = [0.0];
        opers.calc_avg_u(u.view(), &det, &mut avg);
        assert!((avg[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn smooth_field_has_low_sensor() {
        let params = Input::default();
        let opers = Operators::new(ElementType::Quad, 4, &params);
        let spts = loc_spts(ElementType::Quad, 4, params.spts_type_quad);
        let mut smooth = Array2::zeros((opers.n_spts, 1));
        let mut rough = Array2::zeros((opers.n_spts, 1));
        for (i, pt) in spts.iter().enumerate() {
            smooth[[i, 0]] = 1.0 + 0.1 * pt.x;
            rough[[i, 0]] = legendre(4, pt.x);
        }
        assert!(opers.shock_sensor(smooth.view()) < -10.0);
        assert!(opers.shock_sensor(rough.view()) > -1.0);
    }
}
