use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};
use statrs::function::gamma::gamma;

use crate::disc::polynomials::legendre;
use crate::input::SptsType;

/// Gauss-Jacobi quadrature nodes and weights on [-1,1] for the weight
/// (1-x)^alpha (1+x)^beta, from the symmetric tridiagonal Jacobi matrix
/// (Golub-Welsch). Eigenvalues come back sorted ascending.
pub fn jacobi_gauss_quadrature(alpha: f64, beta: f64, npts: usize) -> (Array1<f64>, Array1<f64>) {
    assert!(npts >= 1, "quadrature needs at least one point");
    if npts == 1 {
        let x0 = (beta - alpha) / (alpha + beta + 2.0);
        let w0 = 2.0f64.powf(alpha + beta + 1.0) * gamma(alpha + 1.0) * gamma(beta + 1.0)
            / gamma(alpha + beta + 2.0);
        return (Array1::from(vec![x0]), Array1::from(vec![w0]));
    }

    let dim = npts;
    let mut j = Array2::<f64>::zeros((dim, dim));
    let h1: Vec<f64> = (0..dim).map(|k| 2.0 * k as f64 + alpha + beta).collect();

    for k in 0..dim {
        let denom = h1[k] * (h1[k] + 2.0);
        let mut d = -0.5 * (alpha * alpha - beta * beta) / denom;
        if k == 0 && (alpha + beta).abs() < 10.0 * f64::EPSILON {
            d = 0.0;
        }
        j[[k, k]] = d;
    }
    for k in 0..dim - 1 {
        let l = k as f64 + 1.0;
        let numer = l * (l + alpha + beta) * (l + alpha) * (l + beta);
        let denom = (h1[k] + 1.0) * (h1[k] + 3.0);
        let off = (2.0 / (h1[k] + 2.0)) * (numer / denom).sqrt();
        j[[k, k + 1]] = off;
        j[[k + 1, k]] = off;
    }

    let (eigenvalues, eigenvectors) = j
        .eigh(UPLO::Lower)
        .expect("eigenvalue decomposition failed");
    let mu0 = 2.0f64.powf(alpha + beta + 1.0) * gamma(alpha + 1.0) * gamma(beta + 1.0)
        / gamma(alpha + beta + 2.0);
    let weights = eigenvectors.row(0).mapv(|v| v * v * mu0);

    (eigenvalues, weights)
}

/// Gauss-Legendre points and weights on [-1,1].
pub fn legendre_points(npts: usize) -> (Vec<f64>, Vec<f64>) {
    let (x, w) = jacobi_gauss_quadrature(0.0, 0.0, npts);
    (x.to_vec(), w.to_vec())
}

/// Gauss-Lobatto points and weights on [-1,1]. Interior nodes are the
/// Gauss-Jacobi(1,1) points; w_i = 2 / (n(n-1) P_{n-1}(x_i)^2).
pub fn lobatto_points(npts: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(npts >= 2, "Lobatto rule needs at least two points");
    let mut x = vec![0.0; npts];
    x[0] = -1.0;
    x[npts - 1] = 1.0;
    if npts > 2 {
        let (xi, _) = jacobi_gauss_quadrature(1.0, 1.0, npts - 2);
        for (k, &v) in xi.iter().enumerate() {
            x[k + 1] = v;
        }
    }
    let nf = npts as f64;
    let w = x
        .iter()
        .map(|&xi| {
            let p = legendre(npts - 1, xi);
            2.0 / (nf * (nf - 1.0) * p * p)
        })
        .collect();
    (x, w)
}

/// 1-D point distribution selected by the configuration.
pub fn pts_1d(spts_type: SptsType, order: usize) -> Vec<f64> {
    match spts_type {
        SptsType::Legendre => legendre_points(order + 1).0,
        SptsType::Lobatto => lobatto_points(order + 1).0,
    }
}

/// Tensor-product quadrature weights over the (order+1)^ndims solution
/// points, x-index fastest.
pub fn qpt_weights(spts_type: SptsType, order: usize, ndims: usize) -> Vec<f64> {
    let w1 = match spts_type {
        SptsType::Legendre => legendre_points(order + 1).1,
        SptsType::Lobatto => lobatto_points(order + 1).1,
    };
    let n = order + 1;
    let mut out = Vec::with_capacity(n.pow(ndims as u32));
    match ndims {
        2 => {
            for j in 0..n {
                for i in 0..n {
                    out.push(w1[i] * w1[j]);
                }
            }
        }
        3 => {
            for k in 0..n {
                for j in 0..n {
                    for i in 0..n {
                        out.push(w1[i] * w1[j] * w1[k]);
                    }
                }
            }
        }
        _ => panic!("unsupported number of dimensions {}", ndims),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legendre_points_match_tabulated() {
        let (x, w) = legendre_points(3);
        assert!((x[0] + 0.7745966692414834).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
        assert!((x[2] - 0.7745966692414834).abs() < 1e-12);
        assert!((w[0] - 0.5555555555555556).abs() < 1e-12);
        assert!((w[1] - 0.8888888888888888).abs() < 1e-12);
    }

    #[test]
    fn lobatto_points_match_tabulated() {
        let (x, w) = lobatto_points(4);
        let sqrt5 = 5.0f64.sqrt();
        assert!((x[0] + 1.0).abs() < 1e-14);
        assert!((x[1] + sqrt5 / 5.0).abs() < 1e-12);
        assert!((x[2] - sqrt5 / 5.0).abs() < 1e-12);
        assert!((x[3] - 1.0).abs() < 1e-14);
        assert!((w[0] - 1.0 / 12.0 * 2.0).abs() < 1e-12);
        assert!((w[1] - 5.0 / 12.0 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn rules_integrate_polynomials_exactly() {
        // n-point Gauss is exact through degree 2n-1.
        for n in 1..8 {
            let (x, w) = legendre_points(n);
            let deg = 2 * n - 1;
            let exact = if deg % 2 == 0 {
                2.0 / (deg as f64 + 1.0)
            } else {
                0.0
            };
            let approx: f64 = x.iter().zip(&w).map(|(&xi, &wi)| wi * xi.powi(deg as i32)).sum();
            assert!(
                (approx - exact).abs() < 1e-12,
                "degree {} failed: {} vs {}",
                deg,
                approx,
                exact
            );
        }
    }

    #[test]
    fn tensor_weights_sum_to_reference_volume() {
        let w2 = qpt_weights(SptsType::Legendre, 3, 2);
        assert!((w2.iter().sum::<f64>() - 4.0).abs() < 1e-12);
        let w3 = qpt_weights(SptsType::Legendre, 2, 3);
        assert!((w3.iter().sum::<f64>() - 8.0).abs() < 1e-12);
    }
}
