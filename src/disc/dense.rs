use ndarray::Array2;

/// Determinant of a small square matrix (1x1 through 4x4), by cofactor
/// expansion. The transformation Jacobians never grow past (nDims+1).
pub fn det(m: &Array2<f64>) -> f64 {
    let n = m.shape()[0];
    assert_eq!(n, m.shape()[1], "determinant needs a square matrix");
    match n {
        1 => m[[0, 0]],
        2 => m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]],
        3 => {
            m[[0, 0]] * (m[[1, 1]] * m[[2, 2]] - m[[1, 2]] * m[[2, 1]])
                - m[[0, 1]] * (m[[1, 0]] * m[[2, 2]] - m[[1, 2]] * m[[2, 0]])
                + m[[0, 2]] * (m[[1, 0]] * m[[2, 1]] - m[[1, 1]] * m[[2, 0]])
        }
        4 => {
            let mut val = 0.0;
            for col in 0..4 {
                let sign = if col % 2 == 0 { 1.0 } else { -1.0 };
                val += sign * m[[0, col]] * det(&minor(m, 0, col));
            }
            val
        }
        _ => panic!("determinant not implemented for {}x{} matrices", n, n),
    }
}

/// Matrix of cofactors (adjugate): adj(M) = det(M) * M^-1.
pub fn adjoint(m: &Array2<f64>) -> Array2<f64> {
    let n = m.shape()[0];
    assert_eq!(n, m.shape()[1], "adjoint needs a square matrix");
    let mut adj = Array2::<f64>::zeros((n, n));
    if n == 1 {
        adj[[0, 0]] = 1.0;
        return adj;
    }
    for i in 0..n {
        for j in 0..n {
            let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
            // Transpose of the cofactor matrix.
            adj[[j, i]] = sign * det(&minor(m, i, j));
        }
    }
    adj
}

fn minor(m: &Array2<f64>, row: usize, col: usize) -> Array2<f64> {
    let n = m.shape()[0];
    let mut out = Array2::<f64>::zeros((n - 1, n - 1));
    let mut r_out = 0;
    for r in 0..n {
        if r == row {
            continue;
        }
        let mut c_out = 0;
        for c in 0..n {
            if c == col {
                continue;
            }
            out[[r_out, c_out]] = m[[r, c]];
            c_out += 1;
        }
        r_out += 1;
    }
    out
}
