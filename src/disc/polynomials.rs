/// 1-D polynomial building blocks: Lagrange cardinal functions over a
/// node set, Legendre polynomials, and the left/right Radau correction
/// derivatives used to assemble the FR correction operators.

/// Value of the Lagrange cardinal polynomial through `pts` associated
/// with node `mode`, evaluated at `x`.
pub fn lagrange(pts: &[f64], x: f64, mode: usize) -> f64 {
    let mut val = 1.0;
    for (i, &pt) in pts.iter().enumerate() {
        if i != mode {
            val *= (x - pt) / (pts[mode] - pt);
        }
    }
    val
}

/// Derivative of the Lagrange cardinal polynomial at `x`.
pub fn d_lagrange(pts: &[f64], x: f64, mode: usize) -> f64 {
    let mut sum = 0.0;
    for (j, &ptj) in pts.iter().enumerate() {
        if j == mode {
            continue;
        }
        let mut product = 1.0;
        for (m, &ptm) in pts.iter().enumerate() {
            if m != mode && m != j {
                product *= (x - ptm) / (pts[mode] - ptm);
            }
        }
        sum += product / (pts[mode] - ptj);
    }
    sum
}

/// Legendre polynomial P_n(x) by the three-term recurrence.
pub fn legendre(n: usize, x: f64) -> f64 {
    match n {
        0 => 1.0,
        1 => x,
        _ => {
            let mut pm1 = 1.0;
            let mut p = x;
            for k in 1..n {
                let kf = k as f64;
                let pn = ((2.0 * kf + 1.0) * x * p - kf * pm1) / (kf + 1.0);
                pm1 = p;
                p = pn;
            }
            p
        }
    }
}

/// Derivative P'_n(x).
pub fn d_legendre(n: usize, x: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    if (x - 1.0).abs() < 1e-14 {
        return n as f64 * (n as f64 + 1.0) / 2.0;
    }
    if (x + 1.0).abs() < 1e-14 {
        let nf = n as f64;
        let sign = if n % 2 == 0 { -1.0 } else { 1.0 };
        return sign * nf * (nf + 1.0) / 2.0;
    }
    let nf = n as f64;
    nf / (x * x - 1.0) * (x * legendre(n, x) - legendre(n - 1, x))
}

/// Derivative of the left DG correction function
/// g_L = (-1)^p / 2 * (P_p - P_{p+1}) at `x`; g_L(-1) = 1, g_L(1) = 0.
pub fn d_radau_left(p: usize, x: f64) -> f64 {
    let sign = if p % 2 == 0 { 1.0 } else { -1.0 };
    0.5 * sign * (d_legendre(p, x) - d_legendre(p + 1, x))
}

/// Derivative of the right DG correction function
/// g_R = 1/2 * (P_p + P_{p+1}) at `x`; g_R(-1) = 0, g_R(1) = 1.
pub fn d_radau_right(p: usize, x: f64) -> f64 {
    0.5 * (d_legendre(p, x) + d_legendre(p + 1, x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagrange_is_cardinal() {
        let pts = [-0.7745966692414834, 0.0, 0.7745966692414834];
        for i in 0..3 {
            for j in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((lagrange(&pts, pts[j], i) - expect).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn d_lagrange_matches_finite_difference() {
        let pts = [-0.8611363115940526, -0.3399810435848563, 0.3399810435848563, 0.8611363115940526];
        let h = 1e-6;
        for mode in 0..4 {
            let x = 0.3;
            let fd = (lagrange(&pts, x + h, mode) - lagrange(&pts, x - h, mode)) / (2.0 * h);
            assert!((d_lagrange(&pts, x, mode) - fd).abs() < 1e-8);
        }
    }

    #[test]
    fn legendre_recurrence_endpoints() {
        for n in 0..8 {
            assert!((legendre(n, 1.0) - 1.0).abs() < 1e-14);
            let expect = if n % 2 == 0 { 1.0 } else { -1.0 };
            assert!((legendre(n, -1.0) - expect).abs() < 1e-14);
        }
    }

    #[test]
    fn radau_correction_endpoint_values() {
        // g_L is 1 at the left end, 0 at the right end (and vice versa);
        // check via quadrature of the derivative.
        for p in 1..5 {
            let n = 64;
            let mut int_l = 0.0;
            let mut int_r = 0.0;
            let h = 2.0 / n as f64;
            for i in 0..n {
                let x = -1.0 + (i as f64 + 0.5) * h;
                int_l += d_radau_left(p, x) * h;
                int_r += d_radau_right(p, x) * h;
            }
            assert!((int_l + 1.0).abs() < 1e-2, "g_L drop must be -1, p={}", p);
            assert!((int_r - 1.0).abs() < 1e-2, "g_R rise must be +1, p={}", p);
        }
    }
}
