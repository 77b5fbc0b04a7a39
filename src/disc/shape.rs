use ndarray::Array2;

use crate::disc::gauss_points::pts_1d;
use crate::disc::point::Point;
use crate::input::SptsType;

/// Element reference-shape tags. Only quads and hexes carry a full FR
/// implementation; triangles exist for the supermesh helper and fail
/// fatally if used as solution elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Tri,
    Quad,
    Hex,
}

impl ElementType {
    pub fn n_dims(&self) -> usize {
        match self {
            ElementType::Tri | ElementType::Quad => 2,
            ElementType::Hex => 3,
        }
    }

    pub fn n_nodes(&self) -> usize {
        match self {
            ElementType::Tri => 3,
            ElementType::Quad => 4,
            ElementType::Hex => 8,
        }
    }

    pub fn n_faces(&self) -> usize {
        match self {
            ElementType::Tri => 3,
            ElementType::Quad => 4,
            ElementType::Hex => 6,
        }
    }

    pub fn n_spts(&self, order: usize) -> usize {
        let n = order + 1;
        match self {
            ElementType::Tri => n * (n + 1) / 2,
            ElementType::Quad => n * n,
            ElementType::Hex => n * n * n,
        }
    }

    pub fn n_fpts(&self, order: usize) -> usize {
        let n = order + 1;
        match self {
            ElementType::Tri => 3 * n,
            ElementType::Quad => 4 * n,
            ElementType::Hex => 6 * n * n,
        }
    }

    /// Flux points per single face.
    pub fn n_fpts_face(&self, order: usize) -> usize {
        self.n_fpts(order) / self.n_faces()
    }

    pub fn n_ppts(&self, order: usize) -> usize {
        let n = order + 3;
        match self {
            ElementType::Quad => n * n,
            ElementType::Hex => n * n * n,
            ElementType::Tri => panic!("triangle elements not supported"),
        }
    }
}

/// Bilinear quad shape-function values, node order CCW from (-1,-1).
pub fn shape_quad(loc: &Point, out: &mut [f64]) {
    let (xi, eta) = (loc.x, loc.y);
    out[0] = 0.25 * (1.0 - xi) * (1.0 - eta);
    out[1] = 0.25 * (1.0 + xi) * (1.0 - eta);
    out[2] = 0.25 * (1.0 + xi) * (1.0 + eta);
    out[3] = 0.25 * (1.0 - xi) * (1.0 + eta);
}

/// Reference-space derivatives of the quad shape functions; out is
/// (nNodes, nDims).
pub fn dshape_quad(loc: &Point, out: &mut Array2<f64>) {
    let (xi, eta) = (loc.x, loc.y);
    out[[0, 0]] = -0.25 * (1.0 - eta);
    out[[0, 1]] = -0.25 * (1.0 - xi);
    out[[1, 0]] = 0.25 * (1.0 - eta);
    out[[1, 1]] = -0.25 * (1.0 + xi);
    out[[2, 0]] = 0.25 * (1.0 + eta);
    out[[2, 1]] = 0.25 * (1.0 + xi);
    out[[3, 0]] = -0.25 * (1.0 + eta);
    out[[3, 1]] = 0.25 * (1.0 - xi);
}

/// Trilinear hex shape-function values; bottom face CCW then top face CCW.
pub fn shape_hex(loc: &Point, out: &mut [f64]) {
    let (xi, eta, mu) = (loc.x, loc.y, loc.z);
    out[0] = 0.125 * (1.0 - xi) * (1.0 - eta) * (1.0 - mu);
    out[1] = 0.125 * (1.0 + xi) * (1.0 - eta) * (1.0 - mu);
    out[2] = 0.125 * (1.0 + xi) * (1.0 + eta) * (1.0 - mu);
    out[3] = 0.125 * (1.0 - xi) * (1.0 + eta) * (1.0 - mu);
    out[4] = 0.125 * (1.0 - xi) * (1.0 - eta) * (1.0 + mu);
    out[5] = 0.125 * (1.0 + xi) * (1.0 - eta) * (1.0 + mu);
    out[6] = 0.125 * (1.0 + xi) * (1.0 + eta) * (1.0 + mu);
    out[7] = 0.125 * (1.0 - xi) * (1.0 + eta) * (1.0 + mu);
}

pub fn dshape_hex(loc: &Point, out: &mut Array2<f64>) {
    let (xi, eta, mu) = (loc.x, loc.y, loc.z);
    let signs: [(f64, f64, f64); 8] = [
        (-1.0, -1.0, -1.0),
        (1.0, -1.0, -1.0),
        (1.0, 1.0, -1.0),
        (-1.0, 1.0, -1.0),
        (-1.0, -1.0, 1.0),
        (1.0, -1.0, 1.0),
        (1.0, 1.0, 1.0),
        (-1.0, 1.0, 1.0),
    ];
    for (i, &(sx, sy, sz)) in signs.iter().enumerate() {
        out[[i, 0]] = 0.125 * sx * (1.0 + sy * eta) * (1.0 + sz * mu);
        out[[i, 1]] = 0.125 * sy * (1.0 + sx * xi) * (1.0 + sz * mu);
        out[[i, 2]] = 0.125 * sz * (1.0 + sx * xi) * (1.0 + sy * eta);
    }
}

/// Linear triangle shape functions on the (-1,-1)/(1,-1)/(-1,1)
/// reference triangle; kept for the supermesh helper.
pub fn shape_tri(loc: &Point, out: &mut [f64]) {
    out[0] = -0.5 * (loc.x + loc.y);
    out[1] = 0.5 * (1.0 + loc.x);
    out[2] = 0.5 * (1.0 + loc.y);
}

/// Shape values dispatched on element type.
pub fn shape(etype: ElementType, loc: &Point, out: &mut [f64]) {
    match etype {
        ElementType::Tri => shape_tri(loc, out),
        ElementType::Quad => shape_quad(loc, out),
        ElementType::Hex => shape_hex(loc, out),
    }
}

pub fn dshape(etype: ElementType, loc: &Point, out: &mut Array2<f64>) {
    match etype {
        ElementType::Quad => dshape_quad(loc, out),
        ElementType::Hex => dshape_hex(loc, out),
        ElementType::Tri => panic!("element type not yet implemented"),
    }
}

/// Reference solution-point locations; tensor product with the x index
/// running fastest.
pub fn loc_spts(etype: ElementType, order: usize, spts_type: SptsType) -> Vec<Point> {
    let pts = pts_1d(spts_type, order);
    let n = order + 1;
    let mut out = Vec::with_capacity(etype.n_spts(order));
    match etype {
        ElementType::Quad => {
            for j in 0..n {
                for i in 0..n {
                    out.push(Point::new(pts[i], pts[j], 0.0));
                }
            }
        }
        ElementType::Hex => {
            for k in 0..n {
                for j in 0..n {
                    for i in 0..n {
                        out.push(Point::new(pts[i], pts[j], pts[k]));
                    }
                }
            }
        }
        ElementType::Tri => panic!("element type not yet implemented"),
    }
    out
}

/// Reference flux-point locations. Quad faces run counter-clockwise
/// (bottom, right, top, left); hex faces are ordered bottom, top, left,
/// right, front, back with the in-face index layouts that make opposite
/// faces of neighboring elements traverse matching physical points.
pub fn loc_fpts(etype: ElementType, order: usize, spts_type: SptsType) -> Vec<Point> {
    let pts = pts_1d(spts_type, order);
    let n = order + 1;
    let p = order;
    let mut out = Vec::with_capacity(etype.n_fpts(order));
    match etype {
        ElementType::Quad => {
            for i in 0..n {
                out.push(Point::new(pts[i], -1.0, 0.0)); // bottom, left to right
            }
            for i in 0..n {
                out.push(Point::new(1.0, pts[i], 0.0)); // right, bottom to top
            }
            for i in 0..n {
                out.push(Point::new(pts[p - i], 1.0, 0.0)); // top, right to left
            }
            for i in 0..n {
                out.push(Point::new(-1.0, pts[p - i], 0.0)); // left, top to bottom
            }
        }
        ElementType::Hex => {
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(pts[a], pts[b], -1.0)); // bottom
                }
            }
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(pts[p - a], pts[b], 1.0)); // top
                }
            }
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(-1.0, pts[a], pts[b])); // left
                }
            }
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(1.0, pts[p - a], pts[b])); // right
                }
            }
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(pts[p - a], -1.0, pts[b])); // front
                }
            }
            for b in 0..n {
                for a in 0..n {
                    out.push(Point::new(pts[a], 1.0, pts[b])); // back
                }
            }
        }
        ElementType::Tri => panic!("element type not yet implemented"),
    }
    out
}

/// Reference plot-point locations: the solution-point tensor grid
/// augmented with the two endpoints per direction, so element corners
/// are interpolated exactly. x index fastest.
pub fn loc_ppts(etype: ElementType, order: usize, spts_type: SptsType) -> Vec<Point> {
    let mut pts = vec![-1.0];
    pts.extend(pts_1d(spts_type, order));
    pts.push(1.0);
    let n = order + 3;
    let mut out = Vec::with_capacity(etype.n_ppts(order));
    match etype {
        ElementType::Quad => {
            for j in 0..n {
                for i in 0..n {
                    out.push(Point::new(pts[i], pts[j], 0.0));
                }
            }
        }
        ElementType::Hex => {
            for k in 0..n {
                for j in 0..n {
                    for i in 0..n {
                        out.push(Point::new(pts[i], pts[j], pts[k]));
                    }
                }
            }
        }
        ElementType::Tri => panic!("element type not yet implemented"),
    }
    out
}

/// Constant reference outward normals at each flux point.
pub fn ref_normals_fpts(etype: ElementType, order: usize) -> Array2<f64> {
    let nfpts = etype.n_fpts(order);
    let per_face = etype.n_fpts_face(order);
    let ndims = etype.n_dims();
    let mut tnorm = Array2::<f64>::zeros((nfpts, ndims));
    let face_normals: &[[f64; 3]] = match etype {
        ElementType::Quad => &[
            [0.0, -1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [-1.0, 0.0, 0.0],
        ],
        ElementType::Hex => &[
            [0.0, 0.0, -1.0],
            [0.0, 0.0, 1.0],
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 1.0, 0.0],
        ],
        ElementType::Tri => panic!("element type not yet implemented"),
    };
    for fpt in 0..nfpts {
        let face = fpt / per_face;
        for dim in 0..ndims {
            tnorm[[fpt, dim]] = face_normals[face][dim];
        }
    }
    tnorm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_shape_partition_of_unity() {
        let mut s = [0.0; 4];
        shape_quad(&Point::new(0.3, -0.7, 0.0), &mut s);
        assert!((s.iter().sum::<f64>() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn hex_shape_interpolates_nodes() {
        let corners = [
            Point::new(-1.0, -1.0, -1.0),
            Point::new(1.0, -1.0, -1.0),
            Point::new(1.0, 1.0, -1.0),
            Point::new(-1.0, 1.0, -1.0),
            Point::new(-1.0, -1.0, 1.0),
            Point::new(1.0, -1.0, 1.0),
            Point::new(1.0, 1.0, 1.0),
            Point::new(-1.0, 1.0, 1.0),
        ];
        let mut s = [0.0; 8];
        for (i, c) in corners.iter().enumerate() {
            shape_hex(c, &mut s);
            for (j, &v) in s.iter().enumerate() {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((v - expect).abs() < 1e-14);
            }
        }
    }

    #[test]
    fn dshape_quad_matches_finite_difference() {
        let loc = Point::new(0.2, -0.4, 0.0);
        let mut ds = Array2::zeros((4, 2));
        dshape_quad(&loc, &mut ds);
        let h = 1e-6;
        let mut sp = [0.0; 4];
        let mut sm = [0.0; 4];
        shape_quad(&Point::new(loc.x + h, loc.y, 0.0), &mut sp);
        shape_quad(&Point::new(loc.x - h, loc.y, 0.0), &mut sm);
        for i in 0..4 {
            let fd = (sp[i] - sm[i]) / (2.0 * h);
            assert!((ds[[i, 0]] - fd).abs() < 1e-8);
        }
    }

    #[test]
    fn fpt_counts_and_normals() {
        use crate::input::SptsType;
        let fpts = loc_fpts(ElementType::Hex, 2, SptsType::Legendre);
        assert_eq!(fpts.len(), 6 * 9);
        let tnorm = ref_normals_fpts(ElementType::Hex, 2);
        // Every fpt sits on the face its normal names.
        for (i, pt) in fpts.iter().enumerate() {
            let mut matched = false;
            for dim in 0..3 {
                if tnorm[[i, dim]] != 0.0 {
                    assert!((pt[dim] - tnorm[[i, dim]]).abs() < 1e-14);
                    matched = true;
                }
            }
            assert!(matched);
        }
    }
}
