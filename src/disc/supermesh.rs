use crate::disc::gauss_points::legendre_points;
use crate::disc::point::Point;

/// One tetrahedron of the local supermesh.
#[derive(Debug, Clone, Copy)]
pub struct Tetra {
    pub nodes: [Point; 4],
}

impl Tetra {
    pub fn volume(&self) -> f64 {
        let a = self.nodes[1] - self.nodes[0];
        let b = self.nodes[2] - self.nodes[0];
        let c = self.nodes[3] - self.nodes[0];
        a.dot(&b.cross(&c)).abs() / 6.0
    }

    /// Determinant of the map from the unit tet; 6x the signed volume.
    fn det_jacobian(&self) -> f64 {
        let a = self.nodes[1] - self.nodes[0];
        let b = self.nodes[2] - self.nodes[0];
        let c = self.nodes[3] - self.nodes[0];
        a.dot(&b.cross(&c)).abs()
    }
}

/// Split a hex (standard corner ordering) into five tetrahedra.
pub fn split_hex_into_tets(hex_nodes: &[Point]) -> Vec<Tetra> {
    assert_eq!(hex_nodes.len(), 8, "hex must carry eight corner nodes");
    const IND: [[usize; 4]; 5] = [
        [0, 1, 4, 3],
        [2, 1, 6, 3],
        [5, 1, 6, 4],
        [7, 3, 4, 6],
        [1, 3, 6, 4],
    ];
    IND.iter()
        .map(|idx| Tetra {
            nodes: [
                hex_nodes[idx[0]],
                hex_nodes[idx[1]],
                hex_nodes[idx[2]],
                hex_nodes[idx[3]],
            ],
        })
        .collect()
}

/// Clip a tetrahedron against one planar face of the target cell,
/// keeping the volume on the anti-normal side. Produces 0 to 3 output
/// tets depending on how many vertices lie on the cut side.
pub fn clip_tet(tet: &Tetra, clip_face: &[Point], norm: &Point) -> Vec<Tetra> {
    // Face centroid anchors the plane.
    let mut xc = Point::zero();
    for pt in clip_face {
        xc += *pt;
    }
    xc /= clip_face.len() as f64;

    let mut dead = [false; 4];
    let mut n_dead = 0;
    for i in 0..4 {
        let dx = tet.nodes[i] - xc;
        if dx.dot(norm) > 0.0 {
            dead[i] = true;
            n_dead += 1;
        }
    }

    // Edge-plane intersection: a + alpha (b - a), alpha = n.(xc-a)/n.(b-a)
    let intersect = |a: Point, b: Point| -> Point {
        let ab = b - a;
        let ac = xc - a;
        a + ab * (norm.dot(&ac) / norm.dot(&ab))
    };

    // Node shuffles that put the clip into a standard orientation.
    let flip_one = |kill: usize| -> [usize; 3] {
        match kill {
            0 => [1, 3, 2],
            1 => [0, 2, 3],
            2 => [0, 3, 1],
            3 => [0, 1, 2],
            _ => unreachable!(),
        }
    };

    match n_dead {
        0 => vec![*tet],

        1 => {
            // Remove one corner: the remaining prism splits into 3 tets.
            let kill = (0..4).find(|&i| dead[i]).unwrap();
            let e_pts = flip_one(kill);

            let mut new_pts = [Point::zero(); 3];
            for i in 0..3 {
                new_pts[i] = intersect(tet.nodes[kill], tet.nodes[e_pts[i]]);
            }

            vec![
                Tetra {
                    nodes: [
                        tet.nodes[e_pts[0]],
                        tet.nodes[e_pts[1]],
                        new_pts[0],
                        tet.nodes[e_pts[2]],
                    ],
                },
                Tetra {
                    nodes: [tet.nodes[e_pts[2]], new_pts[0], new_pts[2], new_pts[1]],
                },
                Tetra {
                    nodes: [
                        tet.nodes[e_pts[1]],
                        tet.nodes[e_pts[2]],
                        new_pts[1],
                        new_pts[0],
                    ],
                },
            ]
        }

        2 => {
            // The plane cuts four edges; the kept half splits into 3 tets.
            let mut keep = [0usize; 2];
            let mut n = 0;
            for i in 0..4 {
                if !dead[i] {
                    keep[n] = i;
                    n += 1;
                }
            }
            let ind: [usize; 4] = match keep {
                [0, 1] => [0, 1, 2, 3],
                [0, 2] => [1, 2, 0, 3],
                [0, 3] => [1, 3, 2, 0],
                [1, 2] => [2, 0, 1, 3],
                [1, 3] => [3, 0, 2, 1],
                [2, 3] => [3, 2, 1, 0],
                _ => unreachable!(),
            };

            let new_pts = [
                intersect(tet.nodes[ind[0]], tet.nodes[ind[3]]),
                intersect(tet.nodes[ind[1]], tet.nodes[ind[3]]),
                intersect(tet.nodes[ind[1]], tet.nodes[ind[2]]),
                intersect(tet.nodes[ind[0]], tet.nodes[ind[2]]),
            ];

            vec![
                Tetra {
                    nodes: [tet.nodes[ind[1]], new_pts[0], new_pts[3], tet.nodes[ind[0]]],
                },
                Tetra {
                    nodes: [new_pts[0], new_pts[3], new_pts[1], tet.nodes[ind[1]]],
                },
                Tetra {
                    nodes: [new_pts[1], new_pts[3], new_pts[2], tet.nodes[ind[1]]],
                },
            ]
        }

        3 => {
            // The opposite of one corner removed: one corner survives.
            let keep = (0..4).find(|&i| !dead[i]).unwrap();
            let e_pts = flip_one(keep);

            let mut nodes = [Point::zero(); 4];
            nodes[3] = tet.nodes[keep];
            for i in 0..3 {
                nodes[i] = intersect(tet.nodes[keep], tet.nodes[e_pts[i]]);
            }
            vec![Tetra { nodes }]
        }

        4 => {
            log::warn!("input donor-cell tet is completely exterior to target cell");
            Vec::new()
        }

        _ => unreachable!(),
    }
}

/// Local supermesh of one target cell: donor hexes are tetrahedralized
/// and clipped against every planar face of the target, then equipped
/// with a tet-local Gauss rule for integrating products of polynomials.
pub struct SuperMesh {
    pub tets: Vec<Tetra>,
    pub order: usize,
    pub n_qpts_tet: usize,
    pub n_qpts: usize,
    /// Physical quadrature points over all tets, tet-major.
    pub qpts: Vec<Point>,
    /// Reference-tet weights (one tet's worth, summing to 1/6).
    wts: Vec<f64>,
}

impl SuperMesh {
    /// `target_faces` lists every planar face of the target cell as its
    /// corner points plus outward normal.
    pub fn build(
        donor_hexes: &[Vec<Point>],
        target_faces: &[(Vec<Point>, Point)],
        order: usize,
    ) -> Self {
        let mut tets = Vec::new();
        for hex in donor_hexes {
            for tet in split_hex_into_tets(hex) {
                let mut pieces = vec![tet];
                for (face, norm) in target_faces {
                    let mut next = Vec::new();
                    for piece in &pieces {
                        next.extend(clip_tet(piece, face, norm));
                    }
                    pieces = next;
                    if pieces.is_empty() {
                        break;
                    }
                }
                tets.extend(pieces);
            }
        }

        let (ref_pts, wts) = tet_quadrature(order);
        let n_qpts_tet = ref_pts.len();
        let mut qpts = Vec::with_capacity(tets.len() * n_qpts_tet);
        for tet in &tets {
            for rp in &ref_pts {
                let a = tet.nodes[1] - tet.nodes[0];
                let b = tet.nodes[2] - tet.nodes[0];
                let c = tet.nodes[3] - tet.nodes[0];
                qpts.push(tet.nodes[0] + a * rp.x + b * rp.y + c * rp.z);
            }
        }

        let n_qpts = qpts.len();
        SuperMesh {
            tets,
            order,
            n_qpts_tet,
            n_qpts,
            qpts,
            wts,
        }
    }

    /// Total clipped volume.
    pub fn volume(&self) -> f64 {
        self.tets.iter().map(|t| t.volume()).sum()
    }

    /// Integrate data sampled at the supermesh quadrature nodes:
    /// sum over tets of sum over qpts of w_q data_q detJ_tet.
    pub fn integrate(&self, data: &[f64]) -> f64 {
        if data.len() != self.n_qpts {
            panic!("to integrate over supermesh, data must lie at its quadrature nodes");
        }
        let mut val = 0.0;
        for (it, tet) in self.tets.iter().enumerate() {
            let det = tet.det_jacobian();
            for j in 0..self.n_qpts_tet {
                val += self.wts[j] * data[it * self.n_qpts_tet + j] * det;
            }
        }
        val
    }
}

/// Gauss rule on the unit tetrahedron by Duffy collapse of the tensor
/// Gauss-Legendre cube rule; exact for polynomials up to the 1-D degree.
pub fn tet_quadrature(order: usize) -> (Vec<Point>, Vec<f64>) {
    let n = order + 1;
    let (x1, w1) = legendre_points(n);
    let mut pts = Vec::with_capacity(n * n * n);
    let mut wts = Vec::with_capacity(n * n * n);
    for (ia, &a) in x1.iter().enumerate() {
        for (ib, &b) in x1.iter().enumerate() {
            for (ic, &c) in x1.iter().enumerate() {
                let u = (1.0 + a) * (1.0 - b) * (1.0 - c) / 8.0;
                let v = (1.0 + b) * (1.0 - c) / 4.0;
                let w = (1.0 + c) / 2.0;
                let jac = (1.0 - b) * (1.0 - c) * (1.0 - c) / 64.0;
                pts.push(Point::new(u, v, w));
                wts.push(w1[ia] * w1[ib] * w1[ic] * jac);
            }
        }
    }
    (pts, wts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_hex() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(0.0, 0.0, 1.0),
            Point::new(1.0, 0.0, 1.0),
            Point::new(1.0, 1.0, 1.0),
            Point::new(0.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn five_tets_fill_the_hex() {
        let tets = split_hex_into_tets(&unit_hex());
        assert_eq!(tets.len(), 5);
        let vol: f64 = tets.iter().map(|t| t.volume()).sum();
        assert!((vol - 1.0).abs() < 1e-14);
    }

    #[test]
    fn tet_rule_integrates_unit_volume() {
        let (_, wts) = tet_quadrature(3);
        let sum: f64 = wts.iter().sum();
        assert!((sum - 1.0 / 6.0).abs() < 1e-13);
    }

    #[test]
    fn clip_one_vertex_outside_volume() {
        // Clip the reference tet by x = 0.8: one vertex removed, three
        // output tets, and the lost corner has volume (1-0.8)^3/6.
        let tet = Tetra {
            nodes: [
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
                Point::new(0.0, 0.0, 1.0),
            ],
        };
        let norm = Point::new(1.0, 0.0, 0.0);
        let face = vec![
            Point::new(0.8, 0.0, 0.0),
            Point::new(0.8, 1.0, 0.0),
            Point::new(0.8, 1.0, 1.0),
            Point::new(0.8, 0.0, 1.0),
        ];
        let out = clip_tet(&tet, &face, &norm);
        assert_eq!(out.len(), 3);
        let vol: f64 = out.iter().map(|t| t.volume()).sum();
        let expect = 1.0 / 6.0 - 0.2f64.powi(3) / 6.0;
        assert!((vol - expect).abs() < 1e-15, "vol {} expect {}", vol, expect);
    }

    #[test]
    fn clip_three_vertices_outside_keeps_one_corner() {
        // The dual case: clipping by x+y+z = 0.8 keeps only the corner
        // at the origin, one output tet of volume 0.8^3/6.
        let tet = Tetra {
            nodes: [
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
                Point::new(0.0, 0.0, 1.0),
            ],
        };
        let s = 1.0 / 3.0f64.sqrt();
        let norm = Point::new(s, s, s);
        let face = vec![
            Point::new(0.8, 0.0, 0.0),
            Point::new(0.0, 0.8, 0.0),
            Point::new(0.0, 0.0, 0.8),
        ];
        let out = clip_tet(&tet, &face, &norm);
        assert_eq!(out.len(), 1);
        let vol = out[0].volume();
        assert!((vol - 0.8f64.powi(3) / 6.0).abs() < 1e-14);
    }

    #[test]
    fn clip_half_case_volume() {
        // Cut the reference tet at z = 0.5 keeping the bottom: two
        // vertices survive only when the plane splits 2-2.
        let tet = Tetra {
            nodes: [
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 0.0, 1.0),
                Point::new(0.0, 1.0, 1.0),
            ],
        };
        let norm = Point::new(0.0, 0.0, 1.0);
        let face = vec![
            Point::new(0.0, 0.0, 0.5),
            Point::new(1.0, 0.0, 0.5),
            Point::new(0.0, 1.0, 0.5),
        ];
        let out = clip_tet(&tet, &face, &norm);
        assert_eq!(out.len(), 3);
        let vol_below: f64 = out.iter().map(|t| t.volume()).sum();

        // Complement check against the anti-normal clip.
        let flipped = Point::new(0.0, 0.0, -1.0);
        let out_above = clip_tet(&tet, &face, &flipped);
        let vol_above: f64 = out_above.iter().map(|t| t.volume()).sum();
        assert!((vol_below + vol_above - tet.volume()).abs() < 1e-14);
    }

    #[test]
    fn supermesh_integrates_constants_to_volume() {
        // Donor unit hex clipped by the plane x = 0.5.
        let faces = vec![(
            vec![
                Point::new(0.5, 0.0, 0.0),
                Point::new(0.5, 1.0, 0.0),
                Point::new(0.5, 1.0, 1.0),
                Point::new(0.5, 0.0, 1.0),
            ],
            Point::new(1.0, 0.0, 0.0),
        )];
        let sm = SuperMesh::build(&[unit_hex()], &faces, 2);
        assert!((sm.volume() - 0.5).abs() < 1e-12);
        let ones = vec![1.0; sm.n_qpts];
        assert!((sm.integrate(&ones) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn supermesh_integrates_linear_fields() {
        let faces = vec![(
            vec![
                Point::new(0.5, 0.0, 0.0),
                Point::new(0.5, 1.0, 0.0),
                Point::new(0.5, 1.0, 1.0),
                Point::new(0.5, 0.0, 1.0),
            ],
            Point::new(1.0, 0.0, 0.0),
        )];
        let sm = SuperMesh::build(&[unit_hex()], &faces, 3);
        // integral of x over the slab [0,0.5]x[0,1]^2 is 1/8.
        let data: Vec<f64> = sm.qpts.iter().map(|p| p.x).collect();
        assert!((sm.integrate(&data) - 0.125).abs() < 1e-12);
    }
}
