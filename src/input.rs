use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::SolverError;

/// Governing equation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum Equation {
    AdvectionDiffusion,
    NavierStokes,
}

impl TryFrom<u8> for Equation {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Equation::AdvectionDiffusion),
            1 => Ok(Equation::NavierStokes),
            _ => Err(format!("unknown equation type {}", v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum DtType {
    Fixed,
    GlobalCfl,
    LocalCfl,
}

impl TryFrom<u8> for DtType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(DtType::Fixed),
            1 => Ok(DtType::GlobalCfl),
            2 => Ok(DtType::LocalCfl),
            _ => Err(format!("unknown dtType {}", v)),
        }
    }
}

/// Prescribed mesh-motion families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum Motion {
    Static,
    Perturb,
    LiangDeform,
    RigidRotation,
    RigidTranslation,
}

impl Motion {
    pub fn is_moving(&self) -> bool {
        !matches!(self, Motion::Static)
    }
}

impl TryFrom<u8> for Motion {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Motion::Static),
            1 => Ok(Motion::Perturb),
            2 => Ok(Motion::LiangDeform),
            3 => Ok(Motion::RigidRotation),
            4 => Ok(Motion::RigidTranslation),
            _ => Err(format!("unknown motion type {}", v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum RiemannType {
    Rusanov,
    Roe,
}

impl TryFrom<u8> for RiemannType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RiemannType::Rusanov),
            1 => Ok(RiemannType::Roe),
            _ => Err(format!("unknown riemannType {}", v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum MeshType {
    Read,
    Create,
    Overset,
}

impl TryFrom<u8> for MeshType {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MeshType::Read),
            1 => Ok(MeshType::Create),
            2 => Ok(MeshType::Overset),
            _ => Err(format!("unknown meshType {}", v)),
        }
    }
}

/// Overset data-transfer method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum OversetMethod {
    FaceFlux,
    Projection,
    FieldInterp,
}

impl TryFrom<u8> for OversetMethod {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(OversetMethod::FaceFlux),
            1 => Ok(OversetMethod::Projection),
            2 => Ok(OversetMethod::FieldInterp),
            _ => Err(format!("unknown oversetMethod {}", v)),
        }
    }
}

/// 1-D distribution used for solution and flux points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum SptsType {
    Legendre,
    Lobatto,
}

impl TryFrom<String> for SptsType {
    type Error = String;
    fn try_from(v: String) -> Result<Self, Self::Error> {
        match v.as_str() {
            "Legendre" => Ok(SptsType::Legendre),
            "Lobatto" => Ok(SptsType::Lobatto),
            _ => Err(format!("unknown solution-point type '{}'", v)),
        }
    }
}

fn one() -> usize {
    1
}
fn dflt_order() -> usize {
    3
}
fn dflt_time_type() -> u8 {
    4
}
fn dflt_cfl() -> f64 {
    0.5
}
fn dflt_dt() -> f64 {
    1e-4
}
fn dflt_gamma() -> f64 {
    1.4
}
fn dflt_prandtl() -> f64 {
    0.72
}
fn dflt_r_gas() -> f64 {
    286.9
}
fn dflt_rho() -> f64 {
    1.0
}
fn dflt_p() -> f64 {
    1.0 / 1.4
}
fn dflt_t() -> f64 {
    300.0
}
fn dflt_re() -> f64 {
    100.0
}
fn dflt_lref() -> f64 {
    1.0
}
fn dflt_ldg_pen() -> f64 {
    0.5
}
fn dflt_lambda() -> f64 {
    1.0
}
fn dflt_threshold() -> f64 {
    1.0
}
fn dflt_mesh_n() -> usize {
    10
}
fn dflt_xmin() -> f64 {
    -5.0
}
fn dflt_xmax() -> f64 {
    5.0
}
fn dflt_bc() -> String {
    "periodic".into()
}
fn dflt_data_file() -> String {
    "solution".into()
}
fn dflt_move_amp() -> f64 {
    1.0
}
fn dflt_move_freq() -> f64 {
    0.2
}
fn dflt_spts_type() -> SptsType {
    SptsType::Legendre
}
fn dflt_res_type() -> u8 {
    2
}
fn dflt_iter_max() -> usize {
    100
}
fn dflt_quad_order() -> usize {
    8
}

/// Run configuration. Immutable after `Input::from_file`; derived
/// quantities are filled in by `finalize`.
#[derive(Debug, Clone, Deserialize)]
#[allow(non_snake_case)]
pub struct Input {
    #[serde(default)]
    pub equation: Option<Equation>,
    #[serde(default = "dflt_order")]
    pub order: usize,
    #[serde(default = "dflt_time_type")]
    pub timeType: u8,
    #[serde(default)]
    pub dtType: Option<DtType>,
    #[serde(default = "dflt_dt")]
    pub dt: f64,
    #[serde(default = "dflt_cfl")]
    pub CFL: f64,
    #[serde(default)]
    pub viscous: u8,
    #[serde(default)]
    pub motion: Option<Motion>,
    #[serde(default)]
    pub riemannType: Option<RiemannType>,
    #[serde(default)]
    pub oversetMethod: Option<OversetMethod>,
    #[serde(default, rename = "nDims")]
    pub nDims_raw: Option<usize>,

    // Advection-diffusion parameters
    #[serde(default = "dflt_lambda")]
    pub advectVx: f64,
    #[serde(default)]
    pub advectVy: f64,
    #[serde(default)]
    pub advectVz: f64,
    #[serde(default = "dflt_ldg_pen")]
    pub lambda: f64,
    #[serde(default)]
    pub diffD: f64,

    // Initial condition / test case
    #[serde(default)]
    pub icType: u8,
    #[serde(default)]
    pub testCase: u8,
    #[serde(default = "dflt_iter_max")]
    pub iterMax: usize,
    #[serde(default)]
    pub restart: u8,
    #[serde(default)]
    pub restartIter: usize,

    // Output / monitoring
    #[serde(default)]
    pub plotFreq: usize,
    #[serde(default)]
    pub monitorResFreq: usize,
    #[serde(default = "dflt_res_type")]
    pub resType: u8,
    #[serde(default = "dflt_res_type")]
    pub errorNorm: u8,
    #[serde(default = "dflt_data_file")]
    pub dataFileName: String,
    #[serde(default)]
    pub entropySensor: u8,
    #[serde(default)]
    pub writeIBLANK: u8,

    // Mesh
    #[serde(default)]
    pub meshType: Option<MeshType>,
    #[serde(default = "dflt_mesh_n")]
    pub nx: usize,
    #[serde(default = "dflt_mesh_n")]
    pub ny: usize,
    #[serde(default = "one")]
    pub nz: usize,
    #[serde(default = "dflt_xmin")]
    pub xmin: f64,
    #[serde(default = "dflt_xmax")]
    pub xmax: f64,
    #[serde(default = "dflt_xmin")]
    pub ymin: f64,
    #[serde(default = "dflt_xmax")]
    pub ymax: f64,
    #[serde(default = "dflt_xmin")]
    pub zmin: f64,
    #[serde(default = "dflt_xmax")]
    pub zmax: f64,
    #[serde(default = "dflt_bc")]
    pub bcBottom: String,
    #[serde(default = "dflt_bc")]
    pub bcTop: String,
    #[serde(default = "dflt_bc")]
    pub bcLeft: String,
    #[serde(default = "dflt_bc")]
    pub bcRight: String,
    #[serde(default = "dflt_bc")]
    pub bcFront: String,
    #[serde(default = "dflt_bc")]
    pub bcBack: String,

    // Freestream
    #[serde(default = "dflt_rho")]
    pub rhoBound: f64,
    #[serde(default = "dflt_lambda")]
    pub uBound: f64,
    #[serde(default)]
    pub vBound: f64,
    #[serde(default)]
    pub wBound: f64,
    #[serde(default = "dflt_p")]
    pub pBound: f64,
    #[serde(default)]
    pub MachBound: f64,
    #[serde(default = "dflt_re")]
    pub Re: f64,
    #[serde(default = "dflt_lref")]
    pub Lref: f64,
    #[serde(default = "dflt_t")]
    pub TBound: f64,
    #[serde(default = "dflt_t")]
    pub TWall: f64,
    #[serde(default = "dflt_lambda")]
    pub nxBound: f64,
    #[serde(default)]
    pub nyBound: f64,
    #[serde(default)]
    pub nzBound: f64,

    // Gas properties
    #[serde(default = "dflt_gamma")]
    pub gamma: f64,
    #[serde(default = "dflt_prandtl")]
    pub prandtl: f64,
    #[serde(default = "dflt_r_gas")]
    pub RGas: f64,

    // Viscous interface
    #[serde(default = "dflt_ldg_pen")]
    pub LDG_penFact: f64,
    #[serde(default = "dflt_lambda")]
    pub LDG_tau: f64,

    // Point distribution
    #[serde(default = "dflt_spts_type")]
    pub spts_type_quad: SptsType,

    // Stabilization
    #[serde(default)]
    pub shockCapture: u8,
    #[serde(default = "dflt_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub squeeze: u8,

    // p-multigrid
    #[serde(default)]
    pub PMG: u8,
    #[serde(default = "dflt_quad_order")]
    pub quadOrder: usize,

    // Mesh motion parameters
    #[serde(default = "dflt_move_amp")]
    pub moveAx: f64,
    #[serde(default = "dflt_move_amp")]
    pub moveAy: f64,
    #[serde(default)]
    pub moveAz: f64,
    #[serde(default = "dflt_move_freq")]
    pub moveFx: f64,
    #[serde(default = "dflt_move_freq")]
    pub moveFy: f64,
    #[serde(default)]
    pub moveFz: f64,

    // ---- Derived (filled by finalize, not read from file) ----
    #[serde(skip)]
    pub nDims: usize,
    #[serde(skip)]
    pub nFields: usize,
    #[serde(skip)]
    pub nRKSteps: usize,
    #[serde(skip)]
    pub rk_a: Vec<f64>,
    #[serde(skip)]
    pub rk_b: Vec<f64>,
    #[serde(skip)]
    pub mu_inf: f64,
    #[serde(skip)]
    pub exps0: f64,
}

impl Input {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SolverError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| SolverError::InputFile {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        let mut params: Input =
            serde_json::from_str(&text).map_err(|e| SolverError::InputParse {
                path: path.as_ref().display().to_string(),
                source: e,
            })?;
        params.finalize();
        Ok(params)
    }

    /// Derive everything the raw file does not carry.
    pub fn finalize(&mut self) {
        self.nDims = self.nDims_raw.unwrap_or(2);
        assert!(
            self.nDims == 2 || self.nDims == 3,
            "nDims must be 2 or 3, got {}",
            self.nDims
        );

        self.nFields = match self.equation() {
            Equation::AdvectionDiffusion => 1,
            Equation::NavierStokes => self.nDims + 2,
        };

        // Runge-Kutta tables; a[s] shifts the stage time, b[s] accumulates.
        match self.timeType {
            0 => {
                self.nRKSteps = 1;
                self.rk_a = vec![0.0];
                self.rk_b = vec![1.0];
            }
            4 => {
                self.nRKSteps = 4;
                self.rk_a = vec![0.0, 0.5, 0.5, 1.0];
                self.rk_b = vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0];
            }
            t => panic!("unsupported timeType {}", t),
        }

        let v_mag =
            (self.uBound * self.uBound + self.vBound * self.vBound + self.wBound * self.wBound)
                .sqrt();
        self.mu_inf = if self.viscous != 0 && self.Re > 0.0 {
            self.rhoBound * v_mag.max(1e-10) * self.Lref / self.Re
        } else {
            0.0
        };

        // Freestream entropy bound used by the squeezing entropy check.
        self.exps0 = self.pBound / self.rhoBound.powf(self.gamma);
    }

    pub fn equation(&self) -> Equation {
        self.equation.unwrap_or(Equation::AdvectionDiffusion)
    }

    pub fn dt_type(&self) -> DtType {
        self.dtType.unwrap_or(DtType::Fixed)
    }

    pub fn motion(&self) -> Motion {
        self.motion.unwrap_or(Motion::Static)
    }

    pub fn riemann_type(&self) -> RiemannType {
        self.riemannType.unwrap_or(RiemannType::Rusanov)
    }

    pub fn mesh_type(&self) -> MeshType {
        self.meshType.unwrap_or(MeshType::Create)
    }

    pub fn overset_method(&self) -> OversetMethod {
        self.oversetMethod.unwrap_or(OversetMethod::FaceFlux)
    }

    pub fn is_viscous(&self) -> bool {
        self.viscous != 0
    }
}

impl Default for Input {
    fn default() -> Self {
        let mut params: Input = serde_json::from_str("{}").expect("defaults must parse");
        params.finalize();
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let params = Input::default();
        assert_eq!(params.nDims, 2);
        assert_eq!(params.nFields, 1);
        assert_eq!(params.nRKSteps, 4);
        assert_eq!(params.rk_a, vec![0.0, 0.5, 0.5, 1.0]);
        assert!((params.rk_b.iter().sum::<f64>() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn parses_numeric_enums() {
        let mut params: Input = serde_json::from_str(
            r#"{"equation": 1, "nDims": 2, "dtType": 2, "motion": 3, "riemannType": 1}"#,
        )
        .unwrap();
        params.finalize();
        assert_eq!(params.equation(), Equation::NavierStokes);
        assert_eq!(params.dt_type(), DtType::LocalCfl);
        assert_eq!(params.motion(), Motion::RigidRotation);
        assert_eq!(params.riemann_type(), RiemannType::Roe);
        assert_eq!(params.nFields, 4);
    }

    #[test]
    fn freestream_entropy_bound() {
        let mut params = Input::default();
        params.rhoBound = 1.0;
        params.pBound = 1.0 / 1.4;
        params.finalize();
        assert!((params.exps0 - 1.0 / 1.4).abs() < 1e-15);
    }
}
