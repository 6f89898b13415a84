//! Scheimpflug transform between the tilted sensor (pixels) and the object
//! plane (mm).
//!
//! The optics are modelled as a thick lens with principal points `P1`, `P2`
//! on the optical axis `vr = RY(θ)·RX(φ)·z`, and a sensor centred at
//! `S = tt·vr` whose normal `nS` is further tilted by `RX(β)·RY(α)`.
//! A ray from an object point through `P1` leaves `P2` with the same
//! direction and hits the sensor plane.
//!
//! The stylus orientation (R, H) rotates the object plane around Z by H and
//! compensates the R+δ tilt with a shift/scale along X. It is runtime state,
//! not a calibrated parameter.
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Names of the ten calibrated parameters, in optimizer order.
pub const CALIBRATED_PARAMS: [&str; 10] = [
    "alpha", "beta", "cx0", "cy0", "delta", "p1", "p2", "phi", "theta", "tt",
];

/// Lever arm of the stylus rotation compensation, mm.
const STYLUS_ARM: Vector3<f64> = Vector3::new(10.0, 0.0, 1.0);

/// Transform parameters (angles in degrees, lengths in mm, centre in pixels).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub alpha: f64,
    pub beta: f64,
    pub cx0: f64,
    pub cy0: f64,
    pub delta: f64,
    pub p1: f64,
    pub p2: f64,
    pub phi: f64,
    pub theta: f64,
    pub tt: f64,
    /// Pixel pitch, mm
    pub px: f64,
    pub magnification: f64,
}

impl Default for TransformParams {
    /// Nominal instrument geometry.
    fn default() -> Self {
        Self {
            alpha: -18.2,
            beta: 4.0,
            cx0: 280.0,
            cy0: 280.0,
            delta: 6.0,
            p1: 32.33,
            p2: 31.24,
            phi: 16.7,
            theta: -53.84,
            tt: 39.0,
            px: 0.003,
            magnification: -0.241,
        }
    }
}

impl TransformParams {
    /// Calibrated parameters in [`CALIBRATED_PARAMS`] order.
    pub fn calibrated(&self) -> [f64; 10] {
        [
            self.alpha, self.beta, self.cx0, self.cy0, self.delta, self.p1, self.p2, self.phi,
            self.theta, self.tt,
        ]
    }

    /// Copy with the calibrated parameters replaced; `px` and magnification kept.
    pub fn with_calibrated(&self, v: &[f64]) -> Self {
        let mut out = self.clone();
        for (name, &value) in CALIBRATED_PARAMS.iter().zip(v) {
            out.set(name, value);
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let v = match name {
            "alpha" => self.alpha,
            "beta" => self.beta,
            "cx0" => self.cx0,
            "cy0" => self.cy0,
            "delta" => self.delta,
            "p1" => self.p1,
            "p2" => self.p2,
            "phi" => self.phi,
            "theta" => self.theta,
            "tt" => self.tt,
            "px" => self.px,
            "magnification" => self.magnification,
            _ => return None,
        };
        Some(v)
    }

    /// Set a parameter by name; unknown names are ignored and return false.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        let slot = match name {
            "alpha" => &mut self.alpha,
            "beta" => &mut self.beta,
            "cx0" => &mut self.cx0,
            "cy0" => &mut self.cy0,
            "delta" => &mut self.delta,
            "p1" => &mut self.p1,
            "p2" => &mut self.p2,
            "phi" => &mut self.phi,
            "theta" => &mut self.theta,
            "tt" => &mut self.tt,
            "px" => &mut self.px,
            "magnification" => &mut self.magnification,
            _ => return false,
        };
        *slot = value;
        true
    }
}

#[inline]
pub fn rx(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

#[inline]
pub fn ry(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

#[inline]
pub fn rz(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

#[inline]
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[derive(Clone, Debug)]
pub struct ScheimpflugTransform {
    params: TransformParams,
    cx0: f64,
    cy0: f64,
    delta: f64,
    s: Vector3<f64>,
    p1: Vector3<f64>,
    p2: Vector3<f64>,
    rtf_rab: Matrix3<f64>,
    n_s: Vector3<f64>,
    /// `rtf_rab^T / px`
    t: Matrix3<f64>,
    ry_delta: Matrix3<f64>,
    /// Stylus angles in radians (`r` stores `-R`)
    r: f64,
    h: f64,
    rz_h: Matrix3<f64>,
    rz_mh: Matrix3<f64>,
    v1: f64,
    v2: f64,
    v3: f64,
    v4: f64,
}

impl ScheimpflugTransform {
    /// Build from parameters with R = H = 0.
    pub fn new(params: &TransformParams) -> Self {
        let mut st = Self {
            params: params.clone(),
            cx0: 0.0,
            cy0: 0.0,
            delta: 0.0,
            s: Vector3::zeros(),
            p1: Vector3::zeros(),
            p2: Vector3::zeros(),
            rtf_rab: Matrix3::identity(),
            n_s: Vector3::z(),
            t: Matrix3::identity(),
            ry_delta: Matrix3::identity(),
            r: 0.0,
            h: 0.0,
            rz_h: Matrix3::identity(),
            rz_mh: Matrix3::identity(),
            v1: 0.0,
            v2: 1.0,
            v3: 1.0,
            v4: 0.0,
        };
        st.init(params);
        st.set_stylus_orientation(0.0, 0.0);
        st
    }

    /// Load all parameters; the stylus terms must be refreshed afterwards with
    /// [`Self::set_stylus_orientation`].
    pub fn init(&mut self, params: &TransformParams) {
        self.params = params.clone();
        // pixel centre is integral
        self.cx0 = params.cx0.trunc();
        self.cy0 = params.cy0.trunc();
        self.delta = params.delta.to_radians();

        let rtf = ry(params.theta.to_radians()) * rx(params.phi.to_radians());
        let rab = rx(params.beta.to_radians()) * ry(params.alpha.to_radians());
        let vr = rtf * Vector3::z();
        self.s = vr * params.tt;
        self.p1 = vr * params.p1;
        self.p2 = vr * params.p2;
        self.rtf_rab = rtf * rab;
        self.n_s = self.rtf_rab * Vector3::z();
        self.t = self.rtf_rab.transpose() / params.px;
        self.ry_delta = ry(self.delta);
    }

    /// Replace the ten calibrated parameters (optimizer order) and re-apply
    /// the current stylus orientation.
    pub fn init_calibrated(&mut self, v: &[f64]) {
        let (r, h) = (self.r_deg(), self.h_deg());
        let params = self.params.with_calibrated(v);
        self.init(&params);
        self.set_stylus_orientation(r, h);
    }

    /// Set stylus angles R (deltaN) and H, in degrees.
    pub fn set_stylus_orientation(&mut self, r_deg: f64, h_deg: f64) {
        self.r = (-r_deg).to_radians();
        self.h = h_deg.to_radians();
        self.rz_h = rz(self.h);
        self.rz_mh = rz(-self.h);

        let ry_r = ry(self.r);
        let vg = ry_r * self.ry_delta * Vector3::z();
        let c_only_r = ry_r * Vector3::z() - Vector3::z();
        let c = self.ry_delta * STYLUS_ARM + c_only_r - STYLUS_ARM;
        let b = Vector3::new(0.0, 0.0, (vg.z * c.z + vg.x * c.x) / vg.z);
        let d_bc = (b - c).norm();

        self.v1 = d_bc * sign(c.x);
        self.v3 = (self.r + self.delta).cos();
        self.v2 = 1.0 / self.v3;
        self.v4 = self.n_s.dot(&self.s) - self.n_s.dot(&self.p2);
    }

    /// Object plane (mm) to image (pixels), optionally rounded.
    pub fn object_to_image(&self, obj: Vector2<f64>, round: bool) -> Vector2<f64> {
        let m = self.rz_mh * Vector3::new(obj.x, obj.y, 0.0);
        let vt = self.p1 - Vector3::new(m.x * self.v2 - self.v1, m.y, m.z);
        let lam = self.v4 / self.n_s.dot(&vt);
        let msc = self.p2 + vt * lam - self.s;
        let u = self.t.row(0).dot(&msc.transpose()) + self.cx0;
        let v = self.t.row(1).dot(&msc.transpose()) + self.cy0;
        if round {
            Vector2::new(u.round(), v.round())
        } else {
            Vector2::new(u, v)
        }
    }

    /// Image (pixels) to object plane (mm).
    pub fn image_to_object(&self, img: Vector2<f64>) -> Vector2<f64> {
        let sensor = Vector3::new((img.x - self.cx0) * self.params.px, (img.y - self.cy0) * self.params.px, 0.0);
        let ps2 = self.rtf_rab * sensor + self.s;
        let vt = ps2 - self.p2;
        let lam = -self.p1.z / vt.z;
        let mut po = self.p1 + vt * lam;
        po.x = (po.x + self.v1) * self.v3;
        let out = self.rz_h * po;
        Vector2::new(out.x, out.y)
    }

    /// R in degrees.
    pub fn r_deg(&self) -> f64 {
        (-self.r).to_degrees()
    }

    /// H in degrees.
    pub fn h_deg(&self) -> f64 {
        self.h.to_degrees()
    }

    pub fn pixel_to_mm(&self, v: f64) -> f64 {
        v * self.params.px / self.params.magnification.abs()
    }

    pub fn mm_to_pixel(&self, v: f64) -> f64 {
        v / self.params.px * self.params.magnification.abs()
    }

    pub fn params(&self) -> &TransformParams {
        &self.params
    }
}
