/// 2D Constant-Velocity Kalman Filter
///
/// State Vector (4D), local meters relative to the run origin:
/// [0-1]: Position (X east, Y north) [m]
/// [2-3]: Velocity (Vx, Vy) [m/s]
///
/// Observation: position only, H = [I₂ | 0₂].
use crate::types::{
    JacobianPos2, KalmanGainPos2, PosNoise2, PosVec2, StateMat4, StateVec4,
};
use serde::{Deserialize, Serialize};

/// Innovation determinants below this are treated as singular
const DET_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kalman2dState {
    pub position: (f64, f64),
    pub velocity: (f64, f64),
    pub covariance_trace: f64,
    pub predict_count: u64,
    pub update_count: u64,
}

#[derive(Clone, Debug)]
pub struct Kalman2d {
    /// State vector [x, y, vx, vy]
    state: StateVec4,

    /// Covariance matrix [4x4]
    covariance: StateMat4,

    /// Process-noise coefficient
    q: f64,

    /// Measurement noise used when no accuracy is reported [m]
    r_base: f64,

    /// Floor applied to every measurement noise [m]
    r_min: f64,

    /// Smallest time step a predict will take [s]
    min_dt: f64,

    initialized: bool,
    predict_count: u64,
    update_count: u64,
}

impl Kalman2d {
    pub fn new(q: f64, r_base: f64, r_min: f64, min_dt: f64) -> Self {
        Self {
            state: StateVec4::zeros(),
            covariance: StateMat4::identity(),
            q,
            r_base,
            r_min,
            min_dt,
            initialized: false,
            predict_count: 0,
            update_count: 0,
        }
    }

    /// Seed the state at a first measurement with zero velocity and unit covariance.
    pub fn init(&mut self, z: &PosVec2) {
        self.state = StateVec4::new(z.x, z.y, 0.0, 0.0);
        self.covariance = StateMat4::identity();
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn transition(dt: f64) -> StateMat4 {
        let mut f = StateMat4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> StateMat4 {
        let q_pos = self.q * dt * dt;
        StateMat4::from_diagonal(&StateVec4::new(q_pos, q_pos, self.q, self.q))
    }

    fn measurement_jacobian() -> JacobianPos2 {
        let mut h = JacobianPos2::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    /// Propagate by `dt` seconds: x' = F x, P' = F P Fᵀ + Q
    pub fn predict(&mut self, dt: f64) {
        let dt = if dt.is_finite() { dt.max(self.min_dt) } else { self.min_dt };
        let f = Self::transition(dt);

        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + self.process_noise(dt);
        self.predict_count += 1;
    }

    /// Fold in a position measurement whose 1σ noise is `accuracy` meters.
    pub fn update(&mut self, z: &PosVec2, accuracy: Option<f64>) {
        let r_measured = self.measurement_noise(accuracy);
        let r = PosNoise2::identity() * (r_measured * r_measured);
        let h = Self::measurement_jacobian();
        let h_t = h.transpose();

        let innovation = z - h * self.state;
        let s = h * self.covariance * h_t + r;
        let k: KalmanGainPos2 = self.covariance * h_t * invert_guarded(&s);

        self.state += k * innovation;

        // Joseph form keeps P symmetric positive semi-definite
        let i_kh = StateMat4::identity() - k * h;
        self.covariance = i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose();
        self.update_count += 1;
    }

    /// max(r_min, reported accuracy or r_base)
    pub fn measurement_noise(&self, accuracy: Option<f64>) -> f64 {
        let reported = accuracy
            .filter(|a| a.is_finite() && *a >= 0.0)
            .unwrap_or(self.r_base);
        reported.max(self.r_min)
    }

    pub fn position(&self) -> PosVec2 {
        PosVec2::new(self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> PosVec2 {
        PosVec2::new(self.state[2], self.state[3])
    }

    pub fn covariance(&self) -> &StateMat4 {
        &self.covariance
    }

    pub fn get_state(&self) -> Kalman2dState {
        Kalman2dState {
            position: (self.state[0], self.state[1]),
            velocity: (self.state[2], self.state[3]),
            covariance_trace: self.covariance.trace(),
            predict_count: self.predict_count,
            update_count: self.update_count,
        }
    }
}

/// 2×2 inverse with the determinant floored away from zero.
fn invert_guarded(s: &PosNoise2) -> PosNoise2 {
    let det = s[(0, 0)] * s[(1, 1)] - s[(0, 1)] * s[(1, 0)];
    let det = if det.abs() < DET_EPSILON {
        DET_EPSILON.copysign(if det == 0.0 { 1.0 } else { det })
    } else {
        det
    };
    PosNoise2::new(s[(1, 1)], -s[(0, 1)], -s[(1, 0)], s[(0, 0)]) / det
}
