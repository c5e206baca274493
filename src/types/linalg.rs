//! Linear algebra type system for the run tracker
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM_CV2: usize = 4; // (x, y, vx, vy)

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS2: usize = 2; // (x, y)

// ===== Constant-Velocity Filter Types =====
pub type StateVec4 = SVector<f64, STATE_DIM_CV2>;
pub type StateMat4 = SMatrix<f64, STATE_DIM_CV2, STATE_DIM_CV2>;

// Measurement types
pub type PosVec2 = SVector<f64, MEASURE_DIM_POS2>;
pub type PosNoise2 = SMatrix<f64, MEASURE_DIM_POS2, MEASURE_DIM_POS2>;

// Kalman gain types
pub type KalmanGainPos2 = SMatrix<f64, STATE_DIM_CV2, MEASURE_DIM_POS2>; // 4×2

// Jacobian types
pub type JacobianPos2 = SMatrix<f64, MEASURE_DIM_POS2, STATE_DIM_CV2>; // 2×4
