pub mod kalman_2d;
pub mod position;

pub use kalman_2d::{Kalman2d, Kalman2dState};
pub use position::PositionFilter;
