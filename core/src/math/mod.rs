pub mod fft;
pub mod least_squares;
pub mod matrix;
pub mod stats;

pub use fft::FftHelper;
pub use least_squares::{LevenbergMarquardt, Minimum, ResidualModel};
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
