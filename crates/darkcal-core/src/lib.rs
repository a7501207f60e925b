pub mod config;
pub mod consts;
pub mod error;
pub mod estimator;
pub mod finalize;
pub mod frame;
pub mod grid;
pub mod session;
pub mod significance;
pub mod totals;
