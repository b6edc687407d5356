//! Control engine root.
//!
//! Fixed-point PID computation and actuator dispatch.

pub mod dispatch;
pub mod pid;
