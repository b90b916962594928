//! AC power flow engine for repeated grid simulation.
//!
//! The crate models a transmission grid as arenas of buses, branches,
//! shunts, generators and loads, classifies buses from the live topology
//! and solves the AC power flow equations with a full Newton-Raphson
//! iteration over a sparse LU factorization. It is built for
//! solve-mutate-solve loops: admittance matrices, the symbolic
//! factorization of the Jacobian and the previous voltage are all cached
//! and invalidated by generation counters the model maintains.
//!
//! [`PowerFlowSolver`] is the intended entry point; the building blocks
//! (admittance assembly, mismatch and Jacobian evaluation, the Newton
//! loop itself) are exported for callers that need finer control.

mod classify;
mod dc;
mod error;
mod flows;
mod jacobian;
mod linsolve;
mod model;
mod newton;
mod options;
mod sbus;
mod solver;
mod ybus;

pub mod debug;
mod math;

pub use classify::*;
pub use dc::*;
pub use error::*;
pub use flows::*;
pub use jacobian::*;
pub use linsolve::*;
pub use math::{norm_inf, J};
pub use model::*;
pub use newton::*;
pub use options::*;
pub use sbus::*;
pub use solver::*;
pub use ybus::*;
