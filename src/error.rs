use thiserror::Error;

/// Errors surfaced by the grid model and the solver facade.
///
/// Numerical failures (singular Jacobian, non-convergence) are not errors;
/// they are reported through [`crate::SolveStatus`] so the caller can decide
/// whether to retry with a different initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A delta or element definition referenced an id that does not exist.
    #[error("unknown {kind} id: {id}")]
    InvalidTopology { kind: &'static str, id: usize },

    /// No in-service slack generator remains on the network.
    #[error("no in-service slack generator")]
    NoSlackBus,
}
