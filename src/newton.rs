use crate::debug::format_polar_vec;
use crate::jacobian::{jacobian_triplets, mismatch, ReducedIndex};
use crate::linsolve::FactorizedSolver;
use crate::math::norm_inf;
use crate::options::SolveOptions;
use log::{debug, trace};
use num_complex::Complex64;
use sprs::CsMat;

/// Outcome of a solve request. Attached to every result, never defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    /// The mismatch norm became non-finite before the iteration budget ran
    /// out.
    Diverged,
    MaxIterationsReached,
    /// The Jacobian was numerically singular; surfaced, not retried.
    SingularSystem,
    /// Converged, but isolated buses were excluded from the solve and are
    /// reported separately.
    Islanded,
}

impl SolveStatus {
    /// True when the returned voltage state is a solved operating point.
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Converged | SolveStatus::Islanded)
    }
}

/// States of the Newton iteration, explicit so the control flow stays
/// inspectable: the loop runs synchronously to a terminal state, with no
/// I/O and no suspension points.
#[derive(Debug)]
enum NewtonState {
    Initializing,
    Evaluating,
    Solving,
    Updating(Vec<f64>),
    Converged,
    Failed(SolveStatus),
}

/// Terminal state of a Newton run: the last iterate is always returned so
/// a failed solve can be inspected or warm-restarted by the caller.
#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub v: Vec<Complex64>,
    pub status: SolveStatus,
    pub iterations: usize,
    /// Infinity norm of the final mismatch vector (observability).
    pub max_mismatch: f64,
}

/// Solves the power flow equations using full Newton's method in polar
/// form.
///
/// Each iteration evaluates the mismatch, checks the convergence tolerance,
/// factorizes the Jacobian through `lin_solver` (reusing the symbolic
/// structure tied to `pattern_generation`) and applies the update to the
/// angle of all non-slack buses and the magnitude of PQ buses. Full Newton
/// steps are taken unless a damping factor below 1 is configured.
pub fn newton_pf(
    y_bus: &CsMat<Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    idx: &ReducedIndex,
    lin_solver: &mut FactorizedSolver,
    pattern_generation: u64,
    options: &SolveOptions,
) -> NewtonResult {
    let npvpq = idx.pv_pq.len();

    let mut v = v0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    let mut f = mismatch(y_bus, &v, s_bus, idx);
    let mut norm_f = norm_inf(&f);
    let mut i = 0;

    let mut state = NewtonState::Initializing;
    loop {
        state = match state {
            NewtonState::Initializing => {
                trace!("V0: {}", format_polar_vec(&v));
                NewtonState::Evaluating
            }
            NewtonState::Evaluating => {
                trace!("iteration {i}: max mismatch {norm_f:.3e}");
                if !norm_f.is_finite() {
                    NewtonState::Failed(SolveStatus::Diverged)
                } else if norm_f < options.tolerance {
                    NewtonState::Converged
                } else if i >= options.max_iterations {
                    NewtonState::Failed(SolveStatus::MaxIterationsReached)
                } else {
                    NewtonState::Solving
                }
            }
            NewtonState::Solving => {
                let triplets = jacobian_triplets(y_bus, &v, idx);
                let rhs: Vec<f64> = f.iter().map(|&f_i| -f_i).collect();
                match lin_solver.solve(pattern_generation, idx.dim, &triplets, &rhs) {
                    Ok(dx) => NewtonState::Updating(dx),
                    Err(err) => {
                        debug!("linear solve failed at iteration {i}: {err}");
                        NewtonState::Failed(SolveStatus::SingularSystem)
                    }
                }
            }
            NewtonState::Updating(dx) => {
                i += 1;
                for (k, &b) in idx.pv_pq.iter().enumerate() {
                    va[b] += options.damping * dx[k];
                }
                for (k, &b) in idx.pq.iter().enumerate() {
                    vm[b] += options.damping * dx[npvpq + k];
                }
                // rebuild V, then re-extract Vm and Va in case we wrapped
                // around with a negative Vm
                for (b, v_b) in v.iter_mut().enumerate() {
                    *v_b = Complex64::from_polar(vm[b], va[b]);
                    va[b] = v_b.arg();
                    vm[b] = v_b.norm();
                }
                f = mismatch(y_bus, &v, s_bus, idx);
                norm_f = norm_inf(&f);
                NewtonState::Evaluating
            }
            NewtonState::Converged => {
                debug!("Newton power flow converged in {i} iterations");
                return NewtonResult {
                    v,
                    status: SolveStatus::Converged,
                    iterations: i,
                    max_mismatch: norm_f,
                };
            }
            NewtonState::Failed(status) => {
                debug!("Newton power flow failed after {i} iterations: {status:?}");
                return NewtonResult {
                    v,
                    status,
                    iterations: i,
                    max_mismatch: norm_f,
                };
            }
        };
    }
}
