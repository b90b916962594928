use derive_builder::Builder;

/// Power flow solver options.
///
/// ```
/// use gridflow::SolveOptionsBuilder;
///
/// let options = SolveOptionsBuilder::default()
///     .tolerance(1e-10)
///     .max_iterations(20)
///     .build()
///     .unwrap();
/// assert_eq!(options.max_iterations, 20);
/// ```
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default)]
pub struct SolveOptions {
    /// Termination tolerance on the infinity norm of the power mismatch,
    /// in per-unit.
    pub tolerance: f64,
    /// Maximum number of Newton iterations.
    pub max_iterations: usize,
    /// Step length multiplier applied to each Newton update. 1.0 takes
    /// full steps; values below 1 trade speed for robustness on stressed
    /// cases.
    pub damping: f64,
    /// Smallest row/column magnitude in the Jacobian accepted before the
    /// system is declared singular.
    pub pivot_threshold: f64,
    /// Seed the voltage angles from a DC power flow instead of a flat
    /// start when no previous solution is available.
    pub dc_init: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 10,
            damping: 1.0,
            pivot_threshold: 1e-12,
            dc_init: false,
        }
    }
}
