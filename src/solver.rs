use crate::classify::{classify, BusRole, Classification};
use crate::dc::dc_init_angles;
use crate::error::Error;
use crate::flows::{branch_flows, gen_outputs, total_loss, BranchFlow, GenOutput};
use crate::jacobian::ReducedIndex;
use crate::linsolve::FactorizedSolver;
use crate::model::{Delta, GridModel};
use crate::newton::{newton_pf, NewtonResult, SolveStatus};
use crate::options::SolveOptions;
use crate::sbus::make_sbus;
use crate::ybus::make_ybus;
use log::debug;
use num_complex::Complex64;
use sprs::CsMat;

/// Result of one solve. Voltages are reported for every bus; buses that
/// were cut off from any slack machine carry zero magnitude and angle.
#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    pub iterations: usize,
    /// Largest remaining power mismatch (p.u.).
    pub max_mismatch: f64,
    /// Voltage magnitude per bus (p.u.).
    pub vm: Vec<f64>,
    /// Voltage angle per bus (radians).
    pub va: Vec<f64>,
    /// Per-branch terminal flows, indexed by branch id.
    pub branch_flows: Vec<BranchFlow>,
    /// Total network loss.
    pub losses: Complex64,
    /// Per-generator recovered output, indexed by generator id.
    pub gen: Vec<GenOutput>,
    /// Buses excluded from the solve.
    pub isolated: Vec<usize>,
}

impl Solution {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

struct YbusCache {
    admittance_generation: u64,
    y_bus: CsMat<Complex64>,
    y_f: CsMat<Complex64>,
    y_t: CsMat<Complex64>,
}

impl YbusCache {
    fn build(model: &GridModel) -> Self {
        let (y_bus, y_f, y_t) = make_ybus(model, true);
        Self {
            admittance_generation: model.admittance_generation(),
            y_bus,
            // present whenever make_ybus is asked for them
            y_f: y_f.unwrap_or_else(|| CsMat::zero((0, 0))),
            y_t: y_t.unwrap_or_else(|| CsMat::zero((0, 0))),
        }
    }
}

/// Stateful power flow facade.
///
/// Owns the grid model and carries everything worth keeping between
/// solves: the admittance matrices (rebuilt only when a branch or shunt
/// status changed), the symbolic factorization of the Jacobian (reused
/// while the sparsity pattern holds) and the last voltage iterate for
/// warm starts.
pub struct PowerFlowSolver {
    model: GridModel,
    options: SolveOptions,
    ybus: YbusCache,
    lin_solver: FactorizedSolver,
    v_prev: Option<Vec<Complex64>>,
}

impl PowerFlowSolver {
    pub fn new(model: GridModel, options: SolveOptions) -> Self {
        let lin_solver = FactorizedSolver::new(options.pivot_threshold);
        let ybus = YbusCache::build(&model);
        Self {
            model,
            options,
            ybus,
            lin_solver,
            v_prev: None,
        }
    }

    pub fn model(&self) -> &GridModel {
        &self.model
    }

    /// Direct access to the model. Edits go through the model's own
    /// methods, which keep the cache invalidation counters honest.
    pub fn model_mut(&mut self) -> &mut GridModel {
        &mut self.model
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Applies a batch of changes and runs an AC power flow.
    ///
    /// With `warm_start` the previous solve's voltage seeds the iteration
    /// when one is available; otherwise (and on the first call) a flat
    /// start is used, optionally refined by a DC angle estimate. Voltage
    /// setpoints of in-service machines are re-applied to the start
    /// vector either way.
    pub fn solve(&mut self, delta: &Delta, warm_start: bool) -> Result<Solution, Error> {
        self.model.apply(delta)?;

        let cls = classify(&self.model)?;
        self.refresh_ybus();

        let s_bus = make_sbus(&self.model);
        let v0 = self.start_voltage(&cls, &s_bus, warm_start);

        let idx = ReducedIndex::new(self.model.n_bus(), &cls.pv, &cls.pq);
        let result = newton_pf(
            &self.ybus.y_bus,
            &s_bus,
            &v0,
            &idx,
            &mut self.lin_solver,
            self.model.pattern_generation(),
            &self.options,
        );
        self.v_prev = Some(result.v.clone());

        Ok(self.package(&cls, result))
    }

    fn refresh_ybus(&mut self) {
        let generation = self.model.admittance_generation();
        if self.ybus.admittance_generation != generation {
            debug!("rebuilding admittance matrices (generation {generation})");
            self.ybus = YbusCache::build(&self.model);
        }
    }

    fn start_voltage(
        &self,
        cls: &Classification,
        s_bus: &[Complex64],
        warm_start: bool,
    ) -> Vec<Complex64> {
        let n = self.model.n_bus();
        let mut v: Vec<Complex64> = match &self.v_prev {
            Some(prev) if warm_start && prev.len() == n => prev.clone(),
            _ => vec![Complex64::new(1.0, 0.0); n],
        };

        // excluded buses must not leak stale or non-finite values into
        // the next iteration
        for (b, v_b) in v.iter_mut().enumerate() {
            if cls.role[b] == BusRole::Isolated || !v_b.re.is_finite() || !v_b.im.is_finite() {
                *v_b = Complex64::new(1.0, 0.0);
            }
        }

        // pin controlled magnitudes, keep the angle
        for gen in self.model.gens().iter().filter(|g| g.in_service) {
            let va = v[gen.bus].arg();
            v[gen.bus] = Complex64::from_polar(gen.vm_setpoint, va);
        }

        if self.options.dc_init && (!warm_start || self.v_prev.is_none()) {
            let mut pv_pq = cls.pv.clone();
            pv_pq.extend_from_slice(&cls.pq);
            let va0: Vec<f64> = v.iter().map(|v| v.arg()).collect();
            match dc_init_angles(
                &self.model,
                &pv_pq,
                s_bus,
                &va0,
                self.options.pivot_threshold,
            ) {
                Ok(va) => {
                    for (v_b, &va_b) in v.iter_mut().zip(&va) {
                        *v_b = Complex64::from_polar(v_b.norm(), va_b);
                    }
                }
                Err(err) => debug!("DC angle initialization failed, using flat start: {err}"),
            }
        }

        v
    }

    fn package(&self, cls: &Classification, result: NewtonResult) -> Solution {
        let mut v = result.v;
        for &b in &cls.isolated {
            v[b] = Complex64::new(0.0, 0.0);
        }

        let flows = branch_flows(&self.model, &self.ybus.y_f, &self.ybus.y_t, &v);
        let losses = total_loss(&flows);
        let gen = gen_outputs(&self.model, &self.ybus.y_bus, &v, &cls.role);

        let status = match result.status {
            SolveStatus::Converged if !cls.isolated.is_empty() => SolveStatus::Islanded,
            other => other,
        };

        Solution {
            status,
            iterations: result.iterations,
            max_mismatch: result.max_mismatch,
            vm: v.iter().map(|v| v.norm()).collect(),
            va: v.iter().map(|v| v.arg()).collect(),
            branch_flows: flows,
            losses,
            gen,
            isolated: cls.isolated.clone(),
        }
    }
}
