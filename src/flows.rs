use crate::classify::BusRole;
use crate::model::GridModel;
use crate::ybus::ybus_mul;
use num_complex::Complex64;
use sprs::CsMat;

/// Complex power entering a branch from each terminal (p.u.). Both values
/// are oriented into the branch, so their sum is the branch loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchFlow {
    pub p_from: f64,
    pub q_from: f64,
    pub p_to: f64,
    pub q_to: f64,
}

impl BranchFlow {
    pub fn loss(&self) -> Complex64 {
        Complex64::new(self.p_from + self.p_to, self.q_from + self.q_to)
    }
}

/// Recovered output of a single generator (p.u.).
#[derive(Debug, Clone, Copy, Default)]
pub struct GenOutput {
    pub p: f64,
    pub q: f64,
}

/// Computes the complex power flow at both ends of every branch from the
/// solved voltage and the branch admittance matrices:
///     Sf = V(f) .* conj(Yf * V),    St = V(t) .* conj(Yt * V)
/// Out-of-service branches have empty rows in Yf/Yt and report zero flow.
pub fn branch_flows(
    model: &GridModel,
    y_f: &CsMat<Complex64>,
    y_t: &CsMat<Complex64>,
    v: &[Complex64],
) -> Vec<BranchFlow> {
    let i_f = ybus_mul(y_f, v);
    let i_t = ybus_mul(y_t, v);

    model
        .branches()
        .iter()
        .enumerate()
        .map(|(i, br)| {
            let s_f = v[br.from_bus] * i_f[i].conj();
            let s_t = v[br.to_bus] * i_t[i].conj();
            BranchFlow {
                p_from: s_f.re,
                q_from: s_f.im,
                p_to: s_t.re,
                q_to: s_t.im,
            }
        })
        .collect()
}

/// Total network loss, the sum of the per-branch losses.
pub fn total_loss(flows: &[BranchFlow]) -> Complex64 {
    flows.iter().map(BranchFlow::loss).sum()
}

/// Recovers per-generator output from the solved voltage.
///
/// The net complex injection at each bus is V .* conj(Ybus*V); adding
/// back the local load gives the total generation that the machines at
/// that bus must supply. Reactive power is shared in proportion to each
/// machine's reactive range (equally when the ranges are unbounded or
/// degenerate). Active power follows the setpoints, except that the first
/// slack machine on its bus absorbs the residual.
pub fn gen_outputs(
    model: &GridModel,
    y_bus: &CsMat<Complex64>,
    v: &[Complex64],
    role: &[BusRole],
) -> Vec<GenOutput> {
    let n = model.n_bus();
    let i_bus = ybus_mul(y_bus, v);

    let mut s_gen = vec![Complex64::new(0.0, 0.0); n];
    for (b, s) in s_gen.iter_mut().enumerate() {
        *s = v[b] * i_bus[b].conj();
    }
    for load in model.loads().iter().filter(|l| l.in_service) {
        s_gen[load.bus] += Complex64::new(load.p, load.q);
    }

    let mut out = vec![GenOutput::default(); model.gens().len()];
    for b in 0..n {
        if role[b] == BusRole::Isolated {
            continue;
        }
        let at_bus: Vec<usize> = model
            .gens()
            .iter()
            .enumerate()
            .filter(|(_, g)| g.in_service && g.bus == b)
            .map(|(i, _)| i)
            .collect();
        if at_bus.is_empty() {
            continue;
        }

        // reactive split by range, equal shares when the ranges give no
        // usable weights
        let ranges: Vec<f64> = at_bus
            .iter()
            .map(|&i| model.gens()[i].qmax - model.gens()[i].qmin)
            .collect();
        let range_total: f64 = ranges.iter().sum();
        let usable = range_total.is_finite()
            && range_total > 0.0
            && ranges.iter().all(|r| r.is_finite() && *r >= 0.0);
        for (k, &i) in at_bus.iter().enumerate() {
            let w = if usable {
                ranges[k] / range_total
            } else {
                1.0 / at_bus.len() as f64
            };
            out[i].q = w * s_gen[b].im;
        }

        for &i in &at_bus {
            out[i].p = model.gens()[i].p;
        }
        if role[b] == BusRole::Slack {
            if let Some(&first) = at_bus.iter().find(|&&i| model.gens()[i].slack) {
                let others: f64 = at_bus
                    .iter()
                    .filter(|&&i| i != first)
                    .map(|&i| model.gens()[i].p)
                    .sum();
                out[first].p = s_gen[b].re - others;
            }
        }
    }
    out
}
