use crate::linsolve::{FactorizedSolver, LinearSolveError};
use crate::model::GridModel;
use num_complex::Complex64;
use sprs::{CsMat, TriMat};
use std::f64::consts::PI;

/// Builds the nodal B matrix and phase shift injections for DC power flow.
///
/// The bus real power injections are related to bus voltage angles by
///     P = Bbus * Va + Pbusinj
/// Out-of-service branches contribute nothing to either.
pub fn make_b_dc(model: &GridModel) -> (CsMat<f64>, Vec<f64>) {
    let n = model.n_bus();

    let mut b_bus = TriMat::new((n, n));
    let mut p_businj = vec![0.0; n];

    for br in model.branches().iter().filter(|br| br.in_service) {
        // series susceptance, reactance only
        let tap = if br.tap == 0.0 { 1.0 } else { br.tap };
        let b = 1.0 / br.x / tap;

        let (f, t) = (br.from_bus, br.to_bus);
        b_bus.add_triplet(f, f, b);
        b_bus.add_triplet(f, t, -b);
        b_bus.add_triplet(t, f, -b);
        b_bus.add_triplet(t, t, b);

        // injected at the from bus and extracted at the to bus
        let pfinj = b * -br.shift * PI / 180.0;
        p_businj[f] += pfinj;
        p_businj[t] -= pfinj;
    }

    (b_bus.to_csr(), p_businj)
}

/// Solves a DC power flow for the voltage angles of the non-slack buses,
/// used as a Newton starting point. Slack and excluded bus angles are
/// kept from `va0`.
pub fn dc_init_angles(
    model: &GridModel,
    pv_pq: &[usize],
    s_bus: &[Complex64],
    va0: &[f64],
    pivot_threshold: f64,
) -> Result<Vec<f64>, LinearSolveError> {
    let n = model.n_bus();
    let npvpq = pv_pq.len();
    if npvpq == 0 {
        return Ok(va0.to_vec());
    }

    let mut reduced = vec![usize::MAX; n];
    for (k, &b) in pv_pq.iter().enumerate() {
        reduced[b] = k;
    }

    let (b_bus, p_businj) = make_b_dc(model);

    // Va(pvpq) = B(pvpq, pvpq) \ (P(pvpq) - Pbusinj(pvpq) - B(pvpq, other) * Va0(other))
    let mut rhs: Vec<f64> = pv_pq
        .iter()
        .map(|&b| s_bus[b].re - p_businj[b])
        .collect();
    let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(b_bus.nnz());
    for (row, row_vec) in b_bus.outer_iterator().enumerate() {
        let i = reduced[row];
        if i == usize::MAX {
            continue;
        }
        for (col, &b) in row_vec.iter() {
            let j = reduced[col];
            if j == usize::MAX {
                rhs[i] -= b * va0[col];
            } else {
                triplets.push((i, j, b));
            }
        }
    }

    let mut lin_solver = FactorizedSolver::new(pivot_threshold);
    let va_pvpq = lin_solver.solve(0, npvpq, &triplets, &rhs)?;

    let mut va = va0.to_vec();
    for (k, &b) in pv_pq.iter().enumerate() {
        va[b] = va_pvpq[k];
    }
    Ok(va)
}
