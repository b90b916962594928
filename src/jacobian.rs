use crate::math::J;
use crate::ybus::ybus_mul;
use num_complex::Complex64;
use num_traits::Zero;
use sprs::CsMat;

/// Index maps between bus numbers and the rows/columns of the reduced
/// mismatch/Jacobian system.
///
/// Row ordering follows the MATPOWER convention: active power mismatch at
/// PV then PQ buses, followed by reactive power mismatch at PQ buses.
/// Columns are voltage angle at PV then PQ buses, followed by voltage
/// magnitude at PQ buses. Slack and isolated buses appear in neither.
#[derive(Debug, Clone)]
pub struct ReducedIndex {
    pub pv_pq: Vec<usize>,
    pub pq: Vec<usize>,
    /// Row of the P mismatch equation of each bus, if any.
    p_row: Vec<Option<usize>>,
    /// Row of the Q mismatch equation of each bus, if any.
    q_row: Vec<Option<usize>>,
    /// Column of the angle variable of each bus, if any.
    a_col: Vec<Option<usize>>,
    /// Column of the magnitude variable of each bus, if any.
    m_col: Vec<Option<usize>>,
    pub dim: usize,
}

impl ReducedIndex {
    pub fn new(n_bus: usize, pv: &[usize], pq: &[usize]) -> Self {
        let pv_pq = [pv, pq].concat();
        let npvpq = pv_pq.len();

        let mut p_row = vec![None; n_bus];
        let mut q_row = vec![None; n_bus];
        let mut a_col = vec![None; n_bus];
        let mut m_col = vec![None; n_bus];
        for (k, &b) in pv_pq.iter().enumerate() {
            p_row[b] = Some(k);
            a_col[b] = Some(k);
        }
        for (k, &b) in pq.iter().enumerate() {
            q_row[b] = Some(npvpq + k);
            m_col[b] = Some(npvpq + k);
        }
        Self {
            dim: npvpq + pq.len(),
            pv_pq,
            pq: pq.to_vec(),
            p_row,
            q_row,
            a_col,
            m_col,
        }
    }
}

/// Evaluates the power mismatch vector `F(x)` at the given voltage state.
///
/// The mismatch at each non-slack bus is the computed injection
/// `V .* conj(Ybus * V)` minus the specified injection: real part at PV and
/// PQ buses, imaginary part at PQ buses only. Magnitudes near zero are not
/// guarded; a degenerate island surfaces as a singular system downstream
/// rather than a silent divide.
pub fn mismatch(
    y_bus: &CsMat<Complex64>,
    v: &[Complex64],
    s_bus: &[Complex64],
    idx: &ReducedIndex,
) -> Vec<f64> {
    let i_bus = ybus_mul(y_bus, v);
    let mut f = vec![0.0; idx.dim];
    for (bus, (&vi, &ii)) in v.iter().zip(&i_bus).enumerate() {
        let mis = vi * ii.conj() - s_bus[bus];
        if let Some(r) = idx.p_row[bus] {
            f[r] = mis.re;
        }
        if let Some(r) = idx.q_row[bus] {
            f[r] = mis.im;
        }
    }
    f
}

/// Builds the reduced power flow Jacobian as triplets, `dim x dim`.
///
/// The four blocks are the partial derivatives of the bus power injections
/// with respect to voltage angle and magnitude (polar form):
///
/// ```text
/// dSbus/dVa[i,j] = j*Vi * conj(-Yij*Vj)                    (i != j)
/// dSbus/dVa[i,i] = j*Vi * conj(Ibus_i - Yii*Vi)
/// dSbus/dVm[i,j] = Vi * conj(Yij * Vj/|Vj|)                (i != j)
/// dSbus/dVm[i,i] = Vi * conj(Yii * Vi/|Vi|) + conj(Ibus_i) * Vi/|Vi|
/// ```
///
/// PV bus magnitude is held at its setpoint by construction: those columns
/// are simply never emitted. One triplet is produced per structural entry
/// of `Ybus` per block, so the pattern depends only on the topology and the
/// classification, never on the voltage values; this is what lets the
/// symbolic factorization be reused across iterations.
pub fn jacobian_triplets(
    y_bus: &CsMat<Complex64>,
    v: &[Complex64],
    idx: &ReducedIndex,
) -> Vec<(usize, usize, f64)> {
    let i_bus = ybus_mul(y_bus, v);
    let v_norm: Vec<Complex64> = v
        .iter()
        .map(|vi| {
            let m = vi.norm();
            if m > 0.0 {
                *vi / m
            } else {
                Complex64::zero()
            }
        })
        .collect();

    let mut triplets = Vec::with_capacity(4 * y_bus.nnz());
    for (i, row) in y_bus.outer_iterator().enumerate() {
        let (p_row, q_row) = (idx.p_row[i], idx.q_row[i]);
        if p_row.is_none() && q_row.is_none() {
            continue;
        }
        for (j, &y_ij) in row.iter() {
            let (d_va, d_vm) = if i == j {
                (
                    J * v[i] * (i_bus[i] - y_ij * v[j]).conj(),
                    v[i] * (y_ij * v_norm[j]).conj() + i_bus[i].conj() * v_norm[j],
                )
            } else {
                (
                    J * v[i] * (-y_ij * v[j]).conj(),
                    v[i] * (y_ij * v_norm[j]).conj(),
                )
            };
            if let Some(r) = p_row {
                if let Some(c) = idx.a_col[j] {
                    triplets.push((r, c, d_va.re));
                }
                if let Some(c) = idx.m_col[j] {
                    triplets.push((r, c, d_vm.re));
                }
            }
            if let Some(r) = q_row {
                if let Some(c) = idx.a_col[j] {
                    triplets.push((r, c, d_va.im));
                }
                if let Some(c) = idx.m_col[j] {
                    triplets.push((r, c, d_vm.im));
                }
            }
        }
    }
    triplets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Branch, Gen, GridModel, Load};
    use crate::sbus::make_sbus;
    use crate::ybus::make_ybus;

    fn dense(triplets: &[(usize, usize, f64)], dim: usize) -> Vec<Vec<f64>> {
        let mut a = vec![vec![0.0; dim]; dim];
        for &(i, j, x) in triplets {
            a[i][j] += x;
        }
        a
    }

    /// Three-bus meshed case: slack, PV and PQ all present.
    fn case() -> (GridModel, Vec<Complex64>) {
        let mut model = GridModel::new(3);
        model.add_branch(Branch::line(0, 1, 0.01, 0.04, 0.0)).unwrap();
        model.add_branch(Branch::line(1, 2, 0.01, 0.04, 0.0)).unwrap();
        model.add_branch(Branch::line(0, 2, 0.01, 0.04, 0.0)).unwrap();
        model.add_gen(Gen::slack(0, 1.0)).unwrap();
        model.add_gen(Gen::new(1, 0.3, 1.02)).unwrap();
        model.add_load(Load::new(2, 0.4, 0.1)).unwrap();
        // an off-solution state so the derivatives are non-trivial
        let v = vec![
            Complex64::from_polar(1.0, 0.0),
            Complex64::from_polar(1.02, -0.01),
            Complex64::from_polar(0.98, -0.03),
        ];
        (model, v)
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let (model, v) = case();
        let (y, _, _) = make_ybus(&model, false);
        let s = make_sbus(&model);
        let idx = ReducedIndex::new(3, &[1], &[2]);

        let jac = dense(&jacobian_triplets(&y, &v, &idx), idx.dim);

        let h = 1e-7;
        let f_of = |v: &[Complex64]| mismatch(&y, v, &s, &idx);
        // columns: angle at bus 1, angle at bus 2, magnitude at bus 2
        let perturb = |v: &[Complex64], col: usize, d: f64| -> Vec<Complex64> {
            let mut w = v.to_vec();
            match col {
                0 => w[1] = Complex64::from_polar(w[1].norm(), w[1].arg() + d),
                1 => w[2] = Complex64::from_polar(w[2].norm(), w[2].arg() + d),
                _ => w[2] = Complex64::from_polar(w[2].norm() + d, w[2].arg()),
            }
            w
        };
        for col in 0..idx.dim {
            let f_plus = f_of(&perturb(&v, col, h));
            let f_minus = f_of(&perturb(&v, col, -h));
            for row in 0..idx.dim {
                let fd = (f_plus[row] - f_minus[row]) / (2.0 * h);
                assert!(
                    (jac[row][col] - fd).abs() < 1e-5,
                    "J[{row}][{col}] = {} vs fd {}",
                    jac[row][col],
                    fd
                );
            }
        }
    }

    #[test]
    fn pattern_is_voltage_independent() {
        let (model, v) = case();
        let (y, _, _) = make_ybus(&model, false);
        let idx = ReducedIndex::new(3, &[1], &[2]);

        let keys = |v: &[Complex64]| -> Vec<(usize, usize)> {
            jacobian_triplets(&y, v, &idx)
                .iter()
                .map(|&(i, j, _)| (i, j))
                .collect()
        };
        let flat = vec![Complex64::new(1.0, 0.0); 3];
        assert_eq!(keys(&v), keys(&flat));
    }

    #[test]
    fn mismatch_is_zero_at_specified_injection() {
        // flat voltage with no load: computed injection equals zero
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.01, 0.05, 0.0)).unwrap();
        model.add_gen(Gen::slack(0, 1.0)).unwrap();
        let (y, _, _) = make_ybus(&model, false);
        let s = make_sbus(&model);
        let idx = ReducedIndex::new(2, &[], &[1]);
        let v = vec![Complex64::new(1.0, 0.0); 2];
        let f = mismatch(&y, &v, &s, &idx);
        assert!(f.iter().all(|x| x.abs() < 1e-14));
    }
}
