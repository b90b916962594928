use crate::cmplx;
use crate::math::J;
use crate::model::GridModel;
use num_complex::Complex64;
use num_traits::Zero;
use sprs::{CsMat, TriMat};
use std::f64::consts::PI;

/// Builds the bus admittance matrix and, optionally, the branch admittance
/// matrices.
///
/// For each in-service branch the elements of the branch admittance matrix
/// are computed where:
///
/// ```text
///      | If |   | Yff  Yft |   | Vf |
///      |    | = |          | * |    |
///      | It |   | Ytf  Ytt |   | Vt |
/// ```
///
/// `Yf` and `Yt` are built such that `Yf * V` is the vector of complex
/// branch currents injected at each branch's "from" bus, and `Yt` the same
/// for the "to" end. Out-of-service branches contribute no entries, so the
/// sparsity pattern shrinks with the topology; callers key cached
/// factorization structure on [`GridModel::pattern_generation`].
///
/// The matrix is a pure function of the model's in-service branches and
/// shunts; it carries no identity of its own and is rebuilt, not patched,
/// after a topology change.
pub fn make_ybus(
    model: &GridModel,
    yf_yt: bool,
) -> (
    CsMat<Complex64>,
    Option<CsMat<Complex64>>,
    Option<CsMat<Complex64>>,
) {
    let nb = model.n_bus();
    let nl = model.branches().len();

    let mut y_bus = TriMat::new((nb, nb));
    let mut y_f = yf_yt.then(|| TriMat::new((nl, nb)));
    let mut y_t = yf_yt.then(|| TriMat::new((nl, nb)));

    for (i, br) in model.branches().iter().enumerate() {
        if !br.in_service {
            continue;
        }
        let y_s = cmplx!(1.0) / cmplx!(br.r, br.x); // series admittance
        let t = if br.tap == 0.0 { 1.0 } else { br.tap }; // default tap ratio = 1
        let tap = Complex64::from_polar(t, br.shift * PI / 180.0); // add phase shifters

        let y_tt = y_s + J * (br.b / 2.0);
        let y_ff = y_tt / (tap * tap.conj());
        let y_ft = -y_s / tap.conj();
        let y_tf = -y_s / tap;

        let (f, t) = (br.from_bus, br.to_bus);

        if let (Some(y_f), Some(y_t)) = (y_f.as_mut(), y_t.as_mut()) {
            y_f.add_triplet(i, f, y_ff);
            y_f.add_triplet(i, t, y_ft);

            y_t.add_triplet(i, f, y_tf);
            y_t.add_triplet(i, t, y_tt);
        }

        y_bus.add_triplet(f, f, y_ff);
        y_bus.add_triplet(f, t, y_ft);
        y_bus.add_triplet(t, f, y_tf);
        y_bus.add_triplet(t, t, y_tt);
    }

    for sh in model.shunts().iter().filter(|sh| sh.in_service) {
        y_bus.add_triplet(sh.bus, sh.bus, cmplx!(sh.g, sh.b));
    }

    let y_bus: CsMat<Complex64> = y_bus.to_csr();
    let y_f: Option<CsMat<Complex64>> = y_f.map(|m| m.to_csr());
    let y_t: Option<CsMat<Complex64>> = y_t.map(|m| m.to_csr());
    (y_bus, y_f, y_t)
}

/// Sparse matrix-vector product `y * v`.
pub fn ybus_mul(y: &CsMat<Complex64>, v: &[Complex64]) -> Vec<Complex64> {
    let mut out = vec![Complex64::zero(); y.rows()];
    for (i, row) in y.outer_iterator().enumerate() {
        let mut acc = Complex64::zero();
        for (j, &y_ij) in row.iter() {
            acc += y_ij * v[j];
        }
        out[i] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Branch, GridModel, Shunt};

    const EPS: f64 = 1e-12;

    fn close(a: Complex64, re: f64, im: f64) {
        assert!((a.re - re).abs() < EPS && (a.im - im).abs() < EPS, "{a}");
    }

    #[test]
    fn line_admittance_blocks() {
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.01, 0.05, 0.0)).unwrap();
        let (y, _, _) = make_ybus(&model, false);

        // ys = 1/(0.01 + j0.05) = 3.84615... - j19.23076...
        let g = 0.01 / (0.01f64.powi(2) + 0.05f64.powi(2));
        let b = -0.05 / (0.01f64.powi(2) + 0.05f64.powi(2));
        close(*y.get(0, 0).unwrap(), g, b);
        close(*y.get(1, 1).unwrap(), g, b);
        close(*y.get(0, 1).unwrap(), -g, -b);
        close(*y.get(1, 0).unwrap(), -g, -b);
    }

    #[test]
    fn tap_scales_from_end() {
        let mut model = GridModel::new(2);
        model
            .add_branch(Branch::transformer(0, 1, 0.0, 0.1, 2.0, 0.0))
            .unwrap();
        let (y, _, _) = make_ybus(&model, false);
        // yff = ys / tap^2, ytt = ys, yft = ytf = -ys / tap
        close(*y.get(0, 0).unwrap(), 0.0, -10.0 / 4.0);
        close(*y.get(1, 1).unwrap(), 0.0, -10.0);
        close(*y.get(0, 1).unwrap(), 0.0, 5.0);
        close(*y.get(1, 0).unwrap(), 0.0, 5.0);
    }

    #[test]
    fn charging_and_shunt_on_diagonal() {
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.0, 0.1, 0.2)).unwrap();
        model
            .add_shunt(Shunt {
                bus: 0,
                g: 0.05,
                b: 0.3,
                in_service: true,
            })
            .unwrap();
        let (y, _, _) = make_ybus(&model, false);
        close(*y.get(0, 0).unwrap(), 0.05, -10.0 + 0.1 + 0.3);
        close(*y.get(1, 1).unwrap(), 0.0, -10.0 + 0.1);
    }

    #[test]
    fn out_of_service_branch_leaves_no_entries() {
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.01, 0.05, 0.0)).unwrap();
        model.set_branch_status(0, false).unwrap();
        let (y, _, _) = make_ybus(&model, false);
        assert_eq!(y.nnz(), 0);
    }

    #[test]
    fn yf_rows_give_from_currents() {
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.0, 0.5, 0.0)).unwrap();
        let (_, yf, _) = make_ybus(&model, true);
        let v = vec![Complex64::new(1.0, 0.0), Complex64::new(0.9, 0.0)];
        let i_f = ybus_mul(&yf.unwrap(), &v);
        // If = (Vf - Vt) / jx = 0.1 / j0.5 = -j0.2
        close(i_f[0], 0.0, -0.2);
    }
}
