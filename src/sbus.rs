use crate::cmplx;
use crate::model::GridModel;
use num_complex::Complex64;
use num_traits::Zero;

/// Builds the vector of complex bus power injections, that is, generation
/// minus load, in per unit.
///
/// Generator reactive output is free at PV buses and the active setpoint of
/// the slack machine is recovered after the solve, so only the active
/// setpoint enters here; shunts live in the admittance matrix, not in the
/// injection vector. Out-of-service generators and loads contribute
/// nothing, regardless of their setpoints.
pub fn make_sbus(model: &GridModel) -> Vec<Complex64> {
    let mut s_bus = vec![Complex64::zero(); model.n_bus()];

    for g in model.gens().iter().filter(|g| g.in_service) {
        s_bus[g.bus] += cmplx!(g.p);
    }
    for l in model.loads().iter().filter(|l| l.in_service) {
        s_bus[l.bus] -= cmplx!(l.p, l.q);
    }
    s_bus
}
