use crate::error::Error;
use log::debug;

/// GridModel holds the transmission network as flat, index-addressable
/// element arenas. The position of an element in its arena is its stable
/// identifier; topology changes flip in-service flags rather than removing
/// elements, so identifiers never move.
///
/// All electrical quantities are expressed in per unit on a common system
/// base. Voltage angles are in radians except for the transformer phase
/// shift, which is given in degrees as is conventional for case data.
#[derive(Debug, Clone, Default)]
pub struct GridModel {
    bus: Vec<Bus>,
    branch: Vec<Branch>,
    shunt: Vec<Shunt>,
    gen: Vec<Gen>,
    load: Vec<Load>,

    /// Bumped whenever the sparsity pattern of the solve may have changed:
    /// branch/shunt status flips (admittance structure) and generator status
    /// flips (bus classification, hence Jacobian blocking).
    pattern_generation: u64,
    /// Bumped whenever the admittance matrix itself must be rebuilt
    /// (branch or shunt status flips).
    admittance_generation: u64,
}

/// Bus is a node of the network graph. Loads, shunts and generators attach
/// to buses by index; the bus itself carries only its nominal voltage.
#[derive(Debug, Clone)]
pub struct Bus {
    /// Nominal voltage (kV). Informational; the solver works in per unit.
    pub base_kv: f64,
}

/// Transmission line, cable or transformer between two buses.
#[derive(Debug, Clone)]
pub struct Branch {
    pub from_bus: usize,
    pub to_bus: usize,
    /// Series resistance (p.u.).
    pub r: f64,
    /// Series reactance (p.u.).
    pub x: f64,
    /// Total line charging susceptance (p.u.).
    pub b: f64,
    /// Off-nominal tap ratio at the from end. 0 means 1 (no transformer).
    pub tap: f64,
    /// Phase shift angle (degrees), positive => delay from "from" to "to".
    pub shift: f64,
    pub in_service: bool,
}

impl Branch {
    /// A plain line: series impedance plus optional charging, no tap.
    pub fn line(from_bus: usize, to_bus: usize, r: f64, x: f64, b: f64) -> Self {
        Self {
            from_bus,
            to_bus,
            r,
            x,
            b,
            tap: 0.0,
            shift: 0.0,
            in_service: true,
        }
    }

    /// A two-winding transformer with off-nominal tap and phase shift.
    pub fn transformer(
        from_bus: usize,
        to_bus: usize,
        r: f64,
        x: f64,
        tap: f64,
        shift: f64,
    ) -> Self {
        Self {
            from_bus,
            to_bus,
            r,
            x,
            b: 0.0,
            tap,
            shift,
            in_service: true,
        }
    }
}

/// Fixed shunt admittance `g + jb` (p.u. at 1 p.u. voltage).
#[derive(Debug, Clone)]
pub struct Shunt {
    pub bus: usize,
    pub g: f64,
    pub b: f64,
    pub in_service: bool,
}

/// Voltage-controlling generator. The active power setpoint and controlled
/// voltage magnitude are inputs; reactive output is recovered after the
/// solve. Reactive limits are carried for the caller but not enforced here.
#[derive(Debug, Clone)]
pub struct Gen {
    pub bus: usize,
    /// Active power setpoint (p.u.), ignored for the slack machine.
    pub p: f64,
    /// Controlled voltage magnitude (p.u.).
    pub vm_setpoint: f64,
    pub qmin: f64,
    pub qmax: f64,
    /// Marks this machine as the angle reference for its sub-network.
    pub slack: bool,
    pub in_service: bool,
}

impl Gen {
    pub fn new(bus: usize, p: f64, vm_setpoint: f64) -> Self {
        Self {
            bus,
            p,
            vm_setpoint,
            qmin: f64::NEG_INFINITY,
            qmax: f64::INFINITY,
            slack: false,
            in_service: true,
        }
    }

    pub fn slack(bus: usize, vm_setpoint: f64) -> Self {
        Self {
            slack: true,
            ..Self::new(bus, 0.0, vm_setpoint)
        }
    }
}

/// Constant-power load demanding `p + jq` (p.u.).
#[derive(Debug, Clone)]
pub struct Load {
    pub bus: usize,
    pub p: f64,
    pub q: f64,
    pub in_service: bool,
}

impl Load {
    pub fn new(bus: usize, p: f64, q: f64) -> Self {
        Self {
            bus,
            p,
            q,
            in_service: true,
        }
    }
}

/// A batch of topology and injection changes, keyed by the stable element
/// identifiers returned at construction time. Status entries set the
/// absolute in-service state (they do not toggle), so applying the same
/// delta twice is a no-op the second time.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub branch_status: Vec<(usize, bool)>,
    pub shunt_status: Vec<(usize, bool)>,
    pub gen_status: Vec<(usize, bool)>,
    pub load_status: Vec<(usize, bool)>,
    /// `(id, p, vm_setpoint)` updates for generators.
    pub gen_setpoint: Vec<(usize, f64, f64)>,
    /// `(id, p, q)` updates for loads.
    pub load_setpoint: Vec<(usize, f64, f64)>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.branch_status.is_empty()
            && self.shunt_status.is_empty()
            && self.gen_status.is_empty()
            && self.load_status.is_empty()
            && self.gen_setpoint.is_empty()
            && self.load_setpoint.is_empty()
    }
}

impl GridModel {
    /// Creates a model with `n_bus` buses at 1 p.u. nominal voltage.
    pub fn new(n_bus: usize) -> Self {
        Self {
            bus: vec![Bus { base_kv: 1.0 }; n_bus],
            ..Default::default()
        }
    }

    pub fn n_bus(&self) -> usize {
        self.bus.len()
    }

    pub fn buses(&self) -> &[Bus] {
        &self.bus
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branch
    }

    pub fn shunts(&self) -> &[Shunt] {
        &self.shunt
    }

    pub fn gens(&self) -> &[Gen] {
        &self.gen
    }

    pub fn loads(&self) -> &[Load] {
        &self.load
    }

    /// Cache key for the Jacobian sparsity pattern.
    pub fn pattern_generation(&self) -> u64 {
        self.pattern_generation
    }

    /// Cache key for the admittance matrix.
    pub fn admittance_generation(&self) -> u64 {
        self.admittance_generation
    }

    fn check_bus(&self, bus: usize) -> Result<(), Error> {
        if bus >= self.bus.len() {
            Err(Error::InvalidTopology {
                kind: "bus",
                id: bus,
            })
        } else {
            Ok(())
        }
    }

    pub fn add_branch(&mut self, branch: Branch) -> Result<usize, Error> {
        self.check_bus(branch.from_bus)?;
        self.check_bus(branch.to_bus)?;
        self.branch.push(branch);
        self.admittance_generation += 1;
        self.pattern_generation += 1;
        Ok(self.branch.len() - 1)
    }

    pub fn add_shunt(&mut self, shunt: Shunt) -> Result<usize, Error> {
        self.check_bus(shunt.bus)?;
        self.shunt.push(shunt);
        self.admittance_generation += 1;
        self.pattern_generation += 1;
        Ok(self.shunt.len() - 1)
    }

    pub fn add_gen(&mut self, gen: Gen) -> Result<usize, Error> {
        self.check_bus(gen.bus)?;
        self.gen.push(gen);
        self.pattern_generation += 1;
        Ok(self.gen.len() - 1)
    }

    pub fn add_load(&mut self, load: Load) -> Result<usize, Error> {
        self.check_bus(load.bus)?;
        self.load.push(load);
        Ok(self.load.len() - 1)
    }

    /// Sets the in-service status of a branch. Generation counters are only
    /// bumped on an actual status flip, so redundant deltas do not
    /// invalidate the cached factorization structure.
    pub fn set_branch_status(&mut self, id: usize, in_service: bool) -> Result<(), Error> {
        let br = self.branch.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "branch",
            id,
        })?;
        if br.in_service != in_service {
            br.in_service = in_service;
            self.admittance_generation += 1;
            self.pattern_generation += 1;
        }
        Ok(())
    }

    pub fn set_shunt_status(&mut self, id: usize, in_service: bool) -> Result<(), Error> {
        let sh = self.shunt.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "shunt",
            id,
        })?;
        if sh.in_service != in_service {
            sh.in_service = in_service;
            self.admittance_generation += 1;
            self.pattern_generation += 1;
        }
        Ok(())
    }

    /// Generator status changes bus classification (PV set membership), so
    /// they invalidate the Jacobian pattern but not the admittance matrix.
    pub fn set_gen_status(&mut self, id: usize, in_service: bool) -> Result<(), Error> {
        let g = self.gen.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "generator",
            id,
        })?;
        if g.in_service != in_service {
            g.in_service = in_service;
            self.pattern_generation += 1;
        }
        Ok(())
    }

    /// Load status only moves injection values; no structure is invalidated.
    pub fn set_load_status(&mut self, id: usize, in_service: bool) -> Result<(), Error> {
        let l = self.load.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "load",
            id,
        })?;
        l.in_service = in_service;
        Ok(())
    }

    pub fn set_gen_setpoint(&mut self, id: usize, p: f64, vm_setpoint: f64) -> Result<(), Error> {
        let g = self.gen.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "generator",
            id,
        })?;
        g.p = p;
        g.vm_setpoint = vm_setpoint;
        Ok(())
    }

    pub fn set_load_setpoint(&mut self, id: usize, p: f64, q: f64) -> Result<(), Error> {
        let l = self.load.get_mut(id).ok_or(Error::InvalidTopology {
            kind: "load",
            id,
        })?;
        l.p = p;
        l.q = q;
        Ok(())
    }

    /// Applies a batch of changes, O(changed elements). Every identifier is
    /// validated before anything is mutated, so `InvalidTopology` leaves the
    /// model exactly as it was.
    pub fn apply(&mut self, delta: &Delta) -> Result<(), Error> {
        fn check(
            len: usize,
            kind: &'static str,
            ids: impl Iterator<Item = usize>,
        ) -> Result<(), Error> {
            for id in ids {
                if id >= len {
                    return Err(Error::InvalidTopology { kind, id });
                }
            }
            Ok(())
        }
        check(
            self.branch.len(),
            "branch",
            delta.branch_status.iter().map(|&(id, _)| id),
        )?;
        check(
            self.shunt.len(),
            "shunt",
            delta.shunt_status.iter().map(|&(id, _)| id),
        )?;
        check(
            self.gen.len(),
            "generator",
            delta
                .gen_status
                .iter()
                .map(|&(id, _)| id)
                .chain(delta.gen_setpoint.iter().map(|&(id, ..)| id)),
        )?;
        check(
            self.load.len(),
            "load",
            delta
                .load_status
                .iter()
                .map(|&(id, _)| id)
                .chain(delta.load_setpoint.iter().map(|&(id, ..)| id)),
        )?;

        for &(id, on) in &delta.branch_status {
            self.set_branch_status(id, on)?;
        }
        for &(id, on) in &delta.shunt_status {
            self.set_shunt_status(id, on)?;
        }
        for &(id, on) in &delta.gen_status {
            self.set_gen_status(id, on)?;
        }
        for &(id, on) in &delta.load_status {
            self.set_load_status(id, on)?;
        }
        for &(id, p, vm) in &delta.gen_setpoint {
            self.set_gen_setpoint(id, p, vm)?;
        }
        for &(id, p, q) in &delta.load_setpoint {
            self.set_load_setpoint(id, p, q)?;
        }
        if !delta.is_empty() {
            debug!(
                "applied delta: pattern generation {}, admittance generation {}",
                self.pattern_generation, self.admittance_generation
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus() -> GridModel {
        let mut model = GridModel::new(2);
        model.add_branch(Branch::line(0, 1, 0.01, 0.05, 0.0)).unwrap();
        model.add_gen(Gen::slack(0, 1.0)).unwrap();
        model.add_load(Load::new(1, 0.5, 0.1)).unwrap();
        model
    }

    #[test]
    fn unknown_ids_are_invalid_topology() {
        let mut model = two_bus();
        assert_eq!(
            model.set_branch_status(7, false),
            Err(Error::InvalidTopology {
                kind: "branch",
                id: 7
            })
        );
        assert_eq!(
            model.add_branch(Branch::line(0, 9, 0.01, 0.05, 0.0)),
            Err(Error::InvalidTopology { kind: "bus", id: 9 })
        );
    }

    #[test]
    fn status_flip_bumps_generations() {
        let mut model = two_bus();
        let pat = model.pattern_generation();
        let adm = model.admittance_generation();

        // redundant status write: no invalidation
        model.set_branch_status(0, true).unwrap();
        assert_eq!(model.pattern_generation(), pat);

        model.set_branch_status(0, false).unwrap();
        assert_eq!(model.pattern_generation(), pat + 1);
        assert_eq!(model.admittance_generation(), adm + 1);

        // generator flips touch the pattern but not the admittance matrix
        model.set_gen_status(0, false).unwrap();
        assert_eq!(model.pattern_generation(), pat + 2);
        assert_eq!(model.admittance_generation(), adm + 1);

        // setpoints are value-only changes
        model.set_load_setpoint(0, 0.6, 0.2).unwrap();
        assert_eq!(model.pattern_generation(), pat + 2);
    }

    #[test]
    fn delta_application_is_idempotent() {
        let mut model = two_bus();
        let delta = Delta {
            branch_status: vec![(0, false)],
            load_setpoint: vec![(0, 0.7, 0.3)],
            ..Default::default()
        };
        model.apply(&delta).unwrap();
        let pat = model.pattern_generation();
        model.apply(&delta).unwrap();
        assert_eq!(model.pattern_generation(), pat);
        assert!(!model.branches()[0].in_service);
        assert_eq!(model.loads()[0].p, 0.7);
    }

    #[test]
    fn failed_apply_leaves_the_model_untouched() {
        let mut model = two_bus();
        let pat = model.pattern_generation();
        // valid branch flip batched with an unknown load id
        let delta = Delta {
            branch_status: vec![(0, false)],
            load_status: vec![(9, false)],
            ..Default::default()
        };
        assert_eq!(
            model.apply(&delta),
            Err(Error::InvalidTopology { kind: "load", id: 9 })
        );
        assert!(model.branches()[0].in_service);
        assert_eq!(model.pattern_generation(), pat);
    }
}
