use crate::error::Error;
use crate::model::GridModel;
use log::debug;
use std::collections::VecDeque;

/// Role a bus plays in the current solve. Recomputed on every solve from
/// generator status and connectivity; never cached across changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    /// Angle reference; absorbs the sub-network power imbalance.
    Slack,
    /// Voltage-controlled bus (in-service generator, magnitude fixed).
    Pv,
    /// Load bus; magnitude and angle both free.
    Pq,
    /// Unreachable from any slack bus; excluded from the solve.
    Isolated,
}

/// Index lists for each type of bus, in the ordering used to assemble the
/// reduced mismatch/Jacobian system (PV buses first, then PQ).
#[derive(Debug, Clone)]
pub struct Classification {
    pub role: Vec<BusRole>,
    pub slack: Vec<usize>,
    pub pv: Vec<usize>,
    pub pq: Vec<usize>,
    pub isolated: Vec<usize>,
}

impl Classification {
    pub fn is_solved(&self, bus: usize) -> bool {
        self.role[bus] != BusRole::Isolated
    }
}

/// Partitions buses into {slack, PV, PQ, isolated}.
///
/// Connectivity is traversed from each declared slack bus over in-service
/// branches; buses unreachable from every slack bus are marked isolated and
/// reported, not failed. A bus carrying an in-service generator becomes PV
/// unless it is the angle reference. When several in-service slack machines
/// share a connected sub-network, the first declared one keeps the
/// reference and the others are demoted to PV, following the MATPOWER
/// convention of one reference per island.
///
/// Fails with `NoSlackBus` when no in-service slack generator exists at all.
pub fn classify(model: &GridModel) -> Result<Classification, Error> {
    let nb = model.n_bus();

    // adjacency over in-service branches
    let mut adj = vec![Vec::new(); nb];
    for br in model.branches().iter().filter(|br| br.in_service) {
        adj[br.from_bus].push(br.to_bus);
        adj[br.to_bus].push(br.from_bus);
    }

    let slack_buses: Vec<usize> = model
        .gens()
        .iter()
        .filter(|g| g.in_service && g.slack)
        .map(|g| g.bus)
        .collect();
    if slack_buses.is_empty() {
        return Err(Error::NoSlackBus);
    }

    // reachable[b] = Some(component) once visited; components are numbered
    // by the slack bus that discovered them
    let mut component = vec![usize::MAX; nb];
    let mut n_components = 0;
    for &s in &slack_buses {
        if component[s] != usize::MAX {
            continue;
        }
        let c = n_components;
        n_components += 1;
        let mut queue = VecDeque::from([s]);
        component[s] = c;
        while let Some(b) = queue.pop_front() {
            for &n in &adj[b] {
                if component[n] == usize::MAX {
                    component[n] = c;
                    queue.push_back(n);
                }
            }
        }
    }

    let mut has_gen = vec![false; nb];
    for g in model.gens().iter().filter(|g| g.in_service) {
        has_gen[g.bus] = true;
    }

    let mut role = vec![BusRole::Pq; nb];
    let mut slack_of_component = vec![None; n_components];
    for &s in &slack_buses {
        let c = component[s];
        match slack_of_component[c] {
            None => {
                slack_of_component[c] = Some(s);
                role[s] = BusRole::Slack;
            }
            // second reference on the same island: demote to PV
            Some(first) if first != s => role[s] = BusRole::Pv,
            Some(_) => {}
        }
    }
    for b in 0..nb {
        if component[b] == usize::MAX {
            role[b] = BusRole::Isolated;
        } else if role[b] == BusRole::Pq && has_gen[b] {
            role[b] = BusRole::Pv;
        }
    }

    let pick = |want: BusRole| -> Vec<usize> {
        (0..nb).filter(|&b| role[b] == want).collect()
    };
    let class = Classification {
        slack: pick(BusRole::Slack),
        pv: pick(BusRole::Pv),
        pq: pick(BusRole::Pq),
        isolated: pick(BusRole::Isolated),
        role,
    };
    if !class.isolated.is_empty() {
        debug!(
            "classification: {} slack, {} PV, {} PQ, {} isolated",
            class.slack.len(),
            class.pv.len(),
            class.pq.len(),
            class.isolated.len()
        );
    }
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Branch, Gen, GridModel, Load};

    fn grid() -> GridModel {
        // 0 --- 1 --- 2     3 (no branches)
        let mut model = GridModel::new(4);
        model.add_branch(Branch::line(0, 1, 0.01, 0.05, 0.0)).unwrap();
        model.add_branch(Branch::line(1, 2, 0.01, 0.05, 0.0)).unwrap();
        model.add_gen(Gen::slack(0, 1.0)).unwrap();
        model.add_gen(Gen::new(1, 0.3, 1.02)).unwrap();
        model.add_load(Load::new(2, 0.4, 0.1)).unwrap();
        model.add_load(Load::new(3, 0.1, 0.0)).unwrap();
        model
    }

    #[test]
    fn roles_and_islanding() {
        let class = classify(&grid()).unwrap();
        assert_eq!(class.role[0], BusRole::Slack);
        assert_eq!(class.role[1], BusRole::Pv);
        assert_eq!(class.role[2], BusRole::Pq);
        assert_eq!(class.role[3], BusRole::Isolated);
        assert_eq!(class.slack, vec![0]);
        assert_eq!(class.pv, vec![1]);
        assert_eq!(class.pq, vec![2]);
        assert_eq!(class.isolated, vec![3]);
    }

    #[test]
    fn branch_outage_isolates_downstream_bus() {
        let mut model = grid();
        model.set_branch_status(1, false).unwrap();
        let class = classify(&model).unwrap();
        assert_eq!(class.role[2], BusRole::Isolated);
        assert_eq!(class.pq, Vec::<usize>::new());
    }

    #[test]
    fn no_slack_bus() {
        let mut model = grid();
        model.set_gen_status(0, false).unwrap();
        assert_eq!(classify(&model).unwrap_err(), Error::NoSlackBus);
    }

    #[test]
    fn second_slack_on_same_island_becomes_pv() {
        let mut model = grid();
        model.add_gen(Gen::slack(2, 1.0)).unwrap();
        let class = classify(&model).unwrap();
        assert_eq!(class.role[0], BusRole::Slack);
        assert_eq!(class.role[2], BusRole::Pv);
    }

    #[test]
    fn gen_outage_reclassifies_pv_to_pq() {
        let mut model = grid();
        model.set_gen_status(1, false).unwrap();
        let class = classify(&model).unwrap();
        assert_eq!(class.role[1], BusRole::Pq);
    }
}
