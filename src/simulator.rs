use num_traits::Zero;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp;

use crate::mixture::Mixture;
use crate::molecule::Port;
use crate::reactor::{self, Products, Reaction};
use crate::system::System;

/// The continuous-time Markov chain kernel: simulated time, the event
/// counter, and the owned random number generator. Reaction selection is
/// two-level: the channel and stratum by linear scan over the signature's
/// fixed enumeration, the species by a heap draw, the instance by uniform
/// draws over the species' local lists.
pub struct Simulator {
    pub time: f64,
    pub event: u64,
    rng: SmallRng,
}

impl Simulator {
    pub fn new(seed: u64, time: f64, event: u64) -> Simulator {
        Simulator {
            time,
            event,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Test access to the generator.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Advances the clock by an exponential waiting time. Returns false
    /// when the mixture has no activity left: no channel is selectable
    /// and the driver stops cleanly.
    pub fn advance_time(&mut self, mix: &Mixture) -> bool {
        let total = mix.total_activity();
        if total.is_zero() || total < 0. {
            return false;
        }
        self.time += self.rng.sample(Exp::new(total).unwrap());
        true
    }

    /// Selects a reaction with probability proportional to its
    /// propensity. The uniform variate walks five contiguous bands
    /// (intra-binding, dissociation, inter-binding, inflow, outflow),
    /// then the bond- or site-type strata within the band, then the heap
    /// of the stratum. Returns `None` when nothing is selectable.
    pub fn select_reaction(&mut self, mix: &mut Mixture, sys: &System) -> Option<Reaction> {
        let sig = &sys.sig;
        let total = mix.total_activity();
        if total.is_zero() || total < 0. {
            return None;
        }
        let mut rv = self.rng.random::<f64>() * total;

        if rv < mix.activities.total_unimolecular_binding {
            for bt in sig.bond_type_ids() {
                let k = bt.0 as usize;
                let stratum = mix.activities.unimolecular_binding[k];
                if rv < stratum {
                    let species = mix.heaps.binding[k].draw(rv);
                    let m = &mix.complexes[species];
                    let (st1, st2) = sig.bond_type_ends(bt);
                    let r1 = self.rng.random_range(0..m.free_count(st1));
                    let p1 = m.free_port(st1, r1);
                    let p2 = if st1 == st2 {
                        // A second distinct port from the same list.
                        if m.free_count(st1) < 2 {
                            return None;
                        }
                        let r2 = self.rng.random_range(0..m.free_count(st1) - 1);
                        m.free_port_excluding(st1, p1, r2)
                    } else {
                        // If the first agent also carries a free site of
                        // the partner type, it must be excluded: a site
                        // cannot bind its own agent.
                        let own = Port { agent: p1.agent, site: st2 };
                        if sig.agent_of(st2) == m.agent(p1.agent).ty && m.has_free_port(own) {
                            if m.free_count(st2) < 2 {
                                return None;
                            }
                            let r2 = self.rng.random_range(0..m.free_count(st2) - 1);
                            m.free_port_excluding(st2, own, r2)
                        } else {
                            let r2 = self.rng.random_range(0..m.free_count(st2));
                            m.free_port(st2, r2)
                        }
                    };
                    return Some(Reaction::UnimolecularBinding { species, p1, p2 });
                }
                rv -= stratum;
            }
            return None;
        }
        rv -= mix.activities.total_unimolecular_binding;

        if rv < mix.activities.total_bond_dissociation {
            for bt in sig.bond_type_ids() {
                let k = bt.0 as usize;
                let stratum = mix.activities.bond_dissociation[k];
                if rv < stratum {
                    let species = mix.heaps.unbinding[k].draw(rv);
                    let m = &mix.complexes[species];
                    let r = self.rng.random_range(0..m.bond_count(bt));
                    let (p1, p2) = m.bond_at(bt, r);
                    return Some(Reaction::BondDissociation { species, p1, p2 });
                }
                rv -= stratum;
            }
            return None;
        }
        rv -= mix.activities.total_bond_dissociation;

        if rv < mix.activities.total_bimolecular_binding {
            for bt in sig.bond_type_ids() {
                let k = bt.0 as usize;
                let stratum = mix.activities.bimolecular_binding[k];
                if rv < stratum {
                    return self.select_bimolecular(mix, sys, bt);
                }
                rv -= stratum;
            }
            return None;
        }
        rv -= mix.activities.total_bimolecular_binding;

        if rv < mix.activities.total_inflow {
            for atom in sig.agent_types() {
                let stratum = mix.activities.inflow[atom.0 as usize];
                if rv < stratum {
                    return Some(Reaction::Inflow { atom });
                }
                rv -= stratum;
            }
            return None;
        }
        rv -= mix.activities.total_inflow;

        if rv < mix.activities.total_outflow {
            for atom in sig.agent_types() {
                if sys.outflow_rate[atom.0 as usize].is_zero() {
                    continue;
                }
                let stratum = mix.activities.outflow[atom.0 as usize];
                if rv < stratum {
                    return Some(Reaction::Outflow { atom });
                }
                rv -= stratum;
            }
        }
        None
    }

    /// Species-pair selection for inter-molecular binding: the first
    /// species from the `st1` heap over all instances, the second from
    /// the `st2` heap with the first instance's contribution temporarily
    /// subtracted, so an instance never pairs with itself.
    fn select_bimolecular(
        &mut self,
        mix: &mut Mixture,
        sys: &System,
        bt: crate::signature::BondTypeId,
    ) -> Option<Reaction> {
        let sig = &sys.sig;
        let (st1, st2) = sig.bond_type_ends(bt);
        let k2 = st2.0 as usize;

        let t1 = mix.activities.total_free_sites[st1.0 as usize];
        if t1 == 0 {
            return None;
        }
        let r1 = self.rng.random_range(0..t1);
        let species1 = mix.heaps.site[st1.0 as usize].draw(r1 as f64);

        let m1 = &mix.complexes[species1];
        let m1_fs2 = m1.free_count(st2) as u64;
        let m1_count = m1.count;
        let t2 = mix.activities.total_free_sites[k2];
        if t2 == m1_fs2 {
            // Every partner site sits on the chosen instance itself.
            return None;
        }
        let r2 = self.rng.random_range(0..t2 - m1_fs2);
        mix.heaps.site[k2].modify((m1_fs2 * (m1_count - 1)) as f64, species1);
        let species2 = mix.heaps.site[k2].draw(r2 as f64);
        mix.heaps.site[k2].modify((m1_fs2 * m1_count) as f64, species1);

        let m1 = &mix.complexes[species1];
        let r = self.rng.random_range(0..m1.free_count(st1));
        let p1 = m1.free_port(st1, r);
        let m2 = &mix.complexes[species2];
        let r = self.rng.random_range(0..m2.free_count(st2));
        let p2 = m2.free_port(st2, r);

        Some(Reaction::BimolecularBinding {
            species1,
            species2,
            p1,
            p2,
        })
    }

    /// Executes a reaction and restores every aggregate. The pipeline
    /// order is fixed: negative update, count change, structural edit,
    /// positive update, overall totals.
    pub fn execute_reaction(&mut self, mix: &mut Mixture, sys: &System, reaction: Reaction) {
        match reaction {
            Reaction::UnimolecularBinding { species, p1, p2 } => {
                mix.negative_update(species, sys);
                let owned = mix.change_count(species, -1, true);
                let m = owned.unwrap_or_else(|| mix.complexes[species].clone_instance());
                let new = reactor::bind_intra(m, p1, p2, sys);
                let idx = mix.update_mixture(new, sys);
                mix.positive_update(idx, sys);
            }
            Reaction::BondDissociation { species, p1, p2 } => {
                mix.negative_update(species, sys);
                let owned = mix.change_count(species, -1, true);
                let m = owned.unwrap_or_else(|| mix.complexes[species].clone_instance());
                match reactor::dissociate(m, p1, p2, sys) {
                    Products::One(product) => {
                        let idx = mix.update_mixture(product, sys);
                        mix.positive_update(idx, sys);
                    }
                    Products::Two(b, c) => {
                        let idx = mix.update_mixture(b, sys);
                        mix.positive_update(idx, sys);
                        let idx = mix.update_mixture(c, sys);
                        mix.positive_update(idx, sys);
                    }
                }
            }
            Reaction::BimolecularBinding {
                species1,
                species2,
                p1,
                p2,
            } => {
                let new = if species1 == species2 {
                    // Two instances of the same species; the second is
                    // always a copy.
                    mix.negative_update(species1, sys);
                    let first = mix.change_count(species1, -1, true);
                    debug_assert!(first.is_none(), "paired a species with a single instance");
                    drop(first);
                    mix.negative_update(species1, sys);
                    let owned = mix.change_count(species1, -1, true);
                    let m1_owned = owned.is_some();
                    let m1 = owned.unwrap_or_else(|| mix.complexes[species1].clone_instance());
                    let m2 = m1.clone_instance();
                    reactor::bind_inter(m1, p1, m1_owned, m2, p2, false, sys)
                } else {
                    mix.negative_update(species1, sys);
                    let last = mix.complexes.len() - 1;
                    let owned1 = mix.change_count(species1, -1, true);
                    // Removing species1 moved the former last species into
                    // its slot; re-resolve the partner's position.
                    let species2 = if owned1.is_some() && species2 == last {
                        species1
                    } else {
                        species2
                    };
                    let m1_owned = owned1.is_some();
                    let m1 = match owned1 {
                        Some(m) => m,
                        None => mix.complexes[species1].clone_instance(),
                    };
                    mix.negative_update(species2, sys);
                    let owned2 = mix.change_count(species2, -1, true);
                    let m2_owned = owned2.is_some();
                    let m2 = match owned2 {
                        Some(m) => m,
                        None => mix.complexes[species2].clone_instance(),
                    };
                    reactor::bind_inter(m1, p1, m1_owned, m2, p2, m2_owned, sys)
                };
                let idx = mix.update_mixture(new, sys);
                mix.positive_update(idx, sys);
            }
            Reaction::Inflow { atom } => {
                let new = reactor::inflow(atom, sys);
                let idx = mix.update_mixture(new, sys);
                mix.positive_update(idx, sys);
            }
            Reaction::Outflow { atom } => {
                let species = mix
                    .atom_species(atom)
                    .expect("outflow selected without a monomer present");
                mix.negative_update(species, sys);
                mix.change_count(species, -1, true);
            }
        }
        mix.update_overall_activities(sys);
    }

    /// Selects and executes one reaction. Returns false when no channel
    /// is selectable.
    pub fn step(&mut self, mix: &mut Mixture, sys: &System) -> bool {
        match self.select_reaction(mix, sys) {
            Some(reaction) => {
                self.execute_reaction(mix, sys, reaction);
                true
            }
            None => false,
        }
    }
}
