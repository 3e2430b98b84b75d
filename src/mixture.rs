use std::fmt::Write as _;
use std::path::Path;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::heap::PropensityHeap;
use crate::matcher;
use crate::molecule::Molecule;
use crate::signature::{AgentTypeId, Signature};
use crate::snapshot;
use crate::system::System;
use crate::ConfigError;

/// The propensity heaps, one per sampling channel and stratum: binding
/// and unbinding per bond type, free sites per site type. Leaves track
/// the mixture's species positions one for one.
#[derive(Clone, Debug)]
pub struct HeapSet {
    pub binding: Vec<PropensityHeap>,
    pub unbinding: Vec<PropensityHeap>,
    pub site: Vec<PropensityHeap>,
}

impl HeapSet {
    fn build(complexes: &[Molecule], sig: &Signature) -> HeapSet {
        let weights = |f: &dyn Fn(&Molecule) -> f64| {
            complexes.iter().map(|m| f(m)).collect::<Vec<f64>>()
        };
        HeapSet {
            binding: sig
                .bond_type_ids()
                .map(|bt| {
                    PropensityHeap::from_weights(&weights(&|m| {
                        m.binding[bt.0 as usize] * m.count as f64
                    }))
                })
                .collect(),
            unbinding: sig
                .bond_type_ids()
                .map(|bt| {
                    PropensityHeap::from_weights(&weights(&|m| {
                        m.unbinding[bt.0 as usize] * m.count as f64
                    }))
                })
                .collect(),
            site: sig
                .site_types()
                .map(|st| {
                    PropensityHeap::from_weights(&weights(&|m| {
                        (m.free_count(st) * m.count as usize) as f64
                    }))
                })
                .collect(),
        }
    }

    fn insert_species(&mut self, m: &Molecule) {
        let count = m.count as f64;
        for (bt, heap) in self.binding.iter_mut().enumerate() {
            heap.insert(m.binding[bt] * count);
        }
        for (bt, heap) in self.unbinding.iter_mut().enumerate() {
            heap.insert(m.unbinding[bt] * count);
        }
        for (st, heap) in self.site.iter_mut().enumerate() {
            heap.insert(m.free_sites[st].len() as f64 * count);
        }
    }

    fn delete_species(&mut self, index: usize) {
        for heap in self
            .binding
            .iter_mut()
            .chain(self.unbinding.iter_mut())
            .chain(self.site.iter_mut())
        {
            heap.delete(index);
        }
    }

    fn modify_species(&mut self, m: &Molecule, index: usize) {
        let count = m.count as f64;
        for (bt, heap) in self.binding.iter_mut().enumerate() {
            heap.modify(m.binding[bt] * count, index);
        }
        for (bt, heap) in self.unbinding.iter_mut().enumerate() {
            heap.modify(m.unbinding[bt] * count, index);
        }
        for (st, heap) in self.site.iter_mut().enumerate() {
            heap.modify(m.free_sites[st].len() as f64 * count, index);
        }
    }
}

/// The count-weighted aggregate reactivity of the mixture, stratified by
/// bond type and site type, plus the scalar channel totals.
#[derive(Clone, Debug)]
pub struct Activities {
    /// Intra-molecular bond-formation activity per bond type.
    pub unimolecular_binding: Vec<f64>,
    /// Bond-dissociation activity per bond type.
    pub bond_dissociation: Vec<f64>,
    /// Inter-molecular bond-formation activity per bond type.
    pub bimolecular_binding: Vec<f64>,
    /// Free sites per site type, over all instances.
    pub total_free_sites: Vec<u64>,
    /// Bonds per bond type, over all instances. Tracking only.
    pub total_bond_type: Vec<u64>,
    /// Inflow activity per agent type (constant, zero-molecular).
    pub inflow: Vec<f64>,
    /// Outflow activity per agent type (count-proportional).
    pub outflow: Vec<f64>,

    pub total_unimolecular_binding: f64,
    pub total_bond_dissociation: f64,
    pub total_bimolecular_binding: f64,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub total_activity: f64,
}

impl Activities {
    fn zeroed(sig: &Signature) -> Activities {
        Activities {
            unimolecular_binding: vec![0.; sig.n_bond_types()],
            bond_dissociation: vec![0.; sig.n_bond_types()],
            bimolecular_binding: vec![0.; sig.n_bond_types()],
            total_free_sites: vec![0; sig.n_site_types()],
            total_bond_type: vec![0; sig.n_bond_types()],
            inflow: vec![0.; sig.n_agent_types()],
            outflow: vec![0.; sig.n_agent_types()],
            total_unimolecular_binding: 0.,
            total_bond_dissociation: 0.,
            total_bimolecular_binding: 0.,
            total_inflow: 0.,
            total_outflow: 0.,
            total_activity: 0.,
        }
    }

    /// Recomputes every stratified aggregate from the species list.
    fn rebuild(&mut self, complexes: &[Molecule], sys: &System) {
        let sig = &sys.sig;
        *self = Activities::zeroed(sig);

        for m in complexes {
            let count = m.count;
            for bt in sig.bond_type_ids() {
                let k = bt.0 as usize;
                self.unimolecular_binding[k] += m.binding[k] * count as f64;
                self.bond_dissociation[k] += m.unbinding[k] * count as f64;
                self.total_bond_type[k] += m.bond_count(bt) as u64 * count;
            }
            for st in sig.site_types() {
                self.total_free_sites[st.0 as usize] += m.free_count(st) as u64 * count;
            }
        }

        for m in complexes {
            let c = m.count as f64;
            for bt in sig.bond_type_ids() {
                let k = bt.0 as usize;
                let (st1, st2) = sig.bond_type_ends(bt);
                let factor = if st1 == st2 { 0.5 } else { 1. };
                let fs1 = m.free_count(st1) as f64;
                let fs2 = m.free_count(st2) as f64;
                let t2 = self.total_free_sites[st2.0 as usize] as f64;
                // Pairs within the species' own population, then pairs
                // with every other free site in the mixture.
                let a = fs1 * fs2 * (c - 1.) * c + fs1 * c * (t2 - fs2 * c);
                self.bimolecular_binding[k] += a * factor * sys.rc_bond_formation_inter;
            }
        }

        for at in sig.agent_types() {
            self.inflow[at.0 as usize] = sys.inflow_rate[at.0 as usize];
        }
        for m in complexes {
            if m.size == 1 {
                let at = m.atom_type();
                self.outflow[at.0 as usize] +=
                    m.count as f64 * sys.outflow_rate[at.0 as usize];
            }
        }

        self.totals(sys);
    }

    /// Subtracts the contribution of one instance of `m`. Must run while
    /// `count` still includes the instance, before `change_count(-1)`.
    pub fn remove_instance(&mut self, m: &Molecule, sys: &System) {
        let sig = &sys.sig;
        let c = m.count as f64;
        for bt in sig.bond_type_ids() {
            let k = bt.0 as usize;
            self.unimolecular_binding[k] -= m.binding[k];
            self.bond_dissociation[k] -= m.unbinding[k];
            let (st1, st2) = sig.bond_type_ends(bt);
            let fs1 = m.free_count(st1) as f64;
            let fs2 = m.free_count(st2) as f64;
            let t1 = self.total_free_sites[st1.0 as usize] as f64;
            let t2 = self.total_free_sites[st2.0 as usize] as f64;
            let mut a = fs1 * fs2 * (c - 1.) + fs1 * (t2 - fs2 * c);
            if st1 != st2 {
                a += fs2 * fs1 * (c - 1.) + fs2 * (t1 - fs1 * c);
            }
            self.bimolecular_binding[k] -= a * sys.rc_bond_formation_inter;
            self.total_bond_type[k] -= m.bond_count(bt) as u64;
        }
        for st in sig.site_types() {
            self.total_free_sites[st.0 as usize] -= m.free_count(st) as u64;
        }
        if m.size == 1 {
            let at = m.atom_type().0 as usize;
            if sys.outflow_rate[at] > 0. {
                self.outflow[at] -= sys.outflow_rate[at];
            }
        }
    }

    /// Adds the contribution of one instance of `m`. Must run after the
    /// instance is counted, i.e. after `change_count(+1)`.
    pub fn add_instance(&mut self, m: &Molecule, sys: &System) {
        let sig = &sys.sig;
        let c = m.count as f64;
        for st in sig.site_types() {
            self.total_free_sites[st.0 as usize] += m.free_count(st) as u64;
        }
        for bt in sig.bond_type_ids() {
            let k = bt.0 as usize;
            self.unimolecular_binding[k] += m.binding[k];
            self.bond_dissociation[k] += m.unbinding[k];
            let (st1, st2) = sig.bond_type_ends(bt);
            let fs1 = m.free_count(st1) as f64;
            let fs2 = m.free_count(st2) as f64;
            let t1 = self.total_free_sites[st1.0 as usize] as f64;
            let t2 = self.total_free_sites[st2.0 as usize] as f64;
            let mut a = fs1 * fs2 * (c - 1.) + fs1 * (t2 - fs2 * c);
            if st1 != st2 {
                a += fs2 * fs1 * (c - 1.) + fs2 * (t1 - fs1 * c);
            }
            self.bimolecular_binding[k] += a * sys.rc_bond_formation_inter;
            self.total_bond_type[k] += m.bond_count(bt) as u64;
        }
        if m.size == 1 {
            let at = m.atom_type().0 as usize;
            if sys.outflow_rate[at] > 0. {
                self.outflow[at] += sys.outflow_rate[at];
            }
        }
    }

    /// Sums the stratified aggregates into the five channel totals.
    pub fn totals(&mut self, sys: &System) {
        self.total_unimolecular_binding = self.unimolecular_binding.iter().sum();
        self.total_bond_dissociation = self.bond_dissociation.iter().sum();
        self.total_bimolecular_binding = self.bimolecular_binding.iter().sum();
        self.total_inflow = sys
            .sig
            .agent_types()
            .map(|at| self.inflow[at.0 as usize])
            .sum();
        self.total_outflow = sys
            .sig
            .agent_types()
            .filter(|at| sys.outflow_rate[at.0 as usize] > 0.)
            .map(|at| self.outflow[at.0 as usize])
            .sum();
        self.total_activity = self.total_unimolecular_binding
            + self.total_bond_dissociation
            + self.total_bimolecular_binding
            + self.total_inflow
            + self.total_outflow;
    }
}

/// The population of molecular species, their aggregate reactivity, and
/// the propensity heaps. Species are removable in O(1) by swap-with-last;
/// every reordering performs the matching heap operation in the same
/// step.
#[derive(Clone, Debug)]
pub struct Mixture {
    pub complexes: Vec<Molecule>,
    /// Canonical form to species position, when canonicalization is on.
    canonical_index: FxHashMap<String, usize>,
    /// Monomer species position per agent type, for outflow.
    atom_index: FxHashMap<AgentTypeId, usize>,
    pub activities: Activities,
    pub heaps: HeapSet,
    /// Initial simulated time, inherited from a snapshot if any.
    pub time: f64,
    /// Initial event number, inherited from a snapshot if any.
    pub event: u64,
}

impl Mixture {
    pub fn from_molecules(
        complexes: Vec<Molecule>,
        time: f64,
        event: u64,
        sys: &System,
    ) -> Mixture {
        let sig = &sys.sig;
        let mut mix = Mixture {
            heaps: HeapSet::build(&complexes, sig),
            canonical_index: FxHashMap::default(),
            atom_index: FxHashMap::default(),
            activities: Activities::zeroed(sig),
            complexes,
            time,
            event,
        };
        if sys.canonicalize {
            for (idx, m) in mix.complexes.iter().enumerate() {
                let prior = mix.canonical_index.insert(m.canonical.clone(), idx);
                debug_assert!(prior.is_none(), "duplicate canonical form in mixture");
                if m.size == 1 {
                    mix.atom_index.insert(m.atom_type(), idx);
                }
            }
        }
        mix.activities.rebuild(&mix.complexes, sys);
        mix
    }

    /// The initial mixture of free monomers dictated by the signature's
    /// initial concentrations.
    pub fn from_counts(sys: &System) -> Mixture {
        let complexes = sys
            .sig
            .agent_types()
            .filter(|at| sys.init_agents[at.0 as usize] > 0)
            .map(|at| Molecule::monomer(at, sys.init_agents[at.0 as usize], sys))
            .collect();
        Mixture::from_molecules(complexes, 0., 0, sys)
    }

    /// Reads an initial mixture from a snapshot file.
    pub fn from_snapshot(path: &Path, sys: &System) -> Result<Mixture, ConfigError> {
        let contents = snapshot::read(path)?;
        let mut complexes = Vec::new();
        for (count, parsed) in &contents.species {
            complexes.push(Molecule::from_parsed(parsed, *count, sys)?);
        }
        let complexes = consolidate(complexes, sys);
        Ok(Mixture::from_molecules(
            complexes,
            contents.time,
            contents.event,
            sys,
        ))
    }

    pub fn number_of_species(&self) -> usize {
        self.complexes.len()
    }

    /// The species position holding the monomer of `at`, if any.
    pub fn atom_species(&self, at: AgentTypeId) -> Option<usize> {
        self.atom_index.get(&at).copied().or_else(|| {
            self.complexes
                .iter()
                .position(|m| m.size == 1 && m.atom_type() == at)
        })
    }

    pub fn species_by_canonical(&self, canonical: &str) -> Option<usize> {
        self.canonical_index.get(canonical).copied()
    }

    /// Appends a species and inserts its weights into every heap.
    pub fn add_species(&mut self, m: Molecule) -> usize {
        let idx = self.complexes.len();
        if !m.canonical.is_empty() {
            self.canonical_index.insert(m.canonical.clone(), idx);
            if m.size == 1 {
                self.atom_index.insert(m.atom_type(), idx);
            }
        }
        self.heaps.insert_species(&m);
        self.complexes.push(m);
        idx
    }

    /// Removes the species at `idx` in O(1): the last species moves into
    /// its place, and every heap deletes at the same leaf.
    pub fn remove_species(&mut self, idx: usize) -> Molecule {
        let last = self.complexes.len() - 1;
        let removed = self.complexes.swap_remove(idx);
        if !removed.canonical.is_empty() {
            self.canonical_index.remove(&removed.canonical);
            if removed.size == 1 && self.atom_index.get(&removed.atom_type()) == Some(&idx) {
                self.atom_index.remove(&removed.atom_type());
            }
        }
        if idx < last {
            let moved = &self.complexes[idx];
            if !moved.canonical.is_empty() {
                self.canonical_index.insert(moved.canonical.clone(), idx);
                if moved.size == 1 {
                    self.atom_index.insert(moved.atom_type(), idx);
                }
            }
        }
        self.heaps.delete_species(idx);
        removed
    }

    /// Adjusts the population of the species at `idx`. Returns the owned
    /// molecule when the count reaches zero and `remove_if_zero` is set;
    /// otherwise re-weighs its leaves.
    pub fn change_count(
        &mut self,
        idx: usize,
        delta: i64,
        remove_if_zero: bool,
    ) -> Option<Molecule> {
        let m = &mut self.complexes[idx];
        m.count = m
            .count
            .checked_add_signed(delta)
            .expect("species count underflow");
        if m.count == 0 && remove_if_zero {
            Some(self.remove_species(idx))
        } else {
            self.heaps.modify_species(&self.complexes[idx], idx);
            None
        }
    }

    /// Subtracts the aggregate contribution of one instance of the
    /// species at `idx`. Call before `change_count(idx, -1)`.
    pub fn negative_update(&mut self, idx: usize, sys: &System) {
        let m = &self.complexes[idx];
        self.activities.remove_instance(m, sys);
    }

    /// Adds the aggregate contribution of one instance of the species at
    /// `idx`. Call after the instance is counted.
    pub fn positive_update(&mut self, idx: usize, sys: &System) {
        let m = &self.complexes[idx];
        self.activities.add_instance(m, sys);
    }

    /// Folds a reaction product into the mixture: merged into an existing
    /// species when one matches, appended as a new species otherwise.
    /// Returns the product's species position.
    pub fn update_mixture(&mut self, mut new: Molecule, sys: &System) -> usize {
        if sys.canonicalize {
            if let Some(&idx) = self.canonical_index.get(&new.canonical) {
                self.change_count(idx, 1, true);
                return idx;
            }
        } else if sys.consolidate {
            for idx in 0..self.complexes.len() {
                let m = &self.complexes[idx];
                if m.size == new.size
                    && m.composition == new.composition
                    && matcher::isomorphic(m, &new, &sys.sig)
                {
                    self.change_count(idx, 1, true);
                    return idx;
                }
            }
        }
        new.count = 1;
        self.add_species(new)
    }

    pub fn update_overall_activities(&mut self, sys: &System) {
        self.activities.totals(sys);
    }

    pub fn total_activity(&self) -> f64 {
        self.activities.total_activity
    }

    /// Writes a snapshot of the mixture.
    pub fn make_snapshot(
        &self,
        path: &Path,
        sys: &System,
        time: f64,
        event: u64,
        labeled: bool,
    ) -> std::io::Result<()> {
        snapshot::write(self, sys, time, event, path, labeled)
    }

    /// Total agents and total molecules in the mixture.
    pub fn count_agents_and_molecules(&self) -> (u64, u64) {
        let agents = self
            .complexes
            .iter()
            .map(|m| m.size as u64 * m.count)
            .sum();
        let molecules = self.complexes.iter().map(|m| m.count).sum();
        (agents, molecules)
    }

    /// The size distribution of the mixture as (size, molecules) pairs in
    /// decreasing size order.
    pub fn size_distribution(&self) -> Vec<(usize, u64)> {
        let mut dist: FxHashMap<usize, u64> = FxHashMap::default();
        for m in &self.complexes {
            *dist.entry(m.size).or_default() += m.count;
        }
        dist.into_iter()
            .sorted_by_key(|&(size, _)| std::cmp::Reverse(size))
            .collect()
    }

    /// Verifies the aggregate identities against a from-scratch
    /// recomputation, the heap roots against the species weights, and
    /// every molecule's structural invariants. Test support.
    pub fn audit(&self, sys: &System) {
        let sig = &sys.sig;
        for m in &self.complexes {
            m.audit(sig);
        }
        if sys.canonicalize {
            let distinct = self
                .complexes
                .iter()
                .map(|m| m.canonical.as_str())
                .collect::<rustc_hash::FxHashSet<_>>();
            assert_eq!(distinct.len(), self.complexes.len(), "canonical collision");
        }

        let mut fresh = Activities::zeroed(sig);
        fresh.rebuild(&self.complexes, sys);
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * (1. + a.abs().max(b.abs()));
        for bt in sig.bond_type_ids() {
            let k = bt.0 as usize;
            assert!(
                close(
                    fresh.unimolecular_binding[k],
                    self.activities.unimolecular_binding[k]
                ),
                "unimolecular binding activity drifted for {}",
                sig.bond_type_name(bt)
            );
            assert!(
                close(fresh.bond_dissociation[k], self.activities.bond_dissociation[k]),
                "bond dissociation activity drifted for {}",
                sig.bond_type_name(bt)
            );
            assert!(
                close(
                    fresh.bimolecular_binding[k],
                    self.activities.bimolecular_binding[k]
                ),
                "bimolecular binding activity drifted for {}",
                sig.bond_type_name(bt)
            );
            assert_eq!(fresh.total_bond_type[k], self.activities.total_bond_type[k]);
        }
        assert_eq!(fresh.total_free_sites, self.activities.total_free_sites);
        assert!(close(fresh.total_activity, self.activities.total_activity));

        for bt in sig.bond_type_ids() {
            let k = bt.0 as usize;
            let bind_sum: f64 = self
                .complexes
                .iter()
                .map(|m| m.binding[k] * m.count as f64)
                .sum();
            assert!(close(bind_sum, self.heaps.binding[k].root()), "binding heap root drifted");
            let unbind_sum: f64 = self
                .complexes
                .iter()
                .map(|m| m.unbinding[k] * m.count as f64)
                .sum();
            assert!(
                close(unbind_sum, self.heaps.unbinding[k].root()),
                "unbinding heap root drifted"
            );
        }
        for st in sig.site_types() {
            let k = st.0 as usize;
            let site_sum: f64 = self
                .complexes
                .iter()
                .map(|m| (m.free_count(st) * m.count as usize) as f64)
                .sum();
            assert!(close(site_sum, self.heaps.site[k].root()), "site heap root drifted");
        }
    }

    /// Summarizes the mixture for the report file.
    pub fn report(&self, sys: &System) -> String {
        let width = 40;
        let mut info = format!("\n{:-<70}\n\n", "MIXTURE ");
        let (agents, molecules) = self.count_agents_and_molecules();
        let _ = writeln!(info, "{:>20}: {}", "molecular species", self.number_of_species());
        let _ = writeln!(info, "{:>20}: {agents} agents, {molecules} molecules", "population");
        let dist = self.size_distribution();
        let _ = writeln!(info, "{:>20}: {:?}", "size distribution", &dist[..dist.len().min(8)]);
        info.push('\n');
        let a = &self.activities;
        let _ = writeln!(info, "{:>width$}", "system activities");
        let _ = writeln!(info, "{:>width$}: {:1.5E}", "total system activity", a.total_activity);
        let _ = writeln!(
            info,
            "{:>width$}: {:1.5E}",
            "unimolecular binding activity", a.total_unimolecular_binding
        );
        let _ = writeln!(
            info,
            "{:>width$}: {:1.5E}",
            "bond dissociation activity", a.total_bond_dissociation
        );
        let _ = writeln!(
            info,
            "{:>width$}: {:1.5E}",
            "bimolecular binding activity", a.total_bimolecular_binding
        );
        let _ = writeln!(info, "{:>width$}: {:1.5E}", "inflow activity", a.total_inflow);
        let _ = writeln!(info, "{:>width$}: {:1.5E}", "outflow activity", a.total_outflow);
        if sys.db_level > 0 {
            let _ = writeln!(info, "\n{:>width$}", "activities by bond type");
            for bt in sys.sig.bond_type_ids() {
                let k = bt.0 as usize;
                let _ = writeln!(
                    info,
                    "{:>width$}: ub {:1.5E}  bd {:1.5E}  bb {:1.5E}",
                    sys.sig.bond_type_name(bt),
                    a.unimolecular_binding[k],
                    a.bond_dissociation[k],
                    a.bimolecular_binding[k]
                );
            }
            let _ = writeln!(info, "\n{:>width$}", "free sites by site type");
            for st in sys.sig.site_types() {
                let _ = writeln!(
                    info,
                    "{:>width$}: {}",
                    sys.sig.site_type_name(st),
                    a.total_free_sites[st.0 as usize]
                );
            }
        }
        if sys.db_level > 1 {
            let _ = writeln!(info, "\n{:-<70}\n", "MIXTURE CONTENTS ");
            for m in self
                .complexes
                .iter()
                .sorted_by_key(|m| std::cmp::Reverse(m.size))
            {
                let _ = writeln!(
                    info,
                    "{} x /*{} agents*/ {}",
                    m.count,
                    m.size,
                    m.expression(false, &sys.sig)
                );
            }
        }
        info
    }
}

/// Merges duplicate species of a freshly loaded mixture, by canonical
/// form when available and by isomorphism otherwise.
pub fn consolidate(complexes: Vec<Molecule>, sys: &System) -> Vec<Molecule> {
    if !sys.consolidate {
        return complexes;
    }
    let mut merged: Vec<Molecule> = Vec::with_capacity(complexes.len());
    for new in complexes {
        let existing = merged.iter_mut().find(|m| {
            if sys.canonicalize {
                m.canonical == new.canonical
            } else {
                m.size == new.size
                    && m.composition == new.composition
                    && matcher::isomorphic(&**m, &new, &sys.sig)
            }
        });
        match existing {
            Some(m) => m.count += new.count,
            None => merged.push(new),
        }
    }
    merged
}
