use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::Hash;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tinyvec::ArrayVec;

use crate::canon;
use crate::parsers::{ParsedComplex, ParsedLink};
use crate::signature::{AgentTypeId, Signature, SiteTypeId, StateId};
use crate::system::System;
use crate::ConfigError;

/// An agent label, unique within a molecule and never reused.
pub type AgentLabel = u32;

/// A binding endpoint within a molecule: an agent label and a site type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct Port {
    pub agent: AgentLabel,
    pub site: SiteTypeId,
}

/// A bond as a normalized pair of ports (lexicographic on label, site).
pub type BondKey = (Port, Port);

pub fn bond_key(p: Port, q: Port) -> BondKey {
    if p <= q {
        (p, q)
    } else {
        (q, p)
    }
}

/// One interface slot of an agent: the partner port (or free) and the
/// internal state, if the site has any.
#[derive(Clone, Copy, Debug)]
pub struct SiteSlot {
    pub bond: Option<Port>,
    pub state: Option<StateId>,
}

/// A typed node of the site graph. The slot vector is dense over the
/// agent type's site list, in signature order; `site_base` is the global
/// id of the type's first site, so a port resolves to its slot without
/// consulting the signature.
#[derive(Clone, Debug)]
pub struct Agent {
    pub ty: AgentTypeId,
    site_base: u16,
    pub slots: SmallVec<[SiteSlot; 4]>,
    pub degree: u32,
}

impl Agent {
    /// A fresh agent with every site free in its creation-default state.
    pub fn unbound(ty: AgentTypeId, sig: &Signature) -> Agent {
        Agent {
            ty,
            site_base: sig.sites_of(ty).next().map(|st| st.0).unwrap_or(0),
            slots: sig
                .sites_of(ty)
                .map(|st| SiteSlot {
                    bond: None,
                    state: sig.default_state(st),
                })
                .collect(),
            degree: 0,
        }
    }

    pub fn slot_of(&self, site: SiteTypeId) -> &SiteSlot {
        &self.slots[(site.0 - self.site_base) as usize]
    }

    fn slot_of_mut(&mut self, site: SiteTypeId) -> &mut SiteSlot {
        &mut self.slots[(site.0 - self.site_base) as usize]
    }
}

/// A list supporting O(1) append, O(1) remove-arbitrary (swap with last
/// and pop), and O(1) membership, with a position map kept in lockstep.
#[derive(Clone, Debug)]
pub struct TrackedList<T: Copy + Eq + Hash> {
    items: Vec<T>,
    pos: FxHashMap<T, usize>,
}

impl<T: Copy + Eq + Hash> Default for TrackedList<T> {
    fn default() -> Self {
        TrackedList {
            items: Vec::new(),
            pos: FxHashMap::default(),
        }
    }
}

impl<T: Copy + Eq + Hash> TrackedList<T> {
    pub fn push(&mut self, item: T) {
        debug_assert!(!self.pos.contains_key(&item), "duplicate tracked item");
        self.pos.insert(item, self.items.len());
        self.items.push(item);
    }

    pub fn remove(&mut self, item: &T) {
        let at = self.pos.remove(item).expect("removing untracked item");
        let last = self.items.pop().expect("tracked list underflow");
        if at < self.items.len() {
            self.items[at] = last;
            self.pos.insert(last, at);
        }
    }

    pub fn append(&mut self, other: &TrackedList<T>) {
        for &item in &other.items {
            self.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> T {
        self.items[index]
    }

    pub fn contains(&self, item: &T) -> bool {
        self.pos.contains_key(item)
    }

    pub fn position(&self, item: &T) -> Option<usize> {
        self.pos.get(item).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

/// The result of removing a bond: either the molecule stayed connected,
/// or it fissioned into two fragments.
pub enum Dissociation {
    Intact(Molecule),
    Fission(Molecule, Molecule),
}

/// A connected site-graph, together with its local reactivity inventory:
/// free ports and bonds stratified by type, self-binding correction
/// counters, per-bond-type binding/unbinding propensity contributions,
/// composition, population count, and canonical form.
#[derive(Clone, Debug)]
pub struct Molecule {
    /// Agents by label, ordered; labels are never reused.
    pub agents: BTreeMap<AgentLabel, Agent>,
    /// Derived neighbor lists, one entry per bond occurrence.
    pub adjacency: FxHashMap<AgentLabel, SmallVec<[AgentLabel; 4]>>,
    /// Free ports per site type.
    pub free_sites: Vec<TrackedList<Port>>,
    /// Bonds per bond type.
    pub bond_lists: Vec<TrackedList<BondKey>>,
    /// Per asymmetric bond type, the number of agents carrying both sites
    /// free. Subtracted from the intra-molecular pair count, since a site
    /// cannot bind a site on the same agent.
    pub self_binding: Vec<u64>,
    /// Intra-molecular bond-formation propensity per bond type, one
    /// instance of this species.
    pub binding: Vec<f64>,
    /// Bond-dissociation propensity per bond type, one instance.
    pub unbinding: Vec<f64>,
    pub size: usize,
    /// Agent multiset per agent type.
    pub composition: Vec<u64>,
    /// Population of this species in the mixture.
    pub count: u64,
    /// Canonical form of the isomorphism class (empty when
    /// canonicalization is disabled).
    pub canonical: String,
    /// The largest label ever used.
    pub label_counter: AgentLabel,
}

impl Molecule {
    /// Builds a molecule from a finished agent map, deriving adjacency,
    /// the stratified port and bond lists, the self-binding counters, the
    /// canonical form, and the internal reactivity.
    pub fn from_agents(mut agents: BTreeMap<AgentLabel, Agent>, count: u64, sys: &System) -> Molecule {
        let sig = &sys.sig;
        let mut adjacency: FxHashMap<AgentLabel, SmallVec<[AgentLabel; 4]>> =
            FxHashMap::default();
        let mut free_sites = vec![TrackedList::default(); sig.n_site_types()];
        let mut bond_lists = vec![TrackedList::default(); sig.n_bond_types()];
        let mut composition = vec![0u64; sig.n_agent_types()];

        for (&label, agent) in agents.iter_mut() {
            composition[agent.ty.0 as usize] += 1;
            let neighbors = adjacency.entry(label).or_default();
            let mut degree = 0;
            for (slot, st) in agent.slots.iter().zip(sig.sites_of(agent.ty)) {
                let port = Port { agent: label, site: st };
                match slot.bond {
                    None => free_sites[st.0 as usize].push(port),
                    Some(partner) => {
                        degree += 1;
                        neighbors.push(partner.agent);
                        let key = bond_key(port, partner);
                        if key.0 == port {
                            let bt = sig
                                .bond_type_of(st, partner.site)
                                .expect("bond type not declared in signature");
                            bond_lists[bt.0 as usize].push(key);
                        }
                    }
                }
            }
            agent.degree = degree;
        }

        let size = agents.len();
        let label_counter = agents.keys().next_back().copied().unwrap_or(0);
        let mut m = Molecule {
            agents,
            adjacency,
            free_sites,
            bond_lists,
            self_binding: vec![0; sig.n_bond_types()],
            binding: vec![0.; sig.n_bond_types()],
            unbinding: vec![0.; sig.n_bond_types()],
            size,
            composition,
            count,
            canonical: String::new(),
            label_counter,
        };
        m.rebuild_self_binding(sig);
        m.refresh_canonical(sys);
        m.compute_internal_reactivity(sys);
        m
    }

    /// A monomer of the given type in the signature's default state.
    pub fn monomer(ty: AgentTypeId, count: u64, sys: &System) -> Molecule {
        let mut agents = BTreeMap::new();
        agents.insert(1, Agent::unbound(ty, &sys.sig));
        Molecule::from_agents(agents, count, sys)
    }

    /// Resolves a parsed site-graph expression into a molecule. Pattern
    /// links (`#`, `_`, typed stubs) are rejected: the mixture holds only
    /// fully specified molecules.
    pub fn from_parsed(
        parsed: &ParsedComplex,
        count: u64,
        sys: &System,
    ) -> Result<Molecule, ConfigError> {
        let sig = &sys.sig;
        let bad = |text: String| ConfigError::Expression {
            what: "molecule",
            text,
        };
        let mut agents = BTreeMap::new();
        let mut pending: BTreeMap<u32, ArrayVec<[Port; 2]>> = BTreeMap::new();

        for (idx, pa) in parsed.agents.iter().enumerate() {
            let label = pa.label.unwrap_or(idx as u32 + 1);
            let ty = sig
                .resolve_agent(&pa.name)
                .ok_or_else(|| bad(format!("unknown agent type {}", pa.name)))?;
            let mut agent = Agent::unbound(ty, sig);
            for ps in &pa.sites {
                let st = sig
                    .resolve_site(ty, &ps.name)
                    .ok_or_else(|| bad(format!("unknown site {}.{}", pa.name, ps.name)))?;
                let slot = &mut agent.slots[sig.local_site_index(st)];
                if let Some(state) = &ps.state {
                    slot.state = Some(
                        sig.state_of(st, state)
                            .ok_or_else(|| bad(format!("unknown state {{{state}}} of {}.{}", pa.name, ps.name)))?,
                    );
                }
                match &ps.link {
                    ParsedLink::Free => {}
                    ParsedLink::Label(n) => {
                        let ports = pending.entry(*n).or_default();
                        if ports.len() == 2 {
                            return Err(bad(format!("bond label {n} used more than twice")));
                        }
                        ports.push(Port { agent: label, site: st });
                    }
                    other => {
                        return Err(bad(format!(
                            "link {other:?} is a pattern, not a molecule"
                        )))
                    }
                }
            }
            if agents.insert(label, agent).is_some() {
                return Err(bad(format!("agent label {label} used twice")));
            }
        }

        for (n, ports) in pending {
            if ports.len() != 2 {
                return Err(bad(format!("bond label {n} is unpaired")));
            }
            let (p, q) = (ports[0], ports[1]);
            if sig.bond_type_of(p.site, q.site).is_none() {
                return Err(bad(format!(
                    "bond {}-{} is not declared in the signature",
                    sig.site_type_name(p.site),
                    sig.site_type_name(q.site)
                )));
            }
            agents.get_mut(&p.agent).unwrap().slots[sig.local_site_index(p.site)].bond = Some(q);
            agents.get_mut(&q.agent).unwrap().slots[sig.local_site_index(q.site)].bond = Some(p);
        }

        Ok(Molecule::from_agents(agents, count, sys))
    }

    pub fn agent(&self, label: AgentLabel) -> &Agent {
        &self.agents[&label]
    }

    pub fn slot(&self, port: Port) -> &SiteSlot {
        self.agents[&port.agent].slot_of(port.site)
    }

    pub fn free_count(&self, st: SiteTypeId) -> usize {
        self.free_sites[st.0 as usize].len()
    }

    pub fn bond_count(&self, bt: crate::signature::BondTypeId) -> usize {
        self.bond_lists[bt.0 as usize].len()
    }

    pub fn free_port(&self, st: SiteTypeId, index: usize) -> Port {
        self.free_sites[st.0 as usize].get(index)
    }

    /// Picks the `index`-th free port of type `st` from the list with
    /// `excluded` removed. `index` ranges over `free_count(st) - 1`.
    pub fn free_port_excluding(&self, st: SiteTypeId, excluded: Port, index: usize) -> Port {
        let list = &self.free_sites[st.0 as usize];
        let skip = list.position(&excluded).expect("excluded port is not free");
        if index >= skip {
            list.get(index + 1)
        } else {
            list.get(index)
        }
    }

    pub fn has_free_port(&self, port: Port) -> bool {
        self.free_sites[port.site.0 as usize].contains(&port)
    }

    pub fn bond_at(&self, bt: crate::signature::BondTypeId, index: usize) -> BondKey {
        self.bond_lists[bt.0 as usize].get(index)
    }

    fn slot_mut(&mut self, port: Port) -> &mut SiteSlot {
        self.agents
            .get_mut(&port.agent)
            .expect("no such agent")
            .slot_of_mut(port.site)
    }

    /// Maintains `self_binding` after the bond status of `port` changed.
    /// `freed` is true when the port just became free.
    fn adjust_self_binding(&mut self, port: Port, freed: bool, sig: &Signature) {
        let ty = self.agents[&port.agent].ty;
        for bt in sig.bond_type_ids() {
            let (st1, st2) = sig.bond_type_ends(bt);
            if st1 == st2 {
                continue;
            }
            for (this, other) in [(st1, st2), (st2, st1)] {
                if port.site != this || sig.agent_of(other) != ty {
                    continue;
                }
                let partner = Port { agent: port.agent, site: other };
                if self.slot(partner).bond.is_none() {
                    let k = bt.0 as usize;
                    if freed {
                        self.self_binding[k] += 1;
                    } else {
                        self.self_binding[k] -= 1;
                    }
                }
            }
        }
    }

    fn rebuild_self_binding(&mut self, sig: &Signature) {
        for bt in sig.bond_type_ids() {
            let (st1, st2) = sig.bond_type_ends(bt);
            let k = bt.0 as usize;
            self.self_binding[k] = 0;
            if st1 == st2 || sig.agent_of(st1) != sig.agent_of(st2) {
                continue;
            }
            let i1 = sig.local_site_index(st1);
            let i2 = sig.local_site_index(st2);
            self.self_binding[k] = self
                .agents
                .values()
                .filter(|a| {
                    a.ty == sig.agent_of(st1)
                        && a.slots[i1].bond.is_none()
                        && a.slots[i2].bond.is_none()
                })
                .count() as u64;
        }
    }

    /// Installs a bond between two free ports of this molecule and
    /// restores every inventory, the canonical form, and the internal
    /// reactivity. The two ports must live on distinct agents.
    pub fn form_bond(&mut self, p1: Port, p2: Port, sys: &System) {
        let sig = &sys.sig;
        debug_assert!(p1.agent != p2.agent, "a site cannot bind its own agent");
        debug_assert!(self.slot(p1).bond.is_none() && self.slot(p2).bond.is_none());

        self.slot_mut(p1).bond = Some(p2);
        self.slot_mut(p2).bond = Some(p1);
        self.agents.get_mut(&p1.agent).unwrap().degree += 1;
        self.agents.get_mut(&p2.agent).unwrap().degree += 1;
        self.adjacency.entry(p1.agent).or_default().push(p2.agent);
        self.adjacency.entry(p2.agent).or_default().push(p1.agent);

        let bt = sig
            .bond_type_of(p1.site, p2.site)
            .expect("bond type not declared in signature");
        self.bond_lists[bt.0 as usize].push(bond_key(p1, p2));
        self.free_sites[p1.site.0 as usize].remove(&p1);
        self.free_sites[p2.site.0 as usize].remove(&p2);

        self.adjust_self_binding(p1, false, sig);
        self.adjust_self_binding(p2, false, sig);

        self.refresh_canonical(sys);
        self.compute_internal_reactivity(sys);
    }

    /// Removes the bond between `p1` and `p2`. If the graph stays
    /// connected the molecule is updated in place; otherwise the agents
    /// are partitioned into two fresh molecules.
    pub fn dissociate(mut self, p1: Port, p2: Port, sys: &System) -> Dissociation {
        let sig = &sys.sig;
        debug_assert_eq!(self.slot(p1).bond, Some(p2), "dissociating a nonexistent bond");
        debug_assert_eq!(self.slot(p2).bond, Some(p1), "dissociating a nonexistent bond");

        self.slot_mut(p1).bond = None;
        self.slot_mut(p2).bond = None;
        self.agents.get_mut(&p1.agent).unwrap().degree -= 1;
        self.agents.get_mut(&p2.agent).unwrap().degree -= 1;
        remove_one(self.adjacency.get_mut(&p1.agent).unwrap(), p2.agent);
        remove_one(self.adjacency.get_mut(&p2.agent).unwrap(), p1.agent);

        let visited = self.component_of(p1.agent);
        if !visited.contains(&p2.agent) {
            // The molecule fissioned; rebuild both fragments from their
            // agent maps (the interfaces already reflect the removal).
            let mut rest = std::mem::take(&mut self.agents);
            let mut part = BTreeMap::new();
            for label in &visited {
                let agent = rest.remove(label).expect("component agent missing");
                part.insert(*label, agent);
            }
            return Dissociation::Fission(
                Molecule::from_agents(part, 0, sys),
                Molecule::from_agents(rest, 0, sys),
            );
        }

        let bt = sig
            .bond_type_of(p1.site, p2.site)
            .expect("bond type not declared in signature");
        self.bond_lists[bt.0 as usize].remove(&bond_key(p1, p2));
        self.free_sites[p1.site.0 as usize].push(p1);
        self.free_sites[p2.site.0 as usize].push(p2);

        self.adjust_self_binding(p1, true, sig);
        self.adjust_self_binding(p2, true, sig);

        self.refresh_canonical(sys);
        self.compute_internal_reactivity(sys);
        Dissociation::Intact(self)
    }

    /// The set of agent labels connected to `start`, by breadth-first
    /// traversal of the adjacency lists.
    fn component_of(&self, start: AgentLabel) -> rustc_hash::FxHashSet<AgentLabel> {
        let mut visited = rustc_hash::FxHashSet::default();
        let mut queue = std::collections::VecDeque::new();
        visited.insert(start);
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.adjacency.get(&current) {
                for &n in neighbors {
                    if visited.insert(n) {
                        queue.push_back(n);
                    }
                }
            }
        }
        visited
    }

    /// Merges `other` wholesale into this molecule and installs the
    /// crossing bond. `other`'s labels must already have been shifted past
    /// `self.label_counter` (see [`Molecule::copy_with_label_shift`]).
    pub fn graft(&mut self, other: Molecule, self_port: Port, other_port: Port, sys: &System) {
        debug_assert!(
            other.agents.keys().next().copied().unwrap_or(u32::MAX) > self.label_counter,
            "grafted labels must be shifted past the recipient's"
        );
        self.agents.extend(other.agents);
        self.adjacency.extend(other.adjacency);
        for (mine, theirs) in self.free_sites.iter_mut().zip(&other.free_sites) {
            mine.append(theirs);
        }
        for (mine, theirs) in self.bond_lists.iter_mut().zip(&other.bond_lists) {
            mine.append(theirs);
        }
        for (mine, theirs) in self.self_binding.iter_mut().zip(&other.self_binding) {
            *mine += theirs;
        }
        for (mine, theirs) in self.composition.iter_mut().zip(&other.composition) {
            *mine += theirs;
        }
        self.size += other.size;
        self.label_counter = self.label_counter.max(other.label_counter);

        self.form_bond(self_port, other_port, sys);
    }

    /// A deep copy whose labels (and every reference to them) are offset
    /// by `shift`. The copy is a fresh instance: its count is zero.
    pub fn copy_with_label_shift(&self, shift: u32, sig: &Signature) -> Molecule {
        let shift_port = |p: Port| Port { agent: p.agent + shift, site: p.site };
        let mut agents = BTreeMap::new();
        for (&label, agent) in &self.agents {
            let mut copy = agent.clone();
            for slot in copy.slots.iter_mut() {
                slot.bond = slot.bond.map(shift_port);
            }
            agents.insert(label + shift, copy);
        }
        let mut adjacency: FxHashMap<AgentLabel, SmallVec<[AgentLabel; 4]>> =
            FxHashMap::default();
        for (&label, neighbors) in &self.adjacency {
            adjacency.insert(label + shift, neighbors.iter().map(|&n| n + shift).collect());
        }
        let mut free_sites = vec![TrackedList::default(); sig.n_site_types()];
        for (st, list) in self.free_sites.iter().enumerate() {
            for &port in list.iter() {
                free_sites[st].push(shift_port(port));
            }
        }
        let mut bond_lists = vec![TrackedList::default(); sig.n_bond_types()];
        for (bt, list) in self.bond_lists.iter().enumerate() {
            for &(p, q) in list.iter() {
                bond_lists[bt].push((shift_port(p), shift_port(q)));
            }
        }
        Molecule {
            agents,
            adjacency,
            free_sites,
            bond_lists,
            self_binding: self.self_binding.clone(),
            binding: self.binding.clone(),
            unbinding: self.unbinding.clone(),
            size: self.size,
            composition: self.composition.clone(),
            count: 0,
            canonical: self.canonical.clone(),
            label_counter: self.label_counter + shift,
        }
    }

    /// A plain copy used to mutate one instance of a multi-instance
    /// species. The copy starts with count zero.
    pub fn clone_instance(&self) -> Molecule {
        let mut copy = self.clone();
        copy.count = 0;
        copy
    }

    /// Recomputes `binding` and `unbinding` from the inventory:
    /// dissociation is per existing bond; intra-molecular binding counts
    /// free-port pairs with the symmetry factor for symmetric types and
    /// the same-agent exclusion for asymmetric ones.
    pub fn compute_internal_reactivity(&mut self, sys: &System) {
        let sig = &sys.sig;
        for bt in sig.bond_type_ids() {
            let k = bt.0 as usize;
            self.unbinding[k] = self.bond_lists[k].len() as f64 * sys.rc_bond_dissociation[k];
            let (st1, st2) = sig.bond_type_ends(bt);
            let fs1 = self.free_count(st1) as f64;
            let pairs = if st1 == st2 {
                if fs1 < 2. {
                    0.
                } else {
                    0.5 * fs1 * (fs1 - 1.)
                }
            } else {
                let fs2 = self.free_count(st2) as f64;
                (fs1 * fs2 - self.self_binding[k] as f64).max(0.)
            };
            self.binding[k] = pairs * sys.rc_bond_formation_intra;
        }
    }

    pub fn refresh_canonical(&mut self, sys: &System) {
        if sys.canonicalize {
            self.canonical = canon::canonical_form(self, &sys.sig);
        } else {
            self.canonical.clear();
        }
    }

    /// The agent type of a monomer. Meaningful only when `size == 1`.
    pub fn atom_type(&self) -> AgentTypeId {
        debug_assert_eq!(self.size, 1);
        self.agents.values().next().expect("empty molecule").ty
    }

    /// Renders the molecule as a site-graph expression, agents in the
    /// given order, bond numbers assigned on first encounter. With
    /// `labeled`, agents carry their `x<label>:` prefix.
    pub(crate) fn render(&self, order: &[AgentLabel], labeled: bool, sig: &Signature) -> String {
        let mut bond_no: FxHashMap<BondKey, u32> = FxHashMap::default();
        let mut next = 1u32;
        for &label in order {
            let agent = &self.agents[&label];
            for (slot, st) in agent.slots.iter().zip(sig.sites_of(agent.ty)) {
                if let Some(partner) = slot.bond {
                    let key = bond_key(Port { agent: label, site: st }, partner);
                    bond_no.entry(key).or_insert_with(|| {
                        let n = next;
                        next += 1;
                        n
                    });
                }
            }
        }
        let mut out = String::new();
        for (i, &label) in order.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let agent = &self.agents[&label];
            if labeled {
                let _ = write!(out, "x{label}:");
            }
            out.push_str(sig.agent_name(agent.ty));
            out.push('(');
            for (j, (slot, st)) in agent.slots.iter().zip(sig.sites_of(agent.ty)).enumerate() {
                if j > 0 {
                    out.push(' ');
                }
                out.push_str(sig.site_name(st));
                match slot.bond {
                    None => out.push_str("[.]"),
                    Some(partner) => {
                        let key = bond_key(Port { agent: label, site: st }, partner);
                        let _ = write!(out, "[{}]", bond_no[&key]);
                    }
                }
                if let Some(state) = slot.state {
                    let _ = write!(out, "{{{}}}", sig.state_name(st, state));
                }
            }
            out.push(')');
        }
        out
    }

    /// The expression of this molecule with agents in label order.
    pub fn expression(&self, labeled: bool, sig: &Signature) -> String {
        let order: Vec<AgentLabel> = self.agents.keys().copied().collect();
        self.render(&order, labeled, sig)
    }

    /// Checks the structural invariants of the molecule. Test support.
    pub fn audit(&self, sig: &Signature) {
        let total_sites: usize = self.agents.values().map(|a| a.slots.len()).sum();
        let free: usize = self.free_sites.iter().map(TrackedList::len).sum();
        let bonds: usize = self.bond_lists.iter().map(TrackedList::len).sum();
        assert_eq!(free + 2 * bonds, total_sites, "free sites and bonds out of sync");
        assert_eq!(self.size, self.agents.len());
        assert_eq!(
            self.composition.iter().sum::<u64>() as usize,
            self.size,
            "composition out of sync"
        );

        for (&label, agent) in &self.agents {
            let mut degree = 0;
            for (slot, st) in agent.slots.iter().zip(sig.sites_of(agent.ty)) {
                let port = Port { agent: label, site: st };
                match slot.bond {
                    None => assert!(
                        self.free_sites[st.0 as usize].contains(&port),
                        "free port missing from its list"
                    ),
                    Some(partner) => {
                        degree += 1;
                        assert_eq!(
                            self.slot(partner).bond,
                            Some(port),
                            "bond endpoints disagree"
                        );
                        let bt = sig.bond_type_of(st, partner.site).expect("undeclared bond");
                        assert!(
                            self.bond_lists[bt.0 as usize].contains(&bond_key(port, partner)),
                            "bond missing from its list"
                        );
                        assert!(
                            self.adjacency[&label].contains(&partner.agent),
                            "adjacency out of sync"
                        );
                    }
                }
            }
            assert_eq!(agent.degree, degree, "degree out of sync");
        }

        let mut fresh = self.clone();
        fresh.rebuild_self_binding(sig);
        assert_eq!(fresh.self_binding, self.self_binding, "self-binding out of sync");
    }
}

/// Removes one occurrence of `value` from a neighbor list.
fn remove_one(neighbors: &mut SmallVec<[AgentLabel; 4]>, value: AgentLabel) {
    let at = neighbors
        .iter()
        .position(|&n| n == value)
        .expect("neighbor missing from adjacency");
    neighbors.swap_remove(at);
}
