//! The canonical-form oracle.
//!
//! Two molecules receive the same canonical string exactly when they are
//! isomorphic as site graphs. The string is the molecule's own expression
//! rendered in a canonical traversal order, so it doubles as a readable
//! form of the species.
//!
//! The procedure is local-view color refinement followed by a least
//! canonical traversal: agents are first partitioned by their local view
//! (the radius-1 environment), the partition is refined with neighbor
//! colors until stable, and the expression is rendered by breadth-first
//! traversal from every agent of the rarest stable class, keeping the
//! lexicographically least rendering.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::molecule::{AgentLabel, Molecule};
use crate::signature::Signature;

/// The local view of one agent: its type and, per site, the internal
/// state and the site type at the other end of the bond (or `.`).
pub fn local_view(m: &Molecule, label: AgentLabel, sig: &Signature) -> String {
    let agent = m.agent(label);
    let mut s = String::from(sig.agent_name(agent.ty));
    s.push('(');
    for (j, (slot, st)) in agent.slots.iter().zip(sig.sites_of(agent.ty)).enumerate() {
        if j > 0 {
            s.push(' ');
        }
        s.push_str(sig.site_name(st));
        match slot.bond {
            None => s.push_str("[.]"),
            Some(partner) => {
                let _ = write!(s, "[{}]", sig.site_type_name(partner.site));
            }
        }
        if let Some(state) = slot.state {
            let _ = write!(s, "{{{}}}", sig.state_name(st, state));
        }
    }
    s.push(')');
    s
}

/// Assigns dense ranks to agents grouped by an orderable key. Returns the
/// rank map and the number of distinct classes.
fn rank_by<K: Ord>(keys: Vec<(K, AgentLabel)>) -> (FxHashMap<AgentLabel, u32>, usize) {
    let mut classes: BTreeMap<K, Vec<AgentLabel>> = BTreeMap::new();
    for (key, label) in keys {
        classes.entry(key).or_default().push(label);
    }
    let n = classes.len();
    let mut color = FxHashMap::default();
    for (rank, (_, members)) in classes.into_iter().enumerate() {
        for label in members {
            color.insert(label, rank as u32);
        }
    }
    (color, n)
}

/// Stable colors for every agent: local views refined with neighbor
/// colors until the partition stops splitting.
fn refine_colors(m: &Molecule, sig: &Signature) -> FxHashMap<AgentLabel, u32> {
    let (mut color, mut n_classes) = rank_by(
        m.agents
            .keys()
            .map(|&l| (local_view(m, l, sig), l))
            .collect(),
    );
    loop {
        let keys = m
            .agents
            .iter()
            .map(|(&label, agent)| {
                let mut edges: Vec<(u16, u16, u32)> = agent
                    .slots
                    .iter()
                    .zip(sig.sites_of(agent.ty))
                    .filter_map(|(slot, st)| {
                        slot.bond
                            .map(|partner| (st.0, partner.site.0, color[&partner.agent]))
                    })
                    .collect();
                edges.sort_unstable();
                ((color[&label], edges), label)
            })
            .collect();
        let (next, n) = rank_by(keys);
        if n == n_classes {
            return next;
        }
        color = next;
        n_classes = n;
    }
}

/// Breadth-first traversal order from `root`, neighbors visited in the
/// site order of each agent. Fully determined by the root.
fn traversal(m: &Molecule, root: AgentLabel) -> Vec<AgentLabel> {
    let mut order = Vec::with_capacity(m.size);
    let mut seen = rustc_hash::FxHashSet::default();
    let mut queue = VecDeque::new();
    seen.insert(root);
    queue.push_back(root);
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for slot in &m.agent(current).slots {
            if let Some(partner) = slot.bond {
                if seen.insert(partner.agent) {
                    queue.push_back(partner.agent);
                }
            }
        }
    }
    order
}

/// The canonical string of a molecule.
pub fn canonical_form(m: &Molecule, sig: &Signature) -> String {
    if m.size == 1 {
        let label = *m.agents.keys().next().expect("empty molecule");
        return m.render(&[label], false, sig);
    }

    let color = refine_colors(m, sig);

    // The root candidates are the agents of the rarest stable class; the
    // class is chosen by (size, color), which is isomorphism-invariant.
    let mut class_sizes: FxHashMap<u32, usize> = FxHashMap::default();
    for &c in color.values() {
        *class_sizes.entry(c).or_default() += 1;
    }
    let best_class = class_sizes
        .iter()
        .map(|(&c, &n)| (n, c))
        .min()
        .expect("no color classes")
        .1;

    m.agents
        .keys()
        .filter(|l| color[*l] == best_class)
        .map(|&root| m.render(&traversal(m, root), false, sig))
        .min()
        .expect("no root candidates")
}
