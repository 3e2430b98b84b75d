//! Backtracking site-graph matching: embedding counts for pattern
//! observables, and the isomorphism test used to consolidate species when
//! canonicalization is off.

use rustc_hash::FxHashSet;

use crate::molecule::{AgentLabel, Molecule, Port};
use crate::parsers::{ParsedComplex, ParsedLink};
use crate::signature::{AgentTypeId, Signature, SiteTypeId, StateId};
use crate::ConfigError;

/// The link constraint of a pattern site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PatternLink {
    /// `[.]`: the site must be free.
    Free,
    /// `[#]`: don't care.
    Wild,
    /// `[_]`: bound, no matter where.
    BoundAny,
    /// `[s.A]`: bound to a site of the given type.
    Stub(SiteTypeId),
    /// A shared numeric label: bound to the image of another pattern
    /// agent at the given site.
    BoundTo { agent: usize, site: SiteTypeId },
}

#[derive(Clone, Debug)]
pub struct PatternSite {
    pub site: SiteTypeId,
    pub state: Option<StateId>,
    pub link: PatternLink,
}

#[derive(Clone, Debug)]
pub struct PatternAgent {
    pub ty: AgentTypeId,
    /// Only the mentioned sites constrain the match.
    pub sites: Vec<PatternSite>,
}

/// A compiled site-graph pattern. Unmentioned sites are "don't care".
#[derive(Clone, Debug)]
pub struct Pattern {
    pub agents: Vec<PatternAgent>,
}

impl Pattern {
    /// Resolves a parsed expression against the signature. All link forms
    /// are legal in a pattern.
    pub fn compile(parsed: &ParsedComplex, sig: &Signature) -> Result<Pattern, ConfigError> {
        let bad = |text: String| ConfigError::Expression {
            what: "pattern",
            text,
        };
        let mut agents = Vec::with_capacity(parsed.agents.len());
        let mut pending: Vec<(u32, usize, usize)> = Vec::new(); // label, agent, site slot

        for (idx, pa) in parsed.agents.iter().enumerate() {
            let ty = sig
                .resolve_agent(&pa.name)
                .ok_or_else(|| bad(format!("unknown agent type {}", pa.name)))?;
            let mut sites = Vec::with_capacity(pa.sites.len());
            for ps in &pa.sites {
                let st = sig
                    .resolve_site(ty, &ps.name)
                    .ok_or_else(|| bad(format!("unknown site {}.{}", pa.name, ps.name)))?;
                let state = match &ps.state {
                    None => None,
                    Some(name) => Some(sig.state_of(st, name).ok_or_else(|| {
                        bad(format!("unknown state {{{name}}} of {}.{}", pa.name, ps.name))
                    })?),
                };
                let link = match &ps.link {
                    ParsedLink::Free => PatternLink::Free,
                    ParsedLink::Wildcard => PatternLink::Wild,
                    ParsedLink::BoundAny => PatternLink::BoundAny,
                    ParsedLink::Stub { site, agent } => {
                        let sat = sig
                            .resolve_agent(agent)
                            .ok_or_else(|| bad(format!("unknown agent type {agent}")))?;
                        let sst = sig
                            .resolve_site(sat, site)
                            .ok_or_else(|| bad(format!("unknown site {agent}.{site}")))?;
                        PatternLink::Stub(sst)
                    }
                    ParsedLink::Label(n) => {
                        pending.push((*n, idx, sites.len()));
                        PatternLink::Wild // patched below
                    }
                };
                sites.push(PatternSite { site: st, state, link });
            }
            agents.push(PatternAgent { ty, sites });
        }

        pending.sort_unstable();
        for pair in pending.chunks(2) {
            match pair {
                [(n1, a1, s1), (n2, a2, s2)] if n1 == n2 => {
                    let st1 = agents[*a1].sites[*s1].site;
                    let st2 = agents[*a2].sites[*s2].site;
                    agents[*a1].sites[*s1].link = PatternLink::BoundTo { agent: *a2, site: st2 };
                    agents[*a2].sites[*s2].link = PatternLink::BoundTo { agent: *a1, site: st1 };
                }
                other => {
                    return Err(bad(format!(
                        "unpaired bond label {} in pattern",
                        other[0].0
                    )))
                }
            }
        }
        Ok(Pattern { agents })
    }

    /// The exact pattern of a molecule: every site pinned to its state
    /// and its precise link. An embedding of this pattern into an
    /// equal-sized molecule is an isomorphism.
    pub fn exact(m: &Molecule, sig: &Signature) -> Pattern {
        let index_of: rustc_hash::FxHashMap<AgentLabel, usize> = m
            .agents
            .keys()
            .enumerate()
            .map(|(i, &l)| (l, i))
            .collect();
        let agents = m
            .agents
            .iter()
            .map(|(_, agent)| PatternAgent {
                ty: agent.ty,
                sites: agent
                    .slots
                    .iter()
                    .zip(sig.sites_of(agent.ty))
                    .map(|(slot, st)| PatternSite {
                        site: st,
                        state: slot.state,
                        link: match slot.bond {
                            None => PatternLink::Free,
                            Some(partner) => PatternLink::BoundTo {
                                agent: index_of[&partner.agent],
                                site: partner.site,
                            },
                        },
                    })
                    .collect(),
            })
            .collect();
        Pattern { agents }
    }
}

/// Checks the site constraints of mapping pattern agent `pos` onto the
/// molecule agent `host`. Forward bond constraints (to still-unmapped
/// pattern agents) check only the partner's site type; the partner agent
/// is forced when its turn comes.
fn agent_matches(
    m: &Molecule,
    host: AgentLabel,
    p: &Pattern,
    pos: usize,
    map: &[Option<AgentLabel>],
) -> bool {
    let pa = &p.agents[pos];
    if m.agent(host).ty != pa.ty {
        return false;
    }
    for ps in &pa.sites {
        let slot = m.slot(Port { agent: host, site: ps.site });
        if let Some(state) = ps.state {
            if slot.state != Some(state) {
                return false;
            }
        }
        let ok = match ps.link {
            PatternLink::Wild => true,
            PatternLink::Free => slot.bond.is_none(),
            PatternLink::BoundAny => slot.bond.is_some(),
            PatternLink::Stub(st) => slot.bond.is_some_and(|q| q.site == st),
            PatternLink::BoundTo { agent, site } => slot.bond.is_some_and(|q| {
                q.site == site && map[agent].map(|h| h == q.agent).unwrap_or(true)
            }),
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Backtracking over pattern positions; returns the number of complete
/// injective maps below this branch.
fn match_from(
    m: &Molecule,
    p: &Pattern,
    pos: usize,
    map: &mut Vec<Option<AgentLabel>>,
    used: &mut FxHashSet<AgentLabel>,
    stop_at_first: bool,
) -> u64 {
    if pos == p.agents.len() {
        return 1;
    }

    // An edge from an already-mapped agent forces the candidate.
    let mut forced: Option<AgentLabel> = None;
    'outer: for j in 0..pos {
        for ps in &p.agents[j].sites {
            if let PatternLink::BoundTo { agent, .. } = ps.link {
                if agent == pos {
                    let host_j = map[j].expect("mapped agent missing");
                    match m.slot(Port { agent: host_j, site: ps.site }).bond {
                        Some(q) => {
                            forced = Some(q.agent);
                            break 'outer;
                        }
                        None => return 0,
                    }
                }
            }
        }
    }

    let candidates: Vec<AgentLabel> = match forced {
        Some(host) => vec![host],
        None => m.agents.keys().copied().collect(),
    };

    let mut total = 0;
    for host in candidates {
        if used.contains(&host) || !agent_matches(m, host, p, pos, map) {
            continue;
        }
        map[pos] = Some(host);
        used.insert(host);
        total += match_from(m, p, pos + 1, map, used, stop_at_first);
        used.remove(&host);
        map[pos] = None;
        if stop_at_first && total > 0 {
            return total;
        }
    }
    total
}

/// The number of embeddings of `pattern` into one instance of `m`.
pub fn embeddings(m: &Molecule, pattern: &Pattern, _sig: &Signature) -> u64 {
    if pattern.agents.is_empty() {
        return 0;
    }
    let mut map = vec![None; pattern.agents.len()];
    let mut used = FxHashSet::default();
    match_from(m, pattern, 0, &mut map, &mut used, false)
}

/// Whether any embedding of `pattern` into `m` exists.
pub fn matches(m: &Molecule, pattern: &Pattern, _sig: &Signature) -> bool {
    if pattern.agents.is_empty() {
        return false;
    }
    let mut map = vec![None; pattern.agents.len()];
    let mut used = FxHashSet::default();
    match_from(m, pattern, 0, &mut map, &mut used, true) > 0
}

/// Graph isomorphism of two molecules: equal size and composition, and an
/// exact embedding of one into the other.
pub fn isomorphic(a: &Molecule, b: &Molecule, sig: &Signature) -> bool {
    a.size == b.size && a.composition == b.composition && matches(b, &Pattern::exact(a, sig), sig)
}
