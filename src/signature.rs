use std::fmt::Write as _;
use std::ops::Range;

use rustc_hash::FxHashMap;

use crate::parsers::{signature_expr, SigAgentDecl};
use crate::ConfigError;

/// An interned agent type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct AgentTypeId(pub u16);

/// An interned site type `A.x`: a site name qualified by its agent type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct SiteTypeId(pub u16);

/// An interned bond type: an unordered pair of site types in normal form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct BondTypeId(pub u16);

/// An internal state of a site, indexed into the site's legal state list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct StateId(pub u8);

/// A bond affinity as declared in the signature. Numeric values are
/// dissociation constants in nM; the categorical values map to the
/// `Kd_weak`/`Kd_medium`/`Kd_strong` parameters.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Affinity {
    #[default]
    Default,
    Weak,
    Medium,
    Strong,
    Kd(f64),
}

/// The contact map of the system: agent types, their sites, the legal
/// internal states and binding partners of each site, and the affinity of
/// each declared bond type.
///
/// All enumeration orders (`site_types`, `bond_types`) are fixed at load
/// time and reproducible: site types follow declaration order, and bond
/// types follow the order in which they are first encountered while
/// scanning the declaration, each normalized lexicographically by
/// `(agent name, site name)`.
#[derive(Clone, Debug)]
pub struct Signature {
    expr: String,
    agent_names: Vec<String>,
    agent_index: FxHashMap<String, AgentTypeId>,
    /// Per agent type, the contiguous range of its site types.
    site_ranges: Vec<Range<usize>>,
    site_names: Vec<String>,
    site_agent: Vec<AgentTypeId>,
    site_states: Vec<Vec<String>>,
    site_partners: Vec<Vec<SiteTypeId>>,
    site_index: FxHashMap<(AgentTypeId, String), SiteTypeId>,
    /// Rank of each site type when sorted by `(agent name, site name)`.
    lex_rank: Vec<u32>,
    bond_types: Vec<(SiteTypeId, SiteTypeId)>,
    bond_affinity: Vec<Affinity>,
    bond_index: FxHashMap<(SiteTypeId, SiteTypeId), BondTypeId>,
    /// Initial concentration per agent type in nM; `None` means default.
    init_conc: Vec<Option<f64>>,
}

impl Signature {
    /// Parses a signature expression such as
    /// `A@100(p[a1.P$m a2.P$m], l[r.A$w], r[l.A]), P(a1[p.A], a2[p.A])`
    /// and builds the interned contact map, checking its consistency.
    pub fn parse(expr: &str) -> Result<Signature, ConfigError> {
        let decls = match signature_expr(expr.trim()) {
            Ok(("", decls)) => decls,
            Ok((rest, _)) => {
                return Err(ConfigError::Signature(format!(
                    "trailing input near '{rest}'"
                )))
            }
            Err(err) => return Err(ConfigError::Signature(format!("{err}"))),
        };
        Signature::from_decls(expr, decls)
    }

    fn from_decls(expr: &str, decls: Vec<SigAgentDecl>) -> Result<Signature, ConfigError> {
        let mut sig = Signature {
            expr: expr.trim().to_owned(),
            agent_names: Vec::new(),
            agent_index: FxHashMap::default(),
            site_ranges: Vec::new(),
            site_names: Vec::new(),
            site_agent: Vec::new(),
            site_states: Vec::new(),
            site_partners: Vec::new(),
            site_index: FxHashMap::default(),
            lex_rank: Vec::new(),
            bond_types: Vec::new(),
            bond_affinity: Vec::new(),
            bond_index: FxHashMap::default(),
            init_conc: Vec::new(),
        };

        // First pass: intern agent and site types.
        for decl in &decls {
            if sig.agent_index.contains_key(&decl.name) {
                return Err(ConfigError::Signature(format!(
                    "agent {} is multiply defined",
                    decl.name
                )));
            }
            let at = AgentTypeId(sig.agent_names.len() as u16);
            sig.agent_index.insert(decl.name.clone(), at);
            sig.agent_names.push(decl.name.clone());
            sig.init_conc.push(decl.init_conc);

            let start = sig.site_names.len();
            for site in &decl.sites {
                let key = (at, site.name.clone());
                if sig.site_index.contains_key(&key) {
                    return Err(ConfigError::Signature(format!(
                        "site {} is multiply defined in agent {}",
                        site.name, decl.name
                    )));
                }
                let st = SiteTypeId(sig.site_names.len() as u16);
                sig.site_index.insert(key, st);
                sig.site_names.push(site.name.clone());
                sig.site_agent.push(at);
                sig.site_states.push(site.states.clone());
                sig.site_partners.push(Vec::new());
            }
            sig.site_ranges.push(start..sig.site_names.len());
        }

        sig.compute_lex_ranks();

        // Second pass: resolve partner stubs and collect bond types.
        for decl in &decls {
            let at = sig.agent_index[&decl.name];
            for site in &decl.sites {
                let st = sig.site_index[&(at, site.name.clone())];
                for partner in &site.partners {
                    let pat = *sig.agent_index.get(&partner.agent).ok_or_else(|| {
                        ConfigError::Signature(format!(
                            "agent {} in bond stub of {} is not declared",
                            partner.agent,
                            sig.site_type_name(st)
                        ))
                    })?;
                    let pst = *sig
                        .site_index
                        .get(&(pat, partner.site.clone()))
                        .ok_or_else(|| {
                            ConfigError::Signature(format!(
                                "site {}.{} in bond stub of {} is not declared",
                                partner.agent,
                                partner.site,
                                sig.site_type_name(st)
                            ))
                        })?;
                    sig.site_partners[st.0 as usize].push(pst);
                    sig.register_bond_type(st, pst, partner.affinity)?;
                }
            }
        }

        sig.consistency()?;
        Ok(sig)
    }

    fn compute_lex_ranks(&mut self) {
        let mut order: Vec<usize> = (0..self.site_names.len()).collect();
        order.sort_by(|&a, &b| {
            let ka = (
                &self.agent_names[self.site_agent[a].0 as usize],
                &self.site_names[a],
            );
            let kb = (
                &self.agent_names[self.site_agent[b].0 as usize],
                &self.site_names[b],
            );
            ka.cmp(&kb)
        });
        self.lex_rank = vec![0; order.len()];
        for (rank, &st) in order.iter().enumerate() {
            self.lex_rank[st] = rank as u32;
        }
    }

    fn register_bond_type(
        &mut self,
        st1: SiteTypeId,
        st2: SiteTypeId,
        affinity: Affinity,
    ) -> Result<(), ConfigError> {
        let key = self.normalize(st1, st2);
        match self.bond_index.get(&key) {
            None => {
                let bt = BondTypeId(self.bond_types.len() as u16);
                self.bond_index.insert(key, bt);
                self.bond_types.push(key);
                self.bond_affinity.push(affinity);
            }
            Some(&bt) => {
                let known = self.bond_affinity[bt.0 as usize];
                match (known, affinity) {
                    (_, Affinity::Default) => {}
                    (Affinity::Default, aff) => self.bond_affinity[bt.0 as usize] = aff,
                    (a, b) if a == b => {}
                    _ => {
                        return Err(ConfigError::Signature(format!(
                            "inconsistent affinity assignment to bond {}",
                            self.bond_type_name(bt)
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that every declared bond stub has its mirror image on the
    /// partner site.
    fn consistency(&self) -> Result<(), ConfigError> {
        for &(st1, st2) in &self.bond_types {
            if !self.site_partners[st1.0 as usize].contains(&st2) {
                return Err(ConfigError::Signature(format!(
                    "stub {} is not declared for site {}",
                    self.site_type_name(st2),
                    self.site_type_name(st1)
                )));
            }
            if !self.site_partners[st2.0 as usize].contains(&st1) {
                return Err(ConfigError::Signature(format!(
                    "stub {} is not declared for site {}",
                    self.site_type_name(st1),
                    self.site_type_name(st2)
                )));
            }
        }
        Ok(())
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn n_agent_types(&self) -> usize {
        self.agent_names.len()
    }

    pub fn n_site_types(&self) -> usize {
        self.site_names.len()
    }

    pub fn n_bond_types(&self) -> usize {
        self.bond_types.len()
    }

    pub fn agent_types(&self) -> impl Iterator<Item = AgentTypeId> {
        (0..self.agent_names.len()).map(|i| AgentTypeId(i as u16))
    }

    pub fn site_types(&self) -> impl Iterator<Item = SiteTypeId> {
        (0..self.site_names.len()).map(|i| SiteTypeId(i as u16))
    }

    pub fn bond_type_ids(&self) -> impl Iterator<Item = BondTypeId> {
        (0..self.bond_types.len()).map(|i| BondTypeId(i as u16))
    }

    pub fn agent_name(&self, at: AgentTypeId) -> &str {
        &self.agent_names[at.0 as usize]
    }

    pub fn site_name(&self, st: SiteTypeId) -> &str {
        &self.site_names[st.0 as usize]
    }

    /// The external `A.x` form of a site type.
    pub fn site_type_name(&self, st: SiteTypeId) -> String {
        format!(
            "{}.{}",
            self.agent_name(self.site_agent[st.0 as usize]),
            self.site_names[st.0 as usize]
        )
    }

    /// The external `A.x-B.y` form of a bond type.
    pub fn bond_type_name(&self, bt: BondTypeId) -> String {
        let (st1, st2) = self.bond_types[bt.0 as usize];
        let mut s = self.site_type_name(st1);
        let _ = write!(s, "-{}", self.site_type_name(st2));
        s
    }

    pub fn agent_of(&self, st: SiteTypeId) -> AgentTypeId {
        self.site_agent[st.0 as usize]
    }

    /// The site types of an agent type, in declaration order.
    pub fn sites_of(&self, at: AgentTypeId) -> impl Iterator<Item = SiteTypeId> {
        self.site_ranges[at.0 as usize]
            .clone()
            .map(|i| SiteTypeId(i as u16))
    }

    pub fn n_sites_of(&self, at: AgentTypeId) -> usize {
        self.site_ranges[at.0 as usize].len()
    }

    /// The slot index of a site type within its agent's interface.
    pub fn local_site_index(&self, st: SiteTypeId) -> usize {
        st.0 as usize - self.site_ranges[self.agent_of(st).0 as usize].start
    }

    pub fn legal_states_of(&self, st: SiteTypeId) -> &[String] {
        &self.site_states[st.0 as usize]
    }

    pub fn legal_partners_of(&self, st: SiteTypeId) -> &[SiteTypeId] {
        &self.site_partners[st.0 as usize]
    }

    /// The creation default of a site: the first declared state, or `None`
    /// for a stateless site.
    pub fn default_state(&self, st: SiteTypeId) -> Option<StateId> {
        if self.site_states[st.0 as usize].is_empty() {
            None
        } else {
            Some(StateId(0))
        }
    }

    pub fn state_of(&self, st: SiteTypeId, name: &str) -> Option<StateId> {
        self.site_states[st.0 as usize]
            .iter()
            .position(|s| s == name)
            .map(|i| StateId(i as u8))
    }

    pub fn state_name(&self, st: SiteTypeId, state: StateId) -> &str {
        &self.site_states[st.0 as usize][state.0 as usize]
    }

    pub fn resolve_agent(&self, name: &str) -> Option<AgentTypeId> {
        self.agent_index.get(name).copied()
    }

    pub fn resolve_site(&self, at: AgentTypeId, name: &str) -> Option<SiteTypeId> {
        self.site_index.get(&(at, name.to_owned())).copied()
    }

    /// Resolves an external `A.x` site-type name.
    pub fn resolve_site_type(&self, name: &str) -> Option<SiteTypeId> {
        let (agent, site) = name.split_once('.')?;
        self.resolve_site(self.resolve_agent(agent)?, site)
    }

    /// The normal form of a site-type pair: endpoints ordered
    /// lexicographically by `(agent name, site name)`.
    pub fn normalize(&self, st1: SiteTypeId, st2: SiteTypeId) -> (SiteTypeId, SiteTypeId) {
        if self.lex_rank[st1.0 as usize] <= self.lex_rank[st2.0 as usize] {
            (st1, st2)
        } else {
            (st2, st1)
        }
    }

    pub fn bond_type_of(&self, st1: SiteTypeId, st2: SiteTypeId) -> Option<BondTypeId> {
        self.bond_index.get(&self.normalize(st1, st2)).copied()
    }

    pub fn bond_type_ends(&self, bt: BondTypeId) -> (SiteTypeId, SiteTypeId) {
        self.bond_types[bt.0 as usize]
    }

    pub fn is_symmetric(&self, bt: BondTypeId) -> bool {
        let (st1, st2) = self.bond_types[bt.0 as usize];
        st1 == st2
    }

    pub fn affinity(&self, bt: BondTypeId) -> Affinity {
        self.bond_affinity[bt.0 as usize]
    }

    pub fn init_conc(&self, at: AgentTypeId) -> Option<f64> {
        self.init_conc[at.0 as usize]
    }

    /// Pretty-prints the signature for the report file.
    pub fn report(&self) -> String {
        let width = 40;
        let mut info = format!("\n{:-<70}\n\n", "SIGNATURE ");
        let _ = writeln!(info, "signature string\n{}\n", self.expr);
        for at in self.agent_types() {
            let _ = writeln!(info, "{:>width$}", format!("agent {}", self.agent_name(at)));
            for st in self.sites_of(at) {
                if !self.legal_states_of(st).is_empty() {
                    let _ = writeln!(
                        info,
                        "{:>width$}: states -> {:?}",
                        self.site_name(st),
                        self.legal_states_of(st)
                    );
                }
                if !self.legal_partners_of(st).is_empty() {
                    let partners: Vec<String> = self.legal_partners_of(st)
                        .iter()
                        .map(|&p| self.site_type_name(p))
                        .collect();
                    let _ = writeln!(info, "{:>width$}:  bonds -> {partners:?}", self.site_name(st));
                }
            }
        }
        let _ = writeln!(
            info,
            "\n{:>width$}: {}",
            format!("{} agents", self.n_agent_types()),
            self.agent_names.join(", ")
        );
        let site_names: Vec<String> = self.site_types().map(|st| self.site_type_name(st)).collect();
        let _ = writeln!(
            info,
            "{:>width$}: {site_names:?}",
            format!("{} sites", self.n_site_types())
        );
        let _ = writeln!(info, "{:>width$}", format!("{} bond types", self.n_bond_types()));
        for bt in self.bond_type_ids() {
            let _ = writeln!(
                info,
                "{:>width$}: {:?}",
                self.bond_type_name(bt),
                self.affinity(bt)
            );
        }
        info.push('\n');
        info
    }
}
