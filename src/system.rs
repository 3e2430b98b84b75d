use std::fmt::Write as _;

use crate::params::{Parameters, AVOGADRO};
use crate::signature::{Affinity, Signature};
use crate::{ConfigError, DEFAULT_SEED};

/// The simulation context: the signature, the (adjusted) parameters, the
/// behavior flags, and the derived stochastic rate constants. One value
/// of this type is threaded through every component; there is no ambient
/// global state.
#[derive(Clone, Debug)]
pub struct System {
    pub sig: Signature,
    pub params: Parameters,

    pub canonicalize: bool,
    pub consolidate: bool,
    pub barcode: bool,
    pub db_level: u8,

    /// Stochastic rate constant for inter-molecular bond formation, 1/s.
    pub rc_bond_formation_inter: f64,
    /// Stochastic rate constant for intra-molecular bond formation, 1/s.
    pub rc_bond_formation_intra: f64,
    /// Stochastic off-rate per bond type, 1/s.
    pub rc_bond_dissociation: Vec<f64>,

    /// Zero-molecular inflow activity per agent type, events/s.
    pub inflow_rate: Vec<f64>,
    /// Unimolecular outflow rate per agent type, 1/s per molecule.
    pub outflow_rate: Vec<f64>,

    /// Initial agent counts per agent type, in molecules.
    pub init_agents: Vec<u64>,

    /// A deterministic run identifier derived from the seed, so that
    /// fixed-seed runs produce byte-identical headers.
    pub run_id: String,
}

impl System {
    /// Resolves the parameters into a runnable context: parses the
    /// signature, applies the volume/temperature scale factors, and
    /// derives the stochastic rate constants.
    pub fn new(mut params: Parameters, db_level: u8) -> Result<System, ConfigError> {
        let expr = params.signature_string.clone().ok_or_else(|| {
            ConfigError::Parameter {
                name: "signature".into(),
                msg: "signature information is missing".into(),
            }
        })?;
        let sig = Signature::parse(&expr)?;

        // Flag sanity: barcoded runs keep every instance as its own
        // species, and without consolidation there is nothing for
        // canonical forms to key.
        let barcode = params.barcode;
        let consolidate = params.consolidate && !barcode;
        let canonicalize = params.canonicalize && consolidate;
        if !(params.inflow.is_empty() && params.outflow.is_empty()) && !canonicalize {
            return Err(ConfigError::Parameter {
                name: "inflow".into(),
                msg: "in/out flow requires canonicalization".into(),
            });
        }

        // An explicit volume or temperature takes precedence and
        // re-derives the scale factor relative to the reference.
        if params.volume != params.reference_volume {
            params.resize_volume = params.volume / params.reference_volume;
        } else {
            params.volume = params.reference_volume * params.resize_volume;
        }
        if params.temperature != params.reference_temperature {
            params.rescale_temperature = params.temperature / params.reference_temperature;
        } else {
            params.temperature = params.reference_temperature * params.rescale_temperature;
        }
        params.ring_closure_factor *=
            params.resize_volume * params.rescale_temperature.powf(1.5);

        let s_on = params.k_on / (AVOGADRO * params.volume);
        let s_ring_on = params.ring_closure_factor * s_on;

        // Off-rates: the categorical affinities name dissociation
        // constants; the exponent is a monotone thermodynamic rescaling
        // anchored at the reference temperature.
        let k_off = |kd: f64| params.k_on * kd.powf(1. / params.rescale_temperature);
        let rc_bond_dissociation = sig
            .bond_type_ids()
            .map(|bt| match sig.affinity(bt) {
                Affinity::Weak => k_off(params.kd_weak),
                Affinity::Medium | Affinity::Default => k_off(params.kd_medium),
                Affinity::Strong => k_off(params.kd_strong),
                Affinity::Kd(nanomolar) => k_off(nanomolar * 1.0e-9),
            })
            .collect();

        let mut inflow_rate = vec![0.; sig.n_agent_types()];
        for (atom, rate) in &params.inflow {
            let at = sig.resolve_agent(atom).ok_or_else(|| ConfigError::Parameter {
                name: "inflow".into(),
                msg: format!("unknown atom type {atom}"),
            })?;
            // Inflows are zero-molecular.
            inflow_rate[at.0 as usize] = rate * AVOGADRO * params.volume;
        }
        let mut outflow_rate = vec![0.; sig.n_agent_types()];
        for (atom, rate) in &params.outflow {
            let at = sig.resolve_agent(atom).ok_or_else(|| ConfigError::Parameter {
                name: "outflow".into(),
                msg: format!("unknown atom type {atom}"),
            })?;
            // Outflows are unimolecular.
            outflow_rate[at.0 as usize] = *rate;
        }

        let init_agents = sig
            .agent_types()
            .map(|at| {
                let conc = sig.init_conc(at).unwrap_or(params.default_concentration);
                (conc * 1.0e-9 * AVOGADRO * params.volume) as u64
            })
            .collect();

        let run_id = run_id(params.rng_seed.unwrap_or(DEFAULT_SEED));

        Ok(System {
            sig,
            params,
            canonicalize,
            consolidate,
            barcode,
            db_level,
            rc_bond_formation_inter: s_on,
            rc_bond_formation_intra: s_ring_on,
            rc_bond_dissociation,
            inflow_rate,
            outflow_rate,
            init_agents,
            run_id,
        })
    }

    pub fn seed(&self) -> u64 {
        self.params.rng_seed.unwrap_or(DEFAULT_SEED)
    }

    /// Pretty-prints the derived rate constants for the report file.
    pub fn report(&self) -> String {
        let width = 40;
        let mut info = self.params.report();
        info.push('\n');
        let _ = writeln!(
            info,
            "{:>width$}: {:1.5E}",
            "inter-molecular on-rate (s_on)", self.rc_bond_formation_inter
        );
        let _ = writeln!(
            info,
            "{:>width$}: {:1.5E}",
            "intra-molecular on-rate (s_ring_on)", self.rc_bond_formation_intra
        );
        for bt in self.sig.bond_type_ids() {
            let _ = writeln!(
                info,
                "{:>width$}: {:1.5E}",
                format!("off-rate ({})", self.sig.bond_type_name(bt)),
                self.rc_bond_dissociation[bt.0 as usize]
            );
        }
        info.push('\n');
        for at in self.sig.agent_types() {
            if self.inflow_rate[at.0 as usize] > 0. {
                let _ = writeln!(
                    info,
                    "{:>width$}: {:1.5E}",
                    format!("inflow rate ({})", self.sig.agent_name(at)),
                    self.inflow_rate[at.0 as usize]
                );
            }
            if self.outflow_rate[at.0 as usize] > 0. {
                let _ = writeln!(
                    info,
                    "{:>width$}: {:1.5E}",
                    format!("outflow rate ({})", self.sig.agent_name(at)),
                    self.outflow_rate[at.0 as usize]
                );
            }
        }
        info.push('\n');
        for at in self.sig.agent_types() {
            let _ = writeln!(
                info,
                "{:>width$}: {}",
                format!("initial agents {}", self.sig.agent_name(at)),
                self.init_agents[at.0 as usize]
            );
        }
        info
    }
}

/// A deterministic 128-bit identifier in UUID layout, derived from the
/// seed with splitmix64 so that equal seeds give equal headers.
fn run_id(seed: u64) -> String {
    fn splitmix(state: &mut u64) -> u64 {
        *state = state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }
    let mut state = seed;
    let hi = splitmix(&mut state);
    let lo = splitmix(&mut state);
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (hi >> 32) as u32,
        (hi >> 16) as u16,
        hi as u16,
        (lo >> 48) as u16,
        lo & 0xffff_ffff_ffff
    )
}
