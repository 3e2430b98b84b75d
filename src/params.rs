use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::parsers::{parse_directive, AlarmDecl, Directive, ObsDecl};
use crate::ConfigError;

/// Avogadro's number, 1/mol.
pub const AVOGADRO: f64 = 6.02214e23;

/// Cytoplasmic volume presets, in liters.
pub const VOLUME_FIBROBLAST: f64 = 2.25e-12;
pub const VOLUME_YEAST: f64 = 4.2e-14;

/// Whether the simulation horizon is simulated time or an event count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitKind {
    #[default]
    Time,
    Event,
}

/// Snapshot file numbering scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Numbering {
    #[default]
    Serial,
    Event,
}

/// The system parameters, as read from a parameter file and optional
/// command-line overrides. Physical inputs are kept as given; the derived
/// stochastic rate constants live on [`crate::System`].
#[derive(Clone, Debug)]
pub struct Parameters {
    pub reference_volume: f64,
    /// Reference temperature in K (25 C).
    pub reference_temperature: f64,
    pub volume: f64,
    pub temperature: f64,
    /// Default initial agent concentration in nM.
    pub default_concentration: f64,

    /// Dissociation constants in M for the categorical affinities.
    pub kd_weak: f64,
    pub kd_medium: f64,
    pub kd_strong: f64,
    /// The binary on-rate in 1/(M s); diffusion-controlled limit.
    pub k_on: f64,
    /// Ratio of binary to unary Kd, before volume/temperature scaling.
    pub ring_closure_factor: f64,

    pub resize_volume: f64,
    pub rescale_temperature: f64,

    /// Inflow per atom type, in M/s.
    pub inflow: Vec<(String, f64)>,
    /// Outflow per atom type, in 1/s per molecule.
    pub outflow: Vec<(String, f64)>,

    pub rng_seed: Option<u64>,
    pub signature_string: Option<String>,
    pub mixture_file: Option<PathBuf>,

    pub sim_limit: f64,
    pub sim_limit_kind: LimitKind,
    pub obs_period: f64,
    pub snap_period: f64,
    /// Number of recent observation values retained per series.
    pub memory: usize,
    pub reproducible: bool,

    pub canonicalize: bool,
    pub consolidate: bool,
    pub barcode: bool,

    pub output_file: PathBuf,
    pub snap_root: String,
    pub numbering: Numbering,

    pub observables: Vec<ObsDecl>,
    pub alarms: Vec<AlarmDecl>,
}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters {
            reference_volume: VOLUME_FIBROBLAST,
            reference_temperature: 273.15 + 25.0,
            volume: VOLUME_FIBROBLAST,
            temperature: 273.15 + 25.0,
            default_concentration: 100.,
            kd_weak: 1000.0e-9,
            kd_medium: 100.0e-9,
            kd_strong: 10.0e-9,
            k_on: 1.0e9,
            ring_closure_factor: 1.0e5,
            resize_volume: 1.,
            rescale_temperature: 1.,
            inflow: Vec::new(),
            outflow: Vec::new(),
            rng_seed: None,
            signature_string: None,
            mixture_file: None,
            sim_limit: 0.,
            sim_limit_kind: LimitKind::Time,
            obs_period: 0.,
            snap_period: 0.,
            memory: 1,
            reproducible: false,
            canonicalize: true,
            consolidate: true,
            barcode: false,
            output_file: PathBuf::from("output.csv"),
            snap_root: String::from("snap"),
            numbering: Numbering::Serial,
            observables: Vec::new(),
            alarms: Vec::new(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.contains("True") || value.contains("true")
}

fn parse_float(name: &str, value: &str) -> Result<f64, String> {
    value
        .parse()
        .map_err(|_| format!("parameter {name} expects a number, got '{value}'"))
}

/// Splits a two-token value such as `100 time` or `0.1 A`.
fn split_pair(name: &str, value: &str) -> Result<(String, String), String> {
    let mut tokens = value.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(a), Some(b), None) => Ok((a.to_owned(), b.to_owned())),
        _ => Err(format!("parameter {name} expects two values, got '{value}'")),
    }
}

impl Parameters {
    /// Reads a parameter file: `%par`, `%sig`, `%rep`, `%obs`, and `%stp`
    /// directives, in any order.
    pub fn read(path: &Path) -> Result<Parameters, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut params = Parameters::default();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let context = |msg: String| ConfigError::Directive {
                file: path.display().to_string(),
                line: lineno + 1,
                msg,
            };
            if let Some(directive) = parse_directive(&line).map_err(context)? {
                params.apply(directive).map_err(context)?;
            }
        }
        Ok(params)
    }

    pub fn apply(&mut self, directive: Directive) -> Result<(), String> {
        match directive {
            Directive::Par { name, value } => self.set_par(&name, &value),
            Directive::Sig(expr) => {
                self.signature_string = Some(expr);
                Ok(())
            }
            Directive::Rep { name, value } => self.set_rep(&name, &value),
            Directive::Obs(decl) => {
                self.observables.push(decl);
                Ok(())
            }
            Directive::Stp(decl) => {
                self.alarms.push(decl);
                Ok(())
            }
        }
    }

    /// Sets one `%par:` parameter by its file keyword.
    pub fn set_par(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "Volume" => self.volume = parse_volume(name, value)?,
            "ReferenceVolume" => self.reference_volume = parse_volume(name, value)?,
            "Temperature" => self.temperature = parse_float(name, value)? + 273.15,
            "ReferenceTemp" => self.reference_temperature = parse_float(name, value)? + 273.15,
            "Kd_weak" => self.kd_weak = parse_float(name, value)?,
            "Kd_medium" => self.kd_medium = parse_float(name, value)?,
            "Kd_strong" => self.kd_strong = parse_float(name, value)?,
            "k_on" => self.k_on = parse_float(name, value)?,
            "ResizeVolume" => self.resize_volume = parse_float(name, value)?,
            "RescaleTemp" => self.rescale_temperature = parse_float(name, value)?,
            "RingClosureFactor" => self.ring_closure_factor = parse_float(name, value)?,
            "initial_mixture" => self.mixture_file = Some(PathBuf::from(value)),
            "reproducible" => self.reproducible = parse_bool(value),
            "canonicalize" => self.canonicalize = parse_bool(value),
            "consolidate" => self.consolidate = parse_bool(value),
            "barcode" => self.barcode = parse_bool(value),
            "sim_limit" => {
                let (limit, kind) = split_pair(name, value)?;
                self.sim_limit = parse_float(name, &limit)?;
                self.sim_limit_kind = match kind.as_str() {
                    "time" => LimitKind::Time,
                    "event" => LimitKind::Event,
                    other => return Err(format!("unknown sim_limit kind '{other}'")),
                };
            }
            "obs_frequency" => self.obs_period = parse_float(name, value)?,
            "snap_frequency" => self.snap_period = parse_float(name, value)?,
            "seed" => {
                if value != "None" {
                    self.rng_seed = Some(
                        value
                            .parse()
                            .map_err(|_| format!("bad seed '{value}'"))?,
                    );
                }
            }
            "memory" => {
                self.memory = value
                    .parse()
                    .map_err(|_| format!("bad memory '{value}'"))?;
            }
            "inflow" => {
                let (rate, atom) = split_pair(name, value)?;
                self.inflow.push((atom, parse_float(name, &rate)?));
            }
            "outflow" => {
                let (rate, atom) = split_pair(name, value)?;
                self.outflow.push((atom, parse_float(name, &rate)?));
            }
            other => return Err(format!("unknown parameter file keyword '{other}'")),
        }
        Ok(())
    }

    /// Sets one `%rep:` reporting option.
    pub fn set_rep(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "output_fn" => self.output_file = PathBuf::from(value),
            "snap_root" => self.snap_root = value.to_owned(),
            "numbering" => {
                self.numbering = match value {
                    "serial" => Numbering::Serial,
                    "event" => Numbering::Event,
                    other => return Err(format!("unknown numbering scheme '{other}'")),
                }
            }
            // report_fn is accepted here for file compatibility; the
            // driver takes the report path from the command line.
            "report_fn" => {}
            other => return Err(format!("unknown report keyword '{other}'")),
        }
        Ok(())
    }

    /// Applies a command-line `-X <section> <key>=<value>` override.
    pub fn apply_override(&mut self, section: &str, assignment: &str) -> Result<(), String> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{assignment}'"))?;
        match section {
            "par" => self.set_par(name.trim(), value.trim()),
            "rep" => self.set_rep(name.trim(), value.trim()),
            other => Err(format!("unknown override section '{other}'")),
        }
    }

    /// Pretty-prints the parameters for the report file.
    pub fn report(&self) -> String {
        let width = 40;
        let form = |x: f64| format!("{x:1.5E}");
        let mut info = format!("\n{:-<70}\n\n", "PARAMETERS ");
        let _ = writeln!(info, "{:>width$}: {} L", "reference Vol", form(self.reference_volume));
        let _ = writeln!(info, "{:>width$}: {} K", "reference Temp", form(self.reference_temperature));
        let _ = writeln!(info, "{:>width$}: {} L", "Volume", form(self.volume));
        let _ = writeln!(
            info,
            "{:>width$}: {} K ({:.3} C)",
            "Temperature",
            form(self.temperature),
            self.temperature - 273.15
        );
        let _ = writeln!(info, "{:>width$}: {}", "Kd weak", self.kd_weak);
        let _ = writeln!(info, "{:>width$}: {}", "Kd medium", self.kd_medium);
        let _ = writeln!(info, "{:>width$}: {}", "Kd strong", self.kd_strong);
        let _ = writeln!(info, "{:>width$}: {}", "k_on", form(self.k_on));
        info.push('\n');
        let _ = writeln!(info, "{:>width$}: {}", "ResizeVolume", self.resize_volume);
        let _ = writeln!(info, "{:>width$}: {}", "RescaleTemperature", self.rescale_temperature);
        let _ = writeln!(
            info,
            "{:>width$}: {}",
            "RingClosureFactor (adjusted)",
            form(self.ring_closure_factor)
        );
        let _ = writeln!(info, "\n{:>width$}: {:?}", "random number seed", self.rng_seed);
        info
    }
}

fn parse_volume(name: &str, value: &str) -> Result<f64, String> {
    match value {
        "fibro" => Ok(VOLUME_FIBROBLAST),
        "yeast" => Ok(VOLUME_YEAST),
        other => parse_float(name, other).map_err(|_| format!("no such volume choice: {other}")),
    }
}
