use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::matcher::{self, Pattern};
use crate::mixture::Mixture;
use crate::molecule::Molecule;
use crate::params::{LimitKind, Numbering, Parameters};
use crate::parsers::{complex_expr, ObsDecl};
use crate::signature::{BondTypeId, SiteTypeId};
use crate::simulator::Simulator;
use crate::system::System;
use crate::ConfigError;

/// What an observable measures at each observation tick.
enum ObsKind {
    /// `!`: instances of one fully specified species.
    Species { canonical: String, pattern: Pattern },
    /// `?`: embeddings of a pattern, optionally stratified by size.
    Embeddings {
        pattern: Pattern,
        size_range: Option<(usize, usize)>,
    },
    /// `b`: bonds of one type across the mixture.
    BondType(BondTypeId),
    /// `s`: free sites of one type across the mixture.
    SiteType(SiteTypeId),
    /// `mb`: bonds of one type in the current largest complex.
    MaximerBond(BondTypeId),
    /// `ms`: free sites of one type in the current largest complex.
    MaximerSite(SiteTypeId),
    /// `p size [min-max]`: molecules per size class.
    SizeRange { min: usize, max: usize },
    /// `p maxsize [n]`: sizes of the n largest complexes.
    TopSizes(usize),
}

struct Observable {
    name: String,
    labels: Vec<String>,
    kind: ObsKind,
    /// Recent values per series, bounded by the memory parameter.
    values: Vec<VecDeque<u64>>,
}

/// When a snapshot is taken, for file naming.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SnapFlag {
    Periodic,
    First,
    Last,
}

/// Compiles the `%obs:` declarations, writes the observation CSV, and
/// numbers snapshot files. Observations happen between events, never
/// during one.
pub struct Monitor {
    observables: Vec<Observable>,
    pub obs_period: f64,
    pub snap_period: f64,
    memory: usize,
    limit_kind: LimitKind,
    output_file: PathBuf,
    snap_root: String,
    numbering: Numbering,
    /// Zero-pad width for serial snapshot numbers, when the horizon is
    /// known.
    name_width: Option<usize>,
    pub observation_time: f64,
    pub snap_time: f64,
    snap_counter: u64,
}

fn parse_range(text: &str) -> Result<(usize, usize), String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("could not parse size range '{text}'"))?;
    let (min, max) = inner
        .split_once('-')
        .ok_or_else(|| format!("could not parse size range '{text}'"))?;
    let min = min.trim().parse().map_err(|_| format!("bad size '{min}'"))?;
    let max = max.trim().parse().map_err(|_| format!("bad size '{max}'"))?;
    Ok((min, max))
}

fn parse_count(text: &str) -> Result<usize, String> {
    text.trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .and_then(|t| t.trim().parse().ok())
        .ok_or_else(|| format!("could not parse rank count '{text}'"))
}

/// The numeric suffix of a snapshot file stem, e.g. 181 for
/// `snap__0181.ka`.
fn trailing_number(path: &std::path::Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

impl Monitor {
    pub fn new(
        params: &Parameters,
        sys: &System,
        start_time: f64,
        start_event: u64,
    ) -> Result<Monitor, ConfigError> {
        // Observation and snapshot schedules live in the units of the
        // simulation budget: clock time for time-limited runs, the event
        // counter for event-limited ones.
        let start = match params.sim_limit_kind {
            LimitKind::Time => start_time,
            LimitKind::Event => start_event as f64,
        };
        let mut monitor = Monitor {
            observables: Vec::new(),
            obs_period: params.obs_period,
            snap_period: params.snap_period,
            memory: params.memory.max(1),
            limit_kind: params.sim_limit_kind,
            output_file: params.output_file.clone(),
            snap_root: params.snap_root.clone(),
            numbering: params.numbering,
            name_width: None,
            observation_time: if params.obs_period > 0. {
                start
            } else {
                f64::INFINITY
            },
            snap_time: if params.snap_period > 0. {
                start
            } else {
                f64::INFINITY
            },
            snap_counter: 0,
        };
        if params.numbering == Numbering::Serial && params.sim_limit > 0. && params.snap_period > 0.
        {
            let width = (params.sim_limit / params.snap_period).log10() as usize + 1;
            monitor.name_width = Some(width);
        }
        // Continuation runs resume the snapshot numbering where the
        // initial mixture file left off.
        if params.reproducible {
            if let Some(file) = &params.mixture_file {
                monitor.snap_counter = trailing_number(file).map(|n| n + 1).unwrap_or(0);
            }
        }

        let mut default_name = 1;
        for decl in &params.observables {
            let obs = monitor.compile(decl, sys, &mut default_name)?;
            if monitor.observables.iter().any(|o| o.name == obs.name) {
                return Err(ConfigError::Observable {
                    name: obs.name.clone(),
                    msg: "observable name is duplicate".into(),
                });
            }
            monitor.observables.push(obs);
        }
        Ok(monitor)
    }

    fn compile(
        &self,
        decl: &ObsDecl,
        sys: &System,
        default_name: &mut u32,
    ) -> Result<Observable, ConfigError> {
        let sig = &sys.sig;
        let name = match &decl.name {
            Some(name) => name.clone(),
            None => {
                let name = format!("*{default_name}");
                *default_name += 1;
                name
            }
        };
        let fail = |msg: String| ConfigError::Observable {
            name: name.clone(),
            msg,
        };
        let label_base = match &decl.name {
            Some(name) => name.clone(),
            None => decl.expr.clone(),
        };
        let parse_pattern = |expr: &str| -> Result<Pattern, ConfigError> {
            let parsed = match complex_expr(expr.trim()) {
                Ok(("", parsed)) => parsed,
                Ok((rest, _)) => return Err(fail(format!("trailing input near '{rest}'"))),
                Err(err) => return Err(fail(format!("{err}"))),
            };
            Pattern::compile(&parsed, sig)
        };
        let bond_type = |expr: &str| -> Result<BondTypeId, ConfigError> {
            let (a, b) = expr
                .split_once('-')
                .ok_or_else(|| fail(format!("bad bond type '{expr}'")))?;
            let st1 = sig
                .resolve_site_type(a.trim())
                .ok_or_else(|| fail(format!("unknown site type '{a}'")))?;
            let st2 = sig
                .resolve_site_type(b.trim())
                .ok_or_else(|| fail(format!("unknown site type '{b}'")))?;
            sig.bond_type_of(st1, st2)
                .ok_or_else(|| fail(format!("bond type '{expr}' is not declared")))
        };
        let site_type = |expr: &str| -> Result<SiteTypeId, ConfigError> {
            sig.resolve_site_type(expr.trim())
                .ok_or_else(|| fail(format!("unknown site type '{expr}'")))
        };

        let (kind, labels) = match decl.kind.as_str() {
            "!" => {
                let parsed = match complex_expr(decl.expr.trim()) {
                    Ok(("", parsed)) => parsed,
                    _ => return Err(fail(format!("bad molecule '{}'", decl.expr))),
                };
                let m = Molecule::from_parsed(&parsed, 0, sys)?;
                let kind = ObsKind::Species {
                    canonical: m.canonical.clone(),
                    pattern: Pattern::exact(&m, sig),
                };
                (kind, vec![format!("!{label_base}")])
            }
            "?" => match decl.expr.split_once("size") {
                Some((expr, range)) => {
                    let (min, max) = parse_range(range).map_err(fail)?;
                    let pattern = parse_pattern(expr)?;
                    let labels = (min..=max)
                        .map(|i| format!("?{} in size {i}", expr.trim()))
                        .collect();
                    (
                        ObsKind::Embeddings {
                            pattern,
                            size_range: Some((min, max)),
                        },
                        labels,
                    )
                }
                None => (
                    ObsKind::Embeddings {
                        pattern: parse_pattern(&decl.expr)?,
                        size_range: None,
                    },
                    vec![format!("?{label_base}")],
                ),
            },
            "b" => (ObsKind::BondType(bond_type(&decl.expr)?), vec![label_base]),
            "s" => (ObsKind::SiteType(site_type(&decl.expr)?), vec![label_base]),
            "mb" => (
                ObsKind::MaximerBond(bond_type(&decl.expr)?),
                vec![format!("mb {label_base}")],
            ),
            "ms" => (
                ObsKind::MaximerSite(site_type(&decl.expr)?),
                vec![format!("ms {label_base}")],
            ),
            "p" => {
                if let Some((_, rest)) = decl.expr.split_once("maxsize") {
                    let ranks = parse_count(rest).map_err(fail)?;
                    let labels = (1..=ranks).map(|i| format!("sz-rank {i}")).collect();
                    (ObsKind::TopSizes(ranks), labels)
                } else if let Some((_, rest)) = decl.expr.split_once("size") {
                    let (min, max) = parse_range(rest).map_err(fail)?;
                    let labels = (min..=max).map(|i| format!("size {i}")).collect();
                    (ObsKind::SizeRange { min, max }, labels)
                } else {
                    return Err(fail(format!("bad property observable '{}'", decl.expr)));
                }
            }
            other => return Err(fail(format!("unknown observable kind '{other}'"))),
        };

        let values = vec![VecDeque::new(); labels.len()];
        Ok(Observable {
            name,
            labels,
            kind,
            values,
        })
    }

    /// Writes the CSV column labels.
    pub fn write_header(&self) -> io::Result<()> {
        let mut line = match self.limit_kind {
            LimitKind::Time => String::from("time"),
            LimitKind::Event => String::from("event"),
        };
        for obs in &self.observables {
            for label in &obs.labels {
                let _ = write!(line, ", {label}");
            }
        }
        let mut file = File::create(&self.output_file)?;
        writeln!(file, "{line}")
    }

    /// Evaluates every observable and appends one CSV row.
    pub fn observe(&mut self, mix: &Mixture, sys: &System, sim: &Simulator) -> io::Result<()> {
        let mut line = match self.limit_kind {
            LimitKind::Time => format!("{}", sim.time),
            LimitKind::Event => format!("{}", sim.event),
        };
        let maximer = mix.complexes.iter().max_by_key(|m| m.size);
        let memory = self.memory;

        for obs in &mut self.observables {
            let mut results: Vec<u64> = Vec::with_capacity(obs.labels.len());
            match &obs.kind {
                ObsKind::Species { canonical, pattern } => {
                    let count = if sys.canonicalize {
                        mix.species_by_canonical(canonical)
                            .map(|i| mix.complexes[i].count)
                            .unwrap_or(0)
                    } else {
                        mix.complexes
                            .iter()
                            .find(|m| {
                                m.size == pattern.agents.len()
                                    && matcher::matches(m, pattern, &sys.sig)
                            })
                            .map(|m| m.count)
                            .unwrap_or(0)
                    };
                    results.push(count);
                }
                ObsKind::Embeddings {
                    pattern,
                    size_range,
                } => match size_range {
                    None => {
                        let embed = mix
                            .complexes
                            .iter()
                            .map(|m| matcher::embeddings(m, pattern, &sys.sig) * m.count)
                            .sum();
                        results.push(embed);
                    }
                    Some((min, max)) => {
                        for size in *min..=*max {
                            let embed = mix
                                .complexes
                                .iter()
                                .filter(|m| m.size == size)
                                .map(|m| matcher::embeddings(m, pattern, &sys.sig) * m.count)
                                .sum();
                            results.push(embed);
                        }
                    }
                },
                ObsKind::BondType(bt) => {
                    results.push(mix.activities.total_bond_type[bt.0 as usize]);
                }
                ObsKind::SiteType(st) => {
                    results.push(mix.activities.total_free_sites[st.0 as usize]);
                }
                ObsKind::MaximerBond(bt) => {
                    results.push(maximer.map(|m| m.bond_count(*bt) as u64).unwrap_or(0));
                }
                ObsKind::MaximerSite(st) => {
                    results.push(maximer.map(|m| m.free_count(*st) as u64).unwrap_or(0));
                }
                ObsKind::SizeRange { min, max } => {
                    for size in *min..=*max {
                        results.push(
                            mix.complexes
                                .iter()
                                .filter(|m| m.size == size)
                                .map(|m| m.count)
                                .sum(),
                        );
                    }
                }
                ObsKind::TopSizes(ranks) => {
                    let mut sizes: Vec<usize> =
                        mix.complexes.iter().map(|m| m.size).collect();
                    sizes.sort_unstable_by_key(|&s| std::cmp::Reverse(s));
                    for i in 0..*ranks {
                        results.push(sizes.get(i).copied().unwrap_or(0) as u64);
                    }
                }
            }
            for (series, value) in obs.values.iter_mut().zip(&results) {
                series.push_back(*value);
                while series.len() > memory {
                    series.pop_front();
                }
            }
            for value in &results {
                let _ = write!(line, ", {value}");
            }
        }

        let mut file = OpenOptions::new().append(true).open(&self.output_file)?;
        writeln!(file, "{line}")?;
        self.observation_time += self.obs_period;
        Ok(())
    }

    /// The most recent value of a named observable series; alarms read
    /// this.
    pub fn last_value(&self, name: &str, index: usize) -> Option<u64> {
        let obs = self.observables.iter().find(|o| o.name == name)?;
        obs.values.get(index)?.back().copied()
    }

    pub fn has_observable(&self, name: &str) -> bool {
        self.observables.iter().any(|o| o.name == name)
    }

    /// Writes a snapshot of the mixture with the scheme's file name.
    pub fn snapshot(
        &mut self,
        mix: &Mixture,
        sys: &System,
        sim: &Simulator,
        flag: SnapFlag,
    ) -> io::Result<()> {
        let file = match flag {
            SnapFlag::First => format!("{}_start.ka", self.snap_root),
            SnapFlag::Last => format!("{}_end.ka", self.snap_root),
            SnapFlag::Periodic => {
                let number = match self.numbering {
                    Numbering::Serial => self.snap_counter,
                    Numbering::Event => sim.event,
                };
                match self.name_width {
                    Some(width) => format!("{}{:0width$}.ka", self.snap_root, number),
                    None => format!("{}{}.ka", self.snap_root, number),
                }
            }
        };
        mix.make_snapshot(std::path::Path::new(&file), sys, sim.time, sim.event, false)?;
        if flag == SnapFlag::Periodic {
            self.snap_counter += 1;
            self.snap_time += self.snap_period;
        }
        Ok(())
    }
}
