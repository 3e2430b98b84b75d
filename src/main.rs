use std::path::PathBuf;

use clap::{command, Parser};
use itertools::Itertools;
use sitemix::driver::{self, StopReason};
use sitemix::{alarm::Alarm, monitor::Monitor, ConfigError, Mixture, Parameters, Simulator, System};

// See also `clap_cargo::style::CLAP_STYLING`
pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

#[derive(Debug, Parser)]
#[command(
    name = "sitemix",
    about = "Stochastic simulation of rule-free site-graph binding systems.",
    long_about = "A simulator for arbitrary context-less binding interactions.
Agents carry typed sites that bind and unbind according to a signature
(contact map) with per-bond-type affinities. The program takes a
parameter file with %par/%sig/%rep/%obs/%stp directives, e.g.:

%sig: A(l[r.A], r[l.A$w])
%par: sim_limit = 10 time
%par: obs_frequency = 0.1
%obs: b A.l-A.r

and writes an observation CSV, snapshots, and a report.",
    styles = CLAP_STYLING,
)]
struct Cli {
    /// The signature of the interaction system; overrides the %sig
    /// directive of the parameter file.
    #[arg(short, long)]
    signature: Option<String>,

    /// The parameter file name.
    #[arg(short, long, default_value = "parameters.txt")]
    parameters: PathBuf,

    /// The report file name.
    #[arg(short, long, default_value = "report.txt")]
    report: PathBuf,

    /// An initial mixture snapshot file.
    #[arg(short, long)]
    mixture: Option<PathBuf>,

    /// The seed to use for random number generation.
    #[arg(long)]
    seed: Option<u64>,

    /// The reporting level.
    #[arg(short, long, default_value_t = 0)]
    db: u8,

    /// Parameter overrides: a section (par or rep) followed by key=value
    /// assignments.
    #[arg(short = 'X', long, num_args = 2.., value_names = ["SECTION", "KEY=VALUE"])]
    extra: Vec<String>,
}

fn run_cli(args: Cli) -> Result<(), ConfigError> {
    let mut params = Parameters::read(&args.parameters)?;
    if let Some(signature) = args.signature {
        params.signature_string = Some(signature);
    }
    if let Some(mixture) = args.mixture {
        params.mixture_file = Some(mixture);
    }
    if let Some(seed) = args.seed {
        params.rng_seed = Some(seed);
    }
    if let Some((section, assignments)) = args.extra.split_first() {
        for assignment in assignments {
            params
                .apply_override(section, assignment)
                .map_err(|msg| ConfigError::Parameter {
                    name: assignment.clone(),
                    msg,
                })?;
        }
    }

    let sys = System::new(params, args.db)?;
    let mut mix = match &sys.params.mixture_file {
        Some(path) => Mixture::from_snapshot(path, &sys)?,
        None => Mixture::from_counts(&sys),
    };
    let mut sim = Simulator::new(sys.seed(), mix.time, mix.event);
    let mut monitor = Monitor::new(&sys.params, &sys, sim.time, sim.event)?;
    let alarm = Alarm::new(&sys.params.alarms, &monitor)?;

    let cmdline = std::env::args().join(" ");
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: args.report.display().to_string(),
        source,
    };
    driver::write_report(&args.report, &sys, &mix, &sim, &cmdline).map_err(io_err)?;

    eprintln!("Simulation <{}> started", sys.run_id);
    let outcome = driver::run(&sys, &mut mix, &mut sim, &mut monitor, &alarm, true).map_err(io_err)?;
    driver::write_report(&args.report, &sys, &mix, &sim, &cmdline).map_err(io_err)?;

    let reason = match outcome.reason {
        StopReason::LimitReached => "budget exhausted",
        StopReason::ZeroActivity => "no channel selectable",
        StopReason::AlarmTripped => "stopping condition tripped",
    };
    eprintln!(
        "Simulation <{}> terminated after {} events at t={:.6} ({reason})",
        sys.run_id, outcome.events, outcome.time
    );
    Ok(())
}

pub fn main() {
    if let Err(err) = run_cli(Cli::parse()) {
        eprintln!("sitemix: {err}");
        std::process::exit(1);
    }
}
