//! The outer simulation loop.
//!
//! Observations, snapshots, and alarm checks happen between events, never
//! during one: an observation at a scheduled time is a null reaction. The
//! loop halts on the configured time or event budget, on a tripped alarm,
//! or when the mixture has no activity left.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use kdam::{tqdm, BarExt};

use crate::alarm::Alarm;
use crate::mixture::Mixture;
use crate::monitor::{Monitor, SnapFlag};
use crate::params::LimitKind;
use crate::simulator::Simulator;
use crate::system::System;

/// Why the loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    LimitReached,
    ZeroActivity,
    AlarmTripped,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub time: f64,
    pub events: u64,
}

/// Runs the simulation to its budget, producing the observation CSV and
/// the snapshot series.
pub fn run(
    sys: &System,
    mix: &mut Mixture,
    sim: &mut Simulator,
    monitor: &mut Monitor,
    alarm: &Alarm,
    progress: bool,
) -> io::Result<RunOutcome> {
    monitor.write_header()?;
    monitor.observe(mix, sys, sim)?;
    monitor.snapshot(mix, sys, sim, SnapFlag::First)?;

    let limit = sys.params.sim_limit;
    let mut pb = progress.then(|| tqdm!(total = 100));
    let mut reason = StopReason::LimitReached;

    match sys.params.sim_limit_kind {
        LimitKind::Time => {
            while sim.time < limit {
                if !sim.advance_time(mix) {
                    reason = StopReason::ZeroActivity;
                    break;
                }
                let mut skip = false;
                if sim.time >= monitor.observation_time {
                    sim.time = monitor.observation_time;
                    monitor.observe(mix, sys, sim)?;
                    if let Some(decl) = alarm.trigger(monitor) {
                        eprintln!(
                            "{} hit threshold at time {:.5} (event {})",
                            decl.name, sim.time, sim.event
                        );
                        reason = StopReason::AlarmTripped;
                        break;
                    }
                    if let Some(pb) = pb.as_mut() {
                        let _ = pb.update_to((sim.time / limit * 100.) as usize);
                    }
                    skip = true;
                }
                if sim.time >= monitor.snap_time {
                    sim.time = monitor.snap_time;
                    monitor.snapshot(mix, sys, sim, SnapFlag::Periodic)?;
                    skip = true;
                }
                if !skip {
                    sim.event += 1;
                    if let Some(reaction) = sim.select_reaction(mix, sys) {
                        sim.execute_reaction(mix, sys, reaction);
                    }
                }
            }
        }
        LimitKind::Event => {
            while (sim.event as f64) < limit {
                if !sim.advance_time(mix) {
                    reason = StopReason::ZeroActivity;
                    break;
                }
                if sim.event as f64 >= monitor.observation_time {
                    monitor.observe(mix, sys, sim)?;
                    if let Some(decl) = alarm.trigger(monitor) {
                        eprintln!(
                            "{} hit threshold at time {:.5} (event {})",
                            decl.name, sim.time, sim.event
                        );
                        reason = StopReason::AlarmTripped;
                        break;
                    }
                    if let Some(pb) = pb.as_mut() {
                        let _ = pb.update_to((sim.event as f64 / limit * 100.) as usize);
                    }
                }
                if sim.event as f64 >= monitor.snap_time {
                    monitor.snapshot(mix, sys, sim, SnapFlag::Periodic)?;
                }
                sim.event += 1;
                if let Some(reaction) = sim.select_reaction(mix, sys) {
                    sim.execute_reaction(mix, sys, reaction);
                }
            }
        }
    }

    monitor.snapshot(mix, sys, sim, SnapFlag::Last)?;
    if let Some(pb) = pb.as_mut() {
        let _ = pb.update_to(100);
        eprintln!();
    }

    Ok(RunOutcome {
        reason,
        time: sim.time,
        events: sim.event,
    })
}

/// The simulator-state section of the report file.
pub fn simulator_report(sim: &Simulator, mix: &Mixture) -> String {
    let width = 40;
    let mut info = format!("\n{:-<70}\n\n", "SIMULATOR STATE ");
    let _ = writeln!(info, "{:>width$} {}", "simulator status at time t=", sim.time);
    let _ = writeln!(info, "{:>width$}: {}", "events", sim.event);
    let _ = writeln!(
        info,
        "{:>width$}: {:1.5E}",
        "total system activity",
        mix.total_activity()
    );
    let n_heaps = mix.heaps.binding.len() + mix.heaps.unbinding.len() + mix.heaps.site.len();
    if let Some(heap) = mix.heaps.binding.first() {
        let _ = writeln!(
            info,
            "{:>width$}: {} x [leaves: {}]",
            "heaps",
            n_heaps,
            heap.len()
        );
    }
    info
}

/// Writes the full report: run id, command line, signature, parameters
/// and derived rates, simulator state, and mixture summary.
pub fn write_report(
    path: &Path,
    sys: &System,
    mix: &Mixture,
    sim: &Simulator,
    cmdline: &str,
) -> io::Result<()> {
    let mut out = File::create(path)?;
    writeln!(out, "\n{:>30}: {}\n", "uuid", sys.run_id)?;
    writeln!(out, "\n{:-<70}\n\n{}", "COMMAND LINE ", cmdline)?;
    write!(out, "{}", sys.sig.report())?;
    write!(out, "{}", sys.report())?;
    write!(out, "{}", simulator_report(sim, mix))?;
    write!(out, "{}", mix.report(sys))?;
    Ok(())
}
