use std::fs;
use std::path::PathBuf;

use crate::alarm::Alarm;
use crate::driver::{self, StopReason};
use crate::mixture::Mixture;
use crate::monitor::Monitor;
use crate::params::LimitKind;
use crate::parsers::{AlarmDecl, ObsDecl};
use crate::signature::AgentTypeId;
use crate::tests::fixtures::{dimer_system, system_with, unit_rates};
use crate::{Parameters, Simulator, System};

/// A single inert monomer has zero total activity: no channel is
/// selectable and the kernel reports a clean stop.
#[test]
fn zero_activity_terminates_cleanly() {
    let mut sys = dimer_system();
    sys.init_agents = vec![1];
    let mut mix = Mixture::from_counts(&sys);
    assert_eq!(mix.total_activity(), 0.);
    let mut sim = Simulator::new(5, 0., 0);
    assert!(!sim.advance_time(&mix));
    assert!(sim.select_reaction(&mut mix, &sys).is_none());
}

/// Inflow/outflow steady state: with inflow λ and per-molecule outflow
/// μ, the monomer count fluctuates around λ/μ, and the outflow activity
/// equals count·μ at every event boundary.
#[test]
fn flow_steady_state() {
    let mut sys = system_with("A()", |_| {});
    sys.init_agents = vec![0];
    sys.inflow_rate = vec![50.];
    sys.outflow_rate = vec![1.];
    let mut mix = Mixture::from_molecules(Vec::new(), 0., 0, &sys);
    let mut sim = Simulator::new(11, 0., 0);
    let at = AgentTypeId(0);
    let count = |mix: &Mixture| -> u64 {
        mix.atom_species(at)
            .map(|i| mix.complexes[i].count)
            .unwrap_or(0)
    };

    let mut weighted_count = 0.;
    let mut weighted_time = 0.;
    for event in 0..30_000u32 {
        let before = sim.time;
        if !sim.advance_time(&mix) {
            // Empty mixture: only inflow is possible, activity stays
            // positive.
            panic!("flow system lost all activity");
        }
        if event >= 3_000 {
            weighted_count += count(&mix) as f64 * (sim.time - before);
            weighted_time += sim.time - before;
        }
        assert!(sim.step(&mut mix, &sys));
        if event % 1_000 == 0 {
            assert_eq!(mix.activities.outflow[0], count(&mix) as f64);
            assert_eq!(mix.activities.total_inflow, 50.);
        }
    }

    let mean = weighted_count / weighted_time;
    assert!(
        (mean - 50.).abs() < 7.5,
        "steady-state mean {mean} is far from 50"
    );
}

fn flow_params(dir: &PathBuf, tag: &str) -> Parameters {
    let mut params = Parameters::default();
    params.signature_string = Some("A(l[r.A$w], r[l.A])".to_owned());
    params.rng_seed = Some(42);
    params.sim_limit = 4.;
    params.obs_period = 0.5;
    params.snap_period = 2.;
    params.output_file = dir.join(format!("{tag}.csv"));
    params.snap_root = dir.join(tag).display().to_string();
    params
        .observables
        .push(ObsDecl::new(Some("bonds".into()), "b".into(), "A.l-A.r".into()));
    params
        .observables
        .push(ObsDecl::new(None, "s".into(), "A.l".into()));
    params
        .observables
        .push(ObsDecl::new(None, "p".into(), "size [1-4]".into()));
    params
}

fn run_once(params: Parameters) -> (Vec<u8>, Vec<u8>) {
    let csv = params.output_file.clone();
    let end_snap = PathBuf::from(format!("{}_end.ka", params.snap_root));
    let mut sys = System::new(params, 0).expect("system");
    unit_rates(&mut sys);
    sys.init_agents = vec![40];
    let mut mix = Mixture::from_counts(&sys);
    let mut sim = Simulator::new(sys.seed(), mix.time, mix.event);
    let mut monitor = Monitor::new(&sys.params, &sys, sim.time, sim.event).expect("monitor");
    let alarm = Alarm::new(&sys.params.alarms, &monitor).expect("alarm");
    let outcome =
        driver::run(&sys, &mut mix, &mut sim, &mut monitor, &alarm, false).expect("run");
    assert_eq!(outcome.reason, StopReason::LimitReached);
    (
        fs::read(&csv).expect("csv output"),
        fs::read(&end_snap).expect("end snapshot"),
    )
}

/// Reproducibility: a fixed seed and fixed parameters give byte-identical
/// observation and snapshot files across independent runs.
#[test]
fn fixed_seed_runs_are_byte_identical() {
    let dir = std::env::temp_dir();
    let (csv1, snap1) = run_once(flow_params(&dir, "sitemix_repro_a"));
    let (csv2, snap2) = run_once(flow_params(&dir, "sitemix_repro_b"));
    assert_eq!(csv1, csv2);
    assert_eq!(snap1, snap2);
    assert!(csv1.len() > 1, "observation file is empty");
}

/// A stopping condition halts the run once its observable exceeds the
/// threshold.
#[test]
fn alarm_stops_the_run() {
    let dir = std::env::temp_dir();
    let mut params = flow_params(&dir, "sitemix_alarm");
    params.obs_period = 0.05;
    params.alarms.push(AlarmDecl::new("bonds".into(), 0, 0.));
    let csv = params.output_file.clone();

    let mut sys = System::new(params, 0).expect("system");
    unit_rates(&mut sys);
    sys.init_agents = vec![40];
    let mut mix = Mixture::from_counts(&sys);
    let mut sim = Simulator::new(sys.seed(), mix.time, mix.event);
    let mut monitor = Monitor::new(&sys.params, &sys, sim.time, sim.event).expect("monitor");
    let alarm = Alarm::new(&sys.params.alarms, &monitor).expect("alarm");
    let outcome =
        driver::run(&sys, &mut mix, &mut sim, &mut monitor, &alarm, false).expect("run");
    assert_eq!(outcome.reason, StopReason::AlarmTripped);
    assert!(fs::read(&csv).expect("csv output").len() > 1);
}

/// Alarms naming unknown observables are configuration errors.
#[test]
fn alarm_validates_observable_names() {
    let dir = std::env::temp_dir();
    let params = flow_params(&dir, "sitemix_alarm_bad");
    let sys = System::new(params, 0).expect("system");
    let monitor = Monitor::new(&sys.params, &sys, 0., 0).expect("monitor");
    let bad = [AlarmDecl::new("nonesuch".into(), 0, 1.)];
    assert!(Alarm::new(&bad, &monitor).is_err());
}

/// Event-budget runs schedule observations in event counts, seeded from
/// the event counter, even when the clock and the counter disagree (as
/// they do when continuing from a snapshot).
#[test]
fn event_limited_observation_cadence() {
    let dir = std::env::temp_dir();
    let mut params = Parameters::default();
    params.signature_string = Some("A(l[r.A$w], r[l.A])".to_owned());
    params.rng_seed = Some(9);
    params.sim_limit = 200.;
    params.sim_limit_kind = LimitKind::Event;
    params.obs_period = 50.;
    params.output_file = dir.join("sitemix_event_cadence.csv");
    params.snap_root = dir.join("sitemix_event_cadence").display().to_string();
    params
        .observables
        .push(ObsDecl::new(None, "b".into(), "A.l-A.r".into()));
    let csv = params.output_file.clone();

    let mut sys = System::new(params, 0).expect("system");
    unit_rates(&mut sys);
    sys.init_agents = vec![40];
    let mut mix = Mixture::from_counts(&sys);
    let mut sim = Simulator::new(sys.seed(), 7.5, 0);
    let mut monitor = Monitor::new(&sys.params, &sys, sim.time, sim.event).expect("monitor");
    let alarm = Alarm::new(&[], &monitor).expect("alarm");
    let outcome =
        driver::run(&sys, &mut mix, &mut sim, &mut monitor, &alarm, false).expect("run");
    assert_eq!(outcome.reason, StopReason::LimitReached);
    assert_eq!(outcome.events, 200);

    // The header, the initial row, and one row per 50-event period.
    let contents = fs::read_to_string(&csv).expect("csv output");
    assert_eq!(contents.lines().count(), 5);
    assert!(contents.lines().last().unwrap().starts_with("150"));
}
