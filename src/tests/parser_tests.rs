use std::path::PathBuf;

use crate::mixture::Mixture;
use crate::params::LimitKind;
use crate::parsers::parse_directive;
use crate::signature::{Affinity, Signature};
use crate::tests::fixtures::{dimer_system, system_with};
use crate::{Parameters, Simulator};

#[test]
fn signature_interning_and_orderings() {
    let sig = Signature::parse(
        "A(p[a1.P$m a2.P$m a3.P$m], l[r.A$w], r[l.A]), P(a1[p.A], a2[p.A], a3[p.A], d[d.P$m])",
    )
    .expect("signature");
    assert_eq!(sig.n_agent_types(), 2);
    assert_eq!(sig.n_site_types(), 7);
    assert_eq!(sig.n_bond_types(), 5);

    let lr = sig
        .bond_type_of(
            sig.resolve_site_type("A.l").unwrap(),
            sig.resolve_site_type("A.r").unwrap(),
        )
        .unwrap();
    assert_eq!(sig.affinity(lr), Affinity::Weak);
    assert!(!sig.is_symmetric(lr));

    let dd = sig
        .bond_type_of(
            sig.resolve_site_type("P.d").unwrap(),
            sig.resolve_site_type("P.d").unwrap(),
        )
        .unwrap();
    assert!(sig.is_symmetric(dd));
    assert_eq!(sig.affinity(dd), Affinity::Medium);

    // Normal form is lexicographic on (agent name, site name), whichever
    // way the pair is asked.
    let pa = sig.resolve_site_type("P.a1").unwrap();
    let ap = sig.resolve_site_type("A.p").unwrap();
    assert_eq!(sig.bond_type_of(pa, ap), sig.bond_type_of(ap, pa));
    assert_eq!(sig.bond_type_ends(sig.bond_type_of(pa, ap).unwrap()), (ap, pa));
}

#[test]
fn signature_with_concentration_and_numeric_affinity() {
    let sig = Signature::parse("A@250(x[x.A$125.4])").expect("signature");
    assert_eq!(sig.init_conc(sig.resolve_agent("A").unwrap()), Some(250.));
    let xx = sig
        .bond_type_of(
            sig.resolve_site_type("A.x").unwrap(),
            sig.resolve_site_type("A.x").unwrap(),
        )
        .unwrap();
    assert_eq!(sig.affinity(xx), Affinity::Kd(125.4));
}

#[test]
fn signature_rejects_one_sided_bonds() {
    // A.x declares the bond; B.y does not declare the mirror stub.
    assert!(Signature::parse("A(x[y.B]), B(y[z.C]), C(z[y.B])").is_err());
}

#[test]
fn signature_rejects_conflicting_affinities() {
    assert!(Signature::parse("A(l[r.A$w], r[l.A$s])").is_err());
}

#[test]
fn signature_rejects_duplicate_agents() {
    assert!(Signature::parse("A(x[x.A]), A(x[x.A])").is_err());
}

#[test]
fn states_are_declared_and_defaulted() {
    let sig = Signature::parse("A(x{u p}[x.A])").expect("signature");
    let ax = sig.resolve_site_type("A.x").unwrap();
    assert_eq!(sig.legal_states_of(ax), &["u".to_owned(), "p".to_owned()]);
    assert_eq!(sig.state_of(ax, "p").map(|s| s.0), Some(1));
    assert_eq!(sig.default_state(ax).map(|s| s.0), Some(0));
}

#[test]
fn parameter_directives() {
    let mut params = Parameters::default();
    let lines = [
        "%par: sim_limit = 100 time",
        "%par: obs_frequency = 0.5",
        "%par: seed = 7",
        "%par: inflow = 0.1 A",
        "%par: Volume = yeast",
        "%par: canonicalize = True",
        "%sig: A(l[r.A], r[l.A])",
        "%rep: output_fn = out.csv",
        "%obs: \"bonds\" b A.l-A.r",
        "%obs: s A.l",
        "%stp: bonds > 25",
        "// a comment",
        "",
    ];
    for line in lines {
        if let Some(directive) = parse_directive(line).expect("directive") {
            params.apply(directive).expect("apply");
        }
    }
    assert_eq!(params.sim_limit, 100.);
    assert_eq!(params.sim_limit_kind, LimitKind::Time);
    assert_eq!(params.obs_period, 0.5);
    assert_eq!(params.rng_seed, Some(7));
    assert_eq!(params.inflow, vec![("A".to_owned(), 0.1)]);
    assert_eq!(params.volume, crate::params::VOLUME_YEAST);
    assert_eq!(
        params.signature_string.as_deref(),
        Some("A(l[r.A], r[l.A])")
    );
    assert_eq!(params.output_file, PathBuf::from("out.csv"));
    assert_eq!(params.observables.len(), 2);
    assert_eq!(params.observables[0].name.as_deref(), Some("bonds"));
    assert_eq!(params.observables[0].kind, "b");
    assert_eq!(params.observables[1].name, None);
    assert_eq!(params.alarms.len(), 1);
    assert_eq!(params.alarms[0].threshold, 25.);
}

#[test]
fn unknown_directives_are_errors() {
    let mut params = Parameters::default();
    let directive = parse_directive("%par: bogus = 1").unwrap().unwrap();
    assert!(params.apply(directive).is_err());
    assert!(parse_directive("%wat: x").is_err());
}

#[test]
fn derived_rate_constants() {
    // Unit rescaling: k_off is k_on * Kd for the categorical classes.
    let sys = {
        let mut params = Parameters::default();
        params.signature_string = Some("A(l[r.A$w], r[l.A])".to_owned());
        crate::System::new(params, 0).expect("system")
    };
    let expected_inter =
        sys.params.k_on / (crate::params::AVOGADRO * sys.params.volume);
    assert!((sys.rc_bond_formation_inter - expected_inter).abs() < 1e-18);
    assert!(
        (sys.rc_bond_formation_intra
            - sys.params.ring_closure_factor * expected_inter)
            .abs()
            < 1e-9 * sys.rc_bond_formation_intra
    );
    let k_off = sys.rc_bond_dissociation[0];
    assert!((k_off - sys.params.k_on * sys.params.kd_weak).abs() < 1e-6 * k_off);
}

#[test]
fn snapshot_round_trip() {
    let mut sys = dimer_system();
    sys.init_agents = vec![6];
    let mut mix = Mixture::from_counts(&sys);
    let mut sim = Simulator::new(99, 0., 0);
    for _ in 0..4 {
        sim.advance_time(&mix);
        sim.step(&mut mix, &sys);
    }
    let (agents_before, molecules_before) = mix.count_agents_and_molecules();

    let path = std::env::temp_dir().join("sitemix_snapshot_round_trip.ka");
    mix.make_snapshot(&path, &sys, sim.time, sim.event, false)
        .expect("write snapshot");

    let restored = Mixture::from_snapshot(&path, &sys).expect("read snapshot");
    restored.audit(&sys);
    assert_eq!(restored.count_agents_and_molecules(), (agents_before, molecules_before));
    assert_eq!(restored.number_of_species(), mix.number_of_species());
    assert_eq!(restored.event, sim.event);
    assert!((restored.time - sim.time).abs() < 1e-12 * (1. + sim.time));
    for m in &mix.complexes {
        let other = restored
            .species_by_canonical(&m.canonical)
            .expect("species survives the round trip");
        assert_eq!(restored.complexes[other].count, m.count);
    }
}

#[test]
fn flow_requires_canonicalization() {
    let mut params = Parameters::default();
    params.signature_string = Some("A()".to_owned());
    params.canonicalize = false;
    params.inflow.push(("A".to_owned(), 0.1));
    assert!(crate::System::new(params, 0).is_err());
}

#[test]
fn labeled_expressions_parse() {
    let sys = system_with("A(l[r.A], r[l.A])", |_| {});
    let m = crate::tests::fixtures::parse_molecule(&sys, "x3:A(l[.] r[1]), x8:A(l[1] r[.])", 2);
    assert_eq!(m.label_counter, 8);
    assert_eq!(m.size, 2);
    let rendered = m.expression(true, &sys.sig);
    assert!(rendered.contains("x3:A(") && rendered.contains("x8:A("));
}
