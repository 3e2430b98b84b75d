use crate::mixture::Mixture;
use crate::signature::AgentTypeId;
use crate::tests::fixtures::{ap_system, dimer_system, parse_molecule, system_with};
use crate::Simulator;

#[test]
fn initial_aggregates_of_two_monomers() {
    let mut sys = dimer_system();
    sys.init_agents = vec![2];
    let mix = Mixture::from_counts(&sys);
    mix.audit(&sys);

    assert_eq!(mix.number_of_species(), 1);
    assert_eq!(mix.complexes[0].count, 2);
    assert_eq!(mix.activities.total_free_sites, vec![2, 2]);
    // Monomers have no internal reactivity; the only activity is the two
    // ordered inter-molecular pairings (l of one, r of the other).
    assert_eq!(mix.activities.total_unimolecular_binding, 0.);
    assert_eq!(mix.activities.total_bond_dissociation, 0.);
    assert_eq!(mix.activities.total_bimolecular_binding, 2.);
    assert_eq!(mix.total_activity(), 2.);
}

/// Dimerization round trip: two monomers bind, the bond dissociates, and
/// every aggregate returns to its initial value.
#[test]
fn dimerization_round_trip() {
    let mut sys = dimer_system();
    sys.rc_bond_formation_intra = 0.;
    sys.init_agents = vec![2];
    let mut mix = Mixture::from_counts(&sys);
    let monomer_canonical = mix.complexes[0].canonical.clone();
    let initial = mix.activities.clone();

    let mut sim = Simulator::new(123, 0., 0);

    // Only inter-molecular binding is possible.
    assert!(sim.step(&mut mix, &sys));
    mix.audit(&sys);
    assert_eq!(mix.number_of_species(), 1);
    assert_eq!(mix.complexes[0].size, 2);
    assert_eq!(mix.complexes[0].count, 1);

    // Only dissociation is possible; fission merges both fragments back
    // into the monomer species.
    assert!(sim.step(&mut mix, &sys));
    mix.audit(&sys);
    assert_eq!(mix.number_of_species(), 1);
    assert_eq!(mix.complexes[0].size, 1);
    assert_eq!(mix.complexes[0].count, 2);
    assert_eq!(mix.complexes[0].canonical, monomer_canonical);

    let close = |a: f64, b: f64| (a - b).abs() < 1e-9 * (1. + a.abs());
    for (now, then) in mix
        .activities
        .bimolecular_binding
        .iter()
        .zip(&initial.bimolecular_binding)
    {
        assert!(close(*now, *then));
    }
    assert_eq!(
        mix.activities.total_free_sites,
        initial.total_free_sites
    );
    assert!(close(mix.total_activity(), initial.total_activity));
}

/// Driving the kernel preserves every invariant after every event.
#[test]
fn event_pipeline_preserves_invariants() {
    let mut sys = ap_system();
    sys.init_agents = vec![6, 4];
    let mut mix = Mixture::from_counts(&sys);
    let mut sim = Simulator::new(7, 0., 0);

    for _ in 0..300 {
        if !sim.advance_time(&mix) {
            break;
        }
        if !sim.step(&mut mix, &sys) {
            continue;
        }
        mix.audit(&sys);
    }
    assert!(sim.event == 0 || mix.total_activity() >= 0.);
}

/// Without canonical forms, consolidation falls back to the isomorphism
/// scan.
#[test]
fn update_mixture_consolidates_by_isomorphism() {
    let mut sys = system_with("A(l[r.A], r[l.A])", |p| {
        p.canonicalize = false;
    });
    sys.init_agents = vec![0];
    assert!(!sys.canonicalize);
    assert!(sys.consolidate);

    let mut mix = Mixture::from_molecules(Vec::new(), 0., 0, &sys);
    let d1 = parse_molecule(&sys, "A(l[.] r[1]), A(l[1] r[.])", 0);
    let d2 = parse_molecule(&sys, "A(l[9] r[.]), A(l[.] r[9])", 0);
    assert!(d1.canonical.is_empty());

    let idx1 = mix.update_mixture(d1, &sys);
    mix.positive_update(idx1, &sys);
    let idx2 = mix.update_mixture(d2, &sys);
    mix.positive_update(idx2, &sys);
    mix.update_overall_activities(&sys);

    assert_eq!(idx1, idx2);
    assert_eq!(mix.number_of_species(), 1);
    assert_eq!(mix.complexes[0].count, 2);
    mix.audit(&sys);
}

/// Barcoded runs never merge: each product instance stays its own
/// species.
#[test]
fn barcode_disables_consolidation() {
    let mut sys = system_with("A(l[r.A], r[l.A])", |p| {
        p.barcode = true;
    });
    assert!(!sys.consolidate && !sys.canonicalize);
    sys.init_agents = vec![0];

    let mut mix = Mixture::from_molecules(Vec::new(), 0., 0, &sys);
    for run in 0..3 {
        let m = parse_molecule(&sys, "A(l[.] r[.])", 0);
        let idx = mix.update_mixture(m, &sys);
        mix.positive_update(idx, &sys);
        assert_eq!(idx, run);
    }
    mix.update_overall_activities(&sys);
    assert_eq!(mix.number_of_species(), 3);
}

/// Swap-with-last removal keeps the canonical and atom indexes pointing
/// at the right species.
#[test]
fn removal_repairs_indexes() {
    let mut sys = ap_system();
    sys.init_agents = vec![3, 2];
    let mut mix = Mixture::from_counts(&sys);
    let a_canonical = mix.complexes[0].canonical.clone();

    // Drop the first species; the second is swapped into its place.
    mix.negative_update(0, &sys);
    mix.negative_update(0, &sys);
    mix.negative_update(0, &sys);
    let removed = mix.change_count(0, -3, true).expect("species exhausted");
    assert_eq!(removed.count, 0);
    mix.update_overall_activities(&sys);

    assert_eq!(mix.number_of_species(), 1);
    assert!(mix.species_by_canonical(&a_canonical).is_none());
    let p_at = AgentTypeId(1);
    assert_eq!(mix.atom_species(p_at), Some(0));
    mix.audit(&sys);
}
