use crate::molecule::{bond_key, Dissociation};
use crate::reactor;
use crate::tests::fixtures::{ap_system, dimer_system, parse_molecule, port, st};

#[test]
fn monomer_inventories() {
    let sys = dimer_system();
    let m = parse_molecule(&sys, "A(l[.] r[.])", 1);
    assert_eq!(m.size, 1);
    assert_eq!(m.free_count(st(&sys, "A.l")), 1);
    assert_eq!(m.free_count(st(&sys, "A.r")), 1);
    // The only bond type joins l and r on the same agent type, and both
    // sites sit free on the single agent: the pair is excluded exactly.
    assert_eq!(m.self_binding[0], 1);
    assert_eq!(m.binding[0], 0.);
    assert_eq!(m.unbinding[0], 0.);
    m.audit(&sys.sig);
}

#[test]
fn dimer_inventories() {
    let sys = dimer_system();
    let m = parse_molecule(&sys, "A(l[.] r[1]), A(l[1] r[.])", 1);
    assert_eq!(m.size, 2);
    assert_eq!(m.bond_count(sys.sig.bond_type_ids().next().unwrap()), 1);
    assert_eq!(m.free_count(st(&sys, "A.l")), 1);
    assert_eq!(m.free_count(st(&sys, "A.r")), 1);
    // The two remaining free ends live on different agents, so ring
    // closure is a legal pair.
    assert_eq!(m.self_binding[0], 0);
    assert_eq!(m.binding[0], 1.);
    assert_eq!(m.unbinding[0], 1.);
    m.audit(&sys.sig);
}

/// Forming a bond and dissociating it restores every inventory and the
/// canonical form exactly.
#[test]
fn bind_dissociate_round_trip() {
    let sys = dimer_system();
    let before = parse_molecule(&sys, "A(l[.] r[1]), A(l[1] r[.])", 1);
    let canonical = before.canonical.clone();
    let binding = before.binding.clone();
    let unbinding = before.unbinding.clone();

    let p1 = port(&sys, 2, "A.r");
    let p2 = port(&sys, 1, "A.l");
    let mut ring = before;
    ring.form_bond(p1, p2, &sys);
    ring.audit(&sys.sig);
    assert_eq!(ring.bond_count(sys.sig.bond_type_ids().next().unwrap()), 2);
    assert_eq!(ring.free_count(st(&sys, "A.l")), 0);
    assert_ne!(ring.canonical, canonical);

    let back = match ring.dissociate(p1, p2, &sys) {
        Dissociation::Intact(m) => m,
        Dissociation::Fission(..) => panic!("ring opening cannot fission"),
    };
    back.audit(&sys.sig);
    assert_eq!(back.canonical, canonical);
    assert_eq!(back.binding, binding);
    assert_eq!(back.unbinding, unbinding);
    assert_eq!(back.free_count(st(&sys, "A.l")), 1);
    assert_eq!(back.free_count(st(&sys, "A.r")), 1);
}

/// Dissociating an interior bond of a chain splits it into two fresh
/// molecules; free sites are conserved plus the two freed ports.
#[test]
fn fission_partitions_the_chain() {
    let sys = dimer_system();
    let trimer = parse_molecule(&sys, "A(l[.] r[1]), A(l[1] r[2]), A(l[2] r[.])", 1);
    let bt = sys.sig.bond_type_ids().next().unwrap();
    assert_eq!(trimer.bond_count(bt), 2);
    let free_before: usize =
        trimer.free_count(st(&sys, "A.l")) + trimer.free_count(st(&sys, "A.r"));

    let p1 = port(&sys, 2, "A.r");
    let p2 = port(&sys, 3, "A.l");
    let (b, c) = match trimer.dissociate(p1, p2, &sys) {
        Dissociation::Fission(b, c) => (b, c),
        Dissociation::Intact(_) => panic!("interior cut must fission"),
    };
    b.audit(&sys.sig);
    c.audit(&sys.sig);
    let mut sizes = [b.size, c.size];
    sizes.sort_unstable();
    assert_eq!(sizes, [1, 2]);
    assert_eq!(b.bond_count(bt) + c.bond_count(bt), 1);
    let free_after: usize = [&b, &c]
        .iter()
        .map(|m| m.free_count(st(&sys, "A.l")) + m.free_count(st(&sys, "A.r")))
        .sum();
    assert_eq!(free_after, free_before + 2);
}

/// Closing the ends of a chain into a cycle mutates in place: same size,
/// one more bond, one fewer free port of each type.
#[test]
fn ring_closure() {
    let sys = dimer_system();
    let mut chain = parse_molecule(
        &sys,
        "A(l[.] r[1]), A(l[1] r[2]), A(l[2] r[3]), A(l[3] r[.])",
        1,
    );
    let bt = sys.sig.bond_type_ids().next().unwrap();
    chain.form_bond(port(&sys, 4, "A.r"), port(&sys, 1, "A.l"), &sys);
    chain.audit(&sys.sig);
    assert_eq!(chain.size, 4);
    assert_eq!(chain.bond_count(bt), 4);
    assert_eq!(chain.free_count(st(&sys, "A.l")), 0);
    assert_eq!(chain.free_count(st(&sys, "A.r")), 0);
    // A closed cycle has no further internal reactivity beyond its bonds.
    assert_eq!(chain.binding[0], 0.);
    assert_eq!(chain.unbinding[0], 4.);
}

/// Label shifting is invisible to the canonical form and to every
/// inventory.
#[test]
fn copy_with_label_shift_is_identity_up_to_labels() {
    let sys = ap_system();
    let m = parse_molecule(&sys, "A(p[1] l[.] r[.]), P(a1[1] a2[.] a3[.] d[.])", 1);
    let copy = m.copy_with_label_shift(7, &sys.sig);
    copy.audit(&sys.sig);
    assert_eq!(copy.canonical, m.canonical);
    assert_eq!(copy.binding, m.binding);
    assert_eq!(copy.unbinding, m.unbinding);
    assert_eq!(copy.self_binding, m.self_binding);
    assert_eq!(copy.composition, m.composition);
    assert_eq!(copy.label_counter, m.label_counter + 7);
    assert!(copy.agents.keys().all(|&l| l > 7));

    let back = copy.copy_with_label_shift(0, &sys.sig);
    assert_eq!(back.canonical, m.canonical);
}

/// The canonical form depends only on the isomorphism class.
#[test]
fn canonical_form_is_label_invariant() {
    let sys = dimer_system();
    let chain1 = parse_molecule(&sys, "A(l[.] r[1]), A(l[1] r[2]), A(l[2] r[.])", 1);
    let chain2 = parse_molecule(&sys, "A(l[2] r[.]), A(l[.] r[2])", 1);
    let chain3 = parse_molecule(&sys, "A(l[5] r[.]), A(l[.] r[9]), A(l[9] r[5])", 1);
    assert_eq!(chain1.canonical, chain3.canonical);
    assert_ne!(chain1.canonical, chain2.canonical);

    let ring = parse_molecule(&sys, "A(l[3] r[1]), A(l[1] r[2]), A(l[2] r[3])", 1);
    assert_ne!(ring.canonical, chain1.canonical);
}

/// Grafting merges inventories wholesale and installs the crossing bond.
#[test]
fn graft_merges_and_binds() {
    let sys = ap_system();
    let mut a = parse_molecule(&sys, "A(p[.] l[.] r[.])", 1);
    let p = parse_molecule(&sys, "P(a1[.] a2[.] a3[.] d[.])", 1);
    let shift = a.label_counter;
    let p = p.copy_with_label_shift(shift, &sys.sig);
    a.graft(
        p,
        port(&sys, 1, "A.p"),
        port(&sys, 1 + shift, "P.a1"),
        &sys,
    );
    a.audit(&sys.sig);
    assert_eq!(a.size, 2);
    assert_eq!(a.composition, vec![1, 1]);
    let bt = sys.sig.bond_type_of(st(&sys, "A.p"), st(&sys, "P.a1")).unwrap();
    assert_eq!(a.bond_count(bt), 1);
    assert!(a
        .bond_lists[bt.0 as usize]
        .contains(&bond_key(port(&sys, 1, "A.p"), port(&sys, 1 + shift, "P.a1"))));
}

/// Inter-molecular binding mutates the owned instance in place; the size
/// heuristic only decides when both instances are owned.
#[test]
fn inter_binding_keeps_the_owned_recipient() {
    let sys = ap_system();
    let p = parse_molecule(&sys, "P(a1[.] a2[.] a3[.] d[.])", 0);
    let aa = parse_molecule(&sys, "A(p[.] l[.] r[1]), A(p[.] l[1] r[.])", 0);
    let a_type = sys.sig.resolve_agent("A").unwrap();
    let p_type = sys.sig.resolve_agent("P").unwrap();
    let p_port = port(&sys, 1, "P.a1");
    let a_port = port(&sys, 1, "A.p");

    // The owned monomer stays in place even though the copy is larger:
    // label 1 still holds the P agent.
    let joined = reactor::bind_inter(
        p.clone_instance(),
        p_port,
        true,
        aa.clone_instance(),
        a_port,
        false,
        &sys,
    );
    joined.audit(&sys.sig);
    assert_eq!(joined.size, 3);
    assert_eq!(joined.agents[&1].ty, p_type);

    // Same molecules, ownership reversed: the dimer is the recipient.
    let joined = reactor::bind_inter(
        p.clone_instance(),
        p_port,
        false,
        aa.clone_instance(),
        a_port,
        true,
        &sys,
    );
    joined.audit(&sys.sig);
    assert_eq!(joined.agents[&1].ty, a_type);

    // With both owned, the larger allocation survives.
    let joined = reactor::bind_inter(
        p.clone_instance(),
        p_port,
        true,
        aa.clone_instance(),
        a_port,
        true,
        &sys,
    );
    joined.audit(&sys.sig);
    assert_eq!(joined.agents[&1].ty, a_type);
}

/// A symmetric bond type with a single free site has no intra-molecular
/// pair: the half factor excludes self-pairing.
#[test]
fn symmetric_singleton_has_zero_weight() {
    let sys = ap_system();
    let m = parse_molecule(&sys, "P(a1[.] a2[.] a3[.] d[.])", 1);
    let dd = sys
        .sig
        .bond_type_of(st(&sys, "P.d"), st(&sys, "P.d"))
        .unwrap();
    assert_eq!(m.binding[dd.0 as usize], 0.);

    // Two free d sites on distinct agents of one complex (bridged by two
    // A's): exactly one unordered pair.
    let pair = parse_molecule(
        &sys,
        "P(a1[1] a2[.] a3[.] d[.]), A(p[1] l[.] r[2]), A(p[3] l[2] r[.]), P(a1[3] a2[.] a3[.] d[.])",
        1,
    );
    pair.audit(&sys.sig);
    assert_eq!(pair.binding[dd.0 as usize], 1.);
}
