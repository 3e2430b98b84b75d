//! Graph surgery per reaction channel.
//!
//! The reactor receives molecules the simulator already owns (the last
//! instance of a consumed species) or cloned (one instance of many); the
//! clone-versus-in-place decision is always explicit at the call site.

use crate::molecule::{Dissociation, Molecule, Port};
use crate::signature::AgentTypeId;
use crate::system::System;

/// A selected reaction instance, ready to execute.
#[derive(Clone, Copy, Debug)]
pub enum Reaction {
    /// Intra-molecular bond formation between two free ports of one
    /// species.
    UnimolecularBinding { species: usize, p1: Port, p2: Port },
    /// Dissociation of a bond within one species.
    BondDissociation { species: usize, p1: Port, p2: Port },
    /// Inter-molecular bond formation between instances of two (possibly
    /// equal) species.
    BimolecularBinding {
        species1: usize,
        species2: usize,
        p1: Port,
        p2: Port,
    },
    /// Zero-molecular creation of a fresh monomer.
    Inflow { atom: AgentTypeId },
    /// Unimolecular removal of a monomer.
    Outflow { atom: AgentTypeId },
}

/// The molecules a reaction leaves behind.
pub enum Products {
    One(Molecule),
    Two(Molecule, Molecule),
}

/// Installs an intra-molecular bond. No fission can occur.
pub fn bind_intra(mut m: Molecule, p1: Port, p2: Port, sys: &System) -> Molecule {
    m.form_bond(p1, p2, sys);
    m
}

/// Removes a bond; the molecule may fission into two fragments sharing no
/// structure with each other.
pub fn dissociate(m: Molecule, p1: Port, p2: Port, sys: &System) -> Products {
    match m.dissociate(p1, p2, sys) {
        Dissociation::Intact(m) => Products::One(m),
        Dissociation::Fission(b, c) => Products::Two(b, c),
    }
}

/// Joins two molecule instances with a crossing bond. The recipient is
/// the instance that arrived owned (the last of a consumed species),
/// which is mutated in place; the other side is relabeled past the
/// recipient's label counter and grafted in. Only when both instances
/// are owned does the size heuristic pick the recipient, so the larger
/// allocation survives.
pub fn bind_inter(
    m1: Molecule,
    p1: Port,
    m1_owned: bool,
    m2: Molecule,
    p2: Port,
    m2_owned: bool,
    sys: &System,
) -> Molecule {
    let m1_is_recipient = match (m1_owned, m2_owned) {
        (true, true) => m1.size >= m2.size,
        (true, false) => true,
        (false, true) => false,
        (false, false) => true,
    };
    let (mut recipient, r_port, attachment, a_port) = if m1_is_recipient {
        (m1, p1, m2, p2)
    } else {
        (m2, p2, m1, p1)
    };
    let shift = recipient.label_counter;
    let attachment = attachment.copy_with_label_shift(shift, &sys.sig);
    let a_port = Port {
        agent: a_port.agent + shift,
        site: a_port.site,
    };
    recipient.graft(attachment, r_port, a_port, sys);
    recipient
}

/// A fresh monomer in the signature's default state.
pub fn inflow(atom: AgentTypeId, sys: &System) -> Molecule {
    Molecule::monomer(atom, 0, sys)
}
