//! Coordinator determination
//!
//! Every surviving member evaluates these functions independently against
//! the same prior membership and the same leaving/suspected sets, and so
//! arrives at the same answer for who coordinates next.

use indexmap::IndexSet;

use crate::types::Address;

/// Membership after a change: `current` minus leaving and suspected members
/// in their original order, followed by joiners that are not yet members.
pub fn compute_new_membership(
    current: &[Address],
    joiners: &[Address],
    leaving: &IndexSet<Address>,
    suspected: &IndexSet<Address>,
) -> Vec<Address> {
    let mut members: Vec<Address> = Vec::with_capacity(current.len() + joiners.len());
    for member in current.iter().chain(joiners) {
        if leaving.contains(member) || suspected.contains(member) || members.contains(member) {
            continue;
        }
        members.push(*member);
    }
    members
}

/// Whether `local` heads the membership that remains once the leaving and
/// suspected members are gone. False when nobody remains.
pub fn would_i_be_coordinator(
    local: Address,
    current: &[Address],
    leaving: &IndexSet<Address>,
    suspected: &IndexSet<Address>,
) -> bool {
    compute_new_membership(current, &[], leaving, suspected)
        .first()
        .map_or(false, |coord| *coord == local)
}
