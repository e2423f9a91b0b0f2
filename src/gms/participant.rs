//! Participant role: a member that is not the coordinator

use indexmap::IndexSet;
use tracing::{debug, trace, warn};

use super::membership::would_i_be_coordinator;
use super::request::{Request, RequestKind};
use super::role::Role;
use super::{server, Gms};
use crate::types::{Address, Digest, JoinRsp, View};

/// Leave through the coordinator of the installed view. Local membership
/// state is reset only when the leave protocol reports success.
pub(super) fn leave(gms: &Gms, member: Address) -> bool {
    if member != gms.local_addr() {
        warn!(local = %gms.local_addr(), %member, "a participant can only leave itself");
        return false;
    }
    let left = server::send_leave_req_to_coord(gms, gms.determine_coordinator());
    if left {
        gms.init_state();
    }
    left
}

/// A JOIN response arriving after this node is already a member. It is
/// installed only if it carries a newer view than the one installed.
pub(super) fn handle_join_response(gms: &Gms, rsp: JoinRsp) {
    let Some(view) = rsp.view else {
        return;
    };
    let newer = gms
        .view_id()
        .map_or(false, |current| view.view_id() > current);
    if newer {
        gms.install_view(view, rsp.digest.unwrap_or_default());
    } else {
        trace!(local = %gms.local_addr(), view_id = %view.view_id(), "discarding late JOIN response");
    }
}

pub(super) fn suspect(gms: &Gms, member: Address) {
    gms.view_handler().add(Request::suspect(member));
}

pub(super) fn unsuspect(gms: &Gms, member: Address) {
    if let Role::Participant(state) = &mut *gms.lock_role() {
        if state.suspected.shift_remove(&member) {
            debug!(local = %gms.local_addr(), %member, "unsuspected");
        }
    }
}

/// Accumulate suspicions and leaves; take over as coordinator if this node
/// heads the membership once all of them are gone.
pub(super) fn handle_membership_change(gms: &Gms, requests: Vec<Request>) {
    let local = gms.local_addr();
    let leaving = gms.is_leaving();
    let mut leaving_mbrs: IndexSet<Address> = IndexSet::new();

    let mut role = gms.lock_role();
    let Role::Participant(state) = &mut *role else {
        return;
    };
    for request in &requests {
        match request.kind() {
            RequestKind::Suspect => {
                state.suspected.insert(request.member());
            }
            RequestKind::Leave => {
                leaving_mbrs.insert(request.member());
            }
            _ => {}
        }
    }
    if state.suspected.is_empty() && leaving_mbrs.is_empty() {
        return;
    }

    let members = gms.members();
    if !would_i_be_coordinator(local, &members, &leaving_mbrs, &state.suspected) {
        debug!(
            %local,
            ?requests,
            suspected = ?state.suspected,
            "not next in line, waiting for the new view"
        );
        return;
    }

    let suspected = std::mem::take(&mut state.suspected);
    gms.transition(&mut role, Role::Coordinator);
    drop(role);
    debug!(
        %local,
        ?requests,
        ?members,
        "becoming coordinator"
    );

    let mut batch: Vec<Request> = leaving_mbrs.into_iter().map(Request::leave).collect();
    for member in suspected {
        batch.push(Request::suspect(member));
        gms.ack_collector().suspect(member);
    }
    if leaving {
        batch.push(Request::coord_leave(local));
    }
    gms.view_handler().add_all(batch);
}

/// Install a view from the coordinator. A leaving node ignores a view that
/// no longer contains it; that view confirms its departure.
pub(super) fn handle_view_change(gms: &Gms, view: View, digest: Digest) {
    if let Role::Participant(state) = &mut *gms.lock_role() {
        state.suspected.clear();
    }
    if gms.is_leaving() && !view.contains(&gms.local_addr()) {
        debug!(local = %gms.local_addr(), view = %view, "leaving, ignoring view that excludes us");
        return;
    }
    gms.install_view(view, digest);
}
