//! Coordinator role: creates and installs new views

use indexmap::IndexSet;
use tracing::{debug, info, trace, warn};

use super::membership::compute_new_membership;
use super::request::{Request, RequestKind};
use super::{server, Gms};
use crate::transport::GmsHeader;
use crate::types::{Address, Digest, JoinRsp, View};

/// Leave by handing the group to the next member in line. The last member
/// simply resets its state.
pub(super) fn leave(gms: &Gms, member: Address) -> bool {
    let local = gms.local_addr();
    if member != local {
        warn!(%local, %member, "a coordinator can only leave itself");
        return false;
    }
    match gms.determine_next_coordinator() {
        None => {
            debug!(%local, "last member leaving");
            gms.init_state();
            true
        }
        Some(next) => {
            let left = server::send_leave_req_to_coord(gms, Some(next));
            if left {
                gms.init_state();
            }
            left
        }
    }
}

pub(super) fn suspect(gms: &Gms, member: Address) {
    gms.view_handler().add(Request::suspect(member));
}

pub(super) fn handle_view_change(gms: &Gms, view: View, digest: Digest) {
    if gms.is_leaving() && !view.contains(&gms.local_addr()) {
        debug!(local = %gms.local_addr(), view = %view, "leaving, ignoring view that excludes us");
        return;
    }
    gms.install_view(view, digest);
}

/// Turn a batch of joins, leaves and suspicions into one new view, install
/// it, cast it and wait for the members to acknowledge it.
pub(super) fn handle_membership_change(gms: &Gms, requests: Vec<Request>) {
    let local = gms.local_addr();
    let Some(current) = gms.view() else {
        warn!(%local, ?requests, "coordinator without a view, dropping requests");
        return;
    };
    let digest = gms.digest();

    let mut joiners: IndexSet<Address> = IndexSet::new();
    let mut leavers: IndexSet<Address> = IndexSet::new();
    let mut suspected: IndexSet<Address> = IndexSet::new();
    let mut self_leaving = false;
    for request in &requests {
        let member = request.member();
        match request.kind() {
            RequestKind::Join => {
                joiners.insert(member);
            }
            RequestKind::Leave | RequestKind::CoordLeave => {
                self_leaving |= member == local;
                leavers.insert(member);
            }
            RequestKind::Suspect if member != local => {
                suspected.insert(member);
            }
            RequestKind::Suspect | RequestKind::Merge => {}
        }
    }

    // a joiner that is already a member missed its JOIN response
    joiners.retain(|joiner| {
        if current.contains(joiner) {
            let rsp = JoinRsp::accepted((*current).clone(), digest.for_members(current.members()));
            gms.send(*joiner, GmsHeader::JoinRsp(rsp));
            false
        } else {
            true
        }
    });
    leavers.retain(|member| current.contains(member));
    suspected.retain(|member| current.contains(member));
    if joiners.is_empty() && leavers.is_empty() && suspected.is_empty() {
        trace!(%local, ?requests, "membership unchanged");
        return;
    }

    let joiner_list: Vec<Address> = joiners.iter().copied().collect();
    let new_members = compute_new_membership(current.members(), &joiner_list, &leavers, &suspected);
    let Some(view_id) = current.view_id().next(local) else {
        warn!(%local, view_id = %current.view_id(), ?requests, "view ids exhausted, refusing view change");
        return;
    };
    let new_view = View::new(view_id, new_members);
    let new_digest = digest.for_members(new_view.members());
    info!(%local, view = %new_view, ?requests, "installing new view");

    let ack_members: Vec<Address> = new_view
        .members()
        .iter()
        .copied()
        .filter(|member| *member != local)
        .collect();
    gms.ack_collector().reset(new_view.view_id(), &ack_members);

    for joiner in joiner_list.iter().filter(|joiner| new_view.contains(joiner)) {
        let rsp = JoinRsp::accepted(new_view.clone(), new_digest.clone());
        gms.send(*joiner, GmsHeader::JoinRsp(rsp));
    }

    if !self_leaving {
        gms.install_view(new_view.clone(), new_digest.clone());
    }
    let recipients: Vec<Address> = current
        .members()
        .iter()
        .copied()
        .filter(|member| *member != local && !suspected.contains(member))
        .collect();
    gms.transport().broadcast(
        local,
        &recipients,
        &GmsHeader::View {
            view: new_view.clone(),
            digest: new_digest,
        },
    );

    let missing = gms
        .ack_collector()
        .wait_for_all_acks(gms.config().view_ack_collection_timeout());
    if !missing.is_empty() {
        warn!(%local, view_id = %new_view.view_id(), ?missing, "failed to collect all view acks");
    }

    for leaver in leavers.iter().filter(|leaver| **leaver != local) {
        gms.send(*leaver, GmsHeader::LeaveRsp);
    }
    if self_leaving {
        debug!(%local, view = %new_view, "left as part of the view change");
        gms.leave_promise().set_result(local);
        gms.init_state();
    }
}
