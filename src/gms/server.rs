//! Behavior shared by the member roles (Participant and Coordinator)

use std::time::Instant;

use tracing::{debug, trace, warn};

use super::request::MergeViews;
use super::Gms;
use crate::error::{GmsError, GmsResult};
use crate::transport::GmsHeader;
use crate::types::{Address, Digest, MergeData, MergeId};

/// Reject an operation the active role does not support
pub(super) fn wrong_method(gms: &Gms, operation: &'static str) -> GmsResult<()> {
    let role = gms.role();
    warn!(local = %gms.local_addr(), %role, operation, "wrong method called for current role");
    Err(GmsError::WrongRole { operation, role })
}

pub(super) fn merge(gms: &Gms, views: &MergeViews) {
    gms.merger().merge(views);
}

pub(super) fn handle_merge_request(gms: &Gms, sender: Address, merge_id: MergeId, members: &[Address]) {
    gms.merger().handle_merge_request(sender, merge_id, members);
}

pub(super) fn handle_merge_response(gms: &Gms, data: MergeData, merge_id: MergeId) {
    gms.merger().handle_merge_response(data, merge_id);
}

pub(super) fn handle_merge_cancelled(gms: &Gms, merge_id: MergeId) {
    gms.merger().handle_merge_cancelled(merge_id);
}

pub(super) fn handle_merge_view(gms: &Gms, data: MergeData, merge_id: MergeId) {
    gms.merger().handle_merge_view(data, merge_id);
}

pub(super) fn handle_digest_response(gms: &Gms, sender: Address, digest: Digest) {
    gms.merger().handle_digest_response(sender, digest);
}

/// Send a LEAVE request to `coord` and block until it responds or the leave
/// timeout elapses.
///
/// Success means the promise still expects `coord` when the wait ends. A
/// timeout still counts as success: the leave proceeds locally rather than
/// block on an unresponsive coordinator. A concurrent reset towards another
/// target (or none) makes the attempt fail even if a response arrived.
pub(super) fn send_leave_req_to_coord(gms: &Gms, coord: Option<Address>) -> bool {
    let local = gms.local_addr();
    let Some(coord) = coord else {
        warn!(%local, "cannot send LEAVE request, no coordinator known");
        return false;
    };

    gms.leave_promise().reset(Some(coord));
    gms.set_leaving(true);
    trace!(%local, %coord, "sending LEAVE request");
    let start = Instant::now();
    send_leave_message(gms, coord, local);
    let sender = gms.leave_promise().get_result(gms.config().leave_timeout());
    let elapsed = start.elapsed();

    if gms.leave_promise().expected_result() != Some(coord) {
        debug!(%local, %coord, "LEAVE wait superseded by a different target");
        return false;
    }
    match sender {
        Some(sender) => debug!(%local, %coord, %sender, ?elapsed, "got LEAVE response"),
        None => debug!(%local, %coord, ?elapsed, "timed out waiting for LEAVE response"),
    }
    true
}

fn send_leave_message(gms: &Gms, coord: Address, member: Address) {
    gms.send(coord, GmsHeader::LeaveReq { member });
}
