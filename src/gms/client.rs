//! Client role: not (or no longer) a member

use std::time::Instant;

use tracing::{debug, info, warn};

use super::Gms;
use crate::error::{GmsError, GmsResult};
use crate::transport::GmsHeader;
use crate::types::{Address, Digest, JoinRsp, View};

/// Join through `contact`. Without a contact (or when the contact is this
/// node) a new singleton group is formed with this node as coordinator.
pub(super) fn join(gms: &Gms, contact: Option<Address>) -> GmsResult<()> {
    let local = gms.local_addr();
    let contact = match contact {
        Some(contact) if contact != local => contact,
        _ => {
            let view = View::singleton(local);
            let digest = Digest::with_members(view.members());
            info!(%local, view = %view, "forming a new group");
            gms.install_view(view, digest);
            gms.become_coordinator();
            return Ok(());
        }
    };

    let attempts = gms.config().max_join_attempts.max(1);
    let start = Instant::now();
    for attempt in 1..=attempts {
        gms.join_promise().reset(Some(contact));
        debug!(%local, %contact, attempt, "sending JOIN request");
        gms.send(contact, GmsHeader::JoinReq { member: local });

        let Some(rsp) = gms.join_promise().get_result(gms.config().join_timeout()) else {
            debug!(%local, %contact, attempt, "no JOIN response");
            continue;
        };
        if let Some(reason) = rsp.fail_reason {
            warn!(%local, %contact, %reason, "JOIN rejected");
            return Err(GmsError::JoinFailed { member: local, reason });
        }
        let Some(view) = rsp.view else {
            return Err(GmsError::JoinFailed {
                member: local,
                reason: "JOIN response carried no view".to_string(),
            });
        };
        info!(%local, view = %view, "joined");
        // installing acks the view, so views cast after the ack must find a member role
        if view.coordinator() == Some(local) {
            gms.become_coordinator();
        } else {
            gms.become_participant();
        }
        gms.install_view(view, rsp.digest.unwrap_or_default());
        return Ok(());
    }
    Err(GmsError::Timeout {
        elapsed: start.elapsed(),
        what: "join",
    })
}

pub(super) fn handle_join_response(gms: &Gms, rsp: JoinRsp) {
    gms.join_promise().set_result(rsp);
}

/// A client is not a member; leaving is trivially complete
pub(super) fn leave(gms: &Gms) -> bool {
    debug!(local = %gms.local_addr(), "leave called on a client");
    true
}
