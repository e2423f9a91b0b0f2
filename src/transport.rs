//! Membership messages and the transport seam
//!
//! The membership core does not encode bytes itself. It hands `Message`
//! values to a `Transport` and receives them back through `Gms::receive`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GmsResult;
use crate::types::{Address, Digest, JoinRsp, MergeData, MergeId, View, ViewId};

/// Membership protocol header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GmsHeader {
    JoinReq { member: Address },
    JoinRsp(JoinRsp),
    LeaveReq { member: Address },
    LeaveRsp,
    View { view: View, digest: Digest },
    ViewAck { view_id: ViewId },
    MergeReq { merge_id: MergeId, members: Vec<Address> },
    MergeRsp { merge_id: MergeId, data: MergeData },
    InstallMergeView { merge_id: MergeId, data: MergeData },
    CancelMerge { merge_id: MergeId },
    DigestRsp { digest: Digest },
}

impl GmsHeader {
    pub fn name(&self) -> &'static str {
        match self {
            GmsHeader::JoinReq { .. } => "JOIN_REQ",
            GmsHeader::JoinRsp(_) => "JOIN_RSP",
            GmsHeader::LeaveReq { .. } => "LEAVE_REQ",
            GmsHeader::LeaveRsp => "LEAVE_RSP",
            GmsHeader::View { .. } => "VIEW",
            GmsHeader::ViewAck { .. } => "VIEW_ACK",
            GmsHeader::MergeReq { .. } => "MERGE_REQ",
            GmsHeader::MergeRsp { .. } => "MERGE_RSP",
            GmsHeader::InstallMergeView { .. } => "INSTALL_MERGE_VIEW",
            GmsHeader::CancelMerge { .. } => "CANCEL_MERGE",
            GmsHeader::DigestRsp { .. } => "GET_DIGEST_RSP",
        }
    }

    /// Everything except view installation bypasses ordered delivery
    pub fn is_oob(&self) -> bool {
        !matches!(self, GmsHeader::View { .. })
    }
}

/// A membership message addressed to one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub src: Address,
    pub dest: Address,
    /// Expedited delivery, not ordered behind regular traffic
    pub oob: bool,
    pub header: GmsHeader,
}

impl Message {
    /// Create a message; the OOB flag follows the header kind
    pub fn new(src: Address, dest: Address, header: GmsHeader) -> Self {
        Self {
            src,
            dest,
            oob: header.is_oob(),
            header,
        }
    }
}

/// Point-to-point delivery of membership messages
pub trait Transport: Send + Sync {
    fn send(&self, msg: Message) -> GmsResult<()>;

    /// Send `header` to every member in `members`, returning how many sends
    /// the transport accepted. Failures are logged, not propagated.
    fn broadcast(&self, src: Address, members: &[Address], header: &GmsHeader) -> usize {
        let mut sent = 0;
        for member in members {
            match self.send(Message::new(src, *member, header.clone())) {
                Ok(()) => sent += 1,
                Err(e) => debug!(local = %src, dest = %member, error = %e, "broadcast send failed"),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GmsError;
    use parking_lot::Mutex;

    struct Recorder {
        sent: Mutex<Vec<Message>>,
        refuse: Address,
    }

    impl Transport for Recorder {
        fn send(&self, msg: Message) -> GmsResult<()> {
            if msg.dest == self.refuse {
                return Err(GmsError::Transport("unreachable".to_string()));
            }
            self.sent.lock().push(msg);
            Ok(())
        }
    }

    #[test]
    fn test_leave_req_is_oob_and_view_is_not() {
        let a = Address::from_u128(1);
        let leave = Message::new(a, a, GmsHeader::LeaveReq { member: a });
        assert!(leave.oob);
        let view = Message::new(
            a,
            a,
            GmsHeader::View {
                view: View::singleton(a),
                digest: Digest::new(),
            },
        );
        assert!(!view.oob);
    }

    #[test]
    fn test_broadcast_counts_accepted_sends() {
        let (a, b, c) = (Address::from_u128(1), Address::from_u128(2), Address::from_u128(3));
        let transport = Recorder {
            sent: Mutex::new(Vec::new()),
            refuse: c,
        };
        assert_eq!(transport.broadcast(a, &[b, c], &GmsHeader::LeaveRsp), 1);
        let sent = transport.sent.lock();
        assert_eq!(sent[0].dest, b);
        assert_eq!(sent[0].header.name(), "LEAVE_RSP");
    }
}
