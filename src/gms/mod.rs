//! Group membership service
//!
//! `Gms` is one node's membership instance. It owns the installed view and
//! digest, the active role, the leave promise and the view change queue, and
//! routes every incoming event to the role that is active at that moment.
//!
//! Lock order is role, then membership state. The view change queue never
//! holds its own lock while a batch is being processed.

pub mod ack_collector;
pub mod membership;
pub mod promise;
pub mod request;
pub mod role;
pub mod view_handler;

mod client;
mod coordinator;
mod participant;
mod server;

pub use ack_collector::AckCollector;
pub use membership::{compute_new_membership, would_i_be_coordinator};
pub use promise::{LeavePromise, Promise};
pub use request::{MergeViews, Request, RequestKind};
pub use role::RoleKind;
pub use view_handler::{RequestProcessor, ViewHandler};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};

use crate::config::GmsConfig;
use crate::error::GmsResult;
use crate::merge::Merger;
use crate::transport::{GmsHeader, Message, Transport};
use crate::types::{Address, Digest, JoinRsp, View, ViewId};
use role::Role;

#[derive(Debug, Default)]
struct MembershipState {
    view: Option<Arc<View>>,
    digest: Digest,
}

/// Membership service instance of one node
pub struct Gms {
    local_addr: Address,
    config: GmsConfig,
    transport: Arc<dyn Transport>,
    merger: Arc<dyn Merger>,
    state: RwLock<MembershipState>,
    role: Mutex<Role>,
    leaving: AtomicBool,
    leave_promise: LeavePromise,
    join_promise: Promise<JoinRsp>,
    ack_collector: AckCollector,
    view_handler: ViewHandler,
}

impl Gms {
    /// Create a membership instance in the Client role. Batches from the view
    /// change queue are handed to whichever role is active when they are
    /// dispatched.
    pub fn new(
        local_addr: Address,
        config: GmsConfig,
        transport: Arc<dyn Transport>,
        merger: Arc<dyn Merger>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Gms>| {
            let weak = weak.clone();
            let processor: Arc<dyn RequestProcessor> = Arc::new(move |requests: Vec<Request>| {
                if let Some(gms) = weak.upgrade() {
                    gms.handle_membership_change(requests);
                }
            });
            let max_batch_size = config.max_batch_size;
            Gms {
                local_addr,
                config,
                transport,
                merger,
                state: RwLock::new(MembershipState::default()),
                role: Mutex::new(Role::Client),
                leaving: AtomicBool::new(false),
                leave_promise: LeavePromise::new(),
                join_promise: Promise::new(),
                ack_collector: AckCollector::new(),
                view_handler: ViewHandler::new(local_addr, processor, max_batch_size),
            }
        })
    }

    pub fn local_addr(&self) -> Address {
        self.local_addr
    }

    pub fn config(&self) -> &GmsConfig {
        &self.config
    }

    /// The installed view, if any. Readers always see a complete view.
    pub fn view(&self) -> Option<Arc<View>> {
        self.state.read().view.clone()
    }

    pub fn view_id(&self) -> Option<ViewId> {
        self.state.read().view.as_ref().map(|view| view.view_id())
    }

    pub fn members(&self) -> Vec<Address> {
        self.state
            .read()
            .view
            .as_ref()
            .map(|view| view.members().to_vec())
            .unwrap_or_default()
    }

    pub fn digest(&self) -> Digest {
        self.state.read().digest.clone()
    }

    pub fn role(&self) -> RoleKind {
        self.role.lock().kind()
    }

    pub fn is_coordinator(&self) -> bool {
        self.role() == RoleKind::Coordinator
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving.load(AtomicOrdering::SeqCst)
    }

    pub(crate) fn set_leaving(&self, leaving: bool) {
        self.leaving.store(leaving, AtomicOrdering::SeqCst);
    }

    /// Members currently suspected but not yet excluded; empty unless Participant
    pub fn suspected_members(&self) -> Vec<Address> {
        match &*self.role.lock() {
            Role::Participant(state) => state.suspected.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn leave_promise(&self) -> &LeavePromise {
        &self.leave_promise
    }

    pub(crate) fn join_promise(&self) -> &Promise<JoinRsp> {
        &self.join_promise
    }

    pub fn ack_collector(&self) -> &AckCollector {
        &self.ack_collector
    }

    pub fn view_handler(&self) -> &ViewHandler {
        &self.view_handler
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn merger(&self) -> &dyn Merger {
        self.merger.as_ref()
    }

    pub(crate) fn lock_role(&self) -> MutexGuard<'_, Role> {
        self.role.lock()
    }

    /// The coordinator of the installed view
    pub fn determine_coordinator(&self) -> Option<Address> {
        self.state.read().view.as_ref().and_then(|view| view.coordinator())
    }

    /// The first member of the installed view other than this node
    pub fn determine_next_coordinator(&self) -> Option<Address> {
        let state = self.state.read();
        let view = state.view.as_ref()?;
        view.members().iter().copied().find(|member| *member != self.local_addr)
    }

    /// Join the group through `contact`, or form a new group when there is none
    pub fn join(&self, contact: Option<Address>) -> GmsResult<()> {
        match self.role() {
            RoleKind::Client => client::join(self, contact),
            RoleKind::Participant | RoleKind::Coordinator => server::wrong_method(self, "join"),
        }
    }

    pub fn join_with_state_transfer(&self, contact: Option<Address>) -> GmsResult<()> {
        match self.role() {
            RoleKind::Client => client::join(self, contact),
            RoleKind::Participant | RoleKind::Coordinator => {
                server::wrong_method(self, "join_with_state_transfer")
            }
        }
    }

    /// Leave the group. Blocks for at most the leave timeout while the
    /// coordinator acknowledges. Returns false when no coordinator could be
    /// resolved or the wait was superseded by a different target.
    pub fn leave(&self) -> bool {
        let local = self.local_addr;
        match self.role() {
            RoleKind::Client => client::leave(self),
            RoleKind::Participant => participant::leave(self, local),
            RoleKind::Coordinator => coordinator::leave(self, local),
        }
    }

    /// Failure detector up-call: `member` is believed to have failed
    pub fn suspect(&self, member: Address) {
        if member == self.local_addr {
            warn!(local = %self.local_addr, "ignoring suspicion of self");
            return;
        }
        self.ack_collector.suspect(member);
        match self.role() {
            RoleKind::Client => trace!(local = %self.local_addr, %member, "client ignores suspicion"),
            RoleKind::Participant => participant::suspect(self, member),
            RoleKind::Coordinator => coordinator::suspect(self, member),
        }
    }

    /// Failure detector up-call: `member` is no longer suspected
    pub fn unsuspect(&self, member: Address) {
        if self.role() == RoleKind::Participant {
            participant::unsuspect(self, member);
        }
    }

    /// Merge detection up-call: the given subgroup views have been discovered
    pub fn merge(&self, views: MergeViews) {
        if !self.role().is_member() {
            trace!(local = %self.local_addr, "client ignores merge");
            return;
        }
        self.view_handler.add(Request::merge(self.local_addr, views));
    }

    /// Processor entry point for a batch dispatched by the view change queue
    pub fn handle_membership_change(&self, requests: Vec<Request>) {
        if requests.is_empty() {
            return;
        }
        let role = self.role();
        if let [request] = requests.as_slice() {
            if let Some(views) = request.views() {
                if role.is_member() {
                    server::merge(self, views);
                }
                return;
            }
        }
        match role {
            RoleKind::Client => {
                trace!(local = %self.local_addr, ?requests, "client ignores membership change")
            }
            RoleKind::Participant => participant::handle_membership_change(self, requests),
            RoleKind::Coordinator => coordinator::handle_membership_change(self, requests),
        }
    }

    /// A (view, digest) pair received from a coordinator
    pub fn handle_view_change(&self, view: View, digest: Digest) {
        match self.role() {
            RoleKind::Client => {
                trace!(local = %self.local_addr, view = %view, "client ignores view")
            }
            RoleKind::Participant => participant::handle_view_change(self, view, digest),
            RoleKind::Coordinator => coordinator::handle_view_change(self, view, digest),
        }
    }

    pub fn handle_join_response(&self, rsp: JoinRsp) {
        match self.role() {
            RoleKind::Client => client::handle_join_response(self, rsp),
            RoleKind::Participant => participant::handle_join_response(self, rsp),
            RoleKind::Coordinator => {
                debug!(local = %self.local_addr, "coordinator ignores JOIN response")
            }
        }
    }

    /// Transport up-call
    pub fn receive(&self, msg: Message) {
        let Message { src, header, .. } = msg;
        trace!(local = %self.local_addr, %src, header = header.name(), "received");
        match header {
            GmsHeader::JoinReq { member } => self.view_handler.add(Request::join(member)),
            GmsHeader::JoinRsp(rsp) => self.handle_join_response(rsp),
            GmsHeader::LeaveReq { member } => self.view_handler.add(Request::leave(member)),
            GmsHeader::LeaveRsp => self.leave_promise.set_result(src),
            GmsHeader::View { view, digest } => self.handle_view_change(view, digest),
            GmsHeader::ViewAck { view_id } => {
                self.ack_collector.ack(view_id, src);
            }
            header => {
                if !self.role().is_member() {
                    trace!(local = %self.local_addr, header = header.name(), "client ignores merge traffic");
                    return;
                }
                match header {
                    GmsHeader::MergeReq { merge_id, members } => {
                        server::handle_merge_request(self, src, merge_id, &members)
                    }
                    GmsHeader::MergeRsp { merge_id, data } => {
                        server::handle_merge_response(self, data, merge_id)
                    }
                    GmsHeader::InstallMergeView { merge_id, data } => {
                        server::handle_merge_view(self, data, merge_id)
                    }
                    GmsHeader::CancelMerge { merge_id } => server::handle_merge_cancelled(self, merge_id),
                    GmsHeader::DigestRsp { digest } => server::handle_digest_response(self, src, digest),
                    _ => {}
                }
            }
        }
    }

    /// Replace the installed view and digest if `view` is newer than the
    /// current one. Stale views are discarded silently. Returns whether the
    /// view was installed.
    ///
    /// Two coordinators racing from the same view produce ids with the same
    /// sequence number; the creator breaks that tie so every member settles
    /// on the same one of them.
    pub fn install_view(&self, view: View, digest: Digest) -> bool {
        let view = Arc::new(view);
        {
            let mut state = self.state.write();
            if let Some(current) = &state.view {
                if view.view_id() <= current.view_id() {
                    trace!(
                        local = %self.local_addr,
                        current = %current.view_id(),
                        received = %view.view_id(),
                        "discarding stale view"
                    );
                    return false;
                }
            }
            state.view = Some(Arc::clone(&view));
            state.digest = digest;
        }
        debug!(local = %self.local_addr, view = %view, "installed view");

        let view_id = view.view_id();
        if view_id.creator() != self.local_addr {
            self.send(view_id.creator(), GmsHeader::ViewAck { view_id });
        }
        if !view.contains(&self.local_addr) {
            debug!(local = %self.local_addr, "installed a view that does not contain this member");
        } else if view.coordinator() == Some(self.local_addr) {
            let mut role = self.role.lock();
            if matches!(*role, Role::Participant(_)) {
                let leaving = self.is_leaving();
                self.transition(&mut role, Role::Coordinator);
                drop(role);
                // a leave in progress is completed by the view change we now drive
                if leaving {
                    self.view_handler.add(Request::coord_leave(self.local_addr));
                }
            }
        }
        true
    }

    /// Forget view, digest and leave state and return to the Client role
    pub fn init_state(&self) {
        {
            let mut state = self.state.write();
            state.view = None;
            state.digest = Digest::new();
        }
        self.set_leaving(false);
        self.ack_collector.clear();
        self.view_handler.suspend();
        self.become_client();
    }

    pub(crate) fn become_client(&self) {
        let mut role = self.role.lock();
        self.transition(&mut role, Role::Client);
    }

    pub(crate) fn become_participant(&self) {
        let mut role = self.role.lock();
        self.transition(&mut role, Role::participant());
    }

    pub(crate) fn become_coordinator(&self) {
        let mut role = self.role.lock();
        self.transition(&mut role, Role::Coordinator);
    }

    /// Swap the role variant under the role lock. Entering a member role
    /// resets the leave promise and reopens the view change queue.
    pub(crate) fn transition(&self, role: &mut Role, next: Role) {
        let from = role.kind();
        let to = next.kind();
        *role = next;
        if to.is_member() {
            self.leave_promise.reset(None);
            self.view_handler.resume();
        }
        debug!(local = %self.local_addr, %from, %to, "role transition");
    }

    /// Send `header` to `dest`; failures are logged and reported as false
    pub(crate) fn send(&self, dest: Address, header: GmsHeader) -> bool {
        let name = header.name();
        match self.transport.send(Message::new(self.local_addr, dest, header)) {
            Ok(()) => true,
            Err(e) => {
                debug!(local = %self.local_addr, %dest, header = name, error = %e, "send failed");
                false
            }
        }
    }
}

impl fmt::Debug for Gms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gms")
            .field("local_addr", &self.local_addr)
            .field("role", &self.role())
            .field("view", &self.view())
            .field("leaving", &self.is_leaving())
            .finish()
    }
}
