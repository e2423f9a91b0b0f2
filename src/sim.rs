//! In-memory cluster simulation
//!
//! `LocalNetwork` routes membership messages between nodes living in one
//! process. Each node gets two inboxes: regular messages are delivered by a
//! single thread in send order, OOB messages by a small pool of threads so
//! that a node blocked inside a view installation can still receive the
//! acknowledgements and LEAVE responses it is waiting for.
//!
//! `LocalCluster` drives a set of such nodes through joins, graceful leaves
//! and crashes, and plays the failure detector by suspecting members that
//! disappeared from the network.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::GmsConfig;
use crate::error::{GmsError, GmsResult};
use crate::gms::{Gms, RoleKind};
use crate::merge::NoMerge;
use crate::transport::{Message, Transport};
use crate::types::{Address, View};

/// Number of OOB delivery threads per node
pub const OOB_THREADS: usize = 4;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Predicate selecting messages the network silently drops
pub type DropFilter = dyn Fn(&Message) -> bool + Send + Sync;

struct Inbox {
    regular: Sender<Message>,
    oob: Sender<Message>,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    undeliverable: AtomicU64,
}

/// Snapshot of network counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub dropped: u64,
    pub undeliverable: u64,
}

/// Message router between the nodes of one process
#[derive(Default)]
pub struct LocalNetwork {
    mailboxes: DashMap<Address, Inbox>,
    filter: RwLock<Option<Arc<DropFilter>>>,
    counters: Counters,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node, returning its (regular, OOB) inboxes
    pub fn register(&self, addr: Address) -> (Receiver<Message>, Receiver<Message>) {
        let (regular, regular_rx) = unbounded();
        let (oob, oob_rx) = unbounded();
        self.mailboxes.insert(addr, Inbox { regular, oob });
        (regular_rx, oob_rx)
    }

    /// Detach a node. Its inboxes disconnect once drained, which ends its
    /// delivery threads. Messages sent to it afterwards are undeliverable.
    pub fn detach(&self, addr: Address) -> bool {
        self.mailboxes.remove(&addr).is_some()
    }

    pub fn is_attached(&self, addr: &Address) -> bool {
        self.mailboxes.contains_key(addr)
    }

    /// Drop every message matching `filter` until cleared
    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        *self.filter.write() = Some(Arc::new(filter));
    }

    pub fn clear_filter(&self) {
        *self.filter.write() = None;
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            undeliverable: self.counters.undeliverable.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, msg: Message) -> GmsResult<()> {
        let filter = self.filter.read().clone();
        if filter.map_or(false, |filter| filter(&msg)) {
            trace!(src = %msg.src, dest = %msg.dest, header = msg.header.name(), "dropped by filter");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let dest = msg.dest;
        let Some(inbox) = self.mailboxes.get(&dest) else {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            return Err(GmsError::Transport(format!("no route to {}", dest)));
        };
        let channel = if msg.oob { &inbox.oob } else { &inbox.regular };
        channel.send(msg).map_err(|_| {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            GmsError::Transport(format!("inbox of {} is closed", dest))
        })?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Transport for LocalNetwork {
    fn send(&self, msg: Message) -> GmsResult<()> {
        self.deliver(msg)
    }
}

struct SimNode {
    gms: Arc<Gms>,
    alive: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SimNode {
    fn stop(self) {
        self.alive.store(false, Ordering::SeqCst);
        for handle in self.threads {
            if handle.join().is_err() {
                warn!(local = %self.gms.local_addr(), "delivery thread panicked");
            }
        }
    }
}

fn spawn_delivery(
    name: String,
    inbox: Receiver<Message>,
    gms: Arc<Gms>,
    alive: Arc<AtomicBool>,
) -> GmsResult<JoinHandle<()>> {
    let handle = thread::Builder::new().name(name).spawn(move || {
        for msg in inbox.iter() {
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            gms.receive(msg);
        }
    })?;
    Ok(handle)
}

/// Final state of one node, as reported by the simulator
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub address: Address,
    pub role: RoleKind,
    pub view: Option<View>,
}

/// A group of simulated nodes on one `LocalNetwork`
pub struct LocalCluster {
    network: Arc<LocalNetwork>,
    config: GmsConfig,
    nodes: IndexMap<Address, SimNode>,
    departed: Vec<(Address, Arc<Gms>)>,
}

impl LocalCluster {
    pub fn new(config: GmsConfig) -> Self {
        Self {
            network: LocalNetwork::new(),
            config,
            nodes: IndexMap::new(),
            departed: Vec::new(),
        }
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    /// Attach a new node in the Client role and start its delivery threads
    pub fn spawn_node(&mut self) -> GmsResult<Address> {
        let addr = Address::random();
        let transport: Arc<dyn Transport> = self.network.clone();
        let gms = Gms::new(addr, self.config.clone(), transport, Arc::new(NoMerge));
        let alive = Arc::new(AtomicBool::new(true));
        let (regular, oob) = self.network.register(addr);

        let mut threads = Vec::with_capacity(OOB_THREADS + 1);
        threads.push(spawn_delivery(
            format!("gms-{}", addr),
            regular,
            Arc::clone(&gms),
            Arc::clone(&alive),
        )?);
        for i in 0..OOB_THREADS {
            threads.push(spawn_delivery(
                format!("gms-{}-oob-{}", addr, i),
                oob.clone(),
                Arc::clone(&gms),
                Arc::clone(&alive),
            )?);
        }
        self.nodes.insert(addr, SimNode { gms, alive, threads });
        debug!(local = %addr, "spawned node");
        Ok(addr)
    }

    /// Spawn `count` nodes and join them one after the other; the first
    /// node founds the group
    pub fn start(&mut self, count: usize) -> GmsResult<Vec<Address>> {
        let mut started = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = self.spawn_node()?;
            let contact = self.coordinator();
            self.join(addr, contact)?;
            started.push(addr);
        }
        info!(nodes = count, "cluster started");
        Ok(started)
    }

    pub fn join(&self, addr: Address, contact: Option<Address>) -> GmsResult<()> {
        let gms = self
            .gms(addr)
            .ok_or_else(|| GmsError::Transport(format!("{} is not attached", addr)))?;
        gms.join(contact)
    }

    pub fn gms(&self, addr: Address) -> Option<Arc<Gms>> {
        self.nodes.get(&addr).map(|node| Arc::clone(&node.gms))
    }

    /// Addresses of the running nodes, in spawn order
    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.keys().copied().collect()
    }

    /// The running node currently acting as coordinator
    pub fn coordinator(&self) -> Option<Address> {
        self.nodes
            .iter()
            .find(|(_, node)| node.gms.is_coordinator())
            .map(|(addr, _)| *addr)
    }

    /// Leave gracefully, then take the node off the network
    pub fn disconnect(&mut self, addr: Address) -> bool {
        let Some(gms) = self.gms(addr) else {
            return false;
        };
        let left = gms.leave();
        debug!(local = %addr, left, "node left");
        self.remove(addr);
        left
    }

    /// Leave with several nodes at once, then take them off the network.
    /// Returns each node's leave outcome.
    pub fn disconnect_concurrently(&mut self, addrs: &[Address]) -> Vec<(Address, bool)> {
        let handles: Vec<(Address, Arc<Gms>)> = addrs
            .iter()
            .filter_map(|addr| self.gms(*addr).map(|gms| (*addr, gms)))
            .collect();
        let outcomes: Vec<(Address, bool)> = thread::scope(|scope| {
            let running: Vec<_> = handles
                .iter()
                .map(|(addr, gms)| (*addr, scope.spawn(move || gms.leave())))
                .collect();
            running
                .into_iter()
                .map(|(addr, handle)| (addr, handle.join().unwrap_or(false)))
                .collect()
        });
        for (addr, left) in &outcomes {
            debug!(local = %addr, left, "node left");
            self.remove(*addr);
        }
        outcomes
    }

    /// Take a node off the network without leaving
    pub fn crash(&mut self, addr: Address) -> bool {
        if !self.nodes.contains_key(&addr) {
            return false;
        }
        info!(local = %addr, "crashing node");
        self.remove(addr);
        true
    }

    fn remove(&mut self, addr: Address) {
        self.network.detach(addr);
        if let Some(node) = self.nodes.shift_remove(&addr) {
            self.departed.push((addr, Arc::clone(&node.gms)));
            node.stop();
        }
    }

    /// State of a node that has left or crashed
    pub fn departed(&self, addr: Address) -> Option<Arc<Gms>> {
        self.departed
            .iter()
            .find(|(departed, _)| *departed == addr)
            .map(|(_, gms)| Arc::clone(gms))
    }

    /// Failure detector sweep: every running member suspects the members of
    /// its view that are no longer on the network. Returns the number of
    /// suspicions raised.
    pub fn suspect_departed(&self) -> usize {
        let mut raised = 0;
        for node in self.nodes.values() {
            let suspects: IndexSet<Address> = node
                .gms
                .members()
                .into_iter()
                .filter(|member| !self.network.is_attached(member))
                .collect();
            for member in suspects {
                trace!(local = %node.gms.local_addr(), %member, "failure detector suspects");
                node.gms.suspect(member);
                raised += 1;
            }
        }
        raised
    }

    /// True when every running member holds the same view and that view
    /// contains exactly the running members
    pub fn has_same_view(&self) -> bool {
        let running: IndexSet<Address> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.gms.role().is_member())
            .map(|(addr, _)| *addr)
            .collect();
        let mut views = running.iter().filter_map(|addr| self.gms(*addr)?.view());
        let Some(first) = views.next() else {
            return running.is_empty();
        };
        if views.any(|view| view.view_id() != first.view_id()) {
            return false;
        }
        first.size() == running.len() && running.iter().all(|addr| first.contains(addr))
    }

    pub fn wait_until_same_view(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_same_view() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Alternate failure detector sweeps with waiting until the running
    /// members agree on a view
    pub fn stabilize(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let round = self.config.view_ack_collection_timeout().max(POLL_INTERVAL * 10);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.wait_until_same_view(round.min(remaining)) {
                return true;
            }
            if remaining.is_zero() {
                warn!("cluster did not converge on a view");
                return false;
            }
            self.suspect_departed();
        }
    }

    /// Report of every running node followed by every departed one
    pub fn report(&self) -> Vec<NodeReport> {
        self.nodes
            .iter()
            .map(|(addr, node)| (*addr, &node.gms))
            .chain(self.departed.iter().map(|(addr, gms)| (*addr, gms)))
            .map(|(address, gms)| NodeReport {
                address,
                role: gms.role(),
                view: gms.view().map(|view| (*view).clone()),
            })
            .collect()
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for addr in self.addresses() {
            self.network.detach(addr);
        }
        for (_, node) in self.nodes.drain(..) {
            node.stop();
        }
    }
}
