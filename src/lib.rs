//! # viewsync: group membership with graceful leave
//!
//! A node's membership service moves between three roles. A Client is not a
//! member. A Participant is a member that is not the coordinator. The
//! Coordinator is the member listed first in the installed view; it turns
//! joins, leaves and suspicions into new views. Membership changes on a
//! node are serialized through a view change queue. A leave is a blocking
//! request/response with the coordinator, bounded by a timeout.
//!
//! The core talks to the outside world through two seams: a [`Transport`]
//! that moves [`Message`]s and a [`Merger`] that handles partition merges.
//! [`sim`] wires nodes together in one process.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod gms;
pub mod merge;
pub mod sim;
pub mod transport;
pub mod types;

pub use config::GmsConfig;
pub use error::{GmsError, GmsResult};
pub use gms::{
    compute_new_membership, would_i_be_coordinator, AckCollector, Gms, LeavePromise, MergeViews,
    Promise, Request, RequestKind, RequestProcessor, RoleKind, ViewHandler,
};
pub use merge::{Merger, NoMerge};
pub use sim::{LocalCluster, LocalNetwork, NodeReport};
pub use transport::{GmsHeader, Message, Transport};
pub use types::{Address, Digest, JoinRsp, MergeData, MergeId, SeqnoRange, View, ViewId};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
