//! Merge delegation seam
//!
//! Reconciling divergent views after a partition heals is the job of a merge
//! coordinator. The server roles hand the six merge events to it unchanged.

use tracing::debug;

use crate::gms::request::MergeViews;
use crate::types::{Address, Digest, MergeData, MergeId};

/// Receiver of the merge events delegated by the Participant and Coordinator roles
pub trait Merger: Send + Sync {
    /// Start a merge over the given subgroup views
    fn merge(&self, views: &MergeViews);

    fn handle_merge_request(&self, sender: Address, merge_id: MergeId, members: &[Address]);

    fn handle_merge_response(&self, data: MergeData, merge_id: MergeId);

    fn handle_merge_cancelled(&self, merge_id: MergeId);

    fn handle_merge_view(&self, data: MergeData, merge_id: MergeId);

    fn handle_digest_response(&self, sender: Address, digest: Digest);
}

/// Merger that ignores every event; used when no merge protocol is configured
#[derive(Default)]
pub struct NoMerge;

impl Merger for NoMerge {
    fn merge(&self, views: &MergeViews) {
        debug!(subgroups = views.len(), "no merge protocol configured, ignoring merge");
    }

    fn handle_merge_request(&self, sender: Address, merge_id: MergeId, _members: &[Address]) {
        debug!(%sender, %merge_id, "ignoring merge request");
    }

    fn handle_merge_response(&self, data: MergeData, merge_id: MergeId) {
        debug!(sender = %data.sender, %merge_id, "ignoring merge response");
    }

    fn handle_merge_cancelled(&self, merge_id: MergeId) {
        debug!(%merge_id, "ignoring merge cancellation");
    }

    fn handle_merge_view(&self, data: MergeData, merge_id: MergeId) {
        debug!(sender = %data.sender, %merge_id, "ignoring merge view");
    }

    fn handle_digest_response(&self, sender: Address, _digest: Digest) {
        debug!(%sender, "ignoring digest response");
    }
}
