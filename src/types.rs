//! Core types for group membership
//!
//! Addresses identify processes, views are the agreed membership snapshots
//! and digests carry the per-member delivery bookkeeping that travels with
//! a view.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a process taking part in a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub Uuid);

impl Address {
    /// Generate a new random address
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an address from a raw value, mostly useful for deterministic tests
    pub fn from_u128(raw: u128) -> Self {
        Self(Uuid::from_u128(raw))
    }

    /// Get the raw value
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a view: the creating coordinator plus a sequence number
///
/// Views are ordered by sequence number; the creator only breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId {
    creator: Address,
    id: u64,
}

impl ViewId {
    pub fn new(creator: Address, id: u64) -> Self {
        Self { creator, id }
    }

    pub fn creator(&self) -> Address {
        self.creator
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Compare sequence numbers only, ignoring the creator
    pub fn compare_ids(&self, other: &ViewId) -> Ordering {
        self.id.cmp(&other.id)
    }

    /// The id a coordinator assigns to the view succeeding this one, or
    /// `None` once the sequence number is exhausted
    pub fn next(&self, creator: Address) -> Option<ViewId> {
        self.id.checked_add(1).map(|id| ViewId::new(creator, id))
    }
}

impl Ord for ViewId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_ids(other)
            .then_with(|| self.creator.cmp(&other.creator))
    }
}

impl PartialOrd for ViewId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}|{}]", self.creator, self.id)
    }
}

/// An agreed, ordered membership snapshot
///
/// The first member is the coordinator. Views are never mutated after
/// construction; a membership change always produces a new `View`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    view_id: ViewId,
    members: Vec<Address>,
}

impl View {
    /// Create a view, dropping duplicate members while keeping first occurrences
    pub fn new(view_id: ViewId, members: impl IntoIterator<Item = Address>) -> Self {
        let mut unique: Vec<Address> = Vec::new();
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        Self {
            view_id,
            members: unique,
        }
    }

    /// A view containing only `member`, created by `member`
    pub fn singleton(member: Address) -> Self {
        Self::new(ViewId::new(member, 0), [member])
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn coordinator(&self) -> Option<Address> {
        self.members.first().copied()
    }

    pub fn contains(&self, member: &Address) -> bool {
        self.members.contains(member)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.view_id)?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", member)?;
        }
        write!(f, ")")
    }
}

/// Delivery sequence range recorded for one member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqnoRange {
    pub highest_delivered: u64,
    pub highest_received: u64,
}

impl SeqnoRange {
    pub fn new(highest_delivered: u64, highest_received: u64) -> Self {
        Self {
            highest_delivered,
            highest_received: highest_received.max(highest_delivered),
        }
    }
}

/// Per-member message sequence bookkeeping carried alongside a view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    entries: BTreeMap<Address, SeqnoRange>,
}

impl Digest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest with a zeroed range for each member
    pub fn with_members<'a>(members: impl IntoIterator<Item = &'a Address>) -> Self {
        Self {
            entries: members
                .into_iter()
                .map(|member| (*member, SeqnoRange::default()))
                .collect(),
        }
    }

    pub fn set(&mut self, member: Address, range: SeqnoRange) {
        self.entries.insert(member, range);
    }

    pub fn get(&self, member: &Address) -> Option<SeqnoRange> {
        self.entries.get(member).copied()
    }

    pub fn contains(&self, member: &Address) -> bool {
        self.entries.contains_key(member)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &SeqnoRange)> {
        self.entries.iter()
    }

    /// Digest to ship with a view over `members`: known ranges are kept,
    /// members without a range start at zero, everyone else is dropped
    pub fn for_members(&self, members: &[Address]) -> Digest {
        Digest {
            entries: members
                .iter()
                .map(|member| (*member, self.get(member).unwrap_or_default()))
                .collect(),
        }
    }
}

/// Response to a JOIN request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRsp {
    pub view: Option<View>,
    pub digest: Option<Digest>,
    pub fail_reason: Option<String>,
}

impl JoinRsp {
    pub fn accepted(view: View, digest: Digest) -> Self {
        Self {
            view: Some(view),
            digest: Some(digest),
            fail_reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            view: None,
            digest: None,
            fail_reason: Some(reason.into()),
        }
    }
}

/// Identifier of one merge attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeId(pub Uuid);

impl MergeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MergeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MergeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// View and digest contributed by one subgroup during a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeData {
    pub sender: Address,
    pub view: Option<View>,
    pub digest: Option<Digest>,
    pub merge_rejected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u128) -> Address {
        Address::from_u128(n)
    }

    #[test]
    fn test_view_id_orders_by_sequence_first() {
        let low = ViewId::new(addr(9), 1);
        let high = ViewId::new(addr(1), 2);
        assert!(low < high);
        assert_eq!(low.compare_ids(&high), Ordering::Less);

        // same sequence: creator breaks the tie but compare_ids reports equal
        let a = ViewId::new(addr(1), 5);
        let b = ViewId::new(addr(2), 5);
        assert!(a < b);
        assert_eq!(a.compare_ids(&b), Ordering::Equal);
    }

    #[test]
    fn test_view_drops_duplicates() {
        let view = View::new(ViewId::new(addr(1), 3), [addr(1), addr(2), addr(1), addr(3)]);
        assert_eq!(view.members(), &[addr(1), addr(2), addr(3)]);
        assert_eq!(view.coordinator(), Some(addr(1)));
        assert!(view.contains(&addr(3)));
        assert!(!view.contains(&addr(4)));
    }

    #[test]
    fn test_singleton_view() {
        let view = View::singleton(addr(7));
        assert_eq!(view.size(), 1);
        assert_eq!(view.view_id(), ViewId::new(addr(7), 0));
        assert_eq!(view.view_id().next(addr(7)).map(|id| id.id()), Some(1));
    }

    #[test]
    fn test_next_view_id_is_exhausted_at_max() {
        let last = ViewId::new(addr(1), u64::MAX);
        assert_eq!(last.next(addr(2)), None);
        assert_eq!(
            ViewId::new(addr(1), u64::MAX - 1).next(addr(2)),
            Some(ViewId::new(addr(2), u64::MAX))
        );
    }

    #[test]
    fn test_digest_for_members() {
        let mut digest = Digest::new();
        digest.set(addr(1), SeqnoRange::new(10, 12));
        digest.set(addr(2), SeqnoRange::new(4, 4));

        let next = digest.for_members(&[addr(1), addr(3)]);
        assert_eq!(next.len(), 2);
        assert_eq!(next.get(&addr(1)), Some(SeqnoRange::new(10, 12)));
        assert_eq!(next.get(&addr(3)), Some(SeqnoRange::default()));
        assert!(!next.contains(&addr(2)));
    }

    #[test]
    fn test_view_display() {
        let view = View::new(ViewId::new(addr(0xa), 2), [addr(0xa), addr(0xb)]);
        assert_eq!(
            view.to_string(),
            "[00000000-0000-0000-0000-00000000000a|2] \
             (00000000-0000-0000-0000-00000000000a, 00000000-0000-0000-0000-00000000000b)"
        );
    }

    #[test]
    fn test_addresses_sharing_low_bits_display_differently() {
        let a = addr(0x1_0000_0000_0000_0001);
        let b = addr(0x2_0000_0000_0000_0001);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), a.0.hyphenated().to_string());
    }
}
