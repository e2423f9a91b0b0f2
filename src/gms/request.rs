//! Membership change requests

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::{Address, View};

/// Kind of membership change a request asks for
///
/// The declaration order is the order processors use when they sort a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKind {
    Join,
    Leave,
    Suspect,
    Merge,
    CoordLeave,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Join => "JOIN",
            RequestKind::Leave => "LEAVE",
            RequestKind::Suspect => "SUSPECT",
            RequestKind::Merge => "MERGE",
            RequestKind::CoordLeave => "COORD_LEAVE",
        };
        f.write_str(name)
    }
}

/// Views of the subgroups taking part in a merge, keyed by subgroup coordinator
pub type MergeViews = BTreeMap<Address, View>;

/// One membership change intent
///
/// Two requests are equal when kind and member match; the merge payload does
/// not take part in equality, so duplicates collapse inside a batch.
#[derive(Debug, Clone)]
pub struct Request {
    kind: RequestKind,
    member: Address,
    views: Option<Arc<MergeViews>>,
}

impl Request {
    pub fn new(kind: RequestKind, member: Address) -> Self {
        Self {
            kind,
            member,
            views: None,
        }
    }

    pub fn join(member: Address) -> Self {
        Self::new(RequestKind::Join, member)
    }

    pub fn leave(member: Address) -> Self {
        Self::new(RequestKind::Leave, member)
    }

    pub fn suspect(member: Address) -> Self {
        Self::new(RequestKind::Suspect, member)
    }

    pub fn coord_leave(member: Address) -> Self {
        Self::new(RequestKind::CoordLeave, member)
    }

    /// A merge request raised by `member` over the given subgroup views
    pub fn merge(member: Address, views: MergeViews) -> Self {
        Self {
            kind: RequestKind::Merge,
            member,
            views: Some(Arc::new(views)),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn member(&self) -> Address {
        self.member
    }

    pub fn views(&self) -> Option<&MergeViews> {
        self.views.as_deref()
    }

    /// Whether this request may share a batch with `other`.
    /// Merges are always processed on their own.
    pub fn can_be_processed_together(&self, other: &Request) -> bool {
        self.kind != RequestKind::Merge && other.kind != RequestKind::Merge
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.member == other.member
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.member.hash(state);
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.views {
            Some(views) => write!(f, "{} {} ({} views)", self.kind, self.member, views.len()),
            None => write!(f, "{} {}", self.kind, self.member),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;

    #[test]
    fn test_equality_ignores_merge_payload() {
        let a = Address::from_u128(1);
        let mut views = MergeViews::new();
        views.insert(a, View::singleton(a));
        assert_eq!(Request::merge(a, views), Request::merge(a, MergeViews::new()));
        assert_ne!(Request::leave(a), Request::suspect(a));
    }

    #[test]
    fn test_duplicates_collapse_in_set() {
        let a = Address::from_u128(1);
        let b = Address::from_u128(2);
        let set: IndexSet<Request> = [
            Request::suspect(a),
            Request::leave(b),
            Request::suspect(a),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0], Request::suspect(a));
    }

    #[test]
    fn test_merge_is_never_batched() {
        let a = Address::from_u128(1);
        let merge = Request::merge(a, MergeViews::new());
        assert!(!merge.can_be_processed_together(&Request::leave(a)));
        assert!(Request::join(a).can_be_processed_together(&Request::suspect(a)));
    }

    #[test]
    fn test_kind_order() {
        assert!(RequestKind::Join < RequestKind::Leave);
        assert!(RequestKind::Merge < RequestKind::CoordLeave);
        assert_eq!(RequestKind::CoordLeave.to_string(), "COORD_LEAVE");
    }
}
