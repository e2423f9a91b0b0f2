//! Graceful leave scenarios on an in-process cluster
//!
//! Coordinators, participants and groups of members leave (or crash) and the
//! survivors must end up in one view that contains exactly themselves, with
//! the earliest surviving member as coordinator.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use viewsync::sim::LocalCluster;
use viewsync::{Address, GmsConfig, GmsHeader, Request, RequestKind, RequestProcessor, RoleKind};

const NUM: usize = 6;
const CONVERGE: Duration = Duration::from_secs(15);

fn config() -> GmsConfig {
    GmsConfig {
        join_timeout_ms: 2000,
        leave_timeout_ms: 2000,
        view_ack_collection_timeout_ms: 500,
        max_join_attempts: 3,
        max_batch_size: 0,
    }
}

fn cluster(nodes: usize) -> (LocalCluster, Vec<Address>) {
    let mut cluster = LocalCluster::new(config());
    let members = cluster.start(nodes).unwrap();
    assert!(cluster.wait_until_same_view(CONVERGE), "initial view not agreed");
    (cluster, members)
}

/// Every survivor holds a view of `size` members coordinated by `coord`
fn assert_survivors(cluster: &LocalCluster, survivors: &[Address], coord: Address) {
    for addr in survivors {
        let gms = cluster.gms(*addr).unwrap();
        let view = gms.view().unwrap();
        assert_eq!(view.size(), survivors.len(), "{} has view {}", addr, view);
        assert_eq!(view.coordinator(), Some(coord), "{} has view {}", addr, view);
    }
    assert_eq!(cluster.gms(coord).unwrap().role(), RoleKind::Coordinator);
}

fn assert_departed(cluster: &LocalCluster, addr: Address) {
    let gms = cluster.departed(addr).unwrap();
    assert!(gms.view().is_none(), "{} still holds a view", addr);
    assert_eq!(gms.role(), RoleKind::Client);
    assert!(!gms.is_leaving());
}

#[cfg(test)]
mod graceful_leave_tests {
    use super::*;

    #[test]
    fn test_leave_of_singleton_coord() {
        let (mut cluster, members) = cluster(1);
        let coord = members[0];
        assert_eq!(cluster.gms(coord).unwrap().view().unwrap().size(), 1);

        assert!(cluster.disconnect(coord));
        assert_departed(&cluster, coord);
        assert_eq!(cluster.network().stats().sent, 0);
    }

    #[test]
    fn test_coord_leave() {
        let (mut cluster, members) = cluster(NUM);

        assert!(cluster.disconnect(members[0]));
        assert!(cluster.wait_until_same_view(CONVERGE));
        assert_survivors(&cluster, &members[1..], members[1]);
        assert_departed(&cluster, members[0]);
    }

    #[test]
    fn test_participant_leave() {
        let (mut cluster, members) = cluster(NUM);

        assert!(cluster.disconnect(members[2]));
        assert!(cluster.wait_until_same_view(CONVERGE));
        let survivors: Vec<Address> = cluster.addresses();
        assert_eq!(survivors.len(), NUM - 1);
        assert_survivors(&cluster, &survivors, members[0]);
        assert_departed(&cluster, members[2]);
    }

    #[test]
    fn test_sequential_leaves_of_coordinators() {
        let (mut cluster, members) = cluster(NUM);

        for leaver in &members[..NUM / 2] {
            assert!(cluster.disconnect(*leaver));
            assert_departed(&cluster, *leaver);
        }
        assert!(cluster.wait_until_same_view(CONVERGE));
        assert_survivors(&cluster, &members[NUM / 2..], members[NUM / 2]);
    }

    #[test]
    fn test_leave_without_response_proceeds_after_timeout() {
        let mut cluster = LocalCluster::new(GmsConfig {
            leave_timeout_ms: 200,
            ..config()
        });
        let members = cluster.start(3).unwrap();
        assert!(cluster.wait_until_same_view(CONVERGE));
        cluster
            .network()
            .set_filter(|msg| matches!(msg.header, GmsHeader::LeaveRsp));

        assert!(cluster.disconnect(members[2]));
        assert_departed(&cluster, members[2]);
        assert!(cluster.network().stats().dropped >= 1);
        assert!(cluster.wait_until_same_view(CONVERGE));
        assert_survivors(&cluster, &members[..2], members[0]);
    }

    #[test]
    fn test_rejoin_after_leave() {
        let (mut cluster, members) = cluster(3);
        assert!(cluster.disconnect(members[1]));
        assert!(cluster.wait_until_same_view(CONVERGE));

        let fresh = cluster.spawn_node().unwrap();
        cluster.join(fresh, cluster.coordinator()).unwrap();
        assert!(cluster.wait_until_same_view(CONVERGE));
        let view = cluster.gms(fresh).unwrap().view().unwrap();
        assert_eq!(view.members(), &[members[0], members[2], fresh]);
    }

    #[test]
    fn test_coordinator_sees_leave_request() {
        let (mut cluster, members) = cluster(4);
        let coord = cluster.gms(members[0]).unwrap();
        let seen: Arc<Mutex<Vec<Request>>> = Arc::new(Mutex::new(Vec::new()));

        let handler = coord.view_handler();
        let sink = Arc::clone(&seen);
        let previous = handler.processor();
        handler.set_processor(Arc::new(move |requests: Vec<Request>| {
            sink.lock().extend(requests.iter().cloned());
            previous.process(requests);
        }));

        assert!(cluster.disconnect(members[3]));
        assert!(cluster.wait_until_same_view(CONVERGE));
        let seen = seen.lock();
        assert!(seen
            .iter()
            .any(|req| req.kind() == RequestKind::Leave && req.member() == members[3]));
    }
}

#[cfg(test)]
mod concurrent_leave_tests {
    use super::*;

    fn leave_first(leavers: usize) {
        let (mut cluster, members) = cluster(NUM);

        let outcomes = cluster.disconnect_concurrently(&members[..leavers]);
        assert_eq!(outcomes.len(), leavers);
        assert!(cluster.stabilize(CONVERGE), "survivors did not converge");
        assert_survivors(&cluster, &members[leavers..], members[leavers]);
        for leaver in &members[..leavers] {
            assert!(cluster.gms(*leaver).is_none());
        }
    }

    #[test]
    fn test_concurrent_leaves_2() {
        leave_first(2);
    }

    #[test]
    fn test_concurrent_leaves_4() {
        leave_first(4);
    }

    /// Every node's queue hands its batches to the role sorted by request kind
    fn sort_batches(cluster: &LocalCluster, members: &[Address], descending: bool) {
        for addr in members {
            let gms = cluster.gms(*addr).unwrap();
            let handler = gms.view_handler();
            let previous = handler.processor();
            handler.set_processor(Arc::new(move |mut requests: Vec<Request>| {
                requests.sort_by_key(|req| req.kind());
                if descending {
                    requests.reverse();
                }
                previous.process(requests);
            }));
        }
    }

    fn leave_first_sorted(leavers: usize, descending: bool) {
        let (mut cluster, members) = cluster(NUM);
        sort_batches(&cluster, &members, descending);

        cluster.disconnect_concurrently(&members[..leavers]);
        assert!(cluster.stabilize(CONVERGE), "survivors did not converge");
        assert_survivors(&cluster, &members[leavers..], members[leavers]);
    }

    #[test]
    fn test_leave_of_coord_and_next_sorted_ascending() {
        leave_first_sorted(2, false);
    }

    #[test]
    fn test_leave_of_coord_and_next_sorted_descending() {
        leave_first_sorted(2, true);
    }

    #[test]
    fn test_leave_of_five_sorted_ascending() {
        leave_first_sorted(5, false);
    }

    #[test]
    fn test_leave_of_five_sorted_descending() {
        leave_first_sorted(5, true);
    }

    #[test]
    fn test_concurrent_participant_leaves() {
        let (mut cluster, members) = cluster(NUM);

        cluster.disconnect_concurrently(&members[3..]);
        assert!(cluster.stabilize(CONVERGE));
        assert_survivors(&cluster, &members[..3], members[0]);
    }
}

#[cfg(test)]
mod crash_tests {
    use super::*;

    #[test]
    fn test_coord_crash_is_excluded_by_failure_detector() {
        let (mut cluster, members) = cluster(4);

        assert!(cluster.crash(members[0]));
        assert!(!cluster.has_same_view());
        assert!(cluster.stabilize(CONVERGE));
        assert_survivors(&cluster, &members[1..], members[1]);
    }

    #[test]
    fn test_participant_crash() {
        let (mut cluster, members) = cluster(4);

        assert!(cluster.crash(members[2]));
        assert!(cluster.suspect_departed() > 0);
        assert!(cluster.stabilize(CONVERGE));
        let survivors = [members[0], members[1], members[3]];
        assert_survivors(&cluster, &survivors, members[0]);
    }
}
