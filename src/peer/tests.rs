//! Tests for the peer manager and cleaner protocol

use super::*;
use crate::config::ReclaimConfig;
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Cleaner that records every handle it was asked to release
#[derive(Default)]
struct RecordingCleaner {
    released: Mutex<Vec<Handle>>,
}

impl RecordingCleaner {
    fn count(&self, handle: Handle) -> usize {
        self.released.lock().iter().filter(|h| **h == handle).count()
    }

    fn total(&self) -> usize {
        self.released.lock().len()
    }
}

impl Cleaner for RecordingCleaner {
    fn run(&self, handle: Handle, _opaque: Option<Opaque>) {
        self.released.lock().push(handle);
    }
}

fn setup() -> (PeerManager, Arc<RecordingCleaner>) {
    (PeerManager::new(), Arc::new(RecordingCleaner::default()))
}

#[test]
fn test_drop_releases_once_after_reclaim() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(42);

    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();
    let clone = peer.clone();
    drop(peer);

    // One clone still alive: nothing queued
    assert_eq!(peers.reclaim_pending().unwrap(), 0);
    assert_eq!(cleaner.count(handle), 0);

    drop(clone);
    assert_eq!(cleaner.count(handle), 0, "released before reclamation ran");

    assert_eq!(peers.reclaim_pending().unwrap(), 1);
    assert_eq!(cleaner.count(handle), 1);
    assert!(!peers.is_registered(handle));

    assert_eq!(peers.reclaim_pending().unwrap(), 0);
    assert_eq!(cleaner.count(handle), 1);
}

#[test]
fn test_dispose_releases_immediately() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(7);

    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();
    let id = peer.registration_id().unwrap();

    peer.dispose().unwrap();
    assert_eq!(cleaner.count(handle), 1);
    assert!(peer.is_disposed());

    // Later unreachability: simulated and real
    peers.notify_unreachable(id);
    drop(peer);
    assert_eq!(peers.reclaim_pending().unwrap(), 0);
    assert_eq!(cleaner.count(handle), 1);
}

#[test]
fn test_dispose_twice_is_noop() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(8);
    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();

    peer.dispose().unwrap();
    peer.dispose().unwrap();
    peers.disarm(peer.registration_id().unwrap()).unwrap();

    assert_eq!(cleaner.count(handle), 1);
    assert_eq!(peers.stats().released_by_dispose, 1);
}

#[test]
fn test_double_registration_rejected() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x100);

    let _first = peers.register(handle, cleaner.clone(), None, None).unwrap();
    let err = peers
        .register(handle, cleaner.clone(), None, None)
        .unwrap_err();

    assert_eq!(err, InteropError::DoubleRegistration { address: 0x100 });
    assert!(err.is_invariant_violation());
    assert_eq!(peers.live_count(), 1);
}

#[test]
fn test_address_reusable_after_release() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x200);

    let first = peers.register(handle, cleaner.clone(), None, None).unwrap();
    first.dispose().unwrap();

    let second = peers.register(handle, cleaner.clone(), None, None).unwrap();
    assert_ne!(first.registration_id(), second.registration_id());
    second.dispose().unwrap();

    assert_eq!(cleaner.count(handle), 2);
}

#[test]
fn test_borrowed_handle_not_registered() {
    let (peers, cleaner) = setup();
    let handle = Handle::borrowed(0x300);

    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();
    assert!(!peer.is_managed());
    assert!(!peers.is_registered(handle));

    peer.dispose().unwrap();
    drop(peer);
    peers.reclaim_pending().unwrap();
    assert_eq!(cleaner.total(), 0);
}

#[test]
fn test_opaque_payload_warns_but_releases() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x400);

    let peer = peers
        .register(handle, cleaner.clone(), Some(Box::new(String::from("leaked"))), None)
        .unwrap();
    drop(peer);
    peers.reclaim_pending().unwrap();

    assert_eq!(cleaner.count(handle), 1);
    assert_eq!(peers.stats().opaque_warnings, 1);
}

#[test]
fn test_cleaner_receives_opaque() {
    let peers = PeerManager::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let cleaner: Arc<dyn Cleaner> = Arc::new(move |_h: Handle, opaque: Option<Opaque>| {
        *sink.lock() = opaque.and_then(|o| o.downcast::<u32>().ok()).map(|b| *b);
    });

    let peer = peers
        .register(Handle::owned(0x410), cleaner, Some(Box::new(5u32)), None)
        .unwrap();
    peer.dispose().unwrap();

    assert_eq!(*seen.lock(), Some(5));
}

#[test]
fn test_access_after_dispose_fails() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x500);
    let peer = peers.register(handle, cleaner, None, None).unwrap();

    {
        let access = peer.access().unwrap();
        assert_eq!(access.handle(), handle);
        assert_eq!(access.address(), 0x500);
    }

    peer.dispose().unwrap();
    assert_eq!(
        peer.access().unwrap_err(),
        InteropError::Disposed { address: 0x500 }
    );
}

#[test]
fn test_access_guard_debug() {
    let (peers, cleaner) = setup();
    let peer = peers.register(Handle::owned(0x510), cleaner, None, None).unwrap();

    let access = peer.access().unwrap();
    let text = format!("{access:?}");
    assert!(text.contains("PeerAccess"));
    assert!(text.contains("0x510"));
}

#[test]
fn test_address_reused_while_cleaner_runs() {
    // Native free hands the address straight back; wrapping it again from
    // inside the release must not collide with the old registration
    let peers = PeerManager::new();
    let handle = Handle::owned(0x520);
    let rewrapped: Arc<Mutex<Option<Result<Peer>>>> = Arc::default();

    let cleaner: Arc<dyn Cleaner> = {
        let peers = peers.clone();
        let rewrapped = rewrapped.clone();
        Arc::new(move |h: Handle, _o: Option<Opaque>| {
            let again = peers.register(h, Arc::new(NoopCleaner), None, None);
            *rewrapped.lock() = Some(again);
        })
    };

    let peer = peers.register(handle, cleaner, None, None).unwrap();
    peer.dispose().unwrap();

    let again = rewrapped.lock().take().unwrap().unwrap();
    assert!(again.is_managed());
    assert!(peers.is_registered(handle));
    assert!(!peers.is_released(handle));
    assert_eq!(peers.live_count(), 1);

    again.dispose().unwrap();
    assert!(peers.is_released(handle));
    assert_eq!(peers.live_count(), 0);
}

#[test]
fn test_released_marker() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x530);
    assert!(!peers.is_released(handle));

    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();
    assert!(!peers.is_released(handle));
    drop(peer);
    peers.reclaim_pending().unwrap();
    assert!(peers.is_released(handle));

    // Abandoned registrations release nothing
    let other = Handle::owned(0x531);
    let peer = peers.register(other, cleaner, None, None).unwrap();
    peers.abandon(&peer);
    assert!(!peers.is_released(other));
}

#[test]
fn test_cleaner_waits_for_in_flight_access() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x600);
    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();

    let access = peer.access().unwrap();
    let disposer = {
        let peer = peer.clone();
        thread::spawn(move || peer.dispose().unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(cleaner.count(handle), 0, "cleaner ran during a native call");

    drop(access);
    disposer.join().unwrap();
    assert_eq!(cleaner.count(handle), 1);
}

#[test]
fn test_owner_retained_until_release() {
    let (peers, cleaner) = setup();
    let owner: Owner = Arc::new(String::from("renderer"));
    let weak = Arc::downgrade(&owner);

    let peer = peers
        .register(Handle::owned(0x700), cleaner, None, Some(owner))
        .unwrap();
    assert!(weak.upgrade().is_some());
    assert!(peer.owner().is_some());

    peer.dispose().unwrap();
    assert!(peer.owner().is_none());
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_abandon_skips_cleaner() {
    let (peers, cleaner) = setup();
    let handle = Handle::owned(0x800);
    let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();

    peers.abandon(&peer);
    drop(peer);
    peers.reclaim_pending().unwrap();

    assert_eq!(cleaner.total(), 0);
    assert!(!peers.is_registered(handle));
    assert_eq!(peers.stats().abandoned, 1);
}

#[test]
fn test_dispose_races_reclaim() {
    // Whichever path wins, the cleaner runs exactly once per handle
    let (peers, cleaner) = setup();

    for i in 0..200usize {
        let handle = Handle::owned(0x1000 + i);
        let peer = peers.register(handle, cleaner.clone(), None, None).unwrap();
        let id = peer.registration_id().unwrap();
        peers.notify_unreachable(id);

        let reclaimer = {
            let peers = peers.clone();
            thread::spawn(move || peers.reclaim_pending().unwrap())
        };
        peer.dispose().unwrap();
        reclaimer.join().unwrap();

        assert_eq!(cleaner.count(handle), 1);
    }

    assert_eq!(peers.live_count(), 0);
    let stats = peers.stats();
    assert_eq!(stats.released_by_dispose + stats.released_by_reclaim, 200);
}

#[test]
fn test_background_reclaimer() {
    let (peers, cleaner) = setup();
    let reclaimer = peers.spawn_reclaimer(&ReclaimConfig::default()).unwrap();

    for i in 1..=50usize {
        let peer = peers
            .register(Handle::owned(i), cleaner.clone(), None, None)
            .unwrap();
        drop(peer);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while cleaner.total() < 50 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(cleaner.total(), 50);
    assert_eq!(reclaimer.shutdown(), 50);
    assert_eq!(peers.live_count(), 0);
}

#[test]
fn test_single_reclaimer_per_manager() {
    let peers = PeerManager::new();
    let first = peers.spawn_reclaimer(&ReclaimConfig::default()).unwrap();
    assert!(peers.spawn_reclaimer(&ReclaimConfig::default()).is_err());

    first.shutdown();
    let second = peers.spawn_reclaimer(&ReclaimConfig::default()).unwrap();
    second.shutdown();
}

#[test]
fn test_stats() {
    let (peers, cleaner) = setup();
    let a = peers.register(Handle::owned(1), cleaner.clone(), None, None).unwrap();
    let b = peers.register(Handle::owned(2), cleaner.clone(), None, None).unwrap();

    a.dispose().unwrap();
    drop(b);
    peers.reclaim_pending().unwrap();

    let stats = peers.stats();
    assert_eq!(stats.registered, 2);
    assert_eq!(stats.released_by_dispose, 1);
    assert_eq!(stats.released_by_reclaim, 1);
    assert_eq!(stats.live, 0);
}
