use common_audit::{
    ConnectionManager, ManagerSlot, ManagerState, MemoryBroker, ProducerConfig, PublishError, PublishResult,
};
use common_observability::PublisherMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn metrics() -> Arc<PublisherMetrics> {
    Arc::new(PublisherMetrics::new().expect("metrics"))
}

fn manager_with(broker: Arc<MemoryBroker>, grace: Duration) -> (ConnectionManager, Arc<PublisherMetrics>) {
    let config = ProducerConfig {
        close_grace: grace,
        ..ProducerConfig::default()
    };
    let metrics = metrics();
    (ConnectionManager::with_client(config, broker, metrics.clone()), metrics)
}

#[test]
fn concurrent_first_calls_build_one_client() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();
    let slot = Arc::new(ManagerSlot::new(metrics(), move |metrics| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Ok(ConnectionManager::with_client(
            ProducerConfig::default(),
            Arc::new(MemoryBroker::new(3)),
            metrics,
        ))
    }));
    assert_eq!(slot.state(), ManagerState::Uninitialized);

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let slot = slot.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                slot.instance().expect("instance")
            })
        })
        .collect();
    let managers: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    for manager in &managers[1..] {
        assert!(Arc::ptr_eq(&managers[0], manager));
    }
    assert_eq!(slot.state(), ManagerState::Ready);
    managers[0].close();
}

#[test]
fn failed_construction_is_retried_on_next_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let slot = ManagerSlot::new(metrics(), move |metrics| -> PublishResult<ConnectionManager> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(PublishError::Client("broker unreachable".into()));
        }
        Ok(ConnectionManager::with_client(
            ProducerConfig::default(),
            Arc::new(MemoryBroker::new(3)),
            metrics,
        ))
    });

    let err = slot.instance().err().expect("first call fails");
    assert!(err.is_initialization());
    assert_eq!(slot.state(), ManagerState::Uninitialized);
    assert!(slot.get().is_none());
    assert_eq!(slot.metrics().init_failures.get(), 1);

    let manager = slot.instance().expect("second call succeeds");
    assert_eq!(manager.state(), ManagerState::Ready);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    manager.close();
}

#[test]
fn closed_slot_refuses_to_build_or_hand_out_a_manager() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();
    let slot = ManagerSlot::new(metrics(), move |metrics| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionManager::with_client(
            ProducerConfig::default(),
            Arc::new(MemoryBroker::new(3)),
            metrics,
        ))
    });

    slot.close();
    slot.close();

    let err = slot.instance().err().expect("closed slot refuses");
    assert_eq!(err, PublishError::Unavailable(ManagerState::Closed));
    assert!(slot.is_closed());
    assert_eq!(slot.state(), ManagerState::Closed);
    assert_eq!(constructions.load(Ordering::SeqCst), 0);
    assert_eq!(slot.metrics().rejected.get(), 1);
}

#[test]
fn closing_slot_closes_the_built_manager() {
    let broker = Arc::new(MemoryBroker::new(3));
    let slot = {
        let broker = broker.clone();
        ManagerSlot::new(metrics(), move |metrics| {
            Ok(ConnectionManager::with_client(ProducerConfig::default(), broker.clone(), metrics))
        })
    };
    let manager = slot.instance().expect("instance");

    slot.close();

    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(broker.is_torn_down());
    assert!(slot.instance().is_err());
}

#[tokio::test]
async fn send_resolves_with_delivery_metadata() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, metrics) = manager_with(broker.clone(), Duration::from_secs(1));

    let first = manager.send("auth.events", "u1", b"{\"a\":1}".to_vec()).expect("send");
    let second = manager.send("auth.events", "u2", b"{\"a\":2}".to_vec()).expect("send");
    let first = first.wait().await.expect("delivered");
    let second = second.wait().await.expect("delivered");

    assert_eq!(first.topic, "auth.events");
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 1);
    assert_eq!(metrics.enqueued.with_label_values(&["auth.events"]).get(), 2);
    assert_eq!(metrics.delivered.with_label_values(&["auth.events"]).get(), 2);
    manager.close();
}

#[tokio::test]
async fn same_key_order_survives_transient_retry() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, _) = manager_with(broker.clone(), Duration::from_secs(1));
    broker.fail_transiently("user-1", 2);

    let a = manager.send("auth.events", "user-1", b"A".to_vec()).expect("send A");
    let b = manager.send("auth.events", "user-1", b"B".to_vec()).expect("send B");
    a.wait().await.expect("A delivered");
    b.wait().await.expect("B delivered");

    let payloads: Vec<_> = broker.delivered().into_iter().map(|m| m.payload).collect();
    assert_eq!(payloads, vec![b"A".to_vec(), b"B".to_vec()]);
    let retried = broker.attempts().iter().filter(|a| !a.succeeded).count();
    assert_eq!(retried, 2);
    manager.close();
}

#[tokio::test]
async fn transport_failure_rejects_handle_without_failing_send() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, metrics) = manager_with(broker.clone(), Duration::from_secs(1));
    broker.reject_all("NOT_ENOUGH_REPLICAS");

    let handle = manager.send("auth.admin.events", "actor", b"{}".to_vec()).expect("enqueue succeeds");
    let err = handle.wait().await.expect_err("delivery fails");
    assert_eq!(err, PublishError::Transport("NOT_ENOUGH_REPLICAS".into()));
    assert_eq!(metrics.failed.with_label_values(&["auth.admin.events"]).get(), 1);
    manager.close();
}

#[test]
fn send_after_close_fails_fast_and_is_never_transmitted() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, metrics) = manager_with(broker.clone(), Duration::from_secs(1));
    manager.close();
    assert_eq!(manager.state(), ManagerState::Closed);

    let err = manager.send("auth.events", "u1", b"late".to_vec()).err().expect("rejected");
    assert_eq!(err, PublishError::Unavailable(ManagerState::Closed));
    assert!(err.is_usage());
    assert!(broker.delivered().is_empty());
    assert!(broker.attempts().is_empty());
    assert_eq!(metrics.rejected.get(), 1);
}

#[test]
fn close_is_idempotent_and_flush_after_close_is_a_noop() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, _) = manager_with(broker.clone(), Duration::from_secs(1));
    manager.close();
    manager.close();
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(broker.is_torn_down());
    assert_eq!(manager.flush(), Ok(()));
}

#[tokio::test]
async fn close_waits_for_outstanding_messages_within_grace() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, _) = manager_with(broker.clone(), Duration::from_secs(5));
    broker.pause();
    let handle = manager.send("auth.events", "u1", b"queued".to_vec()).expect("send");
    assert_eq!(manager.in_flight(), 1);

    let releaser = {
        let broker = broker.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            broker.resume();
        })
    };
    manager.close();
    releaser.join().expect("join");

    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(handle.wait().await.is_ok());
    assert_eq!(broker.delivered().len(), 1);
}

#[tokio::test]
async fn close_abandons_messages_still_queued_after_grace() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, metrics) = manager_with(broker.clone(), Duration::from_millis(50));
    broker.pause();
    let handle = manager.send("auth.events", "u1", b"stuck".to_vec()).expect("send");

    manager.close();

    assert_eq!(manager.state(), ManagerState::Closed);
    assert_eq!(handle.wait().await, Err(PublishError::Abandoned));
    assert!(broker.delivered().is_empty());
    assert_eq!(metrics.abandoned.get(), 1);

    broker.resume();
    assert!(broker.delivered().is_empty());
}

#[test]
fn sends_racing_close_are_either_delivered_or_refused() {
    let broker = Arc::new(MemoryBroker::new(3));
    let (manager, _) = manager_with(broker.clone(), Duration::from_secs(1));
    let manager = Arc::new(manager);
    let accepted = Arc::new(AtomicUsize::new(0));

    let senders: Vec<_> = (0..4)
        .map(|worker| {
            let manager = manager.clone();
            let accepted = accepted.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("user-{worker}");
                    match manager.send("auth.events", &key, format!("{i}").into_bytes()) {
                        Ok(_) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            assert!(err.is_usage());
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(1));
    manager.close();
    for sender in senders {
        sender.join().expect("join");
    }

    assert_eq!(broker.delivered().len(), accepted.load(Ordering::SeqCst));
}
