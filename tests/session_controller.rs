mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{frame, live_controller, local_controller, FakeRemote, FakeTransport};
use fraudguard_stream::models::RiskLevel;
use fraudguard_stream::session::LocalReason;
use fraudguard_stream::{ConnectionStatus, FilterState, SessionMode, StoreEvent};

#[tokio::test(start_paused = true)]
async fn test_local_three_tick_scenario() {
    let c = local_controller();
    c.start().await;
    tokio::time::sleep(Duration::from_millis(3_200)).await;

    let snap = c.snapshot();
    assert_eq!(snap.mode, SessionMode::LocalSimulation);
    assert_eq!(snap.stats.transactions_processed, 3);
    assert_eq!(snap.events.len(), 3);
    assert!(snap.events[0].id().starts_with("LOCAL-3-"));
    assert!(snap.events[2].id().starts_with("LOCAL-1-"));
    for e in &snap.events {
        assert_eq!(e.risk_level(), RiskLevel::from_score(e.risk_score()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_buffer_never_exceeds_capacity() {
    let c = local_controller();
    c.update_speed(10.0).await.unwrap();
    c.start().await;

    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(c.snapshot().events.len() <= 200);
    }

    let snap = c.snapshot();
    assert_eq!(snap.events.len(), 200);
    assert!(snap.stats.transactions_processed >= 299);
}

#[tokio::test(start_paused = true)]
async fn test_counters_stay_consistent() {
    let c = local_controller();
    let check = |label: &str| {
        let s = c.stats();
        assert!(
            s.fraud_count <= s.transactions_processed,
            "{}: fraud {} > processed {}",
            label,
            s.fraud_count,
            s.transactions_processed
        );
    };

    c.start().await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    check("running");
    c.inject_fraud().await;
    check("inject");
    c.inject_fraud().await;
    check("inject twice");
    c.start().await;
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    check("restart");
    c.stop().await;
    check("stop");

    c.reset_simulator().await;
    let s = c.stats();
    assert_eq!(s.transactions_processed, 0);
    assert_eq!(s.fraud_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_inject_then_head_in_both_modes() {
    let c = local_controller();
    c.load_demo_data(20).await.unwrap();
    c.inject_fraud().await.unwrap();
    assert!(c.snapshot().events[0].is_fraud());

    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[&frame("TX-1", 0.1, false)]));
    let c = live_controller(&remote, &transport);
    c.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let injected = c.inject_fraud().await.unwrap();
    let snap = c.snapshot();
    assert_eq!(injected.id(), "FRAUD-REMOTE-1");
    assert_eq!(snap.events[0].id(), "FRAUD-REMOTE-1");
    assert!(snap.events[0].is_fraud());
    assert_eq!(snap.events[0].model_scores().rule_based, 0.61);
    assert!(!snap.stats.is_running);
    assert_eq!(snap.status, ConnectionStatus::Disconnected);
    assert_eq!(snap.stats.transactions_processed, 57);
    assert_eq!(snap.stats.fraud_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_live_start_streams_and_stop_tears_down() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[
        &frame("TX-1", 0.2, false),
        &frame("TX-2", 0.75, true),
    ]));
    let c = live_controller(&remote, &transport);

    assert_eq!(c.initialize().await, SessionMode::Live);
    c.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snap = c.snapshot();
    assert!(snap.stats.is_running);
    assert_eq!(snap.status, ConnectionStatus::Connected);
    assert_eq!(snap.events.len(), 2);
    assert_eq!(snap.events[0].risk_level(), RiskLevel::High);
    assert_eq!(snap.stats.fraud_count, 1);
    assert_eq!(remote.calls(), vec!["status", "start"]);

    c.stop().await;
    c.stop().await;
    let snap = c.snapshot();
    assert!(!snap.stats.is_running);
    assert_eq!(snap.status, ConnectionStatus::Disconnected);
    assert_eq!(remote.calls(), vec!["status", "start", "stop", "stop"]);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_start_probes_lazily() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);

    c.start().await;
    c.start().await;
    assert_eq!(remote.calls(), vec!["status", "start", "start"]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_service_fails_over_permanently() {
    let remote = Arc::new(FakeRemote::unreachable());
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);

    assert_eq!(c.initialize().await, SessionMode::LocalSimulation);
    assert_eq!(c.local_reason(), Some(LocalReason::Unreachable));
    let snap = c.snapshot();
    assert!(snap.stats.models_ready);
    assert!(snap.last_error.is_none());

    // The service coming back does not bring the session back to live.
    remote.fail_status.store(false, Ordering::SeqCst);

    c.start().await;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    c.toggle().await;
    c.inject_fraud().await;
    c.update_speed(3.0).await.unwrap();
    c.reset_simulator().await;
    c.start().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    c.stop().await;

    assert_eq!(c.mode(), SessionMode::LocalSimulation);
    assert_eq!(transport.opens(), 0);
    assert_eq!(remote.calls(), vec!["status"]);
    assert!(c.connection_metrics().map(|m| m.connections_attempted).unwrap_or(0) == 0);
}

#[tokio::test(start_paused = true)]
async fn test_remote_start_failure_rolls_back() {
    let remote = Arc::new(FakeRemote::healthy());
    remote.fail_control.store(true, Ordering::SeqCst);
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);

    c.start().await;
    let snap = c.snapshot();
    assert!(!snap.stats.is_running);
    let err = snap.last_error.expect("error surfaced");
    assert!(err.contains("503"), "unexpected message: {}", err);
    assert_eq!(transport.opens(), 0);

    remote.fail_control.store(false, Ordering::SeqCst);
    c.start().await;
    assert!(c.snapshot().last_error.is_none());
    assert!(c.stats().is_running);
}

#[tokio::test]
async fn test_reset_while_start_pending_ends_fully_reset() {
    let remote = Arc::new(FakeRemote::healthy());
    remote.status.lock().transactions_processed = 40;
    remote.status.lock().fraud_count = 3;
    let transport = Arc::new(FakeTransport::scripted(&[
        &frame("TX-1", 0.2, false),
        &frame("TX-2", 0.9, true),
    ]));
    let c = Arc::new(live_controller(&remote, &transport));
    c.initialize().await;
    assert_eq!(c.stats().transactions_processed, 40);

    let gate = remote.gate_start();
    let starter = tokio::spawn({
        let c = c.clone();
        async move { c.start().await }
    });
    remote.start_entered.notified().await;
    assert!(c.stats().is_running);

    let resetter = tokio::spawn({
        let c = c.clone();
        async move { c.reset_simulator().await }
    });
    tokio::task::yield_now().await;
    gate.notify_one();

    starter.await.unwrap();
    resetter.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snap = c.snapshot();
    assert!(!snap.stats.is_running);
    assert_eq!(snap.stats.transactions_processed, 0);
    assert_eq!(snap.stats.fraud_count, 0);
    assert!(snap.events.is_empty());
    assert_eq!(snap.status, ConnectionStatus::Disconnected);
    assert_eq!(remote.calls(), vec!["status", "start", "reset"]);
}

#[tokio::test]
async fn test_stop_while_start_pending_ends_stopped() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[&frame("TX-1", 0.2, false)]));
    let c = Arc::new(live_controller(&remote, &transport));
    c.initialize().await;

    let gate = remote.gate_start();
    let starter = tokio::spawn({
        let c = c.clone();
        async move { c.start().await }
    });
    remote.start_entered.notified().await;

    let stopper = tokio::spawn({
        let c = c.clone();
        async move { c.stop().await }
    });
    tokio::task::yield_now().await;
    gate.notify_one();

    starter.await.unwrap();
    stopper.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snap = c.snapshot();
    assert!(!snap.stats.is_running);
    assert_eq!(snap.status, ConnectionStatus::Disconnected);
    assert_eq!(transport.opens(), transport.closes());
    assert_eq!(remote.calls(), vec!["status", "start", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_remote_reset_is_not_undone_by_polling() {
    let remote = Arc::new(FakeRemote::healthy());
    remote.status.lock().transactions_processed = 40;
    remote.status.lock().fraud_count = 3;
    remote.fail_control.store(true, Ordering::SeqCst);
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);
    c.initialize().await;
    assert_eq!(c.stats().transactions_processed, 40);

    c.reset_simulator().await;
    assert!(c.snapshot().last_error.is_some());
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    let stats = c.stats();
    assert_eq!(stats.transactions_processed, 0);
    assert_eq!(stats.fraud_count, 0);

    // Once the service acknowledges a reset its counters are folded again
    remote.fail_control.store(false, Ordering::SeqCst);
    c.reset_simulator().await;
    {
        let mut status = remote.status.lock();
        status.transactions_processed = 5;
        status.fraud_count = 1;
    }
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(c.stats().transactions_processed, 5);
    assert_eq!(c.stats().fraud_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_clear_running_flag() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::failing());
    let c = live_controller(&remote, &transport);

    c.start().await;
    assert!(c.stats().is_running);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 6);
    assert!(!c.stats().is_running);
    assert_eq!(c.status(), ConnectionStatus::Disconnected);

    // A single toggle brings a fresh connection attempt
    c.toggle().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.opens(), 7);
    assert!(c.stats().is_running);
    c.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_live_speed_update_forwards_config() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);
    c.initialize().await;

    assert!(c.update_speed(-2.0).await.unwrap_err().is_validation());
    assert!(remote.configs.lock().is_empty());

    c.update_speed(4.0).await.unwrap();
    assert_eq!(c.stats().speed, 4.0);
    {
        let configs = remote.configs.lock();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].speed, 4.0);
        assert!(!configs[0].inject_fraud);
        assert!(!configs[0].use_demo_mode);
    }

    // Failure is surfaced but the new speed stays
    remote.fail_control.store(true, Ordering::SeqCst);
    c.update_speed(8.0).await.unwrap();
    assert_eq!(c.stats().speed, 8.0);
    assert!(c.snapshot().last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_status_poller_folds_remote_counters() {
    let remote = Arc::new(FakeRemote::healthy());
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);
    c.initialize().await;
    assert_eq!(c.stats().transactions_processed, 0);

    {
        let mut status = remote.status.lock();
        status.transactions_processed = 99;
        status.fraud_count = 7;
        status.fraud_rate = Some(0.05);
    }
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    let stats = c.stats();
    assert_eq!(stats.transactions_processed, 99);
    assert_eq!(stats.fraud_count, 7);
    assert_eq!(stats.fraud_rate, 0.05);
    assert_eq!(
        remote.calls().iter().filter(|c| *c == "status").count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_live_demo_data_and_explain() {
    let remote = Arc::new(FakeRemote::healthy());
    *remote.demo_rows.lock() = vec![
        json!({"id": "DEMO-A", "amount": 12.0, "risk_score": 0.12, "ground_truth": false}),
        json!("garbage"),
        json!({"id": "DEMO-B", "amount": 900.0, "risk_score": 0.81, "features": [0.3, -1.2]}),
    ];
    let transport = Arc::new(FakeTransport::scripted(&[]));
    let c = live_controller(&remote, &transport);
    c.initialize().await;

    let loaded = c.load_demo_data(10).await.unwrap();
    assert_eq!(loaded, 2);
    let snap = c.snapshot();
    assert_eq!(snap.events[0].id(), "DEMO-A");
    assert_eq!(snap.events[1].id(), "DEMO-B");
    assert!(snap.events[1].is_fraud());
    assert_eq!(snap.stats.transactions_processed, 0);

    let explanation = c.explain(&snap.events[1]).await.unwrap();
    assert_eq!(explanation.base_value, 0.17);
    assert_eq!(explanation.top_features.len(), 2);
    assert_eq!(explanation.top_features[0].feature, "V1");

    assert!(c.explain(&snap.events[0]).await.unwrap_err().is_validation());

    let metrics = c.model_metrics().await.unwrap();
    assert_eq!(metrics["ensemble"]["auc"], 0.98);
    assert!(remote.calls().contains(&"metrics".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_filtered_view_and_notifications() {
    let c = local_controller();
    let mut rx = c.subscribe();

    c.load_demo_data(40).await.unwrap();
    c.inject_fraud().await.unwrap();

    let high = c.filtered(&FilterState {
        risk_level: Some(RiskLevel::High),
        ..Default::default()
    });
    assert!(!high.is_empty());
    assert!(high.iter().all(|e| e.risk_level() == RiskLevel::High));
    assert_eq!(c.snapshot().events.len(), 41);

    let mut saw_event = false;
    while let Ok(note) = rx.try_recv() {
        if let StoreEvent::EventAdded { is_fraud, .. } = note {
            assert!(is_fraud);
            saw_event = true;
        }
    }
    assert!(saw_event);
}
