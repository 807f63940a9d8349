use ble_link::infrastructure::bluetooth::reconnection::BackoffConfig;
use ble_link::infrastructure::bluetooth::simulated::SimulatedBackend;
use ble_link::{
    AdapterStatus, AppEvent, BleError, BluetoothCommand, BluetoothConfig, BluetoothService,
    ConnectionState, LifecycleBridge, Notice, Peripheral, PeripheralId, Signal,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Harness {
    service: BluetoothService,
    backend: Arc<SimulatedBackend>,
    lifecycle: LifecycleBridge,
    events: mpsc::UnboundedReceiver<AppEvent>,
}

impl Harness {
    async fn start(config: BluetoothConfig) -> Self {
        Self::start_with(config, true).await
    }

    async fn start_with(config: BluetoothConfig, adapter_available: bool) -> Self {
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_adapter_available(adapter_available);
        let (event_tx, events) = mpsc::unbounded_channel();
        let lifecycle = LifecycleBridge::new();
        let mut service = BluetoothService::new(backend.clone(), config, event_tx);
        service.start(&lifecycle).await;

        Self {
            service,
            backend,
            lifecycle,
            events,
        }
    }

    fn signals(&mut self) -> Vec<Signal> {
        std::iter::from_fn(|| self.events.try_recv().ok())
            .filter_map(|e| match e {
                AppEvent::Notice(Notice { signal, .. }) => Some(signal),
                _ => None,
            })
            .collect()
    }

    /// Asserts no input arrives within `window` of virtual time.
    async fn assert_idle(&mut self, window: Duration) {
        let step = tokio::time::timeout(window, self.service.step()).await;
        assert!(step.is_err(), "unexpected input: {:?}", step);
    }
}

fn config(background_mode: bool) -> BluetoothConfig {
    BluetoothConfig {
        background_mode,
        ..BluetoothConfig::default()
    }
}

fn id(s: &str) -> PeripheralId {
    PeripheralId::new(s)
}

#[tokio::test(start_paused = true)]
async fn scan_without_adapter_reports_unavailable() {
    let mut h = Harness::start_with(config(false), false).await;
    assert_eq!(h.service.adapter_status(), AdapterStatus::Unavailable);

    let err = h.service.start_scan().await.unwrap_err();
    assert_eq!(err, BleError::AdapterUnavailable);
    assert!(h.service.discovered().is_empty());
    assert!(!h.service.is_scanning());
    assert_eq!(
        h.signals(),
        vec![Signal::AdapterUnavailable, Signal::AdapterUnavailable]
    );
}

#[tokio::test(start_paused = true)]
async fn advertisements_are_deduplicated_in_first_seen_order() {
    let mut h = Harness::start(config(false)).await;
    h.service.start_scan().await.unwrap();

    for (raw, name) in [("C", "Gamma"), ("A", "Alpha"), ("C", "Gamma"), ("B", "Beta"), ("A", "Alpha")] {
        assert!(h.backend.advertise(Peripheral::new(raw, Some(name))));
    }
    for _ in 0..5 {
        h.service.step().await.unwrap().unwrap();
    }

    let ids: Vec<_> = h.service.discovered().iter().map(|p| p.id.to_string()).collect();
    assert_eq!(ids, vec!["C", "A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn restarted_scan_drops_queued_advertisements() {
    let mut h = Harness::start(config(false)).await;
    h.service.start_scan().await.unwrap();
    h.backend.advertise(Peripheral::new("A", Some("Alpha")));
    h.backend.advertise(Peripheral::new("B", Some("Beta")));

    h.service.start_scan().await.unwrap();
    assert!(h.backend.advertise(Peripheral::new("C", Some("Gamma"))));
    h.service.step().await.unwrap().unwrap();

    let ids: Vec<_> = h.service.discovered().iter().map(|p| p.id.to_string()).collect();
    assert_eq!(ids, vec!["C"]);
}

#[tokio::test(start_paused = true)]
async fn restarted_scan_keeps_queued_link_loss() {
    let mut h = Harness::start(config(false)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.service.start_scan().await.unwrap();
    h.backend.advertise(Peripheral::new("A", None));
    h.backend.drop_link(&id("AA"));

    h.service.start_scan().await.unwrap();
    let lost = h.service.step().await.unwrap();
    assert_eq!(lost, Err(BleError::ConnectionLost(id("AA"))));
    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert!(h.service.discovered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_failure_reaches_the_ui() {
    let mut h = Harness::start(config(false)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.set_disconnect_failure(true);

    h.service.disconnect().await;
    assert_eq!(h.service.state(), ConnectionState::Disconnected);

    let failure = std::iter::from_fn(|| h.events.try_recv().ok()).find_map(|e| match e {
        AppEvent::Notice(notice) if notice.signal == Signal::DisconnectFailed => Some(notice),
        _ => None,
    });
    let failure = failure.expect("no disconnect failure notice");
    assert_eq!(failure.title, "Disconnect Failed");
    assert_eq!(failure.description, "Failed to disconnect from the device.");
}

#[tokio::test(start_paused = true)]
async fn scan_stops_itself_after_ten_seconds() {
    let mut h = Harness::start(config(false)).await;
    let started = Instant::now();
    h.service.start_scan().await.unwrap();
    assert!(h.service.scan_timeout_pending());

    h.service.step().await.unwrap().unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert!(!h.service.is_scanning());
    assert!(!h.backend.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn connect_then_disconnect_leaves_nothing_scheduled() {
    let mut h = Harness::start(config(true)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.service.disconnect().await;

    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert!(!h.service.retry_pending());
    assert!(h.service.last_connected().is_none());
    h.assert_idle(Duration::from_secs(120)).await;
    assert_eq!(h.backend.connect_attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_link_retries_with_backoff_until_exhausted() {
    let mut h = Harness::start(config(true)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.fail_next_connects(u32::MAX);

    let lost_at = Instant::now();
    assert!(h.backend.drop_link(&id("AA")));
    h.service.step().await.unwrap().unwrap();
    assert_eq!(h.service.state(), ConnectionState::Reconnecting);
    assert_eq!(h.service.reconnect_attempts(), 1);

    let result = loop {
        let result = h.service.step().await.unwrap();
        if h.service.state() != ConnectionState::Reconnecting {
            break result;
        }
    };

    assert_eq!(
        result,
        Err(BleError::ReconnectionExhausted {
            id: id("AA"),
            attempts: 5
        })
    );
    assert_eq!(lost_at.elapsed(), Duration::from_secs(31));
    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert_eq!(h.service.reconnect_attempts(), 0);
    assert!(!h.service.retry_pending());

    // first entry is the manual connect
    let attempts: Vec<Instant> = h.backend.connect_attempts()[1..]
        .iter()
        .map(|(_, at)| *at)
        .collect();
    assert_eq!(attempts.len(), 5);
    assert_eq!(attempts[0], lost_at);
    let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![1, 2, 4, 8]);

    let signals = h.signals();
    assert_eq!(signals.first(), Some(&Signal::Connected));
    assert_eq!(signals.last(), Some(&Signal::ReconnectionExhausted));

    h.assert_idle(Duration::from_secs(120)).await;
}

#[tokio::test(start_paused = true)]
async fn backoff_delay_is_capped_at_thirty_seconds() {
    let mut h = Harness::start(BluetoothConfig {
        background_mode: true,
        backoff: BackoffConfig {
            max_attempts: 8,
            ..BackoffConfig::default()
        },
        ..BluetoothConfig::default()
    })
    .await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.fail_next_connects(u32::MAX);
    h.backend.drop_link(&id("AA"));

    while h.service.state() != ConnectionState::Disconnected {
        let _ = h.service.step().await.unwrap();
    }

    let attempts: Vec<Instant> = h.backend.connect_attempts()[1..]
        .iter()
        .map(|(_, at)| *at)
        .collect();
    let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16, 30, 30]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_succeeds_after_transient_failures() {
    let mut h = Harness::start(config(true)).await;
    h.service.start_scan().await.unwrap();
    h.backend.advertise(Peripheral::new("AA", Some("Earbuds")));
    h.service.step().await.unwrap().unwrap();
    h.service.connect(id("AA")).await.unwrap();

    h.backend.fail_next_connects(2);
    h.backend.drop_link(&id("AA"));
    h.service.step().await.unwrap().unwrap();
    assert_eq!(h.service.state(), ConnectionState::Reconnecting);
    while h.service.state() != ConnectionState::Connected {
        h.service.step().await.unwrap().unwrap();
    }

    assert_eq!(h.backend.connect_attempt_count(), 4);
    let attempts: Vec<Instant> = h.backend.connect_attempts()[1..]
        .iter()
        .map(|(_, at)| *at)
        .collect();
    let gaps: Vec<u64> = attempts.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![1, 2]);
    assert_eq!(h.service.reconnect_attempts(), 0);
    assert_eq!(
        h.service.active().and_then(|p| p.display_name.as_deref()),
        Some("Earbuds")
    );
    assert!(h.signals().contains(&Signal::Reconnected));
    assert!(h.backend.is_connected(&id("AA")));
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_cancels_pending_retry() {
    let mut h = Harness::start(config(true)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.fail_next_connects(u32::MAX);
    h.backend.drop_link(&id("AA"));
    h.service.step().await.unwrap().unwrap();
    assert!(h.service.retry_pending());
    let attempts_before = h.backend.connect_attempt_count();

    h.service.disconnect().await;
    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert!(!h.service.retry_pending());
    assert!(h.service.last_connected().is_none());

    h.assert_idle(Duration::from_secs(60)).await;
    assert_eq!(h.backend.connect_attempt_count(), attempts_before);
}

#[tokio::test(start_paused = true)]
async fn toggling_background_mode_keeps_connection_state() {
    let mut h = Harness::start(config(false)).await;
    h.service.connect(id("AA")).await.unwrap();

    assert!(h.service.toggle_background_mode());
    assert!(h.service.background_mode());
    assert_eq!(h.service.state(), ConnectionState::Connected);
    assert!(!h.service.toggle_background_mode());
    assert_eq!(h.service.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn resume_with_background_mode_off_never_reconnects() {
    let mut h = Harness::start(config(false)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.drop_link(&id("AA"));
    let lost = h.service.step().await.unwrap();
    assert_eq!(lost, Err(BleError::ConnectionLost(id("AA"))));
    assert_eq!(h.service.last_connected(), Some(&id("AA")));

    assert_eq!(h.lifecycle.set_active(false), 1);
    assert_eq!(h.lifecycle.set_active(true), 1);
    h.service.step().await.unwrap().unwrap();
    h.service.step().await.unwrap().unwrap();

    assert_eq!(h.service.state(), ConnectionState::Disconnected);
    assert_eq!(h.backend.connect_attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_with_background_mode_on_reconnects_once() {
    let mut h = Harness::start(config(false)).await;
    h.service.connect(id("AA")).await.unwrap();
    h.backend.drop_link(&id("AA"));
    let _ = h.service.step().await.unwrap();
    h.service.toggle_background_mode();

    h.backend.set_reachable(&id("AA"), false);
    h.lifecycle.set_active(true);
    h.lifecycle.set_active(true);
    h.service.step().await.unwrap().unwrap();
    assert_eq!(h.service.state(), ConnectionState::Reconnecting);
    h.service.step().await.unwrap().unwrap();

    // a second resume does not start a parallel episode
    assert_eq!(h.backend.connect_attempt_count(), 2);
    assert_eq!(h.service.reconnect_attempts(), 1);

    h.backend.set_reachable(&id("AA"), true);
    h.service.step().await.unwrap().unwrap();
    assert_eq!(h.service.state(), ConnectionState::Connected);
    assert_eq!(h.backend.connect_attempt_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_defuses_timers_and_disposes_listeners() {
    let mut h = Harness::start(config(true)).await;
    assert_eq!(h.backend.listener_count(), 1);
    assert_eq!(h.lifecycle.listener_count(), 1);

    h.service.start_scan().await.unwrap();
    h.service.connect(id("AA")).await.unwrap();
    h.backend.fail_next_connects(u32::MAX);
    h.backend.drop_link(&id("AA"));
    h.service.step().await.unwrap().unwrap();
    assert!(h.service.retry_pending());
    assert!(h.service.scan_timeout_pending());

    h.service.stop().await;
    assert!(!h.service.retry_pending());
    assert!(!h.service.scan_timeout_pending());
    assert!(!h.service.is_scanning());
    assert!(!h.service.is_subscribed());
    assert_eq!(h.backend.listener_count(), 0);
    assert_eq!(h.lifecycle.listener_count(), 0);
    assert_eq!(h.service.state(), ConnectionState::Disconnected);

    let attempts = h.backend.connect_attempt_count();
    h.assert_idle(Duration::from_secs(60)).await;
    assert_eq!(h.backend.connect_attempt_count(), attempts);
}

#[tokio::test(start_paused = true)]
async fn run_loop_processes_commands_until_shutdown() {
    let backend = Arc::new(SimulatedBackend::new());
    backend.seed(Peripheral::new("AA", Some("Earbuds")));
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let lifecycle = LifecycleBridge::new();
    let mut service = BluetoothService::new(backend.clone(), config(false), event_tx);
    service.start(&lifecycle).await;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(service.run(command_rx));

    command_tx.send(BluetoothCommand::StartScan).unwrap();
    loop {
        if let Some(AppEvent::DeviceFound(p)) = events.recv().await {
            assert_eq!(p.id, id("AA"));
            break;
        }
    }

    command_tx.send(BluetoothCommand::Connect(id("AA"))).unwrap();
    loop {
        if let Some(AppEvent::Notice(notice)) = events.recv().await {
            assert_eq!(notice.signal, Signal::Connected);
            assert_eq!(notice.description, "Connected to Earbuds");
            break;
        }
    }

    command_tx.send(BluetoothCommand::Shutdown).unwrap();
    worker.await.unwrap();

    assert!(!backend.is_connected(&id("AA")));
    assert!(!backend.is_scanning());
    assert_eq!(backend.listener_count(), 0);
}
