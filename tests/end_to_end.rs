//! Central system and charge point over real localhost sockets.
//!
//! Scenarios that need a misbehaving charge point drive the central system
//! through a raw tokio-tungstenite client instead of `ChargePoint`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ocpp_runtime::application::handlers::CentralSystemCoreHandler;
use ocpp_runtime::domain::messages::*;
use ocpp_runtime::domain::OcppErrorCode;
use ocpp_runtime::{
    CentralSystem, CentralSystemConfig, ChargePoint, ChargePointConfig, HandlerError, HandlerResult,
    RequestError, ServerConfig,
};

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_WAIT: Duration = Duration::from_secs(5);

// ── Fixtures ───────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCentralSystem {
    boots: Mutex<Vec<(String, String, String)>>,
    authorizations: AtomicUsize,
    heartbeats: AtomicUsize,
}

fn unused<T>() -> HandlerResult<T> {
    Err(HandlerError::internal("not used in this test"))
}

#[async_trait]
impl CentralSystemCoreHandler for RecordingCentralSystem {
    async fn on_authorize(&self, _: &str, _: AuthorizeRequest) -> HandlerResult<AuthorizeResponse> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(AuthorizeResponse {
            id_tag_info: IdTagInfo {
                status: AuthorizationStatus::Accepted,
                expiry_date: None,
                parent_id_tag: None,
            },
        })
    }

    async fn on_boot_notification(
        &self,
        charge_point_id: &str,
        request: BootNotificationRequest,
    ) -> HandlerResult<BootNotificationResponse> {
        self.boots.lock().unwrap().push((
            charge_point_id.to_string(),
            request.charge_point_model,
            request.charge_point_vendor,
        ));
        Ok(BootNotificationResponse {
            current_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            interval: 60,
            status: RegistrationStatus::Accepted,
        })
    }

    async fn on_data_transfer(&self, _: &str, _: DataTransferRequest) -> HandlerResult<DataTransferResponse> {
        unused()
    }

    async fn on_heartbeat(&self, _: &str, _: HeartbeatRequest) -> HandlerResult<HeartbeatResponse> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(HeartbeatResponse {
            current_time: Utc::now(),
        })
    }

    async fn on_meter_values(&self, _: &str, _: MeterValuesRequest) -> HandlerResult<MeterValuesResponse> {
        unused()
    }

    async fn on_start_transaction(
        &self,
        _: &str,
        _: StartTransactionRequest,
    ) -> HandlerResult<StartTransactionResponse> {
        unused()
    }

    async fn on_status_notification(
        &self,
        _: &str,
        _: StatusNotificationRequest,
    ) -> HandlerResult<StatusNotificationResponse> {
        unused()
    }

    async fn on_stop_transaction(
        &self,
        _: &str,
        _: StopTransactionRequest,
    ) -> HandlerResult<StopTransactionResponse> {
        unused()
    }
}

async fn start_central_system(
    request_timeout: Duration,
) -> (Arc<CentralSystem>, Arc<RecordingCentralSystem>, SocketAddr) {
    let config = CentralSystemConfig {
        server: ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        },
        request_timeout,
        ..CentralSystemConfig::default()
    };
    let central_system = Arc::new(CentralSystem::new(config));
    let handler = Arc::new(RecordingCentralSystem::default());
    central_system.set_core_handler(handler.clone());
    let addr = central_system.start().await.unwrap();
    (central_system, handler, addr)
}

async fn start_charge_point(addr: SocketAddr, id: &str) -> ChargePoint {
    let charge_point = ChargePoint::new(ChargePointConfig::new(id));
    charge_point.start(&format!("ws://{}", addr)).await.unwrap();
    charge_point
}

async fn connect_raw(addr: SocketAddr, id: &str) -> Result<RawSocket, WsError> {
    let mut request = format!("ws://{}/{}", addr, id).into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("ocpp1.6"));
    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

async fn wait_connected(central_system: &CentralSystem, id: &str) {
    for _ in 0..200 {
        if central_system.is_connected(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} never registered");
}

async fn wait_disconnected(central_system: &CentralSystem, id: &str) {
    for _ in 0..200 {
        if !central_system.is_connected(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} never unregistered");
}

/// Next CALL from the central system as `(unique id, action, payload)`.
async fn next_call(socket: &mut RawSocket) -> (String, String, Value) {
    loop {
        let message = timeout(FRAME_WAIT, socket.next())
            .await
            .expect("no frame in time")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame[0], 2, "expected a CALL, got {text}");
            return (
                frame[1].as_str().unwrap().to_string(),
                frame[2].as_str().unwrap().to_string(),
                frame[3].clone(),
            );
        }
    }
}

async fn reply(socket: &mut RawSocket, unique_id: &str, payload: Value) {
    socket
        .send(Message::Text(json!([3, unique_id, payload]).to_string()))
        .await
        .unwrap();
}

async fn assert_silent(socket: &mut RawSocket, window: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, socket.next()).await {
        panic!("unexpected frame {text}");
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(FRAME_WAIT, rx.recv())
        .await
        .expect("callback never fired")
        .expect("callback dropped")
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn boot_notification_round_trip() {
    let (central_system, handler, addr) = start_central_system(Duration::from_secs(5)).await;
    let charge_point = start_charge_point(addr, "CP001").await;

    let response = charge_point.boot_notification("model1", "vendor1").await.unwrap();
    assert!(matches!(response.status, RegistrationStatus::Accepted));
    assert_eq!(response.interval, 60);
    assert_eq!(response.current_time, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(
        handler.boots.lock().unwrap().as_slice(),
        &[("CP001".to_string(), "model1".to_string(), "vendor1".to_string())]
    );
    assert!(central_system.is_connected("CP001"));

    charge_point.stop();
    central_system.stop().await;
}

#[tokio::test]
async fn queued_requests_reach_the_wire_one_at_a_time() {
    let (central_system, _, addr) = start_central_system(Duration::from_secs(5)).await;
    let mut socket = connect_raw(addr, "CP002").await.unwrap();
    wait_connected(&central_system, "CP002").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let first = tx.clone();
    central_system
        .change_configuration("CP002", "HeartbeatInterval", "30", move |r| {
            let _ = first.send(("first", r));
        })
        .unwrap();
    central_system
        .change_configuration("CP002", "MeterValueSampleInterval", "10", move |r| {
            let _ = tx.send(("second", r));
        })
        .unwrap();
    assert_eq!(central_system.pending_requests("CP002"), 2);

    let (id, action, payload) = next_call(&mut socket).await;
    assert_eq!(action, "ChangeConfiguration");
    assert_eq!(payload["key"], "HeartbeatInterval");
    assert_silent(&mut socket, Duration::from_millis(150)).await;

    reply(&mut socket, &id, json!({"status": "Accepted"})).await;
    let (label, result) = recv(&mut rx).await;
    assert_eq!(label, "first");
    assert!(matches!(result.unwrap().status, ConfigurationStatus::Accepted));

    let (id, _, payload) = next_call(&mut socket).await;
    assert_eq!(payload["key"], "MeterValueSampleInterval");
    reply(&mut socket, &id, json!({"status": "Rejected"})).await;
    let (label, result) = recv(&mut rx).await;
    assert_eq!(label, "second");
    assert!(matches!(result.unwrap().status, ConfigurationStatus::Rejected));
    assert_eq!(central_system.pending_requests("CP002"), 0);

    central_system.stop().await;
}

#[tokio::test]
async fn timeout_frees_the_channel_for_the_next_request() {
    let (central_system, _, addr) = start_central_system(Duration::from_millis(200)).await;
    let mut socket = connect_raw(addr, "CP003").await.unwrap();
    wait_connected(&central_system, "CP003").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    central_system
        .get_configuration("CP003", vec!["HeartbeatInterval".to_string()], move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    let (_, action, _) = next_call(&mut socket).await;
    assert_eq!(action, "GetConfiguration");

    let err = recv(&mut rx).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(190));
    assert_eq!(
        err,
        RequestError::Timeout {
            action: "GetConfiguration".to_string()
        }
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    central_system
        .clear_cache("CP003", move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    let (id, action, _) = next_call(&mut socket).await;
    assert_eq!(action, "ClearCache");
    reply(&mut socket, &id, json!({"status": "Accepted"})).await;
    assert!(matches!(recv(&mut rx).await.unwrap().status, ClearCacheStatus::Accepted));

    central_system.stop().await;
}

#[tokio::test]
async fn disconnect_cancels_every_request_before_the_handler_runs() {
    let (central_system, _, addr) = start_central_system(Duration::from_secs(5)).await;
    let completed = Arc::new(AtomicUsize::new(0));

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let observed = completed.clone();
    central_system.set_charge_point_disconnected_handler(move |id| {
        let _ = seen_tx.send((id.to_string(), observed.load(Ordering::SeqCst)));
    });

    let mut socket = connect_raw(addr, "CP004").await.unwrap();
    wait_connected(&central_system, "CP004").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..3 {
        let tx = tx.clone();
        let completed = completed.clone();
        central_system
            .clear_cache("CP004", move |r| {
                completed.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(r);
            })
            .unwrap();
    }
    next_call(&mut socket).await;
    drop(socket);

    let (id, completed_before_handler) = recv(&mut seen_rx).await;
    assert_eq!(id, "CP004");
    assert_eq!(completed_before_handler, 3);
    for _ in 0..3 {
        let err = recv(&mut rx).await.unwrap_err();
        assert_eq!(err, RequestError::Disconnected);
        assert_eq!(err.code(), OcppErrorCode::GenericError);
        assert_eq!(err.to_string(), "client disconnected, no response received");
    }
    assert_eq!(central_system.pending_requests("CP004"), 0);
    wait_disconnected(&central_system, "CP004").await;

    central_system.stop().await;
}

#[tokio::test]
async fn reconnect_is_admitted_only_after_the_old_link_drains() {
    let (central_system, _, addr) = start_central_system(Duration::from_secs(5)).await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    central_system.set_charge_point_disconnected_handler(move |id| {
        let _ = seen_tx.send(id.to_string());
    });

    let mut first = connect_raw(addr, "CP009").await.unwrap();
    wait_connected(&central_system, "CP009").await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let old = tx.clone();
    central_system
        .clear_cache("CP009", move |r| {
            let _ = old.send(r);
        })
        .unwrap();
    next_call(&mut first).await;
    drop(first);

    let deadline = Instant::now() + FRAME_WAIT;
    let mut second = loop {
        match connect_raw(addr, "CP009").await {
            Ok(socket) => break socket,
            Err(WsError::Http(response)) if response.status().as_u16() == 409 => {
                assert!(Instant::now() < deadline, "old link never released the id");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(other) => panic!("reconnect failed: {other}"),
        }
    };
    // The old link was drained before the id was released.
    assert_eq!(seen_rx.try_recv().unwrap(), "CP009");
    assert_eq!(recv(&mut rx).await.unwrap_err(), RequestError::Disconnected);

    wait_connected(&central_system, "CP009").await;
    central_system
        .clear_cache("CP009", move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    let (unique_id, action, _) = next_call(&mut second).await;
    assert_eq!(action, "ClearCache");
    reply(&mut second, &unique_id, json!({"status": "Accepted"})).await;

    let response = recv(&mut rx).await.unwrap();
    assert!(matches!(response.status, ClearCacheStatus::Accepted));
    assert_eq!(central_system.pending_requests("CP009"), 0);

    central_system.stop().await;
}

#[tokio::test]
async fn charge_point_cannot_originate_central_system_actions() {
    let (central_system, handler, addr) = start_central_system(Duration::from_secs(5)).await;
    let charge_point = start_charge_point(addr, "CP005").await;

    let err = charge_point
        .send_request(ChangeAvailabilityRequest {
            connector_id: 1,
            kind: AvailabilityType::Inoperative,
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unsupported action ChangeAvailability on charge point");

    // The refused request never took the single slot.
    charge_point.heartbeat().await.unwrap();
    assert_eq!(handler.heartbeats.load(Ordering::SeqCst), 1);

    charge_point.stop();
    central_system.stop().await;
}

#[tokio::test]
async fn invalid_payloads_are_refused_before_sending() {
    let (central_system, handler, addr) = start_central_system(Duration::from_secs(5)).await;
    let charge_point = start_charge_point(addr, "CP006").await;

    let err = charge_point.authorize("A".repeat(21)).await.unwrap_err();
    match &err {
        RequestError::Validation { action, error } => {
            assert_eq!(action, "Authorize");
            assert!(matches!(
                error.code,
                OcppErrorCode::PropertyConstraintViolation | OcppErrorCode::FormationViolation
            ));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    charge_point.authorize("A".repeat(20)).await.unwrap();
    assert_eq!(handler.authorizations.load(Ordering::SeqCst), 1);

    charge_point.stop();
    central_system.stop().await;
}

#[tokio::test]
async fn second_connection_for_the_same_id_is_refused() {
    let (central_system, _, addr) = start_central_system(Duration::from_secs(5)).await;
    let _first = connect_raw(addr, "CP007").await.unwrap();
    wait_connected(&central_system, "CP007").await;

    match connect_raw(addr, "CP007").await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 409),
        Err(other) => panic!("expected HTTP 409, got {other}"),
        Ok(_) => panic!("duplicate connection was accepted"),
    }

    central_system.stop().await;
}

#[tokio::test]
async fn stopping_cancels_outstanding_requests() {
    let (central_system, _, addr) = start_central_system(Duration::from_secs(5)).await;
    let mut socket = connect_raw(addr, "CP008").await.unwrap();
    wait_connected(&central_system, "CP008").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    central_system
        .reset("CP008", ResetRequestStatus::Soft, move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    next_call(&mut socket).await;

    central_system.stop().await;
    assert_eq!(recv(&mut rx).await.unwrap_err(), RequestError::Stopped);
    assert!(matches!(
        central_system.clear_cache("CP008", |_| {}),
        Err(RequestError::Stopped)
    ));
}
