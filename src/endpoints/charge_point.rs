//! Charge-point endpoint
//!
//! Wraps a [`WsClient`] and a [`Dispatcher`] with role `ChargePoint`. Every
//! request travels on the single channel [`CHARGE_POINT_CHANNEL`] and at most
//! one is pending at a time.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::application::dispatch::{
    Dispatcher, DispatcherConfig, RequestError, CHARGE_POINT_CHANNEL,
};
use crate::application::events::{ErrorEvent, EventBus, EventSubscriber};
use crate::application::handlers::{
    invoke, ChargePointCoreHandler, ChargePointFirmwareHandler, ChargePointLocalAuthListHandler,
    ChargePointRemoteTriggerHandler, ChargePointReservationHandler,
    ChargePointSmartChargingHandler,
};
use crate::application::ports::InboundRouter;
use crate::application::registry::{
    FeatureRegistry, Profile, CORE, FIRMWARE_MANAGEMENT, LOCAL_AUTH_LIST_MANAGEMENT,
    REMOTE_TRIGGER, RESERVATION, SMART_CHARGING,
};
use crate::domain::messages::*;
use crate::domain::{OcppError, OcppRequest, Role};
use crate::interfaces::ws::{ChannelInfo, ClientConfig, ConnectionHandler, DisconnectCause, WsClient};
use crate::support::errors::TransportError;

#[derive(Debug, Clone)]
pub struct ChargePointConfig {
    /// Identity sent as the last segment of the connection URL.
    pub client_id: String,
    pub profiles: Vec<Profile>,
    pub request_timeout: Duration,
    /// Requests admitted at once, the pending one included.
    pub queue_capacity: usize,
    pub client: ClientConfig,
}

impl ChargePointConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        let defaults = DispatcherConfig::charge_point();
        Self {
            client_id: client_id.into(),
            profiles: Profile::all(),
            request_timeout: defaults.request_timeout,
            queue_capacity: defaults.queue_capacity,
            client: ClientConfig::default(),
        }
    }
}

type Slot<T> = RwLock<Option<Arc<T>>>;

fn load<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn store<T: ?Sized>(slot: &Slot<T>, handler: Arc<T>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
}

#[derive(Default)]
struct Handlers {
    core: Slot<dyn ChargePointCoreHandler>,
    firmware: Slot<dyn ChargePointFirmwareHandler>,
    local_auth_list: Slot<dyn ChargePointLocalAuthListHandler>,
    reservation: Slot<dyn ChargePointReservationHandler>,
    remote_trigger: Slot<dyn ChargePointRemoteTriggerHandler>,
    smart_charging: Slot<dyn ChargePointSmartChargingHandler>,
}

pub struct ChargePoint {
    id: String,
    dispatcher: Dispatcher,
    client: Arc<WsClient>,
    handlers: Arc<Handlers>,
    events: EventBus,
}

impl ChargePoint {
    pub fn new(config: ChargePointConfig) -> Self {
        let events = EventBus::new();
        let client = Arc::new(WsClient::new(config.client));
        let handlers = Arc::new(Handlers::default());
        let router = Arc::new(ChargePointRouter {
            handlers: handlers.clone(),
        });

        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                role: Role::ChargePoint,
                request_timeout: config.request_timeout,
                queue_capacity: config.queue_capacity.max(1),
            },
            Arc::new(FeatureRegistry::new(config.profiles)),
            client.clone(),
            router,
            events.clone(),
        );

        Self {
            id: config.client_id,
            dispatcher,
            client,
            handlers,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // ── Handlers ───────────────────────────────────────────

    pub fn set_core_handler(&self, handler: Arc<dyn ChargePointCoreHandler>) {
        store(&self.handlers.core, handler);
    }

    pub fn set_firmware_management_handler(&self, handler: Arc<dyn ChargePointFirmwareHandler>) {
        store(&self.handlers.firmware, handler);
    }

    pub fn set_local_auth_list_handler(&self, handler: Arc<dyn ChargePointLocalAuthListHandler>) {
        store(&self.handlers.local_auth_list, handler);
    }

    pub fn set_reservation_handler(&self, handler: Arc<dyn ChargePointReservationHandler>) {
        store(&self.handlers.reservation, handler);
    }

    pub fn set_remote_trigger_handler(&self, handler: Arc<dyn ChargePointRemoteTriggerHandler>) {
        store(&self.handlers.remote_trigger, handler);
    }

    pub fn set_smart_charging_handler(&self, handler: Arc<dyn ChargePointSmartChargingHandler>) {
        store(&self.handlers.smart_charging, handler);
    }

    // ── Lifecycle ──────────────────────────────────────────

    /// Connect to `<central_system_url>/<client id>`.
    pub async fn start(&self, central_system_url: &str) -> Result<(), TransportError> {
        if self.dispatcher.is_stopped() {
            return Err(TransportError::Stopped);
        }
        let url = format!("{}/{}", central_system_url.trim_end_matches('/'), self.id);
        info!(charge_point_id = %self.id, url = %url, "Starting charge point");

        let link = Arc::new(ChargePointLink {
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
        });
        self.client.start(&url, link).await
    }

    /// Cancel pending requests with `Stopped`, close the link and end the
    /// error stream. A stopped charge point cannot be restarted.
    pub fn stop(&self) {
        info!(charge_point_id = %self.id, "Stopping charge point");
        self.dispatcher.stop();
        self.client.stop();
        self.events.close();
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Background failures: rejected frames, orphan responses, failing
    /// handlers, dropped connections.
    pub fn errors(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    // ── Outgoing requests ──────────────────────────────────

    /// Send any request this role may originate and wait for the response.
    pub async fn send_request<R: OcppRequest>(&self, request: R) -> Result<R::Response, RequestError> {
        self.dispatcher.call(CHARGE_POINT_CHANNEL, request).await
    }

    /// Send a request; `callback` receives the outcome.
    pub fn send_request_async<R, F>(&self, request: R, callback: F) -> Result<(), RequestError>
    where
        R: OcppRequest,
        F: FnOnce(Result<R::Response, RequestError>) + Send + 'static,
    {
        self.dispatcher
            .call_with(CHARGE_POINT_CHANNEL, request, callback)
    }

    pub async fn boot_notification(
        &self,
        model: impl Into<String>,
        vendor: impl Into<String>,
    ) -> Result<BootNotificationResponse, RequestError> {
        self.send_request(BootNotificationRequest {
            charge_box_serial_number: None,
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_point_vendor: vendor.into(),
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_serial_number: None,
            meter_type: None,
        })
        .await
    }

    pub async fn authorize(&self, id_tag: impl Into<String>) -> Result<AuthorizeResponse, RequestError> {
        self.send_request(AuthorizeRequest { id_tag: id_tag.into() }).await
    }

    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, RequestError> {
        self.send_request(HeartbeatRequest {}).await
    }

    pub async fn meter_values(
        &self,
        connector_id: u32,
        transaction_id: Option<i32>,
        values: Vec<MeterValue>,
    ) -> Result<MeterValuesResponse, RequestError> {
        self.send_request(MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: values,
        })
        .await
    }

    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: i32,
        timestamp: DateTime<Utc>,
    ) -> Result<StartTransactionResponse, RequestError> {
        self.send_request(StartTransactionRequest {
            connector_id,
            id_tag: id_tag.into(),
            meter_start,
            reservation_id: None,
            timestamp,
        })
        .await
    }

    pub async fn stop_transaction(
        &self,
        meter_stop: i32,
        timestamp: DateTime<Utc>,
        transaction_id: i32,
    ) -> Result<StopTransactionResponse, RequestError> {
        self.send_request(StopTransactionRequest {
            id_tag: None,
            meter_stop,
            timestamp,
            transaction_id,
            reason: None,
            transaction_data: None,
        })
        .await
    }

    pub async fn status_notification(
        &self,
        connector_id: u32,
        error_code: ChargePointErrorCode,
        status: ChargePointStatus,
    ) -> Result<StatusNotificationResponse, RequestError> {
        self.send_request(StatusNotificationRequest {
            connector_id,
            error_code,
            info: None,
            status,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        })
        .await
    }

    pub async fn data_transfer(
        &self,
        vendor_id: impl Into<String>,
        message_id: Option<String>,
        data: Option<String>,
    ) -> Result<DataTransferResponse, RequestError> {
        self.send_request(DataTransferRequest {
            vendor_string: vendor_id.into(),
            message_id,
            data,
        })
        .await
    }

    pub async fn diagnostics_status_notification(
        &self,
        status: DiagnosticsStatus,
    ) -> Result<DiagnosticsStatusNotificationResponse, RequestError> {
        self.send_request(DiagnosticsStatusNotificationRequest { status })
            .await
    }

    pub async fn firmware_status_notification(
        &self,
        status: FirmwareStatus,
    ) -> Result<FirmwareStatusNotificationResponse, RequestError> {
        self.send_request(FirmwareStatusNotificationRequest { status })
            .await
    }
}

/// Transport upcalls of the charge point's link.
struct ChargePointLink {
    dispatcher: Dispatcher,
    events: EventBus,
}

impl ConnectionHandler for ChargePointLink {
    fn on_connect(&self, channel: &ChannelInfo) {
        info!(charge_point_id = %channel.id, subprotocol = %channel.subprotocol, "Link to central system up");
    }

    fn on_message(&self, _channel: &str, text: &str) {
        self.dispatcher.handle_incoming(CHARGE_POINT_CHANNEL, text);
    }

    fn on_disconnect(&self, channel: &str, cause: DisconnectCause) {
        let drained = self
            .dispatcher
            .drain_channel(CHARGE_POINT_CHANNEL, RequestError::Disconnected);
        warn!(charge_point_id = channel, %cause, drained, "Link to central system down");
        self.events.publish(ErrorEvent::Disconnected {
            channel: CHARGE_POINT_CHANNEL.to_string(),
            drained,
        });
    }
}

/// Routes central-system calls to the profile handlers.
struct ChargePointRouter {
    handlers: Arc<Handlers>,
}

#[async_trait]
impl InboundRouter for ChargePointRouter {
    async fn route(
        &self,
        _channel: &str,
        profile: &'static str,
        action: &str,
        payload: Value,
    ) -> Result<Value, OcppError> {
        let unsupported = || OcppError::not_supported(action, profile);
        let handlers = &self.handlers;

        match profile {
            CORE => {
                let h = load(&handlers.core).ok_or_else(unsupported)?;
                match action {
                    "ChangeAvailability" => {
                        invoke::<ChangeAvailabilityRequest, _, _>(payload, |r| h.on_change_availability(r)).await
                    }
                    "ChangeConfiguration" => {
                        invoke::<ChangeConfigurationRequest, _, _>(payload, |r| h.on_change_configuration(r)).await
                    }
                    "ClearCache" => invoke::<ClearCacheRequest, _, _>(payload, |r| h.on_clear_cache(r)).await,
                    "DataTransfer" => invoke::<DataTransferRequest, _, _>(payload, |r| h.on_data_transfer(r)).await,
                    "GetConfiguration" => {
                        invoke::<GetConfigurationRequest, _, _>(payload, |r| h.on_get_configuration(r)).await
                    }
                    "RemoteStartTransaction" => {
                        invoke::<RemoteStartTransactionRequest, _, _>(payload, |r| {
                            h.on_remote_start_transaction(r)
                        })
                        .await
                    }
                    "RemoteStopTransaction" => {
                        invoke::<RemoteStopTransactionRequest, _, _>(payload, |r| {
                            h.on_remote_stop_transaction(r)
                        })
                        .await
                    }
                    "Reset" => invoke::<ResetRequest, _, _>(payload, |r| h.on_reset(r)).await,
                    "UnlockConnector" => {
                        invoke::<UnlockConnectorRequest, _, _>(payload, |r| h.on_unlock_connector(r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            FIRMWARE_MANAGEMENT => {
                let h = load(&handlers.firmware).ok_or_else(unsupported)?;
                match action {
                    "GetDiagnostics" => {
                        invoke::<GetDiagnosticsRequest, _, _>(payload, |r| h.on_get_diagnostics(r)).await
                    }
                    "UpdateFirmware" => {
                        invoke::<UpdateFirmwareRequest, _, _>(payload, |r| h.on_update_firmware(r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            LOCAL_AUTH_LIST_MANAGEMENT => {
                let h = load(&handlers.local_auth_list).ok_or_else(unsupported)?;
                match action {
                    "GetLocalListVersion" => {
                        invoke::<GetLocalListVersionRequest, _, _>(payload, |r| h.on_get_local_list_version(r))
                            .await
                    }
                    "SendLocalList" => {
                        invoke::<SendLocalListRequest, _, _>(payload, |r| h.on_send_local_list(r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            RESERVATION => {
                let h = load(&handlers.reservation).ok_or_else(unsupported)?;
                match action {
                    "ReserveNow" => invoke::<ReserveNowRequest, _, _>(payload, |r| h.on_reserve_now(r)).await,
                    "CancelReservation" => {
                        invoke::<CancelReservationRequest, _, _>(payload, |r| h.on_cancel_reservation(r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            REMOTE_TRIGGER => {
                let h = load(&handlers.remote_trigger).ok_or_else(unsupported)?;
                match action {
                    "TriggerMessage" => {
                        invoke::<TriggerMessageRequest, _, _>(payload, |r| h.on_trigger_message(r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            SMART_CHARGING => {
                let h = load(&handlers.smart_charging).ok_or_else(unsupported)?;
                match action {
                    "SetChargingProfile" => {
                        invoke::<SetChargingProfileRequest, _, _>(payload, |r| h.on_set_charging_profile(r)).await
                    }
                    "ClearChargingProfile" => {
                        invoke::<ClearChargingProfileRequest, _, _>(payload, |r| h.on_clear_charging_profile(r))
                            .await
                    }
                    "GetCompositeSchedule" => {
                        invoke::<GetCompositeScheduleRequest, _, _>(payload, |r| h.on_get_composite_schedule(r))
                            .await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            _ => Err(unsupported()),
        }
    }
}
