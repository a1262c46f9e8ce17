//! Central-system endpoint
//!
//! Wraps an [`OcppServer`] and a [`Dispatcher`] with role `CentralSystem`.
//! Each connected charge point is a channel keyed by its id; requests to one
//! charge point queue FIFO behind the one on the wire.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::application::dispatch::{Dispatcher, DispatcherConfig, RequestError};
use crate::application::events::{ErrorEvent, EventBus, EventSubscriber};
use crate::application::handlers::{invoke, CentralSystemCoreHandler, CentralSystemFirmwareHandler};
use crate::application::ports::InboundRouter;
use crate::application::registry::{FeatureRegistry, Profile, CORE, FIRMWARE_MANAGEMENT};
use crate::domain::messages::*;
use crate::domain::{OcppError, OcppRequest, Role};
use crate::interfaces::ws::{
    ChannelInfo, ConnectionHandler, DisconnectCause, OcppServer, ServerConfig, SharedSessionRegistry,
};
use crate::support::errors::TransportError;

#[derive(Debug, Clone)]
pub struct CentralSystemConfig {
    pub server: ServerConfig,
    pub profiles: Vec<Profile>,
    pub request_timeout: Duration,
    /// Requests admitted per charge point, the one on the wire included.
    pub queue_capacity: usize,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        let defaults = DispatcherConfig::central_system();
        Self {
            server: ServerConfig::default(),
            profiles: Profile::all(),
            request_timeout: defaults.request_timeout,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

pub type NewChargePointHandler = dyn Fn(&ChannelInfo) + Send + Sync;
pub type ChargePointDisconnectedHandler = dyn Fn(&str) + Send + Sync;

type Slot<T> = RwLock<Option<Arc<T>>>;

fn load<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn store<T: ?Sized>(slot: &Slot<T>, value: Arc<T>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
}

#[derive(Default)]
struct Handlers {
    core: Slot<dyn CentralSystemCoreHandler>,
    firmware: Slot<dyn CentralSystemFirmwareHandler>,
    new_charge_point: Slot<NewChargePointHandler>,
    disconnected: Slot<ChargePointDisconnectedHandler>,
}

pub struct CentralSystem {
    dispatcher: Dispatcher,
    server: OcppServer,
    handlers: Arc<Handlers>,
    events: EventBus,
}

impl CentralSystem {
    pub fn new(config: CentralSystemConfig) -> Self {
        let events = EventBus::new();
        let server = OcppServer::new(config.server);
        let handlers = Arc::new(Handlers::default());
        let router = Arc::new(CentralSystemRouter {
            handlers: handlers.clone(),
        });

        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                role: Role::CentralSystem,
                request_timeout: config.request_timeout,
                queue_capacity: config.queue_capacity.max(1),
            },
            Arc::new(FeatureRegistry::new(config.profiles)),
            server.sessions(),
            router,
            events.clone(),
        );

        Self {
            dispatcher,
            server,
            handlers,
            events,
        }
    }

    // ── Handlers ───────────────────────────────────────────

    pub fn set_core_handler(&self, handler: Arc<dyn CentralSystemCoreHandler>) {
        store(&self.handlers.core, handler);
    }

    pub fn set_firmware_management_handler(&self, handler: Arc<dyn CentralSystemFirmwareHandler>) {
        store(&self.handlers.firmware, handler);
    }

    /// Called after a charge point completed its handshake.
    pub fn set_new_charge_point_handler<F>(&self, handler: F)
    where
        F: Fn(&ChannelInfo) + Send + Sync + 'static,
    {
        store(&self.handlers.new_charge_point, Arc::new(handler) as Arc<NewChargePointHandler>);
    }

    /// Called after a charge point's link is gone and its pending requests
    /// have been cancelled.
    pub fn set_charge_point_disconnected_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        store(
            &self.handlers.disconnected,
            Arc::new(handler) as Arc<ChargePointDisconnectedHandler>,
        );
    }

    // ── Lifecycle ──────────────────────────────────────────

    /// Start listening. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        if self.dispatcher.is_stopped() {
            return Err(TransportError::Stopped);
        }
        let link = Arc::new(CentralSystemLink {
            dispatcher: self.dispatcher.clone(),
            handlers: self.handlers.clone(),
            events: self.events.clone(),
        });
        self.server.start(link).await
    }

    /// Cancel pending requests with `Stopped`, close every connection and
    /// end the error stream. A stopped central system cannot be restarted.
    pub async fn stop(&self) {
        info!("Stopping central system");
        self.dispatcher.stop();
        self.server.stop().await;
        self.events.close();
    }

    pub fn errors(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> SharedSessionRegistry {
        self.server.sessions()
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.server.sessions().is_connected(charge_point_id)
    }

    /// Requests to `charge_point_id` on the wire or waiting.
    pub fn pending_requests(&self, charge_point_id: &str) -> usize {
        self.dispatcher.in_flight(charge_point_id) + self.dispatcher.queued(charge_point_id)
    }

    // ── Outgoing requests ──────────────────────────────────

    /// Send any request this role may originate and wait for the response.
    pub async fn send_request<R: OcppRequest>(
        &self,
        charge_point_id: &str,
        request: R,
    ) -> Result<R::Response, RequestError> {
        self.dispatcher.call(charge_point_id, request).await
    }

    /// Send a request; `callback` receives the outcome. An `Err` return
    /// means the request was refused and `callback` will not run.
    pub fn send_request_async<R, F>(
        &self,
        charge_point_id: &str,
        request: R,
        callback: F,
    ) -> Result<(), RequestError>
    where
        R: OcppRequest,
        F: FnOnce(Result<R::Response, RequestError>) + Send + 'static,
    {
        self.dispatcher.call_with(charge_point_id, request, callback)
    }

    pub fn change_availability<F>(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        kind: AvailabilityType,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ChangeAvailabilityResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            ChangeAvailabilityRequest { connector_id, kind },
            callback,
        )
    }

    pub fn change_configuration<F>(
        &self,
        charge_point_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ChangeConfigurationResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            ChangeConfigurationRequest {
                key: key.into(),
                value: value.into(),
            },
            callback,
        )
    }

    pub fn clear_cache<F>(&self, charge_point_id: &str, callback: F) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ClearCacheResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(charge_point_id, ClearCacheRequest {}, callback)
    }

    pub fn data_transfer<F>(
        &self,
        charge_point_id: &str,
        vendor_id: impl Into<String>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<DataTransferResponse, RequestError>) + Send + 'static,
    {
        let request = DataTransferRequest {
            vendor_string: vendor_id.into(),
            message_id: None,
            data: None,
        };
        self.send_request_async(charge_point_id, request, callback)
    }

    /// An empty `keys` asks for every key.
    pub fn get_configuration<F>(
        &self,
        charge_point_id: &str,
        keys: Vec<String>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<GetConfigurationResponse, RequestError>) + Send + 'static,
    {
        let request = GetConfigurationRequest {
            key: (!keys.is_empty()).then_some(keys),
        };
        self.send_request_async(charge_point_id, request, callback)
    }

    pub fn remote_start_transaction<F>(
        &self,
        charge_point_id: &str,
        id_tag: impl Into<String>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<RemoteStartTransactionResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            RemoteStartTransactionRequest {
                connector_id: None,
                id_tag: id_tag.into(),
                charging_profile: None,
            },
            callback,
        )
    }

    pub fn remote_stop_transaction<F>(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<RemoteStopTransactionResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            RemoteStopTransactionRequest { transaction_id },
            callback,
        )
    }

    pub fn reset<F>(
        &self,
        charge_point_id: &str,
        kind: ResetRequestStatus,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ResetResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(charge_point_id, ResetRequest { kind }, callback)
    }

    pub fn unlock_connector<F>(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<UnlockConnectorResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            UnlockConnectorRequest { connector_id },
            callback,
        )
    }

    pub fn get_local_list_version<F>(&self, charge_point_id: &str, callback: F) -> Result<(), RequestError>
    where
        F: FnOnce(Result<GetLocalListVersionResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(charge_point_id, GetLocalListVersionRequest {}, callback)
    }

    pub fn send_local_list<F>(
        &self,
        charge_point_id: &str,
        list_version: i32,
        update_type: UpdateType,
        entries: Vec<AuthorizationData>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<SendLocalListResponse, RequestError>) + Send + 'static,
    {
        let request = SendLocalListRequest {
            list_version,
            local_authorization_list: (!entries.is_empty()).then_some(entries),
            update_type,
        };
        self.send_request_async(charge_point_id, request, callback)
    }

    pub fn get_diagnostics<F>(
        &self,
        charge_point_id: &str,
        location: impl Into<String>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<GetDiagnosticsResponse, RequestError>) + Send + 'static,
    {
        let request = GetDiagnosticsRequest {
            location: location.into(),
            retries: None,
            retry_interval: None,
            start_time: None,
            stop_time: None,
        };
        self.send_request_async(charge_point_id, request, callback)
    }

    pub fn update_firmware<F>(
        &self,
        charge_point_id: &str,
        location: impl Into<String>,
        retrieve_date: DateTime<Utc>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<UpdateFirmwareResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            UpdateFirmwareRequest {
                location: location.into(),
                retries: None,
                retrieve_date,
                retry_interval: None,
            },
            callback,
        )
    }

    pub fn reserve_now<F>(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        expiry_date: DateTime<Utc>,
        id_tag: impl Into<String>,
        reservation_id: i32,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ReserveNowResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            ReserveNowRequest {
                connector_id,
                expiry_date,
                id_tag: id_tag.into(),
                parent_id_tag: None,
                reservation_id,
            },
            callback,
        )
    }

    pub fn cancel_reservation<F>(
        &self,
        charge_point_id: &str,
        reservation_id: i32,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<CancelReservationResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            CancelReservationRequest { reservation_id },
            callback,
        )
    }

    pub fn trigger_message<F>(
        &self,
        charge_point_id: &str,
        requested_message: MessageTrigger,
        connector_id: Option<u32>,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<TriggerMessageResponse, RequestError>) + Send + 'static,
    {
        let request = TriggerMessageRequest {
            requested_message,
            connector_id,
        };
        self.send_request_async(charge_point_id, request, callback)
    }

    pub fn set_charging_profile<F>(
        &self,
        charge_point_id: &str,
        connector_id: i32,
        profile: ChargingProfile,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<SetChargingProfileResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            SetChargingProfileRequest {
                connector_id,
                cs_charging_profiles: profile,
            },
            callback,
        )
    }

    pub fn clear_charging_profile<F>(
        &self,
        charge_point_id: &str,
        request: ClearChargingProfileRequest,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<ClearChargingProfileResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(charge_point_id, request, callback)
    }

    pub fn get_composite_schedule<F>(
        &self,
        charge_point_id: &str,
        connector_id: i32,
        duration: i32,
        callback: F,
    ) -> Result<(), RequestError>
    where
        F: FnOnce(Result<GetCompositeScheduleResponse, RequestError>) + Send + 'static,
    {
        self.send_request_async(
            charge_point_id,
            GetCompositeScheduleRequest {
                connector_id,
                duration,
                charging_rate_unit: None,
            },
            callback,
        )
    }
}

/// Transport upcalls for every charge-point link.
struct CentralSystemLink {
    dispatcher: Dispatcher,
    handlers: Arc<Handlers>,
    events: EventBus,
}

impl ConnectionHandler for CentralSystemLink {
    fn on_connect(&self, channel: &ChannelInfo) {
        metrics::gauge!("ocpp_connected_charge_points").increment(1.0);
        info!(charge_point_id = %channel.id, subprotocol = %channel.subprotocol, "New charge point");
        if let Some(handler) = load(&self.handlers.new_charge_point) {
            handler(channel);
        }
    }

    fn on_message(&self, channel: &str, text: &str) {
        self.dispatcher.handle_incoming(channel, text);
    }

    fn on_disconnect(&self, channel: &str, cause: DisconnectCause) {
        metrics::gauge!("ocpp_connected_charge_points").decrement(1.0);
        let drained = self.dispatcher.drain_channel(channel, RequestError::Disconnected);
        warn!(charge_point_id = channel, %cause, drained, "Charge point disconnected");
        self.events.publish(ErrorEvent::Disconnected {
            channel: channel.to_string(),
            drained,
        });
        if let Some(handler) = load(&self.handlers.disconnected) {
            handler(channel);
        }
    }
}

/// Routes charge-point calls to the profile handlers.
struct CentralSystemRouter {
    handlers: Arc<Handlers>,
}

#[async_trait]
impl InboundRouter for CentralSystemRouter {
    async fn route(
        &self,
        channel: &str,
        profile: &'static str,
        action: &str,
        payload: Value,
    ) -> Result<Value, OcppError> {
        let unsupported = || OcppError::not_supported(action, profile);
        let id = channel;

        match profile {
            CORE => {
                let h = load(&self.handlers.core).ok_or_else(unsupported)?;
                match action {
                    "Authorize" => invoke::<AuthorizeRequest, _, _>(payload, |r| h.on_authorize(id, r)).await,
                    "BootNotification" => {
                        invoke::<BootNotificationRequest, _, _>(payload, |r| h.on_boot_notification(id, r)).await
                    }
                    "DataTransfer" => {
                        invoke::<DataTransferRequest, _, _>(payload, |r| h.on_data_transfer(id, r)).await
                    }
                    "Heartbeat" => invoke::<HeartbeatRequest, _, _>(payload, |r| h.on_heartbeat(id, r)).await,
                    "MeterValues" => {
                        invoke::<MeterValuesRequest, _, _>(payload, |r| h.on_meter_values(id, r)).await
                    }
                    "StartTransaction" => {
                        invoke::<StartTransactionRequest, _, _>(payload, |r| h.on_start_transaction(id, r)).await
                    }
                    "StatusNotification" => {
                        invoke::<StatusNotificationRequest, _, _>(payload, |r| {
                            h.on_status_notification(id, r)
                        })
                        .await
                    }
                    "StopTransaction" => {
                        invoke::<StopTransactionRequest, _, _>(payload, |r| h.on_stop_transaction(id, r)).await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            FIRMWARE_MANAGEMENT => {
                let h = load(&self.handlers.firmware).ok_or_else(unsupported)?;
                match action {
                    "DiagnosticsStatusNotification" => {
                        invoke::<DiagnosticsStatusNotificationRequest, _, _>(payload, |r| {
                            h.on_diagnostics_status_notification(id, r)
                        })
                        .await
                    }
                    "FirmwareStatusNotification" => {
                        invoke::<FirmwareStatusNotificationRequest, _, _>(payload, |r| {
                            h.on_firmware_status_notification(id, r)
                        })
                        .await
                    }
                    _ => Err(OcppError::not_implemented(action)),
                }
            }
            _ => Err(unsupported()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OcppErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn missing_core_handler_is_not_supported() {
        let router = CentralSystemRouter {
            handlers: Arc::new(Handlers::default()),
        };
        let err = router
            .route("CP001", CORE, "Heartbeat", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, OcppErrorCode::NotSupported);
    }

    #[tokio::test]
    async fn profiles_without_inbound_actions_are_not_supported() {
        let router = CentralSystemRouter {
            handlers: Arc::new(Handlers::default()),
        };
        let err = router
            .route("CP001", crate::application::registry::RESERVATION, "ReserveNow", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, OcppErrorCode::NotSupported);
    }

    #[tokio::test]
    async fn requests_to_unknown_charge_points_fail_to_send() {
        let central_system = CentralSystem::new(CentralSystemConfig::default());
        let err = central_system
            .clear_cache("CP404", |_| panic!("refused requests never complete"))
            .unwrap_err();
        assert!(matches!(err, RequestError::SendFailed(_)));
        assert_eq!(central_system.pending_requests("CP404"), 0);

        let err = central_system
            .send_request("CP404", HeartbeatRequest {})
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported action Heartbeat on central system");
    }
}
