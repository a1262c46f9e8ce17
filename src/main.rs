//! OCPP Central System
//!
//! Accepts OCPP 1.6 charge points over WebSocket and answers the Core and
//! Firmware Management calls they originate.
//! Reads configuration from TOML file (~/.config/ocpp-runtime/config.toml).

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use ocpp_runtime::application::handlers::{CentralSystemCoreHandler, CentralSystemFirmwareHandler};
use ocpp_runtime::config::{config_path_from_env, AppConfig};
use ocpp_runtime::domain::messages::*;
use ocpp_runtime::support::logging::init_tracing;
use ocpp_runtime::support::shutdown::ShutdownCoordinator;
use ocpp_runtime::{CentralSystem, HandlerResult};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = config_path_from_env();
    let (app_cfg, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    init_tracing(&app_cfg.logging);
    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) => error!("Failed to load config: {}. Using defaults.", e),
    }

    info!("Starting OCPP Central System...");

    // ── Prometheus metrics (optional) ──────────────────────────
    if app_cfg.metrics.enabled {
        let listen: std::net::SocketAddr = app_cfg.metrics.listen.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()?;
        info!("📊 Prometheus exporter listening on {}", listen);
    }

    // ── Central system ─────────────────────────────────────────
    let heartbeat_interval = app_cfg.server.heartbeat_interval_secs;
    let central_system = Arc::new(CentralSystem::new(app_cfg.central_system()));
    let handler = Arc::new(DemoCentralSystem::new(heartbeat_interval));
    central_system.set_core_handler(handler.clone());
    central_system.set_firmware_management_handler(handler);
    central_system.set_new_charge_point_handler(|info| {
        info!(
            charge_point_id = %info.id,
            subprotocol = %info.subprotocol,
            remote_addr = ?info.remote_addr,
            "🔌 Charge point connected"
        );
    });
    central_system.set_charge_point_disconnected_handler(|charge_point_id| {
        info!(charge_point_id, "Charge point disconnected");
    });

    let mut errors = central_system.errors();
    tokio::spawn(async move {
        while let Some(message) = errors.recv().await {
            warn!(
                event_type = message.event.event_type(),
                channel = message.event.channel(),
                "{}",
                message.event
            );
        }
    });

    let addr = central_system.start().await?;
    info!("🚀 Listening for charge points on ws://{}", addr);

    // ── Shutdown ───────────────────────────────────────────────
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(app_cfg.server.shutdown_timeout_secs));
    shutdown.start_signal_listener();
    let completed = shutdown
        .shutdown_with_cleanup(|| {
            let central_system = central_system.clone();
            async move { central_system.stop().await }
        })
        .await;
    if !completed {
        warn!("Some connections did not close in time");
    }

    info!("Central system stopped");
    Ok(())
}

fn accepted() -> IdTagInfo {
    IdTagInfo {
        status: AuthorizationStatus::Accepted,
        expiry_date: None,
        parent_id_tag: None,
    }
}

/// Accepts every charge point and id tag.
struct DemoCentralSystem {
    heartbeat_interval: u32,
    next_transaction_id: AtomicI32,
}

impl DemoCentralSystem {
    fn new(heartbeat_interval: u32) -> Self {
        Self {
            heartbeat_interval,
            next_transaction_id: AtomicI32::new(1),
        }
    }
}

#[async_trait]
impl CentralSystemCoreHandler for DemoCentralSystem {
    async fn on_authorize(&self, charge_point_id: &str, request: AuthorizeRequest) -> HandlerResult<AuthorizeResponse> {
        info!(charge_point_id, id_tag = %request.id_tag, "Authorize");
        Ok(AuthorizeResponse {
            id_tag_info: accepted(),
        })
    }

    async fn on_boot_notification(
        &self,
        charge_point_id: &str,
        request: BootNotificationRequest,
    ) -> HandlerResult<BootNotificationResponse> {
        info!(
            charge_point_id,
            vendor = %request.charge_point_vendor,
            model = %request.charge_point_model,
            "BootNotification"
        );
        Ok(BootNotificationResponse {
            current_time: Utc::now(),
            interval: self.heartbeat_interval,
            status: RegistrationStatus::Accepted,
        })
    }

    async fn on_data_transfer(
        &self,
        charge_point_id: &str,
        request: DataTransferRequest,
    ) -> HandlerResult<DataTransferResponse> {
        info!(charge_point_id, vendor_id = %request.vendor_string, "DataTransfer");
        Ok(DataTransferResponse {
            status: DataTransferStatus::UnknownVendorId,
            data: None,
        })
    }

    async fn on_heartbeat(&self, charge_point_id: &str, _request: HeartbeatRequest) -> HandlerResult<HeartbeatResponse> {
        tracing::debug!(charge_point_id, "Heartbeat");
        Ok(HeartbeatResponse {
            current_time: Utc::now(),
        })
    }

    async fn on_meter_values(
        &self,
        charge_point_id: &str,
        request: MeterValuesRequest,
    ) -> HandlerResult<MeterValuesResponse> {
        info!(
            charge_point_id,
            connector_id = request.connector_id,
            samples = request.meter_value.len(),
            "MeterValues"
        );
        Ok(MeterValuesResponse {})
    }

    async fn on_start_transaction(
        &self,
        charge_point_id: &str,
        request: StartTransactionRequest,
    ) -> HandlerResult<StartTransactionResponse> {
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        info!(
            charge_point_id,
            connector_id = request.connector_id,
            transaction_id,
            "StartTransaction"
        );
        Ok(StartTransactionResponse {
            id_tag_info: accepted(),
            transaction_id,
        })
    }

    async fn on_status_notification(
        &self,
        charge_point_id: &str,
        request: StatusNotificationRequest,
    ) -> HandlerResult<StatusNotificationResponse> {
        info!(
            charge_point_id,
            connector_id = request.connector_id,
            status = ?request.status,
            error_code = ?request.error_code,
            "StatusNotification"
        );
        Ok(StatusNotificationResponse {})
    }

    async fn on_stop_transaction(
        &self,
        charge_point_id: &str,
        request: StopTransactionRequest,
    ) -> HandlerResult<StopTransactionResponse> {
        info!(
            charge_point_id,
            transaction_id = request.transaction_id,
            meter_stop = request.meter_stop,
            "StopTransaction"
        );
        Ok(StopTransactionResponse { id_tag_info: None })
    }
}

#[async_trait]
impl CentralSystemFirmwareHandler for DemoCentralSystem {
    async fn on_diagnostics_status_notification(
        &self,
        charge_point_id: &str,
        request: DiagnosticsStatusNotificationRequest,
    ) -> HandlerResult<DiagnosticsStatusNotificationResponse> {
        info!(charge_point_id, status = ?request.status, "DiagnosticsStatusNotification");
        Ok(DiagnosticsStatusNotificationResponse {})
    }

    async fn on_firmware_status_notification(
        &self,
        charge_point_id: &str,
        request: FirmwareStatusNotificationRequest,
    ) -> HandlerResult<FirmwareStatusNotificationResponse> {
        info!(charge_point_id, status = ?request.status, "FirmwareStatusNotification");
        Ok(FirmwareStatusNotificationResponse {})
    }
}
