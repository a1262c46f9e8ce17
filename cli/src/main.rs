//! Example OCPP 1.6 charge point
//!
//! Connects to a central system, boots, then heartbeats at the interval
//! the central system assigned. Incoming calls are answered by stub
//! handlers backed by an in-memory configuration-key store.
//!
//! ```sh
//! CLIENT_ID=CP001 CENTRAL_SYSTEM_URL=ws://localhost:8887 charge-point
//!
//! # TLS with a private CA and a client certificate
//! TLS_ENABLED=true CA_CERTIFICATE_PATH=ca.pem \
//!   CLIENT_CERTIFICATE_PATH=cp.pem CLIENT_CERTIFICATE_KEY_PATH=cp.key \
//!   CLIENT_ID=CP001 CENTRAL_SYSTEM_URL=wss://csms.example:443/ocpp charge-point
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};

use ocpp_runtime::application::handlers::{ChargePointCoreHandler, ChargePointRemoteTriggerHandler};
use ocpp_runtime::application::registry::{CORE, REMOTE_TRIGGER};
use ocpp_runtime::application::ConfigurationStore;
use ocpp_runtime::config::{config_path_from_env, AppConfig};
use ocpp_runtime::domain::messages::*;
use ocpp_runtime::support::logging::init_tracing;
use ocpp_runtime::support::shutdown::ShutdownCoordinator;
use ocpp_runtime::{ChargePoint, HandlerResult};

const MODEL: &str = "Demo";
const VENDOR: &str = "ocpp-runtime";
const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// OCPP 1.6 charge point
#[derive(Parser, Debug)]
#[command(name = "charge-point", version, about = "Example OCPP 1.6 charge point")]
struct Cli {
    /// Identity sent as the last segment of the connection URL.
    #[arg(long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// Central system URL, without the charge point id.
    #[arg(long, env = "CENTRAL_SYSTEM_URL")]
    central_system_url: Option<String>,

    /// Connect over TLS.
    #[arg(long, env = "TLS_ENABLED")]
    tls_enabled: bool,

    /// PEM file with the root certificates to trust.
    #[arg(long, env = "CA_CERTIFICATE_PATH")]
    ca_certificate_path: Option<PathBuf>,

    /// PEM file with the client certificate chain.
    #[arg(long, env = "CLIENT_CERTIFICATE_PATH")]
    client_certificate_path: Option<PathBuf>,

    /// PEM file with the client private key.
    #[arg(long, env = "CLIENT_CERTIFICATE_KEY_PATH")]
    client_certificate_key_path: Option<PathBuf>,

    /// Path to the configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(config_path_from_env);
    let (mut app_cfg, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    if let Some(ref level) = cli.log_level {
        app_cfg.logging.level = level.clone();
    }
    init_tracing(&app_cfg.logging);
    if let Some(e) = load_error {
        info!("No usable config at {} ({}), using defaults", config_path.display(), e);
    }

    // ── Required settings ──────────────────────────────────────
    let Some(client_id) = cli.client_id.clone().filter(|id| !id.is_empty()) else {
        error!("CLIENT_ID is not set");
        return ExitCode::from(1);
    };
    let Some(url) = cli.central_system_url.clone().filter(|url| !url.is_empty()) else {
        error!("CENTRAL_SYSTEM_URL is not set");
        return ExitCode::from(1);
    };

    let mut cp_config = app_cfg.charge_point(&client_id);
    if cli.tls_enabled {
        match load_tls(&cli) {
            Ok(tls) => cp_config.client.tls = Some(tls),
            Err(e) => {
                error!("TLS setup failed: {}", e);
                return ExitCode::from(1);
            }
        }
    }

    match run(cp_config, &url, app_cfg.server.shutdown_timeout_secs).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Charge point failed: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(
    config: ocpp_runtime::ChargePointConfig,
    url: &str,
    shutdown_timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(ConfigurationStore::with_mandatory_keys(&[CORE, REMOTE_TRIGGER]));
    if let Err(missing) = store.validate_mandatory_keys(&[CORE]) {
        warn!(?missing, "Configuration store lacks mandatory keys");
    }

    let charge_point = Arc::new(ChargePoint::new(config));
    let handler = Arc::new(StubHandler { store: store.clone() });
    charge_point.set_core_handler(handler.clone());
    charge_point.set_remote_trigger_handler(handler);

    let mut errors = charge_point.errors();
    tokio::spawn(async move {
        while let Some(message) = errors.recv().await {
            warn!(event_type = message.event.event_type(), "{}", message.event);
        }
    });

    charge_point.start(url).await?;
    info!(charge_point_id = charge_point.id(), "🔌 Connected to {}", url);

    let shutdown = ShutdownCoordinator::new(Duration::from_secs(shutdown_timeout_secs));
    shutdown.start_signal_listener();
    let signal = shutdown.signal();

    tokio::select! {
        result = boot_and_heartbeat(&charge_point, &store) => {
            if let Err(e) = result {
                charge_point.stop();
                return Err(e);
            }
        }
        _ = signal.wait() => {}
    }

    charge_point.stop();
    info!("Charge point stopped");
    Ok(())
}

/// Boot until accepted, then heartbeat forever.
async fn boot_and_heartbeat(
    charge_point: &ChargePoint,
    store: &ConfigurationStore,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let boot = charge_point.boot_notification(MODEL, VENDOR).await?;
        let interval = u64::try_from(boot.interval).unwrap_or(0);
        info!(status = ?boot.status, interval, "BootNotification answered");

        if interval > 0 {
            store.declare("HeartbeatInterval", Some(interval.to_string()), false);
        }
        if matches!(boot.status, RegistrationStatus::Accepted) {
            break;
        }
        tokio::time::sleep(Duration::from_secs(interval.max(DEFAULT_HEARTBEAT_SECS))).await;
    }

    loop {
        tokio::time::sleep(heartbeat_interval(store)).await;
        match charge_point.heartbeat().await {
            Ok(response) => info!(current_time = %response.current_time, "Heartbeat"),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}

/// `HeartbeatInterval` from the store; a ChangeConfiguration applies from the
/// next beat on.
fn heartbeat_interval(store: &ConfigurationStore) -> Duration {
    let secs = store
        .get_value("HeartbeatInterval")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_HEARTBEAT_SECS);
    Duration::from_secs(secs)
}

fn load_tls(cli: &Cli) -> Result<Arc<rustls::ClientConfig>, Box<dyn std::error::Error>> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let ca_path = cli
        .ca_certificate_path
        .as_deref()
        .ok_or("CA_CERTIFICATE_PATH is required when TLS_ENABLED is set")?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in read_certificates(ca_path)? {
        roots.add(cert)?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match (&cli.client_certificate_path, &cli.client_certificate_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let chain = read_certificates(cert_path)?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
                .ok_or_else(|| format!("no private key in {}", key_path.display()))?;
            builder.with_client_auth_cert(chain, key)?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(
                "CLIENT_CERTIFICATE_PATH and CLIENT_CERTIFICATE_KEY_PATH must be set together".into(),
            )
        }
    };
    Ok(Arc::new(config))
}

fn read_certificates(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Box<dyn std::error::Error>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(format!("no certificates in {}", path.display()).into());
    }
    Ok(certs)
}

struct StubHandler {
    store: Arc<ConfigurationStore>,
}

#[async_trait]
impl ChargePointCoreHandler for StubHandler {
    async fn on_change_availability(
        &self,
        request: ChangeAvailabilityRequest,
    ) -> HandlerResult<ChangeAvailabilityResponse> {
        info!(connector_id = request.connector_id, kind = ?request.kind, "ChangeAvailability");
        Ok(ChangeAvailabilityResponse {
            status: AvailabilityStatus::Accepted,
        })
    }

    async fn on_change_configuration(
        &self,
        request: ChangeConfigurationRequest,
    ) -> HandlerResult<ChangeConfigurationResponse> {
        Ok(ChangeConfigurationResponse {
            status: self.store.update_key(&request.key, &request.value),
        })
    }

    async fn on_clear_cache(&self, _request: ClearCacheRequest) -> HandlerResult<ClearCacheResponse> {
        info!("ClearCache");
        Ok(ClearCacheResponse {
            status: ClearCacheStatus::Accepted,
        })
    }

    async fn on_data_transfer(&self, request: DataTransferRequest) -> HandlerResult<DataTransferResponse> {
        info!(vendor_id = %request.vendor_string, "DataTransfer");
        Ok(DataTransferResponse {
            status: DataTransferStatus::UnknownVendorId,
            data: None,
        })
    }

    async fn on_get_configuration(
        &self,
        request: GetConfigurationRequest,
    ) -> HandlerResult<GetConfigurationResponse> {
        Ok(self.store.answer(&request))
    }

    async fn on_remote_start_transaction(
        &self,
        request: RemoteStartTransactionRequest,
    ) -> HandlerResult<RemoteStartTransactionResponse> {
        info!(id_tag = %request.id_tag, connector_id = ?request.connector_id, "RemoteStartTransaction");
        Ok(RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        })
    }

    async fn on_remote_stop_transaction(
        &self,
        request: RemoteStopTransactionRequest,
    ) -> HandlerResult<RemoteStopTransactionResponse> {
        info!(transaction_id = request.transaction_id, "RemoteStopTransaction");
        Ok(RemoteStopTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        })
    }

    // Accepted without stopping transactions or rebooting.
    async fn on_reset(&self, request: ResetRequest) -> HandlerResult<ResetResponse> {
        info!(kind = ?request.kind, "Reset");
        Ok(ResetResponse {
            status: ResetResponseStatus::Accepted,
        })
    }

    async fn on_unlock_connector(
        &self,
        request: UnlockConnectorRequest,
    ) -> HandlerResult<UnlockConnectorResponse> {
        info!(connector_id = request.connector_id, "UnlockConnector");
        Ok(UnlockConnectorResponse {
            status: UnlockStatus::NotSupported,
        })
    }
}

#[async_trait]
impl ChargePointRemoteTriggerHandler for StubHandler {
    async fn on_trigger_message(&self, request: TriggerMessageRequest) -> HandlerResult<TriggerMessageResponse> {
        info!(
            requested_message = ?request.requested_message,
            connector_id = ?request.connector_id,
            "TriggerMessage received, not acted on"
        );
        Ok(TriggerMessageResponse {
            status: TriggerMessageStatus::Accepted,
        })
    }
}
