//! Handlers a central system registers for charge-point-originated calls.
//!
//! Every method receives the id of the charge point that sent the call.

use async_trait::async_trait;

use super::HandlerResult;
use crate::domain::messages::*;

#[async_trait]
pub trait CentralSystemCoreHandler: Send + Sync {
    async fn on_authorize(
        &self,
        charge_point_id: &str,
        request: AuthorizeRequest,
    ) -> HandlerResult<AuthorizeResponse>;

    async fn on_boot_notification(
        &self,
        charge_point_id: &str,
        request: BootNotificationRequest,
    ) -> HandlerResult<BootNotificationResponse>;

    async fn on_data_transfer(
        &self,
        charge_point_id: &str,
        request: DataTransferRequest,
    ) -> HandlerResult<DataTransferResponse>;

    async fn on_heartbeat(
        &self,
        charge_point_id: &str,
        request: HeartbeatRequest,
    ) -> HandlerResult<HeartbeatResponse>;

    async fn on_meter_values(
        &self,
        charge_point_id: &str,
        request: MeterValuesRequest,
    ) -> HandlerResult<MeterValuesResponse>;

    async fn on_start_transaction(
        &self,
        charge_point_id: &str,
        request: StartTransactionRequest,
    ) -> HandlerResult<StartTransactionResponse>;

    async fn on_status_notification(
        &self,
        charge_point_id: &str,
        request: StatusNotificationRequest,
    ) -> HandlerResult<StatusNotificationResponse>;

    async fn on_stop_transaction(
        &self,
        charge_point_id: &str,
        request: StopTransactionRequest,
    ) -> HandlerResult<StopTransactionResponse>;
}

#[async_trait]
pub trait CentralSystemFirmwareHandler: Send + Sync {
    async fn on_diagnostics_status_notification(
        &self,
        charge_point_id: &str,
        request: DiagnosticsStatusNotificationRequest,
    ) -> HandlerResult<DiagnosticsStatusNotificationResponse>;

    async fn on_firmware_status_notification(
        &self,
        charge_point_id: &str,
        request: FirmwareStatusNotificationRequest,
    ) -> HandlerResult<FirmwareStatusNotificationResponse>;
}
