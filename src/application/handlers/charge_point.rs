//! Handlers a charge point registers for central-system-originated calls.

use async_trait::async_trait;

use super::HandlerResult;
use crate::domain::messages::*;

#[async_trait]
pub trait ChargePointCoreHandler: Send + Sync {
    async fn on_change_availability(
        &self,
        request: ChangeAvailabilityRequest,
    ) -> HandlerResult<ChangeAvailabilityResponse>;

    async fn on_change_configuration(
        &self,
        request: ChangeConfigurationRequest,
    ) -> HandlerResult<ChangeConfigurationResponse>;

    async fn on_clear_cache(&self, request: ClearCacheRequest) -> HandlerResult<ClearCacheResponse>;

    async fn on_data_transfer(&self, request: DataTransferRequest) -> HandlerResult<DataTransferResponse>;

    async fn on_get_configuration(
        &self,
        request: GetConfigurationRequest,
    ) -> HandlerResult<GetConfigurationResponse>;

    async fn on_remote_start_transaction(
        &self,
        request: RemoteStartTransactionRequest,
    ) -> HandlerResult<RemoteStartTransactionResponse>;

    async fn on_remote_stop_transaction(
        &self,
        request: RemoteStopTransactionRequest,
    ) -> HandlerResult<RemoteStopTransactionResponse>;

    async fn on_reset(&self, request: ResetRequest) -> HandlerResult<ResetResponse>;

    async fn on_unlock_connector(
        &self,
        request: UnlockConnectorRequest,
    ) -> HandlerResult<UnlockConnectorResponse>;
}

#[async_trait]
pub trait ChargePointFirmwareHandler: Send + Sync {
    async fn on_get_diagnostics(&self, request: GetDiagnosticsRequest) -> HandlerResult<GetDiagnosticsResponse>;

    async fn on_update_firmware(&self, request: UpdateFirmwareRequest) -> HandlerResult<UpdateFirmwareResponse>;
}

#[async_trait]
pub trait ChargePointLocalAuthListHandler: Send + Sync {
    async fn on_get_local_list_version(
        &self,
        request: GetLocalListVersionRequest,
    ) -> HandlerResult<GetLocalListVersionResponse>;

    async fn on_send_local_list(&self, request: SendLocalListRequest) -> HandlerResult<SendLocalListResponse>;
}

#[async_trait]
pub trait ChargePointReservationHandler: Send + Sync {
    async fn on_reserve_now(&self, request: ReserveNowRequest) -> HandlerResult<ReserveNowResponse>;

    async fn on_cancel_reservation(
        &self,
        request: CancelReservationRequest,
    ) -> HandlerResult<CancelReservationResponse>;
}

#[async_trait]
pub trait ChargePointRemoteTriggerHandler: Send + Sync {
    async fn on_trigger_message(&self, request: TriggerMessageRequest) -> HandlerResult<TriggerMessageResponse>;
}

#[async_trait]
pub trait ChargePointSmartChargingHandler: Send + Sync {
    async fn on_set_charging_profile(
        &self,
        request: SetChargingProfileRequest,
    ) -> HandlerResult<SetChargingProfileResponse>;

    async fn on_clear_charging_profile(
        &self,
        request: ClearChargingProfileRequest,
    ) -> HandlerResult<ClearChargingProfileResponse>;

    async fn on_get_composite_schedule(
        &self,
        request: GetCompositeScheduleRequest,
    ) -> HandlerResult<GetCompositeScheduleResponse>;
}
