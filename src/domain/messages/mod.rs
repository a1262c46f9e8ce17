//! OCPP 1.6 payloads.
//!
//! The request and response structs come from `rust_ocpp::v1_6`. This module
//! binds each request to its wire action name and response type, and adds the
//! field constraints (see [`Constraints`]) checked on every payload that
//! crosses the wire.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

mod constraints;

pub use constraints::{is_occurrence, Constraints, Rules};

pub use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
pub use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
pub use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
pub use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
pub use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
pub use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
pub use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
pub use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
pub use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
pub use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
pub use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
pub use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
pub use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
pub use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
pub use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
pub use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
pub use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
pub use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
pub use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
pub use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
pub use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
pub use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
pub use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
pub use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
pub use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
pub use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
pub use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
pub use rust_ocpp::v1_6::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};
pub use rust_ocpp::v1_6::types::*;

/// Anything that can travel as the payload of a CALL or CALLRESULT.
pub trait OcppPayload:
    Serialize + DeserializeOwned + Constraints + Debug + Send + Sync + 'static
{
}

impl<T> OcppPayload for T where
    T: Serialize + DeserializeOwned + Constraints + Debug + Send + Sync + 'static
{
}

/// A request payload bound to its action name and response payload.
pub trait OcppRequest: OcppPayload {
    const ACTION: &'static str;
    type Response: OcppPayload;
}

macro_rules! ocpp_request {
    ($($action:literal => $request:ty, $response:ty;)*) => {
        $(
            impl OcppRequest for $request {
                const ACTION: &'static str = $action;
                type Response = $response;
            }
        )*
    };
}

ocpp_request! {
    "Authorize" => AuthorizeRequest, AuthorizeResponse;
    "BootNotification" => BootNotificationRequest, BootNotificationResponse;
    "CancelReservation" => CancelReservationRequest, CancelReservationResponse;
    "ChangeAvailability" => ChangeAvailabilityRequest, ChangeAvailabilityResponse;
    "ChangeConfiguration" => ChangeConfigurationRequest, ChangeConfigurationResponse;
    "ClearCache" => ClearCacheRequest, ClearCacheResponse;
    "ClearChargingProfile" => ClearChargingProfileRequest, ClearChargingProfileResponse;
    "DataTransfer" => DataTransferRequest, DataTransferResponse;
    "DiagnosticsStatusNotification" => DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse;
    "FirmwareStatusNotification" => FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse;
    "GetCompositeSchedule" => GetCompositeScheduleRequest, GetCompositeScheduleResponse;
    "GetConfiguration" => GetConfigurationRequest, GetConfigurationResponse;
    "GetDiagnostics" => GetDiagnosticsRequest, GetDiagnosticsResponse;
    "GetLocalListVersion" => GetLocalListVersionRequest, GetLocalListVersionResponse;
    "Heartbeat" => HeartbeatRequest, HeartbeatResponse;
    "MeterValues" => MeterValuesRequest, MeterValuesResponse;
    "RemoteStartTransaction" => RemoteStartTransactionRequest, RemoteStartTransactionResponse;
    "RemoteStopTransaction" => RemoteStopTransactionRequest, RemoteStopTransactionResponse;
    "ReserveNow" => ReserveNowRequest, ReserveNowResponse;
    "Reset" => ResetRequest, ResetResponse;
    "SendLocalList" => SendLocalListRequest, SendLocalListResponse;
    "SetChargingProfile" => SetChargingProfileRequest, SetChargingProfileResponse;
    "StartTransaction" => StartTransactionRequest, StartTransactionResponse;
    "StatusNotification" => StatusNotificationRequest, StatusNotificationResponse;
    "StopTransaction" => StopTransactionRequest, StopTransactionResponse;
    "TriggerMessage" => TriggerMessageRequest, TriggerMessageResponse;
    "UnlockConnector" => UnlockConnectorRequest, UnlockConnectorResponse;
    "UpdateFirmware" => UpdateFirmwareRequest, UpdateFirmwareResponse;
}
