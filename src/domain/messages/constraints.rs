//! Field constraints
//!
//! The OCPP 1.6 JSON schemas bound string lengths (CiString20 up to
//! CiString500), require some arrays to carry at least one element and keep a
//! few integers non-negative. The payload structs only model the shape, so
//! those bounds are checked here through `validator`.

use std::borrow::Cow;

use validator::{ValidateLength, ValidateRange, ValidationError, ValidationErrors};

use super::*;

/// Error code used for arrays that must not be empty.
pub const OCCURRENCE: &str = "occurrence";

/// Field bounds of one payload type. Types without bounds keep the default.
pub trait Constraints {
    fn check(&self, _rules: &mut Rules) {}

    fn constraints(&self) -> Result<(), ValidationErrors> {
        let mut rules = Rules::default();
        self.check(&mut rules);
        rules.finish()
    }
}

/// Collects every broken bound of one payload.
#[derive(Debug, Default)]
pub struct Rules {
    errors: ValidationErrors,
}

impl Rules {
    /// At most `max` characters. Absent optional fields pass.
    pub fn max_len<V>(&mut self, field: &'static str, value: &V, max: u64) -> &mut Self
    where
        V: ValidateLength<u64> + ?Sized,
    {
        if !value.validate_length(None, Some(max), None) {
            let message = format!("{} exceeds {} characters", field, max);
            self.errors
                .add(field, ValidationError::new("length").with_message(Cow::Owned(message)));
        }
        self
    }

    pub fn at_least<V>(&mut self, field: &'static str, value: &V, min: i32) -> &mut Self
    where
        V: ValidateRange<i32>,
    {
        if !value.validate_range(Some(min), None, None, None) {
            let message = format!("{} must be at least {}", field, min);
            self.errors
                .add(field, ValidationError::new("range").with_message(Cow::Owned(message)));
        }
        self
    }

    pub fn not_empty<T>(&mut self, field: &'static str, items: &[T]) -> &mut Self {
        if !items.validate_length(Some(1), None, None) {
            let message = format!("{} needs at least one element", field);
            self.errors
                .add(field, ValidationError::new(OCCURRENCE).with_message(Cow::Owned(message)));
        }
        self
    }

    pub fn id_tag_info(&mut self, field: &'static str, info: &IdTagInfo) -> &mut Self {
        self.max_len(field, &info.parent_id_tag, 20)
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// True when any broken bound is about element counts.
pub fn is_occurrence(errors: &ValidationErrors) -> bool {
    errors
        .field_errors()
        .values()
        .any(|list| list.iter().any(|error| error.code == OCCURRENCE))
}

macro_rules! unbounded {
    ($($payload:ty),* $(,)?) => {
        $(impl Constraints for $payload {})*
    };
}

unbounded!(
    BootNotificationResponse,
    CancelReservationRequest,
    CancelReservationResponse,
    ChangeAvailabilityRequest,
    ChangeAvailabilityResponse,
    ChangeConfigurationResponse,
    ClearCacheRequest,
    ClearCacheResponse,
    ClearChargingProfileResponse,
    DataTransferResponse,
    DiagnosticsStatusNotificationRequest,
    DiagnosticsStatusNotificationResponse,
    FirmwareStatusNotificationRequest,
    FirmwareStatusNotificationResponse,
    GetCompositeScheduleResponse,
    GetDiagnosticsRequest,
    GetLocalListVersionRequest,
    GetLocalListVersionResponse,
    HeartbeatRequest,
    HeartbeatResponse,
    MeterValuesResponse,
    RemoteStartTransactionResponse,
    RemoteStopTransactionRequest,
    RemoteStopTransactionResponse,
    ReserveNowResponse,
    ResetRequest,
    ResetResponse,
    SendLocalListResponse,
    SetChargingProfileResponse,
    StatusNotificationResponse,
    TriggerMessageRequest,
    TriggerMessageResponse,
    UnlockConnectorRequest,
    UnlockConnectorResponse,
    UpdateFirmwareRequest,
    UpdateFirmwareResponse,
);

impl Constraints for AuthorizeRequest {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("idTag", &self.id_tag, 20);
    }
}

impl Constraints for AuthorizeResponse {
    fn check(&self, rules: &mut Rules) {
        rules.id_tag_info("idTagInfo.parentIdTag", &self.id_tag_info);
    }
}

impl Constraints for BootNotificationRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .max_len("chargePointModel", &self.charge_point_model, 20)
            .max_len("chargePointVendor", &self.charge_point_vendor, 20)
            .max_len("chargeBoxSerialNumber", &self.charge_box_serial_number, 25)
            .max_len("chargePointSerialNumber", &self.charge_point_serial_number, 25)
            .max_len("firmwareVersion", &self.firmware_version, 50)
            .max_len("iccid", &self.iccid, 20)
            .max_len("imsi", &self.imsi, 20)
            .max_len("meterSerialNumber", &self.meter_serial_number, 25)
            .max_len("meterType", &self.meter_type, 25);
    }
}

impl Constraints for ChangeConfigurationRequest {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("key", &self.key, 50).max_len("value", &self.value, 500);
    }
}

impl Constraints for ClearChargingProfileRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .at_least("id", &self.id, 0)
            .at_least("connectorId", &self.connector_id, 0)
            .at_least("stackLevel", &self.stack_level, 0);
    }
}

impl Constraints for DataTransferRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .max_len("vendorId", &self.vendor_string, 255)
            .max_len("messageId", &self.message_id, 50);
    }
}

impl Constraints for GetCompositeScheduleRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .at_least("connectorId", &self.connector_id, 0)
            .at_least("duration", &self.duration, 0);
    }
}

impl Constraints for GetConfigurationRequest {
    fn check(&self, rules: &mut Rules) {
        for key in self.key.iter().flatten() {
            rules.max_len("key", key, 50);
        }
    }
}

impl Constraints for GetConfigurationResponse {
    fn check(&self, rules: &mut Rules) {
        for entry in self.configuration_key.iter().flatten() {
            rules
                .max_len("configurationKey.key", &entry.key, 50)
                .max_len("configurationKey.value", &entry.value, 500);
        }
        for key in self.unknown_key.iter().flatten() {
            rules.max_len("unknownKey", key, 50);
        }
    }
}

impl Constraints for GetDiagnosticsResponse {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("fileName", &self.file_name, 255);
    }
}

impl Constraints for MeterValuesRequest {
    fn check(&self, rules: &mut Rules) {
        rules.not_empty("meterValue", &self.meter_value);
        for value in &self.meter_value {
            rules.not_empty("meterValue.sampledValue", &value.sampled_value);
        }
    }
}

impl Constraints for RemoteStartTransactionRequest {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("idTag", &self.id_tag, 20);
    }
}

impl Constraints for ReserveNowRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .max_len("idTag", &self.id_tag, 20)
            .max_len("parentIdTag", &self.parent_id_tag, 20);
    }
}

impl Constraints for SendLocalListRequest {
    fn check(&self, rules: &mut Rules) {
        for entry in self.local_authorization_list.iter().flatten() {
            rules.max_len("localAuthorizationList.idTag", &entry.id_tag, 20);
            if let Some(info) = &entry.id_tag_info {
                rules.id_tag_info("localAuthorizationList.idTagInfo.parentIdTag", info);
            }
        }
    }
}

impl Constraints for SetChargingProfileRequest {
    fn check(&self, rules: &mut Rules) {
        rules.at_least("connectorId", &self.connector_id, 0);
    }
}

impl Constraints for StartTransactionRequest {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("idTag", &self.id_tag, 20);
    }
}

impl Constraints for StartTransactionResponse {
    fn check(&self, rules: &mut Rules) {
        rules.id_tag_info("idTagInfo.parentIdTag", &self.id_tag_info);
    }
}

impl Constraints for StatusNotificationRequest {
    fn check(&self, rules: &mut Rules) {
        rules
            .max_len("info", &self.info, 50)
            .max_len("vendorId", &self.vendor_id, 255)
            .max_len("vendorErrorCode", &self.vendor_error_code, 50);
    }
}

impl Constraints for StopTransactionRequest {
    fn check(&self, rules: &mut Rules) {
        rules.max_len("idTag", &self.id_tag, 20);
    }
}

impl Constraints for StopTransactionResponse {
    fn check(&self, rules: &mut Rules) {
        if let Some(info) = &self.id_tag_info {
            rules.id_tag_info("idTagInfo.parentIdTag", info);
        }
    }
}
