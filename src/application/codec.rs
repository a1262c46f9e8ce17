//! Wire codec
//!
//! Bridges typed payloads and OCPP-J frames, and decides which OCPP error an
//! inbound CALL deserves before any handler sees it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::application::registry::{Feature, FeatureRegistry};
use crate::domain::{OcppError, OcppErrorCode};
use crate::support::ocpp_frame::OcppFrame;
use crate::support::time::normalize_timestamps;

/// Resolve and check an inbound CALL.
///
/// Unknown actions yield `NotImplemented`; payloads that do not decode yield
/// `FormationViolation`; payloads that decode but break a constraint yield
/// `PropertyConstraintViolation`.
pub fn check_call<'a>(
    registry: &'a FeatureRegistry,
    action: &str,
    payload: &Value,
) -> Result<&'a Feature, OcppError> {
    let feature = registry
        .feature(action)
        .ok_or_else(|| OcppError::not_implemented(action))?;
    feature.check_request(payload)?;
    Ok(feature)
}

/// Check a CALLRESULT payload against the response type expected for `action`.
pub fn check_result(
    registry: &FeatureRegistry,
    action: &str,
    payload: &Value,
) -> Result<(), OcppError> {
    let feature = registry.feature(action).ok_or_else(|| {
        OcppError::new(
            OcppErrorCode::ProtocolError,
            format!("no response type registered for {}", action),
        )
    })?;
    feature.check_response(payload)
}

pub fn encode_call(unique_id: &str, action: &str, payload: Value) -> String {
    OcppFrame::Call {
        unique_id: unique_id.to_string(),
        action: action.to_string(),
        payload,
    }
    .serialize()
}

pub fn encode_result(unique_id: &str, payload: Value) -> String {
    OcppFrame::CallResult {
        unique_id: unique_id.to_string(),
        payload,
    }
    .serialize()
}

pub fn encode_error(unique_id: &str, error: &OcppError) -> String {
    OcppFrame::error_response(unique_id, error).serialize()
}

/// Serialize a typed payload into the JSON object carried by a frame.
/// Timestamp fields use the process-wide format of `support::time`.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Value, OcppError> {
    let mut payload = serde_json::to_value(value).map_err(|e| {
        OcppError::new(
            OcppErrorCode::FormationViolation,
            format!("failed to encode payload: {}", e),
        )
    })?;
    normalize_timestamps(&mut payload);
    Ok(payload)
}

/// Decode a JSON payload into a typed value.
pub fn from_payload<T: DeserializeOwned>(payload: Value) -> Result<T, OcppError> {
    serde_json::from_value(payload).map_err(|e| {
        OcppError::new(
            OcppErrorCode::FormationViolation,
            format!("failed to decode payload: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::Profile;
    use crate::domain::messages::*;
    use crate::domain::OcppPayload;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn unknown_action_is_not_implemented() {
        let registry = FeatureRegistry::new(vec![Profile::core()]);
        let err = check_call(&registry, "ReserveNow", &json!({})).unwrap_err();
        assert_eq!(err.code, OcppErrorCode::NotImplemented);
        assert_eq!(err.description, "unsupported action ReserveNow");
    }

    #[test]
    fn call_checks_return_the_feature() {
        let registry = FeatureRegistry::new(vec![Profile::core()]);
        let feature = check_call(&registry, "Heartbeat", &json!({})).unwrap();
        assert_eq!(feature.action(), "Heartbeat");

        let err = check_call(
            &registry,
            "ChangeConfiguration",
            &json!({"key": "k".repeat(51), "value": "1"}),
        )
        .unwrap_err();
        assert_eq!(err.code, OcppErrorCode::PropertyConstraintViolation);

        let err = check_call(&registry, "ChangeAvailability", &json!({"connectorId": -1, "type": "Operative"}))
            .unwrap_err();
        assert_eq!(err.code, OcppErrorCode::FormationViolation);
    }

    #[test]
    fn result_checks_use_the_response_type() {
        let registry = FeatureRegistry::new(vec![Profile::core()]);
        assert!(check_result(&registry, "Heartbeat", &json!({"currentTime": "2024-01-01T00:00:00Z"})).is_ok());
        assert_eq!(
            check_result(&registry, "Heartbeat", &json!({})).unwrap_err().code,
            OcppErrorCode::FormationViolation
        );
        assert_eq!(
            check_result(&registry, "Nope", &json!({})).unwrap_err().code,
            OcppErrorCode::ProtocolError
        );
    }

    #[test]
    fn typed_payloads_survive_the_wire() {
        let request = StopTransactionRequest {
            id_tag: Some("TAG".into()),
            meter_stop: 1500,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(120),
            transaction_id: 42,
            reason: None,
            transaction_data: None,
        };

        let frame = encode_call("1", "StopTransaction", to_payload(&request).unwrap());
        let parsed = OcppFrame::parse(&frame).unwrap();
        let OcppFrame::Call { payload, .. } = parsed else {
            panic!("expected a CALL");
        };
        assert!(payload.get("reason").map_or(true, Value::is_null));
        assert_eq!(payload["timestamp"], "2024-03-01T12:30:00Z");

        let decoded = from_payload::<StopTransactionRequest>(payload).unwrap();
        assert_eq!(decoded.transaction_id, 42);
        assert_eq!(decoded.meter_stop, 1500);
        assert_eq!(decoded.id_tag.as_deref(), Some("TAG"));
        assert_eq!(decoded.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());

        let response = encode_result("1", json!({"currentTime": "2024-01-01T00:00:00Z"}));
        let OcppFrame::CallResult { payload, .. } = OcppFrame::parse(&response).unwrap() else {
            panic!("expected a CALLRESULT");
        };
        assert!(from_payload::<HeartbeatResponse>(payload).is_ok());
    }

    struct Sample {
        action: &'static str,
        request: Value,
        response: Value,
        round_trip: fn(&Value, &Value),
    }

    fn sample<R: OcppRequest>(request: Value, response: Value) -> Sample {
        Sample {
            action: R::ACTION,
            request,
            response,
            round_trip: |request, response| {
                assert_stable::<R>(request);
                assert_stable::<R::Response>(response);
            },
        }
    }

    /// Decoding then encoding keeps every field under its wire name, and a
    /// second pass changes nothing.
    fn assert_stable<T: OcppPayload>(wire: &Value) {
        let decoded: T = from_payload(wire.clone()).unwrap();
        let encoded = to_payload(&decoded).unwrap();
        assert!(same_shape(wire, &encoded), "{} became {}", wire, encoded);
        let again: T = from_payload(encoded.clone()).unwrap();
        assert_eq!(to_payload(&again).unwrap(), encoded);
    }

    fn same_shape(left: &Value, right: &Value) -> bool {
        fn present(map: &serde_json::Map<String, Value>) -> BTreeSet<&str> {
            map.iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, _)| key.as_str())
                .collect()
        }
        match (left, right) {
            (Value::Object(l), Value::Object(r)) => {
                present(l) == present(r) && present(l).iter().all(|key| same_shape(&l[*key], &r[*key]))
            }
            (Value::Array(l), Value::Array(r)) => {
                l.len() == r.len() && l.iter().zip(r).all(|(a, b)| same_shape(a, b))
            }
            (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
            _ => true,
        }
    }

    fn samples() -> Vec<Sample> {
        let at = "2024-01-01T00:00:00Z";
        vec![
            sample::<AuthorizeRequest>(
                json!({"idTag": "TAG1"}),
                json!({"idTagInfo": {"status": "Accepted", "expiryDate": "2024-01-02T00:00:00Z", "parentIdTag": "PARENT"}}),
            ),
            sample::<BootNotificationRequest>(
                json!({"chargePointVendor": "Vendor", "chargePointModel": "Model", "chargePointSerialNumber": "SN-1", "firmwareVersion": "1.0.0"}),
                json!({"status": "Accepted", "currentTime": at, "interval": 300}),
            ),
            sample::<CancelReservationRequest>(json!({"reservationId": 7}), json!({"status": "Accepted"})),
            sample::<ChangeAvailabilityRequest>(
                json!({"connectorId": 1, "type": "Inoperative"}),
                json!({"status": "Scheduled"}),
            ),
            sample::<ChangeConfigurationRequest>(
                json!({"key": "HeartbeatInterval", "value": "60"}),
                json!({"status": "RebootRequired"}),
            ),
            sample::<ClearCacheRequest>(json!({}), json!({"status": "Accepted"})),
            sample::<ClearChargingProfileRequest>(
                json!({"id": 3, "connectorId": 1, "chargingProfilePurpose": "TxProfile", "stackLevel": 0}),
                json!({"status": "Unknown"}),
            ),
            sample::<DataTransferRequest>(
                json!({"vendorId": "com.example", "messageId": "ping", "data": "{}"}),
                json!({"status": "Accepted", "data": "pong"}),
            ),
            sample::<DiagnosticsStatusNotificationRequest>(json!({"status": "Uploaded"}), json!({})),
            sample::<FirmwareStatusNotificationRequest>(json!({"status": "Installed"}), json!({})),
            sample::<GetCompositeScheduleRequest>(
                json!({"connectorId": 1, "duration": 3600, "chargingRateUnit": "W"}),
                json!({"status": "Accepted", "connectorId": 1, "scheduleStart": at}),
            ),
            sample::<GetConfigurationRequest>(
                json!({"key": ["HeartbeatInterval", "Unknown"]}),
                json!({
                    "configurationKey": [{"key": "HeartbeatInterval", "readonly": false, "value": "60"}],
                    "unknownKey": ["Unknown"]
                }),
            ),
            sample::<GetDiagnosticsRequest>(
                json!({"location": "ftp://example.com/diag", "retries": 3, "retryInterval": 60, "startTime": at, "stopTime": "2024-01-02T00:00:00Z"}),
                json!({"fileName": "diag.zip"}),
            ),
            sample::<GetLocalListVersionRequest>(json!({}), json!({"listVersion": 4})),
            sample::<HeartbeatRequest>(json!({}), json!({"currentTime": at})),
            sample::<MeterValuesRequest>(
                json!({
                    "connectorId": 1,
                    "transactionId": 42,
                    "meterValue": [{
                        "timestamp": at,
                        "sampledValue": [{"value": "1500", "measurand": "Energy.Active.Import.Register", "unit": "Wh"}]
                    }]
                }),
                json!({}),
            ),
            sample::<RemoteStartTransactionRequest>(
                json!({"connectorId": 1, "idTag": "TAG1"}),
                json!({"status": "Accepted"}),
            ),
            sample::<RemoteStopTransactionRequest>(json!({"transactionId": 42}), json!({"status": "Rejected"})),
            sample::<ReserveNowRequest>(
                json!({"connectorId": 1, "expiryDate": "2024-01-01T01:00:00Z", "idTag": "TAG1", "reservationId": 7}),
                json!({"status": "Occupied"}),
            ),
            sample::<ResetRequest>(json!({"type": "Soft"}), json!({"status": "Accepted"})),
            sample::<SendLocalListRequest>(
                json!({
                    "listVersion": 5,
                    "updateType": "Differential",
                    "localAuthorizationList": [{"idTag": "TAG1", "idTagInfo": {"status": "Blocked"}}]
                }),
                json!({"status": "VersionMismatch"}),
            ),
            sample::<SetChargingProfileRequest>(
                json!({
                    "connectorId": 1,
                    "csChargingProfiles": {
                        "chargingProfileId": 1,
                        "stackLevel": 0,
                        "chargingProfilePurpose": "TxDefaultProfile",
                        "chargingProfileKind": "Absolute",
                        "chargingSchedule": {
                            "chargingRateUnit": "A",
                            "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 16.0}]
                        }
                    }
                }),
                json!({"status": "Accepted"}),
            ),
            sample::<StartTransactionRequest>(
                json!({"connectorId": 1, "idTag": "TAG1", "meterStart": 0, "timestamp": at}),
                json!({"transactionId": 42, "idTagInfo": {"status": "Accepted"}}),
            ),
            sample::<StatusNotificationRequest>(
                json!({"connectorId": 1, "errorCode": "NoError", "status": "Available", "timestamp": at}),
                json!({}),
            ),
            sample::<StopTransactionRequest>(
                json!({"idTag": "TAG1", "meterStop": 1500, "timestamp": "2024-01-01T01:00:00Z", "transactionId": 42, "reason": "Local"}),
                json!({"idTagInfo": {"status": "Accepted"}}),
            ),
            sample::<TriggerMessageRequest>(
                json!({"requestedMessage": "StatusNotification", "connectorId": 1}),
                json!({"status": "NotImplemented"}),
            ),
            sample::<UnlockConnectorRequest>(json!({"connectorId": 1}), json!({"status": "Unlocked"})),
            sample::<UpdateFirmwareRequest>(
                json!({"location": "https://example.com/fw.bin", "retrieveDate": at, "retries": 2}),
                json!({}),
            ),
        ]
    }

    #[test]
    fn every_registered_action_round_trips() {
        let samples = samples();
        let mut covered = BTreeSet::new();

        for profile in Profile::all() {
            for feature in profile.features() {
                let sample = samples
                    .iter()
                    .find(|s| s.action == feature.action())
                    .unwrap_or_else(|| panic!("no sample for {}", feature.action()));

                if let Err(e) = feature.check_request(&sample.request) {
                    panic!("{} request rejected: {}", feature.action(), e);
                }
                if let Err(e) = feature.check_response(&sample.response) {
                    panic!("{} response rejected: {}", feature.action(), e);
                }
                (sample.round_trip)(&sample.request, &sample.response);
                covered.insert(feature.action());
            }
        }

        assert_eq!(covered.len(), samples.len());
    }
}
