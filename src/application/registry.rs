//! Feature registry
//!
//! A [`Feature`] binds an action name to its request/response payload types
//! and to the checks that decode and validate them. Features are grouped in
//! named [`Profile`]s; an endpoint receives its profiles at construction and
//! the resulting [`FeatureRegistry`] is immutable afterwards.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::domain::messages::*;
use crate::domain::{OcppError, OcppErrorCode, OcppPayload, OcppRequest, Role};

// ── Profile names ──────────────────────────────────────────────

pub const CORE: &str = "Core";
pub const FIRMWARE_MANAGEMENT: &str = "FirmwareManagement";
pub const LOCAL_AUTH_LIST_MANAGEMENT: &str = "LocalAuthListManagement";
pub const RESERVATION: &str = "Reservation";
pub const REMOTE_TRIGGER: &str = "RemoteTrigger";
pub const SMART_CHARGING: &str = "SmartCharging";

/// Decodes a JSON payload into a concrete type and checks its field bounds.
pub type PayloadCheck = fn(&Value) -> Result<(), OcppError>;

/// Which role is allowed to send a given action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    ChargePoint,
    CentralSystem,
    Both,
}

impl Origin {
    pub fn allows(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (Origin::Both, _)
                | (Origin::ChargePoint, Role::ChargePoint)
                | (Origin::CentralSystem, Role::CentralSystem)
        )
    }
}

// ── Feature ────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct Feature {
    action: &'static str,
    origin: Origin,
    request_type: &'static str,
    response_type: &'static str,
    check_request: PayloadCheck,
    check_response: PayloadCheck,
}

impl Feature {
    pub fn of<R: OcppRequest>(origin: Origin) -> Self {
        Self {
            action: R::ACTION,
            origin,
            request_type: short_type_name::<R>(),
            response_type: short_type_name::<R::Response>(),
            check_request: check_payload::<R>,
            check_response: check_payload::<R::Response>,
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    pub fn response_type(&self) -> &'static str {
        self.response_type
    }

    pub fn can_originate(&self, role: Role) -> bool {
        self.origin.allows(role)
    }

    pub fn check_request(&self, payload: &Value) -> Result<(), OcppError> {
        (self.check_request)(payload)
    }

    pub fn check_response(&self, payload: &Value) -> Result<(), OcppError> {
        (self.check_response)(payload)
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("action", &self.action)
            .field("origin", &self.origin)
            .field("request_type", &self.request_type)
            .field("response_type", &self.response_type)
            .finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Structural decode failures are formation violations. Decoded payloads
/// that break a field bound are property constraint violations, or occurrence
/// violations when a required array is empty.
fn check_payload<T: OcppPayload>(payload: &Value) -> Result<(), OcppError> {
    let decoded: T = serde_json::from_value(payload.clone()).map_err(|e| {
        OcppError::new(
            OcppErrorCode::FormationViolation,
            format!("{}: {}", short_type_name::<T>(), e),
        )
    })?;
    decoded.constraints().map_err(|e| {
        let code = if is_occurrence(&e) {
            OcppErrorCode::OccurrenceConstraintViolation
        } else {
            OcppErrorCode::PropertyConstraintViolation
        };
        OcppError::new(code, format!("{}: {}", short_type_name::<T>(), e))
    })
}

// ── Profile ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Profile {
    name: &'static str,
    features: Vec<Feature>,
}

impl Profile {
    pub fn new(name: &'static str, features: Vec<Feature>) -> Self {
        Self { name, features }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn core() -> Self {
        use Origin::*;
        Self::new(
            CORE,
            vec![
                Feature::of::<AuthorizeRequest>(ChargePoint),
                Feature::of::<BootNotificationRequest>(ChargePoint),
                Feature::of::<ChangeAvailabilityRequest>(CentralSystem),
                Feature::of::<ChangeConfigurationRequest>(CentralSystem),
                Feature::of::<ClearCacheRequest>(CentralSystem),
                Feature::of::<DataTransferRequest>(Both),
                Feature::of::<GetConfigurationRequest>(CentralSystem),
                Feature::of::<HeartbeatRequest>(ChargePoint),
                Feature::of::<MeterValuesRequest>(ChargePoint),
                Feature::of::<RemoteStartTransactionRequest>(CentralSystem),
                Feature::of::<RemoteStopTransactionRequest>(CentralSystem),
                Feature::of::<ResetRequest>(CentralSystem),
                Feature::of::<StartTransactionRequest>(ChargePoint),
                Feature::of::<StatusNotificationRequest>(ChargePoint),
                Feature::of::<StopTransactionRequest>(ChargePoint),
                Feature::of::<UnlockConnectorRequest>(CentralSystem),
            ],
        )
    }

    pub fn firmware_management() -> Self {
        use Origin::*;
        Self::new(
            FIRMWARE_MANAGEMENT,
            vec![
                Feature::of::<GetDiagnosticsRequest>(CentralSystem),
                Feature::of::<DiagnosticsStatusNotificationRequest>(ChargePoint),
                Feature::of::<FirmwareStatusNotificationRequest>(ChargePoint),
                Feature::of::<UpdateFirmwareRequest>(CentralSystem),
            ],
        )
    }

    pub fn local_auth_list_management() -> Self {
        Self::new(
            LOCAL_AUTH_LIST_MANAGEMENT,
            vec![
                Feature::of::<GetLocalListVersionRequest>(Origin::CentralSystem),
                Feature::of::<SendLocalListRequest>(Origin::CentralSystem),
            ],
        )
    }

    pub fn reservation() -> Self {
        Self::new(
            RESERVATION,
            vec![
                Feature::of::<ReserveNowRequest>(Origin::CentralSystem),
                Feature::of::<CancelReservationRequest>(Origin::CentralSystem),
            ],
        )
    }

    pub fn remote_trigger() -> Self {
        Self::new(
            REMOTE_TRIGGER,
            vec![Feature::of::<TriggerMessageRequest>(Origin::CentralSystem)],
        )
    }

    pub fn smart_charging() -> Self {
        Self::new(
            SMART_CHARGING,
            vec![
                Feature::of::<SetChargingProfileRequest>(Origin::CentralSystem),
                Feature::of::<ClearChargingProfileRequest>(Origin::CentralSystem),
                Feature::of::<GetCompositeScheduleRequest>(Origin::CentralSystem),
            ],
        )
    }

    /// Every OCPP 1.6 profile.
    pub fn all() -> Vec<Profile> {
        vec![
            Self::core(),
            Self::firmware_management(),
            Self::local_auth_list_management(),
            Self::reservation(),
            Self::remote_trigger(),
            Self::smart_charging(),
        ]
    }
}

// ── FeatureRegistry ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    profiles: Vec<Profile>,
    index: HashMap<&'static str, (usize, Feature)>,
}

impl FeatureRegistry {
    pub fn new(profiles: Vec<Profile>) -> Self {
        let mut index = HashMap::new();
        for (position, profile) in profiles.iter().enumerate() {
            for feature in profile.features() {
                if index.contains_key(feature.action()) {
                    warn!(
                        action = feature.action(),
                        profile = profile.name(),
                        "Action already registered by an earlier profile, ignoring"
                    );
                    continue;
                }
                index.insert(feature.action(), (position, *feature));
            }
        }
        Self { profiles, index }
    }

    pub fn profile_for_feature(&self, action: &str) -> Option<&Profile> {
        self.index
            .get(action)
            .map(|(position, _)| &self.profiles[*position])
    }

    pub fn feature(&self, action: &str) -> Option<&Feature> {
        self.index.get(action).map(|(_, feature)| feature)
    }

    pub fn request_type(&self, action: &str) -> Option<&'static str> {
        self.feature(action).map(Feature::request_type)
    }

    pub fn response_type(&self, action: &str) -> Option<&'static str> {
        self.feature(action).map(Feature::response_type)
    }

    pub fn supports(&self, action: &str) -> bool {
        self.index.contains_key(action)
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.name() == name)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn all_profiles_cover_the_ocpp_16_catalog() {
        let registry = FeatureRegistry::new(Profile::all());
        let total: usize = registry.profiles().iter().map(|p| p.features().len()).sum();
        assert_eq!(total, 28);
        assert_eq!(
            registry.profile_for_feature("SendLocalList").map(Profile::name),
            Some(LOCAL_AUTH_LIST_MANAGEMENT)
        );
        assert_eq!(registry.request_type("Heartbeat"), Some("HeartbeatRequest"));
        assert_eq!(registry.response_type("Reset"), Some("ResetResponse"));
        assert!(!registry.supports("TransactionEvent"));
    }

    #[test]
    fn origins_follow_message_direction() {
        let registry = FeatureRegistry::new(vec![Profile::core()]);
        let boot = registry.feature("BootNotification").unwrap();
        assert!(boot.can_originate(Role::ChargePoint));
        assert!(!boot.can_originate(Role::CentralSystem));

        let availability = registry.feature("ChangeAvailability").unwrap();
        assert!(!availability.can_originate(Role::ChargePoint));

        let transfer = registry.feature("DataTransfer").unwrap();
        assert!(transfer.can_originate(Role::ChargePoint));
        assert!(transfer.can_originate(Role::CentralSystem));
    }

    #[test]
    fn payload_checks_distinguish_formation_from_constraints() {
        let registry = FeatureRegistry::new(vec![Profile::core()]);
        let authorize = registry.feature("Authorize").unwrap();

        assert!(authorize.check_request(&json!({"idTag": "ABC"})).is_ok());

        let missing = authorize.check_request(&json!({})).unwrap_err();
        assert_eq!(missing.code, OcppErrorCode::FormationViolation);

        let too_long = authorize
            .check_request(&json!({"idTag": "x".repeat(21)}))
            .unwrap_err();
        assert_eq!(too_long.code, OcppErrorCode::PropertyConstraintViolation);

        let response = authorize
            .check_response(&json!({"idTagInfo": {"status": "Bogus"}}))
            .unwrap_err();
        assert_eq!(response.code, OcppErrorCode::FormationViolation);
    }

    #[test]
    fn first_profile_wins_on_duplicate_actions() {
        let extra = Profile::new("Vendor", vec![Feature::of::<DataTransferRequest>(Origin::ChargePoint)]);
        let registry = FeatureRegistry::new(vec![Profile::core(), extra]);
        assert_eq!(
            registry.profile_for_feature("DataTransfer").map(Profile::name),
            Some(CORE)
        );
        assert!(registry.has_profile("Vendor"));
    }
}
