//! OCPP configuration-key store
//!
//! Backs GetConfiguration / ChangeConfiguration on a charge point. Keys are
//! declared up front; unknown keys are never created by an update.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::application::registry::{CORE, LOCAL_AUTH_LIST_MANAGEMENT, SMART_CHARGING};
use crate::domain::messages::{
    ConfigurationStatus, GetConfigurationRequest, GetConfigurationResponse, KeyValue,
};

/// Mandatory keys per profile as `(key, readonly, default value)`.
const CORE_KEYS: &[(&str, bool, &str)] = &[
    ("AuthorizeRemoteTxRequests", false, "false"),
    ("ClockAlignedDataInterval", false, "0"),
    ("ConnectionTimeOut", false, "60"),
    ("ConnectorPhaseRotation", false, "NotApplicable"),
    ("GetConfigurationMaxKeys", true, "50"),
    ("HeartbeatInterval", false, "86400"),
    ("LocalAuthorizeOffline", false, "true"),
    ("LocalPreAuthorize", false, "false"),
    ("MeterValuesAlignedData", false, "Energy.Active.Import.Register"),
    ("MeterValuesSampledData", false, "Energy.Active.Import.Register"),
    ("MeterValueSampleInterval", false, "60"),
    ("NumberOfConnectors", true, "1"),
    ("ResetRetries", false, "3"),
    ("StopTransactionOnEVSideDisconnect", false, "true"),
    ("StopTransactionOnInvalidId", false, "true"),
    ("StopTxnAlignedData", false, ""),
    ("StopTxnSampledData", false, ""),
    ("SupportedFeatureProfiles", true, "Core"),
    ("TransactionMessageAttempts", false, "3"),
    ("TransactionMessageRetryInterval", false, "60"),
    ("UnlockConnectorOnEVSideDisconnect", false, "true"),
];

const LOCAL_AUTH_LIST_KEYS: &[(&str, bool, &str)] = &[
    ("LocalAuthListEnabled", false, "true"),
    ("LocalAuthListMaxLength", true, "100"),
    ("SendLocalListMaxLength", true, "20"),
];

const SMART_CHARGING_KEYS: &[(&str, bool, &str)] = &[
    ("ChargeProfileMaxStackLevel", true, "8"),
    ("ChargingScheduleAllowedChargingRateUnit", true, "Current,Power"),
    ("ChargingScheduleMaxPeriods", true, "24"),
    ("MaxChargingProfilesInstalled", true, "8"),
];

/// Keys whose change only takes effect after a reboot.
const REBOOT_KEYS: &[&str] = &["ConnectorPhaseRotation", "NumberOfConnectors"];

fn mandatory_keys(profile: &str) -> &'static [(&'static str, bool, &'static str)] {
    match profile {
        CORE => CORE_KEYS,
        LOCAL_AUTH_LIST_MANAGEMENT => LOCAL_AUTH_LIST_KEYS,
        SMART_CHARGING => SMART_CHARGING_KEYS,
        _ => &[],
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    readonly: bool,
    value: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConfigurationStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding every mandatory key of `profiles` with its default
    /// value; `SupportedFeatureProfiles` lists the profiles.
    pub fn with_mandatory_keys(profiles: &[&str]) -> Self {
        let store = Self::new();
        for profile in profiles {
            for (key, readonly, value) in mandatory_keys(profile) {
                store.declare(*key, Some(value.to_string()), *readonly);
            }
        }
        if profiles.contains(&CORE) {
            store.declare("SupportedFeatureProfiles", Some(profiles.join(",")), true);
        }
        store
    }

    /// Add or replace a key, bypassing the read-only flag.
    pub fn declare(&self, key: impl Into<String>, value: Option<String>, readonly: bool) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), Entry { readonly, value });
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Apply a ChangeConfiguration.
    pub fn update_key(&self, key: &str, value: &str) -> ConfigurationStatus {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(key) else {
            debug!(key, "Unknown configuration key");
            return ConfigurationStatus::NotSupported;
        };
        if entry.readonly {
            debug!(key, "Refusing to change read-only configuration key");
            return ConfigurationStatus::Rejected;
        }

        entry.value = Some(value.to_string());
        info!(key, value, "Configuration key updated");
        if REBOOT_KEYS.iter().any(|k| *k == key) {
            ConfigurationStatus::RebootRequired
        } else {
            ConfigurationStatus::Accepted
        }
    }

    /// Look up `keys` (every key when empty). Returns the known entries and
    /// the requested keys that are unknown.
    pub fn get_configuration(&self, keys: &[String]) -> (Vec<KeyValue>, Vec<String>) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let to_key_value = |key: &String, entry: &Entry| KeyValue {
            key: key.clone(),
            readonly: entry.readonly,
            value: entry.value.clone(),
        };

        if keys.is_empty() {
            let known = entries.iter().map(|(k, e)| to_key_value(k, e)).collect();
            return (known, Vec::new());
        }

        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for key in keys {
            match entries.get_key_value(key) {
                Some((k, e)) => known.push(to_key_value(k, e)),
                None => unknown.push(key.clone()),
            }
        }
        (known, unknown)
    }

    /// Answer a GetConfiguration request.
    pub fn answer(&self, request: &GetConfigurationRequest) -> GetConfigurationResponse {
        let keys = request.key.clone().unwrap_or_default();
        let (known, unknown) = self.get_configuration(&keys);
        GetConfigurationResponse {
            configuration_key: (!known.is_empty()).then_some(known),
            unknown_key: (!unknown.is_empty()).then_some(unknown),
        }
    }

    /// Mandatory keys of `profiles` that the store does not hold.
    pub fn validate_mandatory_keys(&self, profiles: &[&str]) -> Result<(), Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let missing: Vec<String> = profiles
            .iter()
            .flat_map(|profile| mandatory_keys(profile).iter())
            .filter(|(key, _, _)| !entries.contains_key(*key))
            .map(|(key, _, _)| key.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}
