use crate::error::ConfigValidationError;
use serde::Deserializer;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, fs, path::Path, time::Duration};

pub const DEFAULT_PERIOD_SECONDS: f64 = 1.0;
pub const DEFAULT_REGISTER_COUNT: u16 = 10;
/// Largest register block a single Modbus read request may ask for.
pub const MAX_REGISTER_COUNT: u16 = 125;
/// Shortest poll period a target may run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// The two independent register sources of a feeder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentClass {
    #[default]
    Relay,
    Analyzer,
}

impl EquipmentClass {
    pub const ALL: [EquipmentClass; 2] = [EquipmentClass::Relay, EquipmentClass::Analyzer];

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentClass::Relay => "relay",
            EquipmentClass::Analyzer => "analyzer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relay" => Some(EquipmentClass::Relay),
            "analyzer" => Some(EquipmentClass::Analyzer),
            _ => None,
        }
    }
}

impl fmt::Display for EquipmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses one pollable unit: a feeder's relay or analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub feeder_id: String,
    pub equipment: EquipmentClass,
}

impl TargetKey {
    pub fn new(feeder_id: impl Into<String>, equipment: EquipmentClass) -> Self {
        Self {
            feeder_id: feeder_id.into(),
            equipment,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.feeder_id, self.equipment)
    }
}

/// Connection settings for one equipment class, as persisted.
///
/// Numbers are read leniently (JSON numbers or numeric strings) so hand-edited
/// or older documents still load; validation happens in [`EquipmentConfig::validate`].
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EquipmentConfig {
    pub host: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub port: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub start_address: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub register_count: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub period_seconds: Option<f64>,
}

/// Fully validated connection parameters of a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub start_address: u16,
    pub register_count: u16,
    pub period: Duration,
}

/// A target ready to be polled.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub key: TargetKey,
    pub params: ConnectionParams,
}

impl EquipmentConfig {
    pub fn validate(&self) -> Result<ConnectionParams, ConfigValidationError> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(ConfigValidationError::MissingHost)?;

        let port = self.port.ok_or(ConfigValidationError::MissingPort)?;
        let port = as_u16(port)
            .filter(|port| *port != 0)
            .ok_or(ConfigValidationError::InvalidPort(port))?;

        let start_address = match self.start_address {
            None => 0,
            Some(start) => {
                as_u16(start).ok_or(ConfigValidationError::InvalidStartAddress(start))?
            }
        };

        let register_count = match self.register_count {
            None => DEFAULT_REGISTER_COUNT,
            Some(count) => as_u16(count)
                .filter(|count| (1..=MAX_REGISTER_COUNT).contains(count))
                .ok_or(ConfigValidationError::InvalidRegisterCount(count))?,
        };
        if start_address as u32 + register_count as u32 > u16::MAX as u32 + 1 {
            return Err(ConfigValidationError::AddressRangeOverflow {
                start: start_address,
                count: register_count,
            });
        }

        // Zero means "not set", same as a missing period.
        let period_seconds = self
            .period_seconds
            .filter(|seconds| *seconds != 0.0)
            .unwrap_or(DEFAULT_PERIOD_SECONDS);
        let period = Duration::try_from_secs_f64(period_seconds)
            .ok()
            .filter(|period| *period >= MIN_PERIOD)
            .ok_or(ConfigValidationError::InvalidPeriod(period_seconds))?;

        Ok(ConnectionParams {
            host: host.to_string(),
            port,
            start_address,
            register_count,
            period,
        })
    }
}

/// Per-start overrides layered over the stored [`EquipmentConfig`].
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOverride {
    pub host: Option<String>,
    pub port: Option<f64>,
    pub start_address: Option<f64>,
    pub register_count: Option<f64>,
    pub period_seconds: Option<f64>,
}

impl ConnectionOverride {
    /// Returns a merged copy; `stored` is left untouched.
    pub fn apply(&self, stored: &EquipmentConfig) -> EquipmentConfig {
        EquipmentConfig {
            host: self.host.clone().or_else(|| stored.host.clone()),
            port: self.port.or(stored.port),
            start_address: self.start_address.or(stored.start_address),
            register_count: self.register_count.or(stored.register_count),
            period_seconds: self.period_seconds.or(stored.period_seconds),
        }
    }
}

/// A monitored feeder as kept by the configuration store.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeederConfig {
    pub id: String,
    pub name: String,
    pub color: String,
    pub relay: EquipmentConfig,
    pub analyzer: EquipmentConfig,
    /// Raw card mapping, normalized on use by the mapping resolver.
    pub mapping: Value,
}

impl FeederConfig {
    pub fn equipment(&self, equipment: EquipmentClass) -> &EquipmentConfig {
        match equipment {
            EquipmentClass::Relay => &self.relay,
            EquipmentClass::Analyzer => &self.analyzer,
        }
    }

    pub fn target_key(&self, equipment: EquipmentClass) -> TargetKey {
        TargetKey::new(self.id.clone(), equipment)
    }

    /// Reads a JSON array of feeders.
    pub fn load_feeders(path: impl AsRef<Path>) -> anyhow::Result<Vec<FeederConfig>> {
        let raw = fs::read_to_string(path.as_ref())?;
        let feeders: Vec<FeederConfig> = serde_json::from_str(&raw)?;
        Ok(feeders)
    }
}

fn as_u16(value: f64) -> Option<u16> {
    if value.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

/// Accepts a JSON number or a numeric string; anything else becomes `None`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = serde::Deserialize::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

pub(crate) fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relay_config() -> EquipmentConfig {
        EquipmentConfig {
            host: Some("10.0.0.5".to_string()),
            port: Some(502.0),
            start_address: Some(100.0),
            register_count: Some(3.0),
            period_seconds: Some(2.0),
        }
    }

    #[test]
    fn test_validate_complete_config() {
        let params = tokio_test::assert_ok!(relay_config().validate());
        assert_eq!(params.host, "10.0.0.5");
        assert_eq!(params.port, 502);
        assert_eq!(params.start_address, 100);
        assert_eq!(params.register_count, 3);
        assert_eq!(params.period, Duration::from_secs(2));
    }

    #[test]
    fn test_validate_missing_host_and_port() {
        let mut config = relay_config();
        config.host = Some("   ".to_string());
        assert_eq!(config.validate(), Err(ConfigValidationError::MissingHost));

        let mut config = relay_config();
        config.port = None;
        assert_eq!(config.validate(), Err(ConfigValidationError::MissingPort));

        let mut config = relay_config();
        config.port = Some(70000.0);
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InvalidPort(70000.0))
        );
    }

    #[test]
    fn test_validate_defaults_and_range_checks() {
        let config = EquipmentConfig {
            host: Some("plc".to_string()),
            port: Some(502.0),
            ..Default::default()
        };
        let params = config.validate().unwrap();
        assert_eq!(params.start_address, 0);
        assert_eq!(params.register_count, DEFAULT_REGISTER_COUNT);
        assert_eq!(params.period, Duration::from_secs(1));

        let mut config = relay_config();
        config.start_address = Some(65530.0);
        config.register_count = Some(10.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::AddressRangeOverflow { .. })
        ));

        let mut config = relay_config();
        config.register_count = Some(0.0);
        tokio_test::assert_err!(config.validate());

        let mut config = relay_config();
        config.period_seconds = Some(0.0);
        let params = config.validate().unwrap();
        assert_eq!(params.period, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_unusable_periods() {
        for seconds in [-1.0, 1e-12, 1e20, f64::INFINITY, f64::NAN] {
            let mut config = relay_config();
            config.period_seconds = Some(seconds);
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigValidationError::InvalidPeriod(_))
                ),
                "period {seconds} should be rejected"
            );
        }

        let mut config = relay_config();
        config.period_seconds = Some(0.001);
        assert_eq!(config.validate().unwrap().period, MIN_PERIOD);
    }

    #[test]
    fn test_override_does_not_mutate_stored() {
        let stored = relay_config();
        let overrides = ConnectionOverride {
            period_seconds: Some(0.5),
            host: Some("192.168.1.20".to_string()),
            ..Default::default()
        };
        let merged = overrides.apply(&stored);

        assert_eq!(merged.host.as_deref(), Some("192.168.1.20"));
        assert_eq!(merged.period_seconds, Some(0.5));
        assert_eq!(merged.port, Some(502.0));
        assert_eq!(stored, relay_config());
    }

    #[test]
    fn test_lenient_deserialization() {
        let feeder: FeederConfig = serde_json::from_value(json!({
            "id": "AL-01",
            "name": "Alimentador 1",
            "relay": { "host": "10.0.0.5", "port": "502", "startAddress": 100, "registerCount": 3 },
            "analyzer": { "host": null, "port": "abc" }
        }))
        .unwrap();

        assert_eq!(feeder.relay.port, Some(502.0));
        assert_eq!(feeder.analyzer.port, None);
        assert_eq!(feeder.analyzer.host, None);
        assert!(feeder.mapping.is_null());
        assert_eq!(
            feeder.target_key(EquipmentClass::Analyzer).to_string(),
            "AL-01/analyzer"
        );
    }

    #[test]
    fn test_equipment_class_parse() {
        assert_eq!(EquipmentClass::parse(" Analyzer "), Some(EquipmentClass::Analyzer));
        assert_eq!(EquipmentClass::parse("relay"), Some(EquipmentClass::Relay));
        assert_eq!(EquipmentClass::parse("meter"), None);
    }
}
