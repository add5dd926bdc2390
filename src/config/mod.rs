pub mod layout;

pub use layout::FieldLayout;

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::serial::protocol::{CodecConfig, OnBadToken};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1000;
/// Understood by the firmware as "park the heater".
pub const DEFAULT_SHUTDOWN_SENTINEL: &str = "   !!!!";
pub const DEFAULT_NOTICE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlSetting {
    None,
    Software,
    #[default]
    Hardware,
}

impl From<FlowControlSetting> for serialport::FlowControl {
    fn from(setting: FlowControlSetting) -> Self {
        match setting {
            FlowControlSetting::None => serialport::FlowControl::None,
            FlowControlSetting::Software => serialport::FlowControl::Software,
            FlowControlSetting::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Everything the link needs to know about one protocol revision and its port.
///
/// The bad-token policy has no default: every configuration declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub flow_control: FlowControlSetting,
    #[serde(default = "default_true")]
    pub assert_dtr: bool,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_shutdown_sentinel")]
    pub shutdown_sentinel: String,
    /// Fields per telemetry frame received from the device
    pub inbound_len: usize,
    /// Fields per command frame sent to the device
    pub outbound_len: usize,
    pub codec: CodecConfig,
    #[serde(default)]
    pub inbound_layout: Option<FieldLayout>,
    #[serde(default)]
    pub outbound_layout: Option<FieldLayout>,
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_true() -> bool {
    true
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_shutdown_sentinel() -> String {
    DEFAULT_SHUTDOWN_SENTINEL.to_string()
}

fn default_notice_capacity() -> usize {
    DEFAULT_NOTICE_CAPACITY
}

impl LinkConfig {
    fn with_layouts(inbound: FieldLayout, outbound: FieldLayout, on_bad_token: OnBadToken) -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            flow_control: FlowControlSetting::default(),
            assert_dtr: true,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            shutdown_sentinel: DEFAULT_SHUTDOWN_SENTINEL.to_string(),
            inbound_len: inbound.len(),
            outbound_len: outbound.len(),
            codec: CodecConfig::new(on_bad_token),
            inbound_layout: Some(inbound),
            outbound_layout: Some(outbound),
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
        }
    }

    /// First firmware revision: 9 telemetry fields, 6 command fields.
    pub fn v1(on_bad_token: OnBadToken) -> Self {
        Self::with_layouts(FieldLayout::v1_inbound(), FieldLayout::v1_outbound(), on_bad_token)
    }

    /// 16-field revision, same layout in both directions.
    pub fn v2(on_bad_token: OnBadToken) -> Self {
        Self::with_layouts(FieldLayout::v2(), FieldLayout::v2(), on_bad_token)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded link configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbound_len == 0 || self.outbound_len == 0 {
            return Err(ConfigError::Invalid("frame lengths must be at least 1".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".into()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        if self.shutdown_sentinel.contains(['\n', '\r']) {
            return Err(ConfigError::Invalid("shutdown_sentinel must be a single line".into()));
        }
        if self.notice_capacity == 0 {
            return Err(ConfigError::Invalid("notice_capacity must be positive".into()));
        }
        for (direction, layout, len) in [
            ("inbound", &self.inbound_layout, self.inbound_len),
            ("outbound", &self.outbound_layout, self.outbound_len),
        ] {
            if let Some(layout) = layout {
                if layout.len() != len {
                    return Err(ConfigError::Invalid(format!(
                        "{} layout names {} fields but {}_len is {}",
                        direction,
                        layout.len(),
                        direction,
                        len
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Configured inbound layout, or positional names when none is set
    pub fn inbound_layout(&self) -> FieldLayout {
        self.inbound_layout
            .clone()
            .unwrap_or_else(|| FieldLayout::positional(self.inbound_len))
    }

    pub fn outbound_layout(&self) -> FieldLayout {
        self.outbound_layout
            .clone()
            .unwrap_or_else(|| FieldLayout::positional(self.outbound_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        let v1 = LinkConfig::v1(OnBadToken::Fail);
        assert!(v1.validate().is_ok());
        assert_eq!((v1.inbound_len, v1.outbound_len), (9, 6));
        assert_eq!(v1.baud_rate, 9600);
        assert_eq!(v1.flow_control, FlowControlSetting::Hardware);

        let v2 = LinkConfig::v2(OnBadToken::TreatAsUnchanged);
        assert!(v2.validate().is_ok());
        assert_eq!((v2.inbound_len, v2.outbound_len), (16, 16));
    }

    #[test]
    fn test_json_defaults_fill_in() {
        let json = r#"{
            "inbound_len": 9,
            "outbound_len": 6,
            "codec": { "on_bad_token": "treat_as_unchanged", "decimals": 2 }
        }"#;
        let config = LinkConfig::from_json_str(json).unwrap();
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(1000));
        assert_eq!(config.shutdown_sentinel, "   !!!!");
        assert_eq!(config.codec.on_bad_token, OnBadToken::TreatAsUnchanged);
        assert_eq!(config.codec.decimals, Some(2));
        assert!(config.assert_dtr);
        assert_eq!(config.inbound_layout().name(3), Some("field_3"));
    }

    #[test]
    fn test_bad_token_policy_is_required() {
        let json = r#"{ "inbound_len": 9, "outbound_len": 6, "codec": {} }"#;
        assert!(matches!(LinkConfig::from_json_str(json), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_layout_mismatch() {
        let mut config = LinkConfig::v1(OnBadToken::Fail);
        config.inbound_len = 16;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_multiline_sentinel() {
        let mut config = LinkConfig::v1(OnBadToken::Fail);
        config.shutdown_sentinel = "!!\n!!".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = LinkConfig::v2(OnBadToken::Fail);
        let json = config.to_json().unwrap();
        assert_eq!(LinkConfig::from_json_str(&json).unwrap(), config);
    }
}
