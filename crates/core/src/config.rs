//! The on-disk/CLI configuration surface: one struct per dotted section of
//! §6, deserialised from TOML and checked with `validator` the way the
//! reference notification-service configs in this codebase do.

use serde::Deserialize;
use validator::{Validate, ValidationError};

fn default_major() -> u16 {
    1
}
fn default_minor() -> u16 {
    7
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_ping_interval_ms() -> u64 {
    5000
}
fn default_fps() -> u32 {
    30
}
fn default_dpi() -> u32 {
    140
}
fn default_resolution() -> String {
    "720p".to_string()
}
fn default_codecs() -> Vec<String> {
    vec!["h264".to_string()]
}
fn default_sidebar_position() -> String {
    "left".to_string()
}
fn default_night_source() -> String {
    "time".to_string()
}
fn default_day_start() -> String {
    "06:00".to_string()
}
fn default_night_start() -> String {
    "20:00".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProtocolConfig {
    #[serde(default = "default_major")]
    pub major: u16,
    #[serde(default = "default_minor")]
    pub minor: u16,
    #[serde(default = "default_timeout_ms")]
    pub version_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            major: default_major(),
            minor: default_minor(),
            version_timeout_ms: default_timeout_ms(),
            handshake_timeout_ms: default_timeout_ms(),
            discovery_timeout_ms: default_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct IdentityConfig {
    #[serde(default = "default_head_unit_name")]
    pub head_unit_name: String,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_sw_version")]
    pub sw_version: String,
    #[serde(default = "default_sw_build")]
    pub sw_build: String,
    #[serde(default = "default_car_model")]
    pub car_model: String,
    #[serde(default = "default_car_year")]
    pub car_year: String,
    #[serde(default)]
    pub left_hand_drive: bool,
}

fn default_head_unit_name() -> String {
    "aa-headunit".to_string()
}
fn default_manufacturer() -> String {
    "Generic".to_string()
}
fn default_model() -> String {
    "aa-headunit".to_string()
}
fn default_sw_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_sw_build() -> String {
    "1".to_string()
}
fn default_car_model() -> String {
    "Universal".to_string()
}
fn default_car_year() -> String {
    "2024".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_video_config"))]
pub struct VideoConfig {
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_codecs")]
    pub codecs: Vec<String>,
    #[serde(default)]
    pub sidebar: SidebarConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            resolution: default_resolution(),
            fps: default_fps(),
            dpi: default_dpi(),
            codecs: default_codecs(),
            sidebar: SidebarConfig::default(),
        }
    }
}

fn validate_video_config(cfg: &VideoConfig) -> Result<(), ValidationError> {
    if !matches!(cfg.resolution.as_str(), "480p" | "720p" | "1080p") {
        return Err(ValidationError::new("video.resolution must be one of 480p, 720p, 1080p"));
    }
    if !matches!(cfg.fps, 30 | 60) {
        return Err(ValidationError::new("video.fps must be 30 or 60"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SidebarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub width: u32,
    #[serde(default = "default_sidebar_position")]
    pub position: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DisplayConfig {
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig { width: 1280, height: 720 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BluetoothConfig {
    #[serde(default)]
    pub adapter_address: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_night_mode_config"))]
pub struct NightModeConfig {
    #[serde(default = "default_night_source")]
    pub source: String,
    #[serde(default = "default_day_start")]
    pub day_start: String,
    #[serde(default = "default_night_start")]
    pub night_start: String,
    #[serde(default)]
    pub gpio_pin: u32,
    #[serde(default)]
    pub gpio_active_high: bool,
}

impl Default for NightModeConfig {
    fn default() -> Self {
        NightModeConfig {
            source: default_night_source(),
            day_start: default_day_start(),
            night_start: default_night_start(),
            gpio_pin: 0,
            gpio_active_high: true,
        }
    }
}

fn validate_night_mode_config(cfg: &NightModeConfig) -> Result<(), ValidationError> {
    if !matches!(cfg.source.as_str(), "time" | "gpio") {
        return Err(ValidationError::new("sensors.night_mode.source must be 'time' or 'gpio'"));
    }
    if cfg.source == "time" {
        parse_hh_mm(&cfg.day_start)
            .ok_or_else(|| ValidationError::new("sensors.night_mode.day_start must be HH:mm"))?;
        parse_hh_mm(&cfg.night_start)
            .ok_or_else(|| ValidationError::new("sensors.night_mode.night_start must be HH:mm"))?;
    }
    Ok(())
}

/// Parses an `"HH:mm"` string into (hour, minute), rejecting anything else.
/// Shared with `night_mode.rs` so construction-time parsing can't diverge
/// from what validation already accepted.
pub fn parse_hh_mm(s: &str) -> Option<(u8, u8)> {
    let (h, m) = s.split_once(':')?;
    let h: u8 = h.parse().ok()?;
    let m: u8 = m.parse().ok()?;
    if h < 24 && m < 60 {
        Some((h, m))
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SensorsConfig {
    #[serde(default)]
    pub night_mode: NightModeConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransportConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_listen_port() -> u16 {
    5277
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig { listen_port: default_listen_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    pub client_ca_path: String,
}

/// The full, validated configuration tree handed to `ServiceDiscoveryBuilder`
/// and the listener loop.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    #[validate(nested)]
    pub identity: IdentityConfig,
    #[serde(default)]
    #[validate(nested)]
    pub video: VideoConfig,
    #[serde(default)]
    #[validate(nested)]
    pub display: DisplayConfig,
    #[serde(default)]
    #[validate(nested)]
    pub wifi: WifiConfig,
    #[serde(default)]
    #[validate(nested)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    #[validate(nested)]
    pub transport: TransportConfig,
    #[validate(nested)]
    pub tls: TlsConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Box<toml::de::Error>> {
        toml::from_str(s).map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [tls]
            cert_path = "hu.crt"
            key_path = "hu.key"
            client_ca_path = "phone_ca.crt"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.protocol.major, 1);
        assert_eq!(cfg.protocol.minor, 7);
        assert_eq!(cfg.video.resolution, "720p");
        assert_eq!(cfg.transport.listen_port, 5277);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_display_dimensions_fail_validation() {
        let cfg = Config::from_toml_str(
            r#"
            [display]
            width = 0
            height = 720

            [tls]
            cert_path = "hu.crt"
            key_path = "hu.key"
            client_ca_path = "phone_ca.crt"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_night_mode_time_fails_validation() {
        let cfg = Config::from_toml_str(
            r#"
            [sensors.night_mode]
            source = "time"
            day_start = "not-a-time"

            [tls]
            cert_path = "hu.crt"
            key_path = "hu.key"
            client_ca_path = "phone_ca.crt"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_hh_mm("06:30"), Some((6, 30)));
        assert_eq!(parse_hh_mm("23:59"), Some((23, 59)));
        assert_eq!(parse_hh_mm("24:00"), None);
        assert_eq!(parse_hh_mm("bad"), None);
    }
}
