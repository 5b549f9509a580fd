//! Assembles the channel-descriptor set (codecs, resolutions, audio
//! configs, sensor list, Wi-Fi SSID, Bluetooth address) from [`Config`]
//! into the [`SessionConfig`] that `Session` hands the phone during service
//! discovery.

use log::{info, warn};

use crate::config::Config;
use crate::proto;

/// Read-only, built once per connection from [`Config`]; consumed by
/// `Session`, never mutated afterward.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub head_unit_name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
    pub sw_build: String,
    pub car_model: String,
    pub car_year: String,
    pub car_serial: String,
    pub left_hand_drive: bool,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub version_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub ping_interval_ms: u64,
    /// Ordered `(channelId, descriptor)` pairs, in the order the phone is
    /// told about them.
    pub channels: Vec<(u8, proto::ChannelDescriptor)>,
}

pub struct ServiceDiscoveryBuilder;

impl ServiceDiscoveryBuilder {
    pub fn build(config: &Config) -> SessionConfig {
        let mut channels = Vec::new();
        channels.push((3, Self::video_descriptor(config)));
        channels.push((4, Self::audio_descriptor(4, proto::AudioType::Media, 48000, 2)));
        channels.push((5, Self::audio_descriptor(5, proto::AudioType::Speech, 48000, 1)));
        channels.push((6, Self::audio_descriptor(6, proto::AudioType::System, 16000, 1)));
        channels.push((1, Self::input_descriptor(config)));
        channels.push((2, Self::sensor_descriptor(config)));
        channels.push((8, Self::bluetooth_descriptor(config)));
        channels.push((14, Self::wifi_descriptor(config)));
        channels.push((7, Self::empty_descriptor(7)));
        channels.push((9, Self::navigation_descriptor(9)));
        channels.push((10, Self::empty_descriptor(10)));
        channels.push((11, Self::empty_descriptor(11)));

        SessionConfig {
            head_unit_name: config.identity.head_unit_name.clone(),
            manufacturer: config.identity.manufacturer.clone(),
            model: config.identity.model.clone(),
            sw_version: config.identity.sw_version.clone(),
            sw_build: config.identity.sw_build.clone(),
            car_model: config.identity.car_model.clone(),
            car_year: config.identity.car_year.clone(),
            car_serial: "00000000".to_string(),
            left_hand_drive: config.identity.left_hand_drive,
            protocol_major: config.protocol.major,
            protocol_minor: config.protocol.minor,
            version_timeout_ms: config.protocol.version_timeout_ms,
            handshake_timeout_ms: config.protocol.handshake_timeout_ms,
            discovery_timeout_ms: config.protocol.discovery_timeout_ms,
            ping_interval_ms: config.protocol.ping_interval_ms,
            channels,
        }
    }

    /// Usable area = display rect minus the sidebar's width (left/right) or
    /// height (top/bottom); margins are the letterboxing needed to centre
    /// `(remote_w, remote_h)` within that area, clamped at zero.
    fn calc_margins(config: &Config, remote_w: u32, remote_h: u32) -> (i32, i32) {
        let sidebar = &config.video.sidebar;
        if !sidebar.enabled || sidebar.width == 0 {
            return (0, 0);
        }

        let display_w = config.display.width;
        let display_h = config.display.height;
        let horizontal = matches!(sidebar.position.as_str(), "top" | "bottom");

        let viewport_w = if horizontal { display_w } else { display_w.saturating_sub(sidebar.width) };
        let viewport_h = if horizontal { display_h.saturating_sub(sidebar.width) } else { display_h };
        if viewport_w == 0 || viewport_h == 0 {
            return (0, 0);
        }

        let screen_ratio = viewport_w as f64 / viewport_h as f64;
        let remote_ratio = remote_w as f64 / remote_h as f64;

        if screen_ratio < remote_ratio {
            let margin_w = (remote_w as f64 - remote_h as f64 * screen_ratio).round();
            (margin_w.max(0.0) as i32, 0)
        } else {
            let margin_h = (remote_h as f64 - remote_w as f64 / screen_ratio).round();
            (0, margin_h.max(0.0) as i32)
        }
    }

    fn resolution_dims(resolution: &str) -> (u32, u32, proto::VideoResolution) {
        match resolution {
            "480p" => (800, 480, proto::VideoResolution::Res480p),
            "1080p" => (1920, 1080, proto::VideoResolution::Res1080p),
            _ => (1280, 720, proto::VideoResolution::Res720p),
        }
    }

    fn video_descriptor(config: &Config) -> proto::ChannelDescriptor {
        let (remote_w, remote_h, resolution) = Self::resolution_dims(&config.video.resolution);
        let (margin_width, margin_height) = Self::calc_margins(config, remote_w, remote_h);
        let fps = if config.video.fps == 60 { proto::VideoFps::Fps60 } else { proto::VideoFps::Fps30 };

        let mut configs: Vec<proto::VideoConfig> = config
            .video
            .codecs
            .iter()
            .filter_map(|name| match name.to_lowercase().as_str() {
                "h264" => Some(proto::VideoCodec::H264),
                "h265" => Some(proto::VideoCodec::H265),
                "vp9" => Some(proto::VideoCodec::Vp9),
                "av1" => Some(proto::VideoCodec::Av1),
                other => {
                    warn!("unknown codec in config: {other}, skipping");
                    None
                }
            })
            .map(|codec| proto::VideoConfig {
                resolution: resolution as i32,
                fps: fps as i32,
                dpi: config.video.dpi,
                margin_width,
                margin_height,
                codec: codec as i32,
            })
            .collect();

        if configs.is_empty() {
            warn!("no valid codecs in config, falling back to H.264 720p");
            let (remote_w, remote_h, resolution) = Self::resolution_dims("720p");
            let (margin_width, margin_height) = Self::calc_margins(config, remote_w, remote_h);
            configs.push(proto::VideoConfig {
                resolution: resolution as i32,
                fps: proto::VideoFps::Fps30 as i32,
                dpi: config.video.dpi,
                margin_width,
                margin_height,
                codec: proto::VideoCodec::H264 as i32,
            });
        }

        info!("advertising {} video config(s)", configs.len());
        proto::ChannelDescriptor {
            channel_id: 3,
            desc: Some(proto::ChannelDescriptorKind::Video(proto::VideoChannelDescriptor { configs })),
        }
    }

    fn audio_descriptor(
        channel_id: u8,
        audio_type: proto::AudioType,
        sample_rate: u32,
        channel_count: u32,
    ) -> proto::ChannelDescriptor {
        proto::ChannelDescriptor {
            channel_id: channel_id as i32,
            desc: Some(proto::ChannelDescriptorKind::Audio(proto::AudioChannelDescriptor {
                audio_type: audio_type as i32,
                sample_rate,
                bit_depth: 16,
                channel_count,
            })),
        }
    }

    fn input_descriptor(config: &Config) -> proto::ChannelDescriptor {
        let (touch_w, touch_h) = Self::input_touch_dims(config);

        proto::ChannelDescriptor {
            channel_id: 1,
            desc: Some(proto::ChannelDescriptorKind::Input(proto::InputChannelDescriptor {
                touchscreen_width: touch_w,
                touchscreen_height: touch_h,
                // KEYCODE_HOME, KEYCODE_BACK, KEYCODE_MICROPHONE
                supported_keycodes: vec![3, 4, 84],
            })),
        }
    }

    /// The touchscreen dimensions advertised in service discovery, minus
    /// letterboxing margins. Exposed separately from `input_descriptor` so
    /// `InputHandler` can be built with the same real dimensions rather than
    /// a placeholder, since `BINDING_RESPONSE` reuses `InputChannelDescriptor`.
    pub fn input_touch_dims(config: &Config) -> (u32, u32) {
        let (remote_w, remote_h, _) = Self::resolution_dims(&config.video.resolution);
        let (margin_w, margin_h) = Self::calc_margins(config, remote_w, remote_h);
        let touch_w = (remote_w as i32 - margin_w).max(0) as u32;
        let touch_h = (remote_h as i32 - margin_h).max(0) as u32;
        (touch_w, touch_h)
    }

    /// NIGHT_DATA is advertised unconditionally: `NightModeProvider` is
    /// always present regardless of which source config selects.
    fn sensor_descriptor(_config: &Config) -> proto::ChannelDescriptor {
        let sensors = vec![proto::SensorType::NightData as i32];
        proto::ChannelDescriptor {
            channel_id: 2,
            desc: Some(proto::ChannelDescriptorKind::Sensor(proto::SensorChannelDescriptor { sensors })),
        }
    }

    fn bluetooth_descriptor(config: &Config) -> proto::ChannelDescriptor {
        proto::ChannelDescriptor {
            channel_id: 8,
            desc: Some(proto::ChannelDescriptorKind::Bluetooth(proto::BluetoothChannelDescriptor {
                adapter_address: config.bluetooth.adapter_address.clone(),
            })),
        }
    }

    fn wifi_descriptor(config: &Config) -> proto::ChannelDescriptor {
        proto::ChannelDescriptor {
            channel_id: 14,
            desc: Some(proto::ChannelDescriptorKind::Wifi(proto::WifiChannelDescriptor {
                ssid: config.wifi.ssid.clone(),
            })),
        }
    }

    fn navigation_descriptor(channel_id: u8) -> proto::ChannelDescriptor {
        proto::ChannelDescriptor {
            channel_id: channel_id as i32,
            desc: Some(proto::ChannelDescriptorKind::Navigation(proto::NavigationChannelDescriptor {
                minimum_interval_ms: 500,
            })),
        }
    }

    fn empty_descriptor(channel_id: u8) -> proto::ChannelDescriptor {
        proto::ChannelDescriptor {
            channel_id: channel_id as i32,
            desc: Some(proto::ChannelDescriptorKind::Empty(proto::EmptyChannelDescriptor {})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DisplayConfig, IdentityConfig, ProtocolConfig, SensorsConfig, TlsConfig, TransportConfig, VideoConfig, WifiConfig, BluetoothConfig, SidebarConfig};

    fn base_config() -> Config {
        Config {
            protocol: ProtocolConfig::default(),
            identity: IdentityConfig::default(),
            video: VideoConfig::default(),
            display: DisplayConfig::default(),
            wifi: WifiConfig::default(),
            bluetooth: BluetoothConfig::default(),
            sensors: SensorsConfig::default(),
            transport: TransportConfig::default(),
            tls: TlsConfig { cert_path: "a".into(), key_path: "b".into(), client_ca_path: "c".into() },
        }
    }

    #[test]
    fn at_least_one_video_config_is_always_advertised() {
        let mut config = base_config();
        config.video.codecs = vec!["bogus".to_string()];
        let session_config = ServiceDiscoveryBuilder::build(&config);
        let (_, video) = session_config.channels.iter().find(|(id, _)| *id == 3).unwrap();
        match &video.desc {
            Some(proto::ChannelDescriptorKind::Video(v)) => {
                assert_eq!(v.configs.len(), 1);
                assert_eq!(v.configs[0].codec, proto::VideoCodec::H264 as i32);
            }
            _ => panic!("expected video descriptor"),
        }
    }

    #[test]
    fn margins_are_zero_without_a_sidebar() {
        let config = base_config();
        let (mw, mh) = ServiceDiscoveryBuilder::calc_margins(&config, 1280, 720);
        assert_eq!((mw, mh), (0, 0));
    }

    #[test]
    fn left_sidebar_narrows_viewport_and_adds_width_margin() {
        let mut config = base_config();
        config.display = DisplayConfig { width: 1920, height: 1080 };
        config.video.sidebar = SidebarConfig { enabled: true, width: 400, position: "left".to_string() };
        // viewport: 1520x1080, ratio ~1.407; remote 1280x720 ratio ~1.778
        // screen_ratio < remote_ratio -> margin on width
        let (mw, mh) = ServiceDiscoveryBuilder::calc_margins(&config, 1280, 720);
        assert!(mw > 0);
        assert_eq!(mh, 0);
    }

    #[test]
    fn input_touch_dims_matches_advertised_input_descriptor() {
        let config = base_config();
        let session_config = ServiceDiscoveryBuilder::build(&config);
        let (_, input) = session_config.channels.iter().find(|(id, _)| *id == 1).unwrap();
        let advertised = match &input.desc {
            Some(proto::ChannelDescriptorKind::Input(i)) => (i.touchscreen_width, i.touchscreen_height),
            _ => panic!("expected input descriptor"),
        };
        assert_eq!(ServiceDiscoveryBuilder::input_touch_dims(&config), advertised);
    }

    #[test]
    fn sensor_descriptor_always_advertises_night_data() {
        let config = base_config();
        let session_config = ServiceDiscoveryBuilder::build(&config);
        let (_, sensor) = session_config.channels.iter().find(|(id, _)| *id == 2).unwrap();
        match &sensor.desc {
            Some(proto::ChannelDescriptorKind::Sensor(s)) => {
                assert!(s.sensors.contains(&(proto::SensorType::NightData as i32)));
            }
            _ => panic!("expected sensor descriptor"),
        }
    }
}
