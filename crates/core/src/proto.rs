//! Protobuf message bodies carried by control-channel and per-channel
//! messages.
//!
//! These are hand-declared `prost::Message` implementors rather than
//! generated from `.proto` files: the message set here is small and fixed,
//! and `prost`'s derive macro works perfectly well against structs written
//! directly, without a `build.rs`/`protoc` step. The wire format produced is
//! identical to what codegen would emit for the equivalent `.proto`.

use prost::{Enumeration, Message, Oneof};

// ---------------------------------------------------------------------
// Control channel (channel 0) bodies. VERSION_REQUEST/RESPONSE are raw
// binary, not protobuf, and are handled directly in `control_channel.rs`.
// ---------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct ServiceDiscoveryRequest {
    #[prost(string, optional, tag = "1")]
    pub device_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServiceDiscoveryResponse {
    #[prost(string, tag = "1")]
    pub head_unit_name: String,
    #[prost(string, tag = "2")]
    pub car_model: String,
    #[prost(string, tag = "3")]
    pub car_year: String,
    #[prost(string, tag = "4")]
    pub car_serial: String,
    #[prost(bool, tag = "5")]
    pub left_hand_drive_vehicle: bool,
    #[prost(string, tag = "6")]
    pub headunit_manufacturer: String,
    #[prost(string, tag = "7")]
    pub headunit_model: String,
    #[prost(string, tag = "8")]
    pub sw_build: String,
    #[prost(string, tag = "9")]
    pub sw_version: String,
    #[prost(bool, tag = "10")]
    pub can_play_native_media_during_vr: bool,
    #[prost(message, repeated, tag = "11")]
    pub channels: Vec<ChannelDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelDescriptor {
    #[prost(int32, tag = "1")]
    pub channel_id: i32,
    #[prost(oneof = "ChannelDescriptorKind", tags = "2,3,4,5,6,7,8,9")]
    pub desc: Option<ChannelDescriptorKind>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum ChannelDescriptorKind {
    #[prost(message, tag = "2")]
    Video(VideoChannelDescriptor),
    #[prost(message, tag = "3")]
    Audio(AudioChannelDescriptor),
    #[prost(message, tag = "4")]
    Input(InputChannelDescriptor),
    #[prost(message, tag = "5")]
    Sensor(SensorChannelDescriptor),
    #[prost(message, tag = "6")]
    Bluetooth(BluetoothChannelDescriptor),
    #[prost(message, tag = "7")]
    Wifi(WifiChannelDescriptor),
    #[prost(message, tag = "8")]
    Navigation(NavigationChannelDescriptor),
    #[prost(message, tag = "9")]
    Empty(EmptyChannelDescriptor),
}

/// Used for AVInput, MediaStatus and PhoneStatus: they are advertised but
/// carry no channel-specific configuration.
#[derive(Clone, PartialEq, Message)]
pub struct EmptyChannelDescriptor {}

#[derive(Clone, PartialEq, Message)]
pub struct VideoChannelDescriptor {
    #[prost(message, repeated, tag = "1")]
    pub configs: Vec<VideoConfig>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VideoConfig {
    #[prost(enumeration = "VideoResolution", tag = "1")]
    pub resolution: i32,
    #[prost(enumeration = "VideoFps", tag = "2")]
    pub fps: i32,
    #[prost(uint32, tag = "3")]
    pub dpi: u32,
    #[prost(int32, tag = "4")]
    pub margin_width: i32,
    #[prost(int32, tag = "5")]
    pub margin_height: i32,
    #[prost(enumeration = "VideoCodec", tag = "6")]
    pub codec: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum VideoResolution {
    Res480p = 0,
    Res720p = 1,
    Res1080p = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum VideoFps {
    Fps30 = 0,
    Fps60 = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum VideoCodec {
    H264 = 0,
    H265 = 1,
    Vp9 = 2,
    Av1 = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum AudioType {
    Media = 0,
    Speech = 1,
    System = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct AudioChannelDescriptor {
    #[prost(enumeration = "AudioType", tag = "1")]
    pub audio_type: i32,
    #[prost(uint32, tag = "2")]
    pub sample_rate: u32,
    #[prost(uint32, tag = "3")]
    pub bit_depth: u32,
    #[prost(uint32, tag = "4")]
    pub channel_count: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct InputChannelDescriptor {
    #[prost(uint32, tag = "1")]
    pub touchscreen_width: u32,
    #[prost(uint32, tag = "2")]
    pub touchscreen_height: u32,
    #[prost(uint32, repeated, tag = "3")]
    pub supported_keycodes: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum SensorType {
    NightData = 0,
    DrivingStatus = 1,
    Location = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct SensorChannelDescriptor {
    #[prost(enumeration = "SensorType", repeated, tag = "1")]
    pub sensors: Vec<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BluetoothChannelDescriptor {
    #[prost(string, tag = "1")]
    pub adapter_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct WifiChannelDescriptor {
    #[prost(string, tag = "1")]
    pub ssid: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct NavigationChannelDescriptor {
    #[prost(uint32, tag = "1")]
    pub minimum_interval_ms: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelOpenRequest {
    #[prost(int32, tag = "1")]
    pub channel_id: i32,
    #[prost(enumeration = "Priority", tag = "2")]
    pub priority: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum Priority {
    Normal = 0,
    High = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    InvalidChannel = 1,
    AuthenticationFailure = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelOpenResponse {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthCompleteIndication {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PingRequest {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PingResponse {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum ShutdownReason {
    Quit = 0,
    Unknown = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct ShutdownRequest {
    #[prost(enumeration = "ShutdownReason", tag = "1")]
    pub reason: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ShutdownResponse {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum AudioFocusRequestType {
    Gain = 0,
    GainTransient = 1,
    GainNavi = 2,
    Release = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum AudioFocusResponseType {
    Gain = 0,
    GainTransient = 1,
    GainTransientGuidanceOnly = 2,
    Loss = 3,
    None = 4,
}

#[derive(Clone, PartialEq, Message)]
pub struct AudioFocusRequest {
    #[prost(enumeration = "AudioFocusRequestType", tag = "1")]
    pub request_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct AudioFocusResponse {
    #[prost(enumeration = "AudioFocusResponseType", tag = "1")]
    pub response_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct NavFocusRequest {
    #[prost(int32, tag = "1")]
    pub focus_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct NavFocusResponse {
    #[prost(int32, tag = "1")]
    pub focus_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CallAvailabilityStatus {
    #[prost(bool, tag = "1")]
    pub call_available: bool,
}

// ---------------------------------------------------------------------
// AV channel (video / media / speech / system audio) bodies.
// ---------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct AvChannelSetupRequest {
    #[prost(int32, tag = "1")]
    pub config_index: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum AvChannelSetupStatus {
    Ok = 0,
    Fail = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct AvChannelSetupResponse {
    #[prost(enumeration = "AvChannelSetupStatus", tag = "1")]
    pub media_status: i32,
    #[prost(uint32, tag = "2")]
    pub max_unacked: u32,
    #[prost(int32, repeated, tag = "3")]
    pub configs: Vec<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AvChannelStartIndication {
    #[prost(int32, tag = "1")]
    pub session: i32,
    #[prost(int32, optional, tag = "2")]
    pub config_index: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AvChannelStopIndication {}

#[derive(Clone, PartialEq, Message)]
pub struct AvMediaAckIndication {
    #[prost(int32, tag = "1")]
    pub session: i32,
    #[prost(uint32, tag = "2")]
    pub value: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum VideoFocusMode {
    None = 0,
    Projected = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct VideoFocusRequest {
    #[prost(enumeration = "VideoFocusMode", tag = "1")]
    pub mode: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct VideoFocusIndication {
    #[prost(enumeration = "VideoFocusMode", tag = "1")]
    pub mode: i32,
    #[prost(bool, tag = "2")]
    pub unrequested: bool,
}

// ---------------------------------------------------------------------
// Input channel
// ---------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct TouchLocation {
    #[prost(uint32, tag = "1")]
    pub x: u32,
    #[prost(uint32, tag = "2")]
    pub y: u32,
    #[prost(uint32, tag = "3")]
    pub pointer_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enumeration)]
#[repr(i32)]
pub enum TouchAction {
    Down = 0,
    Up = 1,
    Move = 2,
    PointerDown = 5,
    PointerUp = 6,
}

#[derive(Clone, PartialEq, Message)]
pub struct TouchEventIndication {
    #[prost(message, repeated, tag = "1")]
    pub pointer_data: Vec<TouchLocation>,
    #[prost(uint32, tag = "2")]
    pub action_index: u32,
    #[prost(enumeration = "TouchAction", tag = "3")]
    pub action: i32,
}

// ---------------------------------------------------------------------
// Sensor channel
// ---------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct SensorStartRequest {
    #[prost(enumeration = "SensorType", tag = "1")]
    pub sensor_type: i32,
    #[prost(uint32, tag = "2")]
    pub refresh_interval_ms: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SensorStartResponse {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct NightModeData {
    #[prost(bool, tag = "1")]
    pub is_night: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct SensorEventIndication {
    #[prost(message, optional, tag = "1")]
    pub night_mode: Option<NightModeData>,
}
