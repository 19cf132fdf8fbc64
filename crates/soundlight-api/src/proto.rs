// Protobuf wire schema spoken by Sound + Light devices.
//
// Hand-derived `prost` messages; there is no build script and no `.proto`
// compilation step. Every scalar is `optional` so presence survives the
// round trip and a partial `Settings` only touches the fields it carries.

/// Outer envelope of every binary frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Message {
    #[prost(oneof = "message::Body", tags = "1, 2, 3")]
    pub body: Option<message::Body>,
}

pub mod message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Request(super::Request),
        #[prost(message, tag = "2")]
        Response(super::Response),
        #[prost(message, tag = "3")]
        Backend(super::Backend),
    }
}

/// Client-issued command or device-initiated change report.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub session_id: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub settings: Option<Settings>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<Status>,
    #[prost(message, optional, tag = "5")]
    pub get_settings: Option<GetSettings>,
}

/// Device reply to a `Request`; `request_id` echoes `Request.id`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(uint32, optional, tag = "1")]
    pub request_id: Option<u32>,
    #[prost(int32, optional, tag = "2")]
    pub status_code: Option<i32>,
    #[prost(message, optional, tag = "3")]
    pub settings: Option<Settings>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<Status>,
    #[prost(string, optional, tag = "5")]
    pub status_message: Option<String>,
}

/// Backend bookkeeping traffic. Carries no device state.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Backend {
    #[prost(string, optional, tag = "1")]
    pub kind: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Settings {
    /// Light brightness, 0-1. Also the brightness component of the color.
    #[prost(float, optional, tag = "1")]
    pub brightness: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub volume: Option<f32>,
    #[prost(bool, optional, tag = "3")]
    pub is_on: Option<bool>,
    #[prost(message, optional, tag = "4")]
    pub sound: Option<Sound>,
    #[prost(message, optional, tag = "5")]
    pub color: Option<Color>,
    #[prost(message, optional, tag = "6")]
    pub sound_list: Option<SoundList>,
    #[prost(float, optional, tag = "7")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "8")]
    pub humidity: Option<f32>,
}

/// Light color. Hue and saturation are both normalized to 0-1.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Color {
    #[prost(bool, optional, tag = "1")]
    pub no_color: Option<bool>,
    #[prost(float, optional, tag = "2")]
    pub hue: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub saturation: Option<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sound {
    #[prost(bool, optional, tag = "1")]
    pub no_sound: Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub track: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SoundList {
    #[prost(string, repeated, tag = "1")]
    pub tracks: Vec<String>,
}

/// Sensor readings.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(float, optional, tag = "1")]
    pub temperature: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub humidity: Option<f32>,
}

/// State poll. `all` alone does not return sensor data; the device only
/// reports temperature and humidity when they are asked for explicitly.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetSettings {
    #[prost(bool, optional, tag = "1")]
    pub all: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub temperature: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub humidity: Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub saved_sounds: Option<bool>,
}
