// Message codec: control intents to wire frames and back.
//
// Encoding validates user-facing values (hue in degrees, everything else
// 0-1), converts them to wire units, and stamps a fresh request id.
// Decoding never fails on content it does not understand: unknown fields
// are skipped and flagged, unknown tracks are reported, and bodies without
// device state come back as `Decoded::Unrecognized`. Only bytes that are
// not valid protobuf produce an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use prost::Message as _;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::proto;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    /// Input outside the field's valid range, or not a finite number.
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },

    /// Bytes that are not a valid protobuf `Message`.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

// ── Domain values ───────────────────────────────────────────────────

/// Built-in sounds. `None` is silence; every other variant maps to the
/// track name the device uses on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    #[strum(to_string = "No sound", serialize = "none")]
    None,
    #[strum(serialize = "White Noise")]
    WhiteNoise,
    #[strum(serialize = "Waves")]
    Waves,
    #[strum(serialize = "Rain")]
    Rain,
    #[strum(serialize = "Wind")]
    Wind,
    #[strum(serialize = "Birds")]
    Birds,
    #[strum(serialize = "Heartbeat")]
    Heartbeat,
    #[strum(serialize = "Shush")]
    Shush,
    #[strum(serialize = "Fan")]
    Fan,
    #[strum(serialize = "Forest")]
    Forest,
    #[strum(serialize = "Lullaby")]
    Lullaby,
    #[strum(serialize = "Brahms Lullaby")]
    BrahmsLullaby,
}

impl Sound {
    /// Wire track name, `None` for silence.
    pub fn track(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            other => Some(other.into()),
        }
    }

    /// Map a wire track name back to a sound. Empty means silence.
    pub fn from_track(track: &str) -> Option<Self> {
        let track = track.trim();
        if track.is_empty() {
            return Some(Self::None);
        }
        track.parse().ok()
    }
}

/// Hue in degrees (0-360), saturation and brightness 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsb {
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
}

/// A single user-level control action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlIntent {
    SetPower(bool),
    SetBrightness(f32),
    SetColor(Hsb),
    SetVolume(f32),
    SetSound(Sound),
    /// Light on/off while the unit stays powered (`noColor` on the wire).
    SetLight(bool),
}

impl ControlIntent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPower(_) => "set_power",
            Self::SetBrightness(_) => "set_brightness",
            Self::SetColor(_) => "set_color",
            Self::SetVolume(_) => "set_volume",
            Self::SetSound(_) => "set_sound",
            Self::SetLight(_) => "set_light",
        }
    }

    /// Check ranges without encoding.
    pub fn validate(&self) -> Result<(), CodecError> {
        match *self {
            Self::SetPower(_) | Self::SetSound(_) | Self::SetLight(_) => Ok(()),
            Self::SetBrightness(v) => check_unit("brightness", v),
            Self::SetVolume(v) => check_unit("volume", v),
            Self::SetColor(hsb) => {
                check_range("hue", hsb.hue, 0.0, 360.0)?;
                check_unit("saturation", hsb.saturation)?;
                check_unit("brightness", hsb.brightness)
            }
        }
    }

    /// The state this intent asks the device to adopt, in domain units.
    pub fn expected_state(&self) -> StateFragment {
        let mut fragment = StateFragment::default();
        match *self {
            Self::SetPower(on) => fragment.power = Some(on),
            Self::SetBrightness(v) => fragment.brightness = Some(v.clamp(0.0, 1.0)),
            Self::SetColor(hsb) => {
                fragment.hue = Some(hsb.hue.clamp(0.0, 360.0));
                fragment.saturation = Some(hsb.saturation.clamp(0.0, 1.0));
                fragment.brightness = Some(hsb.brightness.clamp(0.0, 1.0));
                fragment.light_enabled = Some(true);
            }
            Self::SetVolume(v) => fragment.volume = Some(v.clamp(0.0, 1.0)),
            Self::SetSound(sound) => fragment.sound = Some(sound),
            Self::SetLight(on) => fragment.light_enabled = Some(on),
        }
        fragment
    }

    fn to_settings(self) -> proto::Settings {
        let mut settings = proto::Settings::default();
        match self {
            Self::SetPower(on) => settings.is_on = Some(on),
            Self::SetBrightness(v) => settings.brightness = Some(v.clamp(0.0, 1.0)),
            Self::SetColor(hsb) => {
                settings.color = Some(proto::Color {
                    no_color: Some(false),
                    hue: Some((hsb.hue / 360.0).clamp(0.0, 1.0)),
                    saturation: Some(hsb.saturation.clamp(0.0, 1.0)),
                });
                settings.brightness = Some(hsb.brightness.clamp(0.0, 1.0));
            }
            Self::SetVolume(v) => settings.volume = Some(v.clamp(0.0, 1.0)),
            Self::SetSound(sound) => {
                settings.sound = Some(proto::Sound {
                    no_sound: Some(sound == Sound::None),
                    track: Some(sound.track().unwrap_or_default().to_owned()),
                });
            }
            Self::SetLight(on) => {
                settings.color = Some(proto::Color {
                    no_color: Some(!on),
                    hue: None,
                    saturation: None,
                });
            }
        }
        settings
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), CodecError> {
    check_range(field, value, 0.0, 1.0)
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), CodecError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CodecError::InvalidValue {
            field,
            value: f64::from(value),
        })
    }
}

// ── Decoded output ──────────────────────────────────────────────────

/// A device response that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status_code: i32,
    pub message: Option<String>,
}

/// A partial device state report. Absent fields are "not mentioned".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFragment {
    /// Echoed request id when this is a response to one of our requests.
    pub correlation_id: Option<u32>,
    pub rejection: Option<Rejection>,

    pub power: Option<bool>,
    pub brightness: Option<f32>,
    /// Degrees.
    pub hue: Option<f32>,
    pub saturation: Option<f32>,
    pub light_enabled: Option<bool>,
    pub volume: Option<f32>,
    pub sound: Option<Sound>,
    pub sound_list: Option<Vec<String>>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,

    /// The frame carried fields this schema does not know.
    pub has_unknown_fields: bool,
    /// Track names that matched no known sound.
    pub unknown_tracks: Vec<String>,
}

impl StateFragment {
    pub fn is_rejection(&self) -> bool {
        self.rejection.is_some()
    }

    /// `true` when the fragment carries no state at all.
    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.brightness.is_none()
            && self.hue.is_none()
            && self.saturation.is_none()
            && self.light_enabled.is_none()
            && self.volume.is_none()
            && self.sound.is_none()
            && self.sound_list.is_none()
            && self.temperature.is_none()
            && self.humidity.is_none()
    }

    fn merge_settings(&mut self, settings: proto::Settings) {
        if let Some(on) = settings.is_on {
            self.power = Some(on);
        }
        if let Some(b) = settings.brightness {
            self.brightness = Some(b.clamp(0.0, 1.0));
        }
        if let Some(v) = settings.volume {
            self.volume = Some(v.clamp(0.0, 1.0));
        }
        if let Some(color) = settings.color {
            if let Some(no_color) = color.no_color {
                self.light_enabled = Some(!no_color);
            }
            if let Some(h) = color.hue {
                self.hue = Some((h * 360.0).clamp(0.0, 360.0));
            }
            if let Some(s) = color.saturation {
                self.saturation = Some(s.clamp(0.0, 1.0));
            }
        }
        if let Some(sound) = settings.sound {
            self.merge_sound(sound);
        }
        if let Some(list) = settings.sound_list {
            self.sound_list = Some(list.tracks);
        }
        if let Some(t) = settings.temperature {
            self.temperature = Some(t);
        }
        if let Some(h) = settings.humidity {
            self.humidity = Some(h);
        }
    }

    fn merge_sound(&mut self, sound: proto::Sound) {
        if sound.no_sound == Some(true) {
            self.sound = Some(Sound::None);
            return;
        }
        let Some(track) = sound.track else {
            if sound.no_sound == Some(false) {
                tracing::debug!("sound report without a track name");
            }
            return;
        };
        match Sound::from_track(&track) {
            Some(known) => self.sound = Some(known),
            None => self.unknown_tracks.push(track),
        }
    }

    fn merge_status(&mut self, status: proto::Status) {
        if let Some(t) = status.temperature {
            self.temperature = Some(t);
        }
        if let Some(h) = status.humidity {
            self.humidity = Some(h);
        }
    }
}

/// Frames with no device state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unrecognized {
    /// Backend bookkeeping message.
    Backend { kind: Option<String> },
    /// Envelope without any known body.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Fragment(StateFragment),
    Unrecognized(Unrecognized),
}

/// An encoded request ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub correlation_id: u32,
    pub bytes: Bytes,
}

// ── Codec ───────────────────────────────────────────────────────────

/// Per-device codec. Clones share the request id counter, so control
/// commands and state polls never reuse an id on the same connection.
#[derive(Debug, Clone)]
pub struct Codec {
    next_id: Arc<AtomicU32>,
    session_id: Arc<str>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU32::new(1)),
            session_id: uuid::Uuid::new_v4().to_string().into(),
        }
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // 0 is what an absent request_id decodes to
            if id != 0 {
                return id;
            }
        }
    }

    fn wrap(
        &self,
        settings: Option<proto::Settings>,
        get: Option<proto::GetSettings>,
    ) -> EncodedCommand {
        let id = self.next_request_id();
        let message = proto::Message {
            body: Some(proto::message::Body::Request(proto::Request {
                id: Some(id),
                session_id: Some(self.session_id.to_string()),
                settings,
                status: None,
                get_settings: get,
            })),
        };
        EncodedCommand {
            correlation_id: id,
            bytes: Bytes::from(message.encode_to_vec()),
        }
    }

    /// Encode a control intent with a fresh correlation id.
    pub fn encode(&self, intent: &ControlIntent) -> Result<EncodedCommand, CodecError> {
        intent.validate()?;
        Ok(self.wrap(Some(intent.to_settings()), None))
    }

    /// Full state poll including sensor readings.
    pub fn state_request(&self) -> EncodedCommand {
        self.wrap(
            None,
            Some(proto::GetSettings {
                all: Some(true),
                temperature: Some(true),
                humidity: Some(true),
                saved_sounds: None,
            }),
        )
    }

    /// Ask for the device's saved track list.
    pub fn sound_list_request(&self) -> EncodedCommand {
        self.wrap(
            None,
            Some(proto::GetSettings {
                all: None,
                temperature: None,
                humidity: None,
                saved_sounds: Some(true),
            }),
        )
    }

    /// Decode one binary frame.
    pub fn decode(bytes: &[u8]) -> Result<Decoded, CodecError> {
        let message =
            proto::Message::decode(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        // prost drops unknown fields, so a shorter re-encoding means some were skipped
        let has_unknown_fields = message.encoded_len() < bytes.len();

        let mut fragment = match message.body {
            None => return Ok(Decoded::Unrecognized(Unrecognized::Empty)),
            Some(proto::message::Body::Backend(backend)) => {
                return Ok(Decoded::Unrecognized(Unrecognized::Backend {
                    kind: backend.kind,
                }));
            }
            Some(proto::message::Body::Response(response)) => {
                let mut fragment = StateFragment {
                    correlation_id: response.request_id,
                    ..StateFragment::default()
                };
                if let Some(code) = response.status_code.filter(|c| !is_success(*c)) {
                    fragment.rejection = Some(Rejection {
                        status_code: code,
                        message: response.status_message,
                    });
                }
                if let Some(settings) = response.settings {
                    fragment.merge_settings(settings);
                }
                if let Some(status) = response.status {
                    fragment.merge_status(status);
                }
                fragment
            }
            Some(proto::message::Body::Request(request)) => {
                let mut fragment = StateFragment::default();
                if let Some(settings) = request.settings {
                    fragment.merge_settings(settings);
                }
                if let Some(status) = request.status {
                    fragment.merge_status(status);
                }
                fragment
            }
        };

        fragment.has_unknown_fields = has_unknown_fields;
        Ok(Decoded::Fragment(fragment))
    }
}

fn is_success(code: i32) -> bool {
    code == 0 || (200..300).contains(&code)
}
