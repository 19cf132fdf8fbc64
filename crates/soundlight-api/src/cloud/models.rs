// Account API wire types
//
// Request bodies are borrowed views over caller data; response types keep
// every field optional and let the endpoint methods decide what is required.

use serde::{Deserialize, Serialize};

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub channel: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_code: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

// ── Responses ────────────────────────────────────────────────────────

/// Body of login, MFA, and refresh responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub mfa_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BabiesResponse {
    #[serde(default)]
    pub babies: Vec<Baby>,
}

/// A profile ("baby") record. Speakers hang off these.
#[derive(Debug, Deserialize)]
pub(crate) struct Baby {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub speaker: Option<SpeakerAttachment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SpeakerAttachment {
    #[serde(default)]
    pub attached_to_speaker: bool,
    #[serde(default)]
    pub speaker: Option<Speaker>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Speaker {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A Sound + Light unit attached to one of the account's profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub speaker_uid: String,
    pub speaker_name: String,
    pub baby_uid: String,
    pub baby_name: String,
}

impl Baby {
    /// The attached speaker, when the record has one with a uid.
    pub(crate) fn into_device(self) -> Option<DeviceInfo> {
        let attachment = self.speaker?;
        if !attachment.attached_to_speaker {
            return None;
        }
        let speaker = attachment.speaker?;
        let speaker_uid = speaker.uid?;
        Some(DeviceInfo {
            speaker_name: speaker.name.unwrap_or_else(|| "Sound + Light".into()),
            speaker_uid,
            baby_uid: self.uid,
            baby_name: self.name.unwrap_or_else(|| "Nanit".into()),
        })
    }
}
