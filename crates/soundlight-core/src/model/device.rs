use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use soundlight_api::DeviceInfo;
use soundlight_api::ConnectionState;

use super::state::DeviceState;

/// Stable device identifier (the speaker uid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&DeviceInfo> for DeviceId {
    fn from(info: &DeviceInfo) -> Self {
        Self(info.speaker_uid.clone())
    }
}

/// Point-in-time view of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub info: DeviceInfo,
    pub connection: ConnectionState,
    pub state: Arc<DeviceState>,
}
