// Device discovery

use reqwest::StatusCode;
use secrecy::SecretString;
use tracing::info;

use super::client::CloudClient;
use super::models::{BabiesResponse, DeviceInfo};
use crate::error::Error;

const BABIES_PATH: &str = "babies";

impl CloudClient {
    /// List the Sound + Light units attached to the account's profiles.
    ///
    /// Profiles without an attached speaker (or with a speaker record that
    /// lacks a uid) are skipped. A rejected token surfaces as
    /// `Error::Unauthorized` so the caller can refresh and retry.
    pub async fn list_devices(
        &self,
        access_token: &SecretString,
    ) -> Result<Vec<DeviceInfo>, Error> {
        let resp = self.get_authorized(BABIES_PATH, access_token).await?;
        match resp.status {
            StatusCode::OK => {
                let parsed: BabiesResponse = resp.json()?;
                let devices: Vec<DeviceInfo> = parsed
                    .babies
                    .into_iter()
                    .filter_map(super::models::Baby::into_device)
                    .collect();
                for d in &devices {
                    info!(
                        speaker = %d.speaker_name,
                        uid = %d.speaker_uid,
                        "found Sound + Light device"
                    );
                }
                Ok(devices)
            }
            StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
            _ => Err(resp.unexpected()),
        }
    }
}
