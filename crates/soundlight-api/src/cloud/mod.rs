// Account service client
//
// Hand-written client for the cloud account API: password login, the
// email MFA challenge, token refresh, and the device list. Endpoint groups
// live in separate files as inherent methods on `CloudClient`.

pub mod auth;
pub mod client;
pub mod devices;
pub mod models;

pub use auth::LoginOutcome;
pub use client::CloudClient;
pub use models::DeviceInfo;
