// soundlight-api: Async Rust client for the Sound + Light cloud account API
// and the device WebSocket protocol.

pub mod auth;
pub mod cloud;
pub mod codec;
pub mod error;
pub mod proto;
pub mod transport;
pub mod websocket;

pub use auth::{SessionSignal, TokenError, TokenPair, TokenSource};
pub use cloud::{CloudClient, DeviceInfo, LoginOutcome};
pub use codec::{Codec, CodecError, ControlIntent, Decoded, Hsb, Sound, StateFragment};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    ConnectionConfig, ConnectionState, DeviceConnection, ReconnectConfig, TransportEvent,
};
