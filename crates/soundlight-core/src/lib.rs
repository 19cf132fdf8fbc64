//! Session management, state reconciliation, and the device registry for
//! Sound + Light units.
//!
//! - **[`SessionManager`]**: password login, the MFA challenge, proactive
//!   and reactive token refresh, logout. Implements
//!   [`TokenSource`](soundlight_api::TokenSource) for the device transports.
//!
//! - **[`Reconciler`]**: the canonical per-device state. Applies local
//!   intents optimistically, tracks them until acknowledged, and rolls back
//!   on rejection, timeout, or overflow. Driven by a per-device actor task.
//!
//! - **[`DeviceRegistry`]**: one transport + reconciler pair per device on
//!   the account, kept in step with the account's device list.
//!
//! - **[`Engine`]**: facade bundling the two for hosts.
//!
//! Observers receive [`DeviceEvent`]s through a [`Subscription`].

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{Credentials, EngineConfig, TlsVerification};
pub use engine::Engine;
pub use error::{AuthError, CodecError, CommandError, CoreError, TransportError};
pub use event::{DeviceEvent, DeviceEventKind, Subscription};
pub use model::{
    DeviceId, DeviceInfo, DeviceSnapshot, DeviceState, Field, FieldValue, StateChanges,
};
pub use reconciler::{FrameSink, PendingCommand, Reconciler, ReconcilerSettings};
pub use registry::{DeviceRegistry, SyncReport};
pub use session::{
    AuthState, LoginResult, MemoryTokenStore, SessionInfo, SessionManager, SessionSettings,
    TokenStore,
};

// Wire-level types hosts need to build intents and read connection state.
pub use soundlight_api::{ConnectionState, ControlIntent, Hsb, Sound};
