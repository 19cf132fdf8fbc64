// ── Domain model ──
//
// Device identity, connection status, and the per-field state mirror.

pub mod device;
pub mod state;

pub use device::{DeviceId, DeviceInfo, DeviceSnapshot};
pub use state::{DeviceState, Field, FieldValue, StateChanges};
