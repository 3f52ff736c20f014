//! Bluetooth Low Energy subsystem.
//!
//! This module drives the Nordic SoftDevice S140 in **Peripheral** role:
//!
//! 1. **Codec** - decodes and validates characteristic writes into
//!    `ScaleCommand`s, encodes weight/calibration values.
//! 2. **Server** - the scale GATT service, advertising, the connection
//!    loop and the value mirror that keeps readable characteristics and
//!    weight notifications in step with the scale task's snapshot.
//!
//! Writes travel to the scale task over an Embassy channel; the callback
//! never blocks and never touches scale state directly.

pub mod codec;
pub mod server;
