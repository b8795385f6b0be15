//! Protocol engine for ECO-WORTHY / JBD battery management systems.
//!
//! The crate splits into layers:
//! * [`protocol`] encodes command frames and decodes response frames.
//! * [`reassembly`] collects transport chunks into whole frames.
//! * [`session`] drives one request/response exchange over an abstract link.
//! * [`scan`] polls a set of devices and keeps the latest snapshot of each.
//! * [`bluest_async`] implements the link over BLE GATT (feature
//!   `bluest-async`).
//! * [`mock`] provides scriptable in-memory links for testing.

mod error;

pub mod mock;
pub mod protocol;
pub mod reassembly;
pub mod scan;
pub mod session;

#[cfg(feature = "bluest-async")]
pub mod bluest_async;

pub use error::{Error, LinkError};
