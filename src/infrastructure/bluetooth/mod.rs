//! Bluetooth Module
//!
//! Drives a single unlock write against the door lock peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   SessionController                      │
//! │  (Single-flight unlock state machine, public API)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Name    │  │ - GATT     │  │ - Unlock │
//! │   match   │  │   link     │  │   JSON   │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!      ┌───────────────┐
//!      │  BleRadio     │  btleplug in production, scripted fake in tests
//!      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Radio and GATT link traits shared by every backend
//! - [`btleplug_radio`] - Cross-platform backend built on btleplug
//! - [`protocol`] - Unlock command encoding
//! - [`scanner`] - Time-bounded discovery by advertised name
//! - [`connection`] - Owns the single GATT link
//! - [`service`] - Session controller

pub mod btleplug_radio;
pub mod connection;
#[cfg(test)]
pub(crate) mod fake;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod service;

pub use btleplug_radio::BtleplugRadio;
pub use service::SessionController;
