//! BLE door lock client.
//!
//! One request runs one bounded session: find the lock, connect, write the
//! unlock command, hold the unlocked state briefly, disconnect.

pub mod domain;
pub mod infrastructure;
