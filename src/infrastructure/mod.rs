pub mod bluetooth;
pub mod identity_cache;
pub mod logging;
