//! # Ember Platform Seams
//!
//! The small set of services the Ember core consumes from the platform it
//! runs on:
//! - **Time**: a monotonic millisecond counter ([`TimeSource`])
//! - **Logging**: a single text sink fed by the `log` facade ([`logging`])
//!
//! The bus-dispatch primitive lives with the bus engine (`ember_bus::BusDriver`)
//! because its shape is dictated by the transfer state machine.
//!
//! ## Build Modes
//!
//! ```bash
//! # Bare no_std (default) - the board crate provides its own TimeSource
//! cargo build
//!
//! # Host builds - adds StdClock
//! cargo build --features std
//! ```

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

extern crate alloc;

pub mod logging;
pub mod time;

pub use logging::{install, verbosity_allows, SinkLogger};
pub use time::{ManualClock, TimeSource};

#[cfg(feature = "std")]
pub use time::StdClock;

/// Platform configuration and detection
pub mod config {
    /// Which time backend this build was compiled with
    pub fn platform_mode() -> &'static str {
        #[cfg(feature = "std")]
        return "std";

        #[cfg(not(feature = "std"))]
        return "bare";
    }

    /// Check if host std services are compiled in
    pub const fn has_std() -> bool {
        cfg!(feature = "std")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let mode = config::platform_mode();
        assert!(mode == "std" || mode == "bare");
        assert_eq!(config::has_std(), mode == "std");
    }
}
