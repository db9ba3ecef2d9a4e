/*
 * This file is a part of Arn
 * Arn is a distributed, hierarchical, shared data tree with automatic
 * service discovery, persistence and access control.
 */

//! Shared utilities and constants used by the `arnd` server binary

pub mod util;

/// The version of this crate's on-wire sync protocol, reported in the
/// handshake `ver=` frame (see the sync protocol's version exchange)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Project URL, used in startup banners and `whoIAm` identity strings
pub const URL: &str = "https://github.com/arn-rs/arn";

/// The default TCP port both sides agree on absent other configuration
pub const DEFAULT_PORT: u16 = 2444;
