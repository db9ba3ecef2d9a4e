/*
 * This file is a part of Arn
 */

#[macro_use]
pub mod macros;
pub mod compiler;

pub const IS_ON_CI: bool = option_env!("CI").is_some();

/// Monotonic milliseconds since the unix epoch, used for the handle delay
/// timer and the dependency coordinator's refresh window.
pub fn now_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
