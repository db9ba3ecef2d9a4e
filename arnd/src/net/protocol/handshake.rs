/*
 * This file is a part of Arn
 */

//! Stateless pieces of the connection lifecycle (§4.6.1): protocol version
//! compatibility and the login challenge/response hash. The stateful side
//! (reading/writing the actual frames) lives in
//! [`crate::net::protocol::session`].

use crate::auth::{login_challenge, Access};

pub const PROTOCOL_MAJOR: u32 = 4;
pub const PROTOCOL_MINOR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Init,
    Version,
    Login,
    Normal,
    Closed,
}

/// Minimum acceptable protocol major is 4 (§4.6.1 step 1); minors are
/// forward compatible within a major.
pub fn version_compatible(peer_major: u32) -> bool {
    peer_major >= PROTOCOL_MAJOR
}

pub fn verify_login(access: &Access, user: &str, salt: &str, response_hash: &str) -> bool {
    match access.user_password_hash(user) {
        Some(stored) => login_challenge(salt, stored) == response_hash,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_major_is_rejected() {
        assert!(!version_compatible(3));
        assert!(version_compatible(4));
        assert!(version_compatible(5));
    }

    #[test]
    fn login_verifies_against_stored_hash() {
        let mut access = Access::new(true);
        access.add_user("alice", crate::auth::password_hash("alice", "hunter2"), 0);
        let response = crate::auth::login_response("s1", "alice", "hunter2");
        assert!(verify_login(&access, "alice", "s1", &response));
        assert!(!verify_login(&access, "alice", "s1", "wrong"));
    }
}
