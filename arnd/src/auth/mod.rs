/*
 * This file is a part of Arn
 */

//! Access table, no-login subnets and the free-path read allowlist (§4.7),
//! plus the login challenge hash (§4.6.1 step 3).

use crate::tree::Path;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;

pub const ALLOW_WRITE: u8 = 0b0001;
pub const ALLOW_CREATE: u8 = 0b0010;
pub const ALLOW_DELETE: u8 = 0b0100;
pub const ALLOW_MODE_CHANGE: u8 = 0b1000;

#[derive(Debug, Clone)]
pub struct UserEntry {
    /// `H(user || password)`, hex-encoded; never the plaintext password.
    pub password_hash: String,
    pub allow: u8,
}

/// A subnet rule recognized by the `no_login_nets` option (§4.7).
#[derive(Debug, Clone)]
pub enum NetRule {
    Localhost,
    LocalNet,
    Cidr(ipnet_literal::Cidr),
    Any,
}

/// A tiny CIDR matcher, scoped to what `NetRule::Cidr` needs; kept local
/// rather than pulling in a dedicated CIDR crate for one comparison.
pub mod ipnet_literal {
    use std::net::Ipv4Addr;

    #[derive(Debug, Clone)]
    pub struct Cidr {
        pub addr: Ipv4Addr,
        pub prefix: u8,
    }

    impl Cidr {
        pub fn parse(s: &str) -> Option<Cidr> {
            let (addr, prefix) = s.split_once('/')?;
            Some(Cidr {
                addr: addr.parse().ok()?,
                prefix: prefix.parse().ok()?,
            })
        }

        pub fn contains(&self, ip: Ipv4Addr) -> bool {
            let mask = if self.prefix == 0 {
                0
            } else {
                u32::MAX << (32 - self.prefix as u32)
            };
            u32::from(self.addr) & mask == u32::from(ip) & mask
        }
    }
}

impl NetRule {
    pub fn parse(s: &str) -> Option<NetRule> {
        match s {
            "localhost" => Some(NetRule::Localhost),
            "localnet" => Some(NetRule::LocalNet),
            "any" => Some(NetRule::Any),
            cidr => ipnet_literal::Cidr::parse(cidr).map(NetRule::Cidr),
        }
    }

    fn matches(&self, peer: IpAddr) -> bool {
        match (self, peer) {
            (NetRule::Any, _) => true,
            (NetRule::Localhost, ip) => ip.is_loopback(),
            (NetRule::LocalNet, IpAddr::V4(ip)) => ip.is_private() || ip.is_loopback(),
            (NetRule::LocalNet, IpAddr::V6(ip)) => ip.is_loopback(),
            (NetRule::Cidr(cidr), IpAddr::V4(ip)) => cidr.contains(ip),
            (NetRule::Cidr(_), IpAddr::V6(_)) => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Access {
    pub demand_login: bool,
    users: HashMap<String, UserEntry>,
    no_login_nets: Vec<NetRule>,
    free_paths: Vec<Path>,
}

impl Access {
    pub fn new(demand_login: bool) -> Self {
        Access {
            demand_login,
            ..Default::default()
        }
    }

    pub fn add_user(&mut self, user: impl Into<String>, password_hash: impl Into<String>, allow: u8) {
        self.users.insert(
            user.into(),
            UserEntry {
                password_hash: password_hash.into(),
                allow,
            },
        );
    }

    pub fn add_no_login_net(&mut self, rule: NetRule) {
        self.no_login_nets.push(rule);
    }

    pub fn add_free_path(&mut self, path: Path) {
        self.free_paths.push(path);
    }

    /// Whether a session from `peer` must authenticate before `Normal` phase
    /// (§4.6.1 step 3, §4.7 "no-login nets").
    pub fn requires_login(&self, peer: IpAddr) -> bool {
        if !self.demand_login {
            return false;
        }
        !self.no_login_nets.iter().any(|net| net.matches(peer))
    }

    pub fn is_free_path(&self, path: &Path) -> bool {
        self.free_paths
            .iter()
            .any(|p| path.as_str() == p.as_str() || path.as_str().starts_with(&format!("{}/", p.as_str())))
    }

    pub fn user_password_hash(&self, user: &str) -> Option<&str> {
        self.users.get(user).map(|u| u.password_hash.as_str())
    }

    pub fn allows(&self, user: &str, bit: u8) -> bool {
        self.users.get(user).map(|u| u.allow & bit == bit).unwrap_or(false)
    }
}

fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// `H(user || password)`, stored in the access table instead of the
/// plaintext password.
pub fn password_hash(user: &str, password: &str) -> String {
    sha256_hex(format!("{user}{password}").as_bytes())
}

/// Server-side challenge generation for step 3 of §4.6.1; `salt` should be
/// fresh per session.
pub fn login_challenge(salt: &str, password_hash: &str) -> String {
    sha256_hex(format!("{salt}{password_hash}").as_bytes())
}

/// Client-side response: `hash = H(salt || H(user || password))`.
pub fn login_response(salt: &str, user: &str, password: &str) -> String {
    login_challenge(salt, &password_hash(user, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_hash_is_reproducible() {
        let a = login_response("s1", "alice", "hunter2");
        let b = login_response("s1", "alice", "hunter2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex-encoded sha256
    }

    #[test]
    fn server_challenge_matches_client_response() {
        let ph = password_hash("alice", "hunter2");
        let mut access = Access::new(true);
        access.add_user("alice", ph.clone(), ALLOW_WRITE);
        let server_side = login_challenge("s1", access.user_password_hash("alice").unwrap());
        let client_side = login_response("s1", "alice", "hunter2");
        assert_eq!(server_side, client_side);
    }

    #[test]
    fn localnet_rule_exempts_private_ip() {
        let mut access = Access::new(true);
        access.add_no_login_net(NetRule::LocalNet);
        let peer: IpAddr = "192.168.1.5".parse().unwrap();
        assert!(!access.requires_login(peer));
    }

    #[test]
    fn public_ip_still_requires_login() {
        let mut access = Access::new(true);
        access.add_no_login_net(NetRule::LocalNet);
        let peer: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(access.requires_login(peer));
    }

    #[test]
    fn free_path_allows_unauthenticated_read() {
        let mut access = Access::new(true);
        access.add_free_path(Path::parse("//Public").unwrap());
        assert!(access.is_free_path(&Path::parse("//Public/Motd").unwrap()));
        assert!(!access.is_free_path(&Path::parse("//Private/Secret").unwrap()));
    }
}
