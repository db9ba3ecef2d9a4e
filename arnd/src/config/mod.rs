/*
 * This file is a part of Arn
 */

//! Process-wide configuration (component I, §6.6): defaults, then an
//! optional YAML file, then environment variables, then CLI flags, each
//! layer overriding only the fields it actually sets. Simplified from the
//! teacher's generic `Configset`/`TryFromConfigSource` layering machinery
//! (`cfg2.rs`/`cfgfile2.rs`) down to plain `Option<T>` merging: this crate's
//! config surface (five recognized options plus bind address) is small
//! enough that the generic trait plumbing would be pure overhead (see
//! DESIGN.md).

use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::net::EncryptPolicy;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path as FsPath;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub demand_login: bool,
    pub default_ignore_same_value: bool,
    pub skip_local_sys_loading: bool,
    pub encrypt_policy: EncryptPolicy,
    pub debug_flags: u32,
    pub persist_dir: Option<String>,
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), crate::net::DEFAULT_PORT),
            demand_login: false,
            default_ignore_same_value: false,
            skip_local_sys_loading: false,
            encrypt_policy: EncryptPolicy::PreferNo,
            debug_flags: 0,
            persist_dir: None,
            max_connections: 256,
        }
    }
}

/// Mirrors [`Config`] but every field is optional, so a layer only
/// overrides what it actually specifies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverlay {
    pub bind_addr: Option<String>,
    pub demand_login: Option<bool>,
    pub default_ignore_same_value: Option<bool>,
    pub skip_local_sys_loading: Option<bool>,
    pub encrypt_policy: Option<String>,
    pub debug_flags: Option<u32>,
    pub persist_dir: Option<String>,
    pub max_connections: Option<usize>,
}

fn parse_encrypt_policy(s: &str) -> ArnResult<EncryptPolicy> {
    match s {
        "PreferNo" => Ok(EncryptPolicy::PreferNo),
        "PreferYes" => Ok(EncryptPolicy::PreferYes),
        "Required" => Ok(EncryptPolicy::Required),
        other => Err(ArnError::new(
            ErrorKind::Config,
            Subsystem::Config,
            format!("unrecognized encrypt_policy: {other}"),
        )),
    }
}

impl Config {
    pub fn apply(&mut self, overlay: ConfigOverlay) -> ArnResult<()> {
        if let Some(addr) = overlay.bind_addr {
            self.bind_addr = addr
                .parse()
                .map_err(|_| ArnError::new(ErrorKind::Config, Subsystem::Config, format!("bad bind_addr: {addr}")))?;
        }
        if let Some(v) = overlay.demand_login {
            self.demand_login = v;
        }
        if let Some(v) = overlay.default_ignore_same_value {
            self.default_ignore_same_value = v;
        }
        if let Some(v) = overlay.skip_local_sys_loading {
            self.skip_local_sys_loading = v;
        }
        if let Some(policy) = overlay.encrypt_policy {
            self.encrypt_policy = parse_encrypt_policy(&policy)?;
        }
        if let Some(v) = overlay.debug_flags {
            self.debug_flags = v;
        }
        if let Some(v) = overlay.persist_dir {
            self.persist_dir = Some(v);
        }
        if let Some(v) = overlay.max_connections {
            self.max_connections = v;
        }
        Ok(())
    }

    /// Layer defaults -> YAML file (if present) -> environment -> CLI args
    /// (§6.6).
    pub fn load(yaml_path: Option<&FsPath>, args: impl Iterator<Item = String>) -> ArnResult<Config> {
        let mut cfg = Config::default();
        if let Some(path) = yaml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let overlay: ConfigOverlay = serde_yaml::from_str(&text)?;
                cfg.apply(overlay)?;
            }
        }
        cfg.apply(env_overlay())?;
        cfg.apply(cli_overlay(args)?)?;
        Ok(cfg)
    }
}

fn env_overlay() -> ConfigOverlay {
    ConfigOverlay {
        bind_addr: std::env::var("ARN_BIND_ADDR").ok(),
        demand_login: std::env::var("ARN_DEMAND_LOGIN").ok().and_then(|v| v.parse().ok()),
        default_ignore_same_value: std::env::var("ARN_IGNORE_SAME_VALUE").ok().and_then(|v| v.parse().ok()),
        skip_local_sys_loading: std::env::var("ARN_SKIP_LOCAL_SYS_LOADING").ok().and_then(|v| v.parse().ok()),
        encrypt_policy: std::env::var("ARN_ENCRYPT_POLICY").ok(),
        debug_flags: std::env::var("ARN_DEBUG_FLAGS").ok().and_then(|v| v.parse().ok()),
        persist_dir: std::env::var("ARN_PERSIST_DIR").ok(),
        max_connections: std::env::var("ARN_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()),
    }
}

/// A minimal `--key=value` CLI parser; this crate's flag surface is small
/// enough not to warrant a dedicated argument-parsing dependency.
fn cli_overlay(args: impl Iterator<Item = String>) -> ArnResult<ConfigOverlay> {
    let mut overlay = ConfigOverlay::default();
    for arg in args {
        let Some(rest) = arg.strip_prefix("--") else { continue };
        let Some((key, value)) = rest.split_once('=') else { continue };
        match key {
            "bind-addr" => overlay.bind_addr = Some(value.to_string()),
            "demand-login" => overlay.demand_login = Some(value.parse().map_err(|_| bad_flag(key, value))?),
            "default-ignore-same-value" => {
                overlay.default_ignore_same_value = Some(value.parse().map_err(|_| bad_flag(key, value))?)
            }
            "skip-local-sys-loading" => {
                overlay.skip_local_sys_loading = Some(value.parse().map_err(|_| bad_flag(key, value))?)
            }
            "encrypt-policy" => overlay.encrypt_policy = Some(value.to_string()),
            "debug-flags" => overlay.debug_flags = Some(value.parse().map_err(|_| bad_flag(key, value))?),
            "persist-dir" => overlay.persist_dir = Some(value.to_string()),
            "max-connections" => overlay.max_connections = Some(value.parse().map_err(|_| bad_flag(key, value))?),
            _ => {}
        }
    }
    Ok(overlay)
}

fn bad_flag(key: &str, value: &str) -> ArnError {
    ArnError::new(ErrorKind::Config, Subsystem::Config, format!("bad value for --{key}: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_and_cli_override_defaults_in_order() {
        let mut cfg = Config::default();
        assert!(!cfg.demand_login);
        cfg.apply(ConfigOverlay { demand_login: Some(true), ..Default::default() }).unwrap();
        assert!(cfg.demand_login);
        cfg.apply(ConfigOverlay { demand_login: Some(false), ..Default::default() }).unwrap();
        assert!(!cfg.demand_login);
    }

    #[test]
    fn cli_parses_recognized_flags() {
        let args = vec!["--demand-login=true".to_string(), "--max-connections=10".to_string()];
        let overlay = cli_overlay(args.into_iter()).unwrap();
        assert_eq!(overlay.demand_login, Some(true));
        assert_eq!(overlay.max_connections, Some(10));
    }

    #[test]
    fn unrecognized_encrypt_policy_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply(ConfigOverlay { encrypt_policy: Some("Maybe".into()), ..Default::default() })
            .unwrap_err();
        assert!(err.is(ErrorKind::Config));
    }
}
