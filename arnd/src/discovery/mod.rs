/*
 * This file is a part of Arn
 */

//! Service discovery (§6.4): an mDNS collaborator interface the core
//! depends on but never implements directly, plus `NullDiscovery`, a no-op
//! stand-in for deployments that run without multicast DNS (the common
//! case for a single bound address reached via `net::ClientSession`'s own
//! address list). Grounded on the shape of `engine/net/mod.rs`'s acceptor
//! construction, generalized from TCP accept to register/browse/resolve.

use crate::error::ArnResult;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const TXT_PROTOVERS: &str = "protovers";
pub const TXT_SERVER: &str = "server";
pub const TXT_GROUP: &str = "group";
pub const TXT_HOST_IP: &str = "hostIp";

#[derive(Debug, Clone)]
pub enum RegistrationEvent {
    Registered { final_name: String },
    Error { code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseKind {
    Added,
    Removed,
}

#[derive(Debug, Clone)]
pub struct BrowseEvent {
    pub kind: BrowseKind,
    pub id: u64,
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub host: String,
    pub port: u16,
    pub txt: HashMap<String, Vec<String>>,
}

/// A live registration; dropping it should withdraw the advertisement.
pub struct RegistrationHandle {
    pub events: UnboundedReceiver<RegistrationEvent>,
}

/// §6.4's collaborator interface. `arnd` depends only on this trait; no
/// concrete mDNS stack ships in this crate (out of scope per spec
/// Non-goals).
#[async_trait::async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn register(
        &self,
        service_name: &str,
        service_type: &str,
        port: u16,
        subtypes: &[String],
        txt: HashMap<String, Vec<String>>,
    ) -> ArnResult<RegistrationHandle>;

    async fn browse(&self, service_type: &str, subtype_filter: Option<&str>) -> ArnResult<UnboundedReceiver<BrowseEvent>>;

    async fn resolve(&self, service_name: &str, timeout: Duration) -> ArnResult<ResolvedService>;

    async fn lookup(&self, host_name: &str, timeout: Duration) -> ArnResult<IpAddr>;
}

/// Registers, browses, and resolves nothing; every call reports
/// `Timeout`. Used when a deployment is configured with an explicit
/// address list instead of mDNS.
pub struct NullDiscovery;

#[async_trait::async_trait]
impl ServiceDiscovery for NullDiscovery {
    async fn register(
        &self,
        _service_name: &str,
        _service_type: &str,
        _port: u16,
        _subtypes: &[String],
        _txt: HashMap<String, Vec<String>>,
    ) -> ArnResult<RegistrationHandle> {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Ok(RegistrationHandle { events: rx })
    }

    async fn browse(&self, _service_type: &str, _subtype_filter: Option<&str>) -> ArnResult<UnboundedReceiver<BrowseEvent>> {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn resolve(&self, service_name: &str, _timeout: Duration) -> ArnResult<ResolvedService> {
        Err(crate::error::ArnError::new(
            crate::error::ErrorKind::Timeout,
            crate::error::Subsystem::Discovery,
            format!("no discovery backend configured, cannot resolve {service_name}"),
        ))
    }

    async fn lookup(&self, host_name: &str, _timeout: Duration) -> ArnResult<IpAddr> {
        Err(crate::error::ArnError::new(
            crate::error::ErrorKind::Timeout,
            crate::error::Subsystem::Discovery,
            format!("no discovery backend configured, cannot look up {host_name}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_discovery_resolve_times_out() {
        let disco = NullDiscovery;
        let err = disco.resolve("arn._tcp.local", Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is(crate::error::ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn null_discovery_register_yields_an_empty_event_stream() {
        let disco = NullDiscovery;
        let mut handle = disco
            .register("arn-node", "_arn._tcp", 12108, &[], HashMap::new())
            .await
            .unwrap();
        assert!(handle.events.recv().await.is_none());
    }
}
