/*
 * This file is a part of Arn
 */

//! Server listener (component G, §4.7) and client reconnection helper
//! (§4.6.a "Reconnection"). Grounded on `engine/net/mod.rs`'s acceptor
//! loop, `NetBackoff` and `CLIM` semaphore shape; the OpenSSL-specific
//! `init_tls`/`listen_tls` split is kept only as the [`EncryptPolicy`] seam,
//! not its implementation (TLS mechanism is out of scope per the purpose
//! and scope section).

pub mod protocol;
pub mod xstring;

use crate::auth::Access;
use crate::ctx::Context;
use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::net::protocol::session::Session;
use crate::net::xstring::XStringMap;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

/// `arnd`'s reserved default TCP port (§6.1): both sides must agree on a
/// port if dynamic negotiation is not in play.
pub const DEFAULT_PORT: u16 = libarn::DEFAULT_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptPolicy {
    PreferNo,
    PreferYes,
    Required,
}

impl Default for EncryptPolicy {
    fn default() -> Self {
        EncryptPolicy::PreferNo
    }
}

/// Capped exponential backoff between accept-loop or reconnect attempts,
/// grounded on `engine/net/mod.rs`'s `NetBackoff`.
pub struct NetBackoff {
    attempt: AtomicU32,
    base: Duration,
    cap: Duration,
}

impl NetBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        NetBackoff {
            attempt: AtomicU32::new(0),
            base,
            cap,
        }
    }

    pub fn next_delay(&self) -> Duration {
        let n = self.attempt.fetch_add(1, Ordering::Relaxed);
        let scaled = self.base.saturating_mul(1u32 << n.min(16));
        scaled.min(self.cap)
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Relaxed);
    }
}

pub struct Listener {
    ctx: Arc<Context>,
    access: Arc<Access>,
    who_i_am: XStringMap,
    permits: Arc<Semaphore>,
    encrypt_policy: EncryptPolicy,
}

impl Listener {
    pub fn new(
        ctx: Arc<Context>,
        access: Arc<Access>,
        who_i_am: XStringMap,
        max_connections: usize,
        encrypt_policy: EncryptPolicy,
    ) -> Arc<Listener> {
        Arc::new(Listener {
            ctx,
            access,
            who_i_am,
            permits: Arc::new(Semaphore::new(max_connections)),
            encrypt_policy,
        })
    }

    /// Bind and run the accept loop until the process is told to stop. A
    /// bind failure is fatal (§4.7 "a bind failure reports fatally"); a
    /// per-session protocol error only closes that session.
    pub async fn serve(self: &Arc<Self>, bind_addr: SocketAddr) -> ArnResult<()> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ArnError::new(ErrorKind::ConnectionError, Subsystem::Net, format!("bind {bind_addr}: {e}"))
        })?;
        info!("net: listening on {bind_addr} (encrypt_policy={:?})", self.encrypt_policy);
        let backoff = NetBackoff::new(Duration::from_millis(50), Duration::from_secs(5));
        loop {
            let accept_result = listener.accept().await;
            let (stream, peer) = match accept_result {
                Ok(pair) => {
                    backoff.reset();
                    pair
                }
                Err(e) => {
                    warn!("net: accept failed: {e}");
                    tokio::time::sleep(backoff.next_delay()).await;
                    continue;
                }
            };
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    warn!("net: rejecting {peer}: connection limit reached");
                    continue;
                }
            };
            let this = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = this.handle_connection(stream, peer).await {
                    warn!("net: session with {peer} ended: {e}");
                }
            });
        }
    }

    async fn handle_connection(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> ArnResult<()> {
        let mut session = Session::accept(stream, peer, self.ctx.clone(), self.access.clone(), self.who_i_am.clone()).await?;
        session.run().await
    }
}

/// Client-side counterpart of §4.6.a "Reconnection": a prioritized address
/// list retried with capped exponential backoff. Reconnecting after a drop
/// is the caller's responsibility (§5); this only encapsulates the retry
/// loop around `TcpStream::connect`.
pub struct ClientSession {
    addrs: Vec<SocketAddr>,
}

impl ClientSession {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        ClientSession { addrs }
    }

    pub async fn connect(
        &self,
        ctx: Arc<Context>,
        access: Arc<Access>,
        who_i_am: XStringMap,
        credentials: Option<(String, String)>,
    ) -> ArnResult<Session> {
        let backoff = NetBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        loop {
            for addr in &self.addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        return Session::connect(stream, *addr, ctx, access, who_i_am, credentials).await;
                    }
                    Err(e) => warn!("net: connect to {addr} failed: {e}"),
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}
