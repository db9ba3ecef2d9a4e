/*
 * This file is a part of Arn
 */

//! Sync session (component F, §4.6): connection lifecycle, the
//! `local_by_id`/`remote_to_local` object-mapping tables, Master write
//! ownership (§4.6.4) and AutoDestroy (§4.6.5). Grounded on
//! `engine/net/protocol/mod.rs`'s `ClientLocalState`/connection handling
//! for the overall split between handshake and steady-state frame loop.

use crate::auth::{Access, ALLOW_CREATE, ALLOW_WRITE};
use crate::ctx::Context;
use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::net::protocol::handshake::{self, ConnState};
use crate::net::protocol::Frame;
use crate::net::xstring::XStringMap;
use crate::tree::{Kind, LinkId, Mode, Path, SessionOutboundEvent, Subscriber, SyncMode};
use log::{trace, warn};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Out-of-band session messages (§4.6.2 `msg`), present in the original
/// (`ArnServerRemote.cpp`'s `msg` handling) and kept as a typed vocabulary
/// even though no §8 test exercises it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Chat(Vec<u8>),
    KillRequest,
    KillAbort,
}

pub struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    ctx: Arc<Context>,
    access: Arc<Access>,
    session_id: u64,
    state: ConnState,
    authenticated_user: Option<String>,

    local_by_id: HashMap<u64, LinkId>,
    remote_to_local: HashMap<u64, LinkId>,
    next_local_id: u64,
    /// frames referring to an `id` not yet bound by a `sync` frame (§4.6.3)
    pending_by_remote_id: HashMap<u64, Vec<Frame>>,

    /// links where this side declared Master before announcing (§4.6.4)
    declared_master: HashSet<LinkId>,
    /// links tagged AutoDestroy by either side (§4.6.5)
    auto_destroy: HashSet<LinkId>,

    outbound_tx: mpsc::UnboundedSender<SessionOutboundEvent>,
    outbound_rx: mpsc::UnboundedReceiver<SessionOutboundEvent>,
}

impl Session {
    /// Server-side handshake: wait for the client's `ver`/`whoIAm`, reply in
    /// kind, and demand a login if `access` requires it from this peer.
    pub async fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Arc<Context>,
        access: Arc<Access>,
        who_i_am: XStringMap,
    ) -> ArnResult<Session> {
        let mut session = Session::new(stream, peer, ctx, access.clone());
        session.state = ConnState::Version;

        let peer_ver = session.read_frame().await?;
        let Frame::Ver { major, .. } = peer_ver else {
            return Err(session.protocol_error("expected ver frame").await);
        };
        if !handshake::version_compatible(major) {
            session
                .write_frame(&Frame::Err { code: 1, text: "incompatible protocol major".into() })
                .await?;
            return Err(ArnError::new(ErrorKind::Protocol, Subsystem::Net, "incompatible protocol major"));
        }
        session
            .write_frame(&Frame::Ver {
                major: handshake::PROTOCOL_MAJOR,
                minor: handshake::PROTOCOL_MINOR,
                info: "arnd".into(),
            })
            .await?;

        let peer_who = session.read_frame().await?;
        if let Frame::WhoIAm(_) = peer_who {
            session.write_frame(&Frame::WhoIAm(who_i_am)).await?;
        }

        if session.access.requires_login(peer.ip()) {
            session.state = ConnState::Login;
            let salt = format!("{:x}", std::process::id() as u64 ^ session.session_id);
            session.write_frame(&Frame::LoginChallenge { salt: salt.clone() }).await?;
            match session.read_frame().await? {
                Frame::LoginResponse { user, hash } => {
                    if handshake::verify_login(&session.access, &user, &salt, &hash) {
                        session.authenticated_user = Some(user);
                    } else {
                        session
                            .write_frame(&Frame::Err { code: 2, text: "login failed".into() })
                            .await?;
                        return Err(ArnError::new(ErrorKind::NotAuthorized, Subsystem::Net, "login failed"));
                    }
                }
                _ => return Err(session.protocol_error("expected login response").await),
            }
        } else {
            // always send an explicit signal so the client never blind-reads
            // a `LoginChallenge` that isn't coming
            session.write_frame(&Frame::LoginNotRequired).await?;
        }
        session.state = ConnState::Normal;
        Ok(session)
    }

    /// Client-side handshake counterpart.
    pub async fn connect(
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Arc<Context>,
        access: Arc<Access>,
        who_i_am: XStringMap,
        credentials: Option<(String, String)>,
    ) -> ArnResult<Session> {
        let mut session = Session::new(stream, peer, ctx, access);
        session.state = ConnState::Version;
        session
            .write_frame(&Frame::Ver {
                major: handshake::PROTOCOL_MAJOR,
                minor: handshake::PROTOCOL_MINOR,
                info: "arnd-client".into(),
            })
            .await?;
        let Frame::Ver { major, .. } = session.read_frame().await? else {
            return Err(session.protocol_error("expected ver frame").await);
        };
        if !handshake::version_compatible(major) {
            return Err(ArnError::new(ErrorKind::Protocol, Subsystem::Net, "incompatible protocol major"));
        }
        session.write_frame(&Frame::WhoIAm(who_i_am.clone())).await?;
        let peer_who = session.read_frame().await?;
        if !matches!(peer_who, Frame::WhoIAm(_)) {
            return Err(session.protocol_error("expected whoIAm frame").await);
        }

        // the server always sends exactly one of these right after whoIAm
        // (§4.6.1 step 3), so this read is never blind
        match session.read_frame().await? {
            Frame::LoginNotRequired => {}
            Frame::LoginChallenge { salt } => {
                let (user, password) = credentials
                    .ok_or_else(|| ArnError::new(ErrorKind::NotAuthorized, Subsystem::Net, "server demands login"))?;
                let hash = crate::auth::login_response(&salt, &user, &password);
                session
                    .write_frame(&Frame::LoginResponse { user: user.clone(), hash })
                    .await?;
                session.authenticated_user = Some(user);
            }
            _ => return Err(session.protocol_error("expected login challenge or no-login marker").await),
        }
        session.state = ConnState::Normal;
        Ok(session)
    }

    fn new(stream: TcpStream, peer: SocketAddr, ctx: Arc<Context>, access: Arc<Access>) -> Session {
        let (read_half, writer) = stream.into_split();
        let session_id = ctx.store.next_subscriber_id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Session {
            reader: BufReader::new(read_half),
            writer,
            peer,
            ctx,
            access,
            session_id,
            state: ConnState::Init,
            authenticated_user: None,
            local_by_id: HashMap::new(),
            remote_to_local: HashMap::new(),
            next_local_id: 1,
            pending_by_remote_id: HashMap::new(),
            declared_master: HashSet::new(),
            auto_destroy: HashSet::new(),
            outbound_tx,
            outbound_rx,
        }
    }

    /// Replicate `path` over this session (either side may initiate).
    /// `master`/`auto_destroy` are this side's declared sync-mode bits
    /// (§4.6.4, §4.6.5), encoded into the outgoing `sync` frame's `smode`.
    pub async fn announce(&mut self, path: &str, mode: Mode, master: bool, auto_destroy: bool) -> ArnResult<()> {
        let path = Path::parse(path)?;
        let link = self.ctx.store.get_or_create(&path, Kind::Leaf, mode)?;
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        self.local_by_id.insert(local_id, link.id());
        if master {
            self.declared_master.insert(link.id());
        }
        if auto_destroy {
            self.auto_destroy.insert(link.id());
        }
        self.ctx.store.subscribe(
            &link,
            Subscriber::Session {
                session_id: self.session_id,
                remote_id: local_id,
                tx: self.outbound_tx.clone(),
            },
        );
        let mut smode = SyncMode::empty();
        if master {
            smode.insert(SyncMode::MASTER);
        }
        if auto_destroy {
            smode.insert(SyncMode::AUTO_DESTROY);
        }
        self.write_frame(&Frame::Sync { path, id: local_id, mode, smode }).await
    }

    /// Steady-state loop: alternate between draining the store's outbound
    /// mailbox and the next inbound wire frame.
    pub async fn run(&mut self) -> ArnResult<()> {
        loop {
            tokio::select! {
                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(ev) => self.send_outbound(ev).await?,
                        None => break,
                    }
                }
                line = self.read_line() => {
                    match line? {
                        Some(line) => self.handle_line(&line).await?,
                        None => break,
                    }
                }
            }
        }
        self.on_disconnect();
        Ok(())
    }

    fn on_disconnect(&mut self) {
        for &link_id in &self.auto_destroy {
            if self.declared_master.contains(&link_id) {
                continue;
            }
            if let Some(link) = self.ctx.store.link_ref(link_id) {
                if self.ctx.store.destroy(&link, false).is_ok() {
                    trace!("net: auto-destroyed link {link_id} on session close");
                }
            }
        }
    }

    async fn send_outbound(&mut self, ev: SessionOutboundEvent) -> ArnResult<()> {
        let frame = match ev {
            SessionOutboundEvent::Set { remote_id, value, seq_no, .. } => {
                if let Some(seq) = seq_no {
                    Frame::Pipe { id: remote_id, value, seq: Some(seq) }
                } else {
                    Frame::Set { id: remote_id, value }
                }
            }
            SessionOutboundEvent::Mode { remote_id, mode } => Frame::Mode { id: remote_id, mode },
            SessionOutboundEvent::Destroyed { remote_id } => Frame::Del {
                path: self
                    .local_by_id
                    .get(&remote_id)
                    .and_then(|id| self.ctx.store.link_ref(*id))
                    .map(|l| l.path().clone())
                    .unwrap_or_else(Path::root),
            },
        };
        self.write_frame(&frame).await
    }

    async fn handle_line(&mut self, line: &str) -> ArnResult<()> {
        let Some(frame) = Frame::parse_line(line) else {
            warn!("net: malformed frame from {}: {line}", self.peer);
            return Ok(());
        };
        match frame {
            Frame::Sync { path, id, mode, smode } => self.on_sync(path, id, mode, smode).await?,
            Frame::SyncR { peer_id, rid } => self.on_syncr(peer_id, rid),
            Frame::Set { id, value } => self.on_set(id, value, None).await?,
            Frame::Pipe { id, value, seq } => self.on_set(id, value, seq).await?,
            Frame::Mode { id, mode } => self.on_mode(id, mode),
            Frame::Del { path } => self.on_del(&path),
            Frame::NoKill => {}
            Frame::Msg { kind, data } => self.on_msg(&kind, data),
            Frame::Err { code, text } => warn!("net: peer {} reported err {code}: {text}", self.peer),
            Frame::Ver { .. }
            | Frame::WhoIAm(_)
            | Frame::LoginNotRequired
            | Frame::LoginChallenge { .. }
            | Frame::LoginResponse { .. } => {
                warn!("net: unexpected handshake frame from {} in Normal phase", self.peer);
            }
        }
        Ok(())
    }

    async fn on_sync(&mut self, path: Path, remote_id: u64, mode: Mode, smode: SyncMode) -> ArnResult<()> {
        let link = self.ctx.store.get_or_create(&path, Kind::Leaf, mode)?;
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        self.local_by_id.insert(local_id, link.id());
        self.remote_to_local.insert(remote_id, link.id());
        if smode.is_auto_destroy() {
            self.auto_destroy.insert(link.id());
        }
        self.ctx.store.subscribe(
            &link,
            Subscriber::Session {
                session_id: self.session_id,
                remote_id,
                tx: self.outbound_tx.clone(),
            },
        );
        self.write_frame(&Frame::SyncR { peer_id: remote_id, rid: local_id }).await?;
        if let Some(queued) = self.pending_by_remote_id.remove(&remote_id) {
            for frame in queued {
                match frame {
                    Frame::Set { id, value } => self.on_set(id, value, None).await?,
                    Frame::Pipe { id, value, seq } => self.on_set(id, value, seq).await?,
                    Frame::Mode { id, mode } => self.on_mode(id, mode),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn on_syncr(&mut self, peer_id: u64, rid: u64) {
        if let Some(&link_id) = self.local_by_id.get(&peer_id) {
            self.remote_to_local.insert(rid, link_id);
        }
    }

    async fn on_set(&mut self, remote_id: u64, value: crate::tree::Value, seq: Option<u32>) -> ArnResult<()> {
        let Some(&link_id) = self.remote_to_local.get(&remote_id) else {
            // §4.6.3: queue until the matching `sync` establishes the binding
            self.pending_by_remote_id
                .entry(remote_id)
                .or_default()
                .push(if seq.is_some() {
                    Frame::Pipe { id: remote_id, value, seq }
                } else {
                    Frame::Set { id: remote_id, value }
                });
            return Ok(());
        };
        if self.declared_master.contains(&link_id) {
            self.write_frame(&Frame::Err { code: 3, text: "link is locally mastered".into() }).await?;
            return Ok(());
        }
        let Some(link) = self.ctx.store.link_ref(link_id) else {
            return Ok(());
        };
        if !self.write_allowed(link.path()) {
            self.write_frame(&Frame::Err { code: 4, text: "not authorized".into() }).await?;
            return Ok(());
        }
        let hstate = crate::tree::HandleState { ignore_same_value: false, uncrossed: false };
        let flags = crate::tree::Flags { from_remote: true, from_persist: false, echo: false };
        self.ctx
            .store
            .set_value(&link, value, flags, crate::tree::SameValue::Accept, hstate, None)?;
        Ok(())
    }

    fn on_mode(&mut self, remote_id: u64, mode: Mode) {
        if let Some(&link_id) = self.remote_to_local.get(&remote_id) {
            if let Some(link) = self.ctx.store.link_ref(link_id) {
                let _ = self.ctx.store.add_mode(&link, mode.bits());
            }
        }
    }

    fn on_del(&mut self, path: &Path) {
        if let Some(link) = self.ctx.store.lookup(path) {
            let _ = self.ctx.store.destroy(&link, true);
        }
    }

    fn on_msg(&mut self, kind: &str, data: Vec<u8>) {
        let msg = match kind {
            "kill_request" => SessionMessage::KillRequest,
            "kill_abort" => SessionMessage::KillAbort,
            _ => SessionMessage::Chat(data),
        };
        trace!("net: session message from {}: {msg:?}", self.peer);
    }

    fn write_allowed(&self, path: &Path) -> bool {
        if self.access.is_free_path(path) {
            return true;
        }
        if !self.access.demand_login {
            return true;
        }
        match &self.authenticated_user {
            Some(user) => self.access.allows(user, ALLOW_WRITE) || self.access.allows(user, ALLOW_CREATE),
            None => false,
        }
    }

    async fn read_line(&mut self) -> ArnResult<Option<String>> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
    }

    async fn read_frame(&mut self) -> ArnResult<Frame> {
        match self.read_line().await? {
            Some(line) => Frame::parse_line(&line)
                .ok_or_else(|| ArnError::new(ErrorKind::Protocol, Subsystem::Net, "malformed frame")),
            None => Err(ArnError::new(ErrorKind::ConnectionError, Subsystem::Net, "peer closed connection")),
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> ArnResult<()> {
        let mut line = frame.to_line();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn protocol_error(&mut self, text: &str) -> ArnError {
        let _ = self.write_frame(&Frame::Err { code: 0, text: text.into() }).await;
        ArnError::new(ErrorKind::Protocol, Subsystem::Net, text)
    }
}
