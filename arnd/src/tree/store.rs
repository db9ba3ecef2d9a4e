/*
 * This file is a part of Arn
 */

//! The tree store (component A, §4.1): a process-wide arena of links keyed
//! by [`LinkId`], addressed by [`Path`]. Mutations are serialized per-parent
//! by taking that parent's `children` write lock across the
//! check-then-insert, which gives `get_or_create` its compare-and-swap
//! property without a separate CAS primitive.
//!
//! Per §9's design note, external callers in this crate talk to `Store`
//! directly rather than through a literal channel-marshalled "owning
//! thread" -- `parking_lot::RwLock` already serializes mutation correctly,
//! and the cross-thread proxy channel (`ctx::Request`/`ctx::Reply`) sits one
//! layer up in [`crate::ctx`] for callers that want to model a dedicated
//! store-owning task.

use crate::error::{ArnError, ArnResult, ErrorKind, Subsystem};
use crate::persist::{PersistBackend, RecordMeta};
use crate::tree::link::{
    ChangeEvent, Flags, Kind, LinkData, LinkId, Mode, SessionOutboundEvent, Subscriber, SyncMode,
    TreeEvent,
};
use crate::tree::path::Path;
use crate::tree::value::Value;
use log::trace;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameValue {
    /// honor `ignore_same_value`
    Default,
    /// force delivery even if unchanged
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    SuppressedSame,
}

/// Snapshot of the handle view-state relevant to a single `set_value` call
/// (§3.3); the rest of the handle's state lives on the `Handle` itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleState {
    pub ignore_same_value: bool,
    pub uncrossed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub link_count: usize,
    pub handle_count: usize,
    pub subscriber_count: usize,
}

struct Arena {
    slots: Vec<Option<Arc<LinkData>>>,
    free: Vec<usize>,
}

impl Arena {
    fn get(&self, id: LinkId) -> Option<Arc<LinkData>> {
        self.slots.get(id as usize).and_then(|s| s.clone())
    }
}

pub struct Store {
    arena: RwLock<Arena>,
    root: LinkId,
    next_sub_id: AtomicU64,
    persist_mount: RwLock<Option<Path>>,
    persist_backend: RwLock<Option<Arc<dyn PersistBackend>>>,
}

/// A lightweight, cloneable reference to a link living in some `Store`.
#[derive(Clone)]
pub struct LinkRef {
    pub(crate) store: Arc<Store>,
    pub(crate) data: Arc<LinkData>,
}

impl LinkRef {
    pub fn id(&self) -> LinkId {
        self.data.id
    }
    pub fn path(&self) -> &Path {
        &self.data.path
    }
    pub fn kind(&self) -> Kind {
        self.data.kind
    }
    pub fn mode(&self) -> Mode {
        self.data.mode()
    }
    pub fn value(&self) -> Value {
        self.data.value.read().clone()
    }
    pub fn twin(&self) -> Option<LinkRef> {
        let twin_id = (*self.data.twin.read())?;
        self.store.link_ref(twin_id)
    }
}

impl Store {
    pub fn new() -> Arc<Self> {
        let root_data = Arc::new(LinkData::new(0, Path::root(), Kind::Folder, None, Mode::empty()));
        Arc::new(Store {
            arena: RwLock::new(Arena {
                slots: vec![Some(root_data)],
                free: Vec::new(),
            }),
            root: 0,
            next_sub_id: AtomicU64::new(1),
            persist_mount: RwLock::new(None),
            persist_backend: RwLock::new(None),
        })
    }

    pub fn set_persist_mount(&self, path: Option<Path>) {
        *self.persist_mount.write() = path;
    }

    pub fn set_persist_backend(&self, backend: Option<Arc<dyn PersistBackend>>) {
        *self.persist_backend.write() = backend;
    }

    pub fn next_subscriber_id(&self) -> u64 {
        self.next_sub_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn link_ref(self: &Arc<Self>, id: LinkId) -> Option<LinkRef> {
        let data = self.arena.read().get(id)?;
        Some(LinkRef {
            store: self.clone(),
            data,
        })
    }

    pub fn lookup(self: &Arc<Self>, path: &Path) -> Option<LinkRef> {
        if path.is_root() {
            return self.link_ref(self.root);
        }
        let arena = self.arena.read();
        let mut cur = arena.get(self.root)?;
        for seg in path.segments() {
            let next = cur.children.read().get(seg)?;
            cur = arena.get(next)?;
        }
        Some(LinkRef {
            store: self.clone(),
            data: cur,
        })
    }

    /// Walk/create ancestors as folders (lifecycle, §3.2), creating the
    /// final segment with `kind`/`mode` if it does not already exist.
    pub fn get_or_create(
        self: &Arc<Self>,
        path: &Path,
        kind: Kind,
        mode: Mode,
    ) -> ArnResult<LinkRef> {
        if path.is_root() {
            return Ok(self.link_ref(self.root).unwrap());
        }
        if mode.is_save() {
            let mount = self.persist_mount.read().clone();
            let under_mount = match mount {
                Some(m) => path.as_str().starts_with(m.as_str()),
                None => false,
            };
            if !under_mount {
                return Err(ArnError::new(
                    ErrorKind::CreateError,
                    Subsystem::Tree,
                    format!("{path} is not under the persistence mount point"),
                ));
            }
        }
        let segs: Vec<&str> = path.segments().collect();
        let mut cur = self.root;
        for (i, seg) in segs.iter().enumerate() {
            let is_last = i == segs.len() - 1;
            let (child_kind, child_mode) = if is_last {
                (kind, mode)
            } else {
                (Kind::Folder, Mode::empty())
            };
            cur = self.get_or_create_child(cur, seg, child_kind, child_mode)?;
        }
        Ok(self.link_ref(cur).unwrap())
    }

    fn get_or_create_child(
        self: &Arc<Self>,
        parent: LinkId,
        name: &str,
        kind: Kind,
        mode: Mode,
    ) -> ArnResult<LinkId> {
        let parent_data = {
            let arena = self.arena.read();
            arena
                .get(parent)
                .ok_or_else(|| ArnError::new(ErrorKind::CreateError, Subsystem::Tree, "missing parent"))?
        };
        {
            let children = parent_data.children.read();
            if let Some(id) = children.get(name) {
                return Ok(id);
            }
        }
        let mut children = parent_data.children.write();
        if let Some(id) = children.get(name) {
            // lost the race: someone else created it first
            return Ok(id);
        }
        let new_path = parent_data.path.child(name);
        let new_id = self.insert_link(new_path.clone(), kind, Some(parent), mode);
        children.insert(name.to_string(), new_id);
        drop(children);
        self.notify_structural_created(&parent_data, name, kind, &new_path);
        trace!("tree: created link {new_id} at {name}");
        Ok(new_id)
    }

    /// Fan out `child_found`/`item_created_below` to monitors registered on
    /// `parent` and its ancestors (§4.4).
    fn notify_structural_created(&self, parent: &Arc<LinkData>, name: &str, kind: Kind, new_path: &Path) {
        for sub in parent.subscribers.lock().iter() {
            if let Subscriber::Monitor { tx, .. } = sub {
                let _ = tx.send(TreeEvent::ChildFound {
                    name: name.to_string(),
                    kind,
                });
            }
        }
        let arena = self.arena.read();
        let mut cur = parent.parent;
        while let Some(anc_id) = cur {
            let Some(anc) = arena.get(anc_id) else { break };
            for sub in anc.subscribers.lock().iter() {
                if let Subscriber::Monitor { tx, .. } = sub {
                    let _ = tx.send(TreeEvent::ItemCreatedBelow { path: new_path.clone() });
                }
            }
            cur = anc.parent;
        }
    }

    /// Fan out `child_deleted`/`item_deleted_below`, mirroring
    /// `notify_structural_created`.
    fn notify_structural_deleted(&self, parent: &Arc<LinkData>, name: &str, deleted_path: &Path) {
        for sub in parent.subscribers.lock().iter() {
            if let Subscriber::Monitor { tx, .. } = sub {
                let _ = tx.send(TreeEvent::ChildDeleted { name: name.to_string() });
            }
        }
        let arena = self.arena.read();
        let mut cur = parent.parent;
        while let Some(anc_id) = cur {
            let Some(anc) = arena.get(anc_id) else { break };
            for sub in anc.subscribers.lock().iter() {
                if let Subscriber::Monitor { tx, .. } = sub {
                    let _ = tx.send(TreeEvent::ItemDeletedBelow { path: deleted_path.clone() });
                }
            }
            cur = anc.parent;
        }
    }

    fn insert_link(self: &Arc<Self>, path: Path, kind: Kind, parent: Option<LinkId>, mode: Mode) -> LinkId {
        let mut arena = self.arena.write();
        let id = if let Some(slot) = arena.free.pop() {
            slot as LinkId
        } else {
            arena.slots.len() as LinkId
        };
        let data = Arc::new(LinkData::new(id, path, kind, parent, mode));
        if (id as usize) < arena.slots.len() {
            arena.slots[id as usize] = Some(data);
        } else {
            arena.slots.push(Some(data));
        }
        id
    }

    /// Create (or fetch, idempotently) `link`'s twin, the other polarity of
    /// a BiDir pair (I2, I3).
    pub fn add_twin(self: &Arc<Self>, link: &LinkRef, initial_mode: Mode) -> ArnResult<LinkRef> {
        if let Some(existing) = link.twin() {
            return Ok(existing);
        }
        let twin_path = link
            .path()
            .twin_path()
            .ok_or_else(|| ArnError::new(ErrorKind::CreateError, Subsystem::Tree, "root has no twin"))?;
        let mode = Mode::from_bits(link.mode().bits() | initial_mode.bits() | Mode::BIDIR);
        let twin = self.get_or_create(&twin_path, link.kind(), mode)?;
        link.data.merge_mode(Mode::BIDIR);
        *link.data.twin.write() = Some(twin.id());
        *twin.data.twin.write() = Some(link.id());
        Ok(twin)
    }

    pub fn subscribe(&self, link: &LinkRef, subscriber: Subscriber) {
        link.data.subscribers.lock().push(subscriber);
    }

    pub fn unsubscribe(&self, link: &LinkRef, subscriber_id: u64) {
        link.data.subscribers.lock().retain(|s| s.id() != subscriber_id);
    }

    /// Apply a mode-bit change (§4.2). Returns whether anything changed so
    /// callers can skip emitting a mode-change frame for a no-op.
    pub fn add_mode(&self, link: &LinkRef, bits: u8) -> ArnResult<bool> {
        if bits & Mode::SAVE != 0 && !link.mode().is_save() {
            let mount = self.persist_mount.read().clone();
            let under_mount = match mount {
                Some(m) => link.path().as_str().starts_with(m.as_str()),
                None => false,
            };
            if !under_mount {
                log::warn!("tree: refusing Save on {} outside persistence mount", link.path());
                return Ok(false);
            }
        }
        let changed = link.data.merge_mode(bits);
        if changed {
            self.notify_mode_change(link);
            if bits & Mode::SAVE != 0 {
                if let Some(backend) = self.persist_backend.read().clone() {
                    let meta = RecordMeta { mandatory: true, used: true };
                    let value = link.value();
                    if let Err(e) = backend.save(link.path(), &value.export(), meta) {
                        log::warn!("tree: failed to persist {}: {e}", link.path());
                    }
                }
            }
        }
        Ok(changed)
    }

    fn notify_mode_change(&self, link: &LinkRef) {
        let mode = link.mode();
        for sub in link.data.subscribers.lock().iter() {
            if let Subscriber::Session { tx, remote_id, .. } = sub {
                let _ = tx.send(SessionOutboundEvent::Mode {
                    remote_id: *remote_id,
                    mode,
                });
            }
        }
    }

    /// Twin-crossing write (§4.1 "Twin crossing", I2). `origin` tags the
    /// event so `block_echo` subscribers matching it can skip delivery.
    pub fn set_value(
        &self,
        link: &LinkRef,
        value: Value,
        flags: Flags,
        same: SameValue,
        hstate: HandleState,
        origin: Option<u64>,
    ) -> ArnResult<Delivery> {
        self.set_value_with_pattern(link, value, flags, same, hstate, origin, None)
    }

    /// Full form of `set_value` carrying an anti-congestion overwrite
    /// pattern (§3.4, §4.5) through to session subscribers.
    pub fn set_value_with_pattern(
        &self,
        link: &LinkRef,
        value: Value,
        flags: Flags,
        same: SameValue,
        hstate: HandleState,
        origin: Option<u64>,
        queue_overwrite_pattern: Option<String>,
    ) -> ArnResult<Delivery> {
        if link.kind() == Kind::Folder {
            return Err(ArnError::new(
                ErrorKind::AssignToFolder,
                Subsystem::Tree,
                link.path().as_str(),
            ));
        }
        if hstate.ignore_same_value && same == SameValue::Default {
            let current = link.data.value.read();
            if current.export() == value.export() {
                return Ok(Delivery::SuppressedSame);
            }
        }
        let seq_no = if link.mode().is_pipe() {
            Some(link.data.next_pipe_seq())
        } else {
            None
        };
        *link.data.value.write() = value.clone();

        if link.mode().is_save() && !flags.from_persist {
            if let Some(backend) = self.persist_backend.read().clone() {
                let meta = RecordMeta { mandatory: true, used: true };
                if let Err(e) = backend.save(link.path(), &value.export(), meta) {
                    log::warn!("tree: failed to persist {}: {e}", link.path());
                }
            }
        }

        let deliver_to = if hstate.uncrossed || !link.mode().is_bidir() {
            link.data.clone()
        } else if let Some(twin_id) = *link.data.twin.read() {
            match self.arena.read().get(twin_id) {
                Some(d) => d,
                None => link.data.clone(),
            }
        } else {
            link.data.clone()
        };

        self.notify(&deliver_to, &value, flags, seq_no, origin, queue_overwrite_pattern);
        trace!("tree: set_value on {}", link.path());
        Ok(Delivery::Delivered)
    }

    fn notify(
        &self,
        target: &Arc<LinkData>,
        value: &Value,
        flags: Flags,
        seq_no: Option<u32>,
        origin: Option<u64>,
        queue_overwrite_pattern: Option<String>,
    ) {
        for sub in target.subscribers.lock().iter() {
            let mut ev_flags = flags;
            ev_flags.echo = origin.is_some() && origin == Some(sub.id());
            match sub {
                Subscriber::Handle { tx, .. } | Subscriber::DelayTimer { tx, .. } => {
                    let _ = tx.send(ChangeEvent {
                        value: value.clone(),
                        flags: ev_flags,
                        seq_no,
                        queue_overwrite_pattern: queue_overwrite_pattern.clone(),
                    });
                }
                Subscriber::Session { tx, remote_id, .. } => {
                    let _ = tx.send(SessionOutboundEvent::Set {
                        remote_id: *remote_id,
                        value: value.clone(),
                        seq_no,
                        queue_overwrite_pattern: queue_overwrite_pattern.clone(),
                    });
                }
                Subscriber::Monitor { .. } => {}
            }
        }
    }

    /// Destroy a link (lifecycle, §3.2). `is_global` propagates a delete
    /// message on every session that had the link mapped; that propagation
    /// itself is driven from `net::session`, which calls back in here only
    /// for the local bookkeeping half.
    pub fn destroy(self: &Arc<Self>, link: &LinkRef, _is_global: bool) -> ArnResult<()> {
        if link.data.refcount() != 0 {
            return Err(ArnError::new(
                ErrorKind::CreateError,
                Subsystem::Tree,
                format!("{} still has live handles or children", link.path()),
            ));
        }
        if let Some(parent_id) = link.data.parent {
            if let Some(parent) = self.arena.read().get(parent_id) {
                parent.children.write().remove(link.path().leaf_name());
                self.notify_structural_deleted(&parent, link.path().leaf_name(), link.path());
            }
        }
        for sub in link.data.subscribers.lock().iter() {
            if let Subscriber::Session { tx, remote_id, .. } = sub {
                let _ = tx.send(SessionOutboundEvent::Destroyed {
                    remote_id: *remote_id,
                });
            }
        }
        if let Some(twin_id) = *link.data.twin.read() {
            *link.data.twin.write() = None;
            if let Some(twin) = self.arena.read().get(twin_id) {
                *twin.twin.write() = None;
            }
        }
        let mut arena = self.arena.write();
        let idx = link.id() as usize;
        if idx < arena.slots.len() {
            arena.slots[idx] = None;
            arena.free.push(idx);
        }
        Ok(())
    }

    pub fn enumerate_children(&self, folder: &LinkRef) -> Vec<(String, LinkId, Kind)> {
        let arena = self.arena.read();
        folder
            .data
            .children
            .read()
            .names()
            .filter_map(|(name, id)| arena.get(id).map(|d| (name.to_string(), id, d.kind)))
            .collect()
    }

    pub fn stats(&self) -> Stats {
        let arena = self.arena.read();
        let mut handle_count = 0usize;
        let mut subscriber_count = 0usize;
        let mut link_count = 0usize;
        for slot in arena.slots.iter().flatten() {
            link_count += 1;
            handle_count += slot.handle_count.load(Ordering::Relaxed);
            subscriber_count += slot.subscribers.lock().len();
        }
        Stats {
            link_count,
            handle_count,
            subscriber_count,
        }
    }
}
