/*
 * This file is a part of Arn
 */

//! Link attributes, mode bitsets, and the subscriber descriptor (data model
//! §3.2, design notes §9 "Observer pattern").

use crate::tree::path::Path;
use crate::tree::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::sync::mpsc;

pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Folder,
    Leaf,
}

/// `Mode` bits are monotonic on a live link: once set, never cleared (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u8);

impl Mode {
    pub const BIDIR: u8 = 0b001;
    pub const PIPE: u8 = 0b010;
    pub const SAVE: u8 = 0b100;

    pub const fn empty() -> Self {
        Mode(0)
    }
    pub const fn bits(self) -> u8 {
        self.0
    }
    pub const fn from_bits(bits: u8) -> Self {
        Mode(bits)
    }
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }
    pub fn is_bidir(self) -> bool {
        self.contains(Self::BIDIR)
    }
    pub fn is_pipe(self) -> bool {
        self.contains(Self::PIPE)
    }
    pub fn is_save(self) -> bool {
        self.contains(Self::SAVE)
    }
    /// Merge in new bits, implying BiDir when Pipe is set (I3). Returns the
    /// merged mode and whether any new bit was actually added.
    pub fn merge(self, add: u8) -> (Self, bool) {
        let mut add = add;
        if add & Self::PIPE != 0 {
            add |= Self::BIDIR;
        }
        let merged = self.0 | add;
        (Mode(merged), merged != self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMode(u8);

impl SyncMode {
    pub const MASTER: u8 = 0b01;
    pub const AUTO_DESTROY: u8 = 0b10;

    pub const fn empty() -> Self {
        SyncMode(0)
    }
    pub const fn from_bits(bits: u8) -> Self {
        SyncMode(bits)
    }
    pub fn bits(self) -> u8 {
        self.0
    }
    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }
    pub fn is_master(self) -> bool {
        self.contains(Self::MASTER)
    }
    pub fn is_auto_destroy(self) -> bool {
        self.contains(Self::AUTO_DESTROY)
    }
    pub fn insert(&mut self, bit: u8) {
        self.0 |= bit;
    }
}

/// A subscriber descriptor: who to notify on value/mode change, and where
/// (design notes §9). The store never calls back directly into handle or
/// session code; it pushes onto the subscriber's mailbox instead.
#[derive(Clone)]
pub enum Subscriber {
    Handle {
        id: u64,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    },
    /// A delay-coalescing proxy: raw change events land here first and are
    /// debounced before being forwarded to the owning handle's own mailbox.
    DelayTimer {
        id: u64,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    },
    Session {
        session_id: u64,
        remote_id: u64,
        tx: mpsc::UnboundedSender<SessionOutboundEvent>,
    },
    /// A subtree observer (component D); receives structural events rather
    /// than value changes.
    Monitor {
        id: u64,
        tx: mpsc::UnboundedSender<TreeEvent>,
    },
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        match self {
            Subscriber::Handle { id, .. } => *id,
            Subscriber::DelayTimer { id, .. } => *id,
            Subscriber::Session { session_id, .. } => *session_id,
            Subscriber::Monitor { id, .. } => *id,
        }
    }
}

/// Structural tree events delivered to a [`Subscriber::Monitor`] (§4.4).
#[derive(Debug, Clone)]
pub enum TreeEvent {
    ChildFound { name: String, kind: Kind },
    ChildDeleted { name: String },
    ItemCreatedBelow { path: Path },
    ItemDeletedBelow { path: Path },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub from_remote: bool,
    pub from_persist: bool,
    pub echo: bool,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub value: Value,
    pub flags: Flags,
    pub seq_no: Option<u32>,
    /// anti-congestion overwrite pattern (§3.4, §4.5); only meaningful to a
    /// session's outbound queue, ignored by plain handle subscribers
    pub queue_overwrite_pattern: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SessionOutboundEvent {
    Set {
        remote_id: u64,
        value: Value,
        seq_no: Option<u32>,
        queue_overwrite_pattern: Option<String>,
    },
    Mode {
        remote_id: u64,
        mode: Mode,
    },
    Destroyed {
        remote_id: u64,
    },
}

/// Insertion-ordered name -> child map, backing `enumerate_children`'s
/// ordering guarantee (§4.1).
#[derive(Default)]
pub struct ChildMap {
    order: Vec<(Box<str>, LinkId)>,
    index: HashMap<Box<str>, usize>,
}

impl ChildMap {
    pub fn get(&self, name: &str) -> Option<LinkId> {
        self.index.get(name).map(|&i| self.order[i].1)
    }

    pub fn insert(&mut self, name: String, id: LinkId) {
        let name: Box<str> = name.into_boxed_str();
        if let Some(&i) = self.index.get(&name) {
            self.order[i].1 = id;
            return;
        }
        self.index.insert(name.clone(), self.order.len());
        self.order.push((name, id));
    }

    pub fn remove(&mut self, name: &str) -> Option<LinkId> {
        let i = self.index.remove(name)?;
        let (_, id) = self.order.remove(i);
        for (_, idx) in self.index.iter_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, LinkId)> + '_ {
        self.order.iter().map(|(name, id)| (&**name, *id))
    }
}

pub struct LinkData {
    pub id: LinkId,
    pub path: Path,
    pub kind: Kind,
    pub value: RwLock<Value>,
    mode: AtomicU8,
    pub parent: Option<LinkId>,
    pub children: RwLock<ChildMap>,
    pub twin: RwLock<Option<LinkId>>,
    pub handle_count: AtomicUsize,
    pub subscribers: Mutex<Vec<Subscriber>>,
    pub sync_mode: RwLock<HashMap<u64, SyncMode>>,
    pub next_seq: AtomicUsize,
}

impl LinkData {
    pub fn new(id: LinkId, path: Path, kind: Kind, parent: Option<LinkId>, mode: Mode) -> Self {
        LinkData {
            id,
            path,
            kind,
            value: RwLock::new(Value::Null),
            mode: AtomicU8::new(mode.bits()),
            parent,
            children: RwLock::new(ChildMap::default()),
            twin: RwLock::new(None),
            handle_count: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
            sync_mode: RwLock::new(HashMap::new()),
            next_seq: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.mode.load(Ordering::Acquire))
    }

    /// Merge new mode bits in; returns whether any bit actually changed.
    pub fn merge_mode(&self, add: u8) -> bool {
        let (merged, changed) = self.mode().merge(add);
        if changed {
            self.mode.store(merged.bits(), Ordering::Release);
        }
        changed
    }

    pub fn refcount(&self) -> usize {
        self.handle_count.load(Ordering::Acquire) + self.children.read().len()
    }

    pub fn next_pipe_seq(&self) -> u32 {
        (self.next_seq.fetch_add(1, Ordering::AcqRel) % 1000) as u32
    }
}
