/*
 * This file is a part of Arn
 */

//! Monitor (component D, §4.4): a subtree observer. Distinct handle-like
//! type per design notes §9's "Monitor is a distinct handle-like type with
//! its own operations" -- it does not wrap [`crate::handle::Handle`].

use crate::ctx::Context;
use crate::error::ArnResult;
use crate::tree::link::Subscriber;
use crate::tree::{Kind, LinkRef, Mode, Path, TreeEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Monitor {
    ctx: Arc<Context>,
    folder: Option<LinkRef>,
    id: u64,
    tx: mpsc::UnboundedSender<TreeEvent>,
    rx: mpsc::UnboundedReceiver<TreeEvent>,
    reported: HashSet<String>,
}

impl Monitor {
    pub fn open(ctx: &Arc<Context>, path: &str) -> ArnResult<Monitor> {
        let path = Path::parse(path)?;
        let folder = ctx.store.get_or_create(&path, Kind::Folder, Mode::empty())?;
        let id = ctx.store.next_subscriber_id();
        let (tx, rx) = mpsc::unbounded_channel();
        ctx.store.subscribe(&folder, Subscriber::Monitor { id, tx: tx.clone() });
        let mut m = Monitor {
            ctx: ctx.clone(),
            folder: Some(folder),
            id,
            tx,
            rx,
            reported: HashSet::new(),
        };
        m.seed_existing_children();
        Ok(m)
    }

    fn seed_existing_children(&mut self) {
        let Some(folder) = self.folder.as_ref() else { return };
        for (name, _id, kind) in self.ctx.store.enumerate_children(folder) {
            self.reported.insert(name.clone());
            let _ = self.tx.send(TreeEvent::ChildFound { name, kind });
        }
    }

    /// Clear the "already reported" set and re-emit `child_found` for every
    /// currently existing child (§4.4 `restart`).
    pub fn restart(&mut self) {
        self.reported.clear();
        self.seed_existing_children();
    }

    pub fn close(&mut self) {
        if let Some(folder) = self.folder.take() {
            self.ctx.store.unsubscribe(&folder, self.id);
        }
    }

    /// Await the next structural event, deduplicating `child_found` per
    /// §4.4 ("a child reported once is not reported again until either
    /// deletion or restart").
    pub async fn recv(&mut self) -> Option<TreeEvent> {
        loop {
            let ev = self.rx.recv().await?;
            if let Some(ev) = self.dedup(ev) {
                return Some(ev);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<TreeEvent> {
        loop {
            let ev = self.rx.try_recv().ok()?;
            if let Some(ev) = self.dedup(ev) {
                return Some(ev);
            }
        }
    }

    fn dedup(&mut self, ev: TreeEvent) -> Option<TreeEvent> {
        match &ev {
            TreeEvent::ChildFound { name, .. } => {
                if !self.reported.insert(name.clone()) {
                    return None;
                }
            }
            TreeEvent::ChildDeleted { name } => {
                self.reported.remove(name);
            }
            _ => {}
        }
        Some(ev)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_existing_and_new_children_once() {
        let ctx = Context::new();
        ctx.store
            .get_or_create(&Path::parse("//House/Kitchen").unwrap(), Kind::Folder, Mode::empty())
            .unwrap();
        let mut mon = Monitor::open(&ctx, "//House").unwrap();
        let ev = mon.recv().await.unwrap();
        assert!(matches!(ev, TreeEvent::ChildFound { ref name, .. } if name == "Kitchen"));

        let h = crate::handle::Handle::open(&ctx, "//House/Garage").unwrap();
        let ev = mon.recv().await.unwrap();
        assert!(matches!(ev, TreeEvent::ChildFound { ref name, .. } if name == "Garage"));
        assert!(mon.try_recv().is_none());
        drop(h);
    }

    #[tokio::test]
    async fn deeper_descendant_reported_below() {
        let ctx = Context::new();
        let mut mon = Monitor::open(&ctx, "//House").unwrap();
        assert!(mon.try_recv().is_none());
        let _h = crate::handle::Handle::open(&ctx, "//House/Kitchen/Lamp/value").unwrap();
        let first = mon.recv().await.unwrap();
        assert!(matches!(first, TreeEvent::ChildFound { ref name, .. } if name == "Kitchen"));
        let second = mon.recv().await.unwrap();
        assert!(matches!(second, TreeEvent::ItemCreatedBelow { .. }));
    }

    #[tokio::test]
    async fn restart_reemits_child_found() {
        let ctx = Context::new();
        ctx.store
            .get_or_create(&Path::parse("//House/Kitchen").unwrap(), Kind::Folder, Mode::empty())
            .unwrap();
        let mut mon = Monitor::open(&ctx, "//House").unwrap();
        let _ = mon.recv().await.unwrap();
        assert!(mon.try_recv().is_none());
        mon.restart();
        let ev = mon.recv().await.unwrap();
        assert!(matches!(ev, TreeEvent::ChildFound { ref name, .. } if name == "Kitchen"));
    }
}
