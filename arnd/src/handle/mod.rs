/*
 * This file is a part of Arn
 */

//! Handle (component C, §4.3): a user-facing reference to a link with its
//! own local view-state (§3.3). `Handle` is the "generic" shape of the
//! tagged-variant family design notes §9 describes (generic / pipe /
//! persist); [`crate::handle::pipe::Pipe`] wraps a `Handle` opened in Pipe
//! mode with the ordering/anti-congestion extras of §4.5.

pub mod monitor;
pub mod pipe;

use crate::ctx::Context;
use crate::error::{ArnError, ArnResult, ErrorKind};
use crate::tree::link::Subscriber;
use crate::tree::{ChangeEvent, Delivery, Flags, HandleState, Kind, LinkRef, Mode, Path, SameValue, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
struct ViewState {
    ignore_same_value: bool,
    block_echo: bool,
    uncrossed: bool,
    delay_ms: u64,
    reference: Option<u64>,
}

pub struct Handle {
    ctx: Arc<Context>,
    link: Option<LinkRef>,
    id: u64,
    state: ViewState,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    delay_sub_id: Option<u64>,
    delay_task: Option<JoinHandle<()>>,
}

impl Handle {
    pub fn open(ctx: &Arc<Context>, path: &str) -> ArnResult<Handle> {
        let path = Path::parse(path)?;
        let link = ctx.store.get_or_create(&path, Kind::Leaf, Mode::empty())?;
        Self::from_link(ctx, link)
    }

    /// Synthesize a unique child segment under `parent` (§4.3 `open_uuid`).
    pub fn open_uuid(ctx: &Arc<Context>, parent: &str, prefix: &str) -> ArnResult<Handle> {
        let parent_path = Path::parse(parent)?;
        let segment = ctx.unique_segment(prefix);
        let path = parent_path.child(&segment);
        let link = ctx.store.get_or_create(&path, Kind::Leaf, Mode::empty())?;
        Self::from_link(ctx, link)
    }

    pub(crate) fn from_link(ctx: &Arc<Context>, link: LinkRef) -> ArnResult<Handle> {
        let id = ctx.alloc_handle_id();
        link.data.handle_count.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = mpsc::unbounded_channel();
        ctx.store.subscribe(&link, Subscriber::Handle { id, tx: tx.clone() });
        Ok(Handle {
            ctx: ctx.clone(),
            link: Some(link),
            id,
            state: ViewState::default(),
            rx,
            tx,
            delay_sub_id: None,
            delay_task: None,
        })
    }

    pub fn path(&self) -> ArnResult<&Path> {
        Ok(self.link()?.path())
    }

    pub(crate) fn link_ref(&self) -> ArnResult<&LinkRef> {
        self.link()
    }

    fn link(&self) -> ArnResult<&LinkRef> {
        self.link
            .as_ref()
            .ok_or_else(|| ArnError::with_kind(ErrorKind::NotOpen))
    }

    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            self.ctx.store.unsubscribe(&link, self.id);
            if let Some(sub_id) = self.delay_sub_id.take() {
                self.ctx.store.unsubscribe(&link, sub_id);
            }
            if let Some(task) = self.delay_task.take() {
                task.abort();
            }
            link.data.handle_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn get_value(&self) -> ArnResult<Value> {
        Ok(self.link()?.value())
    }

    pub fn set_value(&self, value: Value) -> ArnResult<Delivery> {
        let hstate = HandleState {
            ignore_same_value: self.state.ignore_same_value,
            uncrossed: self.state.uncrossed,
        };
        self.ctx.store.set_value(
            self.link()?,
            value,
            Flags::default(),
            SameValue::Default,
            hstate,
            Some(self.id),
        )
    }

    /// Force delivery even under `ignore_same_value`.
    pub fn set_value_accept(&self, value: Value) -> ArnResult<Delivery> {
        let hstate = HandleState {
            ignore_same_value: self.state.ignore_same_value,
            uncrossed: self.state.uncrossed,
        };
        self.ctx.store.set_value(
            self.link()?,
            value,
            Flags::default(),
            SameValue::Accept,
            hstate,
            Some(self.id),
        )
    }

    /// Write carrying an anti-congestion overwrite pattern (§4.5); used by
    /// [`crate::handle::pipe::Pipe::set_value_overwrite`].
    pub(crate) fn set_value_with_pattern(&self, value: Value, pattern: String) -> ArnResult<Delivery> {
        let hstate = HandleState {
            ignore_same_value: self.state.ignore_same_value,
            uncrossed: self.state.uncrossed,
        };
        self.ctx.store.set_value_with_pattern(
            self.link()?,
            value,
            Flags::default(),
            SameValue::Accept,
            hstate,
            Some(self.id),
            Some(pattern),
        )
    }

    pub fn add_mode(&self, bits: u8) -> ArnResult<bool> {
        self.ctx.store.add_mode(self.link()?, bits)
    }

    pub fn toggle_bool(&self) -> ArnResult<Delivery> {
        let cur = matches!(self.get_value()?, Value::Bool(true));
        self.set_value(Value::Bool(!cur))
    }

    /// Atomic read-modify-write: `new = (cur & !mask) | (val & mask)`.
    pub fn set_bits(&self, mask: i64, val: i64) -> ArnResult<Delivery> {
        let cur = match self.get_value()? {
            Value::Int(i) => i,
            _ => 0,
        };
        let new = (cur & !mask) | (val & mask);
        self.set_value(Value::Int(new))
    }

    pub fn add_value(&self, n: i64) -> ArnResult<Delivery> {
        let cur = match self.get_value()? {
            Value::Int(i) => i,
            _ => 0,
        };
        self.set_value(Value::Int(cur + n))
    }

    pub fn arn_export(&self) -> ArnResult<Vec<u8>> {
        Ok(self.get_value()?.export())
    }

    pub fn arn_import(&self, bytes: &[u8]) -> ArnResult<Delivery> {
        self.set_value(Value::import(bytes))
    }

    pub fn set_ignore_same_value(&mut self, v: bool) {
        self.state.ignore_same_value = v;
    }
    pub fn set_block_echo(&mut self, v: bool) {
        self.state.block_echo = v;
    }
    pub fn set_uncrossed(&mut self, v: bool) {
        self.state.uncrossed = v;
    }
    pub fn set_reference(&mut self, r: Option<u64>) {
        self.state.reference = r;
    }
    pub fn reference(&self) -> Option<u64> {
        self.state.reference
    }

    /// Coalesce consecutive updates before delivering (§3.3, §4.1 "Delay
    /// coalescing"). The window starts at the first update after an idle
    /// period and collects further updates without resetting, matching P6's
    /// "N writes within a D-window produce one notification".
    pub fn set_delay(&mut self, ms: u64) -> ArnResult<()> {
        if self.state.delay_ms == ms {
            return Ok(());
        }
        let link = self.link()?.clone();
        if let Some(sub_id) = self.delay_sub_id.take() {
            self.ctx.store.unsubscribe(&link, sub_id);
        } else {
            self.ctx.store.unsubscribe(&link, self.id);
        }
        if let Some(task) = self.delay_task.take() {
            task.abort();
        }
        self.state.delay_ms = ms;
        if ms == 0 {
            self.ctx
                .store
                .subscribe(&link, Subscriber::Handle { id: self.id, tx: self.tx.clone() });
        } else {
            let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<ChangeEvent>();
            let sub_id = self.ctx.store.next_subscriber_id();
            self.ctx
                .store
                .subscribe(&link, Subscriber::DelayTimer { id: sub_id, tx: internal_tx });
            self.delay_sub_id = Some(sub_id);
            let forward = self.tx.clone();
            let delay = Duration::from_millis(ms);
            let task = tokio::spawn(async move {
                loop {
                    let first = match internal_rx.recv().await {
                        Some(e) => e,
                        None => break,
                    };
                    let mut latest = first;
                    let deadline = tokio::time::Instant::now() + delay;
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => break,
                            maybe = internal_rx.recv() => {
                                match maybe {
                                    Some(ev) => latest = ev,
                                    None => {
                                        let _ = forward.send(latest);
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    if forward.send(latest).is_err() {
                        break;
                    }
                }
            });
            self.delay_task = Some(task);
        }
        Ok(())
    }

    pub async fn recv_change(&mut self) -> Option<ChangeEvent> {
        loop {
            let ev = self.rx.recv().await?;
            if ev.flags.echo && self.state.block_echo {
                continue;
            }
            return Some(ev);
        }
    }

    pub fn try_recv_change(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(ev) if ev.flags.echo && self.state.block_echo => continue,
                Ok(ev) => return Some(ev),
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Context;

    #[tokio::test]
    async fn not_open_after_close() {
        let ctx = Context::new();
        let mut h = Handle::open(&ctx, "//A/v").unwrap();
        h.close();
        assert!(h.get_value().is_err());
    }

    #[tokio::test]
    async fn assign_to_folder_fails() {
        let ctx = Context::new();
        ctx.store
            .get_or_create(&Path::parse("//A").unwrap(), Kind::Folder, Mode::empty())
            .unwrap();
        let h = Handle::open(&ctx, "//A").unwrap();
        let err = h.set_value(Value::Int(1)).unwrap_err();
        assert!(err.is(crate::error::ErrorKind::AssignToFolder));
    }

    #[tokio::test]
    async fn delay_coalesces_n_writes_into_one_notification() {
        let ctx = Context::new();
        let writer = Handle::open(&ctx, "//S/v").unwrap();
        let mut reader = Handle::open(&ctx, "//S/v").unwrap();
        reader.set_delay(30).unwrap();
        for i in 0..5 {
            writer.set_value(Value::Int(i)).unwrap();
        }
        let ev = tokio::time::timeout(Duration::from_millis(500), reader.recv_change())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.value, Value::Int(4));
        assert!(reader.try_recv_change().is_none());
    }

    #[tokio::test]
    async fn block_echo_skips_self_originated_update() {
        let ctx = Context::new();
        let mut h = Handle::open(&ctx, "//S/v").unwrap();
        h.set_block_echo(true);
        h.set_value(Value::Int(1)).unwrap();
        assert!(h.try_recv_change().is_none());
    }
}
