/*
 * This file is a part of Arn
 */

//! Pipe (component E, §4.5): a handle in Pipe mode, offering ordered byte
//! messages. Writes are never coalesced by ignore-same -- every write
//! produces a frame -- so `Pipe::write` always accepts, bypassing the
//! handle's `ignore_same_value` policy.

use crate::ctx::Context;
use crate::error::ArnResult;
use crate::handle::Handle;
use crate::tree::{ChangeEvent, Delivery, Mode, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PipeMessage {
    pub value: Value,
    pub seq_no: Option<u32>,
    /// set when `check_seq` is enabled and this frame's sequence number did
    /// not match the expected counter (§4.5, P4)
    pub out_of_sequence: bool,
}

pub struct Pipe {
    handle: Handle,
    check_seq: bool,
    expected: Option<u32>,
}

impl Pipe {
    pub fn open(ctx: &Arc<Context>, path: &str) -> ArnResult<Pipe> {
        let handle = Handle::open(ctx, path)?;
        handle.add_mode(Mode::PIPE)?;
        ctx.store.add_twin(handle.link_ref()?, Mode::empty())?;
        Ok(Pipe {
            handle,
            check_seq: false,
            expected: None,
        })
    }

    /// The first received frame initializes the expected counter; after
    /// that a mismatch emits `out_of_sequence` exactly once per gap and
    /// resynchronizes to the received value + 1 (§4.5).
    pub fn set_check_seq(&mut self, enabled: bool) {
        self.check_seq = enabled;
        self.expected = None;
    }

    pub fn write(&self, value: Value) -> ArnResult<Delivery> {
        self.handle.set_value_accept(value)
    }

    /// Before enqueueing, a session's outbound queue scans queued pipe
    /// frames for this link and replaces the first one whose value matches
    /// `pattern`, bounding queue growth for repeating messages like
    /// heartbeats (§4.5 "Anti-congestion overwrite").
    pub fn write_overwrite(&self, value: Value, pattern: impl Into<String>) -> ArnResult<Delivery> {
        self.handle.set_value_with_pattern(value, pattern.into())
    }

    pub async fn recv(&mut self) -> Option<PipeMessage> {
        let ev = self.handle.recv_change().await?;
        Some(self.process(ev))
    }

    pub fn try_recv(&mut self) -> Option<PipeMessage> {
        let ev = self.handle.try_recv_change()?;
        Some(self.process(ev))
    }

    fn process(&mut self, ev: ChangeEvent) -> PipeMessage {
        let mut out_of_sequence = false;
        if self.check_seq {
            if let Some(seq) = ev.seq_no {
                if let Some(expected) = self.expected {
                    out_of_sequence = expected != seq;
                }
                self.expected = Some((seq + 1) % 1000);
            }
        }
        PipeMessage {
            value: ev.value,
            seq_no: ev.seq_no,
            out_of_sequence,
        }
    }

    pub fn close(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_increment_mod_1000() {
        let ctx = Context::new();
        let writer = Pipe::open(&ctx, "//Pipes/p!").unwrap();
        let mut reader = Pipe::open(&ctx, "//Pipes/p").unwrap();
        writer.write(Value::String("a".into())).unwrap();
        writer.write(Value::String("b".into())).unwrap();
        let m1 = reader.recv().await.unwrap();
        let m2 = reader.recv().await.unwrap();
        assert_eq!(m1.value, Value::String("a".into()));
        assert_eq!(m1.seq_no, Some(0));
        assert_eq!(m2.seq_no, Some(1));
    }

    #[tokio::test]
    async fn out_of_sequence_fires_once_on_a_gap() {
        let ctx = Context::new();
        let writer = Pipe::open(&ctx, "//Pipes/q!").unwrap();
        let mut reader = Pipe::open(&ctx, "//Pipes/q").unwrap();
        reader.set_check_seq(true);
        // simulate frames 0,1,2 with frame 1 dropped in transit
        for v in ["a", "b", "c"] {
            writer.write(Value::String(v.into())).unwrap();
        }
        let m0 = reader.recv().await.unwrap();
        assert!(!m0.out_of_sequence);
        let _dropped = reader.recv().await.unwrap(); // would be seq=1, consume to simulate drop detection setup
        // manually feed a frame claiming seq 2 after having only seen seq 0
        reader.expected = Some(1);
        let ev = ChangeEvent {
            value: Value::String("c".into()),
            flags: Default::default(),
            seq_no: Some(2),
            queue_overwrite_pattern: None,
        };
        let msg = reader.process(ev);
        assert!(msg.out_of_sequence);
    }
}
