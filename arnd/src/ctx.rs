/*
 * This file is a part of Arn
 */

//! The explicit runtime context (component L, design notes §9 "Global
//! mutable state"). Unlike the teacher's `fractal::Global` unsafe static
//! singleton, `Context` is an ordinary `Arc`-backed value constructed with
//! [`Context::new`] so tests can build independent trees side by side. A
//! thread-local [`CURRENT`] holds the ergonomic "current context" for call
//! sites that don't want to thread a `Context` through every call.

use crate::persist::PersistBackend;
use crate::tree::{Flags, HandleState, Kind, Mode, Path, SameValue, Store, Value};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct Context {
    pub store: Arc<Store>,
    next_handle_id: AtomicU64,
    next_uuid_segment: AtomicU64,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Context>>> = const { RefCell::new(None) };
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Context {
            store: Store::new(),
            next_handle_id: AtomicU64::new(1),
            next_uuid_segment: AtomicU64::new(1),
        })
    }

    pub fn with_persist_mount(self: &Arc<Self>, mount: Path) {
        self.store.set_persist_mount(Some(mount));
    }

    /// Mount a persistence backend and preload its mandatory paths (§6.5):
    /// "on startup the core loads all mandatory paths and creates their
    /// links". Preloaded writes are tagged `from_persist` so they don't
    /// immediately re-save themselves.
    pub fn with_persist_backend(self: &Arc<Self>, backend: Arc<dyn PersistBackend>) -> crate::error::ArnResult<()> {
        self.store.set_persist_backend(Some(backend.clone()));
        for path in backend.list_mandatory()? {
            let Some((bytes, _meta)) = backend.load(&path)? else {
                continue;
            };
            let link = self.store.get_or_create(&path, Kind::Leaf, Mode::from_bits(Mode::SAVE))?;
            self.store.set_value(
                &link,
                Value::import(&bytes),
                Flags { from_remote: false, from_persist: true, echo: false },
                SameValue::Accept,
                HandleState::default(),
                None,
            )?;
        }
        Ok(())
    }

    pub fn alloc_handle_id(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Synthesize a unique path segment for `open_uuid` (§4.3). Not a
    /// cryptographic UUID -- just process-unique, matching the original's
    /// "unique segment" contract without pulling in randomness for what is
    /// really a counter.
    pub fn unique_segment(&self, prefix: &str) -> String {
        let n = self.next_uuid_segment.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{n}")
    }

    /// Install this context as the thread's current context, returning the
    /// previous one (if any) so callers can restore it.
    pub fn install(self: &Arc<Self>) -> Option<Arc<Context>> {
        CURRENT.with(|c| c.borrow_mut().replace(self.clone()))
    }

    pub fn current() -> Option<Arc<Context>> {
        CURRENT.with(|c| c.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_contexts_have_independent_stores() {
        let a = Context::new();
        let b = Context::new();
        let p = Path::parse("//X").unwrap();
        a.store
            .get_or_create(&p, crate::tree::Kind::Leaf, crate::tree::Mode::empty())
            .unwrap();
        assert!(a.store.lookup(&p).is_some());
        assert!(b.store.lookup(&p).is_none());
    }

    #[test]
    fn install_sets_current() {
        let ctx = Context::new();
        assert!(Context::current().is_none());
        ctx.install();
        assert!(Context::current().is_some());
    }

    #[test]
    fn persist_backend_preloads_mandatory_paths_and_writeback_survives_restart() {
        use crate::persist::DirPersist;

        let dir = std::env::temp_dir().join(format!("arn-ctx-persist-test-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();

        let path = Path::parse("//Cfg/port").unwrap();
        {
            let backend = std::sync::Arc::new(DirPersist::open(&dir).unwrap());
            let ctx = Context::new();
            ctx.with_persist_mount(Path::root());
            ctx.with_persist_backend(backend.clone()).unwrap();

            let link = ctx.store.get_or_create(&path, Kind::Leaf, Mode::from_bits(Mode::SAVE)).unwrap();
            ctx.store
                .set_value(&link, Value::Int(8080), Flags::default(), SameValue::Default, HandleState::default(), None)
                .unwrap();
        }

        // "restart": open a fresh context against the same on-disk backend
        let backend = std::sync::Arc::new(DirPersist::open(&dir).unwrap());
        let ctx = Context::new();
        ctx.with_persist_mount(Path::root());
        ctx.with_persist_backend(backend).unwrap();
        let link = ctx.store.lookup(&path).expect("mandatory path was not preloaded");
        assert_eq!(link.value(), Value::Int(8080));

        std::fs::remove_dir_all(&dir).ok();
    }
}
