/*
 * This file is a part of Arn
 */

//! The shared object tree (components A/B, §3, §4.1, §4.2).

pub mod link;
pub mod path;
pub mod store;
pub mod value;

pub use link::{ChangeEvent, Flags, Kind, LinkId, Mode, SessionOutboundEvent, Subscriber, SyncMode, TreeEvent};
pub use path::Path;
pub use store::{Delivery, HandleState, LinkRef, SameValue, Stats, Store};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::link::Subscriber;
    use tokio::sync::mpsc;

    #[test]
    fn lookup_absent_path_is_none() {
        let store = Store::new();
        assert!(store.lookup(&Path::parse("//Nothing/Here").unwrap()).is_none());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = Store::new();
        let p = Path::parse("//House/Kitchen/Lamp").unwrap();
        let a = store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        let b = store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        assert_eq!(a.id(), b.id());
        assert!(store.lookup(&p).is_some());
    }

    #[test]
    fn ancestors_are_materialized_as_folders() {
        let store = Store::new();
        let p = Path::parse("//A/B/C").unwrap();
        store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        let folder = store.lookup(&Path::parse("//A/B").unwrap()).unwrap();
        assert_eq!(folder.kind(), Kind::Folder);
        let children = store.enumerate_children(&folder);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "C");
    }

    #[test]
    fn twin_is_symmetric_and_bidir() {
        let store = Store::new();
        let p = Path::parse("//Pipes/p!").unwrap();
        let provider = store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        let requester = store.add_twin(&provider, Mode::empty()).unwrap();
        assert_eq!(requester.twin().unwrap().id(), provider.id());
        assert_eq!(provider.twin().unwrap().id(), requester.id());
        assert!(provider.mode().is_bidir());
        assert!(requester.mode().is_bidir());
    }

    #[test]
    fn set_value_on_folder_errors() {
        let store = Store::new();
        let p = Path::parse("//A").unwrap();
        let folder = store.get_or_create(&p, Kind::Folder, Mode::empty()).unwrap();
        let err = store
            .set_value(
                &folder,
                Value::Int(1),
                Flags::default(),
                SameValue::Default,
                HandleState::default(),
                None,
            )
            .unwrap_err();
        assert!(err.is(crate::error::ErrorKind::AssignToFolder));
    }

    #[test]
    fn ignore_same_suppresses_repeat_writes() {
        let store = Store::new();
        let p = Path::parse("//S/v").unwrap();
        let link = store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(&link, Subscriber::Handle { id: 1, tx });
        let hstate = HandleState {
            ignore_same_value: true,
            uncrossed: false,
        };
        for _ in 0..3 {
            store
                .set_value(&link, Value::Int(5), Flags::default(), SameValue::Default, hstate, None)
                .unwrap();
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn twin_crossing_delivers_to_twin_subscribers() {
        let store = Store::new();
        let p = Path::parse("//Chat/in!").unwrap();
        let provider = store.get_or_create(&p, Kind::Leaf, Mode::from_bits(Mode::BIDIR)).unwrap();
        let requester = store.add_twin(&provider, Mode::empty()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(&requester, Subscriber::Handle { id: 1, tx });
        store
            .set_value(
                &provider,
                Value::String("hi".into()),
                Flags::default(),
                SameValue::Default,
                HandleState::default(),
                None,
            )
            .unwrap();
        let ev = rx.try_recv().expect("twin should have received the update");
        assert_eq!(ev.value, Value::String("hi".into()));
        // the writer's own link also records the value for local reads
        assert_eq!(provider.value(), Value::String("hi".into()));
    }

    #[test]
    fn uncrossed_write_stays_local() {
        let store = Store::new();
        let p = Path::parse("//Chat/in!").unwrap();
        let provider = store.get_or_create(&p, Kind::Leaf, Mode::from_bits(Mode::BIDIR)).unwrap();
        let requester = store.add_twin(&provider, Mode::empty()).unwrap();
        let (prov_tx, mut prov_rx) = mpsc::unbounded_channel();
        let (req_tx, mut req_rx) = mpsc::unbounded_channel();
        store.subscribe(&provider, Subscriber::Handle { id: 1, tx: prov_tx });
        store.subscribe(&requester, Subscriber::Handle { id: 2, tx: req_tx });
        let hstate = HandleState {
            ignore_same_value: false,
            uncrossed: true,
        };
        store
            .set_value(&provider, Value::Int(1), Flags::default(), SameValue::Default, hstate, None)
            .unwrap();
        assert!(prov_rx.try_recv().is_ok());
        assert!(req_rx.try_recv().is_err());
    }

    #[test]
    fn destroy_requires_zero_refcount() {
        let store = Store::new();
        let p = Path::parse("//A/B").unwrap();
        let leaf = store.get_or_create(&p, Kind::Leaf, Mode::empty()).unwrap();
        let folder = store.lookup(&Path::parse("//A").unwrap()).unwrap();
        // folder still has a child -> refcount != 0
        assert!(store.destroy(&folder, false).is_err());
        store.destroy(&leaf, false).unwrap();
        store.destroy(&folder, false).unwrap();
        assert!(store.lookup(&p).is_none());
    }
}
