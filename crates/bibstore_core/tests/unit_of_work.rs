use bibstore_core::cache::library_version_cache_key;
use bibstore_core::repo::version_clock::current_version;
use bibstore_core::{
    open_db_in_memory, CoreConfig, CoreServices, DataContext, Item, ItemStore, LibraryId,
    LibraryKey, LibraryRepo, LibraryType, NotificationEvent, NotifyType, ObjectStore, Observer,
    RepoError, RepoResult, Tag, TagStore,
};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Call = (NotificationEvent, NotifyType, BTreeSet<LibraryKey>);

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl Observer for Recorder {
    fn notify(&self, event: NotificationEvent, notify_type: NotifyType, keys: &BTreeSet<LibraryKey>) {
        self.calls
            .lock()
            .unwrap()
            .push((event, notify_type, keys.clone()));
    }
}

fn setup() -> (Connection, CoreServices, LibraryId, Arc<Recorder>) {
    let conn = open_db_in_memory().unwrap();
    let library = LibraryRepo::new(&conn)
        .create_library(LibraryType::User, 1)
        .unwrap();
    let services = CoreServices::new(CoreConfig::default());
    let recorder = Arc::new(Recorder::default());
    services
        .registry
        .register_observer(recorder.clone(), NotifyType::Item);
    services
        .registry
        .register_observer(recorder.clone(), NotifyType::Tag);
    (conn, services, library.library_id, recorder)
}

#[test]
fn commit_flushes_one_batched_notification_per_event_and_type() {
    let (mut conn, services, library_id, recorder) = setup();
    let mut session = services.session(&mut conn);

    let first = Item::new(library_id, "book");
    let second = Item::new(library_id, "book");
    session
        .transaction(|uow| {
            ItemStore::save(uow, first.clone(), None)?;
            ItemStore::save(uow, second.clone(), None)?;
            TagStore::save(uow, Tag::new(library_id, "batch", 0), None)?;
            assert!(recorder.calls().is_empty());
            Ok(())
        })
        .unwrap();

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, NotificationEvent::Add);
    assert_eq!(calls[0].1, NotifyType::Item);
    assert_eq!(
        calls[0].2,
        BTreeSet::from([
            LibraryKey::new(library_id, first.key.clone()),
            LibraryKey::new(library_id, second.key.clone()),
        ])
    );
    assert_eq!(calls[1].1, NotifyType::Tag);
}

#[test]
fn error_in_unit_of_work_rolls_back_store_cache_and_notifications() {
    let (mut conn, services, library_id, recorder) = setup();
    let mut session = services.session(&mut conn);

    let item = Item::new(library_id, "book");
    let err = session
        .transaction(|uow| {
            ItemStore::save(uow, item.clone(), None)?;
            Err::<(), _>(RepoError::InvalidData("abort".to_string()))
        })
        .unwrap_err();
    assert_eq!(err.code(), "invalid_data");

    assert!(recorder.calls().is_empty());
    assert!(!session.cache().is_active());
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 0);
    assert!(services
        .cache
        .get(&library_version_cache_key(library_id))
        .is_none());
    assert!(ItemStore::get(&mut session, library_id, &item.key)
        .unwrap()
        .is_none());
}

#[test]
fn dropping_and_rolling_back_discard_everything() {
    let (mut conn, services, library_id, recorder) = setup();
    let mut session = services.session(&mut conn);

    let dropped = Item::new(library_id, "book");
    {
        let mut uow = session.begin().unwrap();
        ItemStore::save(&mut uow, dropped.clone(), None).unwrap();
    }

    let rolled_back = Item::new(library_id, "book");
    let mut uow = session.begin().unwrap();
    ItemStore::save(&mut uow, rolled_back.clone(), None).unwrap();
    uow.rollback().unwrap();

    assert!(recorder.calls().is_empty());
    assert!(!session.notifier_mut().is_batching());
    for key in [&dropped.key, &rolled_back.key] {
        assert!(ItemStore::get(&mut session, library_id, key).unwrap().is_none());
    }

    // The session stays usable after both.
    session
        .transaction(|uow| ItemStore::save(uow, dropped.clone(), None))
        .unwrap();
    assert_eq!(recorder.calls().len(), 1);
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 1);
}

#[test]
fn panic_inside_unit_of_work_rolls_back() {
    let (mut conn, services, library_id, recorder) = setup();
    let mut session = services.session(&mut conn);

    let item = Item::new(library_id, "book");
    let result = catch_unwind(AssertUnwindSafe(|| {
        session.transaction(|uow| -> RepoResult<()> {
            ItemStore::save(uow, item.clone(), None)?;
            panic!("request aborted")
        })
    }));
    assert!(result.is_err());

    assert!(recorder.calls().is_empty());
    assert!(!session.cache().is_active());
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 0);
}

#[test]
fn library_is_bumped_once_per_unit_of_work() {
    let (mut conn, services, library_id, _recorder) = setup();
    let mut session = services.session(&mut conn);

    let versions = session
        .transaction(|uow| {
            let a = ItemStore::save(uow, Item::new(library_id, "book"), None)?;
            let b = ItemStore::save(uow, Item::new(library_id, "report"), None)?;
            let c = TagStore::save(uow, Tag::new(library_id, "once", 0), None)?;
            assert_eq!(uow.touched_libraries().get(&library_id), Some(&1));
            Ok([a.version, b.version, c.version])
        })
        .unwrap();
    assert_eq!(versions, [1, 1, 1]);
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 1);
}
