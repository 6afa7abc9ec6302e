use bibstore_core::service::FulltextError;
use bibstore_core::storage::BlobStore;
use bibstore_core::{
    open_db_in_memory, Actor, CoreConfig, CoreServices, FsBlobStore, FulltextCleanupObserver,
    FulltextIndex, FulltextService, Item, ItemStore, LibraryId, LibraryRepo, LibraryType,
    ObjectKey, ObjectStore, RepoError, SqliteFulltextIndex,
};
use rusqlite::Connection;
use std::sync::Arc;
use tempfile::TempDir;

const OWNER: i64 = 1;

struct Fixture {
    _blob_dir: TempDir,
    conn: Connection,
    services: CoreServices,
    library_id: LibraryId,
    blobs: Arc<FsBlobStore>,
    index: Arc<SqliteFulltextIndex>,
}

impl Fixture {
    fn fulltext(&self) -> FulltextService {
        FulltextService::new(self.blobs.clone(), self.index.clone())
    }
}

fn setup() -> Fixture {
    let blob_dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let library = LibraryRepo::new(&conn)
        .create_library(LibraryType::User, OWNER)
        .unwrap();
    Fixture {
        blobs: Arc::new(FsBlobStore::new(blob_dir.path())),
        index: Arc::new(SqliteFulltextIndex::open_in_memory().unwrap()),
        _blob_dir: blob_dir,
        conn,
        services: CoreServices::new(CoreConfig::default()),
        library_id: library.library_id,
    }
}

fn save_item(fx: &mut Fixture) -> ObjectKey {
    let item = Item::new(fx.library_id, "journalArticle");
    let mut session = fx.services.session(&mut fx.conn);
    session
        .transaction(|uow| ItemStore::save(uow, item.clone(), None))
        .unwrap();
    item.key
}

#[test]
fn stored_text_is_versioned_readable_and_searchable() {
    let mut fx = setup();
    let key = save_item(&mut fx);
    let service = fx.fulltext();
    let library_id = fx.library_id;
    let mut session = fx.services.session(&mut fx.conn);

    let version = service
        .set_item_fulltext(
            &mut session,
            Actor::new(OWNER),
            library_id,
            &key,
            "Quantum entanglement across distant photons",
            Some(400),
        )
        .unwrap();
    assert_eq!(version, 2);

    let stored = service
        .get_item_fulltext(&session, Actor::new(OWNER), library_id, &key)
        .unwrap()
        .unwrap();
    assert_eq!(stored.record.version, 2);
    assert_eq!(stored.record.indexed_chars, 43);
    assert_eq!(stored.record.total_chars, 400);
    assert_eq!(
        stored.content.as_deref(),
        Some("Quantum entanglement across distant photons")
    );

    let hits = service
        .search(&session, Actor::new(OWNER), library_id, "entangle", 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item_key, key);

    let newer = service
        .get_newer_fulltext(&session, Actor::new(OWNER), library_id, 1)
        .unwrap();
    assert_eq!(newer.get(&key), Some(&2));
    assert!(service
        .get_newer_fulltext(&session, Actor::new(OWNER), library_id, 2)
        .unwrap()
        .is_empty());
}

#[test]
fn full_text_for_missing_item_is_not_found_and_writes_nothing() {
    let mut fx = setup();
    let service = fx.fulltext();
    let library_id = fx.library_id;
    let missing = ObjectKey::generate();
    let mut session = fx.services.session(&mut fx.conn);

    let err = service
        .set_item_fulltext(&mut session, Actor::new(OWNER), library_id, &missing, "text", None)
        .unwrap_err();
    assert!(matches!(err, FulltextError::Repo(RepoError::NotFound { .. })));
    assert_eq!(err.code(), "not_found");
    assert!(fx.blobs.get(library_id, &missing).unwrap().is_none());
}

#[test]
fn readers_cannot_store_full_text() {
    let mut fx = setup();
    let key = save_item(&mut fx);
    let service = fx.fulltext();
    let library_id = fx.library_id;
    let mut session = fx.services.session(&mut fx.conn);

    let err = service
        .set_item_fulltext(&mut session, Actor::new(77), library_id, &key, "text", None)
        .unwrap_err();
    assert_eq!(err.code(), "library_access_denied");
}

#[test]
fn deleting_an_item_cleans_up_blob_and_index_entry() {
    let mut fx = setup();
    let key = save_item(&mut fx);
    let service = fx.fulltext();
    let library_id = fx.library_id;
    FulltextCleanupObserver::register(&fx.services.registry, fx.blobs.clone(), fx.index.clone());
    let mut session = fx.services.session(&mut fx.conn);

    service
        .set_item_fulltext(&mut session, Actor::new(OWNER), library_id, &key, "ephemeral notes", None)
        .unwrap();
    assert!(fx.blobs.get(library_id, &key).unwrap().is_some());

    session
        .transaction(|uow| ItemStore::delete(uow, library_id, &key, None))
        .unwrap();

    assert!(fx.blobs.get(library_id, &key).unwrap().is_none());
    assert!(fx.index.search(library_id, "ephemeral", 10).unwrap().is_empty());
    assert!(service
        .get_item_fulltext(&session, Actor::new(OWNER), library_id, &key)
        .unwrap()
        .is_none());
}
