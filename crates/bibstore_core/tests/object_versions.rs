use bibstore_core::cache::{library_version_cache_key, object_cache_key};
use bibstore_core::model::item::ItemTag;
use bibstore_core::model::object::ObjectType;
use bibstore_core::repo::object_repo::{get_deleted_in_library, get_newer_in_library};
use bibstore_core::repo::version_clock::current_version;
use bibstore_core::{
    open_db_in_memory, Collection, CollectionStore, CoreConfig, CoreServices, DataContext, Item,
    ItemStore, LibraryId, LibraryRepo, LibraryType, ObjectKey, ObjectStore, RepoError,
    SavedSearch, SearchCondition, SearchStore, Tag, TagStore,
};
use rusqlite::Connection;

fn setup() -> (Connection, CoreServices, LibraryId) {
    let conn = open_db_in_memory().unwrap();
    let library = LibraryRepo::new(&conn)
        .create_library(LibraryType::User, 1)
        .unwrap();
    (conn, CoreServices::new(CoreConfig::default()), library.library_id)
}

fn book(library_id: LibraryId, title: &str) -> Item {
    Item::new(library_id, "book").with_field("title", title)
}

#[test]
fn first_save_stamps_next_library_version() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let outcome = session
        .transaction(|uow| ItemStore::save(uow, book(library_id, "Dune"), Some(0)))
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.version, 1);
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 1);

    let loaded = ItemStore::get(&mut session, library_id, &outcome.key)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.title(), Some("Dune"));
}

#[test]
fn stale_expected_version_conflicts_and_keeps_stored_object() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let item = book(library_id, "Draft");
    let key = item.key.clone();
    session
        .transaction(|uow| ItemStore::save(uow, item.clone(), Some(0)))
        .unwrap();
    let second = session
        .transaction(|uow| ItemStore::save(uow, item.clone().with_field("title", "Second"), Some(1)))
        .unwrap();
    assert_eq!(second.version, 2);

    let err = session
        .transaction(|uow| ItemStore::save(uow, item.clone().with_field("title", "Stale"), Some(1)))
        .unwrap_err();
    assert_eq!(err.status(), 412);
    match err {
        RepoError::VersionConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = ItemStore::get(&mut session, library_id, &key).unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.title(), Some("Second"));
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 2);
}

#[test]
fn saving_identical_content_is_a_no_op() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let mut item = book(library_id, "Same");
    item.tags.insert(ItemTag::manual("physics"));
    let first = session
        .transaction(|uow| ItemStore::save(uow, item.clone(), None))
        .unwrap();

    let fetched = ItemStore::get(&mut session, library_id, &first.key)
        .unwrap()
        .unwrap();
    let again = session
        .transaction(|uow| ItemStore::save(uow, fetched.clone(), Some(fetched.version)))
        .unwrap();
    assert!(!again.changed);
    assert_eq!(again.version, first.version);
    assert_eq!(current_version(session.conn(), library_id).unwrap(), first.version);
}

#[test]
fn expected_version_edge_cases() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let missing = book(library_id, "Nowhere");
    let err = session
        .transaction(|uow| ItemStore::save(uow, missing.clone(), Some(5)))
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));

    session
        .transaction(|uow| ItemStore::save(uow, missing.clone(), Some(0)))
        .unwrap();
    let err = session
        .transaction(|uow| ItemStore::save(uow, missing.clone().with_field("title", "Dup"), Some(0)))
        .unwrap_err();
    assert!(matches!(err, RepoError::VersionConflict { .. }));
}

#[test]
fn save_into_unknown_library_fails() {
    let (mut conn, services, _) = setup();
    let mut session = services.session(&mut conn);

    let err = session
        .transaction(|uow| ItemStore::save(uow, book(999, "Lost"), None))
        .unwrap_err();
    assert!(matches!(err, RepoError::LibraryNotFound(999)));
}

#[test]
fn delete_records_tombstone_visible_to_newer_queries() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let kept = session
        .transaction(|uow| ItemStore::save(uow, book(library_id, "Kept"), None))
        .unwrap();
    let doomed = session
        .transaction(|uow| ItemStore::save(uow, book(library_id, "Doomed"), None))
        .unwrap();

    let err = session
        .transaction(|uow| ItemStore::delete(uow, library_id, &doomed.key, Some(1)))
        .unwrap_err();
    assert!(matches!(err, RepoError::VersionConflict { .. }));

    let tombstone = session
        .transaction(|uow| ItemStore::delete(uow, library_id, &doomed.key, Some(doomed.version)))
        .unwrap();
    assert_eq!(tombstone, 3);
    assert!(ItemStore::get(&mut session, library_id, &doomed.key)
        .unwrap()
        .is_none());

    let newer = get_newer_in_library(session.conn(), ObjectType::Item, library_id, 0).unwrap();
    assert_eq!(newer.get(&kept.key), Some(&1));
    assert_eq!(newer.get(&doomed.key), Some(&3));

    let deleted = get_deleted_in_library(session.conn(), ObjectType::Item, library_id, 0).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted.get(&doomed.key), Some(&3));
    assert!(get_newer_in_library(session.conn(), ObjectType::Item, library_id, 3)
        .unwrap()
        .is_empty());

    let again = session
        .transaction(|uow| ItemStore::delete(uow, library_id, &doomed.key, None))
        .unwrap();
    assert_eq!(again, 3);
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 3);

    let never = ObjectKey::generate();
    let err = session
        .transaction(|uow| ItemStore::delete(uow, library_id, &never, None))
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));
}

#[test]
fn recreating_a_deleted_key_clears_its_tombstone() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let tag = Tag::new(library_id, "draft", 0);
    let key = tag.key.clone();
    session
        .transaction(|uow| TagStore::save(uow, tag.clone(), Some(0)))
        .unwrap();
    session
        .transaction(|uow| TagStore::delete(uow, library_id, &key, None))
        .unwrap();
    assert_eq!(
        TagStore::get_deleted_in_library(session.conn(), library_id, 0)
            .unwrap()
            .len(),
        1
    );

    let outcome = session
        .transaction(|uow| TagStore::save(uow, tag.clone(), Some(0)))
        .unwrap();
    assert_eq!(outcome.version, 3);
    assert!(TagStore::get_deleted_in_library(session.conn(), library_id, 0)
        .unwrap()
        .is_empty());
}

#[test]
fn versions_strictly_increase_across_units_of_work() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let mut previous = 0;
    for index in 0..5 {
        let outcome = session
            .transaction(|uow| {
                let first = ItemStore::save(uow, book(library_id, &format!("A{index}")), None)?;
                let second = ItemStore::save(uow, book(library_id, &format!("B{index}")), None)?;
                assert_eq!(first.version, second.version);
                Ok(second)
            })
            .unwrap();
        assert_eq!(outcome.version, previous + 1);
        previous = outcome.version;
    }
    assert_eq!(current_version(session.conn(), library_id).unwrap(), 5);
}

#[test]
fn commit_invalidates_library_version_and_reads_fill_object_cache() {
    let (mut conn, services, library_id) = setup();
    let version_key = library_version_cache_key(library_id);
    services.cache.set(&version_key, "0".to_string(), None);
    let mut session = services.session(&mut conn);

    let outcome = session
        .transaction(|uow| ItemStore::save(uow, book(library_id, "Cached"), None))
        .unwrap();
    assert!(services.cache.get(&version_key).is_none());

    let cache_key = object_cache_key("item", library_id, outcome.key.as_str());
    assert!(services.cache.get(&cache_key).is_none());
    ItemStore::get(&mut session, library_id, &outcome.key)
        .unwrap()
        .unwrap();
    assert!(services.cache.get(&cache_key).is_some());

    let changed = Item::with_key(library_id, outcome.key.clone(), "book").with_field("title", "Changed");
    session
        .transaction(|uow| ItemStore::save(uow, changed.clone(), None))
        .unwrap();
    assert!(services.cache.get(&cache_key).is_none());
}

#[test]
fn deleting_a_parent_item_deletes_its_children() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let parent = book(library_id, "Parent");
    let mut note = Item::new(library_id, "note");
    note.parent_item = Some(parent.key.clone());
    note.note = Some("<p>child</p>".to_string());

    session
        .transaction(|uow| {
            ItemStore::save(uow, parent.clone(), None)?;
            ItemStore::save(uow, note.clone(), None)
        })
        .unwrap();

    let version = session
        .transaction(|uow| ItemStore::delete(uow, library_id, &parent.key, None))
        .unwrap();
    assert!(ItemStore::get(&mut session, library_id, &note.key)
        .unwrap()
        .is_none());
    let deleted = ItemStore::get_deleted_in_library(session.conn(), library_id, 0).unwrap();
    assert_eq!(deleted.get(&parent.key), Some(&version));
    assert_eq!(deleted.get(&note.key), Some(&version));
}

#[test]
fn child_items_require_a_regular_parent() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let mut orphan = Item::new(library_id, "note");
    orphan.parent_item = Some(ObjectKey::generate());
    let err = session
        .transaction(|uow| ItemStore::save(uow, orphan.clone(), None))
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[test]
fn item_tags_are_resolved_and_renames_reversion_items() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let mut item = book(library_id, "Tagged");
    item.tags.insert(ItemTag::manual(" physics "));
    session
        .transaction(|uow| ItemStore::save(uow, item.clone(), None))
        .unwrap();

    let mut tag = TagStore::find_by_name(session.conn(), library_id, "physics", 0)
        .unwrap()
        .expect("tag created with item");
    assert_eq!(tag.version, 1);

    tag.name = "astrophysics".to_string();
    let renamed = session
        .transaction(|uow| TagStore::save(uow, tag.clone(), Some(1)))
        .unwrap();
    let reloaded = ItemStore::get(&mut session, library_id, &item.key)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.version, renamed.version);
    assert!(reloaded.tags.contains(&ItemTag::manual("astrophysics")));

    let deleted_at = session
        .transaction(|uow| TagStore::delete(uow, library_id, &tag.key, None))
        .unwrap();
    let reloaded = ItemStore::get(&mut session, library_id, &item.key)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.version, deleted_at);
    assert!(reloaded.tags.is_empty());
}

#[test]
fn duplicate_tag_names_are_rejected() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    session
        .transaction(|uow| TagStore::save(uow, Tag::new(library_id, "dup", 0), None))
        .unwrap();
    let err = session
        .transaction(|uow| TagStore::save(uow, Tag::new(library_id, "dup", 0), None))
        .unwrap_err();
    assert_eq!(err.status(), 400);
    session
        .transaction(|uow| TagStore::save(uow, Tag::new(library_id, "dup", 1), None))
        .unwrap();
}

#[test]
fn collection_delete_cascades_and_reversions_members() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let parent = Collection::new(library_id, "Reading");
    let mut child = Collection::new(library_id, "Later");
    child.parent_collection = Some(parent.key.clone());
    let mut item = book(library_id, "Member");
    item.collections.insert(child.key.clone());

    session
        .transaction(|uow| {
            CollectionStore::save(uow, parent.clone(), None)?;
            CollectionStore::save(uow, child.clone(), None)?;
            ItemStore::save(uow, item.clone(), None)
        })
        .unwrap();

    let version = session
        .transaction(|uow| CollectionStore::delete(uow, library_id, &parent.key, None))
        .unwrap();
    assert!(CollectionStore::get(&mut session, library_id, &child.key)
        .unwrap()
        .is_none());

    let member = ItemStore::get(&mut session, library_id, &item.key)
        .unwrap()
        .unwrap();
    assert_eq!(member.version, version);
    assert!(member.collections.is_empty());
}

#[test]
fn collection_cycles_are_rejected() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let outer = Collection::new(library_id, "Outer");
    let mut inner = Collection::new(library_id, "Inner");
    inner.parent_collection = Some(outer.key.clone());
    session
        .transaction(|uow| {
            CollectionStore::save(uow, outer.clone(), None)?;
            CollectionStore::save(uow, inner.clone(), None)
        })
        .unwrap();

    let mut looped = outer.clone();
    looped.parent_collection = Some(inner.key.clone());
    let err = session
        .transaction(|uow| CollectionStore::save(uow, looped, None))
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[test]
fn saved_searches_round_trip_conditions() {
    let (mut conn, services, library_id) = setup();
    let mut session = services.session(&mut conn);

    let search = SavedSearch::new(
        library_id,
        "Recent physics",
        vec![SearchCondition::new("tag", "is", "physics")],
    );
    session
        .transaction(|uow| SearchStore::save(uow, search.clone(), None))
        .unwrap();

    let loaded = SearchStore::get(&mut session, library_id, &search.key)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.conditions, search.conditions);
    assert_eq!(loaded.version, 1);
}
