//! Single-item views, range queries, and scans against the in-memory store.

mod common;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use common::*;
use logicaldb_core::api::{
    Condition, InlineView, Loader, LogicalTable, LogicalTableType, QueryOptions, Queryable,
    Scannable, WriteOptions, Writer,
};
use logicaldb_core::error::{BindingError, Error, QueryError};
use logicaldb_core::types::{ConsistentReads, TableDescriptor};
use logicaldb_core::{LogicalDbFactory, MemoryStore};

const EVENTUAL: ConsistentReads = ConsistentReads::Eventual;

#[test]
fn test_save_and_load_inline_view() {
    let (_store, db) = setup();
    let album = AlbumInfo::new("ALBUM_1", "Blue Train", "jazz");
    db.music.albums.save(&album).unwrap();

    let loaded = db
        .music
        .albums
        .load(&AlbumKey::new("ALBUM_1"), EVENTUAL)
        .unwrap();
    assert_eq!(loaded, Some(album));
    assert_eq!(
        db.music
            .albums
            .load(&AlbumKey::new("ALBUM_2"), EVENTUAL)
            .unwrap(),
        None
    );
}

#[test]
fn test_save_clobbers_unmodeled_attributes() {
    let (store, db) = setup();
    let mut legacy = MusicItem {
        partition_key: "ALBUM_1".into(),
        sort_key: "INFO".into(),
        attributes: Default::default(),
    };
    legacy.attributes.insert("legacy_rating".into(), json!(4));
    db.music.table.save(&legacy).unwrap();

    db.music
        .albums
        .save(&AlbumInfo::new("ALBUM_1", "Kind of Blue", "jazz"))
        .unwrap();

    let row = db
        .music
        .table
        .load(&legacy, ConsistentReads::Consistent)
        .unwrap()
        .unwrap();
    assert!(!row.attributes.contains_key("legacy_rating"));
    assert_eq!(row.attributes["title"], "Kind of Blue");
    assert_eq!(store.item_count("music"), 1);
}

#[test]
fn test_rows_of_other_kinds_fail_to_decode() {
    let (_store, db) = setup();
    db.music.tracks.save(&AlbumTrack::new("ALBUM_1", 1)).unwrap();
    let as_album = AlbumKey {
        partition_key: "ALBUM_1".into(),
        sort_key: "TRACK_0001".into(),
    };
    let err = db.music.albums.load(&as_album, EVENTUAL).unwrap_err();
    assert!(matches!(err, Error::Encoding(_)), "got {err:?}");
}

#[test]
fn test_conditional_save_and_delete() {
    let (_store, db) = setup();
    let album = AlbumInfo::new("ALBUM_1", "Giant Steps", "jazz");
    let create_only = WriteOptions::new().with_condition(Condition::not_exists("partition_key"));
    db.music.albums.save_with(&album, create_only.clone()).unwrap();

    let err = db.music.albums.save_with(&album, create_only).unwrap_err();
    assert!(matches!(err, Error::ConditionalCheckFailed { ref table } if table == "music"));

    let wrong_genre = WriteOptions::new().with_condition(Condition::attr_eq("genre", "rock"));
    assert!(
        db.music
            .albums
            .delete_key_with(&AlbumKey::new("ALBUM_1"), wrong_genre)
            .is_err()
    );
    db.music.albums.delete_key(&AlbumKey::new("ALBUM_1")).unwrap();
    assert!(
        db.music
            .albums
            .load(&AlbumKey::new("ALBUM_1"), EVENTUAL)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_versioned_saves() {
    let (_store, db) = setup();
    let users = &db.users.table;
    let fresh = User::new("u1", "Ada");
    users.save(&fresh).unwrap();

    let stored = users.load(&fresh, EVENTUAL).unwrap().unwrap();
    assert_eq!(stored.version, Some(1));

    // A second create with no version conflicts with the stored one.
    assert!(matches!(
        users.save(&fresh),
        Err(Error::ConditionalCheckFailed { .. })
    ));

    let mut renamed = stored.clone();
    renamed.name = "Ada L.".into();
    users.save(&renamed).unwrap();
    let current = users.load(&fresh, EVENTUAL).unwrap().unwrap();
    assert_eq!(current.version, Some(2));

    // The copy read at version 1 is now stale.
    assert!(users.save(&stored).is_err());
    assert!(users.delete(&stored).is_err());

    users
        .save_with(&stored, WriteOptions::new().ignoring_versions())
        .unwrap();
    let forced = users.load(&fresh, EVENTUAL).unwrap().unwrap();
    assert_eq!(forced.name, "Ada");
    assert_eq!(forced.version, Some(1));

    users.delete(&forced).unwrap();
    assert!(users.load(&fresh, EVENTUAL).unwrap().is_none());
}

#[test]
fn test_inline_view_inherits_item_versioning() {
    let (_store, db) = setup();
    let by_id = &db.users.by_id;
    assert_eq!(by_id.binding().version_attribute(), Some("version"));

    by_id.save(&User::new("u1", "Grace")).unwrap();
    let stored = by_id.load(&UserKey::new("u1"), EVENTUAL).unwrap().unwrap();
    assert_eq!(stored.version, Some(1));

    // Saving an unversioned copy over the stored user is a conflict.
    assert!(matches!(
        by_id.save(&User::new("u1", "Grace H.")),
        Err(Error::ConditionalCheckFailed { .. })
    ));

    let mut renamed = stored;
    renamed.name = "Grace H.".into();
    by_id.save(&renamed).unwrap();
    let current = by_id.load(&UserKey::new("u1"), EVENTUAL).unwrap().unwrap();
    assert_eq!(current.name, "Grace H.");
    assert_eq!(current.version, Some(2));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AlbumDraft {
    partition_key: String,
    sort_key: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<u64>,
}

#[derive(Clone)]
struct Drafts {
    albums: InlineView<AlbumKey, AlbumInfo>,
    drafts: InlineView<AlbumKey, AlbumDraft>,
}

impl LogicalTableType for Drafts {
    type Item = MusicItem;

    fn descriptor() -> TableDescriptor {
        Music::descriptor()
    }

    fn bind(table: LogicalTable<MusicItem>) -> Result<Self, BindingError> {
        Ok(Self {
            albums: table.inline_view(),
            drafts: table.versioned_inline_view("revision"),
        })
    }
}

#[test]
fn test_versioned_inline_view_on_unversioned_table() {
    let store = MemoryStore::with_tables([Music::descriptor()]).unwrap();
    let factory = LogicalDbFactory::with_defaults(Arc::new(store));
    let tables = factory.logical_table::<Drafts>().unwrap();
    assert_eq!(tables.albums.binding().version_attribute(), None);

    let draft = AlbumDraft {
        partition_key: "ALBUM_1".into(),
        sort_key: "INFO".into(),
        title: "Working title".into(),
        revision: None,
    };
    tables.drafts.save(&draft).unwrap();
    let stored = tables
        .drafts
        .load(&AlbumKey::new("ALBUM_1"), EVENTUAL)
        .unwrap()
        .unwrap();
    assert_eq!(stored.revision, Some(1));
    assert!(tables.drafts.save(&draft).is_err());

    // The unversioned view of the same row still clobbers.
    let info = AlbumInfo::new("ALBUM_1", "Blue", "folk");
    tables.albums.save(&info).unwrap();
    tables.albums.save(&info).unwrap();
}

#[test]
fn test_query_ascending_and_descending() {
    let (_store, db) = setup();
    seed_tracks(&db, "ALBUM_1", 5);
    seed_tracks(&db, "ALBUM_2", 3);
    db.music
        .albums
        .save(&AlbumInfo::new("ALBUM_1", "Blue", "folk"))
        .unwrap();

    let (low, high) = TrackKey::bounds("ALBUM_1");
    let page = db.music.tracks.query(&low, &high, QueryOptions::new()).unwrap();
    let numbers: Vec<u32> = page.contents.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [1, 2, 3, 4, 5]);
    assert!(!page.has_more);

    let page = db
        .music
        .tracks
        .query(&high, &low, QueryOptions::new().descending())
        .unwrap();
    let numbers: Vec<u32> = page.contents.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [5, 4, 3, 2, 1]);
}

#[test]
fn test_query_end_is_exclusive() {
    let (_store, db) = setup();
    seed_tracks(&db, "ALBUM_1", 5);
    let page = db
        .music
        .tracks
        .query(
            &TrackKey::new("ALBUM_1", 2),
            &TrackKey::new("ALBUM_1", 4),
            QueryOptions::new(),
        )
        .unwrap();
    let numbers: Vec<u32> = page.contents.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [2, 3]);

    let page = db
        .music
        .tracks
        .query(
            &TrackKey::new("ALBUM_1", 4),
            &TrackKey::new("ALBUM_1", 2),
            QueryOptions::new().descending(),
        )
        .unwrap();
    let numbers: Vec<u32> = page.contents.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [4, 3]);
}

#[test]
fn test_query_pages_resume_from_offset() {
    let (_store, db) = setup();
    seed_tracks(&db, "ALBUM_1", 7);
    let (low, high) = TrackKey::bounds("ALBUM_1");

    let first = db
        .music
        .tracks
        .query(&low, &high, QueryOptions::new().page_size(3))
        .unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.has_more);
    let offset = first.offset.clone().unwrap();
    assert_eq!(offset.key().unwrap(), TrackKey::new("ALBUM_1", 3));

    let second = db
        .music
        .tracks
        .query(
            &low,
            &high,
            QueryOptions::new().page_size(3).offset(Some(offset)),
        )
        .unwrap();
    let numbers: Vec<u32> = second.contents.iter().map(|t| t.number).collect();
    assert_eq!(numbers, [4, 5, 6]);
}

#[test]
fn test_query_rejects_mismatched_partitions() {
    let (_store, db) = setup();
    let err = db
        .music
        .tracks
        .query(
            &TrackKey::new("ALBUM_1", 1),
            &TrackKey::new("ALBUM_2", 1),
            QueryOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::PartitionMismatch)));
}

#[test]
fn test_query_without_sort_key_rejected() {
    let (_store, db) = setup();
    let err = db
        .users
        .by_id
        .query(&UserKey::new("a"), &UserKey::new("z"), QueryOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::SortKeyNotSupported)));
}

#[test]
fn test_secondary_index_query() {
    let (_store, db) = setup();
    for (album, title, genre) in [
        ("ALBUM_1", "Blue Train", "jazz"),
        ("ALBUM_2", "Abbey Road", "rock"),
        ("ALBUM_3", "A Love Supreme", "jazz"),
        ("ALBUM_4", "Mingus Ah Um", "jazz"),
    ] {
        db.music
            .albums
            .save(&AlbumInfo::new(album, title, genre))
            .unwrap();
    }
    // Tracks carry no genre and stay out of the index.
    seed_tracks(&db, "ALBUM_1", 3);

    let page = db
        .music
        .by_genre
        .query(
            &GenreKey::new("jazz", ""),
            &GenreKey::new("jazz", "~"),
            QueryOptions::new(),
        )
        .unwrap();
    let titles: Vec<&str> = page.contents.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, ["A Love Supreme", "Blue Train", "Mingus Ah Um"]);
}

#[test]
fn test_consistent_read_on_global_index_rejected() {
    let (store, db) = setup();
    let err = db
        .music
        .by_genre
        .query(
            &GenreKey::new("jazz", ""),
            &GenreKey::new("jazz", "~"),
            QueryOptions::new().consistent_read(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query(QueryError::ConsistentReadOnGlobalIndex(ref name)) if name == "genre_index"
    ));
    assert_eq!(store.calls().total(), 0);
}

#[test]
fn test_scan_count_and_parallel_scan() {
    let (_store, db) = setup();
    seed_tracks(&db, "ALBUM_1", 12);
    seed_tracks(&db, "ALBUM_2", 9);
    db.music
        .albums
        .save(&AlbumInfo::new("ALBUM_3", "Blue", "folk"))
        .unwrap();

    let all = db.music.table.scan().unwrap();
    assert_eq!(all.len(), 22);
    assert!(!all.has_more);
    assert_eq!(db.music.table.count().unwrap(), 22);
    assert_eq!(db.music.by_genre.count().unwrap(), 1);

    let pages = db.music.table.parallel_scan(4).unwrap();
    assert_eq!(pages.len(), 4);
    let mut keys: Vec<(String, String)> = pages
        .into_iter()
        .flatten()
        .map(|row| (row.partition_key, row.sort_key))
        .collect();
    keys.sort();
    let mut expected: Vec<(String, String)> = all
        .contents
        .into_iter()
        .map(|row| (row.partition_key, row.sort_key))
        .collect();
    expected.sort();
    assert_eq!(keys, expected);
}

#[test]
fn test_scan_page_walks_table() {
    let (_store, db) = setup();
    seed_tracks(&db, "ALBUM_1", 5);
    let mut seen = 0;
    let mut offset = None;
    loop {
        let page = db.music.table.scan_page(2, offset).unwrap();
        assert!(page.len() <= 2);
        seen += page.len();
        match page.offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, 5);
    assert!(matches!(
        db.music.table.scan_page(0, None),
        Err(Error::Query(QueryError::InvalidPageSize))
    ));
    assert!(matches!(
        db.music.table.parallel_scan(0),
        Err(Error::Query(QueryError::InvalidSegmentCount))
    ));
}

#[derive(Clone, Debug)]
struct BadIndex;

impl LogicalTableType for BadIndex {
    type Item = MusicItem;

    fn descriptor() -> TableDescriptor {
        Music::descriptor()
    }

    fn bind(table: LogicalTable<MusicItem>) -> Result<Self, BindingError> {
        table.secondary_index::<GenreKey, AlbumInfo>("missing_index")?;
        Ok(Self)
    }
}

#[test]
fn test_undeclared_index_fails_binding() {
    let factory = LogicalDbFactory::with_defaults(Arc::new(MemoryStore::new()));
    let err = factory.logical_table::<BadIndex>().unwrap_err();
    assert_eq!(
        err,
        BindingError::IndexNotFound {
            table: "music".into(),
            index: "missing_index".into(),
        }
    );
}
