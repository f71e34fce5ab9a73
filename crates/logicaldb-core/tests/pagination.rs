//! Paging through a range yields every item exactly once, in order.

mod common;

use proptest::prelude::*;

use common::*;
use logicaldb_core::api::{Offset, QueryOptions, Queryable};

fn collect_pages(
    db: &logicaldb_core::LogicalDb<MusicDb>,
    album: &str,
    page_size: usize,
    asc: bool,
) -> (Vec<u32>, usize) {
    let (low, high) = TrackKey::bounds(album);
    let (start, end) = if asc { (low, high) } else { (high, low) };
    let mut numbers = Vec::new();
    let mut pages = 0;
    let mut offset: Option<Offset<TrackKey>> = None;
    loop {
        let mut options = QueryOptions::new().page_size(page_size).offset(offset);
        if !asc {
            options = options.descending();
        }
        let page = db.music.tracks.query(&start, &end, options).unwrap();
        assert!(page.len() <= page_size);
        pages += 1;
        numbers.extend(page.contents.iter().map(|t| t.number));
        match page.offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }
    (numbers, pages)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_pages_cover_range_exactly_once(
        count in 0u32..40,
        page_size in 1usize..9,
        asc in any::<bool>(),
    ) {
        let (_store, db) = setup();
        seed_tracks(&db, "ALBUM_1", count);
        // Neighbouring partitions must not leak into the range.
        seed_tracks(&db, "ALBUM_0", 3);
        seed_tracks(&db, "ALBUM_2", 3);

        let (numbers, pages) = collect_pages(&db, "ALBUM_1", page_size, asc);
        let mut expected: Vec<u32> = (1..=count).collect();
        if !asc {
            expected.reverse();
        }
        prop_assert_eq!(numbers, expected);
        prop_assert_eq!(pages, (count as usize).div_ceil(page_size).max(1));
    }
}
