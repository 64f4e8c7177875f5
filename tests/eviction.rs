// Chunk residency limits for files and streams

mod common;

use common::fixtures::{config, numbered_lines, wait_until, TestFixture};
use std::io::Cursor;
use tailpage::{Document, StoreConfig, StoreError};

fn mixed_endings(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let ending = if i % 3 == 0 { "\r\n" } else { "\n" };
            format!("entry {i} {}{ending}", "x".repeat(i % 7)).into_bytes()
        })
        .collect()
}

#[test]
fn test_file_chunks_reload_byte_identical() {
    common::tracing::init_tracing_from_env();
    let lines = mixed_endings(50);
    let mut content: Vec<u8> = lines.concat();
    // Last line without a terminator.
    content.extend_from_slice(b"tail");
    let fixture = TestFixture::new("mixed.txt", &content).unwrap();

    let doc = Document::open_file(
        &fixture.path,
        StoreConfig {
            file_load_chunks_limit: 2,
            ..config(5)
        },
    )
    .unwrap();
    wait_until("eof", || doc.is_eof());
    assert_eq!(doc.end_num(), 51);
    assert!(doc.loaded_chunks().len() <= 2);

    for (n, expected) in lines.iter().enumerate() {
        assert_eq!(doc.get_line(n).unwrap().as_ref(), Some(expected), "line {n}");
        assert!(doc.loaded_chunks().len() <= 2);
    }
    assert_eq!(doc.get_line(50).unwrap(), Some(b"tail".to_vec()));

    // Walk backwards so every chunk is evicted and faulted in again.
    for n in (0..50).rev() {
        assert_eq!(doc.get_line(n).unwrap().as_ref(), Some(&lines[n]), "line {n}");
    }
}

#[test]
fn test_file_load_of_resident_chunk_is_already_loaded() {
    let fixture = TestFixture::new("resident.txt", &numbered_lines(40)).unwrap();
    let doc = Document::open_file(
        &fixture.path,
        StoreConfig {
            file_load_chunks_limit: 3,
            ..config(4)
        },
    )
    .unwrap();
    wait_until("eof", || doc.is_eof());

    doc.request_load(7).unwrap();
    match doc.request_load(7) {
        Err(e @ StoreError::AlreadyLoaded(7)) => assert!(e.is_benign()),
        other => panic!("expected AlreadyLoaded(7), got {other:?}"),
    }
    assert!(doc.request_load(0).is_ok(), "head chunk is always available");
    assert!(doc.request_load(500).is_ok(), "loads past EOF are no-ops");

    for k in [1, 2, 3, 4] {
        let _ = doc.request_load(k);
    }
    assert!(!doc.loaded_chunks().contains(&7));
    assert!(doc.request_load(7).is_ok(), "evicted chunk can be loaded again");
}

#[test]
fn test_stream_back_pressure() {
    let doc = Document::from_reader(
        Cursor::new(numbered_lines(30)),
        StoreConfig {
            load_chunks_limit: 3,
            ..config(2)
        },
    )
    .unwrap();

    // Chunk 0 plus three ledger chunks, then the read-ahead chain stops.
    wait_until("read-ahead to stall", || doc.end_num() == 8);
    assert!(!doc.is_eof());
    assert!(doc.has_more());
    assert!(matches!(doc.request_load(10), Err(StoreError::OverChunkLimit)));
    assert_eq!(doc.end_num(), 8);

    // Touching the newest chunk at capacity evicts the oldest and resumes reading.
    doc.request_load(3).unwrap();
    assert_eq!(doc.start_num(), 4);
    wait_until("read-ahead to resume", || doc.end_num() == 10);
    assert_eq!(doc.line(2), None);
    assert_eq!(doc.get_line(2).unwrap(), None, "evicted stream lines are gone");
    assert_eq!(doc.line(9), Some(b"line 009\n".to_vec()));
}

#[test]
fn test_stream_evicted_chunk_load_is_noop() {
    let doc = Document::from_reader(
        Cursor::new(numbered_lines(30)),
        StoreConfig {
            load_chunks_limit: 2,
            ..config(2)
        },
    )
    .unwrap();
    wait_until("read-ahead to stall", || doc.end_num() == 6);

    doc.request_load(2).unwrap();
    wait_until("next chunk", || doc.end_num() == 8);
    assert!(!doc.loaded_chunks().contains(&1));
    assert!(doc.request_load(1).is_ok());
    assert_eq!(doc.start_num(), 4);
}

#[test]
fn test_stream_unbounded_reads_everything() {
    let doc = Document::from_reader(
        Cursor::new(numbered_lines(300)),
        StoreConfig {
            load_chunks_limit: -1,
            ..config(7)
        },
    )
    .unwrap();
    wait_until("eof", || doc.is_eof());
    assert_eq!(doc.end_num(), 300);
    assert_eq!(doc.start_num(), 0);
    assert_eq!(doc.line_str(299).as_deref(), Some("line 299"));
}
