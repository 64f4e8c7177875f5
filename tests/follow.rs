// Following growing files and reloading changed ones

mod common;

use common::fixtures::{config, numbered_lines, wait_until, TestFixture};
use tailpage::{Document, StoreConfig};

#[test]
fn test_follow_joins_unterminated_line() {
    common::tracing::init_tracing_from_env();
    let fixture = TestFixture::new("grow.txt", b"a\nb").unwrap();
    let doc = Document::open_file(&fixture.path, config(4)).unwrap();
    wait_until("eof", || doc.is_eof());
    assert_eq!(doc.end_num(), 2);

    fixture.append(b"c\nd\n").unwrap();
    doc.request_follow().unwrap();
    // Requests run in order, so the load sees the followed lines.
    doc.request_load(0).unwrap();

    assert_eq!(doc.end_num(), 3);
    assert_eq!(doc.line(1), Some(b"bc\n".to_vec()));
    assert_eq!(doc.line(2), Some(b"d\n".to_vec()));
    assert!(doc.is_eof());
}

#[test]
fn test_follow_mode_picks_up_appends() {
    let fixture = TestFixture::new("tail.log", &numbered_lines(3)).unwrap();
    let mut doc = Document::open_file(&fixture.path, config(2)).unwrap();
    wait_until("eof", || doc.is_eof());

    doc.set_follow_mode(true);
    assert!(doc.is_following());
    fixture.append(b"line 003\n").unwrap();
    wait_until("appended line", || doc.end_num() == 4);
    assert_eq!(doc.line_str(3).as_deref(), Some("line 003"));

    doc.set_follow_mode(false);
    assert!(!doc.is_following());
}

#[test]
fn test_follow_after_truncation_rereads() {
    let fixture = TestFixture::new("rotate.log", &numbered_lines(20)).unwrap();
    let doc = Document::open_file(&fixture.path, config(4)).unwrap();
    wait_until("eof", || doc.is_eof());
    assert_eq!(doc.end_num(), 20);

    fixture.rewrite(b"rotated 0\nrotated 1\n").unwrap();
    doc.request_follow().unwrap();
    wait_until("reread after truncation", || {
        doc.is_eof() && doc.line_str(0).as_deref() == Some("rotated 0")
    });
    assert_eq!(doc.end_num(), 2);
}

#[test]
fn test_watch_reload_keeps_chunks() {
    let fixture = TestFixture::new("watch.log", &numbered_lines(10)).unwrap();
    let doc = Document::open_file(
        &fixture.path,
        StoreConfig {
            watch: true,
            ..config(4)
        },
    )
    .unwrap();
    wait_until("eof", || doc.is_eof());

    // Same length prefix with different bytes, then three new lines.
    let mut content = numbered_lines(10).to_ascii_uppercase();
    content.extend_from_slice(b"new 10\nnew 11\nnew 12\n");
    fixture.rewrite(&content).unwrap();

    doc.request_reload().unwrap();
    wait_until("appended lines", || doc.is_eof() && doc.end_num() == 13);
    assert_eq!(doc.line_str(0).as_deref(), Some("line 000"));
    assert_eq!(doc.line_str(12).as_deref(), Some("new 12"));
}

#[test]
fn test_reload_without_watch_rereads() {
    let fixture = TestFixture::new("plain.log", &numbered_lines(10)).unwrap();
    let doc = Document::open_file(&fixture.path, config(4)).unwrap();
    wait_until("eof", || doc.is_eof());

    fixture.rewrite(&numbered_lines(10).to_ascii_uppercase()).unwrap();
    doc.request_reload().unwrap();
    wait_until("reread", || doc.is_eof() && doc.end_num() == 10);
    assert_eq!(doc.line_str(0).as_deref(), Some("LINE 000"));
}

#[test]
fn test_follow_on_stream_respects_limit() {
    let doc = Document::from_reader(
        std::io::Cursor::new(numbered_lines(40)),
        StoreConfig {
            load_chunks_limit: 2,
            ..config(3)
        },
    )
    .unwrap();
    wait_until("read-ahead to stall", || doc.end_num() == 9);

    doc.request_follow().unwrap();
    doc.request_load(0).unwrap();
    assert_eq!(doc.end_num(), 9);
    assert!(!doc.is_eof());
}
