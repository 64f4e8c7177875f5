// Test file fixtures

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tailpage::StoreConfig;
use tempfile::TempDir;

/// A temporary file that tests can grow or truncate while a document reads it.
pub struct TestFixture {
    _temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestFixture {
    pub fn new(filename: &str, content: &[u8]) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join(filename);
        fs::write(&path, content)?;

        Ok(TestFixture {
            _temp_dir: temp_dir,
            path,
        })
    }

    pub fn append(&self, content: &[u8]) -> anyhow::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(content)?;
        file.flush()?;
        Ok(())
    }

    /// Rewrites the file in place, keeping the same inode.
    pub fn rewrite(&self, content: &[u8]) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(content)?;
        file.flush()?;
        Ok(())
    }
}

/// `"line 000\n"`, `"line 001\n"`, ...
pub fn numbered_lines(count: usize) -> Vec<u8> {
    (0..count)
        .flat_map(|i| format!("line {i:03}\n").into_bytes())
        .collect()
}

pub fn config(chunk_size: usize) -> StoreConfig {
    StoreConfig {
        chunk_size,
        follow_interval_ms: 10,
        ..StoreConfig::default()
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// A reader that hands out at most `step` bytes per call, like a slow pipe.
pub struct TrickleReader {
    data: Vec<u8>,
    pos: usize,
    step: usize,
}

impl TrickleReader {
    pub fn new(data: Vec<u8>, step: usize) -> Self {
        Self {
            data,
            pos: 0,
            step: step.max(1),
        }
    }
}

impl Read for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
