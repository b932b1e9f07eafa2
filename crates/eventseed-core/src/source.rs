use crate::error::{SeedError, SeedResult};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// The recorded event log, read one line at a time.
pub struct SourceLog {
    path: PathBuf,
    reader: BufReader<File>,
}

impl SourceLog {
    pub fn open(path: impl AsRef<Path>) -> SeedResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|exc| SeedError::source_unavailable(&path, exc))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts every line, including blank ones and an unterminated last line, then
    /// rewinds to the start.
    pub fn count_lines(&mut self) -> SeedResult<u64> {
        self.rewind()?;

        let mut total = 0_u64;
        let mut buf = Vec::<u8>::new();
        loop {
            buf.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(|exc| SeedError::source_unavailable(&self.path, exc))?;
            if bytes_read == 0 {
                break;
            }
            total += 1;
        }

        self.rewind()?;
        Ok(total)
    }

    pub fn rewind(&mut self) -> SeedResult<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|exc| SeedError::source_unavailable(&self.path, exc))?;
        Ok(())
    }

    /// The next line without its terminator, or `None` at end of file. Invalid
    /// UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> SeedResult<Option<String>> {
        let mut buf = Vec::<u8>::new();
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|exc| SeedError::source_unavailable(&self.path, exc))?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let mut text = String::from_utf8_lossy(&buf).into_owned();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        Ok(Some(text))
    }
}
