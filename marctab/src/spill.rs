//! On-disk staging of transformed rows between the streaming transform and
//! the partitioned bulk load.
//!
//! The output table is partitioned by MARC field and loaded one partition
//! at a time, so rows are spilled into one file per field. Each file holds
//! a sequence of frames: a `u32` little-endian length prefix followed by a
//! bincode-encoded [`TabRow`]. The encoding is self-delimiting and read
//! back sequentially from the start of the file.
//!
//! All 1000 files are open simultaneously during the write phase; the
//! process file-descriptor limit must accommodate that.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, MarctabError, MarctabResult};
use crate::marc::all_field_names;
use crate::types::TabRow;
use crate::{bail, marctab_error};

/// Spill directory, relative to the data directory.
const SPILL_SUBDIR: &str = "tmp/marctab";

/// errno for "too many open files".
const EMFILE: i32 = 24;

/// Per-field on-disk queues for transformed rows.
pub struct SpillStore {
    bins: HashMap<String, Bin>,
    basepath: PathBuf,
    done_writing: bool,
}

struct Bin {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl SpillStore {
    /// Creates a fresh spill directory under `datadir` and opens one file
    /// per MARC field. Any prior contents of the directory are removed.
    pub fn create(datadir: &Path) -> MarctabResult<SpillStore> {
        let basepath = datadir.join(SPILL_SUBDIR);
        let _ = fs::remove_dir_all(&basepath);
        fs::create_dir_all(&basepath).map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Io,
                format!("unable to create directory: {}", basepath.display()),
                err,
            )
        })?;
        let mut bins = HashMap::with_capacity(1000);
        for field in all_field_names() {
            let path = basepath.join(&field);
            let file = File::create(&path).map_err(|err| open_error(&path, err))?;
            bins.insert(
                field,
                Bin {
                    writer: Some(BufWriter::new(file)),
                    path,
                },
            );
        }
        Ok(SpillStore {
            bins,
            basepath,
            done_writing: false,
        })
    }

    /// Appends one row to its field's file.
    ///
    /// A row whose field is not one of the 1000 known names is dropped and
    /// reported as a non-fatal diagnostic message.
    pub fn write(&mut self, row: &TabRow) -> MarctabResult<Option<String>> {
        let Some(bin) = self.bins.get_mut(&row.field) else {
            return Ok(Some(format!("unknown field: {}", row.field)));
        };
        let Some(writer) = bin.writer.as_mut() else {
            bail!(ErrorKind::InvalidState, "write mode already completed");
        };
        let payload = bincode::serde::encode_to_vec(row, bincode::config::standard())?;
        let len = u32::try_from(payload.len())
            .map_err(|_| marctab_error!(ErrorKind::Io, "row too large for spill frame"))?;
        writer.write_all(&len.to_le_bytes()).map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Io,
                format!("writing file: {}", bin.path.display()),
                err,
            )
        })?;
        writer.write_all(&payload).map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Io,
                format!("writing file: {}", bin.path.display()),
                err,
            )
        })?;
        Ok(None)
    }

    /// Flushes and closes all writers. Must be called exactly once, after
    /// the last write and before the first read.
    pub fn finish_writing(&mut self) -> MarctabResult<()> {
        if self.done_writing {
            bail!(ErrorKind::InvalidState, "write mode already completed");
        }
        self.done_writing = true;
        for bin in self.bins.values_mut() {
            if let Some(mut writer) = bin.writer.take() {
                writer.flush().map_err(|err| {
                    MarctabError::with_source(
                        ErrorKind::Io,
                        format!("closing file: {}", bin.path.display()),
                        err,
                    )
                })?;
            }
        }
        Ok(())
    }

    /// Opens a sequential reader over one field's rows, in insertion order.
    pub fn reader(&self, field: &str) -> MarctabResult<SpillReader> {
        if !self.done_writing {
            bail!(
                ErrorKind::InvalidState,
                "source cannot be created in write mode"
            );
        }
        let Some(bin) = self.bins.get(field) else {
            bail!(
                ErrorKind::InvalidState,
                "field not found",
                field.to_string()
            );
        };
        let file = File::open(&bin.path).map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Io,
                format!("unable to open file for reading: {}", bin.path.display()),
                err,
            )
        })?;
        Ok(SpillReader {
            reader: BufReader::new(file),
            path: bin.path.clone(),
        })
    }

    /// Removes the spill directory and its files. Dropping the store has
    /// the same effect; `close` only makes the cleanup point explicit.
    pub fn close(self) {}
}

impl Drop for SpillStore {
    fn drop(&mut self) {
        for bin in self.bins.values_mut() {
            bin.writer.take();
        }
        let _ = fs::remove_dir_all(&self.basepath);
    }
}

fn open_error(path: &Path, err: io::Error) -> MarctabError {
    if err.raw_os_error() == Some(EMFILE) {
        return MarctabError::with_source(
            ErrorKind::ResourceExhausted,
            format!(
                "unable to create file: {}: setting \"ulimit -n 1024\" may help",
                path.display()
            ),
            err,
        );
    }
    MarctabError::with_source(
        ErrorKind::Io,
        format!("unable to create file: {}", path.display()),
        err,
    )
}

/// Sequential reader over one spill file.
#[derive(Debug)]
pub struct SpillReader {
    reader: BufReader<File>,
    path: PathBuf,
}

impl SpillReader {
    /// Reads the next row, or `None` at end of file.
    pub fn next_row(&mut self) -> MarctabResult<Option<TabRow>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => {
                return Err(MarctabError::with_source(
                    ErrorKind::Io,
                    format!("reading file: {}", self.path.display()),
                    err,
                ));
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(|err| {
            MarctabError::with_source(
                ErrorKind::Io,
                format!("reading file: {}", self.path.display()),
                err,
            )
        })?;
        let (row, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())?;
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(field: &str, line: i16, content: &str) -> TabRow {
        TabRow {
            srs_id: "AAA".to_string(),
            line,
            matched_id: String::new(),
            instance_hrid: String::new(),
            instance_id: "INST1".to_string(),
            field: field.to_string(),
            ind1: String::new(),
            ind2: String::new(),
            ord: 1,
            sf: String::new(),
            content: content.to_string(),
        }
    }

    #[test]
    fn round_trips_rows_per_field_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let mut store = SpillStore::create(dir.path()).unwrap();
        assert!(store.write(&row("001", 1, "a")).unwrap().is_none());
        assert!(store.write(&row("650", 2, "b")).unwrap().is_none());
        assert!(store.write(&row("001", 3, "c")).unwrap().is_none());
        store.finish_writing().unwrap();

        let mut reader = store.reader("001").unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap().content, "a");
        assert_eq!(reader.next_row().unwrap().unwrap().content, "c");
        assert!(reader.next_row().unwrap().is_none());

        let mut reader = store.reader("650").unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap().content, "b");
        assert!(reader.next_row().unwrap().is_none());

        let mut reader = store.reader("999").unwrap();
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn unknown_field_is_dropped_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let mut store = SpillStore::create(dir.path()).unwrap();
        let msg = store.write(&row("zzz", 1, "x")).unwrap();
        assert_eq!(msg.as_deref(), Some("unknown field: zzz"));
    }

    #[test]
    fn reading_before_finish_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SpillStore::create(dir.path()).unwrap();
        let err = store.reader("001").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn finish_twice_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = SpillStore::create(dir.path()).unwrap();
        store.finish_writing().unwrap();
        let err = store.finish_writing().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn write_after_finish_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut store = SpillStore::create(dir.path()).unwrap();
        store.finish_writing().unwrap();
        let err = store.write(&row("001", 1, "a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn close_removes_the_spill_directory() {
        let dir = TempDir::new().unwrap();
        let spill_dir = dir.path().join(SPILL_SUBDIR);
        let store = SpillStore::create(dir.path()).unwrap();
        assert!(spill_dir.is_dir());
        store.close();
        assert!(!spill_dir.exists());
    }

    #[test]
    fn create_wipes_prior_contents() {
        let dir = TempDir::new().unwrap();
        let spill_dir = dir.path().join(SPILL_SUBDIR);
        fs::create_dir_all(&spill_dir).unwrap();
        fs::write(spill_dir.join("leftover"), b"junk").unwrap();
        let store = SpillStore::create(dir.path()).unwrap();
        assert!(!spill_dir.join("leftover").exists());
        store.close();
    }
}
