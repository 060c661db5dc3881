//! On-disk event log behind [`WalStore`](crate::store::WalStore).
//!
//! Each record is `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
//! A batch of records is committed with one write and one fsync; if either
//! fails the file is cut back to its last committed length, so a failed
//! commit never reappears on replay.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const HEADER_LEN: u64 = 4;
const TRAILER_LEN: u64 = 4;

/// The file operations the log needs beyond [`Write`].
pub trait LogFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn encode_record(buf: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

fn encode_all(events: &[Event]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for event in events {
        encode_record(&mut buf, event)?;
    }
    Ok(buf)
}

/// Read one record. `None` means a clean end or a torn/corrupt tail.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
        match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let Ok(event) = bincode::deserialize::<Event>(&payload) else {
        return Ok(None);
    };
    Ok(Some((event, HEADER_LEN + payload.len() as u64 + TRAILER_LEN)))
}

/// Every intact event in the file at `path`, plus the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, len)) = read_record(&mut reader)? {
        events.push(event);
        valid_len += len;
    }
    Ok((events, valid_len))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only log of room and reservation events.
pub struct Wal<F: LogFile = File> {
    file: F,
    path: PathBuf,
    /// Bytes known to be durable; everything past this is rolled back on failure.
    committed_len: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed. Further commits are refused.
    poisoned: bool,
}

impl Wal<File> {
    /// Open the log at `path`, returning the events already in it.
    /// A torn tail left by a crash is cut off before new records go in.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let file = open_append(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_data()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            committed_len: valid_len,
            appends_since_compact: 0,
            poisoned: false,
        };
        Ok((wal, events))
    }

    /// Replay the log at `path`. Reading stops at the first torn or corrupt record.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }

    /// Replace the whole log with `events`.
    ///
    /// The new contents are written and synced to a sibling temp file, which
    /// is then renamed over the log. A failure before the rename leaves the
    /// old log in place and usable.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let buf = encode_all(events)?;
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }

        self.file = open_append(&self.path)?;
        self.committed_len = buf.len() as u64;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }
}

impl<F: LogFile> Wal<F> {
    /// Durably append `events` as one unit: all of them or none.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("event log tail could not be rolled back"));
        }
        let buf = encode_all(events)?;
        let written = self.file.write_all(&buf).and_then(|()| self.file.sync());
        if let Err(e) = written {
            if let Err(rollback) = self
                .file
                .truncate_to(self.committed_len)
                .and_then(|()| self.file.sync())
            {
                tracing::error!("event log rollback failed, refusing further writes: {rollback}");
                self.poisoned = true;
            }
            return Err(e);
        }
        self.committed_len += buf.len() as u64;
        self.appends_since_compact += events.len() as u64;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
