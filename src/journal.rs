use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes are garbage, not entries.
const MAX_ENTRY_LEN: u32 = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one `[u32]` little-endian field. `Ok(None)` on a clean or torn EOF.
fn read_u32(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Append-only booking journal.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is discarded on replay via the
///   length prefix and CRC check.
///
/// Each append is encoded in full before anything reaches the file, so a
/// failed append never leaves bytes behind for the next one to flush.
pub struct Journal {
    file: File,
    path: PathBuf,
    /// File length up to the end of the last acknowledged entry.
    committed_len: u64,
    /// Set when a failed append could not be rolled back; the tail is then
    /// unknown and only `recover` on reopen can fix it.
    broken: bool,
    appends_since_compact: u64,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            committed_len,
            broken: false,
            appends_since_compact: 0,
        })
    }

    /// Count `entries` already in the file (e.g. just replayed) as appended
    /// since the last compaction.
    pub fn with_backlog(mut self, entries: u64) -> Self {
        self.appends_since_compact = entries;
        self
    }

    /// Append one event and fsync before returning. On error the file is cut
    /// back to its length before the call.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("journal tail unknown after failed rollback"));
        }
        let mut entry = Vec::new();
        encode_event(&mut entry, event)?;

        let written = self
            .file
            .write_all(&entry)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.roll_back() {
                tracing::error!(
                    path = %self.path.display(),
                    "journal rollback failed: {rollback}"
                );
                self.broken = true;
            }
            return Err(e);
        }

        self.committed_len += entry.len() as u64;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Reopen the file and truncate it to `committed_len`.
    fn roll_back(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.file = file;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`: write a temp file, fsync, then
    /// rename it over the live file and reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.file = file;
        self.broken = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Swap the underlying handle, e.g. for one that rejects writes.
    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = file;
    }

    /// Replay the journal from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are dropped.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(read_valid_prefix(path)?.0)
    }

    /// Replay, then cut any torn or corrupt tail off the file so later
    /// appends land right after the last good entry.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = read_valid_prefix(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = meta.len() - valid_len,
                    "truncating journal tail"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        Ok(events)
    }
}

/// Decode entries until EOF or the first bad one. Returns the events and the
/// byte length of the valid prefix.
fn read_valid_prefix(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let Some(len) = read_u32(&mut reader)? else { break };
        if len > MAX_ENTRY_LEN {
            tracing::warn!(path = %path.display(), len, "implausible journal entry length");
            break;
        }

        let mut payload = vec![0u8; len as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // torn
            Err(e) => return Err(e),
        }

        let Some(stored_crc) = read_u32(&mut reader)? else { break };
        if stored_crc != crc32fast::hash(&payload) {
            tracing::warn!(
                path = %path.display(),
                replayed = events.len(),
                "journal checksum mismatch, dropping tail"
            );
            break;
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), "undecodable journal entry: {e}");
                break;
            }
        }
        valid_len += 8 + u64::from(len);
    }

    Ok((events, valid_len))
}
