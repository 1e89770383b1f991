use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame overhead: the `u32` length prefix plus the trailing `u32` crc.
const FRAME_OVERHEAD: u64 = 8;

/// Payloads larger than this are treated as corruption rather than allocated.
const MAX_FRAME_BYTES: usize = 1 << 20;

/// Write one frame, returning its length in bytes.
fn encode_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Fill `buf` completely. `Ok(false)` means the log ended, possibly mid-frame.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read one frame. `None` at end of log or at the first frame that fails its
/// length, crc or decode check.
fn decode_frame(reader: &mut impl Read, path: &Path) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        tracing::warn!(path = %path.display(), "WAL frame length {len} out of range");
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        tracing::warn!(path = %path.display(), "WAL replay stopped at corrupt entry");
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

/// Every valid event in the log, plus the byte length of that valid prefix.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, frame_len)) = decode_frame(&mut reader, path)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only event log. Each entry is `[u32 len][bincode Event][u32 crc32]`.
///
/// Only whole, fsynced batches survive: a batch that fails to write or sync is
/// cut back off the file before the error is reported, and a torn tail left by
/// a crash is trimmed when the log is opened.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    /// File length covering exactly the batches that were acknowledged.
    durable_len: u64,
    appends_since_compact: u64,
    /// Set when a failed batch could not be cut back; the log refuses writes.
    broken: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    /// Open (or create) the log at `path`, returning it with every event it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let file = open_for_append(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                "trimming {} bytes of torn WAL tail",
                on_disk - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            durable_len: valid_len,
            appends_since_compact: 0,
            broken: false,
            #[cfg(test)]
            fail_next_sync: false,
        };
        Ok((wal, events))
    }

    /// Events currently in the log at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }

    /// Write `events` as one batch with a single fsync. All or nothing: on error
    /// none of the batch remains in the log.
    pub fn commit<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        match self.write_batch(events) {
            Ok((count, bytes)) => {
                self.durable_len += bytes;
                self.appends_since_compact += count;
                Ok(())
            }
            Err(e) => {
                if let Err(undo) = self.discard_uncommitted() {
                    tracing::error!(path = %self.path.display(), "WAL rollback failed: {undo}");
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    /// Returns the number of events and bytes written.
    fn write_batch<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> io::Result<(u64, u64)> {
        let (mut count, mut bytes) = (0, 0);
        for event in events {
            bytes += encode_frame(&mut self.writer, event)?;
            count += 1;
        }
        self.writer.flush()?;
        self.sync()?;
        Ok((count, bytes))
    }

    fn sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("simulated fsync failure"));
        }
        self.writer.get_ref().sync_all()
    }

    /// Cut the file back to `durable_len` and drop any bytes still buffered.
    fn discard_uncommitted(&mut self) -> io::Result<()> {
        let file = open_for_append(&self.path)?;
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer instead of flushing it on drop.
        let _ = stale.into_parts();
        Ok(())
    }

    /// Replace the whole log with `events`: write a temp file, fsync it, rename
    /// it over the log and continue appending to the new file.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in events {
                encode_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        #[cfg(unix)]
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }

        let file = open_for_append(&self.path)?;
        self.durable_len = file.metadata()?.len();
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.appends_since_compact = 0;
        self.broken = false;
        Ok(())
    }

    /// Events committed since the last compaction (or since opening).
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shift, WeekdaySet, Window};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staffslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn staff_event(id: Ulid) -> Event {
        Event::StaffRegistered {
            id,
            branch_id: Ulid::new(),
            name: "Ana".into(),
            shift: Shift {
                working_days: WeekdaySet::ALL,
                hours: Window::new(540, 1020),
            },
            roles: vec![],
        }
    }

    fn booked_event(branch_id: Ulid) -> Event {
        Event::AppointmentBooked {
            id: Ulid::new(),
            branch_id,
            staff_id: Ulid::new(),
            service_id: Ulid::new(),
            category_id: None,
            customer: "Dana".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            window: Window::new(600, 645),
        }
    }

    #[test]
    fn committed_batches_replay_in_order() {
        let path = tmp_path("commit_replay.wal");
        let first = vec![staff_event(Ulid::new()), booked_event(Ulid::new())];
        let second = vec![booked_event(Ulid::new())];
        {
            let (mut wal, existing) = Wal::open(&path).unwrap();
            assert!(existing.is_empty());
            wal.commit(&first).unwrap();
            wal.commit(&second).unwrap();
            assert_eq!(wal.appends_since_compact(), 3);
        }

        let (_, events) = Wal::open(&path).unwrap();
        assert_eq!(events, [first, second].concat());
    }

    #[test]
    fn failed_batch_leaves_nothing_behind() {
        let path = tmp_path("failed_batch.wal");
        let kept = booked_event(Ulid::new());
        let rejected = vec![booked_event(Ulid::new()), booked_event(Ulid::new())];
        let later = staff_event(Ulid::new());
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&kept]).unwrap();

            // The frames reach the file before the fsync fails.
            wal.fail_next_sync = true;
            assert!(wal.commit(&rejected).is_err());
            assert_eq!(wal.appends_since_compact(), 1);
            assert_eq!(Wal::replay(&path).unwrap(), vec![kept.clone()]);

            wal.commit([&later]).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }

    #[test]
    fn torn_tail_is_trimmed_on_open() {
        let path = tmp_path("torn_tail.wal");
        let event = staff_event(Ulid::new());
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.commit([&event]).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event.clone()]);

        // Appends after the trim must not be hidden behind the torn bytes.
        let later = staff_event(Ulid::new());
        {
            let (mut wal, events) = Wal::open(&path).unwrap();
            assert_eq!(events, vec![event.clone()]);
            wal.commit([&later]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event, later]);
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let event = Event::StaffRemoved {
            id: Ulid::new(),
            branch_id: Ulid::new(),
        };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn oversized_length_prefix_is_corruption() {
        let path = tmp_path("oversized.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_commit() {
        let path = tmp_path("compact_commit.wal");
        let branch = Ulid::new();
        let compacted = vec![staff_event(Ulid::new())];
        let later = booked_event(branch);
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            let churn: Vec<Event> = (0..10).map(|_| booked_event(branch)).collect();
            wal.commit(&churn).unwrap();
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
            wal.commit([&later]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![compacted[0].clone(), later]);
    }
}
