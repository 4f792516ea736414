use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Entries claiming a larger payload are treated as corruption.
const MAX_ENTRY_LEN: usize = 1 << 20;

fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// `Ok(None)` at a clean end of log or at the first damaged entry.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only log of booking store events.
///
/// Entry format: `[u32 LE: len][bincode Event][u32 LE: crc32 of payload]`.
/// A torn or corrupt tail is dropped on replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one entry. Not durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_entry(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` to the side file the next swap installs.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // Best effort: not every platform lets a directory be opened for sync.
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                warn!("could not sync WAL directory {}: {e}", dir.display());
            }
        }
        self.writer = open_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.map_or_else(Vec::new, |(events, _)| events))
    }

    /// Replay, then cut any damaged tail off the file so later appends follow
    /// the last intact entry.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let Some((events, intact)) = scan(path)? else {
            return Ok(Vec::new());
        };
        let file = OpenOptions::new().write(true).open(path)?;
        let total = file.metadata()?.len();
        if intact < total {
            warn!(
                "truncating {} trailing bytes of {}",
                total - intact,
                path.display()
            );
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

/// Intact events and the byte length they occupy, or `None` without a file.
fn scan(path: &Path) -> io::Result<Option<(Vec<Event>, u64)>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let total = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut consumed = 0u64;

    while let Some(event) = read_entry(&mut reader)? {
        consumed += 8 + bincode::serialized_size(&event).unwrap_or(0);
        events.push(event);
    }
    if consumed < total {
        warn!(
            "ignoring {} trailing bytes of {}",
            total - consumed,
            path.display()
        );
    }
    Ok(Some((events, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, DateRange, parse_date};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("sharebnb_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn registered() -> Event {
        Event::PropertyRegistered {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            price_rate: 100,
        }
    }

    fn created(property_id: Ulid, start: &str, end: &str) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                property_id,
                customer_id: Ulid::new(),
                range: DateRange::new(parse_date(start).unwrap(), parse_date(end).unwrap()),
                total_price: 100,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let reg = registered();
        let events = vec![
            reg.clone(),
            created(reg.property_id(), "2024-06-01", "2024-06-02"),
            Event::PropertyRateChanged {
                id: reg.property_id(),
                price_rate: 90,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 3);
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = registered();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn recover_truncates_torn_tail_before_new_appends() {
        let path = tmp_path("recover_torn.wal");
        let first = registered();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        let second = registered();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn recover_missing_file_is_empty_log() {
        let path = tmp_path("recover_missing.wal");
        assert!(Wal::recover(&path).unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_empty_log() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = registered();
        let bad = Event::PropertyRemoved { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn oversized_length_is_corruption() {
        let path = tmp_path("oversized.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact_replaces.wal");
        let reg = registered();
        let pid = reg.property_id();
        let keep = created(pid, "2024-06-20", "2024-06-22");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&reg).unwrap();
            for day in 1..=9 {
                let e = created(pid, &format!("2024-06-0{day}"), &format!("2024-06-0{day}"));
                let Event::BookingCreated { booking } = &e else { unreachable!() };
                let id = booking.id;
                wal.append(&e).unwrap();
                wal.append(&Event::BookingDeleted { id, property_id: pid }).unwrap();
            }
            wal.append(&keep).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![reg, keep];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);
        assert!(!Wal::compact_path(&path).exists());
    }

    #[test]
    fn appends_continue_after_compact() {
        let path = tmp_path("compact_then_append.wal");
        let reg = registered();
        let later = created(reg.property_id(), "2024-07-01", "2024-07-03");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&reg).unwrap();
            wal.append(&Event::PropertyRateChanged {
                id: reg.property_id(),
                price_rate: 5,
            })
            .unwrap();
            wal.compact(std::slice::from_ref(&reg)).unwrap();
            wal.append(&later).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![reg, later]);
    }

    #[test]
    fn buffered_batch_is_durable_after_flush() {
        let path = tmp_path("buffered_batch.wal");
        let events: Vec<Event> = (0..5).map(|_| registered()).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
