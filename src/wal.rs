use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

// Frame layout: u32-le payload length, bincode-encoded event, u32-le crc32
// of the payload. The length prefix does not cover the checksum.
const FRAME_HEADER_BYTES: usize = 4;
const FRAME_CRC_BYTES: usize = 4;

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only event log. Owned exclusively by the engine's writer task, so
/// there is no internal locking; batching and bookkeeping happen there.
///
/// A crash mid-write leaves a truncated or checksum-failing tail frame,
/// which `replay` treats as the end of the log.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Single durable append. Production writes go through
    /// `append_buffered` + `flush_sync` so a batch shares one fsync.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until `flush_sync` returns.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)
    }

    /// Flush buffered frames and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the log contents with `events` and reopen for appending.
    ///
    /// The replacement is written and fsynced to a sibling temp file, then
    /// renamed over the log. The rename is atomic, so a crash at any point
    /// leaves either the old log or the complete new one.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in events {
                write_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.writer = open_for_append(&self.path)?;
        Ok(())
    }

    /// Iterate the events recorded at `path`, oldest first. A missing file
    /// reads as an empty log; iteration ends at the first truncated or
    /// corrupt frame, discarding it and anything after it.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Replay { reader })
    }
}

/// Streaming reader over a log file, consumed by engine startup.
pub struct Replay {
    reader: Option<BufReader<File>>,
}

impl Replay {
    fn next_frame(&mut self) -> Option<Event> {
        let reader = self.reader.as_mut()?;

        let mut len_buf = [0u8; FRAME_HEADER_BYTES];
        reader.read_exact(&mut len_buf).ok()?;
        let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        reader.read_exact(&mut payload).ok()?;
        let mut crc_buf = [0u8; FRAME_CRC_BYTES];
        reader.read_exact(&mut crc_buf).ok()?;

        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return None;
        }
        bincode::deserialize(&payload).ok()
    }
}

impl Iterator for Replay {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        match self.next_frame() {
            Some(event) => Some(event),
            None => {
                // A bad frame ends the log for good; don't resync past it.
                self.reader = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayHours, TimeRange, Weekday};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("openslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn replay_all(path: &Path) -> Vec<Event> {
        Wal::replay(path).unwrap().collect()
    }

    fn requested(id: Ulid, calendar_id: Ulid, start: i64, end: i64) -> Event {
        Event::AppointmentRequested {
            id,
            calendar_id,
            span: TimeRange::new(start, end),
            title: None,
            service_type: None,
            custom_location: None,
            accepted: false,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let cal_id = Ulid::new();
        let events = vec![
            Event::CalendarCreated {
                id: cal_id,
                owner: Ulid::new(),
            },
            requested(Ulid::new(), cal_id, 1000, 2000),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(replay_all(&path), events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = Event::CalendarCreated {
            id: Ulid::new(),
            owner: Ulid::new(),
        };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Append garbage to simulate a truncated second frame
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // partial length + some bytes
        }

        assert_eq!(replay_all(&path), vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(replay_all(&path).is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::AppointmentDeleted {
            id: Ulid::new(),
            calendar_id: Ulid::new(),
        };

        // Manually write a frame with a bad CRC
        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        assert!(replay_all(&path).is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_first_bad_frame() {
        let path = tmp_path("bad_frame_middle.wal");
        let _ = fs::remove_file(&path);

        let cal_id = Ulid::new();
        let good = Event::CalendarCreated {
            id: cal_id,
            owner: Ulid::new(),
        };
        let after = requested(Ulid::new(), cal_id, 1000, 2000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        // Corrupt frame in the middle, then a well-formed frame after it.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            let payload = bincode::serialize(&after).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xBAD_F00Du32.to_le_bytes()).unwrap();
            write_frame(&mut f, &after).unwrap();
        }

        // Everything from the bad frame onward is discarded, even though a
        // valid frame follows it.
        assert_eq!(replay_all(&path), vec![good]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let cal_id = Ulid::new();
        let owner = Ulid::new();

        // Write many events: create, then request/reject churn
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::CalendarCreated { id: cal_id, owner }).unwrap();
            for i in 0..10 {
                let appt_id = Ulid::new();
                wal.append(&requested(appt_id, cal_id, i * 1000, i * 1000 + 500))
                    .unwrap();
                wal.append(&Event::AppointmentRejected {
                    id: appt_id,
                    calendar_id: cal_id,
                }).unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        assert!(before > 0);

        // Compact: final state is just the empty calendar (all rejected
        // appointments are tombstones and get dropped)
        let compacted_events = vec![Event::CalendarCreated { id: cal_id, owner }];

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted_events).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        assert_eq!(replay_all(&path), compacted_events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let loc_id = Ulid::new();
        let compacted = vec![Event::LocationCreated {
            id: loc_id,
            name: "Clinic".into(),
            timezone: chrono_tz::Europe::Madrid,
        }];

        let new_event = Event::ScheduleSet {
            location_id: loc_id,
            day: Weekday::Monday,
            hours: DayHours {
                open_minute: 9 * 60,
                close_minute: 17 * 60,
            },
        };

        {
            let mut wal = Wal::open(&path).unwrap();
            // Seed some data
            wal.append(&compacted[0]).unwrap();
            // Compact, then keep appending to the reopened log
            wal.compact(&compacted).unwrap();
            wal.append(&new_event).unwrap();
        }

        let replayed = replay_all(&path);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], compacted[0]);
        assert_eq!(replayed[1], new_event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<Event> = (0..5)
            .map(|_| Event::CalendarCreated {
                id: Ulid::new(),
                owner: Ulid::new(),
            })
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }

        assert_eq!(replay_all(&path), events);

        let _ = fs::remove_file(&path);
    }
}
