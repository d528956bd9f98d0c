//! The last-seen event timestamp, persisted as a single RFC 3339 line so
//! the event pump can resume after a restart without replaying the whole
//! stream.

use std::fs;
use std::path::PathBuf;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const FILENAME: &str = "event.ts";

pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// If the file is absent, empty, or unparsable, the watermark is "now".
    pub fn load(&self) -> OffsetDateTime {
        match fs::read_to_string(&self.path) {
            Ok(contents) if !contents.trim().is_empty() => {
                match OffsetDateTime::parse(contents.trim(), &Rfc3339) {
                    Ok(ts) => ts,
                    Err(err) => {
                        log::warn!("watermark file {:?} is unparsable, using now: {err}", self.path);
                        OffsetDateTime::now_utc()
                    }
                }
            }
            _ => OffsetDateTime::now_utc(),
        }
    }

    /// Truncates and rewrites the file. Fsync-free: durability against an
    /// OS crash is not required, a lost watermark just replays more events.
    pub fn persist(&self, ts: OffsetDateTime) {
        let encoded = match ts.format(&Rfc3339) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::warn!("failed to encode watermark timestamp: {err}");
                return;
            }
        };

        if let Err(err) = fs::write(&self.path, &encoded) {
            log::warn!("failed to persist watermark, truncating: {err}");
            let _ = fs::write(&self.path, "");
        }
    }
}
