//! Newline-delimited JSON event feed.
//!
//! Each non-blank line holds one [`ChainEvent`]. [`EventFeed`] wraps any
//! `BufRead` and yields events lazily; [`read_event_log`] loads a whole file.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::Context;

use crate::event::ChainEvent;

/// Iterator over the events of an NDJSON stream.
pub struct EventFeed<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: BufRead> EventFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl EventFeed<BufReader<File>> {
    /// Open an NDJSON file.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening event log {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for EventFeed<R> {
    type Item = anyhow::Result<ChainEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_number += 1;
            let line_number = self.line_number;
            let line = match line.with_context(|| format!("reading line {line_number}")) {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(&line)
                    .with_context(|| format!("decoding event on line {line_number}")),
            );
        }
    }
}

/// Read every event of an NDJSON file.
pub fn read_event_log(path: impl AsRef<Path>) -> anyhow::Result<Vec<ChainEvent>> {
    let path = path.as_ref();
    let events = EventFeed::open(path)?
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("reading event log {}", path.display()))?;
    tracing::info!(path = %path.display(), events = events.len(), "event log loaded");
    Ok(events)
}
