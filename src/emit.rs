//! Output formatters for the final ranking: aligned text, line-delimited
//! JSON, and CSV.
//!
//! Emitters write to any `io::Write`; a failure surfaces as the `io::Error`
//! and never touches the in-memory results.

use crate::aggregate::Record;
use std::io::{self, Write};

/// One-record-at-a-time sink for ranking rows.
pub trait Emitter {
    fn emit(&mut self, record: &Record) -> io::Result<()>;
    /// Flush any buffered output. Called once after the last record.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Drive an emitter over a full ranking.
pub fn emit_all<E: Emitter>(emitter: &mut E, records: &[Record]) -> io::Result<()> {
    for record in records {
        emitter.emit(record)?;
    }
    emitter.finish()
}

/// Human-readable aligned columns.
pub struct TextEmitter<W> {
    out: W,
    wrote_header: bool,
}

impl<W: Write> TextEmitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            wrote_header: false,
        }
    }
}

impl<W: Write> Emitter for TextEmitter<W> {
    fn emit(&mut self, r: &Record) -> io::Result<()> {
        if !self.wrote_header {
            writeln!(
                self.out,
                "{:<39} {:>9} {:>9} {:>9} {:>9} {:>6} {:>6}  {}",
                "ip", "connect", "tls", "ttfb", "total", "colo", "rounds", "prefix"
            )?;
            self.wrote_header = true;
        }
        writeln!(
            self.out,
            "{:<39} {:>7.1}ms {:>7.1}ms {:>7.1}ms {:>7.1}ms {:>6} {:>6}  {}",
            r.ip,
            r.connect_ms,
            r.tls_ms,
            r.ttfb_ms,
            r.total_ms,
            r.colo.as_deref().unwrap_or("-"),
            r.rounds_ok,
            r.prefix,
        )
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// One JSON object per line.
pub struct JsonlEmitter<W> {
    out: W,
}

impl<W: Write> JsonlEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Emitter for JsonlEmitter<W> {
    fn emit(&mut self, r: &Record) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, r)?;
        writeln!(self.out)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// RFC 4180-style CSV with a header row.
pub struct CsvEmitter<W> {
    out: W,
    wrote_header: bool,
}

impl<W: Write> CsvEmitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            wrote_header: false,
        }
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl<W: Write> Emitter for CsvEmitter<W> {
    fn emit(&mut self, r: &Record) -> io::Result<()> {
        if !self.wrote_header {
            writeln!(
                self.out,
                "ip,prefix,ok,http_status,connect_ms,tls_ms,ttfb_ms,total_ms,score_ms,colo,rounds_ok"
            )?;
            self.wrote_header = true;
        }
        writeln!(
            self.out,
            "{},{},{},{},{:.3},{:.3},{:.3},{:.3},{:.3},{},{}",
            r.ip,
            csv_escape(&r.prefix.to_string()),
            r.ok,
            r.http_status,
            r.connect_ms,
            r.tls_ms,
            r.ttfb_ms,
            r.total_ms,
            r.score_ms,
            csv_escape(r.colo.as_deref().unwrap_or("")),
            r.rounds_ok,
        )
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
