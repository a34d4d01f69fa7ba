//! # Reading Stream Parser
//!
//! Turns a line-oriented byte stream into validated [`Reading`]s.
//!
//! ## Line format
//! `YYYY-MM-DD <temperature> <humidity>`, fields separated by any run of
//! whitespace (spaces or tabs). Blank lines are skipped but still counted, so
//! every error names the physical 1-based line it came from. A line must be
//! valid UTF-8 and at most [`MAX_LINE_BYTES`] long; either failure is a
//! format error on that line.
//!
//! ## Failure policy
//! Fail fast: the first malformed line, invalid reading or handler error ends
//! the sequence. Cancellation is checked before each line is consumed.
//! A [`ReadingLines`] is finite and cannot be restarted; once it has ended or
//! failed it only ever yields `None`.

use std::future::Future;

use futures_util::stream::{self, Stream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{FormatError, IngestError};
use crate::model::{parse_date, Reading};

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Lazy sequence of readings over a buffered reader.
pub struct ReadingLines<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    cancel: CancellationToken,
    done: bool,
}

enum RawLine {
    End,
    Line,
    TooLong,
}

impl<R: AsyncBufRead + Unpin> ReadingLines<R> {
    pub fn new(reader: R, cancel: CancellationToken) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            cancel,
            done: false,
        }
    }

    /// Physical lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    /// The next reading with its 1-based line number, or `None` at the end.
    pub async fn next_reading(&mut self) -> Result<Option<(usize, Reading)>, IngestError> {
        if self.done {
            return Ok(None);
        }
        match self.advance().await {
            Ok(Some(item)) => Ok(Some(item)),
            other => {
                self.done = true;
                other
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<(usize, Reading)>, IngestError> {
        loop {
            let raw = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(IngestError::Cancelled { line: self.line_no + 1 });
                }
                raw = read_raw_line(&mut self.reader, &mut self.buf) => raw?,
            };
            if let RawLine::End = raw {
                return Ok(None);
            }
            self.line_no += 1;
            let at = self.line_no;
            if let RawLine::TooLong = raw {
                let too_long = FormatError::LineTooLong { max: MAX_LINE_BYTES };
                return Err(IngestError::from(too_long).with_line(at));
            }
            let line = std::str::from_utf8(&self.buf)
                .map_err(|_| IngestError::from(FormatError::Encoding).with_line(at))?;
            if line.trim().is_empty() {
                continue;
            }
            let reading = parse_line(line).map_err(|e| e.with_line(at))?;
            return Ok(Some((at, reading)));
        }
    }

    /// Adapts the sequence into a `Stream`; it ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<(usize, Reading), IngestError>> {
        stream::unfold(self, |mut lines| async move {
            match lines.next_reading().await {
                Ok(Some(item)) => Some((Ok(item), lines)),
                Ok(None) => None,
                Err(e) => Some((Err(e), lines)),
            }
        })
    }
}

/// Reads one line into `buf`, without its `\n`. Stops as soon as the line
/// outgrows [`MAX_LINE_BYTES`] instead of buffering the rest of it.
async fn read_raw_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<RawLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if read_any { RawLine::Line } else { RawLine::End });
        }
        read_any = true;

        let newline = available.iter().position(|b| *b == b'\n');
        let chunk = &available[..newline.unwrap_or(available.len())];
        if buf.len() + chunk.len() > MAX_LINE_BYTES {
            return Ok(RawLine::TooLong);
        }
        buf.extend_from_slice(chunk);

        let used = newline.map_or(available.len(), |i| i + 1);
        reader.consume(used);
        if newline.is_some() {
            return Ok(RawLine::Line);
        }
    }
}

/// Parses one non-blank line into a validated reading.
///
/// A well-formed line whose values are out of range is a validation error,
/// not a format error.
pub fn parse_line(line: &str) -> Result<Reading, IngestError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [date, temperature, humidity] = fields[..] else {
        return Err(FormatError::FieldCount { found: fields.len() }.into());
    };

    let date = parse_date(date)?;
    let temperature = parse_number(temperature).ok_or_else(|| FormatError::Temperature {
        value: temperature.to_string(),
    })?;
    let humidity = parse_number(humidity).ok_or_else(|| FormatError::Humidity {
        value: humidity.to_string(),
    })?;

    Ok(Reading::new(date, temperature, humidity)?)
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Drives `handler` once per reading, in file order, and returns how many
/// readings it accepted.
///
/// Handler errors are tagged with the line of the reading that caused them.
pub async fn parse_stream<R, F, Fut>(
    reader: R,
    cancel: &CancellationToken,
    mut handler: F,
) -> Result<usize, IngestError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Reading) -> Fut,
    Fut: Future<Output = Result<(), IngestError>>,
{
    let mut lines = ReadingLines::new(reader, cancel.clone());
    let mut handled = 0;
    while let Some((line, reading)) = lines.next_reading().await? {
        handler(reading).await.map_err(|e| e.with_line(line))?;
        handled += 1;
    }
    Ok(handled)
}
