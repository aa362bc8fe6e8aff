//! `nvidia-smi dmon --format csv` stream parser.
//!
//! The utility prints two comment rows, column names then units, followed by
//! one comma-separated row per GPU per interval:
//!
//! ```text
//! # gpu, pwr, gtemp, mtemp, sm
//! # Idx, W, C, C, %
//!     0, 71, 45, -, 12
//! ```
//!
//! It repeats the two comment rows periodically, and the column set can
//! change between repetitions. The parser is a small state machine fed one
//! line at a time; it does no I/O.

use std::collections::BTreeMap;

use thiserror::Error;

use gpusight_common::MetricValue;

/// Prefix of header and unit rows.
pub const COMMENT_MARKER: char = '#';

/// Name of the column holding the GPU index.
pub const INDEX_COLUMN: &str = "gpu";

/// Where the parser is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeader,
    AwaitingUnits,
    Streaming,
}

/// Column names and units of the current stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    columns: Vec<String>,
    units: Vec<String>,
    index_column: usize,
}

impl StreamFrame {
    fn new(columns: Vec<String>, units: Vec<String>) -> Self {
        let index_column = columns
            .iter()
            .position(|c| c == INDEX_COLUMN)
            .unwrap_or(0);
        Self {
            columns,
            units,
            index_column,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Name of the column the device index is read from.
    pub fn index_column(&self) -> &str {
        &self.columns[self.index_column]
    }

}

/// One parsed data row.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Session-local GPU index.
    pub device_index: u32,
    /// Metric values by column name, without the index column.
    pub values: BTreeMap<String, MetricValue>,
}

/// A data row that was dropped. The stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSkip {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("invalid device index '{0}'")]
    InvalidIndex(String),

    #[error("data row before any header")]
    NoFrame,
}

/// Errors that end the streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("header has {headers} columns but unit row has {units}")]
    SchemaMismatch { headers: usize, units: usize },
}

/// What a single line did to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Blank line, ignored.
    Empty,
    /// Column names read; waiting for units.
    Header { columns: usize },
    /// Frame complete; data rows follow.
    Units,
    /// A header row interrupted the stream and starts a new frame.
    Resync { columns: usize },
    /// A data row.
    Sample(Sample),
    /// A data row that could not be used.
    Skipped(ParseSkip),
}

/// Line-at-a-time parser for the `dmon` CSV stream.
#[derive(Debug)]
pub struct StreamParser {
    state: ParserState,
    pending_columns: Vec<String>,
    frame: Option<StreamFrame>,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingHeader,
            pending_columns: Vec::new(),
            frame: None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// The active frame, once header and units have been read.
    pub fn frame(&self) -> Option<&StreamFrame> {
        self.frame.as_ref()
    }

    /// Feed one line (without its terminator).
    pub fn feed(&mut self, line: &str) -> Result<ParseEvent, StreamError> {
        let trimmed = line.trim();
        let comment = trimmed.strip_prefix(COMMENT_MARKER);
        let content = comment.map(str::trim).unwrap_or(trimmed);

        if content.is_empty() {
            return Ok(ParseEvent::Empty);
        }

        match self.state {
            ParserState::AwaitingHeader => {
                self.pending_columns = split_fields(content);
                self.state = ParserState::AwaitingUnits;
                Ok(ParseEvent::Header {
                    columns: self.pending_columns.len(),
                })
            }
            ParserState::AwaitingUnits => {
                let units = split_fields(content);
                let headers = self.pending_columns.len();
                if units.len() != headers {
                    self.reset();
                    return Err(StreamError::SchemaMismatch {
                        headers,
                        units: units.len(),
                    });
                }
                let columns = std::mem::take(&mut self.pending_columns);
                self.frame = Some(StreamFrame::new(columns, units));
                self.state = ParserState::Streaming;
                Ok(ParseEvent::Units)
            }
            ParserState::Streaming if comment.is_some() => {
                self.frame = None;
                self.pending_columns = split_fields(content);
                self.state = ParserState::AwaitingUnits;
                Ok(ParseEvent::Resync {
                    columns: self.pending_columns.len(),
                })
            }
            ParserState::Streaming => Ok(match self.parse_row(content) {
                Ok(sample) => ParseEvent::Sample(sample),
                Err(skip) => ParseEvent::Skipped(skip),
            }),
        }
    }

    fn parse_row(&self, content: &str) -> Result<Sample, ParseSkip> {
        let frame = self.frame.as_ref().ok_or(ParseSkip::NoFrame)?;
        let fields: Vec<&str> = content.split(',').map(str::trim).collect();

        if fields.len() != frame.columns.len() {
            return Err(ParseSkip::ColumnCount {
                expected: frame.columns.len(),
                found: fields.len(),
            });
        }

        let raw_index = fields[frame.index_column];
        let device_index = raw_index
            .parse::<u32>()
            .map_err(|_| ParseSkip::InvalidIndex(raw_index.to_string()))?;

        let values = frame
            .columns
            .iter()
            .zip(&fields)
            .enumerate()
            .filter(|(i, _)| *i != frame.index_column)
            .map(|(_, (column, raw))| (column.clone(), MetricValue::parse(raw)))
            .collect();

        Ok(Sample {
            device_index,
            values,
        })
    }

    fn reset(&mut self) {
        self.state = ParserState::AwaitingHeader;
        self.pending_columns.clear();
        self.frame = None;
    }
}

fn split_fields(content: &str) -> Vec<String> {
    content.split(',').map(|f| f.trim().to_string()).collect()
}
