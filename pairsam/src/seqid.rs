use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

/// Longest replacement barcode tag accepted.
pub const MAX_TAG_LEN: usize = 49;

/// Reason an Illumina read name could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedIdentifier {
    #[error("read name contains a pairing suffix ('/' or '#')")]
    PairingSuffix,
    #[error("expected 5 or 7 colon-separated fields, found {0}")]
    FieldCount(usize),
    #[error("field '{field}' is not a non-negative integer: '{value}'")]
    NotANumber { field: &'static str, value: String },
}

/// An Illumina sequence identifier recovered from a SAM/BAM query name.
///
/// Names in SAM/BAM files have had their barcode stripped, so `tag` is never
/// parsed; it is filled in afterwards by the demultiplexer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SequenceIdentifier {
    pub instrument: String,
    pub run: Option<String>,
    pub flowcell: Option<String>,
    pub lane: u32,
    pub tile: u32,
    pub x: u32,
    pub y: u32,
    pub tag: String,
}

impl SequenceIdentifier {
    /// Parse a query name in either the CASAVA 1.8 layout
    /// (`instrument:run:flowcell:lane:tile:x:y`) or the older
    /// `instrument:lane:tile:x:y` layout. The layout is chosen by field count
    /// alone, so a 7-field name is always read as CASAVA 1.8.
    pub fn parse_sam(name: &str) -> Result<Self, MalformedIdentifier> {
        if name.contains(&['/', '#'][..]) {
            return Err(MalformedIdentifier::PairingSuffix);
        }

        let fields: Vec<&str> = name.split(':').collect();
        let (instrument, run, flowcell, coords) = match fields.as_slice() {
            [instrument, run, flowcell, coords @ ..] if fields.len() == 7 => {
                (*instrument, Some(run.to_string()), Some(flowcell.to_string()), coords)
            }
            [instrument, coords @ ..] if fields.len() == 5 => (*instrument, None, None, coords),
            _ => return Err(MalformedIdentifier::FieldCount(fields.len())),
        };

        Ok(Self {
            instrument: instrument.to_string(),
            run,
            flowcell,
            lane: parse_field("lane", coords[0])?,
            tile: parse_field("tile", coords[1])?,
            x: parse_field("x", coords[2])?,
            y: parse_field("y", coords[3])?,
            tag: String::new(),
        })
    }

    pub fn is_casava(&self) -> bool {
        self.flowcell.is_some()
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.set_tag(tag);
        self
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag.clear();
        self.tag.push_str(tag);
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<u32, MalformedIdentifier> {
    let malformed = || MalformedIdentifier::NotANumber { field, value: value.to_string() };
    // `u32::from_str` would also accept a leading '+'
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    value.parse().map_err(|_| malformed())
}

impl FromStr for SequenceIdentifier {
    type Err = MalformedIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_sam(s)
    }
}

impl Display for SequenceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.run, &self.flowcell) {
            (Some(run), Some(flowcell)) => {
                write!(
                    f,
                    "{}:{}:{}:{}:{}:{}:{}",
                    self.instrument, run, flowcell, self.lane, self.tile, self.x, self.y
                )?;
                if !self.tag.is_empty() {
                    write!(f, ":{}", self.tag)?;
                }
            }
            _ => {
                write!(f, "{}:{}:{}:{}:{}", self.instrument, self.lane, self.tile, self.x, self.y)?;
                if !self.tag.is_empty() {
                    write!(f, "#{}", self.tag)?;
                }
            }
        }
        Ok(())
    }
}
