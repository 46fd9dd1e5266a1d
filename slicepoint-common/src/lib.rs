//! # Shared Record Grammar (Writer ↔ Reader)
//!
//! Defines the line-oriented records that make up a per-thread vector file.
//! The profiling engine writes them; post-processing tools (and the
//! integration tests) read them back with [`Record::parse`].
//!
//! ## Record Layout
//!
//! ```text
//! P: bbv 1 rep=1                          header
//! S: 0x401000 1 1                         slice-start marker (first slice)
//! M: 0x401234 1 3 105 0                   slice-end marker
//! T :1:3 :2:3 :3:3                        vector, newline is the sentinel
//! E :1:2:3 :2:3:3                         block transitions (optional)
//! I: 1 0x400000 /usr/bin/app              module table
//! B: 1 0x401000 0x401020 36 10 1 3 0      block table
//! X: 105 1                                end of thread
//! ```
//!
//! ## Key Types
//!
//! - [`Record`] - One parsed or to-be-written line
//! - [`VectorEntry`] - Sparse `index:count` pair
//! - [`EdgeEntry`] - Sparse `prev:block:count` triple
//! - [`ProfileKind`] - Which profile produced a file

#![no_std]

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

// ============================================================================
// Format Constants
// ============================================================================

/// Version written into every modern-format header record
pub const FORMAT_VERSION: u32 = 1;

/// Mask applied to data addresses before locality tracking
///
/// Clears the low 6 bits so accesses are tracked per 64-byte cache line.
pub const LINE_MASK: u64 = !0x3f;

/// Number of reuse-distance classes in a locality vector
///
/// Bucket 0 holds first touches; the last bucket absorbs every distance
/// beyond `2^30`.
pub const LOCALITY_BUCKETS: usize = 32;

/// Prefix of the legacy (PinPoints style) marker comment
pub const LEGACY_SLICE_PREFIX: &str = "# Slice ending at ";

// ============================================================================
// Profile Kind
// ============================================================================

/// The two vector profiles the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProfileKind {
    /// Basic-block vector: block id → executions in the slice
    Frequency,
    /// Locality vector: reuse-distance bucket → accesses in the slice
    Locality,
}

impl ProfileKind {
    /// Tag written into the header record
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Frequency => "bbv",
            Self::Locality => "ldv",
        }
    }

    /// File extension appended to the per-thread file name
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Frequency => "bb",
            Self::Locality => "ldv",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bbv" => Some(Self::Frequency),
            "ldv" => Some(Self::Locality),
            _ => None,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Sparse vector entry
///
/// For frequency vectors `index` is a block id, for locality vectors it is a
/// reuse-distance bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorEntry {
    pub index: u32,
    pub count: u64,
}

/// Block-to-block transition count within one slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEntry {
    pub from: u32,
    pub to: u32,
    pub count: u64,
}

/// A single line of a vector file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// File header; `rep_iterations` states whether markers embed the
    /// rep-iteration count
    Header { kind: ProfileKind, version: u32, rep_iterations: bool },

    /// Start of the thread's first slice (only with first-slice emission)
    SliceStart { address: u64, module: u32, count: u64 },

    /// End of a slice
    ///
    /// `count` is the execution instance of the marker address that bounds
    /// the slice; `cumulative` is the thread's instruction count through the
    /// slice.
    Marker { address: u64, module: u32, count: u64, cumulative: u64, rep_iterations: u64 },

    /// Sparse vector for the slice announced by the preceding marker
    Vector(Vec<VectorEntry>),

    /// Transition counts for the slice announced by the preceding marker
    Edges(Vec<EdgeEntry>),

    /// Module table entry; the name is omitted without symbolic info
    Module { id: u32, base: u64, name: Option<String> },

    /// Block table entry written at thread end
    Block {
        id: u32,
        start: u64,
        end: u64,
        size: u64,
        instructions: u64,
        module: u32,
        count: u64,
        slice_start: bool,
    },

    /// Final record of a thread's file
    End { cumulative: u64, slices: u64 },

    /// Anything starting with `#`
    Comment(String),
}

/// Error returned by [`Record::parse`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty record")]
    Empty,

    #[error("unknown record tag: {0}")]
    UnknownTag(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("invalid sparse entry: {0}")]
    InvalidEntry(String),

    #[error("unknown profile kind: {0}")]
    UnknownKind(String),
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header { kind, version, rep_iterations } => {
                write!(f, "P: {} {version} rep={}", kind.tag(), u8::from(*rep_iterations))
            }
            Self::SliceStart { address, module, count } => {
                write!(f, "S: {address:#x} {module} {count}")
            }
            Self::Marker { address, module, count, cumulative, rep_iterations } => {
                write!(f, "M: {address:#x} {module} {count} {cumulative} {rep_iterations}")
            }
            Self::Vector(entries) => {
                f.write_str("T")?;
                for entry in entries {
                    write!(f, " :{}:{}", entry.index, entry.count)?;
                }
                Ok(())
            }
            Self::Edges(edges) => {
                f.write_str("E")?;
                for edge in edges {
                    write!(f, " :{}:{}:{}", edge.from, edge.to, edge.count)?;
                }
                Ok(())
            }
            Self::Module { id, base, name } => match name {
                Some(name) => write!(f, "I: {id} {base:#x} {name}"),
                None => write!(f, "I: {id} {base:#x}"),
            },
            Self::Block { id, start, end, size, instructions, module, count, slice_start } => {
                write!(
                    f,
                    "B: {id} {start:#x} {end:#x} {size} {instructions} {module} {count} {}",
                    u8::from(*slice_start)
                )
            }
            Self::End { cumulative, slices } => write!(f, "X: {cumulative} {slices}"),
            Self::Comment(text) => write!(f, "#{text}"),
        }
    }
}

/// Legacy (PinPoints style) rendering of a record
///
/// Markers become `# Slice ending at N` comments and vectors use the
/// `T:id:count :id:count ` layout. Other records render as in the modern
/// format; the legacy writer simply never emits them.
pub struct Legacy<'a>(pub &'a Record);

impl fmt::Display for Legacy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Record::Marker { cumulative, .. } => write!(f, "{LEGACY_SLICE_PREFIX}{cumulative}"),
            Record::Vector(entries) => {
                f.write_str("T")?;
                for entry in entries {
                    write!(f, ":{}:{} ", entry.index, entry.count)?;
                }
                Ok(())
            }
            other => other.fmt(f),
        }
    }
}

impl Record {
    /// Parse one line of a vector file
    ///
    /// Accepts both the modern and the legacy vector layout. Legacy marker
    /// comments come back as [`Record::Comment`].
    ///
    /// # Errors
    /// Returns a [`ParseError`] describing the first malformed field
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(text) = line.strip_prefix('#') {
            return Ok(Self::Comment(text.to_string()));
        }
        if let Some(rest) = line.strip_prefix('T') {
            return parse_vector(rest).map(Self::Vector);
        }
        if let Some(rest) = line.strip_prefix('E') {
            return parse_edges(rest).map(Self::Edges);
        }

        let (tag, rest) = line.split_once(':').ok_or_else(|| ParseError::UnknownTag(line.to_string()))?;
        let mut fields = rest.split_whitespace();
        match tag {
            "P" => {
                let tag = next_field(&mut fields, "kind")?;
                let kind = ProfileKind::from_tag(tag)
                    .ok_or_else(|| ParseError::UnknownKind(tag.to_string()))?;
                let version = parse_u32(next_field(&mut fields, "version")?)?;
                let rep = next_field(&mut fields, "rep")?;
                let rep_iterations = match rep.strip_prefix("rep=") {
                    Some("1") => true,
                    Some("0") => false,
                    _ => return Err(ParseError::InvalidNumber(rep.to_string())),
                };
                Ok(Self::Header { kind, version, rep_iterations })
            }
            "S" => Ok(Self::SliceStart {
                address: parse_hex(next_field(&mut fields, "address")?)?,
                module: parse_u32(next_field(&mut fields, "module")?)?,
                count: parse_u64(next_field(&mut fields, "count")?)?,
            }),
            "M" => Ok(Self::Marker {
                address: parse_hex(next_field(&mut fields, "address")?)?,
                module: parse_u32(next_field(&mut fields, "module")?)?,
                count: parse_u64(next_field(&mut fields, "count")?)?,
                cumulative: parse_u64(next_field(&mut fields, "cumulative")?)?,
                rep_iterations: parse_u64(next_field(&mut fields, "rep_iterations")?)?,
            }),
            "I" => {
                let id = parse_u32(next_field(&mut fields, "module")?)?;
                let base = parse_hex(next_field(&mut fields, "base")?)?;
                let name: Vec<&str> = fields.collect();
                let name = if name.is_empty() { None } else { Some(name.join(" ")) };
                Ok(Self::Module { id, base, name })
            }
            "B" => Ok(Self::Block {
                id: parse_u32(next_field(&mut fields, "id")?)?,
                start: parse_hex(next_field(&mut fields, "start")?)?,
                end: parse_hex(next_field(&mut fields, "end")?)?,
                size: parse_u64(next_field(&mut fields, "size")?)?,
                instructions: parse_u64(next_field(&mut fields, "instructions")?)?,
                module: parse_u32(next_field(&mut fields, "module")?)?,
                count: parse_u64(next_field(&mut fields, "count")?)?,
                slice_start: parse_u64(next_field(&mut fields, "slice_start")?)? != 0,
            }),
            "X" => Ok(Self::End {
                cumulative: parse_u64(next_field(&mut fields, "cumulative")?)?,
                slices: parse_u64(next_field(&mut fields, "slices")?)?,
            }),
            other => Err(ParseError::UnknownTag(other.to_string())),
        }
    }
}

fn next_field<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<&'a str, ParseError> {
    fields.next().ok_or(ParseError::MissingField(name))
}

fn parse_u64(text: &str) -> Result<u64, ParseError> {
    text.parse().map_err(|_| ParseError::InvalidNumber(text.to_string()))
}

fn parse_u32(text: &str) -> Result<u32, ParseError> {
    text.parse().map_err(|_| ParseError::InvalidNumber(text.to_string()))
}

fn parse_hex(text: &str) -> Result<u64, ParseError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| ParseError::InvalidNumber(text.to_string()))?;
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidNumber(text.to_string()))
}

/// Split `:a:b:c` style tokens into their numeric parts
fn sparse_parts(token: &str) -> Result<Vec<&str>, ParseError> {
    let body = token.strip_prefix(':').ok_or_else(|| ParseError::InvalidEntry(token.to_string()))?;
    Ok(body.split(':').collect())
}

fn parse_vector(rest: &str) -> Result<Vec<VectorEntry>, ParseError> {
    rest.split_whitespace()
        .map(|token| match sparse_parts(token)?.as_slice() {
            [index, count] => Ok(VectorEntry { index: parse_u32(index)?, count: parse_u64(count)? }),
            _ => Err(ParseError::InvalidEntry(token.to_string())),
        })
        .collect()
}

fn parse_edges(rest: &str) -> Result<Vec<EdgeEntry>, ParseError> {
    rest.split_whitespace()
        .map(|token| match sparse_parts(token)?.as_slice() {
            [from, to, count] => Ok(EdgeEntry {
                from: parse_u32(from)?,
                to: parse_u32(to)?,
                count: parse_u64(count)?,
            }),
            _ => Err(ParseError::InvalidEntry(token.to_string())),
        })
        .collect()
}
