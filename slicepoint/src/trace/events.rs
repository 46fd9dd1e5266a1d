//! Textual region-event traces
//!
//! One event per line, `#` starts a comment:
//!
//! ```text
//! module <id> 0x<base> <name>
//! unload <id>
//! start <tid>
//! block <tid> 0x<start> 0x<end> <size> <instructions> <module>
//! mem <tid> 0x<addr> [agen]
//! rep <tid> <first|next>
//! finish <tid>
//! ```

use std::fmt;

use crate::domain::{Address, ModuleId, ThreadId, TraceError};

/// A code region execution as an instrumentation probe reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockEvent {
    pub start: Address,
    pub end: Address,
    pub size: u64,
    pub instructions: u64,
    pub module: ModuleId,
}

/// Events routed to a single thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    Block(BlockEvent),
    Memory { addr: Address, agen: bool },
    Rep { first: bool },
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    ModuleLoad { id: ModuleId, base: Address, name: String },
    ModuleUnload(ModuleId),
    ThreadStart(ThreadId),
    Thread(ThreadId, ThreadEvent),
}

impl TraceEvent {
    /// Parse one trace line; blank lines and comments give `None`
    ///
    /// # Errors
    /// Returns an error naming `line` if the event is unknown or malformed
    pub fn parse(line: usize, text: &str) -> Result<Option<Self>, TraceError> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(None);
        }

        let mut fields = Fields { line, parts: text.split_whitespace() };
        let event = fields.next("event")?;
        let parsed = match event {
            "module" => {
                let id = ModuleId(fields.number("module id")?);
                let base = fields.address("base")?;
                let name = fields.parts.collect::<Vec<_>>().join(" ");
                Self::ModuleLoad { id, base, name }
            }
            "unload" => Self::ModuleUnload(ModuleId(fields.number("module id")?)),
            "start" => Self::ThreadStart(fields.tid()?),
            "block" => {
                let tid = fields.tid()?;
                let block = BlockEvent {
                    start: fields.address("start")?,
                    end: fields.address("end")?,
                    size: fields.number("size")?,
                    instructions: fields.number("instructions")?,
                    module: ModuleId(fields.number("module")?),
                };
                if block.end < block.start {
                    return Err(TraceError::InvalidField {
                        line,
                        field: "end",
                        value: block.end.to_string(),
                    });
                }
                Self::Thread(tid, ThreadEvent::Block(block))
            }
            "mem" => {
                let tid = fields.tid()?;
                let addr = fields.address("address")?;
                let agen = match fields.parts.next() {
                    None => false,
                    Some("agen") => true,
                    Some(other) => return Err(fields.invalid("access kind", other)),
                };
                Self::Thread(tid, ThreadEvent::Memory { addr, agen })
            }
            "rep" => {
                let tid = fields.tid()?;
                let first = match fields.next("iteration")? {
                    "first" => true,
                    "next" => false,
                    other => return Err(fields.invalid("iteration", other)),
                };
                Self::Thread(tid, ThreadEvent::Rep { first })
            }
            "finish" => Self::Thread(fields.tid()?, ThreadEvent::Finish),
            other => return Err(TraceError::UnknownEvent { line, event: other.to_string() }),
        };
        Ok(Some(parsed))
    }

    /// Thread the event belongs to, if any
    #[must_use]
    pub fn tid(&self) -> Option<ThreadId> {
        match self {
            Self::ThreadStart(tid) | Self::Thread(tid, _) => Some(*tid),
            Self::ModuleLoad { .. } | Self::ModuleUnload(_) => None,
        }
    }
}

/// Parse a whole trace
///
/// # Errors
/// Returns the first malformed line
pub fn parse_trace(content: &str) -> Result<Vec<TraceEvent>, TraceError> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, text)| TraceEvent::parse(idx + 1, text).transpose())
        .collect()
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModuleLoad { id, base, name } => write!(f, "module {} {} {}", id.0, base, name),
            Self::ModuleUnload(id) => write!(f, "unload {}", id.0),
            Self::ThreadStart(tid) => write!(f, "start {}", tid.0),
            Self::Thread(tid, ThreadEvent::Block(block)) => write!(
                f,
                "block {} {} {} {} {} {}",
                tid.0, block.start, block.end, block.size, block.instructions, block.module.0
            ),
            Self::Thread(tid, ThreadEvent::Memory { addr, agen }) => {
                write!(f, "mem {} {}{}", tid.0, addr, if *agen { " agen" } else { "" })
            }
            Self::Thread(tid, ThreadEvent::Rep { first }) => {
                write!(f, "rep {} {}", tid.0, if *first { "first" } else { "next" })
            }
            Self::Thread(tid, ThreadEvent::Finish) => write!(f, "finish {}", tid.0),
        }
    }
}

struct Fields<'a> {
    line: usize,
    parts: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn next(&mut self, field: &'static str) -> Result<&'a str, TraceError> {
        self.parts.next().ok_or(TraceError::MissingField { line: self.line, field })
    }

    fn invalid(&self, field: &'static str, value: &str) -> TraceError {
        TraceError::InvalidField { line: self.line, field, value: value.to_string() }
    }

    fn number<T: std::str::FromStr>(&mut self, field: &'static str) -> Result<T, TraceError> {
        let text = self.next(field)?;
        text.parse().map_err(|_| self.invalid(field, text))
    }

    fn tid(&mut self) -> Result<ThreadId, TraceError> {
        self.number("tid").map(ThreadId)
    }

    fn address(&mut self, field: &'static str) -> Result<Address, TraceError> {
        let text = self.next(field)?;
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .ok_or_else(|| self.invalid(field, text))?;
        u64::from_str_radix(digits, 16).map(Address).map_err(|_| self.invalid(field, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        let trace = "\
# two threads
module 1 0x400000 /usr/bin/app
start 0
block 0 0x401000 0x401010 20 5 1
mem 0 0x7fff0040 agen
rep 0 next

finish 0
unload 1
";
        let events = parse_trace(trace).unwrap();
        assert_eq!(events.len(), 7);
        assert_eq!(
            events[0],
            TraceEvent::ModuleLoad {
                id: ModuleId(1),
                base: Address(0x40_0000),
                name: "/usr/bin/app".into()
            }
        );
        assert_eq!(
            events[2],
            TraceEvent::Thread(
                ThreadId(0),
                ThreadEvent::Block(BlockEvent {
                    start: Address(0x40_1000),
                    end: Address(0x40_1010),
                    size: 20,
                    instructions: 5,
                    module: ModuleId(1),
                })
            )
        );
        assert_eq!(
            events[3],
            TraceEvent::Thread(ThreadId(0), ThreadEvent::Memory { addr: Address(0x7fff_0040), agen: true })
        );
        assert_eq!(events[6], TraceEvent::ModuleUnload(ModuleId(1)));
    }

    #[test]
    fn test_module_name_keeps_spaces() {
        let event = TraceEvent::parse(1, "module 2 0x1000 My Library.dll").unwrap().unwrap();
        assert!(matches!(event, TraceEvent::ModuleLoad { name, .. } if name == "My Library.dll"));
    }

    #[test]
    fn test_display_parses_back() {
        let event = TraceEvent::Thread(
            ThreadId(3),
            ThreadEvent::Block(BlockEvent {
                start: Address(0x10),
                end: Address(0x1c),
                size: 16,
                instructions: 4,
                module: ModuleId(0),
            }),
        );
        assert_eq!(event.to_string(), "block 3 0x10 0x1c 16 4 0");
        assert_eq!(TraceEvent::parse(1, &event.to_string()).unwrap(), Some(event));
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(
            TraceEvent::parse(4, "jump 0").unwrap_err(),
            TraceError::UnknownEvent { line: 4, event: "jump".into() }
        );
        assert_eq!(
            TraceEvent::parse(5, "block 0 0x10").unwrap_err(),
            TraceError::MissingField { line: 5, field: "end" }
        );
        assert!(matches!(
            TraceEvent::parse(6, "block 0 0x20 0x10 4 1 0"),
            Err(TraceError::InvalidField { field: "end", .. })
        ));
        assert!(matches!(
            TraceEvent::parse(7, "mem 0 1234"),
            Err(TraceError::InvalidField { field: "address", .. })
        ));
        assert!(matches!(
            TraceEvent::parse(8, "rep 0 later"),
            Err(TraceError::InvalidField { field: "iteration", .. })
        ));
    }
}
