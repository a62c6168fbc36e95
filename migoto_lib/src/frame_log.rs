//! Call parameters from the `log.txt` file of a frame dump.
//!
//! Each entry starts with a six digit call id followed by the logged API call.
//! Lines without a call id continue the previous entry.
//!
//! ```text
//! 000012 Dispatch(ThreadGroupCountX:32, ThreadGroupCountY:4, ThreadGroupCountZ:1)
//! 000013 DrawIndexed(IndexCount:3000, StartIndexLocation:0, BaseVertexLocation:0)
//! ```
use std::{collections::BTreeMap, path::Path, str::FromStr};

use thiserror::Error;

const CALL_ID_DIGITS: usize = 6;

#[derive(Debug, Error)]
pub enum ParseLogError {
    #[error("error reading log file")]
    Io(#[from] std::io::Error),

    #[error("log line {line} starts call {call_id} after its entries were already finished")]
    CallIdReused { line: usize, call_id: u32 },

    #[error("call {call_id} has conflicting {name} parameters")]
    ConflictingParameters { call_id: u32, name: &'static str },

    #[error("invalid {name} parameters for call {call_id} in entry {entry:?}")]
    InvalidParameters {
        call_id: u32,
        name: &'static str,
        entry: String,
    },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Dispatch {
    pub thread_group_count_x: u32,
    pub thread_group_count_y: u32,
    pub thread_group_count_z: u32,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub start_index_location: u32,
    pub base_vertex_location: i32,
}

/// The recognized parameters logged for a single call.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct CallParameters {
    pub dispatch: Option<Dispatch>,
    pub draw_indexed: Option<DrawIndexed>,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct FrameLog {
    pub calls: BTreeMap<u32, CallParameters>,
}

impl FrameLog {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseLogError> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    pub fn parameters(&self, call_id: u32) -> Option<&CallParameters> {
        self.calls.get(&call_id)
    }
}

impl FromStr for FrameLog {
    type Err = ParseLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut calls = BTreeMap::new();

        // Entries for a call are always contiguous.
        let mut current: Option<(u32, Vec<&str>)> = None;
        for (i, line) in s.lines().enumerate() {
            match parse_call_id(line) {
                Some(call_id) => {
                    if let Some((id, entry)) = current.take() {
                        import_entry(&mut calls, id, &entry.join(" "))?;
                        if id != call_id && calls.contains_key(&call_id) {
                            return Err(ParseLogError::CallIdReused {
                                line: i + 1,
                                call_id,
                            });
                        }
                    }
                    calls.entry(call_id).or_insert_with(CallParameters::default);
                    let text = line.get(CALL_ID_DIGITS + 1..).unwrap_or_default();
                    current = Some((call_id, vec![text]));
                }
                None => {
                    // Lines before the first call are ignored.
                    if let Some((_, entry)) = &mut current {
                        entry.push(line.trim());
                    }
                }
            }
        }
        if let Some((id, entry)) = current {
            import_entry(&mut calls, id, &entry.join(" "))?;
        }

        Ok(Self { calls })
    }
}

fn parse_call_id(line: &str) -> Option<u32> {
    let digits = line.get(..CALL_ID_DIGITS)?;
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn import_entry(
    calls: &mut BTreeMap<u32, CallParameters>,
    call_id: u32,
    entry: &str,
) -> Result<(), ParseLogError> {
    let parameters = calls.entry(call_id).or_default();

    if let Some(values) = parse_call(call_id, entry, "Dispatch", [
        "ThreadGroupCountX",
        "ThreadGroupCountY",
        "ThreadGroupCountZ",
    ])? {
        let dispatch = Dispatch {
            thread_group_count_x: parse_value(call_id, entry, "Dispatch", values[0])?,
            thread_group_count_y: parse_value(call_id, entry, "Dispatch", values[1])?,
            thread_group_count_z: parse_value(call_id, entry, "Dispatch", values[2])?,
        };
        set_parameter(&mut parameters.dispatch, dispatch, call_id, "Dispatch")?;
    }

    if let Some(values) = parse_call(call_id, entry, "DrawIndexed", [
        "IndexCount",
        "StartIndexLocation",
        "BaseVertexLocation",
    ])? {
        let draw_indexed = DrawIndexed {
            index_count: parse_value(call_id, entry, "DrawIndexed", values[0])?,
            start_index_location: parse_value(call_id, entry, "DrawIndexed", values[1])?,
            base_vertex_location: parse_value(call_id, entry, "DrawIndexed", values[2])?,
        };
        set_parameter(&mut parameters.draw_indexed, draw_indexed, call_id, "DrawIndexed")?;
    }

    Ok(())
}

/// Split an entry like `Name(A:1, B:2, C:3)` into its values.
/// Entries for other calls return `None`.
fn parse_call<'a>(
    call_id: u32,
    entry: &'a str,
    name: &'static str,
    keys: [&str; 3],
) -> Result<Option<[&'a str; 3]>, ParseLogError> {
    let Some(args) = entry
        .strip_prefix(name)
        .and_then(|e| e.strip_prefix('('))
    else {
        return Ok(None);
    };

    let invalid = || ParseLogError::InvalidParameters {
        call_id,
        name,
        entry: entry.to_string(),
    };

    let args = args.split_once(')').map(|(a, _)| a).ok_or_else(invalid)?;
    let mut values = [""; 3];
    let mut parts = args.split(", ");
    for (key, value) in keys.iter().zip(values.iter_mut()) {
        *value = parts
            .next()
            .and_then(|p| p.strip_prefix(key))
            .and_then(|p| p.strip_prefix(':'))
            .ok_or_else(invalid)?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(Some(values))
}

fn parse_value<T: FromStr>(
    call_id: u32,
    entry: &str,
    name: &'static str,
    value: &str,
) -> Result<T, ParseLogError> {
    value.parse().map_err(|_| ParseLogError::InvalidParameters {
        call_id,
        name,
        entry: entry.to_string(),
    })
}

fn set_parameter<T: PartialEq>(
    parameter: &mut Option<T>,
    value: T,
    call_id: u32,
    name: &'static str,
) -> Result<(), ParseLogError> {
    match parameter {
        Some(existing) if *existing != value => {
            Err(ParseLogError::ConflictingParameters { call_id, name })
        }
        _ => {
            *parameter = Some(value);
            Ok(())
        }
    }
}
