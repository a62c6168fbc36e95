//! A library for reading the files of a 3DMigoto frame dump.
//!
//! A frame dump captures the resources bound for every draw and dispatch call of a single frame.
//! File names encode the call, slot, and content hash of each resource
//! but not what the bytes represent or which calls produced them.
//!
//! # Getting Started
//! ```rust no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dump = migoto_lib::dump::Dump::from_dir("FrameAnalysis-2024-05-01-120000")?;
//! for call in dump.calls.values() {
//!     println!("{}: {} resources", call.id, call.resources.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! Binary resources are decoded with a [semantic::BufferLayout] describing the fields of each element.
//! A [buffer::ByteBuffer] stores each field separately and checks that every field
//! has the same number of elements after each modification.
//! This makes it possible to merge and slice buffers by semantic
//! without knowing the byte layout of the source data.
//!
//! Resource file contents are only read on demand and never retained by the [dump::Dump].
pub mod buffer;
pub mod dump;
pub mod error;
pub mod filename;
pub mod format;
pub mod frame_log;
pub mod index;
pub mod semantic;
pub mod vertex_format;
