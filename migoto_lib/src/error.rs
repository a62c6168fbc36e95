use std::path::PathBuf;

use thiserror::Error;

use crate::{filename::ParseFileNameError, frame_log::ParseLogError};

#[derive(Debug, Error)]
pub enum LoadDumpError {
    #[error("error reading frame dump directory")]
    Io(#[from] std::io::Error),

    #[error("frame dump log {0:?} does not exist")]
    MissingLog(PathBuf),

    #[error("error parsing resource file name")]
    FileName(#[from] ParseFileNameError),

    #[error("error parsing frame dump log")]
    Log(#[from] ParseLogError),

    #[error("resource {name:?} does not belong to call {call_id}")]
    CallIdMismatch { name: String, call_id: u32 },
}
