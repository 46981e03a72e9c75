#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod codec;
pub mod command;
pub mod messages;
pub mod params;

pub use codec::{Frame, MAX_LINE_LEN, ReplCodec, Response, ResponseCodec, SYNC_MARKER};
pub use command::Command;
pub use messages::{QueryResult, Row};
pub use params::{ConnectionParams, ParamsError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Frame of {0} bytes does not fit in a u32 length prefix")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
    #[error("Connection closed before a complete line was read")]
    UnexpectedEof,
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}
