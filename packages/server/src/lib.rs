#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod context;
mod listener;
mod session;

pub use context::ConnectionContext;
pub use listener::{run, serve};
pub use session::{CONNECT_FAILED, INVALID_PARAMETERS, SessionError, handle_connection};
