#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

mod config;
mod connection;
mod error;
mod event;
mod flags;
mod flow_control;
mod frame;
mod headers;
mod settings;
mod stream;
mod types;

pub use bytes::Bytes;
pub use config::{Config, HeaderEncoding};
pub use connection::{Connection, ConnectionState};
pub use error::{ConnectionError, EngineError, NoAvailableStreamId, NoSuchStreamError, StreamClosedError, StreamError};
pub use event::Event;
pub use settings::SettingsRegistry;
pub use stream::{ClosedReason, Stream, StreamState};
pub use types::{ErrorCode, FrameType, HeaderField, Headers, Role, SettingsParameter, StreamId};
