//! Error taxonomy (C8): scope (stream vs connection) crossed with kind.

use crate::types::{ErrorCode, StreamId};

/// An error that resolves by resetting a single stream (RST_STREAM).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream {stream_id} is closed")]
    StreamClosed { stream_id: StreamId },
    #[error("stream {stream_id} flow-control window exceeded")]
    FlowControlError { stream_id: StreamId },
    #[error("stream {stream_id} protocol error: {reason}")]
    ProtocolError { stream_id: StreamId, reason: &'static str },
}

impl StreamError {
    pub fn stream_id(&self) -> StreamId {
        match self {
            StreamError::StreamClosed { stream_id }
            | StreamError::FlowControlError { stream_id }
            | StreamError::ProtocolError { stream_id, .. } => *stream_id,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            StreamError::StreamClosed { .. } => ErrorCode::StreamClosed,
            StreamError::FlowControlError { .. } => ErrorCode::FlowControlError,
            StreamError::ProtocolError { .. } => ErrorCode::ProtocolError,
        }
    }
}

/// An error that resolves by tearing down the whole connection (GOAWAY).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("generic protocol error: {0}")]
    ProtocolError(&'static str),
    #[error("frame exceeds locally advertised MAX_FRAME_SIZE")]
    FrameTooLarge,
    #[error("connection flow-control window exceeded")]
    FlowControlError,
    #[error("too many concurrent streams")]
    TooManyStreams,
    #[error("new stream id is not greater than a previously used id of the same parity")]
    StreamIdTooLow,
    #[error("invalid SETTINGS value for {parameter:?}: {value}")]
    InvalidSettingsValue {
        parameter: crate::types::SettingsParameter,
        value: u32,
    },
    #[error("peer exhibits excessive, load-generating behavior: {0}")]
    DenialOfService(&'static str),
    #[error("HPACK compression state could not be maintained: {0}")]
    CompressionError(String),
}

impl ConnectionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ConnectionError::ProtocolError(_) => ErrorCode::ProtocolError,
            ConnectionError::FrameTooLarge => ErrorCode::FrameSizeError,
            ConnectionError::FlowControlError => ErrorCode::FlowControlError,
            ConnectionError::TooManyStreams => ErrorCode::RefusedStream,
            ConnectionError::StreamIdTooLow => ErrorCode::ProtocolError,
            ConnectionError::InvalidSettingsValue { .. } => ErrorCode::ProtocolError,
            ConnectionError::DenialOfService(_) => ErrorCode::EnhanceYourCalm,
            ConnectionError::CompressionError(_) => ErrorCode::CompressionError,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("no such stream: {stream_id}")]
pub struct NoSuchStreamError {
    pub stream_id: StreamId,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("stream {stream_id} was closed and has since been garbage-collected")]
pub struct StreamClosedError {
    pub stream_id: StreamId,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no available stream id remains for this endpoint")]
pub struct NoAvailableStreamId;

/// Unifies every error variant a host-facing call can return.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    NoSuchStream(#[from] NoSuchStreamError),
    #[error(transparent)]
    StreamClosed(#[from] StreamClosedError),
    #[error(transparent)]
    NoAvailableStreamId(#[from] NoAvailableStreamId),
    /// The connection already shut down; only `data_to_send` remains meaningful.
    #[error("connection is shut down")]
    ConnectionClosed,
}
