//! Stream state machine (C5), per RFC 7540 §5.1's state diagram.

use crate::error::StreamError;
use crate::flow_control::StreamFlow;
use crate::types::{ErrorCode, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Why a stream moved to `Closed`, kept around for the grace period before
/// the connection garbage-collects its entry (spec.md C6's tombstone rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    EndStreamBothDirections,
    ResetByLocal(ErrorCode),
    ResetByRemote(ErrorCode),
}

#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub state: StreamState,
    pub flow: StreamFlow,
    pub closed_reason: Option<ClosedReason>,
    pub content_length: Option<u64>,
    pub bytes_received: u64,
    pub weight: u8,
}

impl Stream {
    pub fn new(id: StreamId, initial_send: u32, initial_recv: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            flow: StreamFlow::new(initial_send, initial_recv),
            closed_reason: None,
            content_length: None,
            bytes_received: 0,
            weight: 16,
        }
    }

    pub fn reserved_local(id: StreamId, initial_send: u32, initial_recv: u32) -> Self {
        let mut stream = Self::new(id, initial_send, initial_recv);
        stream.state = StreamState::ReservedLocal;
        stream
    }

    pub fn reserved_remote(id: StreamId, initial_send: u32, initial_recv: u32) -> Self {
        let mut stream = Self::new(id, initial_send, initial_recv);
        stream.state = StreamState::ReservedRemote;
        stream
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    fn idle_or_other_error(&self, other: StreamState) -> StreamError {
        if other == StreamState::Idle {
            StreamError::ProtocolError {
                stream_id: self.id,
                reason: "frame not permitted in the idle state",
            }
        } else {
            StreamError::StreamClosed { stream_id: self.id }
        }
    }

    /// Applies the effect of sending a HEADERS frame from this endpoint.
    pub fn send_headers(&mut self, end_stream: bool) -> Result<(), StreamError> {
        self.state = match self.state {
            StreamState::Idle => {
                if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                }
            }
            StreamState::ReservedLocal => {
                if end_stream {
                    self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedRemote
                }
            }
            StreamState::Open if end_stream => StreamState::HalfClosedLocal,
            StreamState::Open => StreamState::Open,
            StreamState::HalfClosedRemote if end_stream => {
                self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                StreamState::Closed
            }
            StreamState::HalfClosedRemote => StreamState::HalfClosedRemote,
            other => return Err(self.idle_or_other_error(other)),
        };
        Ok(())
    }

    /// Applies the effect of receiving a HEADERS frame from the peer.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), StreamError> {
        self.state = match self.state {
            StreamState::Idle => {
                if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                }
            }
            StreamState::ReservedRemote => {
                if end_stream {
                    self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedLocal
                }
            }
            StreamState::Open if end_stream => StreamState::HalfClosedRemote,
            StreamState::Open => StreamState::Open,
            StreamState::HalfClosedLocal if end_stream => {
                self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                StreamState::Closed
            }
            StreamState::HalfClosedLocal => StreamState::HalfClosedLocal,
            other => return Err(self.idle_or_other_error(other)),
        };
        Ok(())
    }

    pub fn send_data(&mut self, end_stream: bool, len: u32) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote => {}
            other => return Err(self.idle_or_other_error(other)),
        }
        if !self.flow.send.try_consume(len) {
            return Err(StreamError::FlowControlError { stream_id: self.id });
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => {
                    self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                    StreamState::Closed
                }
                other => other,
            };
        }
        Ok(())
    }

    pub fn recv_data(&mut self, end_stream: bool, len: u32) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            other => return Err(self.idle_or_other_error(other)),
        }
        self.bytes_received += len as u64;
        if let Some(expected) = self.content_length {
            if self.bytes_received > expected {
                return Err(StreamError::ProtocolError {
                    stream_id: self.id,
                    reason: "received DATA exceeds the declared content-length",
                });
            }
        }
        self.flow
            .recv
            .consume_recv(len)
            .map_err(|_| StreamError::FlowControlError { stream_id: self.id })?;
        if end_stream {
            if let Some(expected) = self.content_length {
                if self.bytes_received != expected {
                    return Err(StreamError::ProtocolError {
                        stream_id: self.id,
                        reason: "total DATA bytes received does not match content-length",
                    });
                }
            }
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => {
                    self.closed_reason = Some(ClosedReason::EndStreamBothDirections);
                    StreamState::Closed
                }
                other => other,
            };
        }
        Ok(())
    }

    pub fn reset_by_local(&mut self, error_code: ErrorCode) {
        self.state = StreamState::Closed;
        self.closed_reason = Some(ClosedReason::ResetByLocal(error_code));
    }

    pub fn reset_by_remote(&mut self, error_code: ErrorCode) {
        self.state = StreamState::Closed;
        self.closed_reason = Some(ClosedReason::ResetByRemote(error_code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_open_on_headers_without_end_stream() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.send_headers(false).unwrap();
        assert_eq!(stream.state, StreamState::Open);
    }

    #[test]
    fn idle_to_half_closed_local_on_headers_with_end_stream() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.send_headers(true).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
    }

    #[test]
    fn both_sides_end_stream_closes_the_stream() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.send_headers(false).unwrap();
        stream.recv_headers(false).unwrap();
        stream.send_data(true, 0).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
        stream.recv_data(true, 0).unwrap();
        assert_eq!(stream.state, StreamState::Closed);
        assert_eq!(stream.closed_reason, Some(ClosedReason::EndStreamBothDirections));
    }

    #[test]
    fn data_on_a_closed_stream_is_a_stream_error() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.reset_by_remote(ErrorCode::Cancel);
        assert!(stream.recv_data(false, 1).is_err());
    }

    #[test]
    fn send_data_exceeding_flow_window_fails() {
        let mut stream = Stream::new(1, 10, 65_535);
        stream.send_headers(false).unwrap();
        let err = stream.send_data(false, 20).unwrap_err();
        assert!(matches!(err, StreamError::FlowControlError { .. }));
    }

    #[test]
    fn content_length_overrun_is_a_stream_protocol_error() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.content_length = Some(5);
        stream.recv_headers(false).unwrap();
        let err = stream.recv_data(false, 10).unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError { .. }));
    }

    #[test]
    fn content_length_underrun_at_end_stream_is_a_stream_protocol_error() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream.content_length = Some(5);
        stream.recv_headers(false).unwrap();
        stream.recv_data(false, 2).unwrap();
        let err = stream.recv_data(true, 0).unwrap_err();
        assert!(matches!(err, StreamError::ProtocolError { .. }));
    }
}
