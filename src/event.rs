//! Event model (C7): the tagged union of notifications the engine hands
//! back to the host after feeding it inbound bytes.

use crate::types::{ErrorCode, Headers, SettingsParameter, StreamId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A request HEADERS block completed on `stream_id` (server role only).
    RequestReceived {
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    },
    /// A non-1xx response HEADERS block completed on `stream_id` (client
    /// role only).
    ResponseReceived {
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    },
    /// A 1xx informational response HEADERS block (client role only); never
    /// carries `end_stream`, since a 1xx can't close a stream.
    InformationalResponseReceived {
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    },
    DataReceived {
        stream_id: StreamId,
        data: Vec<u8>,
        end_stream: bool,
    },
    TrailersReceived { stream_id: StreamId, trailers: Headers },
    /// Emitted alongside the primary message event when the HEADERS frame
    /// carried a PRIORITY prefix; co-emitted so the host doesn't have to dig
    /// it out.
    PriorityUpdated {
        stream_id: StreamId,
        dependency: StreamId,
        exclusive: bool,
        weight: u8,
    },
    /// Emitted whenever an inbound frame carries END_STREAM, always as a
    /// sibling following the primary message event and `PriorityUpdated`
    /// (spec.md §4.7's related-events ordering rule).
    StreamEnded { stream_id: StreamId },
    /// `remote_reset` is `true` when the peer itself sent RST_STREAM, and
    /// `false` when this engine reset the stream locally in response to a
    /// peer protocol violation.
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
        remote_reset: bool,
    },
    PushPromiseReceived {
        parent_stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: Headers,
    },
    SettingsAcknowledged,
    WindowUpdateReceived { stream_id: Option<StreamId>, increment: u32 },
    PingReceived { payload: [u8; 8] },
    PingAcknowledged { payload: [u8; 8] },
    RemoteSettingsChanged { changed: Vec<(SettingsParameter, u32)> },
    ConnectionTerminated {
        error_code: ErrorCode,
        last_stream_id: StreamId,
        debug_data: Vec<u8>,
    },
    AlternativeServiceAdvertised {
        origin: Option<String>,
        field_value: Vec<u8>,
    },
}
