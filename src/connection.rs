//! Connection state machine (C6) and the public host-facing contract (C9).

use crate::config::Config;
use crate::error::{ConnectionError, EngineError, NoAvailableStreamId, NoSuchStreamError, StreamClosedError};
use crate::event::Event;
use crate::flags::{ContinuationFlags, DataFlags, HeadersFlags, PushPromiseFlags, SettingsFlags};
use crate::flow_control::ConnectionFlow;
use crate::frame::{
    self, parse_data_payload, parse_headers_payload, parse_push_promise_payload, parse_settings_payload, RawFrame,
};
use crate::headers::{HeaderBlockAssembler, HeaderCodec};
use crate::settings::SettingsRegistry;
use crate::stream::{Stream, StreamState};
use crate::types::{
    ErrorCode, FrameType, Headers, Role, SettingsParameter, StreamId, CONNECTION_PREFACE, U31_MAX,
};
use bytes::{Bytes, BytesMut};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Server only: the client connection preface has not arrived yet.
    AwaitingPreface,
    Active,
    /// A GOAWAY has been sent or received; existing streams may finish.
    Closing,
    Closed,
}

/// A stream whose id has been returned to the host but is being kept around
/// only so that frames the peer had already in flight don't produce a
/// spurious connection error (spec.md C6's "tombstone" grace window).
struct Tombstone {
    frames_remaining: u32,
}

pub struct Connection {
    pub config: Config,
    pub state: ConnectionState,
    pub settings: SettingsRegistry,
    flow: ConnectionFlow,
    header_codec: HeaderCodec,
    assembler: HeaderBlockAssembler,
    streams: std::collections::HashMap<StreamId, Stream>,
    tombstones: std::collections::HashMap<StreamId, Tombstone>,
    next_local_stream_id: StreamId,
    highest_remote_stream_id: StreamId,
    recv_buf: BytesMut,
    outbound: BytesMut,
    preface_consumed: bool,
    goaway_sent: bool,
    goaway_received: bool,
    pending_settings_ack: bool,
}

impl Connection {
    pub fn new(config: Config) -> Self {
        let role = config.role;
        let initial_window = config.initial_window_size;
        let mut connection = Self {
            state: if role == Role::Server {
                ConnectionState::AwaitingPreface
            } else {
                ConnectionState::Active
            },
            settings: SettingsRegistry::new(),
            flow: ConnectionFlow::new(65_535, initial_window),
            header_codec: HeaderCodec::new(),
            assembler: HeaderBlockAssembler::default(),
            streams: std::collections::HashMap::new(),
            tombstones: std::collections::HashMap::new(),
            next_local_stream_id: if role.initiates_odd() { 1 } else { 2 },
            highest_remote_stream_id: 0,
            recv_buf: BytesMut::new(),
            outbound: BytesMut::new(),
            preface_consumed: role == Role::Client,
            goaway_sent: false,
            goaway_received: false,
            pending_settings_ack: false,
            config,
        };
        // A server never sends the connection preface, but both roles must
        // send an opening SETTINGS frame (RFC 7540 §3.5); a client defers
        // it to `initiate_connection` so it lands after the preface bytes.
        if role == Role::Server {
            connection.emit_local_settings_frame(Self::initial_settings_values());
        }
        connection
    }

    /// The values in `SettingsRegistry::local`'s defaults that differ from
    /// the RFC 7540 §6.5.2 protocol defaults, and therefore must actually be
    /// announced in the opening SETTINGS frame for the peer to learn them.
    fn initial_settings_values() -> Vec<(SettingsParameter, u32)> {
        vec![(SettingsParameter::MaxConcurrentStreams, 100)]
    }

    /// Client only: writes the connection preface and the opening SETTINGS
    /// frame to the outbound buffer.
    pub fn initiate_connection(&mut self) -> Result<(), EngineError> {
        if self.config.role != Role::Client {
            return Err(ConnectionError::ProtocolError("only a client initiates a connection").into());
        }
        self.outbound.extend_from_slice(CONNECTION_PREFACE);
        self.emit_local_settings_frame(Self::initial_settings_values());
        Ok(())
    }

    /// Server only: accepts an h2c upgrade. `settings_payload` is the
    /// already base64-decoded value of the client's HTTP2-Settings header;
    /// stream 1 is implicitly half-closed (local) since the triggering
    /// HTTP/1.1 request carried no request body frames of its own.
    pub fn initiate_upgrade_connection(&mut self, settings_payload: &[u8]) -> Result<StreamId, EngineError> {
        if self.config.role != Role::Server {
            return Err(ConnectionError::ProtocolError("only a server accepts an upgrade").into());
        }
        let values = parse_settings_payload(settings_payload)?;
        let pairs: Vec<_> = values
            .into_iter()
            .filter_map(|w| <crate::types::SettingsParameter as SettingsParameterFromWire>::from_wire(w.id, w.value))
            .collect();
        // No streams exist yet at upgrade time, so there's nothing to shift
        // if this batch touches INITIAL_WINDOW_SIZE.
        self.settings.receive_remote_settings(&pairs)?;
        self.preface_consumed = true;
        self.state = ConnectionState::Active;
        self.emit_local_settings_frame(Self::initial_settings_values());
        let stream_id = 1;
        let mut stream = Stream::new(stream_id, self.settings.remote[SettingsParameter::InitialWindowSize], self.config.initial_window_size);
        stream.state = StreamState::HalfClosedRemote;
        self.streams.insert(stream_id, stream);
        self.highest_remote_stream_id = stream_id;
        Ok(stream_id)
    }

    fn emit_local_settings_frame(&mut self, values: Vec<(SettingsParameter, u32)>) {
        let payload = frame::serialize_settings_payload(&values);
        self.settings.update_local(values);
        self.queue_frame(FrameType::Settings, 0, 0, payload);
    }

    fn queue_frame(&mut self, typ: FrameType, flags: u8, stream_id: StreamId, payload: Bytes) {
        let raw = frame::build_frame(typ, flags, stream_id, payload);
        self.outbound.extend_from_slice(&raw);
    }

    pub fn get_next_available_stream_id(&self) -> StreamId {
        self.next_local_stream_id
    }

    fn allocate_local_stream_id(&mut self) -> Result<StreamId, EngineError> {
        if self.next_local_stream_id > U31_MAX {
            return Err(NoAvailableStreamId.into());
        }
        let id = self.next_local_stream_id;
        self.next_local_stream_id += 2;
        Ok(id)
    }

    fn encode_header_block(&mut self, headers: &Headers) -> Bytes {
        self.header_codec.encode(headers)
    }

    /// Emits a header block (HEADERS or PUSH_PROMISE) split across
    /// CONTINUATION frames as needed to respect the peer's MAX_FRAME_SIZE.
    fn emit_header_block(
        &mut self,
        first_frame_type: FrameType,
        first_payload_prefix: Bytes,
        stream_id: StreamId,
        encoded: Bytes,
        end_stream: bool,
    ) {
        let max = self.settings.remote[SettingsParameter::MaxFrameSize] as usize;
        let budget = max.saturating_sub(first_payload_prefix.len()).max(1);
        let (first_chunk, rest) = if encoded.len() <= budget {
            (encoded.clone(), Bytes::new())
        } else {
            (encoded.slice(0..budget), encoded.slice(budget..))
        };
        let end_headers = rest.is_empty();
        let mut first_payload = BytesMut::with_capacity(first_payload_prefix.len() + first_chunk.len());
        first_payload.extend_from_slice(&first_payload_prefix);
        first_payload.extend_from_slice(&first_chunk);

        let flags = match first_frame_type {
            FrameType::Headers => {
                let mut f = HeadersFlags::empty();
                if end_headers {
                    f |= HeadersFlags::END_HEADERS;
                }
                if end_stream {
                    f |= HeadersFlags::END_STREAM;
                }
                f.bits()
            }
            FrameType::PushPromise => {
                let mut f = PushPromiseFlags::empty();
                if end_headers {
                    f |= PushPromiseFlags::END_HEADERS;
                }
                f.bits()
            }
            _ => unreachable!("only HEADERS and PUSH_PROMISE open a header block"),
        };
        self.queue_frame(first_frame_type, flags, stream_id, first_payload.freeze());

        let mut remaining = rest;
        while !remaining.is_empty() {
            let chunk_len = remaining.len().min(max);
            let chunk = remaining.slice(0..chunk_len);
            remaining = remaining.slice(chunk_len..);
            let last = remaining.is_empty();
            let mut f = ContinuationFlags::empty();
            if last {
                f |= ContinuationFlags::END_HEADERS;
            }
            self.queue_frame(FrameType::Continuation, f.bits(), stream_id, chunk);
        }
    }

    /// Streams counted against MAX_CONCURRENT_STREAMS per RFC 7540 §5.1.2:
    /// open or half-closed, not idle/reserved/closed.
    fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| {
                matches!(
                    s.state,
                    StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
                )
            })
            .count()
    }

    fn get_stream_mut(&mut self, stream_id: StreamId) -> Result<&mut Stream, EngineError> {
        if self.tombstones.contains_key(&stream_id) {
            return Err(StreamClosedError { stream_id }.into());
        }
        self.streams
            .get_mut(&stream_id)
            .ok_or(NoSuchStreamError { stream_id }.into())
    }

    pub fn send_headers(
        &mut self,
        stream_id: Option<StreamId>,
        headers: &Headers,
        end_stream: bool,
    ) -> Result<StreamId, EngineError> {
        if self.config.validate_outbound_headers {
            crate::headers::validate_headers(headers, self.config.role == Role::Server, false)?;
        }
        let headers = self
            .config
            .normalize_outbound_headers
            .map(|hook| hook(headers))
            .unwrap_or_else(|| headers.clone());

        let stream_id = match stream_id {
            Some(id) => {
                self.get_stream_mut(id)?.send_headers(end_stream)?;
                id
            }
            None => {
                let limit = self.settings.remote[SettingsParameter::MaxConcurrentStreams] as usize;
                if self.active_stream_count() >= limit {
                    return Err(ConnectionError::TooManyStreams.into());
                }
                let id = self.allocate_local_stream_id()?;
                let mut stream = Stream::new(
                    id,
                    self.settings.remote[SettingsParameter::InitialWindowSize],
                    self.config.initial_window_size,
                );
                stream.send_headers(end_stream)?;
                self.streams.insert(id, stream);
                id
            }
        };
        let encoded = self.encode_header_block(&headers);
        self.emit_header_block(FrameType::Headers, Bytes::new(), stream_id, encoded, end_stream);
        Ok(stream_id)
    }

    pub fn send_trailers(&mut self, stream_id: StreamId, trailers: &Headers) -> Result<(), EngineError> {
        if self.config.validate_outbound_headers {
            crate::headers::validate_headers(trailers, self.config.role == Role::Server, true)?;
        }
        self.get_stream_mut(stream_id)?.send_headers(true)?;
        let encoded = self.encode_header_block(trailers);
        self.emit_header_block(FrameType::Headers, Bytes::new(), stream_id, encoded, true);
        Ok(())
    }

    pub fn send_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool) -> Result<usize, EngineError> {
        if self.tombstones.contains_key(&stream_id) {
            return Err(StreamClosedError { stream_id }.into());
        }
        let max_frame = self.settings.remote[SettingsParameter::MaxFrameSize] as usize;
        let mut sent = 0usize;
        let mut offset = 0usize;
        loop {
            let remaining_len = data.len() - offset;
            let chunk_len = remaining_len.min(max_frame);
            let is_final_chunk = offset + chunk_len >= data.len();
            if chunk_len == 0 && !(is_final_chunk && end_stream && offset == 0) {
                break;
            }
            let fits = {
                let stream = self.streams.get(&stream_id).ok_or(NoSuchStreamError { stream_id })?;
                crate::flow_control::can_send(&self.flow, &stream.flow, chunk_len as u32)
            };
            if !fits {
                break;
            }
            // Each window is consumed exactly once, by its own owner: the
            // connection window here, the stream window inside `send_data`.
            self.flow.send.try_consume(chunk_len as u32);
            let chunk_end_stream = end_stream && is_final_chunk;
            let chunk = Bytes::copy_from_slice(&data[offset..offset + chunk_len]);
            let stream = self.streams.get_mut(&stream_id).expect("checked above");
            stream.send_data(chunk_end_stream, chunk_len as u32)?;
            let mut flags = DataFlags::empty();
            if chunk_end_stream {
                flags |= DataFlags::END_STREAM;
            }
            self.queue_frame(FrameType::Data, flags.bits(), stream_id, chunk);
            sent += chunk_len;
            offset += chunk_len;
            if is_final_chunk {
                break;
            }
        }
        Ok(sent)
    }

    pub fn push_stream(&mut self, parent_stream_id: StreamId, headers: &Headers) -> Result<StreamId, EngineError> {
        if self.config.role != Role::Server {
            return Err(ConnectionError::ProtocolError("only a server pushes streams").into());
        }
        if self.settings.remote[SettingsParameter::EnablePush] == 0 {
            return Err(ConnectionError::ProtocolError("peer has disabled server push").into());
        }
        let parent = self.get_stream_mut(parent_stream_id)?;
        if matches!(
            parent.state,
            StreamState::ReservedLocal | StreamState::ReservedRemote
        ) {
            return Err(ConnectionError::ProtocolError("cannot push a stream on an already-pushed stream").into());
        }
        if self.config.validate_outbound_headers {
            crate::headers::validate_headers(headers, false, false)?;
        }
        let promised_id = self.allocate_local_stream_id()?;
        let stream = Stream::reserved_local(
            promised_id,
            self.settings.remote[SettingsParameter::InitialWindowSize],
            self.config.initial_window_size,
        );
        self.streams.insert(promised_id, stream);

        let encoded = self.encode_header_block(headers);
        let mut prefix = BytesMut::with_capacity(4);
        prefix.extend_from_slice(&promised_id.to_be_bytes());
        self.emit_header_block(
            FrameType::PushPromise,
            prefix.freeze(),
            parent_stream_id,
            encoded,
            false,
        );
        Ok(promised_id)
    }

    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Result<(), EngineError> {
        self.get_stream_mut(stream_id)?.reset_by_local(error_code);
        let payload = Bytes::copy_from_slice(&(error_code as u32).to_be_bytes());
        self.queue_frame(FrameType::ResetStream, 0, stream_id, payload);
        self.tombstone_stream(stream_id);
        Ok(())
    }

    fn tombstone_stream(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
        self.tombstones.insert(
            stream_id,
            Tombstone {
                frames_remaining: self.config.closed_stream_grace,
            },
        );
    }

    pub fn increment_flow_control_window(
        &mut self,
        stream_id: Option<StreamId>,
        increment: u32,
    ) -> Result<(), EngineError> {
        match stream_id {
            None => {
                self.flow.recv.shift(increment as i64);
                self.queue_frame(FrameType::WindowUpdate, 0, 0, Bytes::copy_from_slice(&increment.to_be_bytes()));
            }
            Some(id) => {
                let stream = self.get_stream_mut(id)?;
                stream.flow.recv.shift(increment as i64);
                self.queue_frame(
                    FrameType::WindowUpdate,
                    0,
                    id,
                    Bytes::copy_from_slice(&increment.to_be_bytes()),
                );
            }
        }
        Ok(())
    }

    /// Alias over `increment_flow_control_window` for the common case of
    /// replenishing a stream's window after the host finished processing
    /// data it had already received.
    pub fn acknowledge_received_data(&mut self, stream_id: StreamId, len: u32) -> Result<(), EngineError> {
        self.increment_flow_control_window(Some(stream_id), len)?;
        self.increment_flow_control_window(None, len)
    }

    pub fn update_settings(&mut self, values: Vec<(SettingsParameter, u32)>) {
        self.emit_local_settings_frame(values);
    }

    pub fn ping(&mut self, payload: [u8; 8]) {
        self.queue_frame(FrameType::Ping, 0, 0, Bytes::copy_from_slice(&payload));
    }

    /// Flushes the ACK for the most recently received, not-yet-acked
    /// SETTINGS frame. Giving the host this explicit step (rather than
    /// auto-acking inside `receive_data`) lets it apply the new values to
    /// its own buffers first, per RFC 7540 §6.5.3.
    pub fn acknowledge_settings(&mut self) {
        if self.pending_settings_ack {
            self.queue_frame(FrameType::Settings, SettingsFlags::ACK.bits(), 0, Bytes::new());
            self.pending_settings_ack = false;
        }
    }

    pub fn advertise_alternative_service(&mut self, origin: Option<&str>, field_value: &[u8]) {
        let origin_bytes = origin.map(|o| o.as_bytes()).unwrap_or(&[]);
        let mut payload = BytesMut::with_capacity(2 + origin_bytes.len() + field_value.len());
        payload.extend_from_slice(&(origin_bytes.len() as u16).to_be_bytes());
        payload.extend_from_slice(origin_bytes);
        payload.extend_from_slice(field_value);
        let stream_id = 0;
        self.queue_frame(FrameType::Altsvc, 0, stream_id, payload.freeze());
    }

    pub fn close_connection(&mut self, error_code: ErrorCode, debug_data: &[u8]) {
        let mut payload = BytesMut::with_capacity(8 + debug_data.len());
        payload.extend_from_slice(&self.highest_remote_stream_id.to_be_bytes());
        payload.extend_from_slice(&(error_code as u32).to_be_bytes());
        payload.extend_from_slice(debug_data);
        self.queue_frame(FrameType::GoAway, 0, 0, payload.freeze());
        self.goaway_sent = true;
        self.state = ConnectionState::Closing;
        if self.goaway_received {
            self.state = ConnectionState::Closed;
        }
    }

    pub fn data_to_send(&mut self) -> Bytes {
        let bytes = self.outbound.split().freeze();
        bytes
    }

    /// Feeds inbound bytes to the engine, returning the events they produced.
    /// On a connection error, the final event is `ConnectionTerminated` and
    /// a GOAWAY is queued for `data_to_send`; the connection is then closed.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<Vec<Event>, EngineError> {
        if self.state == ConnectionState::Closed {
            return Err(EngineError::ConnectionClosed);
        }
        self.recv_buf.extend_from_slice(data);

        if self.config.role == Role::Server && !self.preface_consumed {
            if self.recv_buf.len() < CONNECTION_PREFACE.len() {
                return Ok(Vec::new());
            }
            if &self.recv_buf[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE {
                let err = ConnectionError::ProtocolError("client connection preface mismatch");
                return Err(self.fail_connection(err));
            }
            let _ = self.recv_buf.split_to(CONNECTION_PREFACE.len());
            self.preface_consumed = true;
            self.state = ConnectionState::Active;
        }

        let mut events = Vec::new();
        loop {
            let max_frame_size = self.config.max_frame_size;
            let parsed = RawFrame::parse(&self.recv_buf, max_frame_size);
            let (raw, consumed) = match parsed {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(err) => return Err(self.fail_connection(err)),
            };
            let _ = self.recv_buf.split_to(consumed);
            match self.process_frame(raw) {
                Ok(mut produced) => events.append(&mut produced),
                Err(FrameOutcome::Connection(err)) => return Err(self.fail_connection(err)),
                Err(FrameOutcome::Stream(stream_id, error_code)) => {
                    self.reset_stream(stream_id, error_code).ok();
                    events.push(Event::StreamReset {
                        stream_id,
                        error_code,
                        remote_reset: false,
                    });
                }
                Err(FrameOutcome::Ignore) => {}
            }
        }
        Ok(events)
    }

    fn fail_connection(&mut self, err: ConnectionError) -> EngineError {
        warn!("connection error: {}", err);
        self.close_connection(err.error_code(), err.to_string().as_bytes());
        self.state = ConnectionState::Closed;
        err.into()
    }

    fn process_frame(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if let Some(expected) = self.assembler.expected_stream_id() {
            if raw.typ != Some(FrameType::Continuation) || raw.stream_id != expected {
                return Err(FrameOutcome::Connection(ConnectionError::ProtocolError(
                    "frame interleaved inside an open header block",
                )));
            }
        }
        let Some(typ) = raw.typ else {
            // RFC 7540 §4.1: frame types the receiver doesn't understand are
            // ignored entirely, and extension frames carry their own flags.
            return Ok(Vec::new());
        };
        frame::validate(typ, raw.stream_id).map_err(FrameOutcome::Connection)?;
        match typ {
            FrameType::Data => self.handle_data(raw),
            FrameType::Headers => self.handle_headers(raw),
            FrameType::Priority => self.handle_priority(raw),
            FrameType::ResetStream => self.handle_reset_stream(raw),
            FrameType::Settings => self.handle_settings(raw),
            FrameType::PushPromise => self.handle_push_promise(raw),
            FrameType::Ping => self.handle_ping(raw),
            FrameType::GoAway => self.handle_goaway(raw),
            FrameType::WindowUpdate => self.handle_window_update(raw),
            FrameType::Continuation => self.handle_continuation(raw),
            FrameType::Altsvc => self.handle_altsvc(raw),
        }
    }

    fn handle_data(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        let flags = DataFlags::from_bits_truncate(raw.flags_byte);
        let len = raw.payload.len() as u32;
        self.flow
            .recv
            .consume_recv(len)
            .map_err(|_| FrameOutcome::Connection(ConnectionError::FlowControlError))?;
        let body = parse_data_payload(&raw.payload, flags).map_err(FrameOutcome::Connection)?;
        let stream = self.require_stream(raw.stream_id)?;
        let end_stream = flags.contains(DataFlags::END_STREAM);
        stream
            .recv_data(end_stream, body.len() as u32)
            .map_err(|err| FrameOutcome::Stream(raw.stream_id, err.error_code()))?;
        if stream.is_closed() {
            self.tombstone_stream(raw.stream_id);
        }
        let mut events = vec![Event::DataReceived {
            stream_id: raw.stream_id,
            data: body.to_vec(),
            end_stream,
        }];
        if end_stream {
            events.push(Event::StreamEnded { stream_id: raw.stream_id });
        }
        Ok(events)
    }

    fn handle_headers(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        let flags = HeadersFlags::from_bits_truncate(raw.flags_byte);
        let parsed = parse_headers_payload(&raw.payload, flags).map_err(FrameOutcome::Connection)?;
        let end_stream = flags.contains(HeadersFlags::END_STREAM);
        // A stream entry already exists only once its opening HEADERS has
        // been processed, so a HEADERS frame arriving for a known stream is
        // necessarily trailers (RFC 7540 §8.1 allows exactly one HEADERS
        // frame to open a stream).
        let is_trailers = self.streams.contains_key(&raw.stream_id);

        if !is_trailers {
            // This HEADERS opens a stream. If the id belongs to a stream
            // that already closed, let the tombstone grace window decide
            // rather than silently resurrecting it as brand new.
            if self.tombstones.contains_key(&raw.stream_id) {
                return self.require_stream(raw.stream_id).map(|_| Vec::new());
            }
            // RFC 7540 §5.1.1: a remote endpoint must use stream ids in
            // strictly increasing order; an id at or below one already used
            // that isn't a known stream was skipped over and can never be
            // legally opened.
            if raw.stream_id <= self.highest_remote_stream_id {
                return Err(FrameOutcome::Connection(ConnectionError::StreamIdTooLow));
            }
        }

        let priority_event = parsed.priority.map(|p| Event::PriorityUpdated {
            stream_id: raw.stream_id,
            dependency: p.dependency,
            exclusive: p.exclusive,
            weight: p.weight,
        });

        if raw.stream_id > self.highest_remote_stream_id {
            self.highest_remote_stream_id = raw.stream_id;
        }

        let completed = self
            .assembler
            .start(
                raw.stream_id,
                parsed.fragment,
                flags.contains(HeadersFlags::END_HEADERS),
                end_stream,
                is_trailers,
                false,
                None,
                self.config.max_header_block_bytes,
            )
            .map_err(FrameOutcome::Connection)?;

        let mut events = Vec::new();
        if !self.streams.contains_key(&raw.stream_id) {
            let stream = Stream::new(
                raw.stream_id,
                self.settings.remote[SettingsParameter::InitialWindowSize],
                self.config.initial_window_size,
            );
            self.streams.insert(raw.stream_id, stream);
        }
        if let Some(completed) = completed {
            // spec.md §4.7's ordering rule puts the primary message event
            // ahead of `PriorityUpdated`, so it's threaded through rather
            // than pushed here.
            self.finish_header_block(completed, priority_event, &mut events)?;
        } else {
            // Header block spans CONTINUATION frames; the priority prefix
            // only ever arrives on the opening HEADERS frame, so it has no
            // later primary event to follow.
            events.extend(priority_event);
        }
        Ok(events)
    }

    fn handle_continuation(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        let flags = ContinuationFlags::from_bits_truncate(raw.flags_byte);
        let completed = self
            .assembler
            .continue_block(
                raw.stream_id,
                raw.payload,
                flags.contains(ContinuationFlags::END_HEADERS),
                self.config.max_header_block_bytes,
            )
            .map_err(FrameOutcome::Connection)?;
        let mut events = Vec::new();
        if let Some(completed) = completed {
            self.finish_header_block(completed, None, &mut events)?;
        }
        Ok(events)
    }

    fn finish_header_block(
        &mut self,
        completed: crate::headers::CompletedHeaderBlock,
        priority_event: Option<Event>,
        events: &mut Vec<Event>,
    ) -> Result<(), FrameOutcome> {
        let end_stream = completed.end_stream;
        let headers = self
            .header_codec
            .decode(&completed.fragment, self.config.header_encoding)
            .map_err(FrameOutcome::Connection)?;
        let headers = self
            .config
            .normalize_inbound_headers
            .map(|hook| hook(&headers))
            .unwrap_or(headers);
        if self.config.validate_inbound_headers {
            crate::headers::validate_headers(&headers, self.config.role != Role::Server, completed.is_trailers)
                .map_err(FrameOutcome::Connection)?;
        }

        if completed.is_push_promise {
            let promised_id = completed.promised_stream_id.expect("push promise carries an id");
            let stream = Stream::reserved_remote(
                promised_id,
                self.settings.remote[SettingsParameter::InitialWindowSize],
                self.config.initial_window_size,
            );
            self.streams.insert(promised_id, stream);
            events.push(Event::PushPromiseReceived {
                parent_stream_id: completed.stream_id,
                promised_stream_id: promised_id,
                headers,
            });
            events.extend(priority_event);
            return Ok(());
        }

        if completed.is_trailers {
            let stream = self.require_stream(completed.stream_id)?;
            stream
                .recv_data(true, 0)
                .map_err(|err| FrameOutcome::Stream(completed.stream_id, err.error_code()))?;
            if stream.is_closed() {
                self.tombstone_stream(completed.stream_id);
            }
            events.push(Event::TrailersReceived {
                stream_id: completed.stream_id,
                trailers: headers,
            });
            events.extend(priority_event);
            events.push(Event::StreamEnded {
                stream_id: completed.stream_id,
            });
            return Ok(());
        }

        let opens_new_stream = self
            .streams
            .get(&completed.stream_id)
            .map(|s| s.state == StreamState::Idle)
            .unwrap_or(false);
        if opens_new_stream {
            let limit = self.settings.local[SettingsParameter::MaxConcurrentStreams] as usize;
            if self.active_stream_count() >= limit {
                return Err(FrameOutcome::Stream(completed.stream_id, ErrorCode::RefusedStream));
            }
        }
        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .and_then(|(_, value)| value.parse::<u64>().ok());

        let stream = self.require_stream(completed.stream_id)?;
        if let Some(len) = content_length {
            stream.content_length = Some(len);
        }
        stream
            .recv_headers(end_stream)
            .map_err(|err| FrameOutcome::Stream(completed.stream_id, err.error_code()))?;
        if stream.is_closed() {
            self.tombstone_stream(completed.stream_id);
        }
        let is_response = self.config.role != Role::Server;
        let primary = if is_response {
            let status = headers
                .iter()
                .find(|(name, _)| name == ":status")
                .and_then(|(_, value)| value.parse::<u16>().ok());
            if matches!(status, Some(100..=199)) {
                Event::InformationalResponseReceived {
                    stream_id: completed.stream_id,
                    headers,
                    end_stream,
                }
            } else {
                Event::ResponseReceived {
                    stream_id: completed.stream_id,
                    headers,
                    end_stream,
                }
            }
        } else {
            Event::RequestReceived {
                stream_id: completed.stream_id,
                headers,
                end_stream,
            }
        };
        events.push(primary);
        events.extend(priority_event);
        if end_stream {
            events.push(Event::StreamEnded {
                stream_id: completed.stream_id,
            });
        }
        Ok(())
    }

    fn handle_push_promise(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if self.settings.local[SettingsParameter::EnablePush] == 0 {
            return Err(FrameOutcome::Connection(ConnectionError::ProtocolError(
                "PUSH_PROMISE received while local ENABLE_PUSH is 0",
            )));
        }
        let flags = PushPromiseFlags::from_bits_truncate(raw.flags_byte);
        let (promised_id, fragment) =
            parse_push_promise_payload(&raw.payload, flags).map_err(FrameOutcome::Connection)?;
        let completed = self
            .assembler
            .start(
                raw.stream_id,
                fragment,
                flags.contains(PushPromiseFlags::END_HEADERS),
                false,
                false,
                true,
                Some(promised_id),
                self.config.max_header_block_bytes,
            )
            .map_err(FrameOutcome::Connection)?;
        let mut events = Vec::new();
        if let Some(completed) = completed {
            self.finish_header_block(completed, None, &mut events)?;
        }
        Ok(events)
    }

    fn handle_priority(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() != 5 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let raw_dep = u32::from_be_bytes([raw.payload[0], raw.payload[1], raw.payload[2], raw.payload[3]]);
        let exclusive = raw_dep & 0x8000_0000 != 0;
        let dependency = raw_dep & U31_MAX;
        let weight = raw.payload[4];
        if let Some(stream) = self.streams.get_mut(&raw.stream_id) {
            stream.weight = weight;
        }
        Ok(vec![Event::PriorityUpdated {
            stream_id: raw.stream_id,
            dependency,
            exclusive,
            weight,
        }])
    }

    fn handle_reset_stream(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() != 4 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let code = u32::from_be_bytes([raw.payload[0], raw.payload[1], raw.payload[2], raw.payload[3]]);
        let error_code = num_traits::FromPrimitive::from_u32(code).unwrap_or(ErrorCode::ProtocolError);
        let stream = self.require_stream(raw.stream_id)?;
        if stream.state == StreamState::Idle {
            return Err(FrameOutcome::Connection(ConnectionError::ProtocolError(
                "RST_STREAM on an idle stream",
            )));
        }
        stream.reset_by_remote(error_code);
        self.tombstone_stream(raw.stream_id);
        Ok(vec![Event::StreamReset {
            stream_id: raw.stream_id,
            error_code,
            remote_reset: true,
        }])
    }

    fn handle_settings(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        let flags = SettingsFlags::from_bits_truncate(raw.flags_byte);
        if flags.contains(SettingsFlags::ACK) {
            if !raw.payload.is_empty() {
                return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
            }
            if let Some(applied) = self.settings.receive_ack() {
                if let Some(delta) = applied.initial_window_size_delta {
                    for stream in self.streams.values_mut() {
                        stream
                            .flow
                            .recv
                            .try_shift(delta)
                            .map_err(FrameOutcome::Connection)?;
                    }
                }
                if let Some(table_size) = applied.header_table_size {
                    self.header_codec.set_remote_table_size(table_size as usize);
                }
            }
            return Ok(vec![Event::SettingsAcknowledged]);
        }
        let wire = parse_settings_payload(&raw.payload).map_err(FrameOutcome::Connection)?;
        let pairs: Vec<_> = wire
            .into_iter()
            .filter_map(|w| <crate::types::SettingsParameter as SettingsParameterFromWire>::from_wire(w.id, w.value))
            .collect();
        let window_delta = self
            .settings
            .receive_remote_settings(&pairs)
            .map_err(FrameOutcome::Connection)?;
        if let Some(delta) = window_delta {
            for stream in self.streams.values_mut() {
                stream.flow.send.try_shift(delta).map_err(FrameOutcome::Connection)?;
            }
        }
        self.pending_settings_ack = true;
        Ok(vec![Event::RemoteSettingsChanged { changed: pairs }])
    }

    fn handle_ping(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() != 8 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&raw.payload);
        let flags = crate::flags::PingFlags::from_bits_truncate(raw.flags_byte);
        if flags.contains(crate::flags::PingFlags::ACK) {
            return Ok(vec![Event::PingAcknowledged { payload }]);
        }
        self.queue_frame(FrameType::Ping, crate::flags::PingFlags::ACK.bits(), 0, Bytes::copy_from_slice(&payload));
        Ok(vec![Event::PingReceived { payload }])
    }

    fn handle_goaway(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() < 8 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let last_stream_id =
            u32::from_be_bytes([raw.payload[0], raw.payload[1], raw.payload[2], raw.payload[3]]) & U31_MAX;
        let code = u32::from_be_bytes([raw.payload[4], raw.payload[5], raw.payload[6], raw.payload[7]]);
        let error_code = num_traits::FromPrimitive::from_u32(code).unwrap_or(ErrorCode::ProtocolError);
        let debug_data = raw.payload.slice(8..).to_vec();
        self.goaway_received = true;
        self.state = if self.goaway_sent {
            ConnectionState::Closed
        } else {
            ConnectionState::Closing
        };
        Ok(vec![Event::ConnectionTerminated {
            error_code,
            last_stream_id,
            debug_data,
        }])
    }

    fn handle_window_update(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() != 4 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let increment = u32::from_be_bytes([raw.payload[0], raw.payload[1], raw.payload[2], raw.payload[3]]) & U31_MAX;
        if increment == 0 {
            return Err(FrameOutcome::Connection(ConnectionError::ProtocolError(
                "zero-length WINDOW_UPDATE increment",
            )));
        }
        if raw.stream_id == 0 {
            self.flow
                .send
                .increment(increment)
                .map_err(FrameOutcome::Connection)?;
            return Ok(vec![Event::WindowUpdateReceived {
                stream_id: None,
                increment,
            }]);
        }
        let stream = self.require_stream(raw.stream_id)?;
        stream
            .flow
            .send
            .increment(increment)
            .map_err(|_| FrameOutcome::Stream(raw.stream_id, ErrorCode::FlowControlError))?;
        Ok(vec![Event::WindowUpdateReceived {
            stream_id: Some(raw.stream_id),
            increment,
        }])
    }

    fn handle_altsvc(&mut self, raw: RawFrame) -> Result<Vec<Event>, FrameOutcome> {
        if raw.payload.len() < 2 {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let origin_len = u16::from_be_bytes([raw.payload[0], raw.payload[1]]) as usize;
        if raw.payload.len() < 2 + origin_len {
            return Err(FrameOutcome::Connection(ConnectionError::FrameTooLarge));
        }
        let origin = if origin_len > 0 {
            Some(String::from_utf8_lossy(&raw.payload[2..2 + origin_len]).into_owned())
        } else {
            None
        };
        let field_value = raw.payload.slice(2 + origin_len..).to_vec();
        Ok(vec![Event::AlternativeServiceAdvertised { origin, field_value }])
    }

    fn require_stream(&mut self, stream_id: StreamId) -> Result<&mut Stream, FrameOutcome> {
        if let Some(tomb) = self.tombstones.get_mut(&stream_id) {
            if tomb.frames_remaining == 0 {
                return Err(FrameOutcome::Connection(ConnectionError::ProtocolError(
                    "frame received for a long-closed stream",
                )));
            }
            tomb.frames_remaining -= 1;
            return Err(FrameOutcome::Ignore);
        }
        self.streams
            .get_mut(&stream_id)
            .ok_or(FrameOutcome::Connection(ConnectionError::ProtocolError("frame for unknown stream")))
    }
}

enum FrameOutcome {
    Connection(ConnectionError),
    Stream(StreamId, ErrorCode),
    /// A frame that arrived within the closed-stream grace window and is
    /// dropped without being surfaced as an event or an error.
    Ignore,
}

trait SettingsParameterFromWire: Sized {
    fn from_wire(id: u16, value: u32) -> Option<(SettingsParameter, u32)>;
}

impl SettingsParameterFromWire for SettingsParameter {
    fn from_wire(id: u16, value: u32) -> Option<(SettingsParameter, u32)> {
        num_traits::FromPrimitive::from_u16(id).map(|param| (param, value))
    }
}
