//! Wire-level frame codec (C3's input). This is the "frame codec" the
//! specification treats as an external collaborator; since the example pack
//! carries no off-the-shelf HTTP/2 framing crate, it is implemented here as a
//! thin, dependency-free layer so the rest of the engine can stay sans-I/O.

use crate::error::ConnectionError;
use crate::flags::*;
use crate::types::*;
use bytes::{Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};

pub const FRAME_HEADER_LEN: usize = 9;

/// The 9-byte frame header plus an unparsed payload. `typ` is `None` for a
/// frame type this engine doesn't recognize; RFC 7540 §4.1 requires such
/// frames to be ignored rather than rejected.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub typ: Option<FrameType>,
    pub flags_byte: u8,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

impl RawFrame {
    /// Parses one frame header + payload off the front of `buf`, returning
    /// the frame and how many bytes it consumed, or `None` if `buf` doesn't
    /// yet hold a complete frame. `max_frame_size` enforces the locally
    /// advertised `SETTINGS_MAX_FRAME_SIZE` (spec.md C3's first bullet).
    pub fn parse(buf: &[u8], max_frame_size: u32) -> Result<Option<(Self, usize)>, ConnectionError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        if length > max_frame_size {
            return Err(ConnectionError::FrameTooLarge);
        }
        let total = FRAME_HEADER_LEN + length as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let typ = FrameType::from_u8(buf[3]);
        let flags_byte = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & U31_MAX;
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total]);
        Ok(Some((
            Self {
                typ,
                flags_byte,
                stream_id,
                payload,
            },
            total,
        )))
    }

    pub fn serialize(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        let len = self.payload.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.extend_from_slice(&[self
            .typ
            .expect("serialize is only called on frames this engine originates")
            .to_u8()
            .expect("FrameType is repr(u8)")]);
        out.extend_from_slice(&[self.flags_byte]);
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A setting entry as it appears on the wire inside a SETTINGS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireSetting {
    pub id: u16,
    pub value: u32,
}

pub fn parse_settings_payload(payload: &[u8]) -> Result<Vec<WireSetting>, ConnectionError> {
    if payload.len() % 6 != 0 {
        return Err(ConnectionError::FrameTooLarge);
    }
    Ok(payload
        .chunks_exact(6)
        .map(|chunk| WireSetting {
            id: u16::from_be_bytes([chunk[0], chunk[1]]),
            value: u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
        })
        .collect())
}

pub fn serialize_settings_payload(settings: &[(SettingsParameter, u32)]) -> Bytes {
    let mut out = BytesMut::with_capacity(settings.len() * 6);
    for (param, value) in settings {
        out.extend_from_slice(&(*param as u16).to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.freeze()
}

/// The parsed, pad-stripped payload of a HEADERS frame, before HPACK decode.
pub struct ParsedHeadersPayload {
    pub priority: Option<Priority>,
    pub fragment: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

/// Strips padding (and, for HEADERS, an optional PRIORITY prefix) from a
/// frame payload. Returns `ProtocolError` if the pad length field would
/// consume more than the remaining payload (spec.md C3: "pad length >=
/// payload length").
pub fn strip_padding(
    payload: &Bytes,
    padded: bool,
) -> Result<(Bytes, /* padding already validated */ ()), ConnectionError> {
    if !padded {
        return Ok((payload.clone(), ()));
    }
    if payload.is_empty() {
        return Err(ConnectionError::ProtocolError("PADDED frame with empty payload"));
    }
    let pad_len = payload[0] as usize;
    if pad_len >= payload.len() {
        return Err(ConnectionError::ProtocolError(
            "pad length is not smaller than the frame payload",
        ));
    }
    let body = payload.slice(1..payload.len() - pad_len);
    Ok((body, ()))
}

pub fn parse_headers_payload(
    payload: &Bytes,
    flags: HeadersFlags,
) -> Result<ParsedHeadersPayload, ConnectionError> {
    let (mut body, ()) = strip_padding(payload, flags.contains(HeadersFlags::PADDED))?;
    let priority = if flags.contains(HeadersFlags::PRIORITY) {
        if body.len() < 5 {
            return Err(ConnectionError::ProtocolError("truncated PRIORITY prefix in HEADERS"));
        }
        let raw_dep = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let exclusive = raw_dep & 0x8000_0000 != 0;
        let dependency = raw_dep & U31_MAX;
        let weight = body[4];
        body = body.slice(5..);
        Some(Priority {
            dependency,
            exclusive,
            weight,
        })
    } else {
        None
    };
    Ok(ParsedHeadersPayload {
        priority,
        fragment: body,
    })
}

pub fn parse_data_payload(payload: &Bytes, flags: DataFlags) -> Result<Bytes, ConnectionError> {
    let (body, ()) = strip_padding(payload, flags.contains(DataFlags::PADDED))?;
    Ok(body)
}

pub fn parse_push_promise_payload(
    payload: &Bytes,
    flags: PushPromiseFlags,
) -> Result<(StreamId, Bytes), ConnectionError> {
    let (body, ()) = strip_padding(payload, flags.contains(PushPromiseFlags::PADDED))?;
    if body.len() < 4 {
        return Err(ConnectionError::ProtocolError("truncated PUSH_PROMISE"));
    }
    let promised_id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & U31_MAX;
    Ok((promised_id, body.slice(4..)))
}

/// Validates a frame's stream id against what RFC 7540 requires for its
/// type (spec.md C3): connection-level frames must target stream 0,
/// stream-level frames must not. WINDOW_UPDATE and ALTSVC are legal on
/// either stream 0 or a specific stream, so neither is constrained here.
pub fn validate(typ: FrameType, stream_id: StreamId) -> Result<(), ConnectionError> {
    let requires_zero = matches!(typ, FrameType::Settings | FrameType::Ping | FrameType::GoAway);
    if requires_zero && stream_id != 0 {
        return Err(ConnectionError::ProtocolError(
            "connection-level frame must use stream id 0",
        ));
    }
    let requires_nonzero = matches!(
        typ,
        FrameType::Data
            | FrameType::Headers
            | FrameType::Priority
            | FrameType::ResetStream
            | FrameType::PushPromise
            | FrameType::Continuation
    );
    if requires_nonzero && stream_id == 0 {
        return Err(ConnectionError::ProtocolError(
            "stream-level frame must not use stream id 0",
        ));
    }
    Ok(())
}

pub fn build_frame(typ: FrameType, flags_byte: u8, stream_id: StreamId, payload: Bytes) -> BytesMut {
    RawFrame {
        typ: Some(typ),
        flags_byte,
        stream_id,
        payload,
    }
    .serialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_settings_frame() {
        let payload = serialize_settings_payload(&[(SettingsParameter::EnablePush, 0)]);
        let raw = build_frame(FrameType::Settings, 0, 0, payload);
        let (parsed, consumed) = RawFrame::parse(&raw, 16_384).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(parsed.typ, Some(FrameType::Settings));
        assert_eq!(parsed.stream_id, 0);
        let settings = parse_settings_payload(&parsed.payload).unwrap();
        assert_eq!(settings, vec![WireSetting { id: 2, value: 0 }]);
    }

    #[test]
    fn reports_incomplete_frames_as_none() {
        let payload = serialize_settings_payload(&[(SettingsParameter::EnablePush, 0)]);
        let raw = build_frame(FrameType::Settings, 0, 0, payload);
        assert!(RawFrame::parse(&raw[..raw.len() - 1], 16_384)
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejects_frames_over_max_frame_size() {
        let payload = Bytes::from(vec![0u8; 100]);
        let raw = build_frame(FrameType::Data, 0, 1, payload);
        assert!(matches!(
            RawFrame::parse(&raw, 16),
            Err(ConnectionError::FrameTooLarge)
        ));
    }

    #[test]
    fn rejects_padding_ge_payload_len() {
        let payload = Bytes::from_static(&[5, 1, 2, 3]);
        assert!(matches!(
            strip_padding(&payload, true),
            Err(ConnectionError::ProtocolError(_))
        ));
    }

    #[test]
    fn unrecognized_frame_type_parses_with_no_typ() {
        let raw = build_frame(FrameType::Ping, 0, 0, Bytes::from_static(&[0; 8]));
        let mut mutated = raw.clone();
        mutated[3] = 0xff; // not a frame type this engine knows
        let (parsed, consumed) = RawFrame::parse(&mutated, 16_384).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(parsed.typ, None);
    }

    #[test]
    fn rejects_connection_level_frame_on_a_nonzero_stream() {
        assert!(validate(FrameType::Settings, 1).is_err());
        assert!(validate(FrameType::Ping, 1).is_err());
        assert!(validate(FrameType::GoAway, 1).is_err());
    }

    #[test]
    fn rejects_stream_level_frame_on_stream_zero() {
        assert!(validate(FrameType::Data, 0).is_err());
        assert!(validate(FrameType::Headers, 0).is_err());
        assert!(validate(FrameType::Priority, 0).is_err());
        assert!(validate(FrameType::ResetStream, 0).is_err());
        assert!(validate(FrameType::PushPromise, 0).is_err());
        assert!(validate(FrameType::Continuation, 0).is_err());
    }

    #[test]
    fn allows_window_update_and_altsvc_on_either_stream() {
        assert!(validate(FrameType::WindowUpdate, 0).is_ok());
        assert!(validate(FrameType::WindowUpdate, 1).is_ok());
        assert!(validate(FrameType::Altsvc, 0).is_ok());
        assert!(validate(FrameType::Altsvc, 1).is_ok());
    }

    #[test]
    fn strips_priority_prefix_from_headers() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(&0x8000_0003u32.to_be_bytes());
        payload.extend_from_slice(&[15]);
        payload.extend_from_slice(b"hpack-bytes");
        let parsed = parse_headers_payload(&payload.freeze(), HeadersFlags::PRIORITY).unwrap();
        let priority = parsed.priority.unwrap();
        assert!(priority.exclusive);
        assert_eq!(priority.dependency, 3);
        assert_eq!(priority.weight, 15);
        assert_eq!(&parsed.fragment[..], b"hpack-bytes");
    }
}
