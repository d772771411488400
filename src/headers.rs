//! Header block assembler (C4): HPACK encode/decode plus CONTINUATION
//! fragment reassembly, grounded on the sans-I/O reassembly pattern of
//! tracking a single "header block in progress" per connection.

use crate::config::HeaderEncoding;
use crate::error::ConnectionError;
use crate::types::Headers;
use bytes::{Bytes, BytesMut};

/// Headers forbidden on the wire per RFC 7540 §8.1.2.2: HTTP/1.1
/// connection-specific fields have no meaning in HTTP/2.
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

const PSEUDO_HEADERS_REQUEST: &[&str] = &[":method", ":scheme", ":authority", ":path"];
const PSEUDO_HEADERS_RESPONSE: &[&str] = &[":status"];

pub struct HeaderCodec {
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

impl std::fmt::Debug for HeaderCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCodec").finish_non_exhaustive()
    }
}

impl Default for HeaderCodec {
    fn default() -> Self {
        Self {
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
        }
    }
}

impl HeaderCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote_table_size(&mut self, size: usize) {
        self.decoder.set_max_table_size(size);
    }

    pub fn encode(&mut self, headers: &Headers) -> Bytes {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        Bytes::from(self.encoder.encode(pairs))
    }

    pub fn decode(&mut self, block: &[u8], encoding: HeaderEncoding) -> Result<Headers, ConnectionError> {
        let pairs = self
            .decoder
            .decode(block)
            .map_err(|_| ConnectionError::CompressionError("HPACK decode failed".to_string()))?;
        match encoding {
            HeaderEncoding::Raw => Ok(pairs
                .into_iter()
                .map(|(name, value)| {
                    (
                        String::from_utf8_lossy(&name).into_owned(),
                        String::from_utf8_lossy(&value).into_owned(),
                    )
                })
                .collect()),
            HeaderEncoding::Utf8 => pairs
                .into_iter()
                .map(|(name, value)| {
                    let name = String::from_utf8(name.to_vec())
                        .map_err(|_| ConnectionError::ProtocolError("header field name is not valid UTF-8"))?;
                    let value = String::from_utf8(value.to_vec())
                        .map_err(|_| ConnectionError::ProtocolError("header field value is not valid UTF-8"))?;
                    Ok((name, value))
                })
                .collect(),
        }
    }
}

/// Accumulates HEADERS/PUSH_PROMISE + CONTINUATION fragments for exactly one
/// stream at a time, per RFC 7540 §6.10 (no other frame may be interleaved
/// before END_HEADERS is seen on the connection).
#[derive(Debug, Default)]
pub struct HeaderBlockAssembler {
    in_progress: Option<InProgressBlock>,
}

#[derive(Debug)]
struct InProgressBlock {
    stream_id: crate::types::StreamId,
    buffer: BytesMut,
    end_stream: bool,
    is_trailers: bool,
    is_push_promise: bool,
    promised_stream_id: Option<crate::types::StreamId>,
}

pub struct CompletedHeaderBlock {
    pub stream_id: crate::types::StreamId,
    pub fragment: Bytes,
    pub end_stream: bool,
    pub is_trailers: bool,
    pub is_push_promise: bool,
    pub promised_stream_id: Option<crate::types::StreamId>,
}

impl HeaderBlockAssembler {
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn expected_stream_id(&self) -> Option<crate::types::StreamId> {
        self.in_progress.as_ref().map(|block| block.stream_id)
    }

    /// Starts a new block. Fails if a block is already open (RFC 7540
    /// §6.10: a HEADERS frame arriving before the prior END_HEADERS is a
    /// connection error).
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        stream_id: crate::types::StreamId,
        fragment: Bytes,
        end_headers: bool,
        end_stream: bool,
        is_trailers: bool,
        is_push_promise: bool,
        promised_stream_id: Option<crate::types::StreamId>,
        max_header_block_bytes: usize,
    ) -> Result<Option<CompletedHeaderBlock>, ConnectionError> {
        if self.in_progress.is_some() {
            return Err(ConnectionError::ProtocolError(
                "HEADERS received while a prior header block is still open",
            ));
        }
        if fragment.len() > max_header_block_bytes {
            return Err(ConnectionError::DenialOfService(
                "header block fragment exceeds configured limit",
            ));
        }
        if end_headers {
            return Ok(Some(CompletedHeaderBlock {
                stream_id,
                fragment,
                end_stream,
                is_trailers,
                is_push_promise,
                promised_stream_id,
            }));
        }
        let mut buffer = BytesMut::with_capacity(fragment.len());
        buffer.extend_from_slice(&fragment);
        self.in_progress = Some(InProgressBlock {
            stream_id,
            buffer,
            end_stream,
            is_trailers,
            is_push_promise,
            promised_stream_id,
        });
        Ok(None)
    }

    /// Appends a CONTINUATION fragment to the in-progress block.
    pub fn continue_block(
        &mut self,
        stream_id: crate::types::StreamId,
        fragment: Bytes,
        end_headers: bool,
        max_header_block_bytes: usize,
    ) -> Result<Option<CompletedHeaderBlock>, ConnectionError> {
        let block = self.in_progress.as_mut().ok_or(ConnectionError::ProtocolError(
            "CONTINUATION received with no header block in progress",
        ))?;
        if block.stream_id != stream_id {
            return Err(ConnectionError::ProtocolError(
                "CONTINUATION stream id does not match the open header block",
            ));
        }
        if block.buffer.len() + fragment.len() > max_header_block_bytes {
            return Err(ConnectionError::DenialOfService(
                "accumulated header block exceeds configured limit",
            ));
        }
        block.buffer.extend_from_slice(&fragment);
        if !end_headers {
            return Ok(None);
        }
        let block = self.in_progress.take().expect("checked above");
        Ok(Some(CompletedHeaderBlock {
            stream_id: block.stream_id,
            fragment: block.buffer.freeze(),
            end_stream: block.end_stream,
            is_trailers: block.is_trailers,
            is_push_promise: block.is_push_promise,
            promised_stream_id: block.promised_stream_id,
        }))
    }
}

/// Validates pseudo-header placement and rejects connection-specific
/// fields, per RFC 7540 §8.1.2.1 and §8.1.2.2.
pub fn validate_headers(headers: &Headers, is_response: bool, is_trailers: bool) -> Result<(), ConnectionError> {
    let allowed_pseudo = if is_response {
        PSEUDO_HEADERS_RESPONSE
    } else {
        PSEUDO_HEADERS_REQUEST
    };
    let mut seen_regular = false;
    let mut seen_pseudo = std::collections::HashSet::new();
    let mut has_authority = false;
    let mut has_host = false;
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if lower != *name {
            return Err(ConnectionError::ProtocolError("header field name must be lowercase"));
        }
        if CONNECTION_SPECIFIC_HEADERS.contains(&lower.as_str()) {
            return Err(ConnectionError::ProtocolError(
                "connection-specific header field is not allowed",
            ));
        }
        if lower == "te" && value != "trailers" {
            return Err(ConnectionError::ProtocolError(
                "TE header field may only carry the value \"trailers\"",
            ));
        }
        if lower.starts_with(':') {
            if is_trailers {
                return Err(ConnectionError::ProtocolError("pseudo-header field in trailers"));
            }
            if seen_regular {
                return Err(ConnectionError::ProtocolError(
                    "pseudo-header field appears after a regular header field",
                ));
            }
            if !allowed_pseudo.contains(&lower.as_str()) {
                return Err(ConnectionError::ProtocolError("unrecognized pseudo-header field"));
            }
            if !seen_pseudo.insert(lower.clone()) {
                return Err(ConnectionError::ProtocolError("pseudo-header field appears more than once"));
            }
            if lower == ":authority" {
                has_authority = true;
            }
        } else {
            seen_regular = true;
            if lower == "host" {
                has_host = true;
            }
        }
    }
    // RFC 7540 §8.1.2.3: ":authority" is the HTTP/2 replacement for the
    // HTTP/1.1 Host header field; a bare Host with no ":authority" means the
    // request never carried its target authority at all.
    if has_host && !has_authority {
        return Err(ConnectionError::ProtocolError(
            "host header field present without an :authority pseudo-header",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = HeaderCodec::new();
        let original = headers(&[(":method", "GET"), (":path", "/")]);
        let encoded = codec.encode(&original);
        let decoded = codec.decode(&encoded, HeaderEncoding::Raw).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn strict_utf8_mode_rejects_invalid_sequences_but_raw_mode_accepts_them() {
        let invalid: Vec<(&[u8], &[u8])> = vec![(b"x-bin", &[0xff, 0xfe])];
        let mut encoder = hpack::Encoder::new();
        let block = Bytes::from(encoder.encode(invalid));

        let mut strict = HeaderCodec::new();
        assert!(strict.decode(&block, HeaderEncoding::Utf8).is_err());
        let mut raw = HeaderCodec::new();
        assert!(raw.decode(&block, HeaderEncoding::Raw).is_ok());
    }

    #[test]
    fn rejects_connection_specific_header() {
        let headers = headers(&[(":method", "GET"), ("connection", "keep-alive")]);
        assert!(validate_headers(&headers, false, false).is_err());
    }

    #[test]
    fn rejects_pseudo_header_after_regular_field() {
        let headers = headers(&[("accept", "*/*"), (":method", "GET")]);
        assert!(validate_headers(&headers, false, false).is_err());
    }

    #[test]
    fn rejects_duplicate_pseudo_header() {
        let headers = headers(&[(":method", "GET"), (":method", "POST")]);
        assert!(validate_headers(&headers, false, false).is_err());
    }

    #[test]
    fn rejects_te_with_a_value_other_than_trailers() {
        let headers = headers(&[(":method", "GET"), ("te", "gzip")]);
        assert!(validate_headers(&headers, false, false).is_err());
    }

    #[test]
    fn accepts_te_trailers() {
        let headers = headers(&[(":method", "GET"), ("te", "trailers")]);
        assert!(validate_headers(&headers, false, false).is_ok());
    }

    #[test]
    fn rejects_host_without_authority() {
        let headers = headers(&[(":method", "GET"), ("host", "example.com")]);
        assert!(validate_headers(&headers, false, false).is_err());
    }

    #[test]
    fn accepts_host_alongside_authority() {
        let headers = headers(&[(":method", "GET"), (":authority", "example.com"), ("host", "example.com")]);
        assert!(validate_headers(&headers, false, false).is_ok());
    }

    #[test]
    fn reassembles_headers_split_across_continuation() {
        let mut assembler = HeaderBlockAssembler::default();
        assert!(assembler
            .start(1, Bytes::from_static(b"ab"), false, false, false, false, None, 1_000)
            .unwrap()
            .is_none());
        assert!(assembler.is_in_progress());
        let completed = assembler
            .continue_block(1, Bytes::from_static(b"cd"), true, 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(&completed.fragment[..], b"abcd");
        assert!(!assembler.is_in_progress());
    }

    #[test]
    fn rejects_continuation_for_a_different_stream() {
        let mut assembler = HeaderBlockAssembler::default();
        assembler
            .start(1, Bytes::from_static(b"ab"), false, false, false, false, None, 1_000)
            .unwrap();
        assert!(assembler.continue_block(3, Bytes::from_static(b"cd"), true, 1_000).is_err());
    }
}
