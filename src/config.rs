//! Host-tunable configuration for a [`crate::connection::Connection`].

use crate::types::{Headers, Role};

/// How to interpret header field bytes once HPACK decoding has produced
/// them. `Utf8` rejects a header block containing invalid UTF-8 as a
/// connection error; `Raw` accepts anything, replacing invalid sequences
/// with U+FFFD so a single malformed field can't take down the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    Utf8,
    Raw,
}

/// Hooks a host can use to validate or rewrite header blocks before they
/// cross the HPACK boundary in either direction.
pub type HeaderHook = fn(&Headers) -> Headers;

#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub header_encoding: HeaderEncoding,
    pub validate_inbound_headers: bool,
    pub validate_outbound_headers: bool,
    pub normalize_inbound_headers: Option<HeaderHook>,
    pub normalize_outbound_headers: Option<HeaderHook>,
    /// Ceiling on the total bytes a reassembled header block may reach,
    /// guarding against unbounded CONTINUATION flooding (spec.md C4).
    pub max_header_block_bytes: usize,
    /// How many frames after a stream closes the connection still accepts
    /// before treating further activity on it as an error (RFC 7540
    /// §5.1's note on the inherent race with peer-in-flight frames).
    pub closed_stream_grace: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
}

impl Config {
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    fn new(role: Role) -> Self {
        Self {
            role,
            header_encoding: HeaderEncoding::Raw,
            validate_inbound_headers: true,
            validate_outbound_headers: true,
            normalize_inbound_headers: None,
            normalize_outbound_headers: None,
            max_header_block_bytes: 64 * 1024,
            closed_stream_grace: 20,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
        }
    }
}
