use num_derive::{FromPrimitive, ToPrimitive};

/// Largest value a 31-bit stream id, window, or increment can hold.
pub const U31_MAX: u32 = u32::MAX >> 1;

pub type StreamId = u32;

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
    Altsvc = 0xa,
}

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    /// Not itself an error, e.g. a GOAWAY indicating graceful shutdown.
    NoError = 0x0,
    /// An unspecific protocol error, for use when a more specific code doesn't apply.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// A SETTINGS frame did not receive a response in a timely manner.
    SettingsTimeout = 0x4,
    /// A frame was received after the stream was half-closed.
    StreamClosed = 0x5,
    /// A frame with an invalid size was received.
    FrameSizeError = 0x6,
    /// The stream was refused prior to any application processing.
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context.
    CompressionError = 0x9,
    /// A CONNECT-established connection was reset or abnormally closed.
    ConnectError = 0xa,
    /// The peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport does not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// The endpoint requires HTTP/1.1 to be used instead of HTTP/2.
    Http11Required = 0xd,
}

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, enum_map::Enum,
)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// Which side of the connection this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Parity of stream ids this role initiates: client odd, server even.
    pub fn initiates_odd(self) -> bool {
        matches!(self, Role::Client)
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A decoded header field. Pseudo-headers keep their leading `:`.
pub type HeaderField = (String, String);
pub type Headers = Vec<HeaderField>;
