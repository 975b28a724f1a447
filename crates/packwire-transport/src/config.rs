//! Transport configuration.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use packwire_protocol::CodecKind;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FrameMode
// ---------------------------------------------------------------------------

/// How a stream transport finds frame boundaries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum FrameMode {
    /// Buffer bytes across reads and emit every complete frame. Correct
    /// whenever a peer may pipeline several frames or a frame spans reads.
    #[default]
    Incremental,

    /// Treat each read as exactly one frame. Only valid when every write on
    /// the other side maps to one read here.
    PerChunk,
}

// ---------------------------------------------------------------------------
// AddressFamily
// ---------------------------------------------------------------------------

/// IP family of the local datagram socket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
}

impl AddressFamily {
    /// The wildcard address with an OS-assigned port for this family.
    pub fn unspecified(self) -> SocketAddr {
        match self {
            Self::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            Self::V6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }

    /// Returns `true` if `addr` belongs to this family.
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Settings shared by every transport.
///
/// Override only what you need:
///
/// ```rust
/// use packwire_transport::{FrameMode, TransportConfig};
///
/// let config = TransportConfig {
///     frame_mode: FrameMode::PerChunk,
///     ..TransportConfig::default()
/// };
/// assert_eq!(config.max_frame_len, 16 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Wire format for every frame.
    pub codec: CodecKind,

    /// Framing policy for stream transports. Datagram transports always
    /// decode one frame per datagram.
    pub frame_mode: FrameMode,

    /// Largest unfinished frame a stream reader will buffer before giving
    /// up on the connection.
    pub max_frame_len: usize,

    /// Size of each socket read on stream transports.
    pub read_buffer_len: usize,

    /// Receive buffer for one datagram. Anything longer is truncated by the
    /// OS and will fail to decode.
    pub max_datagram_len: usize,

    /// Family used when a datagram client binds its local socket.
    pub family: AddressFamily,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Msgpack,
            frame_mode: FrameMode::Incremental,
            max_frame_len: 16 * 1024 * 1024,
            read_buffer_len: 8 * 1024,
            max_datagram_len: 65_507,
            family: AddressFamily::V4,
        }
    }
}
