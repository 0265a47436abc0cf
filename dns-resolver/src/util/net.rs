use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Write a serialised message to a UDP socket, addressed to `target`.
///
/// This system never fragments or truncates a response: every message
/// it builds (catalog answers, SERVFAIL, or an upstream response
/// already capped at 512 octets) fits in a single datagram. A message
/// under 12 octets cannot even carry a valid header, so sending it
/// would be a bug in the caller rather than something to paper over:
/// this returns an error instead of sending anything.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &[u8],
) -> Result<(), SendError> {
    if bytes.len() < 12 {
        return Err(SendError::TooShort { actual: bytes.len() });
    }

    sock.send_to(bytes, target).await?;

    Ok(())
}

#[derive(Debug)]
pub enum SendError {
    TooShort { actual: usize },
    IO(io::Error),
}

impl From<io::Error> for SendError {
    fn from(error: io::Error) -> Self {
        SendError::IO(error)
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SendError::TooShort { actual } => {
                write!(f, "message too short to send: {actual} octets")
            }
            SendError::IO(err) => write!(f, "I/O error sending datagram: {err}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::IO(err) => Some(err),
            SendError::TooShort { .. } => None,
        }
    }
}
