//! Forwarding a question to upstream resolvers when the catalog has
//! no answer, with response caching.  See `resolver` for the
//! authoritative half.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use dns_types::protocol::types::Question;

use crate::cache::{CacheKey, SharedCache};

/// How long to wait for a single upstream to answer before moving on
/// to the next one.  Not configurable; see the design notes on why
/// this applies per-upstream rather than to the whole forward.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Try each upstream in turn for `question`, using `request_bytes` as
/// the already-encoded outbound query (so its transaction id and
/// question section are reused verbatim). Returns the raw response
/// bytes to send back to the client, or `None` if every upstream
/// failed.
///
/// On a cache hit the stored bytes are returned with the transaction
/// id patched to match `request_id`; the cache itself is indexed by
/// question, not by id, so a cached response is shared across clients.
pub async fn forward(
    upstreams: &[Ipv4Addr],
    cache: &SharedCache,
    question: &Question,
    request_id: u16,
    request_bytes: &[u8],
) -> Option<Vec<u8>> {
    for &upstream in upstreams {
        let address = SocketAddr::new(upstream.into(), 53);
        let key = CacheKey::new(question.name.normalized(), question.qtype, address);

        if let Some(mut cached) = cache.get(&key) {
            if cached.len() >= 2 {
                let [hi, lo] = request_id.to_be_bytes();
                cached[0] = hi;
                cached[1] = lo;
            }
            tracing::trace!(%upstream, qname = %question.name.to_dotted_string(), "cache hit");
            return Some(cached);
        }

        tracing::trace!(%upstream, qname = %question.name.to_dotted_string(), "cache miss, querying upstream");

        match query_upstream(address, request_bytes).await {
            Ok(response) => {
                cache.insert(key, response.clone());
                return Some(response);
            }
            Err(err) => {
                tracing::warn!(%upstream, error = %err, "upstream query failed, trying next");
            }
        }
    }

    None
}

#[derive(Debug)]
enum UpstreamError {
    Timeout,
    Io(std::io::Error),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UpstreamError::Timeout => write!(f, "timed out after {UPSTREAM_TIMEOUT:?}"),
            UpstreamError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

async fn query_upstream(address: SocketAddr, request_bytes: &[u8]) -> Result<Vec<u8>, UpstreamError> {
    let local_addr: SocketAddr = if address.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    }
    .parse()
    .expect("hardcoded address is valid");

    let sock = UdpSocket::bind(local_addr).await.map_err(UpstreamError::Io)?;
    sock.connect(address).await.map_err(UpstreamError::Io)?;
    sock.send(request_bytes).await.map_err(UpstreamError::Io)?;

    let mut buf = [0u8; 512];
    let len = timeout(UPSTREAM_TIMEOUT, sock.recv(&mut buf))
        .await
        .map_err(|_| UpstreamError::Timeout)?
        .map_err(UpstreamError::Io)?;

    Ok(buf[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_types::protocol::types::test_util::domain;
    use dns_types::protocol::types::RecordType;

    #[tokio::test]
    async fn forward_returns_none_when_all_upstreams_unreachable() {
        // port 0 after bind+connect never accepts; using an address
        // nothing listens on and a short-circuited empty upstream list
        // is the simplest unreachable case to exercise without a real
        // network dependency.
        let cache = SharedCache::new();
        let question = Question {
            name: domain("example.com."),
            qtype: RecordType::A,
            qclass: dns_types::protocol::types::RecordClass::IN,
        };

        let result = forward(&[], &cache, &question, 1, &[0u8; 12]).await;
        assert_eq!(None, result);
    }
}
