#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::wildcard_imports)]

pub mod cache;
pub mod forwarding;
pub mod resolver;
pub mod util;

use std::net::Ipv4Addr;

use dns_types::catalog::types::Catalog;
use dns_types::protocol::types::Message;

use self::cache::SharedCache;

/// Answer `message` using the catalog first, falling back to the
/// configured upstreams if there's no local answer.
///
/// `request_bytes` must be the original wire-format encoding of
/// `message` as received from the client: on a forward it's reused
/// verbatim as the outbound query, so the question section an
/// upstream sees matches byte-for-byte what the client sent.
///
/// Returns the raw bytes to send back to the client, or `None` if the
/// catalog had no answer and every upstream failed too (the caller is
/// expected to answer with SERVFAIL in that case).
pub async fn answer(
    catalog: &Catalog,
    upstreams: &[Ipv4Addr],
    cache: &SharedCache,
    message: &mut Message,
    request_bytes: &[u8],
) -> Option<Vec<u8>> {
    if resolver::try_resolve(catalog, message) {
        return message.clone().into_octets().ok();
    }

    let question = message.question()?.clone();
    forwarding::forward(upstreams, cache, &question, message.header.id, request_bytes).await
}
