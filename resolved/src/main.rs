mod catalog_loader;

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use dns_resolver::cache::SharedCache;
use dns_resolver::util::net::send_udp_bytes_to;
use dns_types::catalog::types::Catalog;
use dns_types::protocol::types::*;

use catalog_loader::load_catalog;

const DEFAULT_PORT: u16 = 53;

/// Check whether this message is something this server knows how to
/// handle, and if not, turn it into the appropriate error response.
///
/// Returns `Some(response)` if the query was rejected outright (no
/// resolution or forwarding should be attempted), `None` if it's fine
/// to proceed.
fn check_unsupported_features(query: &Message) -> Option<Message> {
    if query.header.is_truncated {
        return Some(query.make_error_response(Rcode::Refused));
    }
    if query.header.opcode != Opcode::Standard {
        return Some(query.make_error_response(Rcode::NotImplemented));
    }
    if query.header.z != 0 {
        return Some(query.make_error_response(Rcode::FormatError));
    }
    if query.header.qdcount != 1 {
        return Some(query.make_error_response(Rcode::NotImplemented));
    }
    if let Some(question) = query.question() {
        if question.qclass != RecordClass::IN {
            return Some(query.make_error_response(Rcode::NotImplemented));
        }
    }
    None
}

/// Handle one already-decoded inbound message, producing the response
/// to send back (if any datagram should be sent at all).
async fn handle_message(state: ServerState, query: Message) -> Option<Message> {
    if let Some(rejection) = check_unsupported_features(&query) {
        return Some(rejection);
    }

    if query.header.is_response {
        // a response arriving on our query socket isn't something we
        // asked for; echo it back unmodified rather than guessing.
        return Some(query);
    }

    let request_bytes = match query.clone().into_octets() {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(?error, ?query, "could not re-serialise inbound query");
            return None;
        }
    };

    let mut message = query.clone();
    let response_bytes = dns_resolver::answer(
        &state.catalog,
        &state.upstreams,
        &state.cache,
        &mut message,
        &request_bytes,
    )
    .await;

    match response_bytes {
        Some(bytes) => match Message::from_octets(&bytes) {
            Ok(response) => Some(response),
            Err(error) => {
                tracing::error!(?error, "could not parse response we just produced");
                None
            }
        },
        None => {
            tracing::warn!(id = %query.header.id, "all upstreams failed");
            Some(query.make_error_response(Rcode::ServerFailure))
        }
    }
}

async fn listen_udp_task(state: ServerState, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MESSAGE_MAX_LEN];

    loop {
        let (size, peer) = match socket.recv_from(&mut buf).await {
            Ok(ok) => ok,
            Err(error) => {
                tracing::debug!(?error, "UDP receive error");
                continue;
            }
        };

        tracing::debug!(?peer, size, "UDP request");

        let query = match Message::from_octets(&buf[..size]) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(?peer, ?error, "could not parse inbound message");
                continue;
            }
        };

        let state = state.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_message(state, query).await {
                match response.into_octets() {
                    Ok(bytes) => {
                        if let Err(error) = send_udp_bytes_to(&socket, peer, &bytes).await {
                            tracing::debug!(?peer, ?error, "UDP send error");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(?peer, ?error, "could not serialise response");
                    }
                }
            }
        });
    }
}

/// Sweep expired cache entries on a fixed interval, so TTL-expired
/// keys are reclaimed even if nothing ever looks them up again.
async fn prune_cache_task(cache: SharedCache) {
    loop {
        sleep(Duration::from_secs(60 * 5)).await;
        let (overflowed, current_size, expired, pruned) = cache.cleanup();
        if expired > 0 || pruned > 0 {
            tracing::info!(%overflowed, %current_size, %expired, %pruned, "pruned cache");
        }
    }
}

#[derive(Clone)]
struct ServerState {
    catalog: Arc<Catalog>,
    upstreams: Arc<Vec<Ipv4Addr>>,
    cache: SharedCache,
}

fn begin_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if debug {
        subscriber.with_file(true).with_line_number(true).init();
    } else {
        subscriber.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// An authoritative DNS server with forwarding fallback and response
/// caching.
///
/// Answers queries from a local zone catalog when it can, and
/// forwards everything else to the configured upstream resolvers,
/// caching what comes back.
struct Args {
    /// Path to the TOML catalog file
    catalog: PathBuf,

    /// Address to bind the DNS UDP socket to
    #[clap(short = 'h', long, value_parser, default_value_t = Ipv4Addr::UNSPECIFIED)]
    host: Ipv4Addr,

    /// Port to bind the DNS UDP socket to
    #[clap(short, long, value_parser, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Upstream resolver to forward unanswered queries to; can be
    /// given more than once, and is tried in order
    #[clap(long, value_parser)]
    forward: Vec<Ipv4Addr>,

    /// Enable debug-level logging, including source file and line
    #[clap(long, action(clap::ArgAction::SetTrue))]
    debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_types::protocol::types::test_util::domain;

    fn empty_state() -> ServerState {
        ServerState {
            catalog: Arc::new(Catalog::new(Vec::new())),
            upstreams: Arc::new(Vec::new()),
            cache: SharedCache::new(),
        }
    }

    fn question() -> Question {
        Question {
            name: domain("example.com."),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        }
    }

    #[tokio::test]
    async fn rejects_malformed_packet_even_if_flagged_as_a_response() {
        // TC=1 is an unsupported feature (Refused); is_response=true
        // would otherwise make this look like an answer to one of our
        // own forwarded queries. Validation must win.
        let mut query = Message::from_question(1, question());
        query.header.is_response = true;
        query.header.is_truncated = true;

        let response = handle_message(empty_state(), query.clone())
            .await
            .expect("malformed packet should get a response");

        assert!(response.header.is_response);
        assert_eq!(Rcode::Refused, response.header.rcode);
    }

    #[tokio::test]
    async fn echoes_a_genuine_response_back_unmodified() {
        let mut query = Message::from_question(1, question());
        query.header.is_response = true;

        let response = handle_message(empty_state(), query.clone()).await;
        assert_eq!(Some(query), response);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging(args.debug);

    let catalog = match load_catalog(&args.catalog).await {
        Ok(catalog) => catalog,
        Err(error) => {
            tracing::error!(?error, "could not load catalog");
            process::exit(1);
        }
    };

    tracing::info!(host = %args.host, port = %args.port, "binding DNS UDP socket");
    let socket = match UdpSocket::bind((args.host, args.port)).await {
        Ok(socket) => Arc::new(socket),
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let state = ServerState {
        catalog: Arc::new(catalog),
        upstreams: Arc::new(args.forward),
        cache: SharedCache::new(),
    };

    tokio::spawn(prune_cache_task(state.cache.clone()));
    let listener = tokio::spawn(listen_udp_task(state, socket));

    tokio::select! {
        _ = listener => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
    }
}

