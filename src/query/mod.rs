pub mod packet;

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use crate::models::server::ServerStatus;
use crate::utils::resolve_connection_string;
use packet::{ Reply, Request, SplitAssembler };

pub const VERSION_RULE: &str = "vistrace_version";
pub const VERSION_FLOOR: &str = "older than v0.12";

const MAX_CHALLENGE_ATTEMPTS: usize = 3;
const MAX_DATAGRAM: usize = 1400;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    Resolve(String),
    Io(String),
    Timeout(Duration),
    Malformed(String),
    UnexpectedResponse { expected: u8, received: u8 },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve(msg) => write!(f, "Could not resolve server address: {}", msg),
            Self::Io(msg) => write!(f, "Socket error: {}", msg),
            Self::Timeout(after) => write!(f, "No reply within {:?}", after),
            Self::Malformed(msg) => write!(f, "Malformed reply: {}", msg),
            Self::UnexpectedResponse { expected, received } =>
                write!(f, "Expected reply 0x{:02X}, received 0x{:02X}", expected, received),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Fetches the live status of one game server.
///
/// Implementations must not touch shared state; the caller applies the result.
pub trait ServerQuery: Send + Sync + 'static {
    fn query(&self, connection: &str) -> impl Future<Output = Result<ServerStatus, QueryError>> + Send;
}

/// Returns the value of the first `loc:<code>` keyword, if any.
pub fn extract_locale(keywords: &str) -> Option<String> {
    keywords
        .split(' ')
        .find_map(|keyword| {
            let mut kv = keyword.split(':');
            match (kv.next(), kv.next()) {
                (Some("loc"), Some(code)) => Some(code.to_string()),
                _ => None,
            }
        })
}

pub fn extract_mod_version(rules: &HashMap<String, String>) -> String {
    match rules.get(VERSION_RULE) {
        Some(version) => format!("v{}", version),
        None => VERSION_FLOOR.to_string(),
    }
}

/// Bounds one step of a query (address lookup or a reply) by the query timeout.
async fn within<T, F>(timeout: Duration, step: F) -> Result<T, QueryError>
    where F: Future<Output = Result<T, QueryError>>
{
    match tokio::time::timeout(timeout, step).await {
        Ok(result) => result,
        Err(_) => Err(QueryError::Timeout(timeout)),
    }
}

/// Source engine query client over UDP.
#[derive(Debug, Clone)]
pub struct A2sClient {
    timeout: Duration,
}

impl A2sClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn open(&self, connection: &str) -> Result<UdpSocket, QueryError> {
        let server_addr = within(self.timeout, resolve_connection_string(connection)).await?;
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server_addr).await?;
        Ok(socket)
    }

    async fn request(&self, socket: &UdpSocket, request: Request) -> Result<Vec<u8>, QueryError> {
        let mut challenge = None;

        for _ in 0..MAX_CHALLENGE_ATTEMPTS {
            socket.send(&request.encode(challenge)).await?;

            match packet::classify(self.receive(socket).await?)? {
                Reply::Challenge(c) => {
                    debug!("Challenge {:02X?} for {:?}", c, request);
                    challenge = Some(c);
                }
                Reply::Data(message) => return Ok(message),
            }
        }

        Err(QueryError::Malformed(format!("server kept answering {:?} with challenges", request)))
    }

    async fn receive(&self, socket: &UdpSocket) -> Result<Vec<u8>, QueryError> {
        let mut assembler = SplitAssembler::new();
        let mut buffer = [0u8; MAX_DATAGRAM];

        loop {
            let len = within(self.timeout, async {
                socket.recv(&mut buffer).await.map_err(QueryError::from)
            }).await?;

            if let Some(message) = assembler.accept(&buffer[..len])? {
                return Ok(message);
            }
        }
    }
}

impl ServerQuery for A2sClient {
    async fn query(&self, connection: &str) -> Result<ServerStatus, QueryError> {
        let socket = self.open(connection).await?;

        let info = packet::parse_info(&self.request(&socket, Request::Info).await?)?;
        let player_count = packet::parse_player_count(&self.request(&socket, Request::Players).await?)?;
        let rules = packet::parse_rules(&self.request(&socket, Request::Rules).await?)?;

        debug!("{} answered as {:?} with {} players", connection, info.name, player_count);

        Ok(ServerStatus {
            locale: extract_locale(&info.keywords),
            mod_version: extract_mod_version(&rules),
            name: info.name,
            max_players: info.max_players,
            game: info.game,
            map: info.map,
            player_count,
        })
    }
}
