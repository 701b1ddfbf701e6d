//! Connection management.

use crate::address::Address;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tnt_protocol::{Request, Response, Tuple};
use tokio::net::TcpStream;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Space used by requests that name none. Overrides a default space
    /// embedded in the address.
    pub default_space: Option<u32>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout. `None` waits for as long as the connection lives.
    pub request_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_space: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_space(mut self, space: u32) -> Self {
        self.default_space = Some(space);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Picks the space a request is sent to.
///
/// An explicit nonzero request space wins, then the configured default,
/// then the address default, and finally 0, leaving the choice to the server.
pub fn resolve_space(requested: u32, options: &Options, address: &Address) -> u32 {
    if requested != 0 {
        return requested;
    }
    options
        .default_space
        .or(address.default_space)
        .unwrap_or(0)
}

/// A connection to a tuple-store server.
///
/// Any number of tasks may call [`Connection::execute`] concurrently; their
/// requests are pipelined over the one socket.
pub struct Connection {
    address: Address,
    options: Options,
    dispatcher: Dispatcher,
}

impl Connection {
    /// Connects to `addr` (`host:port` or `host:port/space`).
    pub async fn connect(addr: &str, options: Option<Options>) -> Result<Self, ClientError> {
        let address: Address = addr.parse()?;
        Self::connect_to(address, options.unwrap_or_default()).await
    }

    /// Connects to an already parsed address.
    pub async fn connect_to(address: Address, options: Options) -> Result<Self, ClientError> {
        let target = address.host_port();
        tracing::debug!("Connecting to {}...", target);

        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Dial {
                    addr: target.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                }
            })?
            .map_err(|source| {
                tracing::debug!("Connection failed: {}", source);
                ClientError::Dial {
                    addr: target.clone(),
                    source,
                }
            })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", target);

        Ok(Self {
            address,
            options,
            dispatcher: Dispatcher::start(stream),
        })
    }

    /// Executes a request and waits for its tuples.
    ///
    /// Operations that return no rows, such as ping or a write without the
    /// return-tuple flag, yield an empty vector. A nonzero server status is
    /// returned as [`ClientError::Server`] carrying the server's message.
    ///
    /// With a request timeout configured, the deadline covers both writing
    /// the frame and waiting for the reply. Timing out mid-write closes the
    /// connection.
    pub async fn execute(&self, request: impl Into<Request>) -> Result<Vec<Tuple>, ClientError> {
        let mut request = request.into();
        validate(&request)?;

        if let Some(space) = request.space_mut() {
            *space = resolve_space(*space, &self.options, &self.address);
        }

        let Some(timeout) = self.options.request_timeout else {
            let response = self.dispatcher.send(&request).await?.await?;
            return into_tuples(response);
        };
        let deadline = tokio::time::Instant::now() + timeout;

        let sent = tokio::time::timeout_at(deadline, self.dispatcher.send(&request)).await;
        let mut pending = match sent {
            Ok(pending) => pending?,
            Err(_) => {
                // The frame may be half written, so the stream cannot be reused.
                tracing::warn!("Request timed out while writing, closing connection");
                self.dispatcher.close().await;
                return Err(ClientError::Timeout);
            }
        };

        let response = match tokio::time::timeout_at(deadline, &mut pending).await {
            Ok(response) => response?,
            Err(_) => {
                tracing::debug!("Request id={} timed out", pending.request_id());
                self.dispatcher.forget(pending.request_id());
                return Err(ClientError::Timeout);
            }
        };

        into_tuples(response)
    }

    /// Returns whether the connection is still usable.
    pub fn is_connected(&self) -> bool {
        !self.dispatcher.is_closed()
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Closes the connection. In-flight requests fail with
    /// [`ClientError::ConnectionClosed`]. Calling this more than once is a no-op.
    pub async fn close(&self) {
        tracing::debug!("Closing connection to {}", self.address);
        self.dispatcher.close().await;
    }
}

/// Rejects requests that cannot be meaningfully sent.
fn validate(request: &Request) -> Result<(), ClientError> {
    if let Request::Select(select) = request {
        if select.keys.is_empty() {
            return Err(ClientError::InvalidArgument(
                "select requires at least one key".to_string(),
            ));
        }
        if select.keys.iter().any(Tuple::is_empty) {
            return Err(ClientError::InvalidArgument(
                "select key has no fields".to_string(),
            ));
        }
    }
    Ok(())
}

fn into_tuples(response: Response) -> Result<Vec<Tuple>, ClientError> {
    if response.is_error() {
        return Err(ClientError::Server {
            code: response.return_code.error_code(),
            status: response.return_code.status(),
            message: response.error_message.unwrap_or_default(),
        });
    }
    Ok(response.tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tnt_protocol::{tuple, CompletionStatus, ErrorCode, Select};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let options = Options::default();
        assert_eq!(options.default_space, None);
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.request_timeout, None);
    }

    #[test]
    fn test_options_from_json() {
        let options: Options = serde_json::from_str(r#"{"default_space": 48}"#).unwrap();
        assert_eq!(options.default_space, Some(48));
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_explicit_space_wins() {
        let options = Options::new().with_default_space(48);
        assert_eq!(resolve_space(7, &options, &addr("h:1/24")), 7);
    }

    #[test]
    fn test_configured_default_beats_address_default() {
        let options = Options::new().with_default_space(48);
        assert_eq!(resolve_space(0, &options, &addr("h:1/24")), 48);
    }

    #[test]
    fn test_address_default_used_without_configuration() {
        assert_eq!(resolve_space(0, &Options::default(), &addr("h:1/24")), 24);
    }

    #[test]
    fn test_unset_everything_resolves_to_zero() {
        assert_eq!(resolve_space(0, &Options::default(), &addr("h:1")), 0);
    }

    #[test]
    fn test_validate_select_keys() {
        assert!(validate(&Select::by_value(0u32).into()).is_ok());
        assert!(validate(&Request::Ping).is_ok());

        let empty_keys = Request::from(Select::by_keys(vec![]));
        assert!(matches!(
            validate(&empty_keys),
            Err(ClientError::InvalidArgument(_))
        ));

        let empty_field_list = Request::from(Select::by_keys(vec![tuple![1u32], Tuple::default()]));
        assert!(matches!(
            validate(&empty_field_list),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_into_tuples() {
        let tuples = into_tuples(Response::ok(vec![tuple![1u32, "a"]])).unwrap();
        assert_eq!(tuples, vec![tuple![1u32, "a"]]);

        assert!(into_tuples(Response::default()).unwrap().is_empty());

        let err = into_tuples(Response::error(
            CompletionStatus::Error,
            ErrorCode::NoSuchSpace,
            "Space 0 does not exist",
        ))
        .unwrap_err();
        assert_eq!(err.to_string(), "Space 0 does not exist");
        assert_eq!(err.server_code(), Some(ErrorCode::NoSuchSpace));
    }

    #[tokio::test]
    async fn test_dial_error() {
        // Bind then drop to find a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connection::connect(&format!("127.0.0.1:{port}"), None).await;
        assert!(matches!(result, Err(ClientError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = Connection::connect("no-port-here", None).await;
        assert!(matches!(result, Err(ClientError::InvalidAddress(_))));
    }
}
