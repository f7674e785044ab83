//! # qi-mesh
//!
//! A lightweight RPC/messaging runtime connecting processes into a service
//! mesh: a framed TCP transport, a service directory, and a session layer
//! that ties the two together behind a uniform "invoke method / emit event"
//! surface.

pub mod buffer;
pub mod cli;
pub mod codec;
pub mod error;
pub mod logging;
pub mod message;
pub mod reactor;
pub mod service_directory;
pub mod session;
pub mod transport_server;
pub mod transport_socket;
pub mod url;

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use message::{Message, MessageHeader, MessageType};
pub use reactor::NetworkReactor;
pub use service_directory::{ServiceDirectory, ServiceInfo};
pub use session::{Session, ServiceObject, ServiceProxy, Signal};
pub use transport_server::TransportServer;
pub use transport_socket::{ConnectionState, SocketSink, TransportSocket};
pub use url::Url;

/// The current version of the mesh runtime.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tunables with no corresponding CLI flag: timeouts and table limits that
/// callers generally accept as given.
pub mod defaults {
    use std::time::Duration;

    /// How long `TransportSocket::connect` waits for the TCP handshake.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default deadline for a directory RPC issued internally by the
    /// session layer (service lookup, registration). Calls through
    /// `ServiceProxy` are unbounded unless the caller opts into
    /// `call_timeout`.
    pub const DIRECTORY_CALL_TIMEOUT: Duration = Duration::from_secs(5);

    /// Emit a warning once a socket's correlation table holds this many
    /// unresolved calls, as a signal of a wedged peer rather than a hard cap.
    pub const CORRELATION_TABLE_WARN_THRESHOLD: usize = 4096;

    /// Default listen URL used by the CLI binary when `--listen` and
    /// `QI_LISTEN_URL` are both absent.
    pub const DEFAULT_LISTEN_URL: &str = "tcp://0.0.0.0:9559";
}
