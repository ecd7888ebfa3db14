//! TCP server answering fetch commands.
//!
//! Every accepted connection is registered with the `ConnectionTracker` and
//! handled by its own task. A handler reads 3-byte command tokens one at a
//! time, fetches the requested destination and writes the result back,
//! until the client disconnects. Errors inside a connection become `ERROR`
//! replies or end that connection only; the accept loop keeps running.

use crate::buffer::{receive, send_all};
use crate::client::{Fetch, FetchError};
use crate::config::Config;
use crate::destinations::LOCAL_INDEX;
use crate::protocol::{Command, Response, COMMAND_LEN};
use crate::tracker::{ConnectionTracker, Registration};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// Which command indices get served, and from where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPolicy {
    /// The one index served by default
    pub permitted: usize,
    /// Serve every index
    pub allow_all: bool,
    /// Answer the permitted index with the local destination
    pub local: bool,
}

impl CommandPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            permitted: config.permitted_command,
            allow_all: config.allow_all_commands,
            local: config.local_destination,
        }
    }

    /// Destination to fetch for `index`, or `None` if it is not served.
    pub fn destination(&self, index: usize) -> Option<usize> {
        if index == self.permitted {
            Some(if self.local { LOCAL_INDEX } else { index })
        } else if self.allow_all {
            Some(index)
        } else {
            None
        }
    }
}

/// Server instance
pub struct Server<F> {
    listen: String,
    policy: CommandPolicy,
    fetcher: Arc<F>,
    tracker: Arc<ConnectionTracker>,
}

impl<F: Fetch> Server<F> {
    /// Create a new server instance
    pub fn new(listen: impl Into<String>, policy: CommandPolicy, fetcher: F) -> Self {
        Server {
            listen: listen.into(),
            policy,
            fetcher: Arc::new(fetcher),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Bind the listening socket with address reuse enabled.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = create_listener(addr)?;
        TcpListener::from_std(listener)
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves, then
    /// close every open connection and wait for the handlers to exit.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Server listening");

        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registration = self.tracker.register(peer);
                        trace!(peer = %peer, open = self.tracker.len(), "Accepted connection");
                        let fetcher = Arc::clone(&self.fetcher);
                        let policy = self.policy;

                        handlers.spawn(async move {
                            supervise(stream, peer, registration, fetcher, policy).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },

                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection handler failed");
                    }
                }
            }
        }

        drop(listener);
        let open = self.tracker.close_all();
        info!(open, "Shutting down");

        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Connection handler failed");
            }
        }

        debug_assert!(self.tracker.is_empty());
        info!("Server stopped");
        Ok(())
    }
}

/// Run one connection until it ends or shutdown asks it to close.
///
/// The socket is closed before the connection leaves the tracker.
async fn supervise<F: Fetch>(
    stream: TcpStream,
    peer: SocketAddr,
    registration: Registration,
    fetcher: Arc<F>,
    policy: CommandPolicy,
) {
    let conn_id = registration.id();
    debug!(conn_id, peer = %peer, "New connection");

    let result = tokio::select! {
        result = handle_connection(stream, fetcher.as_ref(), policy) => result,
        _ = registration.closed() => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "server shutting down",
        )),
    };

    match result {
        Ok(()) => debug!(conn_id, peer = %peer, "Connection closed"),
        Err(e) => debug!(conn_id, peer = %peer, error = %e, "Connection error"),
    }
}

/// Handle a single client connection
async fn handle_connection<F: Fetch>(
    mut stream: TcpStream,
    fetcher: &F,
    policy: CommandPolicy,
) -> io::Result<()> {
    loop {
        let token = receive(&mut stream, COMMAND_LEN, None).await?;
        if token.is_empty() {
            trace!("Connection closed by client");
            return Ok(());
        }

        trace!(token = %token.as_text().escape_debug(), "Received command");
        let reply = respond(token.as_bytes(), fetcher, policy).await;
        send_all(&mut stream, &reply, None).await?;
    }
}

/// Build the reply to one command token.
async fn respond<F: Fetch>(token: &[u8], fetcher: &F, policy: CommandPolicy) -> Bytes {
    let command = match Command::parse(token) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Rejected command");
            return Response::error(&e.to_string());
        }
    };

    let index = match policy.destination(command.index) {
        Some(index) => index,
        None => {
            debug!(command = command.index, "Command not served");
            return Response::error(&FetchError::NotImplemented(command.index).to_string());
        }
    };

    trace!(command = command.index, destination = index, "Processing command");
    match fetcher.fetch(index).await {
        Ok(content) => content,
        Err(e) => {
            debug!(destination = index, error = %e, "Fetch failed");
            Response::error(&e.to_string())
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
