use crate::errors::Result;
use crate::routes;
use crate::workspace::SharedWorkspace;

use std::net::{Ipv4Addr, SocketAddr};
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;

pub(crate) struct Server {
    workspace: SharedWorkspace,
    addr: SocketAddr,
    allowed_origins: Vec<String>,
}

impl Server {
    pub(crate) async fn start(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        println!("Serving on http://{}", self.addr);
        let incoming = TcpListenerStream::new(listener);
        tracing::info!("Accepting browser requests from {:?}", self.allowed_origins);
        let server = warp::serve(routes::routes(self.workspace.clone(), &self.allowed_origins))
            .serve_incoming_with_graceful_shutdown(incoming, async {
                if let Err(e) = signal::ctrl_c().await {
                    tracing::error!("Unable to listen for shutdown signal: {}", e);
                }
            });
        server.await;
        tracing::info!("Server stopped");
        println!("Shutting down server...");
        Ok(())
    }
}

/// Local only: the server is never exposed beyond the loopback interface.
pub(crate) fn get_server(port: u16, workspace: SharedWorkspace, allowed_origins: Vec<String>) -> Server {
    Server {
        workspace,
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        allowed_origins,
    }
}
