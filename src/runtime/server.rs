//! HTTP server loop with graceful shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use super::api::router;
use crate::core::QueryBroker;

/// Serve the broker's routes on `listener` until `shutdown` resolves.
///
/// On shutdown the broker is stopped first, which releases every pending
/// retrieval with 503, then in-flight connections drain.
///
/// # Errors
///
/// Returns the underlying I/O error if the server fails.
pub async fn serve<F>(
    listener: TcpListener,
    broker: Arc<QueryBroker>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&broker));
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            broker.shutdown().await;
        })
        .await
}
