// Single-listener HTTP server

use crate::{ConnectionTracker, Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Anything that can answer a request.
///
/// Errors are turned into JSON error responses by the server, using
/// [`Error::status_code`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

/// HTTP/1 server dispatching every request to one handler
pub struct Server {
    handler: Arc<dyn RequestHandler>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl Server {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler,
            tracker: ConnectionTracker::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }

    /// How long to wait for open connections after shutdown is requested
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Connection tracker for the listener
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind `0.0.0.0:port` and serve until `shutdown` resolves
    pub async fn listen<F>(&self, port: u16, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "server listening");

        tokio::pin!(shutdown);
        let (closing_tx, closing_rx) = watch::channel(false);

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
            };

            let Some(guard) = self.tracker.increment() else {
                break;
            };

            let io = TokioIo::new(stream);
            let handler = self.handler.clone();
            let mut closing = closing_rx.clone();

            tokio::spawn(async move {
                let _guard = guard;
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let handler = handler.clone();
                    async move { handle_request(req, handler).await }
                });

                let connection = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(connection);

                let served = tokio::select! {
                    served = connection.as_mut() => served,
                    _ = closing.changed() => {
                        // finish the request in progress, drop idle keep-alives
                        connection.as_mut().graceful_shutdown();
                        connection.as_mut().await
                    }
                };
                if let Err(err) = served {
                    debug!(%peer, error = ?err, "error serving connection");
                }
            });
        }

        info!(
            active = self.tracker.active_count(),
            "server stopped accepting, draining connections"
        );
        self.tracker.stop_accepting();
        let _ = closing_tx.send(true);
        if !self.tracker.drain(self.drain_timeout).await {
            warn!(
                active = self.tracker.active_count(),
                "closing with connections still open"
            );
        }

        Ok(())
    }
}

/// Convert a hyper request, dispatch it, and convert the response back
async fn handle_request(
    req: Request<IncomingBody>,
    handler: Arc<dyn RequestHandler>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = HttpRequest::from_uri(method, &uri);

    for (name, value) in req.headers() {
        if let Ok(value_str) = value.to_str() {
            request
                .headers
                .insert(name.as_str().to_string(), value_str.to_string());
        }
    }

    // HTTP/2 style requests may carry the authority only in the URI
    if request.host().is_none()
        && let Some(authority) = req.uri().authority()
    {
        request
            .headers
            .insert("host".to_string(), authority.as_str().to_string());
    }

    request.body = req.collect().await?.to_bytes().to_vec();

    let response = match handler.handle(request).await {
        Ok(resp) => resp,
        Err(err) => {
            if err.is_server_error() {
                error!(error = %err, "request failed");
            }
            err.into_response()
        }
    };

    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }

    match builder.body(Full::new(Bytes::from(response.body))) {
        Ok(resp) => Ok(resp),
        Err(err) => {
            error!(error = %err, "handler produced an invalid response");
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static;

    #[async_trait]
    impl RequestHandler for Static {
        async fn handle(&self, _request: HttpRequest) -> Result<HttpResponse, Error> {
            Ok(HttpResponse::no_content())
        }
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(Arc::new(Static)).with_drain_timeout(Duration::from_millis(50));

        let result = server.serve(listener, async {}).await;

        assert!(result.is_ok());
        assert!(!server.tracker().is_accepting());
    }
}
