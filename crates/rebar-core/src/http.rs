//! Actix Web bootstrap shared by the edge API and the relay.
//!
//! Each server runs on its own thread with a dedicated actix system, so the
//! callers' worker threads never share a runtime with request handling.

use std::{io, net::SocketAddr, thread::JoinHandle};

use actix_web::{App, HttpServer, http::header, middleware::DefaultHeaders, web};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::telemetry;

/// Handle for a server thread started by [`spawn_http_server`].
pub struct HttpServerHandle {
    addrs: Vec<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HttpServerHandle {
    /// Addresses actually bound; differs from the request when port 0 was asked for.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Signal a graceful stop and block until the thread exits.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Permissive CORS for the browser dashboards.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST"))
}

/// Bind `addr` and serve on a thread called `name`.
///
/// `configure` registers routes and app data for every worker. Bind failures
/// are returned here rather than surfacing later on the server thread.
pub fn spawn_http_server<F>(
    name: &str,
    addr: SocketAddr,
    configure: F,
) -> io::Result<HttpServerHandle>
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<io::Result<Vec<SocketAddr>>>(1);
    let thread_name = name.to_string();
    let handle = telemetry::spawn_thread(name, move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let bound = HttpServer::new(move || {
                App::new()
                    .wrap(cors_headers())
                    .configure(configure.clone())
            })
            .bind(addr);
            let server = match bound {
                Ok(server) => {
                    let _ = ready_tx.send(Ok(server.addrs()));
                    server.run()
                }
                Err(err) => {
                    let message = err.to_string();
                    let _ = ready_tx.send(Err(err));
                    return Err(io::Error::other(message));
                }
            };

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("{thread_name}: HTTP server error: {err}");
        }
    })?;

    let addrs = match ready_rx.recv() {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(err)) => {
            let _ = handle.join();
            return Err(err);
        }
        Err(_) => {
            let _ = handle.join();
            return Err(io::Error::other(format!("{name} exited before binding {addr}")));
        }
    };
    for bound in &addrs {
        info!("{name} listening on http://{bound}");
    }

    Ok(HttpServerHandle {
        addrs,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };

    use actix_web::HttpResponse;

    use super::*;

    fn ping_routes(cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new("pong"))
            .route(
                "/ping",
                web::get().to(|reply: web::Data<&'static str>| async move {
                    HttpResponse::Ok().body(*reply.get_ref())
                }),
            );
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response.to_ascii_lowercase()
    }

    #[test]
    fn serves_configured_routes_with_cors() {
        let server = spawn_http_server("test-http", loopback(), ping_routes).unwrap();
        let addr = server.local_addrs()[0];
        assert_ne!(addr.port(), 0);

        let response = get(addr, "/ping");
        assert!(response.starts_with("http/1.1 200 ok"));
        assert!(response.contains("access-control-allow-origin: *"));
        assert!(response.ends_with("pong"));
        server.stop();

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn bind_failure_is_returned_to_the_caller() {
        let first = spawn_http_server("test-http-a", loopback(), ping_routes).unwrap();
        let taken = first.local_addrs()[0];

        let err = spawn_http_server("test-http-b", taken, ping_routes)
            .err()
            .expect("second bind must fail");
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        first.stop();
    }
}
