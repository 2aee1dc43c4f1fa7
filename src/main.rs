//! Backup relay server binary.
//!
//! Devices POST labelled uploads to `/upload`; the server decodes the label,
//! writes one file per upload into the upload directory and keeps running
//! statistics mirrored to a sidecar JSON file. Read endpoints list, download
//! and summarize what has been received.

mod atomic;
mod background;
mod config;
mod decoder;
mod error;
mod etag;
mod files;
mod frontend;
mod http;
mod locking;
mod logging;
mod naming;
mod persist;
mod stats;
mod storage;
mod tls;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::files::ListingConfig;
use crate::http::{build_cors_layer, extract_forwarded_ip};
use crate::locking::LockManager;
use crate::stats::StatsStore;
use crate::storage::Storage;
use crate::upload::IngestConfig;

shadow!(build);

/// Starts the relay server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.upload_dir)));
    storage.ensure_root().await?;
    let stats = Arc::new(StatsStore::new(PathBuf::from(&args.stats_file)));
    let locks = Arc::new(LockManager::new());
    let ingest = Arc::new(IngestConfig {
        on_collision: args.on_collision,
        lock_timeout: Duration::from_secs(args.lock_timeout_secs),
    });
    let listing = Arc::new(ListingConfig {
        default_limit: args.list_limit,
    });
    let stats_for_tasks = stats.clone();
    let stats_for_shutdown = stats.clone();

    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(args.max_body_bytes)),
        )
        .route("/files", get(files::list_files))
        .route("/photos", get(files::list_photos))
        .route("/audios", get(files::list_audios))
        .route("/download/{filename}", get(files::download_file))
        .route("/stats", get(stats::get_stats))
        .route("/clear", get(files::clear_files).post(files::clear_files))
        .route("/api/version", get(version::get_version_info))
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = extract_forwarded_ip(request.headers())
                        .or(connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(storage.clone()))
        .layer(Extension(stats))
        .layer(Extension(locks))
        .layer(Extension(ingest))
        .layer(Extension(listing));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https = match args.https_port {
        Some(port) => Some((
            SocketAddr::new(host, port),
            tls::build_rustls_config(&args, host).await?,
        )),
        None => None,
    };
    let handle = Handle::new();

    info!("Starting HTTP server at {}", http_addr);
    info!(
        upload_dir = ?storage.root_path(),
        stats_file = args.stats_file,
        "storage ready"
    );

    let flush_task = spawn_background_tasks(
        stats_for_tasks,
        Duration::from_secs(args.stats_flush_interval_secs),
    );
    let signal_task = tokio::spawn(shutdown_signal(handle.clone()));

    let served = serve_until_drained(app, http_addr, https, handle).await;
    signal_task.abort();
    if let Some(task) = flush_task {
        task.abort();
    }
    if let Err(err) = stats_for_shutdown.flush_if_dirty().await {
        warn!(error = %err, "final stats flush failed");
    }

    served
}

/// Serves HTTP (and HTTPS when configured) until `handle` shuts down and
/// every in-flight connection has finished or hit the grace period.
async fn serve_until_drained(
    app: Router,
    http_addr: SocketAddr,
    https: Option<(SocketAddr, RustlsConfig)>,
    handle: Handle,
) -> Result<(), std::io::Error> {
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(
            app.clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        );
    let https_server = async move {
        match https {
            Some((https_addr, tls_config)) => {
                info!("Starting HTTPS server at {}", https_addr);
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => Ok(()),
        }
    };

    tokio::try_join!(http_server, https_server)?;
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_requests() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let app = Router::new().route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                "done"
            }),
        );

        let handle = Handle::new();
        let server = tokio::spawn(serve_until_drained(
            app,
            SocketAddr::from(([127, 0, 0, 1], 0)),
            None,
            handle.clone(),
        ));
        let addr = handle.listening().await.expect("listening");

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.graceful_shutdown(Some(Duration::from_secs(5)));

        server.await.expect("join").expect("serve");
        assert!(finished.load(Ordering::SeqCst));

        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("read");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("done"));
    }
}
