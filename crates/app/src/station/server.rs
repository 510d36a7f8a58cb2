//! Actix Web reporting server exposing the metrics snapshot.
//!
//! The server runs on a dedicated thread so the streaming loop never touches
//! the Actix runtime. Handlers copy the snapshot out under its lock and
//! serialize the copy, so the lock is never held across I/O.
//!
//! With in-memory lines, `POST /gate/high` and `POST /gate/low` drive the
//! enable input so the inference gate can be exercised without hardware.

use std::{
    io,
    path::{Path, PathBuf},
};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::{Method, header},
    web,
};
use anyhow::{Context, Result, anyhow};
use gpio_lines::{InputLine, Level, MemoryLine};
use metrics_exporter_prometheus::PrometheusHandle;
use paddock_core::SharedSnapshot;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::station::telemetry;

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) snapshot: SharedSnapshot,
    pub(crate) prometheus: Option<PrometheusHandle>,
    pub(crate) static_dir: PathBuf,
    /// Enable line the `/gate` route drives; absent for hardware lines.
    pub(crate) enable: Option<MemoryLine>,
}

#[derive(Default)]
/// Handle for the reporting server thread.
pub(crate) struct ReportServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ReportServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Mount the reporting routes. Anything unmatched falls through to static files.
pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/metrics.json", web::get().to(metrics_handler))
        .route("/prometheus", web::get().to(prometheus_handler))
        .route("/gate/{level}", web::post().to(gate_handler))
        .default_service(web::to(static_handler));
}

/// Spawn the reporting server thread and wait until it is listening.
pub(crate) fn spawn_report_server(
    state: ServerState,
    bind: &str,
    port: u16,
) -> Result<ReportServer> {
    let state = web::Data::new(state);
    let address = (bind.to_string(), port);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound_tx, bound_rx) = crossbeam_channel::bounded::<io::Result<()>>(1);

    let handle = telemetry::spawn_thread("metrics-server", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = match HttpServer::new(move || {
                App::new().app_data(state.clone()).configure(routes)
            })
            .workers(1)
            .bind(address)
            {
                Ok(server) => server.run(),
                Err(err) => {
                    let _ = bound_tx.send(Err(err));
                    return Ok(());
                }
            };
            let _ = bound_tx.send(Ok(()));

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn metrics server thread")?;

    match bound_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let _ = handle.join();
            return Err(err).with_context(|| format!("Failed to bind {bind}:{port}"));
        }
        Err(_) => {
            let _ = handle.join();
            return Err(anyhow!("metrics server thread exited before binding"));
        }
    }

    info!("Metrics at http://{bind}:{port}/metrics.json");
    Ok(ReportServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Return the metrics snapshot as JSON.
async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.snapshot.read() {
        Ok(snapshot) => HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
            .json(snapshot),
        Err(err) => {
            warn!("metrics request failed: {err}");
            HttpResponse::ServiceUnavailable()
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .body(err.to_string())
        }
    }
}

/// Render the process's Prometheus metrics.
async fn prometheus_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.prometheus.as_ref() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

/// Drive the in-memory enable line. The edge watcher picks the change up like
/// any external signal.
async fn gate_handler(level: web::Path<String>, state: web::Data<ServerState>) -> HttpResponse {
    let Some(enable) = state.enable.as_ref() else {
        return HttpResponse::NotFound().body("enable line is not drivable with this backend");
    };
    let level = match level.as_str() {
        "high" => Level::High,
        "low" => Level::Low,
        other => {
            return HttpResponse::BadRequest()
                .body(format!("unknown level {other:?}, expected high or low"));
        }
    };

    enable.drive(level);
    info!("{} driven {level} over HTTP", InputLine::id(enable));
    HttpResponse::NoContent().finish()
}

/// Serve files below the static directory.
async fn static_handler(req: HttpRequest, state: web::Data<ServerState>) -> HttpResponse {
    if *req.method() != Method::GET && *req.method() != Method::HEAD {
        return HttpResponse::MethodNotAllowed()
            .insert_header((header::ALLOW, "GET, HEAD"))
            .finish();
    }

    let Some(relative) = sanitize(req.path()) else {
        return HttpResponse::BadRequest().body("invalid path");
    };
    let path = state.static_dir.join(relative);

    match web::block(move || read_static(&path)).await {
        Ok(Ok((body, content_type))) => HttpResponse::Ok().content_type(content_type).body(body),
        Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
            HttpResponse::NotFound().body("not found")
        }
        Ok(Err(err)) => {
            warn!("static file {} failed: {err}", req.path());
            HttpResponse::InternalServerError().finish()
        }
        Err(err) => {
            error!("static file worker failed: {err}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Turn a request path into a relative file path, refusing `..` segments.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            _ if segment.contains('\\') || segment.contains('\0') => return None,
            _ => relative.push(segment),
        }
    }
    Some(relative)
}

fn read_static(path: &Path) -> io::Result<(Vec<u8>, &'static str)> {
    let path = if path.is_dir() {
        path.join("index.html")
    } else {
        path.to_path_buf()
    };
    let body = std::fs::read(&path)?;
    Ok((body, content_type_for(&path)))
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
