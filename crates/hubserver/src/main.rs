use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use hubcore::{HubError, RunId, RunStatus, WorkflowDefinition};
use hubruntime::{Engine, EngineConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    engine: Engine,
    prometheus: Option<PrometheusHandle>,
}

/// Request body for run submission
#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(flatten)]
    workflow: WorkflowDefinition,
    #[serde(default)]
    inputs: HashMap<String, serde_json::Value>,
}

/// Response for run submission
#[derive(Debug, Serialize)]
struct SubmitResponse {
    run_id: RunId,
    status: RunStatus,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(run_id: RunId) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Run {} not found", run_id),
    })
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "runhub",
        "running": data.engine.running_count(),
        "queued": data.engine.queued_count(),
    }))
}

/// Submit a workflow run
#[post("/api/runs")]
async fn submit_run(
    data: web::Data<AppState>,
    req: web::Json<SubmitRequest>,
) -> ActixResult<impl Responder> {
    let SubmitRequest { workflow, inputs } = req.into_inner();
    let name = workflow.name.clone();

    match data.engine.submit_with_inputs(workflow, inputs) {
        Ok(run_id) => {
            let status = data
                .engine
                .status(run_id)
                .map(|s| s.status)
                .unwrap_or(RunStatus::Queued);
            info!("Accepted run {} of '{}' ({})", run_id, name, status);

            Ok(HttpResponse::Accepted().json(SubmitResponse { run_id, status }))
        }
        Err(e @ HubError::Workflow(_)) => {
            warn!("Rejected workflow '{}': {}", name, e);
            Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
        Err(e) => {
            error!("Failed to submit '{}': {}", name, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Current state of a run
#[get("/api/runs/{id}")]
async fn get_run(data: web::Data<AppState>, path: web::Path<RunId>) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();

    Ok(match data.engine.status(run_id) {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => not_found(run_id),
    })
}

/// Stop a queued or running run
#[post("/api/runs/{id}/stop")]
async fn stop_run(data: web::Data<AppState>, path: web::Path<RunId>) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();

    if data.engine.stop(run_id) {
        info!("Stopped run {} on request", run_id);
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "run_id": run_id,
            "stopped": true,
        })));
    }

    Ok(match data.engine.status(run_id) {
        // Known but already terminal
        Some(snapshot) => HttpResponse::Conflict().json(ErrorResponse {
            error: format!("Run {} is already {}", run_id, snapshot.status),
        }),
        None => not_found(run_id),
    })
}

/// Terminal runs, newest first
#[get("/api/history")]
async fn get_history(
    data: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.engine.history(query.limit)))
}

#[get("/api/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.engine.metrics()))
}

/// Prometheus exposition
#[get("/metrics")]
async fn prometheus_metrics(data: web::Data<AppState>) -> impl Responder {
    match &data.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().json(ErrorResponse {
            error: "metrics recorder not installed".to_string(),
        }),
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.engine.subscribe();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        // A slow client misses events rather than stalling the engine.
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.engine.registry();

    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            serde_json::json!({
                "type": node_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

fn load_config() -> anyhow::Result<EngineConfig> {
    match std::env::var("RUNHUB_CONFIG") {
        Ok(path) => {
            info!("Loading engine config from {}", path);
            Ok(EngineConfig::load(Path::new(&path))?)
        }
        Err(_) => Ok(EngineConfig::default()),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting runhub server");

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    let config = load_config()?;
    let registry = hubnodes::standard_registry()?;
    let engine = Engine::with_registry(Arc::new(registry), config);

    info!(
        "✅ Engine ready: {} node types, {} concurrent runs",
        engine.registry().len(),
        engine.config().max_concurrent_runs
    );

    let app_state = web::Data::new(AppState {
        engine: engine.clone(),
        prometheus,
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(submit_run)
            .service(get_run)
            .service(stop_run)
            .service(get_history)
            .service(get_metrics)
            .service(prometheus_metrics)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    let stopped = engine.shutdown();
    info!("Server stopped, {} runs interrupted", stopped);

    Ok(())
}
