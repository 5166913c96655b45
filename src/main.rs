use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use switchboard::config::{self, StoreBackend};
use switchboard::errors::AppError;
use switchboard::models::credential::Category;
use switchboard::models::mapping::NewMapping;
use switchboard::registry::usage;
use switchboard::store::memory::MemoryStore;
use switchboard::store::postgres::PgStore;
use switchboard::store::RegistryStore;
use switchboard::{api, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export spans over OTLP only when a collector endpoint is configured
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "switchboard"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "switchboard=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Credential { command }) => {
            let state = build_state(cfg).await?;
            handle_credential_command(command, &state).await
        }
        Some(cli::Commands::Mapping { command }) => {
            let state = build_state(cfg).await?;
            handle_mapping_command(command, &state).await
        }
        Some(cli::Commands::RateLimit { command }) => {
            let state = build_state(cfg).await?;
            handle_rate_limit_command(command, &state).await
        }
        Some(cli::Commands::Usage { command }) => {
            let state = build_state(cfg).await?;
            handle_usage_command(command, &state).await
        }
        Some(cli::Commands::Dispatch { function, payload }) => {
            let state = build_state(cfg).await?;
            handle_dispatch_command(&function, &payload, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn open_store(cfg: &config::Config) -> anyhow::Result<Arc<dyn RegistryStore>> {
    match cfg.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, all data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let store = open_store(&cfg).await?;
    Ok(Arc::new(AppState::new(cfg, store)?))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let state = build_state(cfg).await?;

    let app = api::app(state.clone())
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    jobs::rate_limit_reset::spawn(state.registry.rate_limits.clone());
    tracing::info!("Background rate limit rollover job started (every 1h)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Switchboard listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response. Credential listings
/// must never be cached by a browser or proxy.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid id: {}", raw))
}

fn parse_category(raw: &str) -> anyhow::Result<Category> {
    raw.parse::<Category>().map_err(anyhow::Error::msg)
}

async fn handle_credential_command(
    cmd: cli::CredentialCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let creds = &state.registry.credentials;
    match cmd {
        cli::CredentialCommands::Add {
            service,
            category,
            key,
            base_url,
        } => {
            let category = parse_category(&category)?;
            let view = creds
                .upsert_credential(&service, category, &key, base_url.as_deref())
                .await?;
            println!(
                "Credential saved:\n  ID:          {}\n  Service:     {}\n  Category:    {}\n  Fingerprint: {}\n  Status:      {}",
                view.id,
                view.service_name,
                view.category,
                view.key_fingerprint,
                view.status.as_str()
            );
            for err in &view.validation_errors {
                println!("  ! {}", err);
            }
        }
        cli::CredentialCommands::List => {
            let grouped = creds.list_by_category().await?;
            println!(
                "{:<38} {:<18} {:<14} {:<9} {:<8}",
                "ID", "SERVICE", "FINGERPRINT", "STATUS", "PRIMARY"
            );
            for (category, views) in grouped {
                println!("── {} ({})", category, views.len());
                for v in views {
                    println!(
                        "{:<38} {:<18} {:<14} {:<9} {:<8}",
                        v.id,
                        v.service_name,
                        v.key_fingerprint,
                        v.status.as_str(),
                        if v.is_primary { "yes" } else { "" }
                    );
                }
            }
        }
        cli::CredentialCommands::Primary { id, category } => {
            let view = creds.set_primary(parse_id(&id)?, parse_category(&category)?).await?;
            println!("{} is now the primary for {}.", view.service_name, view.category);
        }
        cli::CredentialCommands::Enable { id } => {
            let view = creds.set_active(parse_id(&id)?, true).await?;
            println!("Credential {} enabled.", view.id);
        }
        cli::CredentialCommands::Disable { id } => {
            let view = creds.set_active(parse_id(&id)?, false).await?;
            println!("Credential {} disabled.", view.id);
        }
        cli::CredentialCommands::Delete { id } => {
            creds.delete(parse_id(&id)?).await?;
            println!("Credential deleted.");
        }
    }
    Ok(())
}

async fn handle_mapping_command(
    cmd: cli::MappingCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let mappings = &state.registry.mappings;
    match cmd {
        cli::MappingCommands::Set {
            function,
            preferred,
            fallback,
            description,
        } => {
            let saved = mappings
                .upsert(NewMapping {
                    function_name: function,
                    preferred_service: preferred,
                    fallback_service: fallback,
                    description,
                })
                .await?;
            println!(
                "Mapping saved:\n  Function:  {}\n  Preferred: {}\n  Fallback:  {}",
                saved.function_name,
                saved.preferred_service,
                saved.fallback_service.as_deref().unwrap_or("-")
            );
        }
        cli::MappingCommands::List => {
            let rows = mappings.list().await?;
            if rows.is_empty() {
                println!("No mappings found.");
            } else {
                println!("{:<38} {:<28} {:<16} {:<16}", "ID", "FUNCTION", "PREFERRED", "FALLBACK");
                for m in rows {
                    println!(
                        "{:<38} {:<28} {:<16} {:<16}",
                        m.id,
                        m.function_name,
                        m.preferred_service,
                        m.fallback_service.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        cli::MappingCommands::Delete { id } => {
            mappings.delete(parse_id(&id)?).await?;
            println!("Mapping deleted.");
        }
    }
    Ok(())
}

async fn handle_rate_limit_command(
    cmd: cli::RateLimitCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let ledger = &state.registry.rate_limits;
    match cmd {
        cli::RateLimitCommands::Set {
            service,
            limit,
            reset_date,
        } => {
            let reset_date = reset_date
                .map(|d| chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
                .transpose()
                .context("reset_date must be YYYY-MM-DD")?;
            let status = ledger.configure(&service, limit, reset_date).await?;
            println!(
                "Rate limit set: {} {}/{} (resets {})",
                status.service_name, status.requests_used, status.request_limit, status.reset_date
            );
        }
        cli::RateLimitCommands::List => {
            let rows = ledger.list().await?;
            if rows.is_empty() {
                println!("No rate limits configured.");
            } else {
                println!("{:<18} {:>10} {:>10} {:>7} {:<12}", "SERVICE", "USED", "LIMIT", "USE%", "RESETS");
                for r in rows {
                    println!(
                        "{:<18} {:>10} {:>10} {:>6.1}% {:<12}{}",
                        r.service_name,
                        r.requests_used,
                        r.request_limit,
                        r.usage_percent,
                        r.reset_date,
                        if r.near_limit { " ⚠" } else { "" }
                    );
                }
            }
        }
        cli::RateLimitCommands::Reset { service } => {
            let status = ledger.reset(&service).await?;
            println!("{} reset; next reset {}.", status.service_name, status.reset_date);
        }
    }
    Ok(())
}

async fn handle_usage_command(cmd: cli::UsageCommands, state: &Arc<AppState>) -> anyhow::Result<()> {
    match cmd {
        cli::UsageCommands::Stats { days } => {
            let since = days.map(usage::window_start).transpose()?;
            let stats = state.registry.usage.aggregate(since).await?;
            for (title, groups) in [("SERVICE", &stats.by_service), ("CATEGORY", &stats.by_category)] {
                println!("{:<20} {:>8} {:>8} {:>8} {:>10}", title, "TOTAL", "OK", "FAILED", "AVG MS");
                for (key, s) in groups {
                    println!(
                        "{:<20} {:>8} {:>8} {:>8} {:>10.1}",
                        key, s.total, s.success, s.failure, s.avg_response_time_ms
                    );
                }
                println!();
            }
        }
    }
    Ok(())
}

async fn handle_dispatch_command(
    function: &str,
    payload: &str,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("--payload must be valid JSON")?;
    let outcome = state.dispatcher.dispatch(function, &payload).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        return Err(AppError::ProviderCallFailed {
            service: outcome.service_name,
            message: outcome.error.unwrap_or_default(),
        }
        .into());
    }
    Ok(())
}
