//! Process glue: tracing, storage connection, router assembly and serving.

use crate::auth::AuthService;
use crate::config::ServerOptions;
use crate::docs::{docs_router, DOCS_PATH, VIEWER_PATH};
use crate::error::{AppError, ConfigError};
use crate::registry::Registry;
use crate::response::{self, plain_text};
use crate::secure::FieldCipher;
use crate::service::Transactional;
use crate::state::AppState;
use crate::store::{ensure_database_exists, PgStorage, Storage};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

pub const MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

/// Install the fmt subscriber; `RUST_LOG` wins over the default directive.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("blueprint_sdk=info")),
        )
        .try_init();
}

/// Create the database if needed and open a pooled PostgreSQL storage with its cipher.
pub async fn connect(options: &ServerOptions) -> Result<Transactional, AppError> {
    ensure_database_exists(&options.database.url).await?;
    let storage = PgStorage::connect(&options.database).await?;
    let cipher = FieldCipher::new(&options.database.secure_key);
    Ok(Transactional::new(Arc::new(storage), Arc::new(cipher)))
}

/// Paths the application router answers itself with `GET`.
const RESERVED_PATHS: [&str; 3] = ["/", DOCS_PATH, VIEWER_PATH];

async fn service_name(State(state): State<AppState>) -> Response {
    plain_text(StatusCode::OK, state.service_name.to_string())
}

/// The complete application router: declared routes under the prefix, documentation,
/// `GET /`, the plain-text 404 fallback, CORS and the body limit.
pub fn app(registry: &Registry, options: &ServerOptions, auth: AuthService) -> Result<Router, ConfigError> {
    check_reserved_paths(registry, &options.prefix)?;
    let state = AppState::new(auth, options.swagger.name.as_str());
    let api = registry.router()?.with_state(state.clone());
    let doc = Arc::new(registry.api_doc(&options.swagger, &options.prefix));

    let root = Router::new().route("/", get(service_name)).with_state(state);
    let router = if options.prefix.is_empty() {
        root.merge(api)
    } else {
        root.nest(&options.prefix, api)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ]);

    Ok(router
        .merge(docs_router(doc))
        .fallback(response::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors))
}

/// A declared `GET` route may not land on a path the application serves itself.
fn check_reserved_paths(registry: &Registry, prefix: &str) -> Result<(), ConfigError> {
    for route in registry.routes() {
        if route.method != Method::GET {
            continue;
        }
        let served_at = match route.native_path.as_str() {
            "/" if !prefix.is_empty() => prefix.to_string(),
            path => format!("{}{}", prefix, path),
        };
        if RESERVED_PATHS.contains(&served_at.as_str()) {
            return Err(ConfigError::InvalidRoute(format!(
                "{} {} is reserved by the application",
                route.method, served_at
            )));
        }
    }
    Ok(())
}

pub async fn serve(app: Router, port: u16) -> Result<(), AppError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Sync tables when asked to, assemble the router and serve until the process stops.
pub async fn run(
    registry: Registry,
    options: ServerOptions,
    storage: &dyn Storage,
    auth: AuthService,
) -> Result<(), AppError> {
    if options.sync_on_start {
        storage.sync(registry.entities()?).await?;
    }
    let router = app(&registry, &options, auth)?;
    tracing::info!(
        routes = registry.routes().len(),
        prefix = %options.prefix,
        "application assembled"
    );
    serve(router, options.port).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::Route;

    fn build(prefix: &str, route: Route) -> Result<Router, ConfigError> {
        let mut registry = Registry::new();
        registry.route(route).unwrap();
        let mut options = ServerOptions::default();
        options.prefix = prefix.to_string();
        let auth = AuthService::new(&options.auth);
        app(&registry, &options, auth)
    }

    #[test]
    fn routes_on_reserved_paths_are_rejected() {
        for path in ["/", "/api-docs", "/swagger-ui.html"] {
            let err = build("", Route::get(path).handle(|_| async { Ok("mine") })).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidRoute(ref m) if m.contains(path)));
        }
    }

    #[test]
    fn reserved_paths_are_free_under_a_prefix_or_another_method() {
        assert!(build("/api", Route::get("/").handle(|_| async { Ok("api root") })).is_ok());
        assert!(build("/api", Route::get("/api-docs").handle(|_| async { Ok("nested") })).is_ok());
        assert!(build("", Route::post("/").handle(|_| async { Ok("posted") })).is_ok());
    }
}
