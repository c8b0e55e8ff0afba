//! Application wiring: backend selection, engine, outbox executor, router.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;

use comptoir_auth::Hs256JwtValidator;
use comptoir_billing::FileRenderer;
use comptoir_store::jobs::{
    JobExecutor, JobExecutorConfig, JobExecutorHandle, JobStore, register_engine_handlers,
};
use comptoir_store::{MemoryStore, OrderEngine, PgStore, Store, TracingNotificationSink};

use crate::middleware::{AuthState, auth_middleware};
use crate::routes;

/// Shared request state.
pub struct AppState<S: Store> {
    pub engine: Arc<OrderEngine<S>>,
    pub renderer: Arc<FileRenderer>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            renderer: self.renderer.clone(),
        }
    }
}

/// The built application: router plus the running outbox executor.
///
/// Keep the `jobs` handle alive for as long as the server runs; dropping it
/// stops the executor.
pub struct App {
    pub router: Router,
    pub jobs: JobExecutorHandle,
}

/// Build the application against the backend selected by the environment:
/// `DATABASE_URL` set means Postgres (with migrations applied), otherwise
/// the in-memory store (dev/test).
pub async fn build_app(jwt_secret: String) -> App {
    let document_dir: PathBuf = std::env::var("DOCUMENT_DIR")
        .unwrap_or_else(|_| "./documents".to_string())
        .into();

    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgStore::connect(&url)
                .await
                .expect("failed to connect to Postgres");
            store.migrate().await.expect("failed to run migrations");
            build_app_with_store(Arc::new(store), jwt_secret, document_dir)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            build_app_with_store(Arc::new(MemoryStore::new()), jwt_secret, document_dir)
        }
    }
}

/// Build the application over an explicit store (tests inject a pre-seeded
/// [`MemoryStore`] here).
pub fn build_app_with_store<S>(store: Arc<S>, jwt_secret: String, document_dir: PathBuf) -> App
where
    S: Store + JobStore + 'static,
{
    let renderer = Arc::new(FileRenderer::new(document_dir));
    let notifier = Arc::new(TracingNotificationSink);
    let engine = Arc::new(OrderEngine::new(
        store.clone(),
        renderer.clone(),
        notifier,
    ));

    let mut executor = JobExecutor::new(store);
    register_engine_handlers(&mut executor, engine.clone());
    let jobs = executor.spawn(JobExecutorConfig::default().with_name("comptoir-outbox"));

    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = AuthState { jwt };
    let state = AppState { engine, renderer };

    // Protected routes: require auth; the engine state rides along as an
    // extension.
    let protected = Router::new()
        .merge(routes::orders::router::<S>())
        .merge(routes::stock::router::<S>())
        .layer(ServiceBuilder::new().layer(Extension(state)))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ));

    let router = Router::new()
        .route("/health", get(health))
        .merge(protected);

    App { router, jobs }
}

async fn health() -> StatusCode {
    StatusCode::OK
}
