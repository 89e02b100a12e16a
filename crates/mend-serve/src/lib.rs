pub mod openapi;
pub mod routes;

use mend_core::config::Config;
use mend_core::error::MendError;
use mend_core::metrics::MetricsRegistry;
use mend_core::personality::PersonalityProfiler;
use mend_db::schema;
use mend_db::store::DbStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub db_path: String,
    pub config: Arc<Config>,
    pub metrics: Arc<MetricsRegistry>,
    pub profiler: Arc<PersonalityProfiler>,
}

pub fn build_store(state: &AppState) -> Result<DbStore, MendError> {
    let conn = schema::open_and_migrate(&state.db_path).map_err(|err| MendError::Internal {
        message: err.to_string(),
    })?;
    Ok(DbStore::new(conn))
}

pub fn app(state: AppState) -> axum::Router {
    routes::router(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_core::clock::SystemClock;
    use mend_core::memory::PatternRepository;
    use mend_core::store::Store;

    #[test]
    fn build_store_creates_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            db_path: dir.path().join("mend.db").display().to_string(),
            config: Arc::new(Config::default()),
            metrics: Arc::new(MetricsRegistry::default()),
            profiler: Arc::new(PersonalityProfiler::new(Arc::new(SystemClock))),
        };
        let store = build_store(&state).expect("store opens");
        assert_eq!(store.patterns().count().unwrap(), 0);
    }

    #[test]
    fn openapi_spec_lists_dashboard_paths() {
        let spec = crate::openapi::generate_spec();
        for path in ["/api/stats", "/api/failures", "/api/audit", "/api/circuits"] {
            assert!(spec.contains(path), "missing {path}");
        }
    }
}
