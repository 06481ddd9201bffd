pub mod cli;
pub mod config;
pub mod db;
pub mod events;
pub mod handlers;
pub mod managers;
pub mod operators;
pub mod restore;
pub mod test_utils;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;
use teamserver_shared::{TeamserverError, TeamserverResult};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::Persistence;
use crate::events::EventBus;
use crate::managers::{
    AgentRegistry, ExtensionProvider, ListenerRegistry, Plugin, PluginLoader, PluginRegistry,
    TypeCatalog,
};
use crate::operators::OperatorSessions;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The core context. Constructed once at startup and shared by the
/// transport adapter and every plugin handle.
pub struct Teamserver {
    pub config: AppConfig,
    pub plugins: Arc<PluginRegistry>,
    pub catalog: Arc<TypeCatalog>,
    pub agents: Arc<AgentRegistry>,
    pub listeners: Arc<ListenerRegistry>,
    pub events: Arc<EventBus>,
    pub operators: OperatorSessions,
    pub store: Arc<dyn Persistence>,
    loader: PluginLoader,
}

impl Teamserver {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Persistence>,
        provider: Arc<dyn ExtensionProvider>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new(config.operator_queue_capacity));
        let plugins = Arc::new(PluginRegistry::new());
        let catalog = Arc::new(TypeCatalog::new(events.clone()));
        let agents = Arc::new(AgentRegistry::new(
            plugins.clone(),
            catalog.clone(),
            events.clone(),
            store.clone(),
        ));
        let listeners = Arc::new(ListenerRegistry::new(
            plugins.clone(),
            catalog.clone(),
            events.clone(),
            store.clone(),
            config.listeners_dir(),
        ));
        let operators = OperatorSessions::new(
            &config.operators,
            events.clone(),
            Duration::from_secs(config.pending_token_ttl_secs),
        );

        Arc::new(Self {
            config,
            plugins,
            catalog,
            agents,
            listeners,
            events,
            operators,
            store,
            loader: PluginLoader::new(provider),
        })
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub async fn load_plugin(self: &Arc<Self>, path: &str) -> TeamserverResult<Arc<Plugin>> {
        self.loader.load(self, path).await
    }

    /// Loads the profile's plugin list, or every available extension when
    /// the profile names none.
    pub async fn load_plugins(self: &Arc<Self>) -> Vec<Arc<Plugin>> {
        self.loader.load_all(self, &self.config.plugins).await
    }

    #[must_use]
    pub fn available_extensions(&self) -> Vec<String> {
        self.loader.available()
    }

    /// Reads a file the plugin declared in its `resources`.
    pub async fn plugin_resource(&self, name: &str, file: &str) -> TeamserverResult<Vec<u8>> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| TeamserverError::PluginNotFound(name.to_string()))?;

        let not_found = || TeamserverError::ResourceNotFound {
            plugin: name.to_string(),
            file: file.to_string(),
        };
        if !plugin.descriptor().resources.iter().any(|r| r == file) {
            return Err(not_found());
        }

        let path = self.config.plugins_dir().join(name).join(file);
        tokio::fs::read(&path).await.map_err(|e| {
            warn!(plugin = %name, path = %path.display(), error = %e, "⚠️ Declared plugin resource is unreadable");
            not_found()
        })
    }
}

pub enum AppError {
    Teamserver(TeamserverError),
    Internal(anyhow::Error),
    Validation(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use teamserver_shared::ErrorKind;

        let (status, err_type, message) = match self {
            AppError::Teamserver(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::AlreadyExists => StatusCode::CONFLICT,
                    ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                    ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    ErrorKind::DelegateFailure => StatusCode::BAD_GATEWAY,
                    ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ErrorKind::InterfaceIncomplete | ErrorKind::LoadError | ErrorKind::Internal => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, format!("{:?}", kind), e.to_string())
            }
            AppError::Internal(e) => {
                // Log full error server-side only; return generic message to client
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal".to_string(),
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "InvalidArgument".to_string(), m),
        };

        let body = axum::Json(serde_json::json!({
            "status": "error",
            "error": {
                "type": err_type,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<TeamserverError> for AppError {
    fn from(err: TeamserverError) -> Self {
        AppError::Teamserver(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Server entry point. Expects tracing to be initialized by the caller.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    use anyhow::Context;
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    info!("+---------------------------------------+");
    info!("|              Teamserver               |");
    info!("|             Version {:<10}        |", VERSION);
    info!("+---------------------------------------+");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_dir.display()
        )
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(
            &config.data_dir,
            std::fs::Permissions::from_mode(0o700),
        );
    }
    info!("📁 Data directory: {}", config.data_dir.display());

    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("Invalid DATABASE_URL '{}'", config.database_url))?
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(opts)
        .await
        .context("Failed to open database")?;
    db::init_db(&pool).await?;
    let store: Arc<dyn Persistence> = Arc::new(db::SqliteStore::new(pool));

    let provider = Arc::new(managers::InventoryProvider::discover());
    let core = Teamserver::new(config.clone(), store, provider);

    let loaded = core.load_plugins().await;
    info!(count = loaded.len(), "🔌 Plugins loaded");

    let report = restore::restore(&core).await;
    info!(
        listeners = report.listeners_restored,
        agents = report.agents_restored,
        skipped = report.skipped,
        "♻️ Restore finished"
    );

    let app = handlers::router(core.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(
        "🚀 Teamserver is listening on http://{}",
        config.bind_address()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("🛑 Graceful shutdown signal received. Stopping server...");
        })
        .await?;
    Ok(())
}
