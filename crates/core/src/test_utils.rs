use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;

use crate::config::{AppConfig, OperatorCredential};
use crate::db::{Persistence, SqliteStore};
use crate::managers::ExtensionProvider;
use crate::Teamserver;

/// Single-connection in-memory pool with the schema applied. One
/// connection, kept forever, because each sqlite memory connection is its
/// own database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

/// Config rooted at `data_dir` with one operator, `neo` / `password1234`.
pub fn test_config(data_dir: &Path) -> AppConfig {
    let mut config = AppConfig::in_dir(data_dir);
    config.operators = vec![OperatorCredential {
        username: "neo".to_string(),
        password: "password1234".to_string(),
    }];
    config
}

pub async fn create_test_teamserver(
    data_dir: &Path,
    provider: Arc<dyn ExtensionProvider>,
) -> Arc<Teamserver> {
    let store: Arc<dyn Persistence> = Arc::new(SqliteStore::new(memory_pool().await));
    Teamserver::new(test_config(data_dir), store, provider)
}

/// Collects formatted log output for assertions. Install it on the current
/// thread with [`LogCapture::install`]; use a current-thread runtime so
/// every task logs through it.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.buf.clone())
    }
}
