use async_trait::async_trait;
use sqlx::SqlitePool;
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::info;

// Every query gets a deadline so a locked database cannot hang a registry call.
const DB_TIMEOUT_SECS: u64 = 10;
const SCHEMA_TIMEOUT_SECS: u64 = 30;

/// Persisted agent row. `metadata` is an opaque blob only the owning plugin reads.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AgentRow {
    pub uuid: String,
    #[sqlx(rename = "type")]
    pub agent_type: String,
    pub parent: Option<String>,
    pub status: String,
    pub note: String,
    pub metadata: Vec<u8>,
}

/// Persisted listener row. `config` is the opaque blob the listener was started with.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ListenerRow {
    pub name: String,
    pub protocol: String,
    pub status: String,
    pub config: Vec<u8>,
}

/// Storage the registries write through to.
///
/// The registries treat every write as best-effort: a failure is logged and
/// the in-memory state stays authoritative.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Every agent that is not disabled.
    async fn agent_list(&self) -> anyhow::Result<Vec<AgentRow>>;
    async fn agent_insert(&self, row: &AgentRow) -> anyhow::Result<()>;
    async fn agent_update(&self, uuid: &str, metadata: &[u8]) -> anyhow::Result<()>;
    async fn agent_remove(&self, uuid: &str) -> anyhow::Result<()>;
    async fn agent_set_status(&self, uuid: &str, status: &str) -> anyhow::Result<()>;
    async fn agent_set_note(&self, uuid: &str, note: &str) -> anyhow::Result<()>;
    async fn agent_console_insert(&self, uuid: &str, entry: &[u8]) -> anyhow::Result<()>;
    /// Console entries in insertion order.
    async fn agent_console(&self, uuid: &str) -> anyhow::Result<Vec<Vec<u8>>>;

    async fn listener_list(&self) -> anyhow::Result<Vec<ListenerRow>>;
    async fn listener_insert(&self, row: &ListenerRow) -> anyhow::Result<()>;
    async fn listener_update(&self, name: &str, status: &str, config: &[u8]) -> anyhow::Result<()>;
    async fn listener_remove(&self, name: &str) -> anyhow::Result<()>;
}

/// Creates the schema if it does not exist yet.
pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    info!("Preparing database schema...");

    let statements = [
        "CREATE TABLE IF NOT EXISTS agents (
            uuid     TEXT PRIMARY KEY,
            type     TEXT NOT NULL,
            parent   TEXT,
            status   TEXT NOT NULL DEFAULT '',
            note     TEXT NOT NULL DEFAULT '',
            metadata BLOB NOT NULL,
            disabled INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS listeners (
            name     TEXT PRIMARY KEY,
            protocol TEXT NOT NULL,
            status   TEXT NOT NULL DEFAULT '',
            config   BLOB NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS agent_console (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid       TEXT NOT NULL,
            entry      BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_agent_console_uuid ON agent_console (uuid)",
    ];

    for statement in statements {
        timeout(
            Duration::from_secs(SCHEMA_TIMEOUT_SECS),
            sqlx::query(statement).execute(pool),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Database schema setup timed out after {}s",
                SCHEMA_TIMEOUT_SECS
            )
        })?
        .map_err(|e| anyhow::anyhow!("Database schema setup failed: {}", e))?;
    }

    Ok(())
}

async fn timed<T, F>(what: &str, query: F) -> anyhow::Result<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    timeout(Duration::from_secs(DB_TIMEOUT_SECS), query)
        .await
        .map_err(|_| anyhow::anyhow!("Database operation timed out after {}s", DB_TIMEOUT_SECS))?
        .map_err(|e| anyhow::anyhow!("{} failed: {}", what, e))
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn agent_list(&self) -> anyhow::Result<Vec<AgentRow>> {
        timed(
            "AgentList",
            sqlx::query_as::<_, AgentRow>(
                "SELECT uuid, type, parent, status, note, metadata FROM agents
                 WHERE disabled = 0 ORDER BY rowid",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn agent_insert(&self, row: &AgentRow) -> anyhow::Result<()> {
        timed(
            "AgentInsert",
            sqlx::query(
                "INSERT INTO agents (uuid, type, parent, status, note, metadata, disabled)
                 VALUES (?, ?, ?, ?, ?, ?, 0)",
            )
            .bind(&row.uuid)
            .bind(&row.agent_type)
            .bind(&row.parent)
            .bind(&row.status)
            .bind(&row.note)
            .bind(&row.metadata)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_update(&self, uuid: &str, metadata: &[u8]) -> anyhow::Result<()> {
        timed(
            "AgentUpdate",
            sqlx::query("UPDATE agents SET metadata = ? WHERE uuid = ?")
                .bind(metadata)
                .bind(uuid)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_remove(&self, uuid: &str) -> anyhow::Result<()> {
        timed(
            "AgentRemove",
            sqlx::query("DELETE FROM agents WHERE uuid = ?")
                .bind(uuid)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_set_status(&self, uuid: &str, status: &str) -> anyhow::Result<()> {
        timed(
            "AgentSetStatus",
            sqlx::query("UPDATE agents SET status = ? WHERE uuid = ?")
                .bind(status)
                .bind(uuid)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_set_note(&self, uuid: &str, note: &str) -> anyhow::Result<()> {
        timed(
            "AgentSetNote",
            sqlx::query("UPDATE agents SET note = ? WHERE uuid = ?")
                .bind(note)
                .bind(uuid)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_console_insert(&self, uuid: &str, entry: &[u8]) -> anyhow::Result<()> {
        let created_at = chrono::Utc::now().to_rfc3339();
        timed(
            "AgentConsoleInsert",
            sqlx::query("INSERT INTO agent_console (uuid, entry, created_at) VALUES (?, ?, ?)")
                .bind(uuid)
                .bind(entry)
                .bind(created_at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn agent_console(&self, uuid: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let rows: Vec<(Vec<u8>,)> = timed(
            "AgentConsole",
            sqlx::query_as("SELECT entry FROM agent_console WHERE uuid = ? ORDER BY id")
                .bind(uuid)
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(|(entry,)| entry).collect())
    }

    async fn listener_list(&self) -> anyhow::Result<Vec<ListenerRow>> {
        timed(
            "ListenerList",
            sqlx::query_as::<_, ListenerRow>(
                "SELECT name, protocol, status, config FROM listeners ORDER BY rowid",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    async fn listener_insert(&self, row: &ListenerRow) -> anyhow::Result<()> {
        timed(
            "ListenerInsert",
            sqlx::query("INSERT INTO listeners (name, protocol, status, config) VALUES (?, ?, ?, ?)")
                .bind(&row.name)
                .bind(&row.protocol)
                .bind(&row.status)
                .bind(&row.config)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn listener_update(&self, name: &str, status: &str, config: &[u8]) -> anyhow::Result<()> {
        timed(
            "ListenerUpdate",
            sqlx::query("UPDATE listeners SET status = ?, config = ? WHERE name = ?")
                .bind(status)
                .bind(config)
                .bind(name)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn listener_remove(&self, name: &str) -> anyhow::Result<()> {
        timed(
            "ListenerRemove",
            sqlx::query("DELETE FROM listeners WHERE name = ?")
                .bind(name)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(crate::test_utils::memory_pool().await)
    }

    fn agent(uuid: &str) -> AgentRow {
        AgentRow {
            uuid: uuid.to_string(),
            agent_type: "demo".to_string(),
            parent: None,
            status: "+alive".to_string(),
            note: String::new(),
            metadata: br#"{"host":"ws01"}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_agent_row_lifecycle() {
        let store = store().await;
        store.agent_insert(&agent("u1")).await.unwrap();
        store.agent_insert(&agent("u2")).await.unwrap();

        store.agent_set_status("u1", "-dead").await.unwrap();
        store.agent_set_note("u1", "domain controller").await.unwrap();
        store.agent_update("u1", b"{}").await.unwrap();

        let rows = store.agent_list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].uuid, "u1");
        assert_eq!(rows[0].status, "-dead");
        assert_eq!(rows[0].note, "domain controller");
        assert_eq!(rows[0].metadata, b"{}".to_vec());

        store.agent_remove("u2").await.unwrap();
        assert_eq!(store.agent_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_agents_are_not_listed() {
        let store = store().await;
        store.agent_insert(&agent("u1")).await.unwrap();
        sqlx::query("UPDATE agents SET disabled = 1 WHERE uuid = 'u1'")
            .execute(store.pool())
            .await
            .unwrap();
        assert!(store.agent_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_agent_insert_fails() {
        let store = store().await;
        store.agent_insert(&agent("u1")).await.unwrap();
        assert!(store.agent_insert(&agent("u1")).await.is_err());
    }

    #[tokio::test]
    async fn test_console_history_in_order() {
        let store = store().await;
        store.agent_console_insert("u1", b"first").await.unwrap();
        store.agent_console_insert("u2", b"other").await.unwrap();
        store.agent_console_insert("u1", b"second").await.unwrap();

        let entries = store.agent_console("u1").await.unwrap();
        assert_eq!(entries, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_listener_rows() {
        let store = store().await;
        store
            .listener_insert(&ListenerRow {
                name: "beacon".into(),
                protocol: "http".into(),
                status: "online".into(),
                config: br#"{"port":8080}"#.to_vec(),
            })
            .await
            .unwrap();
        store
            .listener_update("beacon", "offline", br#"{"port":8081}"#)
            .await
            .unwrap();

        let rows = store.listener_list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "offline");
        assert_eq!(rows[0].config, br#"{"port":8081}"#.to_vec());

        store.listener_remove("beacon").await.unwrap();
        assert!(store.listener_list().await.unwrap().is_empty());
    }
}
