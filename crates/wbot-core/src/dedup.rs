//! Durable idempotency markers.
//!
//! Three append-only tables, one per namespace, each row
//! `(auto id, item id, recorded_at)`. A marker is written once an item has
//! been delivered to all handlers and is never updated or deleted, so it
//! doubles as an audit trail and gives at-most-once delivery across
//! restarts. A crash between delivery and `mark` redelivers the item:
//! duplicate delivery is preferred over lost delivery.

use std::path::Path;

use sqlx::sqlite::SqlitePool;

use crate::Result;

/// Independent marker namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Feed posts already delivered to new-post handlers.
    ReadPost,
    /// Mention comments already delivered.
    ReadMention,
    /// Posts the bot has already reposted.
    Reposted,
}

impl Namespace {
    fn table(self) -> &'static str {
        match self {
            Namespace::ReadPost => "read_posts",
            Namespace::ReadMention => "read_mentions",
            Namespace::Reposted => "reposted_posts",
        }
    }
}

const ALL_NAMESPACES: [Namespace; 3] = [
    Namespace::ReadPost,
    Namespace::ReadMention,
    Namespace::Reposted,
];

#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (creating if needed) the store at `path`. Store unavailability
    /// here is the one local failure that is fatal to startup.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // mode=rwc lets sqlite create the file on first run.
        let url = format!("sqlite://{}?mode=rwc", path.display().to_string().replace('\\', "/"));
        let pool = SqlitePool::connect(&url).await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        for ns in ALL_NAMESPACES {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    item_id INTEGER NOT NULL UNIQUE,
                    recorded_at TEXT NOT NULL
                )",
                ns.table()
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn is_marked(&self, ns: Namespace, item_id: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE item_id = ? LIMIT 1", ns.table());
        let row = sqlx::query(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Record that `item_id` was processed. Idempotent: marking the same
    /// item twice is a no-op, not an error.
    pub async fn mark(&self, ns: Namespace, item_id: i64) -> Result<()> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (item_id, recorded_at) VALUES (?, ?)",
            ns.table()
        );
        sqlx::query(&sql)
            .bind(item_id)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, DedupStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(&dir.path().join("dedup.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn mark_then_query() {
        let (_dir, store) = temp_store().await;
        store.mark(Namespace::ReadPost, 123).await.unwrap();
        assert!(store.is_marked(Namespace::ReadPost, 123).await.unwrap());
        assert!(!store.is_marked(Namespace::ReadPost, 456).await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let (_dir, store) = temp_store().await;
        store.mark(Namespace::ReadPost, 7).await.unwrap();
        assert!(!store.is_marked(Namespace::ReadMention, 7).await.unwrap());
        assert!(!store.is_marked(Namespace::Reposted, 7).await.unwrap());
    }

    #[tokio::test]
    async fn mark_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.mark(Namespace::Reposted, 9).await.unwrap();
        store.mark(Namespace::Reposted, 9).await.unwrap();
        assert!(store.is_marked(Namespace::Reposted, 9).await.unwrap());
    }

    #[tokio::test]
    async fn markers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.db");
        {
            let store = DedupStore::open(&path).await.unwrap();
            store.mark(Namespace::ReadMention, 31).await.unwrap();
            store.close().await;
        }
        let store = DedupStore::open(&path).await.unwrap();
        assert!(store.is_marked(Namespace::ReadMention, 31).await.unwrap());
    }
}
