use crate::storage::record_store::{RecordStore, UsageUpdate};
use crate::{FileEntry, FileRecord, Node, NodeStatus, NodefsError, Replica, ReplicaView, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::PathBuf;

/// SQLite-backed record store. Opens a fresh connection per call.
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                capacity_total INTEGER NOT NULL CHECK (capacity_total >= 1),
                capacity_used INTEGER NOT NULL DEFAULT 0
                    CHECK (capacity_used >= 0 AND capacity_used <= capacity_total),
                status TEXT NOT NULL,
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nodes_owner ON nodes(owner)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL CHECK (size > 0),
                owner TEXT NOT NULL,
                blob_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner)",
            [],
        )?;

        // A node holds at most one replica of a file.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS replicas (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                node_id TEXT NOT NULL REFERENCES nodes(id),
                created_at TEXT NOT NULL,
                UNIQUE (file_id, node_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_replicas_node ON replicas(node_id)",
            [],
        )?;

        Ok(())
    }

    fn load_node(conn: &Connection, node_id: &str) -> Result<Option<Node>> {
        let node = conn
            .query_row(
                "SELECT id, name, capacity_total, capacity_used, status, owner, created_at
                 FROM nodes WHERE id = ?1",
                [node_id],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    fn require_node(conn: &Connection, node_id: &str) -> Result<Node> {
        Self::load_node(conn, node_id)?.ok_or_else(|| NodefsError::NodeNotFound(node_id.to_string()))
    }

    fn count_replicas(conn: &Connection, node_id: &str) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM replicas WHERE node_id = ?1",
            [node_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn load_replica_views(
        conn: &Connection,
        sql: &str,
        key: &str,
    ) -> Result<HashMap<String, Vec<ReplicaView>>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([key], |row| {
            let file_id: String = row.get(0)?;
            let status: String = row.get(4)?;
            Ok((
                file_id,
                ReplicaView {
                    id: row.get(1)?,
                    node_id: row.get(2)?,
                    node_name: row.get(3)?,
                    node_status: parse_status(4, &status)?,
                },
            ))
        })?;

        let mut views: HashMap<String, Vec<ReplicaView>> = HashMap::new();
        for row in rows {
            let (file_id, view) = row?;
            views.entry(file_id).or_default().push(view);
        }
        Ok(views)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_nodes(&self, owner: &str) -> Result<Vec<Node>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, capacity_total, capacity_used, status, owner, created_at
             FROM nodes WHERE owner = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([owner], node_from_row)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.get_conn()?;
        Self::load_node(&conn, node_id)
    }

    async fn create_node(&self, node: &Node) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO nodes (id, name, capacity_total, capacity_used, status, owner, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id,
                node.name,
                node.capacity_total as i64,
                node.capacity_used as i64,
                node.status.as_str(),
                node.owner,
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_node_status(&self, node_id: &str, status: NodeStatus) -> Result<Node> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE nodes SET status = ?2 WHERE id = ?1",
            params![node_id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(NodefsError::NodeNotFound(node_id.to_string()));
        }
        Self::require_node(&conn, node_id)
    }

    async fn try_reserve_usage(&self, node_id: &str, amount: u64) -> Result<UsageUpdate> {
        let conn = self.get_conn()?;
        let amount = i64::try_from(amount).map_err(|_| {
            NodefsError::InvalidRequest(format!("reservation of {} units is out of range", amount))
        })?;

        // The capacity check happens inside the UPDATE so concurrent reservations
        // cannot both pass against a stale value.
        let affected = conn.execute(
            "UPDATE nodes SET capacity_used = capacity_used + ?2
             WHERE id = ?1 AND capacity_used + ?2 <= capacity_total",
            params![node_id, amount],
        )?;

        let node = Self::require_node(&conn, node_id)?;
        if affected == 0 {
            tracing::debug!(
                "Reservation rejected. node={} amount={} used={} total={}",
                node_id,
                amount,
                node.capacity_used,
                node.capacity_total
            );
            return Ok(UsageUpdate::Rejected(node));
        }
        Ok(UsageUpdate::Applied(node))
    }

    async fn release_usage(&self, node_id: &str, amount: u64) -> Result<Node> {
        let conn = self.get_conn()?;
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        let affected = conn.execute(
            "UPDATE nodes SET capacity_used = MAX(0, capacity_used - ?2) WHERE id = ?1",
            params![node_id, amount],
        )?;
        if affected == 0 {
            return Err(NodefsError::NodeNotFound(node_id.to_string()));
        }
        Self::require_node(&conn, node_id)
    }

    async fn count_replicas_on_node(&self, node_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        Self::count_replicas(&conn, node_id)
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        Self::require_node(&conn, node_id)?;

        let replicas = Self::count_replicas(&conn, node_id)?;
        if replicas > 0 {
            return Err(NodefsError::NodeNotEmpty {
                node_id: node_id.to_string(),
                replicas,
            });
        }

        match conn.execute("DELETE FROM nodes WHERE id = ?1", [node_id]) {
            Ok(_) => Ok(()),
            Err(error) if is_constraint_violation(&error) => Err(NodefsError::NodeNotEmpty {
                node_id: node_id.to_string(),
                replicas: Self::count_replicas(&conn, node_id)?,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_files(&self, owner: &str) -> Result<Vec<FileEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, size, owner, blob_path, created_at
             FROM files WHERE owner = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([owner], file_from_row)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }

        let mut views = Self::load_replica_views(
            &conn,
            "SELECT r.file_id, r.id, n.id, n.name, n.status
             FROM replicas r
             JOIN nodes n ON n.id = r.node_id
             JOIN files f ON f.id = r.file_id
             WHERE f.owner = ?1
             ORDER BY r.id",
            owner,
        )?;

        Ok(files
            .into_iter()
            .map(|file| {
                let replicas = views.remove(&file.id).unwrap_or_default();
                FileEntry { file, replicas }
            })
            .collect())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileEntry>> {
        let conn = self.get_conn()?;
        let file = conn
            .query_row(
                "SELECT id, name, size, owner, blob_path, created_at FROM files WHERE id = ?1",
                [file_id],
                file_from_row,
            )
            .optional()?;

        let Some(file) = file else {
            return Ok(None);
        };

        let mut views = Self::load_replica_views(
            &conn,
            "SELECT r.file_id, r.id, n.id, n.name, n.status
             FROM replicas r
             JOIN nodes n ON n.id = r.node_id
             WHERE r.file_id = ?1
             ORDER BY r.id",
            file_id,
        )?;

        let replicas = views.remove(file_id).unwrap_or_default();
        Ok(Some(FileEntry { file, replicas }))
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO files (id, name, size, owner, blob_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.id,
                file.name,
                file.size as i64,
                file.owner,
                file.blob_path,
                file.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM files WHERE id = ?1", [file_id])?;
        if affected == 0 {
            return Err(NodefsError::FileNotFound(file_id.to_string()));
        }
        Ok(())
    }

    async fn create_replica(&self, replica: &Replica) -> Result<()> {
        let conn = self.get_conn()?;

        let file_exists: Option<i64> = conn
            .query_row("SELECT 1 FROM files WHERE id = ?1", [&replica.file_id], |row| {
                row.get(0)
            })
            .optional()?;
        if file_exists.is_none() {
            return Err(NodefsError::FileNotFound(replica.file_id.clone()));
        }
        Self::require_node(&conn, &replica.node_id)?;

        let inserted = conn.execute(
            "INSERT INTO replicas (id, file_id, node_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                replica.id,
                replica.file_id,
                replica.node_id,
                replica.created_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(error) if is_constraint_violation(&error) => Err(NodefsError::DuplicateReplica {
                file_id: replica.file_id.clone(),
                node_id: replica.node_id.clone(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_replica(&self, replica_id: &str) -> Result<Option<Replica>> {
        let conn = self.get_conn()?;
        let replica = conn
            .query_row(
                "SELECT id, file_id, node_id, created_at FROM replicas WHERE id = ?1",
                [replica_id],
                |row| {
                    let created_at: String = row.get(3)?;
                    Ok(Replica {
                        id: row.get(0)?,
                        file_id: row.get(1)?,
                        node_id: row.get(2)?,
                        created_at: parse_timestamp(3, &created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(replica)
    }

    async fn delete_replica(&self, replica_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM replicas WHERE id = ?1", [replica_id])?;
        if affected == 0 {
            return Err(NodefsError::ReplicaNotFound(replica_id.to_string()));
        }
        Ok(())
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let capacity_total: i64 = row.get(2)?;
    let capacity_used: i64 = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;

    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        capacity_total: capacity_total.max(0) as u64,
        capacity_used: capacity_used.max(0) as u64,
        status: parse_status(4, &status)?,
        owner: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(2)?;
    let created_at: String = row.get(5)?;

    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        size: size.max(0) as u64,
        owner: row.get(3)?,
        blob_path: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

fn parse_status(column: usize, value: &str) -> rusqlite::Result<NodeStatus> {
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record_store::conformance;

    #[tokio::test]
    async fn test_sqlite_record_store_conformance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::new(temp_dir.path().join("records.db")).unwrap();
        conformance::run_all(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_record_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("records.db");

        let node = conformance::node("alice", "persistent", 50);
        {
            let store = SqliteRecordStore::new(&db_path).unwrap();
            store.create_node(&node).await.unwrap();
            store.try_reserve_usage(&node.id, 20).await.unwrap();
        }

        let reopened = SqliteRecordStore::new(&db_path).unwrap();
        let loaded = reopened.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(loaded.capacity_used, 20);
        assert_eq!(loaded.name, "persistent");
        assert_eq!(loaded.created_at.timestamp(), node.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_sqlite_stores_largest_node_capacity() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::new(temp_dir.path().join("records.db")).unwrap();

        let node = conformance::node("alice", "huge", crate::MAX_NODE_CAPACITY);
        store.create_node(&node).await.unwrap();
        store.try_reserve_usage(&node.id, 7).await.unwrap();

        let loaded = store.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(loaded.capacity_total, crate::MAX_NODE_CAPACITY);
        assert_eq!(loaded.capacity_used, 7);
    }
}
