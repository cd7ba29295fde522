//! Repository over the three metadata collections: headers, tasks and engine
//! references.
//!
//! Single-statement operations run directly against the pool. Operations that
//! read and then act on what they read (releasing an engine, purging tasks,
//! resetting the schema epoch) run inside one transaction so no other writer
//! can slip in between the two phases.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{FileKey, Headers, HeadersRow, Owner, TaskRecord, TaskRow, TaskSelector};
use exn::ResultExt;
use sqlx::{SqliteExecutor, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};

const EPOCH_KEY: &str = "schema_epoch";

/// Predicate deciding whether a matched task record is really deleted.
pub type TaskFilter<'a> = &'a (dyn Fn(&TaskRecord) -> bool + Send + Sync);

/// Outcome of dropping every reference an engine holds.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EngineRelease {
    /// Files the engine was the last consumer of; their references are gone
    /// and the files themselves should be deleted.
    pub orphaned: Vec<FileKey>,
    /// Every `(model, revision)` the engine held a file of.
    pub models: BTreeSet<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Headers
    // =========================================================================

    pub async fn get_headers(&self, key: &FileKey) -> Result<Option<Headers>> {
        let row: Option<HeadersRow> = sqlx::query_as(include_str!("../queries/get_headers.sql"))
            .bind(&key.model)
            .bind(&key.revision)
            .bind(&key.file)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|row| <(FileKey, Headers)>::try_from(row).map(|(_, headers)| headers)).transpose()
    }

    pub async fn has_headers(&self, key: &FileKey) -> Result<bool> {
        Ok(self.get_headers(key).await?.is_some())
    }

    /// Overwrite the full headers record.
    pub async fn put_headers(&self, key: &FileKey, headers: &Headers) -> Result<()> {
        let row = HeadersRow::new(key, headers)?;
        sqlx::query(include_str!("../queries/upsert_headers.sql"))
            .bind(row.model)
            .bind(row.revision)
            .bind(row.file)
            .bind(row.content_type)
            .bind(row.etag)
            .bind(row.file_size)
            .bind(row.content_length)
            .bind(row.last_updated)
            .bind(row.last_used)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn delete_headers(&self, key: &FileKey) -> Result<()> {
        delete_headers(&self.pool, key).await
    }

    pub async fn headers_for_model_revision(&self, model: &str, revision: &str) -> Result<Vec<(FileKey, Headers)>> {
        let rows: Vec<HeadersRow> = sqlx::query_as(include_str!("../queries/headers_for_model_revision.sql"))
            .bind(model)
            .bind(revision)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(<(FileKey, Headers)>::try_from).collect()
    }

    /// Number of files still cached for any model of this owner.
    pub async fn count_headers_for_owner(&self, owner: &Owner) -> Result<u64> {
        let (qualified, bare) = owner.model_prefixes();
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_headers_for_owner.sql"))
            .bind(qualified)
            .bind(bare)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Insert a task record; inserting an existing one is a no-op.
    pub async fn put_task(&self, task: &TaskRecord) -> Result<()> {
        insert_task(&self.pool, task).await
    }

    pub async fn tasks(&self, selector: &TaskSelector) -> Result<Vec<TaskRecord>> {
        select_tasks(&self.pool, selector).await
    }

    pub async fn tasks_for_file(&self, key: &FileKey) -> Result<Vec<TaskRecord>> {
        tasks_for_file(&self.pool, key).await
    }

    pub async fn delete_task(&self, task: &TaskRecord) -> Result<()> {
        delete_task(&self.pool, task).await
    }

    /// Distinct `(model, revision)` pairs used by a task.
    pub async fn model_revisions_for_task(&self, task_name: &str) -> Result<Vec<(String, String)>> {
        sqlx::query_as(include_str!("../queries/model_revisions_for_task.sql"))
            .bind(task_name)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Distinct `(task_name, model, revision)` triples.
    pub async fn unique_task_models(&self) -> Result<Vec<(String, String, String)>> {
        sqlx::query_as(include_str!("../queries/unique_task_models.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Engine references
    // =========================================================================

    /// Record `engine_id` as a consumer of the file; already present is a no-op.
    pub async fn add_engine_ref(&self, key: &FileKey, engine_id: &str) -> Result<()> {
        insert_engine_ref(&self.pool, key, engine_id).await
    }

    pub async fn engine_ids(&self, key: &FileKey) -> Result<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/engine_ids_for_file.sql"))
            .bind(&key.model)
            .bind(&key.revision)
            .bind(&key.file)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn engine_ids_for_model_revision(
        &self,
        model: &str,
        revision: &str,
    ) -> Result<BTreeMap<FileKey, BTreeSet<String>>> {
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as(include_str!("../queries/engine_refs_for_model_revision.sql"))
                .bind(model)
                .bind(revision)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        Ok(group_refs(rows))
    }

    /// Engine reference plus task record, written together.
    pub async fn associate(&self, engine_id: &str, task: &TaskRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        insert_engine_ref(&mut *tx, &task.key, engine_id).await?;
        insert_task(&mut *tx, task).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Drop every reference `engine_id` holds.
    ///
    /// Where the engine was the only consumer, all references to the file are
    /// cleared and the file is reported as orphaned; otherwise only this
    /// engine's reference is removed.
    pub async fn release_engine(&self, engine_id: &str) -> Result<EngineRelease> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as(include_str!("../queries/engine_refs_sharing_engine.sql"))
                .bind(engine_id)
                .fetch_all(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        let mut release = EngineRelease::default();
        for (key, ids) in group_refs(rows) {
            release.models.insert((key.model.clone(), key.revision.clone()));
            if ids.len() == 1 {
                clear_engine_refs(&mut *tx, &key).await?;
                release.orphaned.push(key);
            } else {
                sqlx::query(include_str!("../queries/delete_engine_ref.sql"))
                    .bind(&key.model)
                    .bind(&key.revision)
                    .bind(&key.file)
                    .bind(engine_id)
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
            }
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(release)
    }

    /// Delete the selected task records and purge the files no surviving task
    /// still needs.
    ///
    /// Phase one deletes every selected task that passes `filter`, collecting
    /// its file as a candidate. Phase two re-queries the remaining tasks per
    /// candidate; candidates nobody references any more lose their headers
    /// and all engine references. Both phases share one transaction. Returns
    /// the purged files, whose blobs are the caller's to remove.
    pub async fn purge_tasks(&self, selector: &TaskSelector, filter: Option<TaskFilter<'_>>) -> Result<Vec<FileKey>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut candidates = BTreeSet::new();
        for task in select_tasks(&mut *tx, selector).await? {
            if filter.is_some_and(|keep| !keep(&task)) {
                continue;
            }
            delete_task(&mut *tx, &task).await?;
            candidates.insert(task.key);
        }
        let mut purged = Vec::new();
        for key in candidates {
            if !tasks_for_file(&mut *tx, &key).await?.is_empty() {
                continue;
            }
            delete_headers(&mut *tx, &key).await?;
            clear_engine_refs(&mut *tx, &key).await?;
            purged.push(key);
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(purged)
    }

    // =========================================================================
    // Schema epoch
    // =========================================================================

    pub async fn epoch(&self) -> Result<Option<u32>> {
        let value: Option<(String,)> = sqlx::query_as(include_str!("../queries/get_meta.sql"))
            .bind(EPOCH_KEY)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        value.map(|(v,)| v.parse::<u32>().or_raise(|| ErrorKind::InvalidData("schema epoch"))).transpose()
    }

    /// Forget every record and start over under a new epoch.
    pub async fn reset(&self, epoch: u32) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/clear_all.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/set_meta.sql"))
            .bind(EPOCH_KEY)
            .bind(epoch.to_string())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}

fn group_refs(rows: Vec<(String, String, String, String)>) -> BTreeMap<FileKey, BTreeSet<String>> {
    let mut grouped: BTreeMap<FileKey, BTreeSet<String>> = BTreeMap::new();
    for (model, revision, file, engine_id) in rows {
        grouped.entry(FileKey::new(model, revision, file)).or_default().insert(engine_id);
    }
    grouped
}

async fn select_tasks<'e>(exec: impl SqliteExecutor<'e>, selector: &TaskSelector) -> Result<Vec<TaskRecord>> {
    let (task_name, model, revision) = selector.binds();
    let rows: Vec<TaskRow> = sqlx::query_as(include_str!("../queries/select_tasks.sql"))
        .bind(task_name)
        .bind(model)
        .bind(revision)
        .fetch_all(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(rows.into_iter().map(TaskRecord::from).collect())
}

async fn tasks_for_file<'e>(exec: impl SqliteExecutor<'e>, key: &FileKey) -> Result<Vec<TaskRecord>> {
    let rows: Vec<TaskRow> = sqlx::query_as(include_str!("../queries/tasks_for_file.sql"))
        .bind(&key.model)
        .bind(&key.revision)
        .bind(&key.file)
        .fetch_all(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(rows.into_iter().map(TaskRecord::from).collect())
}

async fn insert_task<'e>(exec: impl SqliteExecutor<'e>, task: &TaskRecord) -> Result<()> {
    sqlx::query(include_str!("../queries/insert_task.sql"))
        .bind(&task.task_name)
        .bind(&task.key.model)
        .bind(&task.key.revision)
        .bind(&task.key.file)
        .execute(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn delete_task<'e>(exec: impl SqliteExecutor<'e>, task: &TaskRecord) -> Result<()> {
    sqlx::query(include_str!("../queries/delete_task.sql"))
        .bind(&task.task_name)
        .bind(&task.key.model)
        .bind(&task.key.revision)
        .bind(&task.key.file)
        .execute(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn delete_headers<'e>(exec: impl SqliteExecutor<'e>, key: &FileKey) -> Result<()> {
    sqlx::query(include_str!("../queries/delete_headers.sql"))
        .bind(&key.model)
        .bind(&key.revision)
        .bind(&key.file)
        .execute(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn insert_engine_ref<'e>(exec: impl SqliteExecutor<'e>, key: &FileKey, engine_id: &str) -> Result<()> {
    sqlx::query(include_str!("../queries/insert_engine_ref.sql"))
        .bind(&key.model)
        .bind(&key.revision)
        .bind(&key.file)
        .bind(engine_id)
        .execute(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

async fn clear_engine_refs<'e>(exec: impl SqliteExecutor<'e>, key: &FileKey) -> Result<()> {
    sqlx::query(include_str!("../queries/clear_engine_refs.sql"))
        .bind(&key.model)
        .bind(&key.revision)
        .bind(&key.file)
        .execute(exec)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}
