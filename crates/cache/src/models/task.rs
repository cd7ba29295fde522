use super::FileKey;
use crate::error::{ErrorKind, Result};

/// "This file is used to satisfy this task for this model/revision."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskRecord {
    pub task_name: String,
    pub key: FileKey,
}
impl TaskRecord {
    pub fn new(task_name: impl Into<String>, key: FileKey) -> Self {
        Self {
            task_name: task_name.into(),
            key,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TaskRow {
    task_name: String,
    model: String,
    revision: String,
    file: String,
}
impl From<TaskRow> for TaskRecord {
    fn from(row: TaskRow) -> Self {
        TaskRecord::new(row.task_name, FileKey::new(row.model, row.revision, row.file))
    }
}

/// Which task records a purge applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    /// One task for one model revision.
    Exact { task: String, model: String, revision: String },
    /// Every model and revision under a task.
    Task(String),
    /// Every task using a model revision.
    ModelRevision { model: String, revision: String },
    /// Every revision of a model under a task.
    TaskModel { task: String, model: String },
    /// Everything.
    All,
}
impl TaskSelector {
    /// Build a selector from optional parts.
    ///
    /// A revision without a model, or a model without either a task or a
    /// revision, does not select anything meaningful and is rejected.
    pub fn from_parts(task: Option<String>, model: Option<String>, revision: Option<String>) -> Result<Self> {
        Ok(match (task, model, revision) {
            (Some(task), Some(model), Some(revision)) => Self::Exact { task, model, revision },
            (Some(task), None, None) => Self::Task(task),
            (None, Some(model), Some(revision)) => Self::ModelRevision { model, revision },
            (None, None, None) => Self::All,
            (Some(task), Some(model), None) => Self::TaskModel { task, model },
            _ => exn::bail!(ErrorKind::InvalidQuery("a revision requires a model, and a model requires a task or revision")),
        })
    }

    /// `(task_name, model, revision)` filters, where `None` matches anything.
    pub(crate) fn binds(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        match self {
            Self::Exact { task, model, revision } => (Some(task.as_str()), Some(model.as_str()), Some(revision.as_str())),
            Self::Task(task) => (Some(task.as_str()), None, None),
            Self::ModelRevision { model, revision } => (None, Some(model.as_str()), Some(revision.as_str())),
            Self::TaskModel { task, model } => (Some(task.as_str()), Some(model.as_str()), None),
            Self::All => (None, None, None),
        }
    }
}
