mod headers;
mod task;

pub use self::headers::{DEFAULT_CONTENT_TYPE, Headers, NO_ETAG, ResponseHeaders};
pub(crate) use self::headers::HeadersRow;
pub use self::task::{TaskRecord, TaskSelector};
pub(crate) use self::task::TaskRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt;
use std::path::PathBuf;
use time::UtcDateTime;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Identity of one cached artifact: `(model, revision, file)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    /// `{hub}/{owner}/{name}`, or a shorter form for local models.
    pub model: String,
    pub revision: String,
    pub file: String,
}
impl FileKey {
    pub fn new(model: impl Into<String>, revision: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            revision: revision.into(),
            file: file.into(),
        }
    }
}
impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.model, self.revision, self.file)
    }
}

/// The `(hub, owner)` a model belongs to.
///
/// `{owner}/{name}` models belong to the local hub, the same owner as
/// `local/{owner}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub hub: String,
    pub name: String,
}
impl Owner {
    /// Hub assumed for `{owner}/{name}` models.
    pub const LOCAL_HUB: &str = "local";

    pub fn new(hub: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            name: name.into(),
        }
    }

    /// Bare `{name}` models have no owner.
    pub fn from_model(model: &str) -> Option<Self> {
        match model.split('/').collect::<Vec<_>>().as_slice() {
            [hub, owner, _name] => Some(Self::new(*hub, *owner)),
            [owner, _name] => Some(Self::new(Self::LOCAL_HUB, *owner)),
            _ => None,
        }
    }

    /// Prefixes of the model identities owned by this owner: the qualified
    /// form, plus the bare `{owner}/` form for the local hub.
    pub(crate) fn model_prefixes(&self) -> (String, Option<String>) {
        let qualified = format!("{}/{}/", self.hub, self.name);
        match self.hub == Self::LOCAL_HUB {
            true => (qualified, Some(format!("{}/", self.name))),
            false => (qualified, None),
        }
    }

    pub fn icon_path(&self, namespace: &str) -> PathBuf {
        [namespace, &self.hub, &self.name, "icon"].iter().collect()
    }
}

/// Current time, truncated to the millisecond precision the database keeps.
pub(crate) fn now() -> UtcDateTime {
    let now = UtcDateTime::now();
    let nanos = now.unix_timestamp_nanos();
    // Cannot fail: truncating towards the epoch stays in range.
    UtcDateTime::from_unix_timestamp_nanos(nanos - nanos.rem_euclid(NANOS_PER_MILLI)).unwrap_or(now)
}

pub(crate) fn to_millis(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos() / NANOS_PER_MILLI).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_millis(millis: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
        .or_raise(|| ErrorKind::InvalidData("timestamp"))
}
