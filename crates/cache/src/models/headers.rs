use super::{FileKey, from_millis, to_millis};
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

/// Stored in place of an ETag when the origin did not send one.
pub const NO_ETAG: &str = "NO_ETAG";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers worth keeping, as supplied to `put`.
///
/// Only the allow-listed fields exist on this type, so nothing else a server
/// sends can end up in the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    /// Size of the stored payload when already known (e.g. after a download).
    pub file_size: Option<u64>,
}
impl ResponseHeaders {
    /// Pick the allow-listed headers out of raw `(name, value)` pairs.
    ///
    /// Names are matched case-insensitively; unparseable lengths are dropped.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            match name.to_ascii_lowercase().as_str() {
                "content-type" => headers.content_type = Some(value.to_string()),
                "etag" => headers.etag = Some(value.to_string()),
                "content-length" => headers.content_length = value.trim().parse().ok(),
                _ => {},
            }
        }
        headers
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    /// Fill defaults and stamp bookkeeping fields.
    pub(crate) fn normalize(self, file_size: u64, at: UtcDateTime) -> Headers {
        Headers {
            content_type: self.content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            etag: self.etag.unwrap_or_else(|| NO_ETAG.to_string()),
            file_size,
            content_length: self.content_length,
            last_updated: at,
            last_used: at,
        }
    }
}

/// Cached metadata for one model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    pub content_type: String,
    /// The origin's ETag, or [`NO_ETAG`].
    pub etag: String,
    /// Authoritative size of the stored blob.
    pub file_size: u64,
    /// Size on the wire, which differs when the transfer was compressed.
    pub content_length: Option<u64>,
    pub last_updated: UtcDateTime,
    pub last_used: UtcDateTime,
}
impl Headers {
    /// The origin's ETag, unless the sentinel was stored.
    pub fn etag(&self) -> Option<&str> {
        Some(self.etag.as_str()).filter(|etag| *etag != NO_ETAG)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct HeadersRow {
    pub(crate) model: String,
    pub(crate) revision: String,
    pub(crate) file: String,
    pub(crate) content_type: String,
    pub(crate) etag: String,
    pub(crate) file_size: i64,
    pub(crate) content_length: Option<i64>,
    pub(crate) last_updated: i64,
    pub(crate) last_used: i64,
}
impl HeadersRow {
    pub(crate) fn new(key: &FileKey, headers: &Headers) -> Result<Self> {
        Ok(Self {
            model: key.model.clone(),
            revision: key.revision.clone(),
            file: key.file.clone(),
            content_type: headers.content_type.clone(),
            etag: headers.etag.clone(),
            file_size: i64::try_from(headers.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_length: headers
                .content_length
                .map(i64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("content length"))?,
            last_updated: to_millis(headers.last_updated)?,
            last_used: to_millis(headers.last_used)?,
        })
    }
}
impl TryFrom<HeadersRow> for (FileKey, Headers) {
    type Error = Error;
    fn try_from(row: HeadersRow) -> Result<Self> {
        let headers = Headers {
            content_type: row.content_type,
            etag: row.etag,
            file_size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_length: row
                .content_length
                .map(u64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("content length"))?,
            last_updated: from_millis(row.last_updated)?,
            last_used: from_millis(row.last_used)?,
        };
        Ok((FileKey::new(row.model, row.revision, row.file), headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;

    #[test]
    fn test_from_pairs_keeps_allow_list_only() {
        let headers = ResponseHeaders::from_pairs([
            ("Content-Type", "application/json"),
            ("ETag", "\"abc\""),
            ("content-length", "1234"),
            ("Set-Cookie", "session=secret"),
            ("X-Huge", "lots of data"),
        ]);
        assert_eq!(
            headers,
            ResponseHeaders {
                content_type: Some("application/json".to_string()),
                etag: Some("\"abc\"".to_string()),
                content_length: Some(1234),
                file_size: None,
            }
        );
    }

    #[test]
    fn test_normalize_defaults() {
        let at = now();
        let headers = ResponseHeaders::default().normalize(500, at);
        assert_eq!(headers.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(headers.etag, NO_ETAG);
        assert_eq!(headers.etag(), None);
        assert_eq!(headers.file_size, 500);
        assert_eq!(headers.last_used, at);
        assert_eq!(headers.last_updated, at);
    }

    #[test]
    fn test_row_round_trip() {
        let key = FileKey::new("org/m", "v1", "w.bin");
        let headers = ResponseHeaders::from_pairs([("etag", "xyz"), ("content-length", "10")]).normalize(20, now());
        let row = HeadersRow::new(&key, &headers).unwrap();
        let (round_key, round_headers) = <(FileKey, Headers)>::try_from(row).unwrap();
        assert_eq!(round_key, key);
        assert_eq!(round_headers, headers);
    }

    #[test]
    fn test_negative_size_rejected() {
        let row = HeadersRow {
            model: "org/m".to_string(),
            revision: "v1".to_string(),
            file: "w.bin".to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            etag: NO_ETAG.to_string(),
            file_size: -1,
            content_length: None,
            last_updated: 0,
            last_used: 0,
        };
        let err = <(FileKey, Headers)>::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("file size")));
    }
}
