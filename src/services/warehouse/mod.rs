//! Warehouse SQL boundary.
//!
//! The pipeline only sees these traits; the REST implementation lives in
//! [`snowflake`]. A session is acquired per request and must be closed explicitly
//! by the caller on every exit path.

pub mod snowflake;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{AppError, AppResult};

pub use snowflake::SnowflakeWarehouse;

/// Error code the warehouse reports for a missing or unauthorized object.
const MISSING_OBJECT_CODE: &str = "002003";

/// Text the warehouse reports for a missing or unauthorized object.
const MISSING_OBJECT_TEXT: &str = "does not exist or not authorized";

/// A warehouse that can open query sessions.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Open a new authenticated session.
    async fn connect(&self) -> AppResult<Box<dyn WarehouseSession>>;
}

/// An open warehouse session.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Execute one statement and return all result rows.
    async fn execute(&mut self, sql: &str) -> AppResult<Vec<WarehouseRow>>;

    /// Execute a `PUT` and return where the client has to write the file.
    ///
    /// The warehouse never reads client files itself; it answers with a storage
    /// location and short-lived credentials.
    async fn prepare_upload(&mut self, sql: &str) -> AppResult<UploadTarget> {
        let _ = sql;
        Err(AppError::warehouse(
            "This session does not support file transfers",
        ))
    }

    /// Release the session on the warehouse side.
    async fn close(self: Box<Self>) -> AppResult<()>;
}

/// One result row; column lookup is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarehouseRow {
    columns: Vec<(String, Option<String>)>,
}

impl WarehouseRow {
    pub fn new(columns: Vec<(String, Option<String>)>) -> Self {
        Self { columns }
    }

    /// Build a row from `(name, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.map(String::from)))
                .collect(),
        )
    }

    /// Value of a column; `None` for SQL NULL or an unknown column.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Storage location handed out for a `PUT`.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub location: StageLocation,
    /// The stage expects files encrypted on the client before upload.
    pub client_side_encrypted: bool,
}

/// Cloud storage behind an internal stage. `prefix` is empty or ends with `/`.
#[derive(Debug, Clone)]
pub enum StageLocation {
    S3 {
        bucket: String,
        prefix: String,
        region: Option<String>,
        /// Endpoint override (FIPS, private link); AWS defaults when absent
        endpoint: Option<String>,
        key_id: String,
        secret_key: SecretString,
        session_token: Option<SecretString>,
    },
    Azure {
        account: String,
        /// Blob service suffix, e.g. `blob.core.windows.net`
        endpoint: String,
        container: String,
        prefix: String,
        sas_token: SecretString,
    },
    Gcs {
        bucket: String,
        prefix: String,
        presigned_url: Option<String>,
        access_token: Option<SecretString>,
    },
}

/// Make a value safe inside a single-quoted SQL string literal.
///
/// Backslash starts an escape sequence in warehouse literals, so it is doubled
/// before quotes are.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

/// Whether a warehouse error means the target object is missing or not granted.
///
/// Only statement failures carry a warehouse code; transport failures never match.
pub fn is_missing_object(err: &AppError) -> bool {
    match err {
        AppError::Warehouse {
            code: Some(code),
            message,
        } => code == MISSING_OBJECT_CODE || message.contains(MISSING_OBJECT_TEXT),
        _ => false,
    }
}

/// Read the single-quoted literal opening at byte `open` the way the warehouse does.
///
/// Returns the literal's value and the byte index just past its closing quote.
#[cfg(test)]
pub(crate) fn read_literal(sql: &str, open: usize) -> Option<(String, usize)> {
    let bytes = sql.as_bytes();
    if bytes.get(open) != Some(&b'\'') {
        return None;
    }

    let mut value = Vec::new();
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let escaped = *bytes.get(i + 1)?;
                value.push(match escaped {
                    b'n' => b'\n',
                    b't' => b'\t',
                    b'r' => b'\r',
                    b'0' => b'\0',
                    other => other,
                });
                i += 2;
            }
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => {
                value.push(b'\'');
                i += 2;
            }
            b'\'' => return Some((String::from_utf8(value).ok()?, i + 1)),
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
    None
}
