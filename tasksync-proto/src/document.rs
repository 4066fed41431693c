//! Remote document schema for task records.
//!
//! Each task lives in its own document at `users/{userId}/tasks/{taskId}`.
//! A document is a flat map of named, typed fields. Encoding is total;
//! decoding is strict and per-document: a missing or mistyped required
//! field fails that one document with a [`DocumentError`], and callers
//! decoding a batch skip it and keep the rest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Category, Priority, Task, TaskError, TaskId};

/// Field name constants for the task document.
pub mod fields {
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const PRIORITY: &str = "priority";
    pub const CATEGORY: &str = "category";
    pub const IS_COMPLETED: &str = "isCompleted";
    pub const CREATED_DATE: &str = "createdDate";
    pub const DUE_DATE: &str = "dueDate";
    pub const COMPLETED_DATE: &str = "completedDate";
    pub const REMINDER_DATE: &str = "reminderDate";
    pub const LAST_MODIFIED: &str = "lastModified";
}

/// A point in time as carried by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second nanoseconds, `0..1_000_000_000`.
    pub nanos: u32,
}

impl Timestamp {
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            nanos: at.timestamp_subsec_nanos(),
        }
    }

    /// Converts back to a `DateTime`, or `None` when out of range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }
}

/// A typed document field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Timestamp(Timestamp),
    Null,
}

impl FieldValue {
    /// Name of the value's type, used in decode errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Timestamp(_) => "timestamp",
            Self::Null => "null",
        }
    }
}

/// A remote document: field name to value.
pub type Document = BTreeMap<String, FieldValue>;

/// Errors from strict document decoding.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DocumentError {
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field holds a value of the wrong type.
    #[error("field `{field}` has type {found}, expected {expected}")]
    WrongType {
        /// Field name.
        field: &'static str,
        /// Expected type name.
        expected: &'static str,
        /// Type name actually found.
        found: &'static str,
    },

    /// A timestamp field that cannot be represented.
    #[error("field `{0}` holds an out-of-range timestamp")]
    InvalidTimestamp(&'static str),

    /// The decoded record breaks a task constraint (bad id, unknown tag,
    /// inconsistent completion state).
    #[error("invalid task: {0}")]
    InvalidTask(#[from] TaskError),
}

/// Path of a user's task collection: `users/{userId}/tasks`.
#[must_use]
pub fn collection_path(user_id: &str) -> String {
    format!("users/{user_id}/tasks")
}

/// Path of a single task document: `users/{userId}/tasks/{taskId}`.
#[must_use]
pub fn document_path(user_id: &str, task_id: &TaskId) -> String {
    format!("{}/{task_id}", collection_path(user_id))
}

/// Splits a document path into its collection path and document id.
///
/// Returns `None` if the path has no `/` or either part is empty.
#[must_use]
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let (collection, id) = path.rsplit_once('/')?;
    if collection.is_empty() || id.is_empty() {
        return None;
    }
    Some((collection, id))
}

/// Encodes a task as a remote document, stamping `lastModified`.
#[must_use]
pub fn encode_task(task: &Task, modified: DateTime<Utc>) -> Document {
    let mut doc = Document::new();
    let mut put = |name: &str, value: FieldValue| {
        doc.insert(name.to_string(), value);
    };
    put(fields::ID, FieldValue::String(task.id.to_string()));
    put(fields::TITLE, FieldValue::String(task.title.clone()));
    put(
        fields::DESCRIPTION,
        FieldValue::String(task.description.clone()),
    );
    put(
        fields::PRIORITY,
        FieldValue::String(task.priority.as_str().to_string()),
    );
    put(
        fields::CATEGORY,
        FieldValue::String(task.category.as_str().to_string()),
    );
    put(fields::IS_COMPLETED, FieldValue::Bool(task.is_completed));
    put(fields::CREATED_DATE, timestamp_value(task.created_at));
    if let Some(due) = task.due_at {
        put(fields::DUE_DATE, timestamp_value(due));
    }
    if let Some(done) = task.completed_at {
        put(fields::COMPLETED_DATE, timestamp_value(done));
    }
    if let Some(remind) = task.reminder_at {
        put(fields::REMINDER_DATE, timestamp_value(remind));
    }
    put(fields::LAST_MODIFIED, timestamp_value(modified));
    doc
}

/// Strictly decodes a task document.
///
/// Optional timestamps may be absent or `Null`. `lastModified` is ignored.
///
/// # Errors
///
/// Returns [`DocumentError`] if a required field is missing or mistyped,
/// a tag is unknown, the id is not a UUID, or the completion flag and
/// completion time disagree.
pub fn decode_task(doc: &Document) -> Result<Task, DocumentError> {
    let id: TaskId = required_string(doc, fields::ID)?.parse()?;
    let priority: Priority = required_string(doc, fields::PRIORITY)?.parse()?;
    let category: Category = required_string(doc, fields::CATEGORY)?.parse()?;
    let is_completed = match doc.get(fields::IS_COMPLETED) {
        Some(FieldValue::Bool(b)) => *b,
        Some(other) => return Err(wrong_type(fields::IS_COMPLETED, "bool", other)),
        None => return Err(DocumentError::MissingField(fields::IS_COMPLETED)),
    };
    let created_at = optional_timestamp(doc, fields::CREATED_DATE)?
        .ok_or(DocumentError::MissingField(fields::CREATED_DATE))?;

    let task = Task {
        id,
        title: required_string(doc, fields::TITLE)?.to_string(),
        description: required_string(doc, fields::DESCRIPTION)?.to_string(),
        priority,
        category,
        is_completed,
        created_at,
        due_at: optional_timestamp(doc, fields::DUE_DATE)?,
        completed_at: optional_timestamp(doc, fields::COMPLETED_DATE)?,
        reminder_at: optional_timestamp(doc, fields::REMINDER_DATE)?,
    };
    if task.is_completed != task.completed_at.is_some() {
        return Err(TaskError::CompletionMismatch.into());
    }
    Ok(task)
}

fn timestamp_value(at: DateTime<Utc>) -> FieldValue {
    FieldValue::Timestamp(Timestamp::from_datetime(at))
}

fn wrong_type(field: &'static str, expected: &'static str, found: &FieldValue) -> DocumentError {
    DocumentError::WrongType {
        field,
        expected,
        found: found.type_name(),
    }
}

fn required_string<'a>(doc: &'a Document, field: &'static str) -> Result<&'a str, DocumentError> {
    match doc.get(field) {
        Some(FieldValue::String(s)) => Ok(s),
        Some(other) => Err(wrong_type(field, "string", other)),
        None => Err(DocumentError::MissingField(field)),
    }
}

fn optional_timestamp(
    doc: &Document,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, DocumentError> {
    match doc.get(field) {
        None | Some(FieldValue::Null) => Ok(None),
        Some(FieldValue::Timestamp(ts)) => ts
            .to_datetime()
            .map(Some)
            .ok_or(DocumentError::InvalidTimestamp(field)),
        Some(other) => Err(wrong_type(field, "timestamp", other)),
    }
}
