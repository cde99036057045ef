//! Opaque document persistence used by launch, execution and access checks.
//!
//! Documents are JSON objects keyed by `(collection, id)`. Callers only need
//! point lookups and simple equality filters.

pub mod sqlite;

pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Credentials,
    Organizations,
    Projects,
    Inventories,
    Groups,
    Hosts,
    JobTemplates,
    TerraformJobTemplates,
    Jobs,
    TerraformJobs,
    Teams,
    Users,
    ActivityStream,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Collection::Credentials,
        Collection::Organizations,
        Collection::Projects,
        Collection::Inventories,
        Collection::Groups,
        Collection::Hosts,
        Collection::JobTemplates,
        Collection::TerraformJobTemplates,
        Collection::Jobs,
        Collection::TerraformJobs,
        Collection::Teams,
        Collection::Users,
        Collection::ActivityStream,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Organizations => "organizations",
            Self::Projects => "projects",
            Self::Inventories => "inventories",
            Self::Groups => "groups",
            Self::Hosts => "hosts",
            Self::JobTemplates => "job_templates",
            Self::TerraformJobTemplates => "terraform_job_templates",
            Self::Jobs => "jobs",
            Self::TerraformJobs => "terraform_jobs",
            Self::Teams => "teams",
            Self::Users => "users",
            Self::ActivityStream => "activity_stream",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == raw.trim())
            .ok_or_else(|| {
                format!(
                    "unknown collection `{raw}`; expected one of: {}",
                    Self::ALL.map(Collection::as_str).join(", ")
                )
            })
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(String, Value),
    OneOf(String, Vec<Value>),
}

/// Conjunction of equality clauses over top-level or dotted document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn one_of<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.clauses.push(Clause::OneOf(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create store parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to encode {collection}/{id}: {source}")]
    Encode {
        collection: Collection,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {collection}/{id}: {source}")]
    Decode {
        collection: Collection,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{collection}/{id} already exists")]
    Duplicate { collection: Collection, id: String },
    #[error("{collection}/{id} not found")]
    NotFound { collection: Collection, id: String },
    #[error("unsupported filter on `{field}`: {reason}")]
    UnsupportedFilter { field: String, reason: String },
    #[error("update rejected: {0}")]
    Rejected(String),
}

pub trait DocumentStore: Send + Sync {
    fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    fn insert(&self, collection: Collection, id: &str, body: &Value) -> Result<(), StoreError>;

    fn replace(&self, collection: Collection, id: &str, body: &Value) -> Result<(), StoreError>;

    /// Atomic read-modify-write of one document. Returning an error from
    /// `apply` leaves the stored document untouched.
    fn modify(
        &self,
        collection: Collection,
        id: &str,
        apply: &mut dyn FnMut(&mut Value) -> Result<(), StoreError>,
    ) -> Result<Value, StoreError>;

    /// Inserts `body` unless a document matching `conflict` already exists
    /// in `collection`. The check and the write share one transaction; the
    /// first conflicting document is returned instead of inserting.
    fn insert_unless(
        &self,
        collection: Collection,
        id: &str,
        body: &Value,
        conflict: &Filter,
    ) -> Result<Option<Value>, StoreError>;

    fn remove(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;
}

pub trait Document: Serialize + DeserializeOwned {
    fn collection(&self) -> Collection;
    fn document_id(&self) -> &str;
}

/// Typed helpers over any [`DocumentStore`].
pub trait DocumentStoreExt: DocumentStore {
    fn load<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.find_by_id(collection, id)? else {
            return Ok(None);
        };
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                collection,
                id: id.to_string(),
                source,
            })
    }

    fn load_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<T>, StoreError> {
        self.find(collection, filter)?
            .into_iter()
            .map(|raw| {
                let id = raw
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                serde_json::from_value(raw).map_err(|source| StoreError::Decode {
                    collection,
                    id,
                    source,
                })
            })
            .collect()
    }

    fn insert_document<T: Document>(&self, document: &T) -> Result<(), StoreError> {
        let body = encode_document(document)?;
        self.insert(document.collection(), document.document_id(), &body)
    }

    fn insert_document_unless<T: Document>(
        &self,
        document: &T,
        conflict: &Filter,
    ) -> Result<Option<Value>, StoreError> {
        let body = encode_document(document)?;
        self.insert_unless(document.collection(), document.document_id(), &body, conflict)
    }

    fn replace_document<T: Document>(&self, document: &T) -> Result<(), StoreError> {
        let body = encode_document(document)?;
        self.replace(document.collection(), document.document_id(), &body)
    }

    fn modify_document<T: Serialize + DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
        mut apply: impl FnMut(&mut T) -> Result<(), StoreError>,
    ) -> Result<T, StoreError> {
        let updated = self.modify(collection, id, &mut |raw| {
            let mut typed: T =
                serde_json::from_value(raw.take()).map_err(|source| StoreError::Decode {
                    collection,
                    id: id.to_string(),
                    source,
                })?;
            apply(&mut typed)?;
            *raw = serde_json::to_value(&typed).map_err(|source| StoreError::Encode {
                collection,
                id: id.to_string(),
                source,
            })?;
            Ok(())
        })?;
        serde_json::from_value(updated).map_err(|source| StoreError::Decode {
            collection,
            id: id.to_string(),
            source,
        })
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

fn encode_document<T: Document>(document: &T) -> Result<Value, StoreError> {
    serde_json::to_value(document).map_err(|source| StoreError::Encode {
        collection: document.collection(),
        id: document.document_id().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_round_trip_through_parse() {
        for collection in Collection::ALL {
            assert_eq!(Collection::parse(collection.as_str()), Ok(collection));
        }
        let err = Collection::parse("widgets").expect_err("unknown collection");
        assert!(err.contains("job_templates"));
    }

    #[test]
    fn filter_builder_accumulates_clauses_in_order() {
        let filter = Filter::new()
            .eq("template_id", "t1")
            .one_of("status", ["new", "pending"]);
        assert_eq!(filter.clauses.len(), 2);
        assert_eq!(
            filter.clauses[0],
            Clause::Eq("template_id".to_string(), Value::from("t1"))
        );
    }
}
