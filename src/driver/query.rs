use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{CloudError, errors::ErrorKind, error};

pub(crate) static QUERY_PATH: &str = "/v1/query";

/// Query-level error kind the server reports while a cold warehouse starts.
pub const PROVISION_WAREHOUSE_TIMEOUT: &str = "ProvisionWarehouseTimeout";

#[derive(Serialize, Debug, Clone)]
pub(crate) struct QueryRequest<'a> {
    pub sql: &'a str,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScanProgress {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub rows: u64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    #[serde(default)]
    pub running_time_ms: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scan_progress: ScanProgress,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    #[serde(default)]
    pub data_type: Value,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct QueryError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl QueryError {
    pub fn error_kind(&self) -> ErrorKind {
        if self.kind == PROVISION_WAREHOUSE_TIMEOUT {
            ErrorKind::ProvisioningInProgress
        } else {
            ErrorKind::QueryFailed
        }
    }

    pub(crate) fn into_error(self, warehouse: &str, query_id: &str) -> CloudError {
        error!(
            kind = self.error_kind(),
            "query {} on warehouse {} has error: [{}] {}: {}",
            if query_id.is_empty() { "<unassigned>" } else { query_id },
            warehouse,
            self.code,
            self.kind,
            self.message
        )
    }
}

/// One page of a query result.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<Vec<Value>>,
    #[serde(default, deserialize_with = "schema_fields")]
    pub schema: Vec<SchemaField>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stats: QueryStats,
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub final_uri: Option<String>,
    #[serde(default)]
    pub stats_uri: Option<String>,
    #[serde(default)]
    pub error: Option<QueryError>,
}

impl QueryResponse {
    /// The continuation pointer, treating an empty string as absent.
    pub fn next_uri(&self) -> Option<&str> {
        self.next_uri.as_deref().filter(|u| !u.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// The schema arrives either as `{"fields": [...]}` or as a bare list.
fn schema_fields<'de, D>(deserializer: D) -> Result<Vec<SchemaField>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Schema {
        Wrapped {
            #[serde(default)]
            fields: Vec<SchemaField>,
        },
        Bare(Vec<SchemaField>),
    }

    Ok(match Option::<Schema>::deserialize(deserializer)? {
        Some(Schema::Wrapped { fields }) => fields,
        Some(Schema::Bare(fields)) => fields,
        None => Vec::new(),
    })
}
