//! CSV export and raw import
//!
//! Export writes a header of the first record's non-object fields, then one
//! row per record with every value JSON-encoded (`1`, `"x"`, `true`). Null
//! and absent values are empty fields. Import only reads the file's text;
//! nothing is parsed into records.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

use crate::types::{CrmError, Result};

/// Render JSON objects as CSV text
pub fn to_csv(records: &[Value]) -> String {
    let Some(first) = records.first().and_then(Value::as_object) else {
        return String::new();
    };
    let header: Vec<&String> = first
        .iter()
        .filter(|(_, value)| !value.is_object() && !value.is_array())
        .map(|(key, _)| key)
        .collect();

    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(
        header
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(","),
    );

    let empty = Map::new();
    for record in records {
        let fields = record.as_object().unwrap_or(&empty);
        let row: Vec<String> = header
            .iter()
            .map(|key| match fields.get(key.as_str()) {
                None | Some(Value::Null) => String::new(),
                Some(value) => value.to_string(),
            })
            .collect();
        lines.push(row.join(","));
    }
    lines.join("\n")
}

/// Render any serializable collection as CSV text
pub fn collection_to_csv<T: Serialize>(records: &[T]) -> Result<String> {
    let values = records
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CrmError::Internal(format!("failed to encode records: {}", e)))?;
    Ok(to_csv(&values))
}

/// Read an import file's raw contents
pub fn read_import(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    info!(
        "Read {} ({} lines); rows are displayed, not imported",
        path.display(),
        text.lines().count()
    );
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Client, ClientStatus};
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_values_are_json_encoded() {
        let csv = to_csv(&[json!({ "a": 1, "b": "x" }), json!({ "a": 2, "b": "y" })]);
        assert_eq!(csv, "a,b\n1,\"x\"\n2,\"y\"");
    }

    #[test]
    fn test_nulls_and_missing_are_empty() {
        let csv = to_csv(&[json!({ "a": null, "b": true }), json!({ "b": false })]);
        assert_eq!(csv, "a,b\n,true\n,false");
    }

    #[test]
    fn test_object_fields_left_out_of_header() {
        let csv = to_csv(&[json!({ "id": "t1", "client": { "id": "c1" }, "documents": ["u"] })]);
        assert_eq!(csv, "id\n\"t1\"");
    }

    #[test]
    fn test_empty_collection() {
        assert_eq!(to_csv(&[]), "");
    }

    #[test]
    fn test_client_export() {
        let client = Client {
            id: "c1".into(),
            company_name: "Acme".into(),
            status: ClientStatus::Archived,
            ..Default::default()
        };
        let csv = collection_to_csv(&[client]).unwrap();
        let mut lines = csv.lines();
        let header: Vec<_> = lines.next().unwrap().split(',').collect();
        assert!(header.contains(&"companyName"));
        assert!(header.contains(&"status"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Acme\""));
        assert!(row.contains("\"archived\""));
    }

    #[test]
    fn test_read_import_returns_raw_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a,b\n1,2\n").unwrap();
        assert_eq!(read_import(file.path()).unwrap(), "a,b\n1,2\n");
    }
}
