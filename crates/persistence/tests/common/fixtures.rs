//! Entry fixtures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use helios_record_store::types::{DeletedMarker, Entry};

/// A patient version with a family name.
pub fn patient(id: &str, version: &str, family: &str) -> Entry {
    Entry::resource(json!({
        "resourceType": "Patient",
        "id": id,
        "meta": {"versionId": version},
        "name": [{"family": family}]
    }))
}

/// An observation version.
pub fn observation(id: &str, version: &str) -> Entry {
    Entry::resource(json!({
        "resourceType": "Observation",
        "id": id,
        "meta": {"versionId": version},
        "status": "final"
    }))
}

/// A Binary version carrying `bytes` as base64 data.
pub fn binary(id: &str, version: &str, bytes: &[u8]) -> Entry {
    Entry::resource(json!({
        "resourceType": "Binary",
        "id": id,
        "meta": {"versionId": version},
        "contentType": "application/octet-stream",
        "data": STANDARD.encode(bytes)
    }))
}

/// A deletion marker version.
pub fn deletion(collection: &str, id: &str, version: &str) -> Entry {
    let mut marker = DeletedMarker::new(collection, id);
    marker.version_id = Some(version.to_string());
    Entry::deleted(marker)
}

/// Returns the family name of a patient entry.
pub fn family_of(entry: &Entry) -> Option<&str> {
    entry.payload()?.get("name")?.get(0)?.get("family")?.as_str()
}

/// Decodes the base64 `data` of a Binary entry.
pub fn binary_data(entry: &Entry) -> Option<Vec<u8>> {
    let data = entry.payload()?.get("data").and_then(Value::as_str)?;
    STANDARD.decode(data).ok()
}
