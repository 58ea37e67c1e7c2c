//! Flattening of heterogeneous Torbox job payloads.
//!
//! The listing endpoints have returned several container shapes over time and
//! individual records disagree on field names. Everything here accepts a raw
//! [`serde_json::Value`] and produces the strictly typed records in
//! [`super::types`]; nothing past this module inspects raw JSON except for
//! diagnostics.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::debug;

use super::types::{JobState, TorboxFileLink, TorboxJobReference, TorboxJobStatus};
use crate::torbox::TorboxError;

const ID_FIELDS: [&str; 4] = ["job_id", "id", "webdl_id", "webdownload_id"];
const HASH_FIELDS: [&str; 2] = ["job_hash", "hash"];
const STATUS_FIELDS: [&str; 3] = ["status", "state", "download_state"];
const PROGRESS_FIELDS: [&str; 4] = ["progress", "percent", "percentage", "downloaded_percent"];
const TOTAL_BYTES_FIELDS: [&str; 4] = ["total", "total_bytes", "size", "bytes_total"];
const DOWNLOADED_BYTES_FIELDS: [&str; 3] = ["downloaded", "downloaded_bytes", "bytes_downloaded"];
const MESSAGE_FIELDS: [&str; 4] = ["message", "detail", "error", "status_message"];

/// Categorized listing buckets, concatenated in this order.
const BUCKET_FIELDS: [&str; 4] = ["active", "queued", "completed", "downloads"];

const LINK_CONTAINERS: [&str; 3] = ["file_links", "links", "files"];
const NESTED_LINK_CONTAINERS: [&str; 2] = ["links", "files"];
const LINK_URL_FIELDS: [&str; 4] = ["url", "link", "download_url", "href"];
const LINK_NAME_FIELDS: [&str; 3] = ["filename", "name", "file_name"];
const LINK_SIZE_FIELDS: [&str; 3] = ["size", "size_bytes", "bytes"];
const LINK_EXPIRY_FIELDS: [&str; 3] = ["expires_at", "expiresAt", "expires"];
const FALLBACK_LINK_FIELDS: [&str; 3] = ["link", "url", "download_url"];

const RECORD_SOURCE: &str = "job record";

/// Extracts the raw job records from any known listing shape.
///
/// Shapes are tried in fixed priority: bare array, `{jobs}`, `{data}`,
/// categorized buckets, `{web_downloads}`, then the payload itself as a
/// single record. Anything else yields an empty list.
#[must_use]
pub fn extract_job_records(payload: &Value) -> Vec<Value> {
    if let Value::Array(items) = payload {
        return items.clone();
    }

    let Value::Object(object) = payload else {
        return Vec::new();
    };

    for key in ["jobs", "data"] {
        if let Some(Value::Array(items)) = object.get(key) {
            return items.clone();
        }
    }

    if BUCKET_FIELDS
        .iter()
        .any(|key| matches!(object.get(*key), Some(Value::Array(_))))
    {
        return BUCKET_FIELDS
            .iter()
            .filter_map(|key| object.get(*key).and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();
    }

    if let Some(Value::Array(items)) = object.get("web_downloads") {
        return items.clone();
    }

    vec![payload.clone()]
}

/// Extracts and canonicalizes every record, skipping those that do not fit.
#[must_use]
pub fn normalize_jobs(payload: &Value) -> Vec<TorboxJobStatus> {
    extract_job_records(payload)
        .iter()
        .filter_map(|record| match canonicalize_job(record) {
            Ok(status) => Some(status),
            Err(error) => {
                debug!(error = %error, "skipping job record");
                None
            }
        })
        .collect()
}

/// Canonicalizes one raw job record.
///
/// # Errors
///
/// Returns [`TorboxError::InvalidResponse`] when the record is not an object
/// or carries neither an identifier nor a hash.
pub fn canonicalize_job(record: &Value) -> Result<TorboxJobStatus, TorboxError> {
    let object = record
        .as_object()
        .ok_or_else(|| TorboxError::invalid_response(RECORD_SOURCE, "record is not an object"))?;

    let reference = reference_from_object(object);
    if !reference.is_present() {
        return Err(TorboxError::invalid_response(
            RECORD_SOURCE,
            "record has neither an id nor a hash",
        ));
    }

    let raw_status = STATUS_FIELDS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str));

    Ok(TorboxJobStatus {
        job_id: reference.job_id,
        job_hash: reference.job_hash,
        status: map_status(raw_status),
        progress: extract_progress(object),
        bytes_total: first_u64(object, &TOTAL_BYTES_FIELDS),
        bytes_downloaded: first_u64(object, &DOWNLOADED_BYTES_FIELDS),
        message: first_string(object, &MESSAGE_FIELDS),
        raw: record.clone(),
    })
}

/// Maps a raw status string onto [`JobState`].
///
/// The mapping is case-insensitive and total: unknown or absent values map to
/// [`JobState::Processing`].
#[must_use]
pub fn map_status(raw: Option<&str>) -> JobState {
    let Some(raw) = raw else {
        return JobState::Processing;
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "completed" | "complete" | "finished" | "done" | "success" => JobState::Completed,
        "failed" | "error" | "stopped" => JobState::Failed,
        "cancelled" | "canceled" | "aborted" => JobState::Cancelled,
        "downloading" | "download" | "running" | "active" => JobState::Downloading,
        "processing" | "preparing" | "transcoding" => JobState::Processing,
        "queued" | "queue" => JobState::Queued,
        "pending" | "waiting" => JobState::Pending,
        _ => JobState::Processing,
    }
}

/// Extracts a job reference from a job-creation response.
#[must_use]
pub fn reference_from_payload(payload: &Value) -> Option<TorboxJobReference> {
    let reference = reference_from_object(payload.as_object()?);
    reference.is_present().then_some(reference)
}

/// Extracts deduplicated file links from a raw job record.
#[must_use]
pub fn extract_file_links(raw: &Value) -> Vec<TorboxFileLink> {
    let Some(object) = raw.as_object() else {
        return Vec::new();
    };

    let mut candidates: Vec<&Value> = LINK_CONTAINERS
        .iter()
        .filter_map(|key| object.get(*key))
        .collect();
    if let Some(Value::Object(data)) = object.get("data") {
        candidates.extend(
            NESTED_LINK_CONTAINERS
                .iter()
                .filter_map(|key| data.get(*key)),
        );
    }

    let mut links = Vec::new();
    for container in candidates {
        collect_links(container, &mut links);
    }

    if links.is_empty() {
        if let Some(url) = first_string(object, &FALLBACK_LINK_FIELDS) {
            links.push(TorboxFileLink {
                url,
                filename: None,
                size_bytes: None,
                expires_at: None,
            });
        }
    }

    let mut seen = HashSet::new();
    links.retain(|link| seen.insert(link.url.clone()));
    links
}

fn collect_links(container: &Value, out: &mut Vec<TorboxFileLink>) {
    match container {
        Value::Array(entries) => entries.iter().for_each(|entry| collect_links(entry, out)),
        Value::String(url) => {
            if let Some(url) = non_empty(url) {
                out.push(TorboxFileLink {
                    url,
                    filename: None,
                    size_bytes: None,
                    expires_at: None,
                });
            }
        }
        Value::Object(entry) => {
            if let Some(url) = first_string(entry, &LINK_URL_FIELDS) {
                out.push(TorboxFileLink {
                    url,
                    filename: first_string(entry, &LINK_NAME_FIELDS),
                    size_bytes: first_u64(entry, &LINK_SIZE_FIELDS),
                    expires_at: first_string(entry, &LINK_EXPIRY_FIELDS),
                });
            }
        }
        _ => {}
    }
}

fn reference_from_object(object: &Map<String, Value>) -> TorboxJobReference {
    let job_id = ID_FIELDS
        .iter()
        .find_map(|key| object.get(*key).and_then(identifier_string));
    let job_hash = HASH_FIELDS
        .iter()
        .find_map(|key| object.get(*key).and_then(identifier_string));
    TorboxJobReference::new(job_id, job_hash)
}

fn identifier_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn extract_progress(object: &Map<String, Value>) -> f64 {
    let observed = PROGRESS_FIELDS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(coerce_f64)
        .unwrap_or(0.0);
    (observed.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn first_u64(object: &Map<String, Value>, fields: &[&str]) -> Option<u64> {
    fields
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| match value {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
}

fn first_string(object: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| value.as_str().and_then(non_empty))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(statuses: &[TorboxJobStatus]) -> Vec<String> {
        statuses
            .iter()
            .map(|s| s.job_id.clone().unwrap_or_default())
            .collect()
    }

    // ==================== Container shapes ====================

    #[test]
    fn test_bare_array() {
        let jobs = normalize_jobs(&json!([{"id": 1}, {"id": 2}]));
        assert_eq!(ids(&jobs), vec!["1", "2"]);
    }

    #[test]
    fn test_jobs_and_data_wrappers() {
        assert_eq!(ids(&normalize_jobs(&json!({"jobs": [{"id": 3}]}))), vec!["3"]);
        assert_eq!(ids(&normalize_jobs(&json!({"data": [{"id": 4}]}))), vec!["4"]);
    }

    #[test]
    fn test_jobs_takes_priority_over_data() {
        let payload = json!({"jobs": [{"id": 1}], "data": [{"id": 2}]});
        assert_eq!(ids(&normalize_jobs(&payload)), vec!["1"]);
    }

    #[test]
    fn test_buckets_concatenate_in_field_order() {
        let payload = json!({
            "downloads": [{"id": 4}],
            "queued": [{"id": 2}],
            "active": [{"id": 1}],
            "completed": [{"id": 3}]
        });
        assert_eq!(ids(&normalize_jobs(&payload)), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_active_and_queued_active_first() {
        let payload = json!({"queued": [{"id": "q"}], "active": [{"id": "a"}]});
        assert_eq!(ids(&normalize_jobs(&payload)), vec!["a", "q"]);
    }

    #[test]
    fn test_web_downloads_wrapper() {
        let payload = json!({"web_downloads": [{"webdownload_id": 8}]});
        assert_eq!(ids(&normalize_jobs(&payload)), vec!["8"]);
    }

    #[test]
    fn test_single_record_object() {
        let payload = json!({"hash": "abc", "status": "done"});
        let jobs = normalize_jobs(&payload);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_hash.as_deref(), Some("abc"));
        assert_eq!(jobs[0].status, JobState::Completed);
    }

    #[test]
    fn test_unrecognized_payload_is_empty() {
        assert!(normalize_jobs(&json!("nope")).is_empty());
        assert!(normalize_jobs(&json!(null)).is_empty());
        assert!(normalize_jobs(&json!({"foo": "bar"})).is_empty());
    }

    #[test]
    fn test_records_without_identifiers_skipped() {
        let jobs = normalize_jobs(&json!([{"status": "queued"}, 5, {"id": 9}]));
        assert_eq!(ids(&jobs), vec!["9"]);
    }

    // ==================== Canonicalization ====================

    #[test]
    fn test_identifier_priority_and_stringification() {
        let job = canonicalize_job(&json!({"id": 2, "webdl_id": 3, "job_id": 1})).unwrap();
        assert_eq!(job.job_id.as_deref(), Some("1"));

        let job = canonicalize_job(&json!({"job_id": "", "webdownload_id": 77})).unwrap();
        assert_eq!(job.job_id.as_deref(), Some("77"));

        let job = canonicalize_job(&json!({"hash": "h1", "job_hash": "h0"})).unwrap();
        assert_eq!(job.job_hash.as_deref(), Some("h0"));
        assert_eq!(job.job_id, None);
    }

    #[test]
    fn test_canonicalize_requires_identifier() {
        let error = canonicalize_job(&json!({"status": "done"})).unwrap_err();
        assert_eq!(error.kind(), crate::torbox::TorboxErrorKind::InvalidResponse);
    }

    #[test]
    fn test_status_field_aliases() {
        let job = canonicalize_job(&json!({"id": 1, "download_state": "Finished"})).unwrap();
        assert_eq!(job.status, JobState::Completed);
        let job = canonicalize_job(&json!({"id": 1, "state": "WAITING"})).unwrap();
        assert_eq!(job.status, JobState::Pending);
    }

    #[test]
    fn test_map_status_vocabulary() {
        let cases = [
            ("completed", JobState::Completed),
            ("Complete", JobState::Completed),
            ("SUCCESS", JobState::Completed),
            ("error", JobState::Failed),
            ("stopped", JobState::Failed),
            ("canceled", JobState::Cancelled),
            ("aborted", JobState::Cancelled),
            ("running", JobState::Downloading),
            ("active", JobState::Downloading),
            ("transcoding", JobState::Processing),
            ("queue", JobState::Queued),
            ("waiting", JobState::Pending),
            ("stalled (no seeds)", JobState::Processing),
            ("", JobState::Processing),
        ];
        for (raw, expected) in cases {
            assert_eq!(map_status(Some(raw)), expected, "{raw}");
        }
        assert_eq!(map_status(None), JobState::Processing);
    }

    #[test]
    fn test_progress_clamped_and_rounded() {
        let job = canonicalize_job(&json!({"id": 1, "progress": 150})).unwrap();
        assert!((job.progress - 100.0).abs() < f64::EPSILON);

        let job = canonicalize_job(&json!({"id": 1, "percent": -4})).unwrap();
        assert!(job.progress.abs() < f64::EPSILON);

        let job = canonicalize_job(&json!({"id": 1, "percentage": "42.3456"})).unwrap();
        assert!((job.progress - 42.35).abs() < 1e-9);
    }

    #[test]
    fn test_progress_unparsable_falls_through_then_zero() {
        let job =
            canonicalize_job(&json!({"id": 1, "progress": "n/a", "downloaded_percent": 12.5}))
                .unwrap();
        assert!((job.progress - 12.5).abs() < f64::EPSILON);

        let job = canonicalize_job(&json!({"id": 1, "progress": "n/a"})).unwrap();
        assert!(job.progress.abs() < f64::EPSILON);
    }

    #[test]
    fn test_byte_counters_and_message() {
        let job = canonicalize_job(&json!({
            "id": 1,
            "size": 2048,
            "bytes_downloaded": "1024",
            "error": "",
            "status_message": "Downloading from host"
        }))
        .unwrap();
        assert_eq!(job.bytes_total, Some(2048));
        assert_eq!(job.bytes_downloaded, Some(1024));
        assert_eq!(job.message.as_deref(), Some("Downloading from host"));

        let job = canonicalize_job(&json!({"id": 1})).unwrap();
        assert_eq!(job.bytes_total, None);
        assert_eq!(job.bytes_downloaded, None);
        assert_eq!(job.message, None);
    }

    #[test]
    fn test_reference_from_creation_payload() {
        let reference = reference_from_payload(&json!({"webdownload_id": 12, "hash": "ff"})).unwrap();
        assert_eq!(reference.job_id.as_deref(), Some("12"));
        assert_eq!(reference.job_hash.as_deref(), Some("ff"));
        assert!(reference_from_payload(&json!({"auth_id": "x"})).is_none());
        assert!(reference_from_payload(&json!(null)).is_none());
    }

    // ==================== File links ====================

    #[test]
    fn test_links_deduplicated_by_url() {
        let links = extract_file_links(&json!({"links": [{"url": "a"}, {"url": "a"}]}));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "a");
    }

    #[test]
    fn test_link_entry_field_aliases() {
        let links = extract_file_links(&json!({
            "file_links": [{
                "download_url": "https://cdn/x.mp4",
                "file_name": "x.mp4",
                "size_bytes": 99,
                "expiresAt": "2026-01-01T00:00:00Z"
            }]
        }));
        assert_eq!(
            links,
            vec![TorboxFileLink {
                url: "https://cdn/x.mp4".to_string(),
                filename: Some("x.mp4".to_string()),
                size_bytes: Some(99),
                expires_at: Some("2026-01-01T00:00:00Z".to_string()),
            }]
        );
    }

    #[test]
    fn test_links_from_scalars_objects_and_nested_data() {
        let links = extract_file_links(&json!({
            "links": "https://a",
            "files": {"href": "https://b"},
            "data": {"links": ["https://c", "https://a"], "files": [{"link": "https://d"}]}
        }));
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c", "https://d"]);
    }

    #[test]
    fn test_links_top_level_fallback() {
        let links = extract_file_links(&json!({"id": 1, "download_url": "https://z"}));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://z");
    }

    #[test]
    fn test_fallback_not_used_when_container_yields() {
        let links = extract_file_links(&json!({"url": "https://src", "files": ["https://f"]}));
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://f"]);
    }

    #[test]
    fn test_no_links() {
        assert!(extract_file_links(&json!({"id": 1, "files": [{"name": "x"}]})).is_empty());
        assert!(extract_file_links(&json!([])).is_empty());
    }
}
