//! Locating the authoritative remote job for a local reference.

use tracing::{debug, instrument};

use super::normalize::{canonicalize_job, extract_job_records, normalize_jobs};
use super::types::{TorboxJobReference, TorboxJobStatus};
use crate::torbox::{JobApi, TorboxError};

/// Resolves a [`TorboxJobReference`] against the remote API.
///
/// Lookup order, short-circuiting on the first match:
/// 1. direct hash lookup (a `NotFound` falls through)
/// 2. full job listing, matched by id or hash
/// 3. id-filtered web-download listing, when an id is known
pub struct JobResolver<'a> {
    api: &'a dyn JobApi,
}

impl<'a> JobResolver<'a> {
    /// Creates a resolver over the given API.
    #[must_use]
    pub fn new(api: &'a dyn JobApi) -> Self {
        Self { api }
    }

    /// Returns the current remote status, or `None` if no strategy finds it.
    ///
    /// # Errors
    ///
    /// Propagates any client error other than a `NotFound` on the hash lookup.
    #[instrument(skip(self), fields(job = %reference))]
    pub async fn resolve(
        &self,
        reference: &TorboxJobReference,
    ) -> Result<Option<TorboxJobStatus>, TorboxError> {
        if let Some(hash) = reference.job_hash.as_deref() {
            match self.api.job_by_hash(hash).await {
                Ok(payload) => {
                    if let Some(status) = direct_record(&payload, reference) {
                        debug!("resolved by hash lookup");
                        return Ok(Some(status));
                    }
                }
                Err(error) if error.is_not_found() => {
                    debug!("hash lookup returned not found");
                }
                Err(error) => return Err(error),
            }
        }

        let listing = self.api.list_jobs().await?;
        if let Some(status) = find_match(normalize_jobs(&listing), reference) {
            debug!("resolved from job listing");
            return Ok(Some(status));
        }

        if let Some(id) = reference.job_id.as_deref() {
            let listing = self.api.web_downloads_by_id(id).await?;
            if let Some(status) = find_match(normalize_jobs(&listing), reference) {
                debug!("resolved from id-filtered listing");
                return Ok(Some(status));
            }
        }

        debug!("job not found by any strategy");
        Ok(None)
    }
}

/// Picks the record from a direct hash lookup.
///
/// The endpoint may answer with one record or a list; a single record is
/// accepted as-is, a list must contain a matching entry.
fn direct_record(
    payload: &serde_json::Value,
    reference: &TorboxJobReference,
) -> Option<TorboxJobStatus> {
    let records = extract_job_records(payload);
    if let [single] = records.as_slice() {
        return canonicalize_job(single).ok();
    }
    find_match(normalize_jobs(payload), reference)
}

fn find_match(
    candidates: Vec<TorboxJobStatus>,
    reference: &TorboxJobReference,
) -> Option<TorboxJobStatus> {
    candidates
        .into_iter()
        .find(|candidate| matches_reference(candidate, reference))
}

/// Matches by id string equality, numeric equality, or hash equality.
#[must_use]
pub fn matches_reference(candidate: &TorboxJobStatus, reference: &TorboxJobReference) -> bool {
    if let (Some(wanted), Some(actual)) = (&reference.job_id, &candidate.job_id) {
        if wanted == actual || ids_numerically_equal(wanted, actual) {
            return true;
        }
    }
    matches!(
        (&reference.job_hash, &candidate.job_hash),
        (Some(wanted), Some(actual)) if wanted == actual
    )
}

fn ids_numerically_equal(left: &str, right: &str) -> bool {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.is_finite() && (l - r).abs() < f64::EPSILON,
        _ => false,
    }
}
