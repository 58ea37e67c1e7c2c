//! Remote job model: normalization of raw payloads and reference resolution.

mod normalize;
mod resolver;
mod types;

pub use normalize::{
    canonicalize_job, extract_file_links, extract_job_records, map_status, normalize_jobs,
    reference_from_payload,
};
pub use resolver::{JobResolver, matches_reference};
pub use types::{JobState, TorboxFileLink, TorboxJobReference, TorboxJobStatus};
