//! Constants for the Torbox client (endpoints, timeouts, identification).

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://api.torbox.app";

/// Connect timeout for API calls.
pub const API_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout for API calls.
pub const API_READ_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for media downloads.
pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for media downloads (5 minutes for large files).
pub const DOWNLOAD_READ_TIMEOUT_SECS: u64 = 300;

/// Maximum characters of a raw response body kept in error messages.
pub const BODY_SNIPPET_CHARS: usize = 200;

pub(crate) const USER_ME_PATH: &str = "/v1/api/user/me";
pub(crate) const CREATE_WEB_DOWNLOAD_PATH: &str = "/v1/api/webdl/asynccreatewebdownload";
pub(crate) const JOBS_PATH: &str = "/v1/api/integration/jobs";
pub(crate) const WEB_DOWNLOADS_PATH: &str = "/v1/api/webdl/mylist";
pub(crate) const CANCEL_JOB_PATH: &str = "/v1/api/integration/job";

/// User-Agent sent with every request.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("torbox-fetch/{version}")
}
