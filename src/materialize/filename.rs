//! Filename sanitization and synthesis for materialized media.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::sidecar::{SIDECAR_EXTENSION, sidecar_path};
use crate::jobs::TorboxFileLink;
use crate::queue::QueueItem;

/// Extension used when the link URL carries none.
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp4";

const MAX_EXTENSION_CHARS: usize = 8;

/// Picks the on-disk filename for a link.
///
/// The link's own filename wins when it sanitizes to something usable;
/// otherwise `<ownerSlug>-<itemId>.<ext>` is synthesized. Media never keeps
/// the sidecar extension: a link named `clip.json` is stored as `clip.<ext>`.
#[must_use]
pub fn resolve_filename(item: &QueueItem, link: &TorboxFileLink) -> String {
    let ext = media_extension(link);
    if let Some(name) = link.filename.as_deref().and_then(usable_filename) {
        match name.rsplit_once('.') {
            Some((stem, last)) if last.eq_ignore_ascii_case(SIDECAR_EXTENSION) => {
                if has_substance(stem) {
                    return format!("{stem}.{ext}");
                }
            }
            _ => return name,
        }
    }
    format!("{}-{}.{ext}", owner_slug(&item.owner), item.id)
}

fn media_extension(link: &TorboxFileLink) -> String {
    extension_from_url(&link.url)
        .filter(|ext| ext != SIDECAR_EXTENSION)
        .unwrap_or_else(|| DEFAULT_MEDIA_EXTENSION.to_string())
}

fn usable_filename(name: &str) -> Option<String> {
    let sanitized = sanitize_filename(name.trim());
    has_substance(&sanitized).then_some(sanitized)
}

fn has_substance(name: &str) -> bool {
    !name.trim_matches(|c| c == '_' || c == '.').is_empty()
}

/// Lowercases `owner` and keeps only `[a-z0-9_-]`; empty becomes `unknown`.
#[must_use]
pub fn owner_slug(owner: &str) -> String {
    let slug: String = owner
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Extension of the last URL path segment, if alphanumeric and short.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty()
        || ext.chars().count() > MAX_EXTENSION_CHARS
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Sanitizes a filename for safe filesystem use.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Returns true when `name` is a single plain path component.
#[must_use]
pub fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Resolves a free path in `dir`, adding `_2`, `_3`, ... before the extension on collision.
///
/// A candidate is free only when both the media path and its sidecar path
/// are unused.
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let base_path = dir.join(filename);
    if is_free(&base_path) {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) => (&filename[..pos], &filename[pos..]),
        None => (filename, ""),
    };

    for i in 2..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if is_free(&candidate) {
            return candidate;
        }
    }

    let timestamp = chrono::Utc::now().timestamp();
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_free(media_path: &Path) -> bool {
    !media_path.exists() && !sidecar_path(media_path).exists()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::queue::NewQueueItem;

    fn link(url: &str, filename: Option<&str>) -> TorboxFileLink {
        TorboxFileLink {
            url: url.to_string(),
            filename: filename.map(str::to_string),
            size_bytes: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("a/b.mp4"), "a_b.mp4");
        assert_eq!(sanitize_filename("a\\b:c*?.mp4"), "a_b_c__.mp4");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_owner_slug() {
        assert_eq!(owner_slug("Some Channel!"), "somechannel");
        assert_eq!(owner_slug("dj_x-99"), "dj_x-99");
        assert_eq!(owner_slug("日本"), "unknown");
        assert_eq!(owner_slug(""), "unknown");
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://cdn.test/a/Clip.MKV?x=1").as_deref(), Some("mkv"));
        assert_eq!(extension_from_url("https://cdn.test/a/clip"), None);
        assert_eq!(extension_from_url("https://cdn.test/a/clip.verylongext"), None);
        assert_eq!(extension_from_url("https://cdn.test/a/clip.mp-4"), None);
        assert_eq!(extension_from_url("not a url"), None);
    }

    #[test]
    fn test_resolve_filename_prefers_link_name() {
        let item = NewQueueItem::new("https://src").with_owner("Chan").into_item(Utc::now());
        assert_eq!(
            resolve_filename(&item, &link("https://cdn/x", Some("../evil/clip.mp4"))),
            ".._evil_clip.mp4"
        );
    }

    #[test]
    fn test_resolve_filename_synthesizes() {
        let item = NewQueueItem::new("https://src").with_owner("My Chan").into_item(Utc::now());
        let name = resolve_filename(&item, &link("https://cdn/file.webm", Some("  ")));
        assert_eq!(name, format!("mychan-{}.webm", item.id));

        let name = resolve_filename(&item, &link("https://cdn/stream", None));
        assert_eq!(name, format!("mychan-{}.mp4", item.id));
    }

    #[test]
    fn test_resolve_filename_never_uses_sidecar_extension() {
        let item = NewQueueItem::new("https://src").with_owner("Chan").into_item(Utc::now());
        assert_eq!(
            resolve_filename(&item, &link("https://cdn/x", Some("clip.JSON"))),
            "clip.mp4"
        );
        assert_eq!(
            resolve_filename(&item, &link("https://cdn/v.webm", Some("clip.json"))),
            "clip.webm"
        );
        assert_eq!(
            resolve_filename(&item, &link("https://cdn/meta.json", Some(".json"))),
            format!("chan-{}.mp4", item.id)
        );
    }

    #[test]
    fn test_is_plain_filename() {
        assert!(is_plain_filename("clip.mp4"));
        assert!(!is_plain_filename("../clip.mp4"));
        assert!(!is_plain_filename("dir/clip.mp4"));
        assert!(!is_plain_filename("dir\\clip.mp4"));
        assert!(!is_plain_filename(".."));
        assert!(!is_plain_filename(""));
    }

    #[test]
    fn test_resolve_unique_path_with_conflict() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("clip.mp4"), b"x").unwrap();
        assert_eq!(
            resolve_unique_path(temp.path(), "clip.mp4"),
            temp.path().join("clip_2.mp4")
        );
        assert_eq!(
            resolve_unique_path(temp.path(), "other.mp4"),
            temp.path().join("other.mp4")
        );
    }

    #[test]
    fn test_resolve_unique_path_skips_taken_sidecar() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("clip.json"), b"{}").unwrap();
        std::fs::write(temp.path().join("clip_2.json"), b"{}").unwrap();
        assert_eq!(
            resolve_unique_path(temp.path(), "clip.webm"),
            temp.path().join("clip_3.webm")
        );
    }
}
