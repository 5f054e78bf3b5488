//! Repository record model

use crate::services::orchestrator::RequestHandle;

/// Placeholder for the archive format in GitHub's `archive_url`
pub const ARCHIVE_FORMAT_TOKEN: &str = "{archive_format}";

/// Placeholder for the optional ref in GitHub's `archive_url`
pub const REF_TOKEN: &str = "{/ref}";

/// One tracked remote repository
#[derive(Debug, Clone, Default)]
pub struct RepositoryRecord {
    /// `owner/name`, the collection key
    pub identifier: String,
    pub display_name: String,
    pub description: String,
    /// Archive URL, possibly still containing placeholder tokens
    pub archive_template_url: String,
    /// Local category, empty when uncategorized
    pub category: String,
    pub entity_tag: Option<String>,
    pub icon_bytes: Option<Vec<u8>>,
    /// In-flight archive download, never persisted
    pub active_download: Option<RequestHandle>,
}

impl RepositoryRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Archive URL with placeholders substituted
    pub fn archive_url(&self, archive_format: &str) -> String {
        resolve_archive_url(&self.archive_template_url, archive_format, "")
    }

    /// Download progress in `0.0..=1.0`, or `None` when idle.
    ///
    /// Zipballs served through codeload usually carry no `Content-Length`, so
    /// this reads `0.0` until the body is complete. Show such a download as
    /// indeterminate rather than stuck.
    pub fn download_progress(&self) -> Option<f32> {
        self.active_download.as_ref().map(RequestHandle::progress)
    }

    pub fn is_downloading(&self) -> bool {
        self.active_download.is_some()
    }

    /// Compare the persisted fields of two records
    pub fn same_persisted_fields(&self, other: &RepositoryRecord) -> bool {
        self.identifier == other.identifier
            && self.display_name == other.display_name
            && self.description == other.description
            && self.archive_template_url == other.archive_template_url
            && self.category == other.category
            && self.entity_tag == other.entity_tag
            && self.icon_bytes == other.icon_bytes
    }
}

/// Substitute the archive placeholders of a GitHub `archive_url`.
///
/// An empty `git_ref` selects the default branch and removes the `{/ref}`
/// token entirely; otherwise it expands to `/<git_ref>`.
pub fn resolve_archive_url(template: &str, archive_format: &str, git_ref: &str) -> String {
    let ref_part = if git_ref.is_empty() {
        String::new()
    } else {
        format!("/{}", git_ref)
    };

    template
        .replace(ARCHIVE_FORMAT_TOKEN, archive_format)
        .replace(REF_TOKEN, &ref_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_default_branch() {
        assert_eq!(
            resolve_archive_url("https://x/{archive_format}{/ref}", "zipball", ""),
            "https://x/zipball"
        );
    }

    #[test]
    fn test_resolve_with_ref() {
        assert_eq!(
            resolve_archive_url(
                "https://api.github.com/repos/o/n/{archive_format}{/ref}",
                "tarball",
                "v1.2"
            ),
            "https://api.github.com/repos/o/n/tarball/v1.2"
        );
    }

    #[test]
    fn test_resolve_is_idempotent_on_resolved_url() {
        let resolved = "https://api.github.com/repos/o/n/zipball";
        assert_eq!(resolve_archive_url(resolved, "zipball", ""), resolved);
    }

    #[test]
    fn test_record_idle_has_no_progress() {
        let record = RepositoryRecord::new("owner/name");
        assert!(!record.is_downloading());
        assert!(record.download_progress().is_none());
    }

    #[test]
    fn test_archive_url_uses_template() {
        let mut record = RepositoryRecord::new("owner/name");
        record.archive_template_url = "https://x/{archive_format}{/ref}".to_string();
        assert_eq!(record.archive_url("zipball"), "https://x/zipball");
    }
}
