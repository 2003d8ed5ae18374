//! "Latest" resolution: pick the newest eligible image of a repository.

use crate::{ImageInfo, RegistryError};
use glob::Pattern;

/// Constrains which tags are candidates for "latest".
pub enum TagFilter {
    /// Anything that does not look like a pre-release build.
    Default,
    /// Tags matching a per-container glob policy.
    Glob(Pattern),
}

impl TagFilter {
    pub fn from_pattern(pattern: Option<&str>) -> Result<Self, RegistryError> {
        match pattern {
            None => Ok(TagFilter::Default),
            Some(text) => {
                let glob = Pattern::new(text).map_err(|e| RegistryError::InvalidPattern {
                    pattern: text.to_owned(),
                    message: e.to_string(),
                })?;
                Ok(TagFilter::Glob(glob))
            }
        }
    }

    pub fn matches(&self, tag: &str) -> bool {
        match self {
            TagFilter::Default => eligible_tag(tag),
            TagFilter::Glob(glob) => glob.matches(tag),
        }
    }
}

/// The default eligibility rule: reject tags carrying a pre-release-style
/// suffix (anything after the first `-`, e.g. `1.2.0-rc1`, `master-a1b2c3`).
pub fn eligible_tag(tag: &str) -> bool {
    !tag.is_empty() && !tag.contains('-')
}

/// The newest image whose tag passes `filter`: candidates sorted by the
/// registry-reported timestamp descending, lexically-greatest tag winning
/// ties so the choice is reproducible.
pub fn latest_image(images: &[ImageInfo], filter: &TagFilter) -> Option<ImageInfo> {
    images
        .iter()
        .filter(|info| info.image.tag().is_some_and(|tag| filter.matches(tag)))
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.image.tag().cmp(&b.image.tag()))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_schema::ImageRef;
    use chrono::{DateTime, Utc};

    fn info(image: &str, created: &str) -> ImageInfo {
        ImageInfo {
            image: image.parse::<ImageRef>().unwrap(),
            created_at: created.parse::<DateTime<Utc>>().unwrap(),
        }
    }

    #[test]
    fn default_filter_rejects_suffixed_tags() {
        assert!(eligible_tag("1.2.0"));
        assert!(eligible_tag("v3"));
        assert!(!eligible_tag("1.2.0-rc1"));
        assert!(!eligible_tag("master-a1b2c3"));
        assert!(!eligible_tag(""));
    }

    #[test]
    fn latest_picks_newest_timestamp() {
        let images = vec![
            info("acme/web:v1", "2025-01-01T00:00:00Z"),
            info("acme/web:v2", "2025-02-01T00:00:00Z"),
        ];
        let picked = latest_image(&images, &TagFilter::Default).unwrap();
        assert_eq!(picked.image.tag(), Some("v2"));
    }

    #[test]
    fn latest_breaks_timestamp_ties_lexically() {
        let images = vec![
            info("acme/web:aaa", "2025-01-01T00:00:00Z"),
            info("acme/web:zzz", "2025-01-01T00:00:00Z"),
        ];
        let picked = latest_image(&images, &TagFilter::Default).unwrap();
        assert_eq!(picked.image.tag(), Some("zzz"));
    }

    #[test]
    fn latest_skips_prerelease_tags_by_default() {
        let images = vec![
            info("acme/web:2.0-rc1", "2025-03-01T00:00:00Z"),
            info("acme/web:1.9", "2025-01-01T00:00:00Z"),
        ];
        let picked = latest_image(&images, &TagFilter::Default).unwrap();
        assert_eq!(picked.image.tag(), Some("1.9"));
    }

    #[test]
    fn glob_filter_constrains_candidates() {
        let images = vec![
            info("acme/web:v1", "2025-01-01T00:00:00Z"),
            info("acme/web:nightly", "2025-06-01T00:00:00Z"),
        ];
        let filter = TagFilter::from_pattern(Some("v*")).unwrap();
        let picked = latest_image(&images, &filter).unwrap();
        assert_eq!(picked.image.tag(), Some("v1"));
    }

    #[test]
    fn no_candidate_yields_none() {
        let images = vec![info("acme/web:build-7", "2025-01-01T00:00:00Z")];
        assert!(latest_image(&images, &TagFilter::Default).is_none());

        let filter = TagFilter::from_pattern(Some("release-*")).unwrap();
        let images = vec![info("acme/web:v1", "2025-01-01T00:00:00Z")];
        assert!(latest_image(&images, &filter).is_none());
    }

    #[test]
    fn invalid_glob_is_an_error() {
        assert!(TagFilter::from_pattern(Some("[")).is_err());
    }
}
