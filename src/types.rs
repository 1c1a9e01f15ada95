use bollard::models::{ContainerConfig, ContainerSummary, HostConfig, NetworkingConfig};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use crate::short_id;

/// Snapshot of a container as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    /// The image reference exactly as docker reports it for the container.
    pub image: String,
    pub labels: HashMap<String, String>,
    pub state: String,
}

impl ContainerRecord {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }

    /// `None` for summaries without an id, which docker never returns for a
    /// real container.
    pub fn from_summary(summary: ContainerSummary) -> Option<Self> {
        let id = summary.id?;
        let name = summary
            .names
            .unwrap_or_default()
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| short_id(&id).to_string());
        Some(Self {
            id,
            name,
            image: summary.image.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default(),
            state: summary
                .state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Outcome of checking one unique image against its registry.
#[derive(Debug, Clone)]
pub struct ImageCheckResult {
    pub name: String,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub updated: bool,
    pub error: Option<String>,
    pub checked_at: SystemTime,
}

impl ImageCheckResult {
    pub fn checked(name: impl Into<String>, local_hash: String, remote_hash: String) -> Self {
        Self {
            name: name.into(),
            updated: local_hash != remote_hash,
            local_hash: Some(local_hash),
            remote_hash: Some(remote_hash),
            error: None,
            checked_at: SystemTime::now(),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        local_hash: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_hash,
            remote_hash: None,
            updated: false,
            error: Some(error.into()),
            checked_at: SystemTime::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn status(&self) -> ImageStatus {
        if self.is_failed() {
            ImageStatus::Failed
        } else if self.updated {
            ImageStatus::Updated
        } else {
            ImageStatus::UpToDate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Updated,
    UpToDate,
    Failed,
}

impl Display for ImageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::Updated => write!(f, "update available 🔄"),
            ImageStatus::UpToDate => write!(f, "up to date ✅"),
            ImageStatus::Failed => write!(f, "check failed ❌"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_containers: usize,
    pub total_images: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl BatchSummary {
    pub fn from_images(
        images: &[ImageCheckResult],
        total_containers: usize,
        duration: Duration,
    ) -> Self {
        let mut summary = Self {
            total_containers,
            total_images: images.len(),
            duration,
            ..Default::default()
        };
        for image in images {
            match image.status() {
                ImageStatus::Updated => summary.updated += 1,
                ImageStatus::UpToDate => summary.up_to_date += 1,
                ImageStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchCheckResult {
    pub containers: Vec<ContainerRecord>,
    pub images: Vec<ImageCheckResult>,
    /// Container image reference -> the resolved reference it was checked under.
    pub references: HashMap<String, String>,
    pub summary: BatchSummary,
}

impl BatchCheckResult {
    /// Maps every updated, error free image to the reference its containers
    /// should be recreated from.
    pub fn update_mapping(&self) -> UpdateMapping {
        let updated = self
            .images
            .iter()
            .filter(|image| image.updated && !image.is_failed())
            .map(|image| (image.name.clone(), image.name.clone()))
            .collect();
        UpdateMapping {
            updated,
            references: self.references.clone(),
        }
    }
}

/// Image reference -> confirmed updated image reference.
#[derive(Debug, Clone, Default)]
pub struct UpdateMapping {
    updated: HashMap<String, String>,
    references: HashMap<String, String>,
}

impl UpdateMapping {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updated.len()
    }

    /// New image for a container image reference, following the resolution
    /// recorded during the check.
    pub fn target_for(&self, container_image: &str) -> Option<&str> {
        let resolved = self
            .references
            .get(container_image)
            .map(String::as_str)
            .unwrap_or(container_image);
        self.updated.get(resolved).map(String::as_str)
    }
}

/// Minimal configuration needed to recreate a container from a new image.
#[derive(Debug, Clone, Default)]
pub struct ReconciledCreateSpec {
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub networking: NetworkingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updated_only_when_hashes_differ() {
        let updated =
            ImageCheckResult::checked("nginx:latest", "sha256:aaa".into(), "sha256:bbb".into());
        assert!(updated.updated);
        let same =
            ImageCheckResult::checked("nginx:latest", "sha256:aaa".into(), "sha256:aaa".into());
        assert!(!same.updated);
    }

    #[test]
    fn test_summary_counts_add_up() {
        let images = vec![
            ImageCheckResult::checked("a", "1".into(), "2".into()),
            ImageCheckResult::checked("b", "1".into(), "1".into()),
            ImageCheckResult::failed("c", None, "boom"),
            ImageCheckResult::failed("d", Some("1".into()), "pull failed"),
        ];
        let summary = BatchSummary::from_images(&images, 5, Duration::from_secs(1));
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.up_to_date, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(
            summary.updated + summary.up_to_date + summary.failed,
            summary.total_images
        );
    }

    #[test]
    fn test_update_mapping_follows_resolution() {
        let result = BatchCheckResult {
            images: vec![
                ImageCheckResult::checked("nginx:latest", "1".into(), "2".into()),
                ImageCheckResult::checked("redis:7", "1".into(), "1".into()),
            ],
            references: HashMap::from([
                ("sha256:0123".to_string(), "nginx:latest".to_string()),
                ("nginx:latest".to_string(), "nginx:latest".to_string()),
            ]),
            ..Default::default()
        };
        let mapping = result.update_mapping();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.target_for("sha256:0123"), Some("nginx:latest"));
        assert_eq!(mapping.target_for("nginx:latest"), Some("nginx:latest"));
        assert_eq!(mapping.target_for("redis:7"), None);
    }
}
