use crate::docker::{ContainerEngine, ContainerID};
use crate::reconcile::reconcile;
use crate::self_update::is_self_container;
use crate::types::{BatchCheckResult, ContainerRecord, UpdateMapping};
use crate::{WatchduckerError, short_id};
use log::{error, info, warn};
use std::time::Duration;

pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one container during a batch update.
#[derive(Debug, Clone)]
pub struct ReplacementOutcome {
    pub container: String,
    pub image: String,
    pub new_id: Option<ContainerID>,
    pub error: Option<String>,
}

impl ReplacementOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Recreates ordinary containers on their updated images, one at a time.
pub struct Operator<E> {
    engine: E,
    self_image_heuristic: bool,
}

impl<E: ContainerEngine> Operator<E> {
    pub fn new(engine: E, self_image_heuristic: bool) -> Self {
        Self {
            engine,
            self_image_heuristic,
        }
    }

    /// Recreates every container whose image was found updated. The error,
    /// if any, summarises the failed containers; the outcomes are complete
    /// either way.
    pub async fn update_by_batch_result(
        &self,
        result: &BatchCheckResult,
    ) -> (Vec<ReplacementOutcome>, Option<WatchduckerError>) {
        if result.summary.updated == 0 {
            info!("no containers need updating");
            return (Vec::new(), None);
        }
        info!(
            "{} images were updated, recreating their containers",
            result.summary.updated
        );
        let mapping = result.update_mapping();
        let targets: Vec<&ContainerRecord> = result
            .containers
            .iter()
            .filter(|c| mapping.target_for(&c.image).is_some())
            .filter(|c| {
                let own = is_self_container(c, self.self_image_heuristic);
                if own {
                    info!("leaving own container {} to the self update", c.name);
                }
                !own
            })
            .collect();
        if targets.is_empty() {
            warn!("no containers found for the updated images");
            return (Vec::new(), None);
        }
        self.update_containers(targets, &mapping).await
    }

    pub async fn update_containers(
        &self,
        containers: Vec<&ContainerRecord>,
        mapping: &UpdateMapping,
    ) -> (Vec<ReplacementOutcome>, Option<WatchduckerError>) {
        info!("updating {} containers", containers.len());
        let mut outcomes = Vec::with_capacity(containers.len());
        let mut failed = 0;
        let mut first_error = None;

        for container in containers {
            let Some(new_image) = mapping.target_for(&container.image) else {
                warn!(
                    "no updated image for container {} ({}), skipping",
                    container.name, container.image
                );
                continue;
            };
            match self.update_container(container, new_image).await {
                Ok(new_id) => outcomes.push(ReplacementOutcome {
                    container: container.name.clone(),
                    image: new_image.to_string(),
                    new_id: Some(new_id),
                    error: None,
                }),
                Err(e) => {
                    error!("failed to update container {}: {e}", container.name);
                    outcomes.push(ReplacementOutcome {
                        container: container.name.clone(),
                        image: new_image.to_string(),
                        new_id: None,
                        error: Some(e.to_string()),
                    });
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        let error = first_error.map(|first| WatchduckerError::Batch {
            failed,
            first: Box::new(first),
        });
        if error.is_none() {
            info!("updated {} containers", outcomes.len());
        }
        (outcomes, error)
    }

    /// Inspect, stop, remove, create from the reconciled spec, start.
    ///
    /// There is no rollback: a failure after the stop leaves the container
    /// stopped or removed.
    pub async fn update_container(
        &self,
        container: &ContainerRecord,
        new_image: &str,
    ) -> Result<ContainerID, WatchduckerError> {
        info!(
            "updating container {} ({}) to {new_image}",
            container.name,
            container.short_id()
        );
        let details = self.engine.inspect_container(&container.id).await?;
        let image = self.engine.inspect_image(new_image).await?;
        let spec = reconcile(&details, &image, new_image);

        self.engine
            .stop_container(&container.id, STOP_TIMEOUT)
            .await?;
        self.engine.remove_container(&container.id, true).await?;

        let new_id = self.engine.create_container(&container.name, spec).await?;
        self.engine.start_container(&new_id).await?;
        info!(
            "container {} now runs {new_image} as {}",
            container.name,
            short_id(&new_id)
        );
        Ok(new_id)
    }

    pub async fn clean_dangling_images(&self) -> Result<(), WatchduckerError> {
        info!("pruning dangling images");
        self.engine.prune_dangling_images().await?;
        info!("dangling images pruned");
        Ok(())
    }
}
