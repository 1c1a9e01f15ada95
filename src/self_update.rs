//! Replacing the container watchducker itself runs in.
//!
//! The running instance cannot stop itself before its successor is up, so the
//! old container is renamed out of the way, the new one is created under the
//! original name and started, and only then is the old one stopped and
//! removed. For a short time both run.
use crate::docker::{ContainerEngine, ContainerID};
use crate::operator::STOP_TIMEOUT;
use crate::reconcile::{is_host_network, reconcile};
use crate::types::{BatchCheckResult, ContainerRecord, ReconciledCreateSpec};
use crate::{SELF_LABELS, WatchduckerError, short_id};
use bollard::models::EndpointSettings;
use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::{BTreeMap, HashMap};

const DISTRIBUTION_NAMES: [&str; 2] = ["watchducker", "naomi233"];
const SUFFIX_LEN: usize = 8;

/// True for the container carrying one of the self labels. With
/// `image_heuristic` any container whose image mentions watchducker matches as
/// well, which also catches unrelated images that happen to contain the name.
pub fn is_self_container(container: &ContainerRecord, image_heuristic: bool) -> bool {
    SELF_LABELS
        .iter()
        .any(|(key, value)| container.has_label(key, value))
        || (image_heuristic
            && DISTRIBUTION_NAMES
                .iter()
                .any(|name| container.image.contains(name)))
}

pub struct SelfUpdater<E> {
    engine: E,
    image_heuristic: bool,
}

impl<E: ContainerEngine> SelfUpdater<E> {
    pub fn new(engine: E, image_heuristic: bool) -> Self {
        Self {
            engine,
            image_heuristic,
        }
    }

    /// Docker ANDs label filters, so the self labels are matched here rather
    /// than by the engine.
    pub async fn find_self_container(&self) -> Result<ContainerRecord, WatchduckerError> {
        let own = self
            .engine
            .list_containers(false, HashMap::new())
            .await?
            .into_iter()
            .filter_map(ContainerRecord::from_summary)
            .find(|c| is_self_container(c, self.image_heuristic))
            .ok_or(WatchduckerError::SelfContainerNotFound)?;
        info!("found own container {} ({})", own.name, own.short_id());
        Ok(own)
    }

    /// Replaces the own container if its image was among the updated ones in
    /// `result`. Returns the id of the new container when a replacement ran.
    pub async fn update_if_needed(
        &self,
        result: &BatchCheckResult,
    ) -> Result<Option<ContainerID>, WatchduckerError> {
        let own = self.find_self_container().await?;
        // the image reference from before the pull; once the tag moved docker
        // reports the old container's image by id
        let Some(checked) = result.containers.iter().find(|c| c.id == own.id) else {
            debug!("own container was not part of this check");
            return Ok(None);
        };
        let Some(new_image) = result.update_mapping().target_for(&checked.image).map(str::to_string)
        else {
            debug!("own image {} is up to date", checked.image);
            return Ok(None);
        };
        self.self_update(&own, &new_image).await.map(Some)
    }

    pub async fn self_update(
        &self,
        own: &ContainerRecord,
        new_image: &str,
    ) -> Result<ContainerID, WatchduckerError> {
        info!("starting self update of {} to {new_image}", own.name);
        let details = self
            .engine
            .inspect_container(&own.id)
            .await
            .map_err(failed_while("inspecting the own container"))?;
        let image = self
            .engine
            .inspect_image(new_image)
            .await
            .map_err(failed_while("inspecting the new image"))?;
        let spec = reconcile(&details, &image, new_image);
        self.replace(own, spec).await
    }

    async fn replace(
        &self,
        own: &ContainerRecord,
        spec: ReconciledCreateSpec,
    ) -> Result<ContainerID, WatchduckerError> {
        let temporary = temporary_name(&own.name);
        info!("renaming own container {} to {temporary}", own.name);
        self.engine
            .rename_container(&own.id, &temporary)
            .await
            .map_err(failed_while("renaming the own container"))?;

        let new_id = match self.create_attached(&own.name, spec).await {
            Ok(id) => id,
            Err(e) => {
                self.restore_name(own).await;
                return Err(failed_while("creating the new container")(e));
            }
        };

        if let Err(e) = self.engine.start_container(&new_id).await {
            // the new container holds the original name until it is gone
            if let Err(remove_error) = self.engine.remove_container(&new_id, true).await {
                warn!(
                    "failed to remove new container {}: {remove_error}",
                    short_id(&new_id)
                );
            }
            self.restore_name(own).await;
            return Err(failed_while("starting the new container")(e));
        }
        info!("new container {} started", short_id(&new_id));

        self.retire(own, &temporary).await;
        info!("self update finished, now running as {}", short_id(&new_id));
        Ok(new_id)
    }

    /// Creates the container attached to a single network, then moves it onto
    /// every network the old container was on. A container that cannot be
    /// wired up is removed again.
    async fn create_attached(
        &self,
        name: &str,
        mut spec: ReconciledCreateSpec,
    ) -> Result<ContainerID, WatchduckerError> {
        let required: BTreeMap<String, EndpointSettings> = spec
            .networking
            .endpoints_config
            .take()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let initial = required.iter().next().map(|(n, e)| (n.clone(), e.clone()));
        spec.networking.endpoints_config = Some(initial.clone().into_iter().collect());
        let host_network = is_host_network(&spec.host_config);

        let id = self.engine.create_container(name, spec).await?;
        if host_network {
            return Ok(id);
        }
        if let Err(e) = self
            .reconnect(&id, initial.as_ref().map(|(n, _)| n.as_str()), &required)
            .await
        {
            if let Err(remove_error) = self.engine.remove_container(&id, true).await {
                warn!(
                    "failed to remove half wired container {}: {remove_error}",
                    short_id(&id)
                );
            }
            return Err(e);
        }
        Ok(id)
    }

    async fn reconnect(
        &self,
        id: &str,
        initial: Option<&str>,
        required: &BTreeMap<String, EndpointSettings>,
    ) -> Result<(), WatchduckerError> {
        if let Some(network) = initial {
            self.engine.disconnect_network(network, id, true).await?;
        }
        for (network, endpoint) in required {
            debug!("connecting {} to {network}", short_id(id));
            self.engine
                .connect_network(network, id, endpoint.clone())
                .await?;
        }
        Ok(())
    }

    async fn restore_name(&self, own: &ContainerRecord) {
        if let Err(e) = self.engine.rename_container(&own.id, &own.name).await {
            warn!("failed to restore name of own container {}: {e}", own.name);
        }
    }

    /// The new instance is already serving, so failures here only leave an
    /// orphaned renamed container behind.
    async fn retire(&self, own: &ContainerRecord, temporary: &str) {
        info!("stopping and removing old container {temporary}");
        if let Err(e) = self.engine.stop_container(&own.id, STOP_TIMEOUT).await {
            warn!("failed to stop old container {temporary}: {e}, the new container is running");
        }
        match self.engine.remove_container(&own.id, true).await {
            Ok(()) => info!("old container {temporary} removed"),
            Err(e) => {
                warn!(
                    "failed to remove old container {temporary}: {e}, the new container is running"
                )
            }
        }
    }
}

fn temporary_name(name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{name}_{suffix}")
}

fn failed_while(step: &'static str) -> impl FnOnce(WatchduckerError) -> WatchduckerError {
    move |source| WatchduckerError::SelfUpdate {
        step: step.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(image: &str, labels: &[(&str, &str)]) -> ContainerRecord {
        ContainerRecord {
            id: "0123456789abcdef".to_string(),
            name: "watchducker".to_string(),
            image: image.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            state: "running".to_string(),
        }
    }

    #[test]
    fn test_self_label_identifies() {
        assert!(is_self_container(
            &record("ghcr.io/someone/app:latest", &[("watchducker.self", "true")]),
            false
        ));
        assert!(!is_self_container(
            &record("ghcr.io/someone/app:latest", &[("watchducker.self", "false")]),
            false
        ));
    }

    #[test]
    fn test_upstream_self_label_identifies() {
        assert!(is_self_container(
            &record("naomi233/watchducker:latest", &[("naomi233.watchducker", "true")]),
            false
        ));
        assert!(!is_self_container(
            &record("ghcr.io/someone/app:latest", &[("naomi233.watchducker", "false")]),
            false
        ));
    }

    #[test]
    fn test_image_heuristic_is_opt_in() {
        let by_image = record("naomi233/watchducker:latest", &[]);
        assert!(!is_self_container(&by_image, false));
        assert!(is_self_container(&by_image, true));
        assert!(is_self_container(&record("naomi233/duck:1.2", &[]), true));
    }

    #[test]
    fn test_temporary_name() {
        let name = temporary_name("watchducker");
        let suffix = name.strip_prefix("watchducker_").unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
