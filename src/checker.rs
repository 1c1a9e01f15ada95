use crate::aggregator::BatchAggregator;
use crate::cli::{Config, Discovery};
use crate::docker::ContainerEngine;
use crate::resolver::resolve_reference;
use crate::types::{BatchCheckResult, ContainerRecord, ImageCheckResult};
use crate::{UPDATE_LABEL, WatchduckerError};
use bollard::models::ContainerSummary;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Called with every image result as soon as it is known.
pub type ProgressObserver = Box<dyn Fn(&ImageCheckResult) + Send + Sync>;

pub struct Checker<E> {
    engine: E,
    config: Arc<Config>,
    observer: Option<ProgressObserver>,
}

impl<E: ContainerEngine> Checker<E> {
    pub fn new(engine: E, config: Arc<Config>) -> Self {
        Self {
            engine,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Containers selected by the configured discovery mode.
    pub async fn discover(&self) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        match &self.config.discovery {
            Discovery::Names(names) => self.by_name(names).await,
            Discovery::All => self.all().await,
            Discovery::Label => self.by_label(UPDATE_LABEL.0, UPDATE_LABEL.1).await,
            Discovery::LabelReversed => {
                self.by_label_reversed(UPDATE_LABEL.0, UPDATE_LABEL.1)
                    .await
            }
        }
    }

    /// A container matches if any of its names does, not only the primary one.
    pub async fn by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        self.list_where(HashMap::new(), |summary| {
            summary
                .names
                .iter()
                .flatten()
                .any(|n| names.iter().any(|wanted| wanted == n.trim_start_matches('/')))
        })
        .await
    }

    /// An empty `value` only requires the label key to be present.
    pub async fn by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        let filter = if value.is_empty() {
            key.to_string()
        } else {
            format!("{key}={value}")
        };
        let containers = self
            .list(HashMap::from([("label".to_string(), vec![filter])]))
            .await?;
        debug!("found {} containers with label `{key}={value}`", containers.len());
        Ok(containers)
    }

    pub async fn by_label_reversed(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        let containers = self.list(HashMap::new()).await?;
        Ok(containers
            .into_iter()
            .filter(|c| !c.has_label(key, value))
            .collect())
    }

    pub async fn all(&self) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        self.list(HashMap::new()).await
    }

    async fn list(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        self.list_where(filters, |_| true).await
    }

    async fn list_where(
        &self,
        filters: HashMap<String, Vec<String>>,
        select: impl Fn(&ContainerSummary) -> bool,
    ) -> Result<Vec<ContainerRecord>, WatchduckerError> {
        let summaries = self
            .engine
            .list_containers(self.config.include_stopped, filters)
            .await?;
        Ok(summaries
            .into_iter()
            .filter(|summary| select(summary))
            .filter_map(ContainerRecord::from_summary)
            .filter(|c| {
                let disabled = self.config.is_disabled(&c.name);
                if disabled {
                    debug!("skipping disabled container {}", c.name);
                }
                !disabled
            })
            .collect())
    }

    /// Checks every unique image used by `containers` against its registry.
    ///
    /// The result is always fully populated. The error, if any, is the first
    /// image check that failed; callers must not discard the result because of
    /// it.
    pub async fn check(
        &self,
        containers: Vec<ContainerRecord>,
    ) -> (BatchCheckResult, Option<WatchduckerError>) {
        let mut aggregator = BatchAggregator::new();
        if containers.is_empty() {
            warn!("no matching containers found");
            return aggregator.finish(containers, HashMap::new());
        }
        info!("checking images of {} containers", containers.len());

        let (unique, references) = self.unique_references(&containers, &mut aggregator).await;
        debug!("{} images to check: {unique:?}", unique.len());

        let mut checks = stream::iter(unique)
            .map(|reference| self.check_image(reference))
            .buffer_unordered(self.config.concurrency.max(1));
        while let Some((result, error)) = checks.next().await {
            self.report(&result);
            aggregator.push(result);
            if let Some(error) = error {
                aggregator.record_error(error);
            }
        }

        let (result, error) = aggregator.finish(containers, references);
        info!(
            "image check finished: {} updated, {} up to date, {} failed in {:?}",
            result.summary.updated,
            result.summary.up_to_date,
            result.summary.failed,
            result.summary.duration
        );
        if error.is_some() {
            warn!("{} image checks failed", result.summary.failed);
        }
        (result, error)
    }

    /// Resolves every container image. Unresolvable images go straight into
    /// the aggregator as failed results and are never pulled.
    async fn unique_references(
        &self,
        containers: &[ContainerRecord],
        aggregator: &mut BatchAggregator,
    ) -> (Vec<String>, HashMap<String, String>) {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        let mut references: HashMap<String, String> = HashMap::new();
        for container in containers {
            let resolved = match references.get(&container.image) {
                Some(resolved) => Ok(resolved.clone()),
                None => resolve_reference(&self.engine, &container.image).await,
            };
            match resolved {
                Ok(resolved) => {
                    references.insert(container.image.clone(), resolved.clone());
                    if seen.insert(resolved.clone()) {
                        unique.push(resolved);
                    }
                }
                Err(e) => {
                    let message = format!(
                        "image {} of container {} cannot be resolved: {e}",
                        container.image, container.name
                    );
                    warn!("{message}");
                    let skipped = ImageCheckResult::failed(container.image.clone(), None, message);
                    self.report(&skipped);
                    aggregator.push(skipped);
                }
            }
        }
        (unique, references)
    }

    async fn check_image(&self, reference: String) -> (ImageCheckResult, Option<WatchduckerError>) {
        info!("checking image {reference}");
        let local = match self.local_hash(&reference).await {
            Ok(hash) => hash,
            Err(e) => {
                let message = format!("failed to read local image: {e}");
                return (ImageCheckResult::failed(reference, None, message), Some(e));
            }
        };
        let remote = match self.remote_hash(&reference).await {
            Ok(hash) => hash,
            Err(e) => {
                let message = format!("failed to read remote image: {e}");
                return (
                    ImageCheckResult::failed(reference, Some(local), message),
                    Some(e),
                );
            }
        };
        let result = ImageCheckResult::checked(reference, local, remote);
        debug!("image {} updated: {}", result.name, result.updated);
        (result, None)
    }

    async fn local_hash(&self, reference: &str) -> Result<String, WatchduckerError> {
        self.engine
            .image_id(reference)
            .await?
            .ok_or_else(|| WatchduckerError::ImageNotFound(reference.to_string()))
    }

    async fn remote_hash(&self, reference: &str) -> Result<String, WatchduckerError> {
        self.engine.pull_image(reference).await?;
        self.local_hash(reference).await
    }

    fn report(&self, result: &ImageCheckResult) {
        if let Some(observer) = &self.observer {
            observer(result);
        }
    }
}
