use crate::WatchduckerError;
use crate::types::{BatchCheckResult, BatchSummary, ContainerRecord, ImageCheckResult};
use std::collections::HashMap;
use std::time::Instant;

/// Collects per image results as the detector's checks complete.
///
/// Results are kept in arrival order. The summary is only computed in
/// [`BatchAggregator::finish`], so it does not depend on that order.
pub struct BatchAggregator {
    started: Instant,
    images: Vec<ImageCheckResult>,
    first_error: Option<WatchduckerError>,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            images: Vec::new(),
            first_error: None,
        }
    }

    pub fn push(&mut self, result: ImageCheckResult) {
        self.images.push(result);
    }

    /// Keeps the first check error; later ones are only counted through their
    /// failed results.
    pub fn record_error(&mut self, error: WatchduckerError) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    pub fn finish(
        self,
        containers: Vec<ContainerRecord>,
        references: HashMap<String, String>,
    ) -> (BatchCheckResult, Option<WatchduckerError>) {
        let summary =
            BatchSummary::from_images(&self.images, containers.len(), self.started.elapsed());
        let result = BatchCheckResult {
            containers,
            images: self.images,
            references,
            summary,
        };
        (result, self.first_error)
    }
}

impl Default for BatchAggregator {
    fn default() -> Self {
        Self::new()
    }
}
