//! In-memory container engine recording every call made against it.
#![allow(dead_code)]

use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, ContainerSummary, EndpointSettings, ImageInspect};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use watchducker::WatchduckerError;
use watchducker::docker::{ContainerEngine, ContainerID};
use watchducker::types::ReconciledCreateSpec;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// further names docker lists after the primary one, like legacy links
    pub extra_names: Vec<String>,
    pub running: bool,
    pub details: Value,
}

#[derive(Default)]
pub struct Inner {
    pub containers: Vec<FakeContainer>,
    /// reference -> image id present locally
    pub local: HashMap<String, String>,
    /// reference -> image id a pull would fetch
    pub remote: HashMap<String, String>,
    /// reference -> inspect output, for images needing more than an id
    pub image_details: HashMap<String, Value>,
    pub pulls: Vec<String>,
    pub calls: Vec<String>,
    pub created: Vec<(String, ReconciledCreateSpec)>,
    pub stop_timeouts: Vec<Duration>,
    pub fail_pull: HashSet<String>,
    pub fail_create: HashSet<String>,
    pub fail_start: HashSet<String>,
    pub fail_stop: HashSet<String>,
    pub fail_remove: HashSet<String>,
    pub fail_connect: HashSet<String>,
    next_id: usize,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Mutex<Inner>>,
}

fn refused(message: impl Into<String>) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code: 500,
        message: message.into(),
    }
}

fn failure(context: &str, message: impl Into<String>) -> WatchduckerError {
    WatchduckerError::Engine {
        context: context.to_string(),
        source: refused(message),
    }
}

fn not_found(what: &str) -> WatchduckerError {
    WatchduckerError::Engine {
        context: format!("no such object {what}"),
        source: BollardError::DockerResponseServerError {
            status_code: 404,
            message: "not found".to_string(),
        },
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_container(&self, id: &str, name: &str, image: &str, labels: &[(&str, &str)]) {
        let labels: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let details = json!({
            "Id": id,
            "Name": format!("/{name}"),
            "Config": {
                "Image": image,
                "Hostname": &id[..12.min(id.len())],
                "Labels": labels,
                "Env": ["PATH=/usr/bin"],
            },
            "HostConfig": { "NetworkMode": "bridge" },
            "NetworkSettings": { "Networks": { "bridge": { "NetworkID": "bridge-id" } } },
        });
        self.state().containers.push(FakeContainer {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            labels,
            extra_names: Vec::new(),
            running: true,
            details,
        });
    }

    pub fn add_name(&self, id: &str, name: &str) {
        if let Some(container) = self.state().containers.iter_mut().find(|c| c.id == id) {
            container.extra_names.push(name.to_string());
        }
    }

    pub fn stop(&self, id: &str) {
        if let Some(container) = self.state().containers.iter_mut().find(|c| c.id == id) {
            container.running = false;
        }
    }

    /// Replaces the network part of a container's inspect output.
    pub fn set_networks(&self, id: &str, mode: &str, networks: Value) {
        if let Some(container) = self.state().containers.iter_mut().find(|c| c.id == id) {
            container.details["HostConfig"]["NetworkMode"] = json!(mode);
            container.details["NetworkSettings"]["Networks"] = networks;
        }
    }

    pub fn add_local_image(&self, reference: &str, id: &str) {
        self.state()
            .local
            .insert(reference.to_string(), id.to_string());
    }

    pub fn add_remote_image(&self, reference: &str, id: &str) {
        self.state()
            .remote
            .insert(reference.to_string(), id.to_string());
    }

    pub fn set_image_details(&self, reference: &str, details: Value) {
        self.state()
            .image_details
            .insert(reference.to_string(), details);
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state().pulls.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.state()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state().containers.iter().find(|c| c.id == id).cloned()
    }

    fn summary(container: &FakeContainer) -> ContainerSummary {
        serde_json::from_value(json!({
            "Id": container.id,
            "Names": std::iter::once(&container.name)
                .chain(&container.extra_names)
                .map(|name| format!("/{name}"))
                .collect::<Vec<_>>(),
            "Image": container.image,
            "Labels": container.labels,
            "State": if container.running { "running" } else { "exited" },
        }))
        .unwrap()
    }
}

fn matches_label(labels: &HashMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(filter),
    }
}

impl ContainerEngine for FakeEngine {
    async fn list_containers(
        &self,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>, WatchduckerError> {
        let label_filters = filters.get("label").cloned().unwrap_or_default();
        let state = self.state();
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.running)
            .filter(|c| label_filters.iter().all(|f| matches_label(&c.labels, f)))
            .map(Self::summary)
            .collect())
    }

    async fn inspect_container(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, WatchduckerError> {
        let details = self
            .container(id)
            .map(|c| c.details)
            .ok_or_else(|| not_found(id))?;
        Ok(serde_json::from_value(details).unwrap())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: ReconciledCreateSpec,
    ) -> Result<ContainerID, WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("create {name}"));
        if state.fail_create.contains(name) {
            return Err(failure("create", "invalid configuration"));
        }
        if state.containers.iter().any(|c| c.name == name) {
            return Err(failure("create", format!("name {name} is already in use")));
        }
        state.next_id += 1;
        let id = format!("{:064x}", 0xfeed_0000 + state.next_id);
        let image = spec.config.image.clone().unwrap_or_default();
        let labels = spec.config.labels.clone().unwrap_or_default();
        let details = json!({
            "Id": id,
            "Name": format!("/{name}"),
            "Config": serde_json::to_value(&spec.config).unwrap(),
            "HostConfig": serde_json::to_value(&spec.host_config).unwrap(),
            "NetworkSettings": {
                "Networks": serde_json::to_value(&spec.networking.endpoints_config).unwrap(),
            },
        });
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image,
            labels,
            extra_names: Vec::new(),
            running: false,
            details,
        });
        state.created.push((name.to_string(), spec));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("start {id}"));
        let fail_start = state.fail_start.clone();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        if fail_start.contains(&container.name) {
            return Err(failure("start", "port is already allocated"));
        }
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("stop {id}"));
        state.stop_timeouts.push(timeout);
        if state.fail_stop.contains(id) {
            return Err(failure("stop", "container did not stop"));
        }
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("remove {id}"));
        if state.fail_remove.contains(id) {
            return Err(failure("remove", "device or resource busy"));
        }
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("rename {id} {new_name}"));
        if state
            .containers
            .iter()
            .any(|c| c.name == new_name && c.id != id)
        {
            return Err(failure("rename", format!("name {new_name} is already in use")));
        }
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        container.name = new_name.to_string();
        container.details["Name"] = json!(format!("/{new_name}"));
        Ok(())
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>, WatchduckerError> {
        Ok(self.state().local.get(reference).cloned())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, WatchduckerError> {
        let state = self.state();
        let details = match state.image_details.get(reference) {
            Some(details) => details.clone(),
            None => {
                let id = state.local.get(reference).ok_or_else(|| not_found(reference))?;
                json!({ "Id": id, "RepoTags": [reference], "Config": {} })
            }
        };
        Ok(serde_json::from_value(details).unwrap())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), WatchduckerError> {
        // give concurrent checks a chance to interleave
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.pulls.push(reference.to_string());
        if state.fail_pull.contains(reference) {
            return Err(failure("pull", "pull access denied"));
        }
        if let Some(id) = state.remote.get(reference).cloned() {
            state.local.insert(reference.to_string(), id);
        }
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<(), WatchduckerError> {
        self.state().calls.push("prune".to_string());
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        _endpoint: EndpointSettings,
    ) -> Result<(), WatchduckerError> {
        let mut state = self.state();
        state.calls.push(format!("connect {network} {container_id}"));
        if state.fail_connect.contains(network) {
            return Err(failure("connect", format!("network {network} not found")));
        }
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network: &str,
        container_id: &str,
        _force: bool,
    ) -> Result<(), WatchduckerError> {
        self.state()
            .calls
            .push(format!("disconnect {network} {container_id}"));
        Ok(())
    }
}
