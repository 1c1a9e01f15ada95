use crate::types::ReconciledCreateSpec;
use crate::{WatchduckerError, short_id};
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerSummary, EndpointSettings,
    ImageInspect, NetworkConnectRequest, NetworkDisconnectRequest,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    ListImagesOptions, PruneImagesOptions, RemoveContainerOptions, RenameContainerOptions,
    StartContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::StreamExt;
use log::{debug, trace};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ContainerID = String;

/// Operations watchducker needs from a container engine.
///
/// Every call is independently fallible. Implementations must tolerate
/// concurrent use from the detector's image checks.
pub trait ContainerEngine: Send + Sync {
    fn list_containers(
        &self,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> impl Future<Output = Result<Vec<ContainerSummary>, WatchduckerError>> + Send;

    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInspectResponse, WatchduckerError>> + Send;

    fn create_container(
        &self,
        name: &str,
        spec: ReconciledCreateSpec,
    ) -> impl Future<Output = Result<ContainerID, WatchduckerError>> + Send;

    fn start_container(&self, id: &str)
    -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn remove_container(
        &self,
        id: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn rename_container(
        &self,
        id: &str,
        new_name: &str,
    ) -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    /// Id of the local image matching `reference`, if there is one.
    fn image_id(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<Option<String>, WatchduckerError>> + Send;

    fn inspect_image(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<ImageInspect, WatchduckerError>> + Send;

    fn pull_image(&self, reference: &str)
    -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn prune_dangling_images(&self) -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        endpoint: EndpointSettings,
    ) -> impl Future<Output = Result<(), WatchduckerError>> + Send;

    fn disconnect_network(
        &self,
        network: &str,
        container_id: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), WatchduckerError>> + Send;
}

/// [`ContainerEngine`] backed by the local docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    cancel: CancellationToken,
}

impl DockerEngine {
    /// Connects with the local defaults and pings the daemon. Failure here is
    /// fatal for the run.
    pub async fn connect(cancel: CancellationToken) -> Result<Self, WatchduckerError> {
        let docker = Docker::connect_with_local_defaults().map_err(WatchduckerError::Connect)?;
        let version = docker.ping().await.map_err(WatchduckerError::Connect)?;
        debug!("docker daemon reachable: {version}");
        Ok(Self { docker, cancel })
    }

    async fn guarded<T>(
        &self,
        context: impl FnOnce() -> String,
        call: impl Future<Output = Result<T, bollard::errors::Error>>,
    ) -> Result<T, WatchduckerError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WatchduckerError::Cancelled),
            result = call => result.map_err(|e| WatchduckerError::engine(context(), e)),
        }
    }
}

impl ContainerEngine for DockerEngine {
    async fn list_containers(
        &self,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>, WatchduckerError> {
        let options = ListContainersOptions {
            all,
            filters: Some(filters),
            ..Default::default()
        };
        self.guarded(
            || "failed to list containers".to_string(),
            self.docker.list_containers(Some(options)),
        )
        .await
    }

    async fn inspect_container(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, WatchduckerError> {
        let details = self
            .guarded(
                || format!("failed to inspect container {}", short_id(id)),
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .await?;
        trace!(
            "container details: {}",
            serde_json::to_string_pretty(&details).unwrap_or_default()
        );
        Ok(details)
    }

    async fn create_container(
        &self,
        name: &str,
        spec: ReconciledCreateSpec,
    ) -> Result<ContainerID, WatchduckerError> {
        let options = CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let response = self
            .guarded(
                || format!("failed to create container {name}"),
                self.docker.create_container(Some(options), create_body(spec)),
            )
            .await?;
        debug!("container {name} created with id {}", short_id(&response.id));
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), WatchduckerError> {
        self.guarded(
            || format!("failed to start container {}", short_id(id)),
            self.docker
                .start_container(id, None::<StartContainerOptions>),
        )
        .await
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), WatchduckerError> {
        let options = StopContainerOptionsBuilder::new()
            .t(timeout.as_secs() as i32)
            .build();
        self.guarded(
            || format!("failed to stop container {}", short_id(id)),
            self.docker.stop_container(id, Some(options)),
        )
        .await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), WatchduckerError> {
        let options = RemoveContainerOptions {
            v: false,
            force,
            link: false,
        };
        self.guarded(
            || format!("failed to remove container {}", short_id(id)),
            self.docker.remove_container(id, Some(options)),
        )
        .await
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), WatchduckerError> {
        let options = RenameContainerOptions {
            name: new_name.to_string(),
        };
        self.guarded(
            || format!("failed to rename container {} to {new_name}", short_id(id)),
            self.docker.rename_container(id, options),
        )
        .await
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>, WatchduckerError> {
        let filters = HashMap::from([("reference".to_string(), vec![reference.to_string()])]);
        let options = ListImagesOptions {
            filters: Some(filters),
            ..Default::default()
        };
        let images = self
            .guarded(
                || format!("failed to list images for {reference}"),
                self.docker.list_images(Some(options)),
            )
            .await?;
        Ok(images.into_iter().next().map(|image| image.id))
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, WatchduckerError> {
        self.guarded(
            || format!("failed to inspect image {reference}"),
            self.docker.inspect_image(reference),
        )
        .await
    }

    async fn pull_image(&self, reference: &str) -> Result<(), WatchduckerError> {
        let (image_name, image_tag) = crate::resolver::split_reference(reference);
        let options = CreateImageOptions {
            from_image: Some(image_name.to_owned()),
            tag: Some(image_tag.to_owned()),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WatchduckerError::Cancelled),
                next = pull_stream.next() => next,
            };
            match next {
                Some(Ok(output)) => debug!(
                    "{reference}: {} {}",
                    output.id.unwrap_or_default(),
                    output.status.unwrap_or_default()
                ),
                Some(Err(e)) => {
                    return Err(WatchduckerError::engine(
                        format!("failed to pull image {reference}"),
                        e,
                    ));
                }
                None => return Ok(()),
            }
        }
    }

    async fn prune_dangling_images(&self) -> Result<(), WatchduckerError> {
        let filters = HashMap::from([("dangling".to_string(), vec!["true".to_string()])]);
        let options = PruneImagesOptions {
            filters: Some(filters),
            ..Default::default()
        };
        let report = self
            .guarded(
                || "failed to prune dangling images".to_string(),
                self.docker.prune_images(Some(options)),
            )
            .await?;
        debug!("dangling image prune report: {report:?}");
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        endpoint: EndpointSettings,
    ) -> Result<(), WatchduckerError> {
        let request = NetworkConnectRequest {
            container: Some(container_id.to_string()),
            endpoint_config: Some(endpoint),
            ..Default::default()
        };
        self.guarded(
            || {
                format!(
                    "failed to connect container {} to network {network}",
                    short_id(container_id)
                )
            },
            self.docker.connect_network(network, request),
        )
        .await
    }

    async fn disconnect_network(
        &self,
        network: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), WatchduckerError> {
        let request = NetworkDisconnectRequest {
            container: Some(container_id.to_string()),
            force: Some(force),
            ..Default::default()
        };
        self.guarded(
            || {
                format!(
                    "failed to disconnect container {} from network {network}",
                    short_id(container_id)
                )
            },
            self.docker.disconnect_network(network, request),
        )
        .await
    }
}

fn create_body(spec: ReconciledCreateSpec) -> ContainerCreateBody {
    let config = spec.config;
    ContainerCreateBody {
        hostname: config.hostname,
        domainname: config.domainname,
        user: config.user,
        attach_stdin: config.attach_stdin,
        attach_stdout: config.attach_stdout,
        attach_stderr: config.attach_stderr,
        exposed_ports: config.exposed_ports,
        tty: config.tty,
        open_stdin: config.open_stdin,
        stdin_once: config.stdin_once,
        env: config.env,
        cmd: config.cmd,
        healthcheck: config.healthcheck,
        image: config.image,
        volumes: config.volumes,
        working_dir: config.working_dir,
        entrypoint: config.entrypoint,
        network_disabled: config.network_disabled,
        on_build: config.on_build,
        labels: config.labels,
        stop_signal: config.stop_signal,
        stop_timeout: config.stop_timeout,
        shell: config.shell,
        host_config: Some(spec.host_config),
        networking_config: Some(spec.networking),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // building the client does not touch the socket, so no daemon is needed
    fn cancelled_engine() -> DockerEngine {
        let cancel = CancellationToken::new();
        cancel.cancel();
        DockerEngine {
            docker: Docker::connect_with_local_defaults().unwrap(),
            cancel,
        }
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_cancelled() {
        let engine = cancelled_engine();
        let result = engine
            .guarded(
                || "never finishes".to_string(),
                std::future::pending::<Result<(), bollard::errors::Error>>(),
            )
            .await;
        assert!(matches!(result, Err(WatchduckerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_pull_returns_cancelled() {
        let engine = cancelled_engine();
        assert!(matches!(
            engine.pull_image("nginx:latest").await,
            Err(WatchduckerError::Cancelled)
        ));
    }
}
