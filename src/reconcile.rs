//! Minimal create configuration for recreating a container from a new image.
//!
//! Inspecting a container returns its *effective* configuration: everything
//! the image supplied plus everything the user overrode. Feeding that back
//! into a create call would pin the old image's defaults as explicit
//! overrides, and they would pile up with every update. Values equal to the
//! new image's defaults are therefore dropped so the new image supplies them.
use crate::short_id;
use crate::types::ReconciledCreateSpec;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, EndpointSettings, HostConfig, ImageInspect,
    NetworkingConfig,
};
use std::collections::{HashMap, HashSet};

pub fn reconcile(
    container: &ContainerInspectResponse,
    image: &ImageInspect,
    new_image: &str,
) -> ReconciledCreateSpec {
    ReconciledCreateSpec {
        config: create_config(container, image, new_image),
        host_config: create_host_config(container),
        networking: network_config(container),
    }
}

pub fn create_config(
    container: &ContainerInspectResponse,
    image: &ImageInspect,
    new_image: &str,
) -> ContainerConfig {
    let mut config = container.config.clone().unwrap_or_default();
    let host_config = container.host_config.clone().unwrap_or_default();
    let defaults = image.config.clone().unwrap_or_default();

    clear_if_default(&mut config.working_dir, defaults.working_dir.as_ref());
    clear_if_default(&mut config.user, defaults.user.as_ref());

    if is_container_network(&host_config) {
        config.hostname = None;
    }

    // docker resolves entrypoint and cmd together: cmd may only be inherited
    // if the entrypoint is inherited as well
    if clear_if_default(&mut config.entrypoint, defaults.entrypoint.as_ref()) {
        clear_if_default(&mut config.cmd, defaults.cmd.as_ref());
    }

    if let (Some(health), Some(default_health)) =
        (config.healthcheck.as_mut(), defaults.healthcheck.as_ref())
    {
        clear_if_default(&mut health.test, default_health.test.as_ref());
        clear_if_default(&mut health.retries, default_health.retries.as_ref());
        clear_if_default(&mut health.interval, default_health.interval.as_ref());
        clear_if_default(&mut health.timeout, default_health.timeout.as_ref());
        clear_if_default(
            &mut health.start_period,
            default_health.start_period.as_ref(),
        );
    }

    config.env = config
        .env
        .map(|env| subtract_list(env, defaults.env.as_deref().unwrap_or_default()));
    config.labels = config
        .labels
        .map(|labels| subtract_map(labels, defaults.labels.as_ref()));

    if let (Some(volumes), Some(default_volumes)) =
        (config.volumes.as_mut(), defaults.volumes.as_ref())
    {
        volumes.retain(|path, _| !default_volumes.contains_key(path));
    }

    if let (Some(ports), Some(default_ports)) =
        (config.exposed_ports.as_mut(), defaults.exposed_ports.as_ref())
    {
        ports.retain(|port, _| !default_ports.contains_key(port));
    }
    // host bindings cannot be inferred from the image, keep their ports exposed
    for port in host_config.port_bindings.unwrap_or_default().into_keys() {
        config
            .exposed_ports
            .get_or_insert_with(HashMap::new)
            .insert(port, HashMap::new());
    }

    config.image = Some(new_image.to_string());
    config
}

pub fn create_host_config(container: &ContainerInspectResponse) -> HostConfig {
    let mut host_config = container.host_config.clone().unwrap_or_default();
    if let Some(links) = host_config.links.as_mut() {
        for link in links.iter_mut() {
            *link = rewrite_link(link);
        }
    }
    host_config
}

/// Endpoints of the old container, minus the alias docker adds for the old
/// container's short id. Docker never removes that alias itself, so it would
/// otherwise be carried into every later generation.
pub fn network_config(container: &ContainerInspectResponse) -> NetworkingConfig {
    let own_alias = short_id(container.id.as_deref().unwrap_or_default()).to_string();
    let mut endpoints: HashMap<String, EndpointSettings> = container
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.clone())
        .unwrap_or_default();
    for endpoint in endpoints.values_mut() {
        if let Some(aliases) = endpoint.aliases.as_mut() {
            aliases.retain(|alias| alias != &own_alias);
        }
    }
    NetworkingConfig {
        endpoints_config: Some(endpoints),
    }
}

pub fn is_container_network(host_config: &HostConfig) -> bool {
    host_config
        .network_mode
        .as_deref()
        .is_some_and(|mode| mode.starts_with("container:"))
}

pub fn is_host_network(host_config: &HostConfig) -> bool {
    host_config.network_mode.as_deref() == Some("host")
}

/// Sets `value` to `None` when it equals `default`, treating a missing value
/// like an empty one. Returns whether the value now inherits the default.
fn clear_if_default<T: PartialEq + Default>(value: &mut Option<T>, default: Option<&T>) -> bool {
    let empty = T::default();
    if value.as_ref().unwrap_or(&empty) == default.unwrap_or(&empty) {
        *value = None;
        true
    } else {
        false
    }
}

fn subtract_list(values: Vec<String>, defaults: &[String]) -> Vec<String> {
    let defaults: HashSet<&String> = defaults.iter().collect();
    values
        .into_iter()
        .filter(|value| !defaults.contains(value))
        .collect()
}

fn subtract_map(
    values: HashMap<String, String>,
    defaults: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    match defaults {
        Some(defaults) => values
            .into_iter()
            .filter(|(key, value)| defaults.get(key) != Some(value))
            .collect(),
        None => values,
    }
}

/// `/db:/web/db` -> `db:db`
fn rewrite_link(link: &str) -> String {
    match link.split_once(':') {
        Some((name, alias)) => {
            let name = name.trim_start_matches('/');
            let alias = alias.rsplit('/').next().unwrap_or(alias);
            format!("{name}:{alias}")
        }
        None => link.to_string(),
    }
}
