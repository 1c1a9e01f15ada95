use crate::WatchduckerError;
use crate::docker::ContainerEngine;
use log::debug;

const ANONYMOUS: &str = "<none>:<none>";
const DIGEST_PREFIX: &str = "sha256:";

/// Turns the image reference recorded on a container into something that can
/// be pulled and compared.
///
/// Containers started from an image id, or whose tag was moved to another
/// image, report `sha256:…` or `<none>:<none>`. For those the local image is
/// inspected and its first real tag is used, falling back to its first repo
/// digest. Everything else passes through unchanged.
pub async fn resolve_reference<E: ContainerEngine>(
    engine: &E,
    reference: &str,
) -> Result<String, WatchduckerError> {
    if reference.is_empty() {
        return Err(resolution_error(reference, "image reference is empty"));
    }
    if !needs_resolution(reference) {
        return Ok(reference.to_string());
    }

    let inspect = engine
        .inspect_image(reference)
        .await
        .map_err(|e| resolution_error(reference, e.to_string()))?;

    if let Some(tag) = inspect
        .repo_tags
        .unwrap_or_default()
        .into_iter()
        .find(|tag| !tag.is_empty() && tag != ANONYMOUS)
    {
        debug!("resolved {reference} to tag {tag}");
        return Ok(tag);
    }
    if let Some(digest) = inspect.repo_digests.unwrap_or_default().into_iter().next() {
        debug!("resolved {reference} to digest {digest}");
        return Ok(digest);
    }
    Err(resolution_error(
        reference,
        "image has neither a tag nor a digest, pull or tag it again",
    ))
}

fn needs_resolution(reference: &str) -> bool {
    reference.starts_with(DIGEST_PREFIX) || reference == ANONYMOUS
}

fn resolution_error(reference: &str, reason: impl Into<String>) -> WatchduckerError {
    WatchduckerError::Resolution {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// Splits `repo:tag` or `repo@digest` into the repository and the tag or
/// digest. A missing tag means `latest`. A `:` before the last `/` belongs to
/// a registry port, not a tag.
pub fn split_reference(reference: &str) -> (&str, &str) {
    if let Some((name, digest)) = reference.split_once('@') {
        return (name, digest);
    }
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(pos) => {
            let split = name_start + pos;
            (&reference[..split], &reference[split + 1..])
        }
        None => (reference, "latest"),
    }
}
