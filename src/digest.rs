use crate::client::{ClientError, DistributionInspector};
use crate::image_reference::{ImageReference, ParseError};
use crate::registry_auth::EncodedAuth;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to parse image name {image}: {source}")]
    InvalidReference {
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("the image name {0} already has a digest")]
    AlreadyQualified(String),

    #[error("failed to inspect image {image}: {source}")]
    Inspect {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("registry returned an invalid digest for {image}: {source}")]
    InvalidDigest {
        image: String,
        #[source]
        source: ParseError,
    },
}

/// Asks the registry which digest `image` currently points to and returns the image name
/// pinned to that digest, in familiar form (`nginx:1.25@sha256:...`).
///
/// `image` must not carry a digest already; such references are rejected before any
/// network call is made.
pub async fn resolve_digest<R>(
    registry: &R,
    image: &str,
    auth: Option<&EncodedAuth>,
) -> Result<String, ResolveError>
where
    R: DistributionInspector + ?Sized,
{
    let reference =
        ImageReference::parse(image).map_err(|source| ResolveError::InvalidReference {
            image: image.to_string(),
            source,
        })?;

    if reference.is_digest_qualified() {
        return Err(ResolveError::AlreadyQualified(image.to_string()));
    }

    let digest = registry
        .inspect_distribution(image, auth)
        .await
        .map_err(|source| ResolveError::Inspect {
            image: image.to_string(),
            source,
        })?;
    debug!("Registry reports digest {} for image {}", digest, image);

    let qualified = reference
        .with_digest(&digest)
        .map_err(|source| ResolveError::InvalidDigest {
            image: image.to_string(),
            source,
        })?;

    Ok(qualified.familiar_string())
}
