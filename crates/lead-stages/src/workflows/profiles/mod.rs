//! Lead enrichment from social network profile payloads.

pub mod enricher;
pub mod mapper;
pub mod router;
pub mod tables;

pub use enricher::{EnrichmentOutcome, ProfileEnricher};
pub use mapper::{social_handle, ProfileMapper};
pub use router::profiles_router;
pub use tables::{FieldKind, Network, NetworkTable};

use crate::workflows::stages::repository::RepositoryError;

/// Error raised while mapping or persisting a social profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("profile payload must be a JSON object")]
    NotAnObject,
    #[error("unknown social network '{0}'")]
    UnknownNetwork(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
