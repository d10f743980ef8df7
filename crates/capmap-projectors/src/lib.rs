pub mod caches;
pub mod capability;
pub mod enterprise;
pub mod events;
pub mod projector;
pub mod router;

pub use caches::{FitScoreCacheProjector, ImportanceCacheProjector, RealizationCacheProjector};
pub use capability::CapabilityHierarchyProjector;
pub use enterprise::EnterpriseCapabilityProjector;
pub use projector::{decode, Projector};
pub use router::{ProjectionRouter, ReadModelStore};
