//! Attachment lifecycle and owner binding.
//!
//! This module implements the two-phase attachment protocol:
//! - Uploads are registered as TEMP rows with an expiry
//! - A batch of TEMP rows is bound to its owner in one conditional write
//! - Owner creation and binding run as a compensating saga
//! - A background sweeper reclaims uploads that were never bound
//!
//! Persistence and blob deletion sit behind the [`AttachmentStore`] and
//! [`BlobGateway`](crate::storage::BlobGateway) traits; this module has no
//! database dependency.

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod saga;
pub mod store;
pub mod sweeper;
pub mod types;

#[cfg(test)]
mod lifecycle_props;
#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock};
pub use error::{AttachmentError, StoreError};
pub use lifecycle::{AttachmentLifecycle, LifecycleConfig, ReleaseReport};
pub use saga::{
    AttachmentReplacement, CreatedEntity, EntityCreationSaga, EntityError, EntityRepository,
    SagaError,
};
pub use store::AttachmentStore;
pub use sweeper::{ExpirationSweeper, SweepOutcome, SweeperHandle};
pub use types::{Attachment, AttachmentStatus, EntityType, RegisterTempInput};
