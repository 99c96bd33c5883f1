use std::sync::{Arc, Mutex, Weak};

use crate::cluster::DataUsagePreferences;
use crate::error::{ContainerError, Result};
use crate::metadata::MetadataStore;
use crate::payload::PayloadStore;

/// Everything a [`Container`](crate::container::Container) owns: the
/// metadata connection, the payload store, and the in-memory write
/// preferences (§5).
pub(crate) struct ContainerInner {
    pub(crate) metadata: MetadataStore,
    pub(crate) payload: Mutex<PayloadStore>,
    pub(crate) preferences: Mutex<DataUsagePreferences>,
}

/// A weak handle Elements carry to reach their owning container without
/// extending its lifetime (§5, §9). Cloning a `Resources` is cheap — it's
/// just a `Weak` clone — and every clone observes the same container.
#[derive(Clone)]
pub(crate) struct Resources(Weak<ContainerInner>);

impl Resources {
    pub(crate) fn new(inner: &Arc<ContainerInner>) -> Self {
        Self(Arc::downgrade(inner))
    }

    /// Upgrades to a strong reference, failing with [`ContainerError::OwnerIsMissing`]
    /// once the owning container has been dropped.
    pub(crate) fn upgrade(&self) -> Result<Arc<ContainerInner>> {
        self.0.upgrade().ok_or(ContainerError::OwnerIsMissing)
    }
}
