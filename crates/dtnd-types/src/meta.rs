use serde::{Deserialize, Serialize};

use crate::bundle::{Bundle, BundleFlags, BundleId};
use crate::endpoint::EndpointId;
use crate::time::DtnTime;

/// Metadata-only view of a bundle.
///
/// Carries everything routing and storage housekeeping need — identity,
/// destination, lifetime, flags — without the extension blocks. Producing
/// or copying a `MetaBundle` never touches payload bytes, which is what
/// makes selector queries and recovery scans cheap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaBundle {
    /// The bundle's identity.
    pub id: BundleId,
    /// Destination endpoint.
    pub destination: EndpointId,
    /// Lifetime in seconds.
    pub lifetime: u64,
    /// Primary-block flags.
    pub flags: BundleFlags,
}

impl MetaBundle {
    /// Build the metadata view of a bundle.
    pub fn of(bundle: &Bundle) -> Self {
        Self {
            id: bundle.id(),
            destination: bundle.destination.clone(),
            lifetime: bundle.lifetime,
            flags: bundle.flags,
        }
    }

    /// The logical time at which this bundle expires.
    pub fn expires_at(&self) -> DtnTime {
        self.id.timestamp.saturating_add(self.lifetime)
    }

    /// Returns `true` if the bundle is expired at the given logical time.
    pub fn is_expired(&self, now: DtnTime) -> bool {
        self.expires_at() <= now
    }
}
