use std::time::Duration;

use importer_openaddresses::UnknownLicensePolicy;

use crate::hierarchy::CaseRule;
use crate::partition::PartitionLayout;
use crate::store::StoreTarget;

/// Default upper bound of the random delay a worker waits before claiming a status line.
pub const DEFAULT_JITTER: Duration = Duration::from_millis(250);

/// Settings of an import run, passed to every phase.
#[derive(Clone, Debug)]
pub struct ImportConfig {
    pub target: StoreTarget,
    pub nb_threads: usize,
    pub layout: PartitionLayout,
    pub case_rule: CaseRule,
    pub license_policy: UnknownLicensePolicy,
    /// Register the OpenStreetMap license along with the ones of the archive.
    pub with_osm_license: bool,
    pub jitter: Duration,
    /// Refresh delay of the progress of the optimize phase.
    pub refresh_delay: Duration,
}

impl ImportConfig {
    pub fn new(target: StoreTarget) -> Self {
        Self {
            target,
            nb_threads: 1,
            layout: PartitionLayout::default(),
            case_rule: CaseRule::default(),
            license_policy: UnknownLicensePolicy::default(),
            with_osm_license: false,
            jitter: DEFAULT_JITTER,
            refresh_delay: Duration::from_secs(1),
        }
    }
}
