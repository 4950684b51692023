//! Version ids observed by an adapter.

use crate::save::{SaveReport, SaveStrategy};
use chunkdb_core::VersionId;
use std::collections::HashMap;

/// The version ids an adapter last saw in the backend.
///
/// Set only after a save commits or a load completes, and read before the
/// next save decides between an incremental save and a full overwrite. A
/// failed load clears it, so the next save overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedVersions {
    database: Option<VersionId>,
    collections: HashMap<String, VersionId>,
}

impl ObservedVersions {
    /// Returns the last observed database version id.
    #[must_use]
    pub fn database(&self) -> Option<&VersionId> {
        self.database.as_ref()
    }

    /// Returns the last observed version id of a collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&VersionId> {
        self.collections.get(name)
    }

    /// Returns true if nothing has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.database.is_none() && self.collections.is_empty()
    }

    pub(crate) fn loaded<I>(database: Option<VersionId>, collections: I) -> Self
    where
        I: IntoIterator<Item = (String, VersionId)>,
    {
        Self {
            database,
            collections: collections.into_iter().collect(),
        }
    }

    pub(crate) fn record_save(&mut self, report: &SaveReport) {
        self.database = Some(report.database_version.clone());
        if report.strategy == SaveStrategy::FullOverwrite {
            self.collections.clear();
        }
        self.collections.extend(report.collection_versions.iter().cloned());
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
