//! Path scheme audit
//!
//! A node's path is either assigned by the data source or synthesized locally,
//! never both. Mixing the two is a configuration error, but it is reported as
//! a warning: rendering continues best-effort.

use crate::config::ConfigWarning;
use crate::types::Record;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where hierarchy paths come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathScheme {
    /// Paths are persisted by the data source
    #[default]
    External,
    /// Paths are synthesized locally from parent links and sibling order
    Synthesized,
}

/// Tracks path provenance across fetched batches.
#[derive(Debug, Default)]
pub struct PathSchemeAudit {
    scheme: PathScheme,
    external_seen: usize,
    missing_seen: usize,
    malformed_seen: usize,
    mixing_reported: bool,
    malformed_reported: bool,
}

impl PathSchemeAudit {
    pub fn new(scheme: PathScheme) -> Self {
        Self {
            scheme,
            ..Self::default()
        }
    }

    pub fn scheme(&self) -> PathScheme {
        self.scheme
    }

    /// Inspect a batch. Each kind of warning is returned (and logged) once.
    pub fn observe<'a, I>(&mut self, records: I) -> Vec<ConfigWarning>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        for record in records {
            match record.path.as_deref() {
                None => self.missing_seen += 1,
                Some(raw) => {
                    self.external_seen += 1;
                    if !record.position().is_known() {
                        self.malformed_seen += 1;
                        tracing::debug!(
                            node_id = %record.id,
                            path = %raw,
                            "Malformed hierarchy path, position unknown"
                        );
                    }
                }
            }
        }

        let mut warnings = Vec::new();
        if self.scheme == PathScheme::Synthesized && self.external_seen > 0 && !self.mixing_reported
        {
            self.mixing_reported = true;
            warn!(
                external_paths = self.external_seen,
                "Records carry source-assigned paths while local path synthesis is configured"
            );
            warnings.push(ConfigWarning::new(
                "hierarchy.path_scheme",
                format!(
                    "path_scheme is 'synthesized' but {} record(s) carry source-assigned paths; \
                     they are ignored and positions follow parent links",
                    self.external_seen
                ),
            ));
        }
        if self.scheme == PathScheme::External && self.malformed_seen > 0 && !self.malformed_reported
        {
            self.malformed_reported = true;
            warn!(
                malformed_paths = self.malformed_seen,
                "Records with malformed hierarchy paths are excluded from ancestry computations"
            );
            warnings.push(ConfigWarning::new(
                "hierarchy.path_scheme",
                format!(
                    "{} record(s) carry malformed paths and are treated as position unknown",
                    self.malformed_seen
                ),
            ));
        }
        warnings
    }

    /// Records seen without any path
    pub fn missing_paths(&self) -> usize {
        self.missing_seen
    }
}
