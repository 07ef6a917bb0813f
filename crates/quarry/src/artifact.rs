//! # Artifact Identities and Locations
//!
//! This module defines the two keys every resolution request is made of:
//! what is wanted (an [`ArtifactIdentity`]) and where it might live
//! (a [`Location`]).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;

/// Identifies a logical artifact independently of where it is hosted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactIdentity {
    /// Organisation / group of the artifact
    pub group: String,
    /// Module name
    pub module: String,
    /// Revision / version string
    pub version: String,
    /// Optional classifier (e.g. "sources")
    pub classifier: Option<String>,
}

impl ArtifactIdentity {
    /// Create a new identity without a classifier
    pub fn new(
        group: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            module: module.into(),
            version: version.into(),
            classifier: None,
        }
    }

    /// Set a classifier for this identity
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Stable string key used by the cache store index
    pub fn key(&self) -> String {
        match &self.classifier {
            Some(classifier) => {
                format!("{}:{}:{}:{}", self.group, self.module, self.version, classifier)
            }
            None => format!("{}:{}:{}", self.group, self.module, self.version),
        }
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A resolvable address at which an artifact or one of its side-files may live.
///
/// Locations are kept as opaque strings so HTTP URLs and filesystem paths can
/// flow through the same resolver machinery; transports interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse this location as a URL, for HTTP transports
    pub fn as_url(&self) -> Result<Url, TransportError> {
        self.0
            .parse::<Url>()
            .map_err(|_| TransportError::UrlError(self.0.clone()))
    }

    /// Interpret this location as a filesystem path, for file transports
    pub fn as_path(&self) -> PathBuf {
        // Accept both plain paths and file:// URLs
        if let Some(rest) = self.0.strip_prefix("file://") {
            PathBuf::from(rest)
        } else {
            PathBuf::from(&self.0)
        }
    }

    /// The location of the SHA-1 checksum side-file for this location
    pub fn checksum_location(&self) -> Location {
        Location(format!("{}.sha1", self.0))
    }

    /// Final path segment, used for store layout and progress descriptions
    pub fn file_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Location(path.to_string_lossy().into_owned())
    }
}
