//! A fetched manifest, with its raw bytes preserved alongside the parsed view.
//!
//! Re-encoding a parsed manifest changes its digest, so every manifest that flows
//! through the engine carries the exact bytes it was fetched with; the parsed view
//! exists only to let the engine walk the graph and decide what to copy.

use oci_spec::image::{ImageIndex, ImageManifest};

use super::Digest;
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The media types a manifest GET/HEAD advertises support for, per the v2 registry protocol.
pub const MANIFEST_ACCEPT_MEDIA_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
];

const INDEX_MEDIA_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

/// The parsed view of a manifest: either a single-platform image manifest or a
/// multi-platform index referencing child manifests.
#[derive(Debug, Clone)]
pub enum ParsedManifest {
    /// A single-platform manifest naming a config blob and ordered layer blobs.
    Image(Box<ImageManifest>),
    /// A manifest list / image index naming child manifest descriptors.
    Index(Box<ImageIndex>),
}

/// A manifest as fetched from a registry: its canonical digest, media type, the exact
/// bytes returned by the server, and the parsed view derived from those bytes.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The canonical digest, taken from the server's `Docker-Content-Digest` header.
    pub digest: Digest,
    /// The `Content-Type` the server returned alongside the manifest body.
    pub media_type: String,
    /// The exact bytes returned by the server. Never re-serialized before a push.
    pub raw: Vec<u8>,
    /// The parsed view, used to walk the manifest graph.
    pub parsed: ParsedManifest,
}

impl Manifest {
    /// Parses raw manifest bytes using the server-declared media type to pick the
    /// right shape (single manifest vs. index/manifest list).
    pub fn parse(digest: Digest, media_type: String, raw: Vec<u8>) -> ReplicoreResult<Self> {
        let parsed = if INDEX_MEDIA_TYPES.contains(&media_type.as_str()) {
            let index: ImageIndex = serde_json::from_slice(&raw)?;
            ParsedManifest::Index(Box::new(index))
        } else if media_type.contains("manifest") || media_type.is_empty() {
            // Some registries omit a precise media type or use a generic one; try
            // manifest first since that's the overwhelmingly common case, then index.
            match serde_json::from_slice::<ImageManifest>(&raw) {
                Ok(manifest) => ParsedManifest::Image(Box::new(manifest)),
                Err(_) => {
                    let index: ImageIndex = serde_json::from_slice(&raw)?;
                    ParsedManifest::Index(Box::new(index))
                }
            }
        } else {
            return Err(ReplicoreError::UnexpectedStatus {
                status: 0,
                operation: format!("unrecognized manifest media type '{media_type}'"),
            });
        };

        Ok(Manifest {
            digest,
            media_type,
            raw,
            parsed,
        })
    }

    /// True if this manifest is a multi-platform index / manifest list.
    pub fn is_index(&self) -> bool {
        matches!(self.parsed, ParsedManifest::Index(_))
    }
}
