//! The blob-copy plan derived from walking one tag's manifest graph.

use std::collections::HashSet;

use oci_spec::image::ImageManifest;

use crate::model::{Descriptor, Manifest, ParsedManifest};
use crate::ReplicoreResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One planned unit of work: a manifest to walk, or a concrete blob to copy.
#[derive(Debug, Clone)]
pub struct TagPlan {
    /// The repository the tag belongs to.
    pub repo: String,
    /// The tag name driving this plan.
    pub tag: String,
    /// The top-level manifest (single-platform or index) fetched for this tag.
    pub manifest: Manifest,
    /// Every child manifest retained because it matched the architecture allow-list
    /// (empty unless `manifest` is an index).
    pub children: Vec<(Descriptor, Manifest)>,
    /// Every distinct blob descriptor (config + layers, across the manifest and its
    /// retained children) that must exist on the target before any manifest push.
    pub blobs: Vec<Descriptor>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Collects the config and layer descriptors of a single-platform manifest.
pub fn blobs_of_manifest(manifest: &ImageManifest) -> Vec<Descriptor> {
    let mut blobs = vec![manifest.config().clone()];
    blobs.extend(manifest.layers().iter().cloned());
    blobs
}

/// Builds a [`TagPlan`] for one `(repo, tag)`, given the already-fetched top-level
/// manifest and a fetcher for child manifests (by digest) when the top-level
/// manifest is an index. `allowed_architectures` filters index children; an empty
/// allow-list keeps every child.
pub async fn build_tag_plan<F, Fut>(
    repo: String,
    tag: String,
    manifest: Manifest,
    allowed_architectures: &[String],
    mut fetch_child: F,
) -> ReplicoreResult<TagPlan>
where
    F: FnMut(Descriptor) -> Fut,
    Fut: std::future::Future<Output = ReplicoreResult<Manifest>>,
{
    let mut children = Vec::new();
    let mut blob_set: Vec<Descriptor> = Vec::new();
    let mut seen_digests = HashSet::new();

    match &manifest.parsed {
        ParsedManifest::Image(image) => {
            for blob in blobs_of_manifest(image) {
                push_unique(&mut blob_set, &mut seen_digests, blob);
            }
        }
        ParsedManifest::Index(index) => {
            for descriptor in index.manifests() {
                if !architecture_allowed(descriptor.platform().as_ref(), allowed_architectures) {
                    continue;
                }
                let child_manifest = fetch_child(descriptor.clone()).await?;
                if let ParsedManifest::Image(image) = &child_manifest.parsed {
                    for blob in blobs_of_manifest(image) {
                        push_unique(&mut blob_set, &mut seen_digests, blob);
                    }
                }
                children.push((descriptor.clone(), child_manifest));
            }
        }
    }

    crate::Ok(TagPlan {
        repo,
        tag,
        manifest,
        children,
        blobs: blob_set,
    })
}

fn push_unique(blobs: &mut Vec<Descriptor>, seen: &mut HashSet<String>, blob: Descriptor) {
    if seen.insert(blob.digest().to_string()) {
        blobs.push(blob);
    }
}

fn architecture_allowed(platform: Option<&oci_spec::image::Platform>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match platform {
        Some(p) => allowed.iter().any(|a| a == &p.architecture().to_string().to_lowercase()),
        None => true,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_filter_empty_allows_all() {
        assert!(architecture_allowed(None, &[]));
    }
}
