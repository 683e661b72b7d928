//! Reproducibility fingerprints for graph nodes
//!
//! A node's fingerprint covers the recipe file contents, its identity, the
//! settings axes the recipe declares, its effective options, the patch set
//! and (for local sources) the source tree, plus the fingerprints of its
//! link requirements. Through the last item every version and option in the
//! link closure is covered. Tool requirements are not part of it: they
//! influence how a package is built, not what it links against.

use crate::graph::{DependencyGraph, NodeId};
use kiln_errors::{Error, ResolveError};
use kiln_hash::{hash_directory, hash_files, Fingerprint, FingerprintBuilder, Hash};
use kiln_recipe::Recipe;
use kiln_types::{Options, PackageRef, Settings};
use std::collections::BTreeMap;

/// Every input that identifies one buildable artifact
#[derive(Debug, Clone)]
pub struct FingerprintInputs<'a> {
    pub recipe: &'a Recipe,
    pub settings: &'a Settings,
    pub options: &'a Options,
    pub patches: Hash,
    pub source_tree: Option<Hash>,
    /// Fingerprints of direct link requirements keyed by package name
    pub links: BTreeMap<String, Fingerprint>,
}

/// Combine the inputs of one node
#[must_use]
pub fn node_fingerprint(inputs: &FingerprintInputs<'_>) -> Fingerprint {
    let recipe = inputs.recipe;
    let mut builder = FingerprintBuilder::new()
        .digest("recipe", &recipe.digest)
        .field("name", recipe.name())
        .field("version", recipe.version().as_str())
        .field("kind", &recipe.kind().to_string())
        .map("settings", &recipe.relevant_settings(inputs.settings))
        .map("options", inputs.options)
        .digest("patches", &inputs.patches);

    if let Some(tree) = &inputs.source_tree {
        builder = builder.digest("source", tree);
    }

    let links: BTreeMap<String, String> = inputs
        .links
        .iter()
        .map(|(name, fp)| (name.clone(), fp.to_hex()))
        .collect();
    builder.map("requires", &links).finish()
}

/// Fingerprint every node of a resolved graph
///
/// `order` must list dependencies before dependents.
///
/// # Errors
///
/// Returns an error if a patch file or local source tree cannot be read.
pub async fn compute_fingerprints(
    graph: &DependencyGraph,
    order: &[NodeId],
) -> Result<BTreeMap<NodeId, Fingerprint>, Error> {
    // Patch and source digests depend only on the recipe version
    let mut recipe_digests: BTreeMap<PackageRef, (Hash, Option<Hash>)> = BTreeMap::new();
    let mut out: BTreeMap<NodeId, Fingerprint> = BTreeMap::new();

    for id in order {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let reference = node.recipe.reference.clone();
        let (patches, source_tree) = match recipe_digests.get(&reference) {
            Some(digests) => *digests,
            None => {
                let patches = hash_files(&node.recipe.patch_paths()).await?;
                let source_tree = match node.recipe.local_source_dir() {
                    Some(dir) => Some(hash_directory(&dir).await?),
                    None => None,
                };
                recipe_digests.insert(reference, (patches, source_tree));
                (patches, source_tree)
            }
        };

        let mut links = BTreeMap::new();
        for dep in &node.links {
            let fp = out.get(dep).copied().ok_or_else(|| {
                Error::from(ResolveError::InvalidRequirement {
                    reference: dep.to_string(),
                    reason: format!("fingerprinted after its dependent {id}"),
                })
            })?;
            links.insert(dep.name.clone(), fp);
        }

        let fingerprint = node_fingerprint(&FingerprintInputs {
            recipe: &node.recipe,
            settings: &node.settings,
            options: &node.options,
            patches,
            source_tree,
            links,
        });
        tracing::trace!(node = %id, fingerprint = %fingerprint.short(), "fingerprinted node");
        out.insert(id.clone(), fingerprint);
    }
    Ok(out)
}
