//! Checks on the component graph nested inside each package
//!
//! Components form their own dependency graph: a component may require a
//! sibling (`name`) or a component of one of the package's direct link
//! requirements (`package::component`). Sibling requirements must be
//! acyclic and every reference must name something that exists.

use crate::graph::{DependencyGraph, ResolvedNode};
use kiln_errors::{Error, ResolveError};
use kiln_types::{ComponentRef, PackageInfo};
use std::collections::{BTreeMap, BTreeSet};

/// Validate the components of every node whose `package_info` branch
/// matches its target OS
///
/// Nodes without a matching branch are left to fail in their
/// `package_info` phase with an unsupported platform error.
///
/// # Errors
///
/// Returns `ResolveError::UnknownComponent` or
/// `ResolveError::ComponentCycle`.
pub fn check_components(graph: &DependencyGraph) -> Result<(), Error> {
    for node in graph.nodes.values() {
        let Some(info) = node.recipe.definition.package_info.select(&node.settings.os) else {
            continue;
        };
        check_references(graph, node, info)?;
        if let Some(path) = find_component_cycle(info) {
            return Err(ResolveError::ComponentCycle {
                package: node.id.name.clone(),
                path,
            }
            .into());
        }
    }
    Ok(())
}

fn check_references(graph: &DependencyGraph, node: &ResolvedNode, info: &PackageInfo) -> Result<(), Error> {
    let unknown = |component: &str, target: &str| -> Error {
        ResolveError::UnknownComponent {
            package: node.id.name.clone(),
            component: component.to_string(),
            target: target.to_string(),
        }
        .into()
    };

    for (name, component) in &info.components {
        for raw in &component.requires {
            match ComponentRef::parse(raw) {
                ComponentRef::Local(sibling) => {
                    if !info.components.contains_key(&sibling) {
                        return Err(unknown(name, raw));
                    }
                }
                ComponentRef::External { package, component: target } => {
                    let Some(dep) = node
                        .links
                        .iter()
                        .find(|dep| dep.name == package)
                        .and_then(|dep| graph.node(dep))
                    else {
                        return Err(unknown(name, raw));
                    };
                    let Some(dep_info) = dep.recipe.definition.package_info.select(&dep.settings.os) else {
                        continue;
                    };
                    // A package without components is addressed as `pkg::pkg`
                    let exists = if dep_info.components.is_empty() {
                        target == package
                    } else {
                        dep_info.components.contains_key(&target)
                    };
                    if !exists {
                        return Err(unknown(name, raw));
                    }
                }
            }
        }
    }
    Ok(())
}

/// First cycle among sibling requirements, as component names
#[must_use]
pub fn find_component_cycle(info: &PackageInfo) -> Option<Vec<String>> {
    fn visit<'a>(
        info: &'a PackageInfo,
        name: &'a str,
        active: &mut Vec<&'a str>,
        done: &mut BTreeMap<&'a str, ()>,
    ) -> Option<Vec<String>> {
        if let Some(start) = active.iter().position(|n| *n == name) {
            let mut path: Vec<String> = active[start..].iter().map(ToString::to_string).collect();
            path.push(name.to_string());
            return Some(path);
        }
        if done.contains_key(name) {
            return None;
        }
        let component = info.components.get(name)?;

        active.push(name);
        for raw in &component.requires {
            // Externals cannot close a cycle inside this package
            if raw.contains("::") {
                continue;
            }
            if let Some(cycle) = visit(info, raw, active, done) {
                return Some(cycle);
            }
        }
        active.pop();
        done.insert(name, ());
        None
    }

    let mut done = BTreeMap::new();
    for name in info.components.keys() {
        let mut active = Vec::new();
        if let Some(cycle) = visit(info, name, &mut active, &mut done) {
            return Some(cycle);
        }
    }
    None
}

/// Component names ordered so that every component follows its siblings
#[must_use]
pub fn component_order(info: &PackageInfo) -> Vec<String> {
    fn visit(info: &PackageInfo, name: &str, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
        let Some(component) = info.components.get(name) else {
            return;
        };
        if !seen.insert(name.to_string()) {
            return;
        }
        for raw in &component.requires {
            if let ComponentRef::Local(sibling) = ComponentRef::parse(raw) {
                visit(info, &sibling, seen, out);
            }
        }
        out.push(name.to_string());
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for name in info.components.keys() {
        visit(info, name, &mut seen, &mut out);
    }
    out
}
