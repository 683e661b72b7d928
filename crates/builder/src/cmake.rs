//! CMake integration for the generate phase and cmake steps
//!
//! The toolchain file carries the node's settings and the locations of its
//! upstream packages. Dependency config files expose each upstream's
//! declared `PackageInfo` as imported targets so `find_package(x CONFIG)`
//! works without the upstream shipping its own CMake files.

use crate::context::{path_string, BuildContext, UpstreamPackage};
use kiln_errors::Error;
use kiln_recipe::{CmakeBuild, CmakeInstall, CmakeToolchain};
use kiln_resolver::component_order;
use kiln_types::{Arch, ComponentRef, Os, PackageKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const TOOLCHAIN_FILE: &str = "kiln_toolchain.cmake";

/// What the generate phase produced for later cmake steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmakeSetup {
    pub toolchain_file: Option<PathBuf>,
    pub generator: Option<String>,
}

fn cmake_path(path: &Path) -> String {
    path_string(path).replace('\\', "/")
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quoted_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| quote(&cmake_path(path)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn system_name(os: &Os) -> &str {
    match os {
        Os::Linux => "Linux",
        Os::Macos => "Darwin",
        Os::Windows => "Windows",
        Os::FreeBsd => "FreeBSD",
        Os::Android => "Android",
        Os::Ios => "iOS",
        Os::Other(name) => name,
    }
}

fn system_processor(arch: &Arch) -> &str {
    match arch.as_str() {
        "armv8" => "aarch64",
        other => other,
    }
}

/// Render the toolchain file for `ctx`
#[must_use]
pub fn render_toolchain(ctx: &BuildContext, toolchain: &CmakeToolchain) -> String {
    let settings = &ctx.settings;
    let mut out = String::new();
    let _ = writeln!(out, "# kiln toolchain for {}", ctx.package);
    let _ = writeln!(out, "include_guard()");
    let _ = writeln!(out);

    if !settings.can_run() {
        let _ = writeln!(out, "set(CMAKE_SYSTEM_NAME {})", system_name(&settings.os));
        let _ = writeln!(
            out,
            "set(CMAKE_SYSTEM_PROCESSOR {})",
            system_processor(&settings.arch)
        );
    }

    let _ = writeln!(
        out,
        "set(CMAKE_BUILD_TYPE {} CACHE STRING \"\" FORCE)",
        quote(settings.build_type.as_str())
    );
    let _ = writeln!(out, "set(CMAKE_CXX_STANDARD {})", settings.compiler.cppstd);
    let _ = writeln!(out, "set(CMAKE_CXX_STANDARD_REQUIRED ON)");
    let shared = if ctx.recipe.kind() == PackageKind::SharedLibrary {
        "ON"
    } else {
        "OFF"
    };
    let _ = writeln!(out, "set(BUILD_SHARED_LIBS {shared} CACHE BOOL \"\" FORCE)");
    let _ = writeln!(out, "set(CMAKE_POSITION_INDEPENDENT_CODE ON)");
    let _ = writeln!(out, "set(CMAKE_FIND_PACKAGE_PREFER_CONFIG ON)");

    let mut prefixes = vec![ctx.dirs.generators.clone()];
    let mut modules = vec![ctx.dirs.generators.clone()];
    for upstream in &ctx.upstream {
        prefixes.push(upstream.package_folder.clone());
        modules.extend(upstream.info.builddirs.iter().cloned());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "list(PREPEND CMAKE_PREFIX_PATH {})", quoted_paths(&prefixes));
    let _ = writeln!(out, "list(PREPEND CMAKE_MODULE_PATH {})", quoted_paths(&modules));
    let programs = ctx.tool_bindirs();
    if !programs.is_empty() {
        let _ = writeln!(out, "list(PREPEND CMAKE_PROGRAM_PATH {})", quoted_paths(&programs));
    }

    if !toolchain.cache_variables.is_empty() {
        let variables = ctx.variables();
        let _ = writeln!(out);
        for (name, value) in &toolchain.cache_variables {
            let _ = writeln!(
                out,
                "set({name} {} CACHE STRING \"\" FORCE)",
                quote(&variables.expand(value))
            );
        }
    }
    out
}

fn target_name(package: &str, component: &str) -> String {
    format!("{package}::{component}")
}

fn link_target(package: &str, reference: &str) -> String {
    match ComponentRef::parse(reference) {
        ComponentRef::Local(component) => target_name(package, &component),
        ComponentRef::External { package, component } => target_name(&package, &component),
    }
}

fn write_interface_target(
    out: &mut String,
    target: &str,
    includedirs: &[PathBuf],
    libdirs: &[PathBuf],
    libs: &[String],
    defines: &[String],
    links: &[String],
) {
    let _ = writeln!(out, "add_library({target} INTERFACE IMPORTED)");
    if !includedirs.is_empty() {
        let _ = writeln!(
            out,
            "set_property(TARGET {target} PROPERTY INTERFACE_INCLUDE_DIRECTORIES {})",
            quoted_paths(includedirs)
        );
    }
    if !libdirs.is_empty() {
        let _ = writeln!(
            out,
            "set_property(TARGET {target} PROPERTY INTERFACE_LINK_DIRECTORIES {})",
            quoted_paths(libdirs)
        );
    }
    if !defines.is_empty() {
        let _ = writeln!(
            out,
            "set_property(TARGET {target} PROPERTY INTERFACE_COMPILE_DEFINITIONS {})",
            defines.join(" ")
        );
    }
    let mut link_items: Vec<String> = libs.to_vec();
    link_items.extend(links.iter().cloned());
    if !link_items.is_empty() {
        let _ = writeln!(
            out,
            "set_property(TARGET {target} PROPERTY INTERFACE_LINK_LIBRARIES {})",
            link_items.join(" ")
        );
    }
}

/// Render the config file exposing `upstream` as imported targets
///
/// `file_names` maps package names to the config file name their
/// consumers pass to `find_package`.
#[must_use]
pub fn render_deps_config(upstream: &UpstreamPackage, file_names: &BTreeMap<String, String>) -> String {
    let name = upstream.package.name.as_str();
    let info = &upstream.info;
    let umbrella = info
        .properties
        .get("cmake_target_name")
        .cloned()
        .unwrap_or_else(|| target_name(name, name));

    let mut out = String::new();
    let _ = writeln!(out, "# kiln dependency config for {}", upstream.package);
    let _ = writeln!(out, "if(TARGET {umbrella})");
    let _ = writeln!(out, "  return()");
    let _ = writeln!(out, "endif()");

    let external: BTreeSet<&str> = info
        .components
        .values()
        .flat_map(|component| &component.requires)
        .filter_map(|reference| match ComponentRef::parse(reference) {
            ComponentRef::External { package, .. } if package != name => {
                file_names.get(&package).map(String::as_str)
            }
            _ => None,
        })
        .collect();
    if !external.is_empty() {
        let _ = writeln!(out, "include(CMakeFindDependencyMacro)");
        for file_name in external {
            let _ = writeln!(out, "find_dependency({file_name} CONFIG)");
        }
    }
    let _ = writeln!(out);

    if info.components.is_empty() {
        write_interface_target(
            &mut out,
            &umbrella,
            &info.includedirs,
            &info.libdirs,
            &info.libs,
            &info.defines,
            &[],
        );
        return out;
    }

    let mut component_targets = Vec::new();
    for component_name in component_order(info) {
        let Some(component) = info.components.get(&component_name) else {
            continue;
        };
        let target = target_name(name, &component_name);
        let links: Vec<String> = component
            .requires
            .iter()
            .map(|reference| link_target(name, reference))
            .collect();
        let includedirs = if component.includedirs.is_empty() {
            &info.includedirs
        } else {
            &component.includedirs
        };
        let libdirs = if component.libdirs.is_empty() {
            &info.libdirs
        } else {
            &component.libdirs
        };
        write_interface_target(
            &mut out,
            &target,
            includedirs,
            libdirs,
            &component.libs,
            &component.defines,
            &links,
        );
        if target != umbrella {
            component_targets.push(target);
        }
    }

    if !info.components.contains_key(name) || umbrella != target_name(name, name) {
        let _ = writeln!(out);
        write_interface_target(
            &mut out,
            &umbrella,
            &info.includedirs,
            &info.libdirs,
            &info.libs,
            &info.defines,
            &component_targets,
        );
    }
    out
}

/// Render the version file accepting any request not newer than `version`
#[must_use]
pub fn render_deps_version(version: &str) -> String {
    format!(
        "set(PACKAGE_VERSION {version})\n\
         if(PACKAGE_FIND_VERSION AND PACKAGE_FIND_VERSION VERSION_GREATER PACKAGE_VERSION)\n\
         \x20 set(PACKAGE_VERSION_COMPATIBLE FALSE)\n\
         else()\n\
         \x20 set(PACKAGE_VERSION_COMPATIBLE TRUE)\n\
         \x20 if(PACKAGE_FIND_VERSION STREQUAL PACKAGE_VERSION)\n\
         \x20   set(PACKAGE_VERSION_EXACT TRUE)\n\
         \x20 endif()\n\
         endif()\n",
        version = quote(version)
    )
}

/// Write the toolchain file into the generators folder
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn write_toolchain(ctx: &BuildContext, toolchain: &CmakeToolchain) -> Result<CmakeSetup, Error> {
    let path = ctx.dirs.generators.join(TOOLCHAIN_FILE);
    let content = render_toolchain(ctx, toolchain);
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;
    Ok(CmakeSetup {
        toolchain_file: Some(path),
        generator: toolchain.generator.clone(),
    })
}

/// Write config and version files for every upstream package
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub async fn write_deps(ctx: &BuildContext) -> Result<Vec<PathBuf>, Error> {
    let file_names: BTreeMap<String, String> = ctx
        .upstream
        .iter()
        .map(|upstream| (upstream.package.name.clone(), upstream.file_name().to_string()))
        .collect();

    let mut written = Vec::new();
    for upstream in &ctx.upstream {
        let base = upstream.file_name().to_ascii_lowercase();
        let config = ctx.dirs.generators.join(format!("{base}-config.cmake"));
        let version = ctx.dirs.generators.join(format!("{base}-config-version.cmake"));

        tokio::fs::write(&config, render_deps_config(upstream, &file_names))
            .await
            .map_err(|e| Error::io_with_path(&e, &config))?;
        tokio::fs::write(&version, render_deps_version(&upstream.package.version.to_string()))
            .await
            .map_err(|e| Error::io_with_path(&e, &version))?;
        written.push(config);
    }
    Ok(written)
}

/// Arguments for `cmake` configuring the node's build folder
#[must_use]
pub fn configure_args(ctx: &BuildContext, setup: &CmakeSetup, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-S".to_string(),
        path_string(&ctx.dirs.source),
        "-B".to_string(),
        path_string(&ctx.dirs.build),
    ];
    if let Some(generator) = &setup.generator {
        args.push("-G".to_string());
        args.push(generator.clone());
    }
    if let Some(toolchain) = &setup.toolchain_file {
        args.push(format!("-DCMAKE_TOOLCHAIN_FILE={}", cmake_path(toolchain)));
    }
    if !extra.iter().any(|arg| arg.starts_with("-DCMAKE_INSTALL_PREFIX=")) {
        args.push(format!(
            "-DCMAKE_INSTALL_PREFIX={}",
            cmake_path(&ctx.dirs.package)
        ));
    }
    if !extra.iter().any(|arg| arg.starts_with("-DCMAKE_BUILD_TYPE=")) {
        args.push(format!("-DCMAKE_BUILD_TYPE={}", ctx.settings.build_type));
    }
    args.extend(ctx.variables().expand_all(extra));
    args
}

/// Arguments for `cmake --build`
#[must_use]
pub fn build_args(ctx: &BuildContext, build: &CmakeBuild) -> Vec<String> {
    let mut args = vec![
        "--build".to_string(),
        path_string(&ctx.dirs.build),
        "--config".to_string(),
        ctx.settings.build_type.to_string(),
        "--parallel".to_string(),
        ctx.jobs.to_string(),
    ];
    if let Some(target) = &build.target {
        args.push("--target".to_string());
        args.push(ctx.variables().expand(target));
    }
    args.extend(ctx.variables().expand_all(&build.args));
    args
}

/// Arguments for `cmake --install`
#[must_use]
pub fn install_args(ctx: &BuildContext, install: &CmakeInstall) -> Vec<String> {
    let prefix = install
        .prefix
        .as_deref()
        .map_or_else(|| ctx.dirs.package.clone(), |prefix| {
            ctx.resolve_path(&ctx.dirs.build, prefix)
        });
    vec![
        "--install".to_string(),
        path_string(&ctx.dirs.build),
        "--config".to_string(),
        ctx.settings.build_type.to_string(),
        "--prefix".to_string(),
        path_string(&prefix),
    ]
}
