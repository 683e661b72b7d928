//! Execution of declarative recipe steps
//!
//! Commands run in the build folder. Relative paths in file operations
//! resolve against the package folder during the package phase and against
//! the build folder otherwise; `copy.from` always starts at the build folder.

use crate::cmake::{self, CmakeSetup};
use crate::context::BuildContext;
use crate::packaging;
use crate::process::{shell_invocation, split_command};
use kiln_errors::{BuildError, Error};
use kiln_events::EventEmitter;
use kiln_recipe::Step;
use kiln_types::Phase;
use std::path::PathBuf;

/// Short description of a step for logs
#[must_use]
pub fn describe(step: &Step) -> String {
    match step {
        Step::Command { command } => command.clone(),
        Step::Shell { shell } => format!("sh: {shell}"),
        Step::CmakeConfigure { .. } => "cmake configure".to_string(),
        Step::CmakeBuild { cmake_build } => match &cmake_build.target {
            Some(target) => format!("cmake build --target {target}"),
            None => "cmake build".to_string(),
        },
        Step::CmakeInstall { .. } => "cmake install".to_string(),
        Step::Copy { copy } => format!("copy {} from {} to {}", copy.pattern, copy.from, copy.to),
        Step::Replace { replace } => format!("replace in {}", replace.file),
        Step::Rename { rename } => format!("rename {} to {}", rename.from, rename.to),
        Step::Mkdir { mkdir } => format!("mkdir {mkdir}"),
        Step::Remove { remove } => format!("remove {remove}"),
    }
}

fn file_base(ctx: &BuildContext, phase: Phase) -> PathBuf {
    if phase == Phase::Package {
        ctx.dirs.package.clone()
    } else {
        ctx.dirs.build.clone()
    }
}

/// File operation failures belong to the phase that ran them
fn phase_error(ctx: &BuildContext, phase: Phase, err: Error) -> Error {
    match (phase, err) {
        (_, Error::Build(err)) => Error::Build(err),
        (_, Error::Cancelled) => Error::Cancelled,
        (Phase::Package, other) => BuildError::Packaging {
            package: ctx.package.to_string(),
            message: other.to_string(),
        }
        .into(),
        (phase, other) => BuildError::Failed {
            package: ctx.package.to_string(),
            phase: phase.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

/// Run every step in order, stopping at the first failure
///
/// # Errors
///
/// Returns the first step's error; command failures keep their exit code
/// and stderr tail.
pub async fn run_steps(ctx: &BuildContext, phase: Phase, steps: &[Step], cmake: &CmakeSetup) -> Result<(), Error> {
    for step in steps {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        ctx.emit_debug(format!("{} {phase}: {}", ctx.package, describe(step)));
        run_step(ctx, phase, step, cmake)
            .await
            .map_err(|e| phase_error(ctx, phase, e))?;
    }
    Ok(())
}

async fn run_step(ctx: &BuildContext, phase: Phase, step: &Step, cmake_setup: &CmakeSetup) -> Result<(), Error> {
    let variables = ctx.variables();
    let build_dir = ctx.dirs.build.clone();

    match step {
        Step::Command { command } => {
            let expanded = variables.expand(command);
            let Some((program, args)) = split_command(&expanded) else {
                return Ok(());
            };
            ctx.run(phase, &program, &args, &build_dir).await?;
        }
        Step::Shell { shell } => {
            let (program, args) = shell_invocation(&variables.expand(shell));
            ctx.run(phase, &program, &args, &build_dir).await?;
        }
        Step::CmakeConfigure { cmake_configure } => {
            let args = cmake::configure_args(ctx, cmake_setup, cmake_configure);
            ctx.run(phase, "cmake", &args, &build_dir).await?;
        }
        Step::CmakeBuild { cmake_build } => {
            let args = cmake::build_args(ctx, cmake_build);
            ctx.run(phase, "cmake", &args, &build_dir).await?;
        }
        Step::CmakeInstall { cmake_install } => {
            let args = cmake::install_args(ctx, cmake_install);
            ctx.run(phase, "cmake", &args, &build_dir).await?;
        }
        Step::Copy { copy } => {
            let from = ctx.resolve_path(&ctx.dirs.build, &copy.from);
            let to = ctx.resolve_path(&ctx.dirs.package, &copy.to);
            let pattern = variables.expand(&copy.pattern);
            let copied = packaging::copy_matching(&ctx.package, &from, &pattern, &to, copy.flatten).await?;
            if copied == 0 {
                ctx.emit_warning_with_context(
                    format!("{}: '{pattern}' matched no files", ctx.package),
                    from.display().to_string(),
                );
            }
        }
        Step::Replace { replace } => {
            let base = file_base(ctx, phase);
            let file = ctx.resolve_path(&base, &replace.file);
            let output = replace
                .output
                .as_deref()
                .map(|output| ctx.resolve_path(&base, output));
            packaging::replace_in_file(
                &ctx.package,
                &file,
                &replace.search,
                &variables.expand(&replace.replacement),
                output.as_deref(),
            )
            .await?;
        }
        Step::Rename { rename } => {
            let base = file_base(ctx, phase);
            let from = ctx.resolve_path(&base, &rename.from);
            let to = ctx.resolve_path(&base, &rename.to);
            if let Some(parent) = to.parent() {
                kiln_fs::create_dir_all(parent).await?;
            }
            kiln_fs::rename(&from, &to).await?;
        }
        Step::Mkdir { mkdir } => {
            let dir = ctx.resolve_path(&file_base(ctx, phase), mkdir);
            kiln_fs::create_dir_all(&dir).await?;
        }
        Step::Remove { remove } => {
            let path = ctx.resolve_path(&file_base(ctx, phase), remove);
            packaging::remove_path(&path).await?;
        }
    }
    Ok(())
}
