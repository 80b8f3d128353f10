use anyhow::{Context as _, Result};
use executor::{Command, Executor, Progress, RunSummary, Step, TrustGate};
use manifest::TrustManifest;
use std::path::Path;

use crate::Context;
use crate::cli::RunArgs;
use crate::commands::report;
use crate::registry::CliRegistry;
use crate::{config, paths, ui};

/// Most target IPs shown per command line.
const SHOWN_TARGETS: usize = 4;

/// Terminal progress for a run.
struct CliProgress {
    quiet: bool,
    verbose: bool,
}

impl Progress for CliProgress {
    fn on_step_start(&mut self, index: usize, total: usize, step: &Step) {
        if !self.quiet {
            ui::step(index + 1, total, &step.name);
        }
    }

    fn on_command(&mut self, command: &Command, ips: &[&str]) {
        if !self.quiet {
            ui::dim(&format!(
                "{} on {}",
                command.kind,
                ui::targets(ips, SHOWN_TARGETS)
            ));
        }
    }

    fn on_command_skipped(&mut self, command: &Command) {
        if self.verbose {
            ui::dim(&format!("{} skipped, no node matched", command.kind));
        }
    }
}

pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    let result = paths::trust_manifest().and_then(|path| execute(ctx, &args, &path));
    if let Err(err) = &result {
        report(err);
    }
    result.map(|_| ())
}

fn execute(ctx: &Context, args: &RunArgs, manifest_path: &Path) -> Result<RunSummary> {
    let params = config::load_params(&args.params)?;
    let adhoc = args
        .value
        .as_deref()
        .map(config::parse_value)
        .transpose()?;

    let client = CliRegistry::from_params(&params);
    let executor = Executor::new(params, adhoc)?
        .with_client(Box::new(client))
        .dry_run(args.dry_run);

    let cancel = executor.cancel_token().clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, stopping after the current command");
        cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let manifest = TrustManifest::open(manifest_path)
        .with_context(|| format!("Could not open {}", manifest_path.display()))?;
    let trust = TrustGate::with_manifest(manifest, args.strict);

    if !ctx.quiet {
        let mode = if args.dry_run { " (dry run)" } else { "" };
        ui::header(&format!("Running {}{mode}", args.spec.display()));
        ui::kv("nodes", &executor.registry().len().to_string());
    }

    let mut progress = CliProgress {
        quiet: ctx.quiet,
        verbose: ctx.verbose > 0,
    };
    let summary = executor.run_spec_file(&args.spec, &trust, &mut progress)?;

    if !ctx.quiet {
        print_summary(&summary);
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!();
    let msg = format!(
        "{} steps, {} commands run, {} skipped",
        summary.steps, summary.commands_run, summary.commands_skipped
    );
    if summary.dry_run {
        ui::info(&format!("Dry run complete: {msg}"));
    } else {
        ui::success(&msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_params(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("params.yaml");
        fs::write(&path, "providerIP: 10.0.0.1\nnodes: []\n").unwrap();
        path
    }

    #[test]
    fn test_dry_run_local_spec() {
        let tmp = TempDir::new().unwrap();
        let params = write_params(tmp.path());
        let spec = tmp.path().join("spec.yaml");
        fs::write(
            &spec,
            "spec:\n  steps:\n    - name: hello\n      nodes:\n        allOf: [day-0]\n      commands:\n        - type: shell\n          cmd: [echo, \"{{ providerIP }}\"]\n",
        )
        .unwrap();

        let args = RunArgs {
            spec,
            params,
            value: None,
            dry_run: true,
            strict: false,
        };
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };
        let manifest = tmp.path().join("trusted-specs.toml");
        let summary = execute(&ctx, &args, &manifest).unwrap();
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.commands_run, 1);
        assert!(summary.dry_run);
    }
}
