use anyhow::{Context as _, Result};
use manifest::{TrustManifest, Verdict};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::TrustCommand;
use crate::{paths, ui};

pub fn run(ctx: &Context, cmd: TrustCommand) -> Result<()> {
    let path = paths::trust_manifest()?;
    let mut manifest = TrustManifest::open(&path)
        .with_context(|| format!("Could not open {}", path.display()))?;

    match cmd {
        TrustCommand::Add { spec } => add(ctx, &mut manifest, &spec),
        TrustCommand::Rm { spec } => rm(&mut manifest, &spec),
        TrustCommand::List => {
            list(&manifest);
            Ok(())
        }
        TrustCommand::Verify { spec } => verify(&manifest, &spec),
    }
}

fn add(ctx: &Context, manifest: &mut TrustManifest, spec: &Path) -> Result<()> {
    let key = manifest::spec_key(spec)?;
    let content = fs::read(spec).with_context(|| format!("Could not read {}", spec.display()))?;
    let hash = manifest.trust(&key, &content).hash.clone();
    manifest.save()?;

    ui::success(&format!("Trusted {key}"));
    if !ctx.quiet {
        ui::kv("blake3", &hash);
    }
    Ok(())
}

fn rm(manifest: &mut TrustManifest, spec: &Path) -> Result<()> {
    // The file may be gone already; fall back to the path as given.
    let key = manifest::spec_key(spec).unwrap_or_else(|_| spec.display().to_string());
    if !manifest.revoke(&key) {
        ui::warn(&format!("{key} is not in the trust manifest"));
        return Ok(());
    }
    manifest.save()?;
    ui::success(&format!("Removed {key}"));
    Ok(())
}

fn list(manifest: &TrustManifest) {
    ui::header("Trusted specs");
    if manifest.is_empty() {
        ui::dim("none");
        return;
    }
    for (key, entry) in manifest.entries() {
        println!("  {key}");
        ui::dim(&format!(
            "{}  {}",
            &entry.hash[..entry.hash.len().min(16)],
            entry.trusted_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }
}

fn verify(manifest: &TrustManifest, spec: &Path) -> Result<()> {
    let key = manifest::spec_key(spec)?;
    let content = fs::read(spec).with_context(|| format!("Could not read {}", spec.display()))?;

    match manifest.verify(&key, &content) {
        Verdict::Trusted => {
            ui::success(&format!("{key} matches its trusted hash"));
            Ok(())
        }
        Verdict::Mismatch { expected, actual } => {
            ui::kv("expected", &expected);
            ui::kv("actual", &actual);
            anyhow::bail!("{key} changed since it was trusted")
        }
        Verdict::Unknown => anyhow::bail!("{key} is not in the trust manifest"),
    }
}
