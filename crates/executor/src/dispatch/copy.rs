//! `copyFromDay0` / `copyToDay0`: stream a tar archive between nodes.
//!
//! The sending node runs `tar -c` with stdout wired into an in-memory pipe;
//! the receiving node runs `tar -x` with stdin wired to the other end.
//! Nothing touches local disk in between.
//!
//! From day-0, one archive is produced and every chunk is handed to each
//! destination in turn. To day-0, every source gets its own pipe and its
//! own `tar -x` so archives never interleave.

use super::{Dispatcher, FirstError, Target, log_dry_run, run_on_node};
use crate::error::{Error, Result};
use crate::pipe::{TeeWriter, pipe};
use crate::selector::NodeSet;
use crate::spec::CommandKind;
use crate::transport::AttachIo;
use std::path::Path;
use std::thread;

pub(super) fn from_day0(
    dispatcher: &Dispatcher<'_>,
    cmd: &[String],
    nodes: &NodeSet<'_>,
) -> Result<()> {
    let (src, dst_dir) = copy_args(cmd, Error::CopyFromDay0)?;
    let day0 = dispatcher.registry.day0();

    let src = dispatcher.render(src, day0)?;
    let source_cmd = tar_create(&src, Error::CopyFromDay0)?;
    let sinks = nodes
        .iter()
        .map(|node| {
            Ok(Target {
                node,
                cmd: tar_extract(&dispatcher.render(dst_dir, node)?),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if dispatcher.dry_run {
        log_dry_run(CommandKind::CopyFromDay0, &day0.ip, &source_cmd);
        for sink in &sinks {
            log_dry_run(CommandKind::CopyFromDay0, &sink.node.ip, &sink.cmd);
        }
        return Ok(());
    }

    let cancel = dispatcher.cancel;
    let errors = FirstError::default();
    let (writers, readers): (Vec<_>, Vec<_>) = sinks.iter().map(|_| pipe()).unzip();

    thread::scope(|s| {
        let errors = &errors;
        let source_cmd = &source_cmd;
        s.spawn(move || {
            let out = TeeWriter::new(writers);
            if let Err(e) = run_on_node(day0, cancel, source_cmd, AttachIo::writing(out), false) {
                errors.record(&day0.ip, e);
            }
        });
        for (sink, reader) in sinks.iter().zip(readers) {
            s.spawn(move || {
                if let Err(e) =
                    run_on_node(sink.node, cancel, &sink.cmd, AttachIo::reading(reader), false)
                {
                    errors.record(&sink.node.ip, e);
                }
            });
        }
    });

    errors.into_result()
}

pub(super) fn to_day0(
    dispatcher: &Dispatcher<'_>,
    cmd: &[String],
    nodes: &NodeSet<'_>,
) -> Result<()> {
    let (src, dst_dir) = copy_args(cmd, Error::CopyToDay0)?;
    let day0 = dispatcher.registry.day0();

    let extract_cmd = tar_extract(&dispatcher.render(dst_dir, day0)?);
    let sources = nodes
        .iter()
        .map(|node| {
            let src = dispatcher.render(src, node)?;
            Ok(Target {
                node,
                cmd: tar_create(&src, Error::CopyToDay0)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if dispatcher.dry_run {
        for source in &sources {
            log_dry_run(CommandKind::CopyToDay0, &source.node.ip, &source.cmd);
            log_dry_run(CommandKind::CopyToDay0, &day0.ip, &extract_cmd);
        }
        return Ok(());
    }

    let cancel = dispatcher.cancel;
    let errors = FirstError::default();

    thread::scope(|s| {
        let errors = &errors;
        let extract_cmd = &extract_cmd;
        for source in &sources {
            let (writer, reader) = pipe();
            s.spawn(move || {
                if let Err(e) = run_on_node(
                    source.node,
                    cancel,
                    &source.cmd,
                    AttachIo::writing(writer),
                    false,
                ) {
                    errors.record(&source.node.ip, e);
                }
            });
            s.spawn(move || {
                if let Err(e) =
                    run_on_node(day0, cancel, extract_cmd, AttachIo::reading(reader), false)
                {
                    errors.record(&day0.ip, e);
                }
            });
        }
    });

    errors.into_result()
}

/// `[src, dstDir/]`; the destination must name a directory.
fn copy_args(cmd: &[String], invalid: fn(String) -> Error) -> Result<(&str, &str)> {
    match cmd {
        [src, dst_dir] => {
            if !dst_dir.ends_with('/') {
                return Err(invalid(format!(
                    "destination {dst_dir:?} must end with '/'"
                )));
            }
            Ok((src.as_str(), dst_dir.as_str()))
        }
        _ => Err(invalid(format!(
            "expected [src, dstDir/], got {} argument(s)",
            cmd.len()
        ))),
    }
}

/// `tar -c -C <parent> <base>` for `src`.
fn tar_create(src: &str, invalid: fn(String) -> Error) -> Result<Vec<String>> {
    let (parent, base) = split_source(src).ok_or_else(|| invalid(format!("cannot copy {src:?}")))?;
    Ok(vec![
        "tar".to_string(),
        "-c".to_string(),
        "-C".to_string(),
        parent,
        base,
    ])
}

fn tar_extract(dst_dir: &str) -> Vec<String> {
    vec![
        "tar".to_string(),
        "-x".to_string(),
        "-C".to_string(),
        dst_dir.to_string(),
    ]
}

/// Split `src` into its directory and final component.
fn split_source(src: &str) -> Option<(String, String)> {
    let trimmed = src.trim_end_matches('/');
    let path = Path::new(trimmed);
    let base = path.file_name()?.to_str()?.to_string();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());
    Some((parent, base))
}
