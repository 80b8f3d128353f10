//! Registry commands. These run in-process on day-0 through the
//! [`RegistryClient`](crate::client::RegistryClient); node eligibility was
//! already checked by the dispatcher.

use super::{Dispatcher, log_dry_run};
use crate::client::{DEFAULT_REV, oci_file_url};
use crate::error::{Error, Result};
use crate::spec::CommandKind;

/// Render the argv against day-0.
fn day0_args(dispatcher: &Dispatcher<'_>, cmd: &[String]) -> Result<Vec<String>> {
    dispatcher
        .template
        .cmd_override_with_node(cmd, dispatcher.registry.day0())
}

fn non_empty(kind: CommandKind, cmd: Vec<String>) -> Result<Vec<String>> {
    if cmd.is_empty() {
        return Err(Error::EmptyCommand(kind.to_string()));
    }
    Ok(cmd)
}

/// `pushImage [image...]`: mirror images into the registry.
pub(super) fn push_image(dispatcher: &Dispatcher<'_>, cmd: &[String]) -> Result<()> {
    let images = day0_args(dispatcher, cmd)?;
    let endpoint = dispatcher.params.registry_endpoint()?;

    if dispatcher.dry_run {
        log_dry_run(CommandKind::PushImage, &endpoint.address(), &images);
        return Ok(());
    }
    if images.is_empty() {
        return Ok(());
    }

    let client = dispatcher.client;
    let auth = client.get_auth_conf(&endpoint)?;
    let mapped = client.map_image_url_create_harbor_project(&endpoint, &images)?;
    for image in &mapped {
        let local = client.tag_image_to_local(image, &endpoint.address())?;
        log::info!("pushing {} as {}", image, local);
        client.image_push(&local, &auth)?;
    }
    Ok(())
}

/// `pushFile path [subRef [rev]]`
pub(super) fn push_file(dispatcher: &Dispatcher<'_>, cmd: &[String]) -> Result<()> {
    let args = non_empty(CommandKind::PushFile, day0_args(dispatcher, cmd)?)?;
    let path = &args[0];
    let sub_ref = args.get(1).map_or("", String::as_str);
    let rev = args.get(2).map_or("", String::as_str);

    if dispatcher.dry_run {
        log_dry_run(CommandKind::PushFile, &dispatcher.registry.day0().ip, &args);
        return Ok(());
    }

    let reference = dispatcher.client.push_file_to_repo(path, sub_ref, rev)?;
    log::info!("pushed {} as {}", path, reference);
    Ok(())
}

/// `pullFile target [subRef [rev]]`; an empty rev means [`DEFAULT_REV`].
pub(super) fn pull_file(dispatcher: &Dispatcher<'_>, cmd: &[String]) -> Result<()> {
    let args = non_empty(CommandKind::PullFile, day0_args(dispatcher, cmd)?)?;
    let target = &args[0];
    let sub_ref = args.get(1).map_or("", String::as_str);
    let rev = args
        .get(2)
        .map(String::as_str)
        .filter(|rev| !rev.is_empty())
        .unwrap_or(DEFAULT_REV);

    let params = dispatcher.params;
    let url = oci_file_url(
        &params.registry_address()?,
        params.file_project(),
        sub_ref,
        rev,
    );

    if dispatcher.dry_run {
        log_dry_run(
            CommandKind::PullFile,
            &dispatcher.registry.day0().ip,
            &[target.clone(), url],
        );
        return Ok(());
    }

    log::info!("pulling {} into {}", url, target);
    dispatcher.client.pull_file_from_repo(target, &url)
}

/// `createHarborProject [image...]`: ensure projects exist for the images.
pub(super) fn create_harbor_project(dispatcher: &Dispatcher<'_>, cmd: &[String]) -> Result<()> {
    let images = day0_args(dispatcher, cmd)?;
    let endpoint = dispatcher.params.registry_endpoint()?;

    if dispatcher.dry_run {
        log_dry_run(CommandKind::CreateHarborProject, &endpoint.address(), &images);
        return Ok(());
    }

    let mapped = dispatcher
        .client
        .map_image_url_create_harbor_project(&endpoint, &images)?;
    log::debug!("projects ready for {:?}", mapped);
    Ok(())
}
