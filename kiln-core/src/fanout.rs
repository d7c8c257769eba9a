//! Fan-out
//!
//! After the tarball is uploaded, one package-builder run is started per
//! target environment. Each downstream run receives an allow-listed copy of
//! the tarball run's properties plus the target's own properties; nothing else
//! leaks across.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::pipeline::PipelineKind;
use crate::domain::properties::BuildProperties;
use crate::domain::target::TargetEnvironment;
use crate::dto::RunRequest;
use crate::error::{CoreError, Result};

/// Properties copied from the tarball run into every package run
pub const FORWARDED_PROPERTIES: &[&str] = &[
    "tarball", "category", "change", "patchset", "branch", "revision",
];

/// Properties every package run inherits from the upstream run
///
/// `category` is forwarded in its resolved form so downstream runs route to
/// the same change directory even when the upstream only carried a scheduler.
pub fn forwarded_properties(props: &BuildProperties) -> Result<BTreeMap<String, String>> {
    let mut forwarded: BTreeMap<String, String> = FORWARDED_PROPERTIES
        .iter()
        .filter_map(|key| props.get(key).map(|value| (key.to_string(), value)))
        .collect();

    forwarded.insert(
        "category".to_string(),
        props.resolve_category()?.as_str().to_string(),
    );

    Ok(forwarded)
}

/// One package run request per target
///
/// Fails without producing any request when the tarball is unknown, so a
/// partial fan-out is never started.
pub fn downstream_requests(
    props: &BuildProperties,
    targets: &[TargetEnvironment],
    parent: Uuid,
) -> Result<Vec<RunRequest>> {
    if props.tarball.as_deref().is_none_or(str::is_empty) {
        return Err(CoreError::missing("tarball"));
    }

    let forwarded = forwarded_properties(props)?;

    Ok(targets
        .iter()
        .map(|target| {
            let mut properties = forwarded.clone();
            properties.extend(target.properties());
            RunRequest::new(PipelineKind::Package, target.builder.clone(), properties)
                .with_parent(parent)
        })
        .collect())
}
