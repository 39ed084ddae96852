//! Type-directed template partitioning.
//!
//! A single pass over the resource map routes every resource into exactly
//! one group by its type tag: log groups and IAM roles go to the log
//! partition, event permissions and rules to the permission partition, S3
//! buckets are dropped outright, and everything else stays behind as the
//! API partition (the input template, mutated in place).
//!
//! Removal is destructive: resources are moved, never copied, so the cover
//! is disjoint and exhaustive by construction. Outputs of the source
//! template that reference a dropped bucket are deleted along with it —
//! leaving them in place would be a dangling output, since the referent no
//! longer exists in any partition.

use indexmap::IndexMap;

use crate::core::SplitError;
use crate::template::{ResourceMap, ResourceType, Template, value_references};

/// Which group a resource type is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionClass {
    /// Relocated to the log stack (log groups).
    Log,
    /// Relocated to the log stack, with ARN/ID outputs synthesized (roles).
    Role,
    /// Relocated to the permission stack.
    Permission,
    /// Dropped entirely; the deployment bucket is managed out of band.
    Bucket,
    /// Stays in the API stack.
    Api,
}

/// The fixed type → partition lookup table.
#[must_use]
pub fn classify(resource_type: &ResourceType) -> PartitionClass {
    match resource_type {
        ResourceType::LogGroup => PartitionClass::Log,
        ResourceType::IamRole => PartitionClass::Role,
        ResourceType::LambdaPermission | ResourceType::EventsRule => PartitionClass::Permission,
        ResourceType::S3Bucket => PartitionClass::Bucket,
        _ => PartitionClass::Api,
    }
}

/// Resources extracted from the source template, grouped by destination.
///
/// Insertion order within each group follows declaration order in the
/// source template, so serialized partitions are deterministic.
#[derive(Debug, Default)]
pub struct Partitions {
    /// Log-group resources bound for the log stack.
    pub log_groups: ResourceMap,
    /// IAM roles bound for the log stack.
    pub roles: ResourceMap,
    /// Permission and event-rule resources bound for the permission stack.
    pub permissions: ResourceMap,
    /// Dropped bucket resources, kept only so callers can guard against
    /// surviving references to them.
    pub buckets: ResourceMap,
}

impl Partitions {
    /// Logical names of the dropped buckets.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }

    /// Logical names of the relocated roles.
    #[must_use]
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }
}

/// Split `template` in place, returning the extracted groups.
///
/// What remains in `template` afterwards is the API partition.
pub fn partition(template: &mut Template) -> Partitions {
    let mut partitions = Partitions::default();

    let names: Vec<String> = template.resources.keys().cloned().collect();
    for name in names {
        let class = classify(&template.resources[&name].resource_type);
        let destination = match class {
            PartitionClass::Log => &mut partitions.log_groups,
            PartitionClass::Role => &mut partitions.roles,
            PartitionClass::Permission => &mut partitions.permissions,
            PartitionClass::Bucket => &mut partitions.buckets,
            PartitionClass::Api => continue,
        };
        // shift_remove keeps the declaration order of the survivors.
        if let Some(resource) = template.resources.shift_remove(&name) {
            destination.insert(name, resource);
        }
    }

    remove_bucket_outputs(template, &partitions);
    partitions
}

/// Delete any output whose value references a dropped bucket.
fn remove_bucket_outputs(template: &mut Template, partitions: &Partitions) {
    let bucket_names = partitions.bucket_names();
    if bucket_names.is_empty() {
        return;
    }
    template.outputs.retain(|_, output| {
        !bucket_names
            .iter()
            .any(|bucket| value_references(&output.value, bucket))
    });
}

/// Guard against surviving references to dropped buckets.
///
/// Called after the rewrite phase (which replaces function `Code.S3Bucket`
/// fields with the resolved deployment bucket name); anything still
/// pointing at a dropped bucket at that point has no referent in any
/// partition and would produce a broken deployment, so the run is rejected.
pub fn check_dangling_bucket_references(
    partitions: &IndexMap<&str, &Template>,
    bucket_names: &[&str],
) -> Result<(), SplitError> {
    for template in partitions.values() {
        for (name, resource) in &template.resources {
            for bucket in bucket_names {
                if value_references(&resource.properties, bucket) {
                    return Err(SplitError::structural(
                        name.clone(),
                        format!("references dropped bucket '{bucket}'"),
                    ));
                }
            }
        }
    }
    Ok(())
}
