//! Parent (root) template composition.
//!
//! The composer builds the top-level document that declares each surviving
//! partition as a nested stack, supplies the synthesized parameters, and
//! re-exports the API stack's outputs. It runs only after every partition
//! upload has settled successfully; the pipeline never calls it on a
//! partial bundle.

use serde_json::{Map, Value, json};

use crate::constants::{
    API_STACK_FILE, API_STACK_ID, LOG_STACK_FILE, LOG_STACK_ID, PERMISSION_STACK_FILE,
    PERMISSION_STACK_ID, ROLE_ID_SUFFIX,
};
use crate::rewrite::Wiring;
use crate::template::{Output, Reference, Resource, ResourceType, Template};

/// Resolved storage locations of the three partition documents.
#[derive(Debug, Clone)]
pub struct StackUrls {
    /// URL of the uploaded log stack document.
    pub log: String,
    /// URL of the uploaded API stack document.
    pub api: String,
    /// URL of the uploaded permission stack document.
    pub permission: String,
}

impl StackUrls {
    /// Template URLs under the deployment bucket's artifact path.
    #[must_use]
    pub fn new(region: &str, bucket: &str, artifact_dir: &str) -> Self {
        let base = format!("https://s3.{region}.amazonaws.com/{bucket}/{artifact_dir}");
        Self {
            log: format!("{base}/{LOG_STACK_FILE}"),
            api: format!("{base}/{API_STACK_FILE}"),
            permission: format!("{base}/{PERMISSION_STACK_FILE}"),
        }
    }
}

/// Build the parent template composing the three nested stacks.
///
/// The API nested stack receives one parameter pair per relocated role
/// (`<role>` wired to the log stack's ARN output, `<role>ID` to its id
/// output); the permission nested stack receives the wiring synthesized
/// during reference rewriting; every output of the API partition is
/// relayed as a root output.
#[must_use]
pub fn compose(api: &Template, role_names: &[String], wiring: &Wiring, urls: &StackUrls) -> Template {
    let mut parent = Template::new();

    parent
        .resources
        .insert(LOG_STACK_ID.to_string(), nested_stack(&urls.log, None));
    parent.resources.insert(
        API_STACK_ID.to_string(),
        nested_stack(&urls.api, Some(role_parameters(role_names))),
    );
    parent.resources.insert(
        PERMISSION_STACK_ID.to_string(),
        nested_stack(&urls.permission, Some(wiring_parameters(wiring))),
    );

    for name in api.outputs.keys() {
        parent.outputs.insert(
            name.clone(),
            Output {
                value: Reference::get_att(API_STACK_ID, &format!("Outputs.{name}")).to_value(),
                extra: Map::new(),
            },
        );
    }

    parent
}

fn nested_stack(template_url: &str, parameters: Option<Map<String, Value>>) -> Resource {
    let mut properties = Map::new();
    properties.insert("TemplateURL".to_string(), json!(template_url));
    if let Some(parameters) = parameters {
        properties.insert("Parameters".to_string(), Value::Object(parameters));
    }
    Resource::new(ResourceType::NestedStack, Value::Object(properties))
}

fn role_parameters(role_names: &[String]) -> Map<String, Value> {
    let mut parameters = Map::new();
    for name in role_names {
        parameters.insert(
            name.clone(),
            Reference::get_att(LOG_STACK_ID, &format!("Outputs.{name}")).to_value(),
        );
        parameters.insert(
            format!("{name}{ROLE_ID_SUFFIX}"),
            Reference::get_att(LOG_STACK_ID, &format!("Outputs.{name}{ROLE_ID_SUFFIX}"))
                .to_value(),
        );
    }
    parameters
}

fn wiring_parameters(wiring: &Wiring) -> Map<String, Value> {
    wiring
        .bindings
        .iter()
        .map(|(name, reference)| (name.clone(), reference.to_value()))
        .collect()
}
