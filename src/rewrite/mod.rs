//! Cross-partition reference rewriting and parameter/output synthesis.
//!
//! After partitioning, references that used to be template-local now cross
//! a document boundary. Nested stacks cannot reach into a sibling's
//! resources, only through the parent's relayed parameters, so every such
//! edge becomes a triple: a parameter on the consuming stack, an output on
//! the producing stack, and a wiring entry at the root feeding one into
//! the other.
//!
//! The rewrites mutate each partition independently; the only cross-
//! partition mutation is appending the synthesized parameter/output
//! declarations onto the sibling being wired against. Reference shapes
//! were validated at decode time ([`Template::validate_reference_shapes`]),
//! so an unexpected shape here is a bug in the caller, still reported as a
//! structural error rather than a panic.

use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::constants::{API_STACK_ID, ROLE_ID_SUFFIX};
use crate::core::SplitError;
use crate::template::{Output, Parameter, Reference, ResourceType, Template};

/// Root-level parameter bindings for the permission nested stack.
///
/// Maps each synthesized permission-stack parameter to the reference the
/// parent supplies for it (an `Outputs.<name>` attribute-fetch on the API
/// nested stack). Consumed by the root composer.
#[derive(Debug, Default)]
pub struct Wiring {
    /// Parameter name → value relayed by the parent.
    pub bindings: IndexMap<String, Reference>,
}

impl Wiring {
    fn bind_to_api_output(&mut self, name: &str) {
        self.bindings.insert(
            name.to_string(),
            Reference::get_att(API_STACK_ID, &format!("Outputs.{name}")),
        );
    }
}

/// Rewrite function references held by permission-partition resources.
///
/// Event-rule targets and permission `FunctionName` fields carry an
/// attribute-fetch of a compute function that now lives in the API stack.
/// Each is replaced by a direct reference to a parameter of the same name,
/// and for every referenced function that exists in the API stack the
/// parameter/output/wiring triple is synthesized.
pub fn rewrite_permission_references(
    permission: &mut Template,
    api: &mut Template,
) -> Result<Wiring, SplitError> {
    let mut function_names: Vec<String> = Vec::new();
    let mut note = |name: String| {
        if !function_names.contains(&name) {
            function_names.push(name);
        }
    };

    for (name, resource) in &mut permission.resources {
        match resource.resource_type {
            ResourceType::EventsRule => {
                let Some(targets) = resource
                    .properties
                    .get_mut("Targets")
                    .and_then(Value::as_array_mut)
                else {
                    continue;
                };
                for (idx, target) in targets.iter_mut().enumerate() {
                    let arn = target.get("Arn").ok_or_else(|| {
                        SplitError::structural(name.clone(), format!("target {idx} has no Arn"))
                    })?;
                    let reference = Reference::from_value(arn).ok_or_else(|| {
                        SplitError::structural(
                            name.clone(),
                            format!("target {idx} Arn is neither Ref nor Fn::GetAtt"),
                        )
                    })?;
                    let function = reference.target().to_string();
                    target["Arn"] = Reference::Ref(function.clone()).to_value();
                    note(function);
                }
            }
            ResourceType::LambdaPermission => {
                let Some(function_name) = resource.properties.get("FunctionName") else {
                    continue;
                };
                // Literal ARNs need no rewiring.
                if !function_name.is_object() {
                    continue;
                }
                let reference = Reference::from_value(function_name).ok_or_else(|| {
                    SplitError::structural(name.clone(), "FunctionName is neither Ref nor Fn::GetAtt")
                })?;
                let function = reference.target().to_string();
                resource.properties["FunctionName"] = Reference::Ref(function.clone()).to_value();
                note(function);
            }
            _ => {}
        }
    }

    let mut wiring = Wiring::default();
    for function in function_names {
        if !api.resources.contains_key(&function) {
            continue;
        }
        permission
            .parameters
            .insert(function.clone(), Parameter::string());
        api.outputs
            .insert(function.clone(), Output::attribute_of(&function, "Arn"));
        wiring.bind_to_api_output(&function);
    }
    Ok(wiring)
}

/// Expose every REST API in the API stack to the permission stack.
///
/// Permission resources name the gateway by id; after partitioning that id
/// is only known inside the API stack, so each `AWS::ApiGateway::RestApi`
/// is exported as a direct-reference output and relayed into a permission-
/// stack parameter. Skipped entirely when the permission partition is
/// empty: with no consumer there is nothing to wire.
pub fn rewrite_rest_api_references(
    permission: &mut Template,
    api: &mut Template,
    wiring: &mut Wiring,
) {
    if permission.resources.is_empty() {
        return;
    }
    for name in api.names_of_type(&ResourceType::RestApi) {
        permission.parameters.insert(name.clone(), Parameter::string());
        api.outputs.insert(name.clone(), Output::reference_to(&name));
        wiring.bind_to_api_output(&name);
    }
}

/// Rewrite policy role references to their ID-suffixed parameter form.
///
/// The API stack no longer holds the role objects, only their physical ids
/// arriving as `<role>ID` parameters, so `AWS::IAM::Policy` `Roles`
/// entries must point at the suffixed name.
pub fn set_ref_for_policy(api: &mut Template) {
    for resource in api.resources.values_mut() {
        if resource.resource_type != ResourceType::IamPolicy {
            continue;
        }
        let Some(roles) = resource
            .properties
            .get_mut("Roles")
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for role in roles.iter_mut() {
            if let Some(Reference::Ref(name)) = Reference::from_value(role) {
                *role = Reference::Ref(format!("{name}{ROLE_ID_SUFFIX}")).to_value();
            }
        }
    }
}

/// Rewrite compute-function role and deployment-package references.
///
/// The execution role left for the log stack, so an attribute-fetch of it
/// becomes a direct reference to the role parameter of the same name. The
/// deployment bucket resource was dropped, so `Code.S3Bucket` is
/// overwritten with the externally resolved bucket name. `DependsOn`
/// entries naming a relocated role are pruned; that ordering is implied by
/// parameter resolution in the parent stack once the role is external.
pub fn set_arn_for_lambda_functions(api: &mut Template, bucket_name: &str, relocated_roles: &[String]) {
    for resource in api.resources.values_mut() {
        if resource.resource_type != ResourceType::LambdaFunction {
            continue;
        }
        rewrite_role_attribute(&mut resource.properties, "Role");
        if let Some(code) = resource.properties.get_mut("Code") {
            if code.get("S3Bucket").is_some() {
                code["S3Bucket"] = json!(bucket_name);
            }
        }
        prune_relocated_dependencies(resource, relocated_roles);
    }
}

/// The state-machine counterpart of [`set_arn_for_lambda_functions`]:
/// `RoleArn` attribute-fetches become role-parameter references and
/// relocated-role `DependsOn` entries are pruned.
pub fn set_arn_for_state_machines(api: &mut Template, relocated_roles: &[String]) {
    for resource in api.resources.values_mut() {
        if resource.resource_type != ResourceType::StateMachine {
            continue;
        }
        rewrite_role_attribute(&mut resource.properties, "RoleArn");
        prune_relocated_dependencies(resource, relocated_roles);
    }
}

fn rewrite_role_attribute(properties: &mut Value, field: &str) {
    let Some(role) = properties.get(field) else {
        return;
    };
    if let Some(Reference::GetAtt { target, .. }) = Reference::from_value(role) {
        properties[field] = Reference::Ref(target).to_value();
    }
}

fn prune_relocated_dependencies(resource: &mut crate::template::Resource, relocated: &[String]) {
    if let Some(depends_on) = resource.depends_on.take() {
        resource.depends_on = depends_on.retain_names(|name| !relocated.iter().any(|r| r == name));
    }
}

/// Declare `<role>` and `<role>ID` input parameters on the API stack for
/// every role relocated to the log stack.
pub fn add_role_parameters(api: &mut Template, role_names: &[String]) {
    for name in role_names {
        api.parameters.insert(name.clone(), Parameter::string());
        api.parameters
            .insert(format!("{name}{ROLE_ID_SUFFIX}"), Parameter::string());
    }
}

/// Export every relocated role from the log stack twice: its ARN under the
/// bare name and its physical id under the ID-suffixed name.
pub fn export_role_outputs(log: &mut Template, role_names: &[String]) {
    for name in role_names {
        log.outputs.insert(name.clone(), Output::attribute_of(name, "Arn"));
        log.outputs
            .insert(format!("{name}{ROLE_ID_SUFFIX}"), Output::reference_to(name));
    }
}

/// Narrow the generated Lambda execution role's inline log policy.
///
/// The compiled template enumerates every log group in the role's policy
/// statements; after relocation the role lives next to the log groups, and
/// a region/account-scoped wildcard keeps the document small without
/// widening access beyond log groups.
pub fn reduce_execution_role_policy(log: &mut Template) {
    let Some(role) = log.resources.get_mut("IamRoleLambdaExecution") else {
        return;
    };
    let Some(policies) = role
        .properties
        .get_mut("Policies")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for policy in policies {
        let Some(statements) = policy
            .get_mut("PolicyDocument")
            .and_then(|d| d.get_mut("Statement"))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for statement in statements {
            statement["Resource"] = json!([
                { "Fn::Sub": "arn:aws:logs:${AWS::Region}:${AWS::AccountId}:log-group:*:*" }
            ]);
        }
    }
}
