//! The resource graph model: an in-memory CloudFormation template.
//!
//! A [`Template`] is an insertion-ordered mapping of logical resource names
//! to [`Resource`]s plus named [`Output`]s and [`Parameter`]s. The type tag
//! of every resource is decoded into a [`ResourceType`] at ingestion, and
//! the reference positions the rewriters later consume (event-rule target
//! ARNs, permission `FunctionName` fields, policy `Roles` lists) are shape-
//! checked at the same time. A malformed reference fails the run with
//! [`SplitError::Structural`] before any partition is mutated, rather than
//! blowing up halfway through the rewrite phase.
//!
//! Property trees are kept as raw `serde_json::Value`s; structured access
//! goes through [`Reference`], the tagged view of the two reference forms
//! (`Ref` and `Fn::GetAtt`) that cross-stack rewriting cares about.
//!
//! Ordering: maps preserve insertion order (`serde_json` is built with
//! `preserve_order`), so serialized partitions are deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::SplitError;

pub mod io;

/// Ordered mapping from logical name to resource.
pub type ResourceMap = IndexMap<String, Resource>;

/// A self-contained infrastructure document.
///
/// Every reference inside a template must resolve either to a resource or
/// parameter of the same template or to a declared parameter; the rewrite
/// phase exists to restore that invariant after partitioning breaks it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Template format version, preserved verbatim.
    #[serde(
        rename = "AWSTemplateFormatVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub format_version: Option<String>,

    /// Free-form description, preserved verbatim.
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input parameters declared on this template.
    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Parameter>,

    /// The resource graph, keyed by logical name.
    #[serde(rename = "Resources", default)]
    pub resources: ResourceMap,

    /// Named outputs exported by this template.
    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,

    /// Any other top-level sections (Conditions, Mappings, ...), preserved
    /// round-trip but never inspected.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    /// An empty template carrying the standard format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format_version: Some("2010-09-09".to_string()),
            ..Self::default()
        }
    }

    /// Decode a template from a JSON value and validate reference shapes.
    pub fn from_value(value: Value) -> Result<Self, SplitError> {
        let template: Self = serde_json::from_value(value)?;
        template.validate_reference_shapes()?;
        Ok(template)
    }

    /// Serialize back to a JSON value.
    pub fn to_value(&self) -> Result<Value, SplitError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Logical names of every resource with the given type, in declaration order.
    #[must_use]
    pub fn names_of_type(&self, resource_type: &ResourceType) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, r)| &r.resource_type == resource_type)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Shape-check the reference positions the rewriters consume.
    ///
    /// Rejecting malformed shapes here keeps the rewrite phase infallible
    /// with respect to structure: by the time a partition is mutated, every
    /// reference it will touch is known to decode.
    pub fn validate_reference_shapes(&self) -> Result<(), SplitError> {
        for (name, resource) in &self.resources {
            match resource.resource_type {
                ResourceType::EventsRule => {
                    let Some(targets) = resource.properties.get("Targets") else {
                        continue;
                    };
                    let Some(targets) = targets.as_array() else {
                        return Err(SplitError::structural(name, "Targets is not an array"));
                    };
                    for (idx, target) in targets.iter().enumerate() {
                        let arn = target.get("Arn").ok_or_else(|| {
                            SplitError::structural(name, format!("target {idx} has no Arn"))
                        })?;
                        if Reference::from_value(arn).is_none() {
                            return Err(SplitError::structural(
                                name,
                                format!("target {idx} Arn is neither Ref nor Fn::GetAtt"),
                            ));
                        }
                    }
                }
                ResourceType::LambdaPermission => {
                    let function_name =
                        resource.properties.get("FunctionName").ok_or_else(|| {
                            SplitError::structural(name, "permission has no FunctionName")
                        })?;
                    // A literal string (pre-resolved ARN) is legal and left alone;
                    // an object must be one of the two reference forms.
                    if function_name.is_object() && Reference::from_value(function_name).is_none() {
                        return Err(SplitError::structural(
                            name,
                            "FunctionName is neither Ref nor Fn::GetAtt",
                        ));
                    }
                }
                ResourceType::IamPolicy => {
                    let Some(roles) = resource.properties.get("Roles") else {
                        continue;
                    };
                    let Some(roles) = roles.as_array() else {
                        return Err(SplitError::structural(name, "Roles is not an array"));
                    };
                    for (idx, role) in roles.iter().enumerate() {
                        if role.is_object()
                            && !matches!(Reference::from_value(role), Some(Reference::Ref(_)))
                        {
                            return Err(SplitError::structural(
                                name,
                                format!("Roles entry {idx} is not a Ref"),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The fixed vocabulary of resource types the partitioner routes on.
///
/// Everything outside the vocabulary decodes to [`ResourceType::Other`]
/// with the original tag preserved, and stays in the API partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    /// `AWS::Logs::LogGroup`
    LogGroup,
    /// `AWS::IAM::Role`
    IamRole,
    /// `AWS::S3::Bucket`
    S3Bucket,
    /// `AWS::Lambda::Permission`
    LambdaPermission,
    /// `AWS::Events::Rule`
    EventsRule,
    /// `AWS::Lambda::Function`
    LambdaFunction,
    /// `AWS::StepFunctions::StateMachine`
    StateMachine,
    /// `AWS::IAM::Policy`
    IamPolicy,
    /// `AWS::ApiGateway::RestApi`
    RestApi,
    /// `AWS::CloudFormation::Stack`, used by the composed parent template.
    NestedStack,
    /// Any other type tag, preserved verbatim.
    Other(String),
}

impl ResourceType {
    /// The CloudFormation type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::LogGroup => "AWS::Logs::LogGroup",
            Self::IamRole => "AWS::IAM::Role",
            Self::S3Bucket => "AWS::S3::Bucket",
            Self::LambdaPermission => "AWS::Lambda::Permission",
            Self::EventsRule => "AWS::Events::Rule",
            Self::LambdaFunction => "AWS::Lambda::Function",
            Self::StateMachine => "AWS::StepFunctions::StateMachine",
            Self::IamPolicy => "AWS::IAM::Policy",
            Self::RestApi => "AWS::ApiGateway::RestApi",
            Self::NestedStack => "AWS::CloudFormation::Stack",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for ResourceType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "AWS::Logs::LogGroup" => Self::LogGroup,
            "AWS::IAM::Role" => Self::IamRole,
            "AWS::S3::Bucket" => Self::S3Bucket,
            "AWS::Lambda::Permission" => Self::LambdaPermission,
            "AWS::Events::Rule" => Self::EventsRule,
            "AWS::Lambda::Function" => Self::LambdaFunction,
            "AWS::StepFunctions::StateMachine" => Self::StateMachine,
            "AWS::IAM::Policy" => Self::IamPolicy,
            "AWS::ApiGateway::RestApi" => Self::RestApi,
            "AWS::CloudFormation::Stack" => Self::NestedStack,
            _ => Self::Other(tag),
        }
    }
}

impl From<ResourceType> for String {
    fn from(resource_type: ResourceType) -> Self {
        resource_type.as_str().to_string()
    }
}

/// A named, typed unit of infrastructure with a property tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Decoded type tag.
    #[serde(rename = "Type")]
    pub resource_type: ResourceType,

    /// Raw property tree. May contain references to other logical names.
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,

    /// Explicit ordering constraints, if any.
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,

    /// Other resource-level attributes (Condition, Metadata, ...), preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    /// A resource with the given type and properties and nothing else.
    #[must_use]
    pub fn new(resource_type: ResourceType, properties: Value) -> Self {
        Self {
            resource_type,
            properties,
            depends_on: None,
            extra: Map::new(),
        }
    }
}

/// The `DependsOn` attribute, which CloudFormation accepts as a single
/// name or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    /// A single logical name.
    One(String),
    /// A list of logical names.
    Many(Vec<String>),
}

impl DependsOn {
    /// The named dependencies, regardless of representation.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::One(name) => vec![name.as_str()],
            Self::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Keep only the names for which `keep` returns true.
    ///
    /// Returns `None` when nothing survives, so the attribute can be
    /// dropped entirely instead of serializing an empty list.
    #[must_use]
    pub fn retain_names(self, keep: impl Fn(&str) -> bool) -> Option<Self> {
        match self {
            Self::One(name) => keep(&name).then_some(Self::One(name)),
            Self::Many(names) => {
                let kept: Vec<String> = names.into_iter().filter(|n| keep(n)).collect();
                if kept.is_empty() { None } else { Some(Self::Many(kept)) }
            }
        }
    }
}

/// A named output exported by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// The exported value, usually a reference.
    #[serde(rename = "Value")]
    pub value: Value,

    /// Description/Export and friends, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Output {
    /// An output exposing an attribute of a resource.
    #[must_use]
    pub fn attribute_of(name: &str, attribute: &str) -> Self {
        Self {
            value: Reference::get_att(name, attribute).to_value(),
            extra: Map::new(),
        }
    }

    /// An output exposing a direct reference to a resource.
    #[must_use]
    pub fn reference_to(name: &str) -> Self {
        Self {
            value: Reference::Ref(name.to_string()).to_value(),
            extra: Map::new(),
        }
    }
}

/// A declared input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter type, `String` for everything stacksplit synthesizes.
    #[serde(rename = "Type")]
    pub parameter_type: String,

    /// Default/Description and friends, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Parameter {
    /// A plain `String` parameter, the only kind stacksplit declares.
    #[must_use]
    pub fn string() -> Self {
        Self {
            parameter_type: "String".to_string(),
            extra: Map::new(),
        }
    }
}

/// A typed view of the two reference forms that cross partition boundaries.
///
/// `Ref` is a direct reference to a resource's identity (or a parameter);
/// `GetAtt` fetches a runtime attribute of a resource, most commonly `Arn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `{"Ref": "Name"}`
    Ref(String),
    /// `{"Fn::GetAtt": ["Name", "Attribute"]}`
    GetAtt {
        /// Logical name of the referenced resource.
        target: String,
        /// Attribute path, e.g. `Arn` or `Outputs.SomeOutput`.
        attribute: String,
    },
}

impl Reference {
    /// Build an attribute-fetch reference.
    #[must_use]
    pub fn get_att(target: &str, attribute: &str) -> Self {
        Self::GetAtt {
            target: target.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Try to decode a JSON value as a reference.
    ///
    /// Accepts `{"Ref": "..."}` and `{"Fn::GetAtt": ["name", "attr", ...]}`
    /// (extra path segments are joined with `.`), plus the dotted-string
    /// `{"Fn::GetAtt": "name.attr"}` form. Anything else is `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.len() != 1 {
            return None;
        }
        if let Some(name) = object.get("Ref") {
            return Some(Self::Ref(name.as_str()?.to_string()));
        }
        let get_att = object.get("Fn::GetAtt")?;
        match get_att {
            Value::Array(parts) if parts.len() >= 2 => {
                let target = parts[0].as_str()?.to_string();
                let attribute = parts[1..]
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Option<Vec<_>>>()?
                    .join(".");
                Some(Self::GetAtt { target, attribute })
            }
            Value::String(dotted) => {
                let (target, attribute) = dotted.split_once('.')?;
                Some(Self::get_att(target, attribute))
            }
            _ => None,
        }
    }

    /// Encode back to the JSON form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ref(name) => json!({ "Ref": name }),
            Self::GetAtt { target, attribute } => {
                json!({ "Fn::GetAtt": [target, attribute] })
            }
        }
    }

    /// The logical name this reference points at.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Ref(name) => name,
            Self::GetAtt { target, .. } => target,
        }
    }
}

/// Whether `value` contains, anywhere in its tree, a reference targeting `name`.
#[must_use]
pub fn value_references(value: &Value, name: &str) -> bool {
    if let Some(reference) = Reference::from_value(value) {
        return reference.target() == name;
    }
    match value {
        Value::Array(items) => items.iter().any(|v| value_references(v, name)),
        Value::Object(fields) => fields.values().any(|v| value_references(v, name)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_round_trips_known_and_unknown_tags() {
        let role = ResourceType::from("AWS::IAM::Role".to_string());
        assert_eq!(role, ResourceType::IamRole);
        assert_eq!(role.as_str(), "AWS::IAM::Role");

        let custom = ResourceType::from("Custom::Widget".to_string());
        assert_eq!(custom, ResourceType::Other("Custom::Widget".to_string()));
        assert_eq!(custom.as_str(), "Custom::Widget");
    }

    #[test]
    fn reference_decodes_ref_and_get_att() {
        let reference = Reference::from_value(&json!({ "Ref": "MyRole" })).unwrap();
        assert_eq!(reference, Reference::Ref("MyRole".to_string()));

        let reference =
            Reference::from_value(&json!({ "Fn::GetAtt": ["MyRole", "Arn"] })).unwrap();
        assert_eq!(reference, Reference::get_att("MyRole", "Arn"));
        assert_eq!(reference.target(), "MyRole");

        let dotted = Reference::from_value(&json!({ "Fn::GetAtt": "MyRole.Arn" })).unwrap();
        assert_eq!(dotted, Reference::get_att("MyRole", "Arn"));
    }

    #[test]
    fn reference_rejects_other_shapes() {
        assert!(Reference::from_value(&json!("MyRole")).is_none());
        assert!(Reference::from_value(&json!({ "Fn::Sub": "arn:..." })).is_none());
        assert!(Reference::from_value(&json!({ "Fn::GetAtt": ["OnlyName"] })).is_none());
        // Two keys is not a lone reference.
        assert!(Reference::from_value(&json!({ "Ref": "A", "Fn::GetAtt": ["B", "Arn"] })).is_none());
    }

    #[test]
    fn value_references_finds_nested_targets() {
        let tree = json!({
            "Properties": {
                "List": [{ "Deep": { "Fn::GetAtt": ["Bucket", "Arn"] } }]
            }
        });
        assert!(value_references(&tree, "Bucket"));
        assert!(!value_references(&tree, "Other"));
    }

    #[test]
    fn depends_on_retain_names() {
        let many = DependsOn::Many(vec!["A".to_string(), "B".to_string()]);
        let kept = many.retain_names(|n| n != "A").unwrap();
        assert_eq!(kept, DependsOn::Many(vec!["B".to_string()]));

        let one = DependsOn::One("A".to_string());
        assert!(one.retain_names(|n| n != "A").is_none());
    }

    #[test]
    fn template_round_trips_through_json() {
        let value = json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": "compiled",
            "Resources": {
                "Fn": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": { "Handler": "index.handler" },
                    "DependsOn": "FnRole"
                }
            },
            "Outputs": {
                "FnArn": { "Value": { "Fn::GetAtt": ["Fn", "Arn"] } }
            },
            "Conditions": { "Always": true }
        });
        let template = Template::from_value(value.clone()).unwrap();
        assert_eq!(
            template.resources["Fn"].resource_type,
            ResourceType::LambdaFunction
        );
        assert_eq!(
            template.resources["Fn"].depends_on,
            Some(DependsOn::One("FnRole".to_string()))
        );
        assert_eq!(template.to_value().unwrap(), value);
    }

    #[test]
    fn malformed_event_rule_target_is_rejected_at_decode() {
        let value = json!({
            "Resources": {
                "ScheduleRule": {
                    "Type": "AWS::Events::Rule",
                    "Properties": {
                        "Targets": [{ "Arn": "arn:aws:lambda:literal" }]
                    }
                }
            }
        });
        let err = Template::from_value(value).unwrap_err();
        assert!(matches!(
            err,
            SplitError::Structural { ref resource, .. } if resource == "ScheduleRule"
        ));
    }

    #[test]
    fn permission_without_function_name_is_rejected() {
        let value = json!({
            "Resources": {
                "Perm": {
                    "Type": "AWS::Lambda::Permission",
                    "Properties": { "Action": "lambda:InvokeFunction" }
                }
            }
        });
        assert!(Template::from_value(value).is_err());
    }

    #[test]
    fn permission_with_literal_function_name_is_accepted() {
        let value = json!({
            "Resources": {
                "Perm": {
                    "Type": "AWS::Lambda::Permission",
                    "Properties": { "FunctionName": "arn:aws:lambda:us-east-1:1:function:f" }
                }
            }
        });
        assert!(Template::from_value(value).is_ok());
    }
}
