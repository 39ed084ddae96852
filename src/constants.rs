//! File names and logical identifiers shared across modules.
//!
//! These names are part of the tool's external contract: the deployment
//! backend looks partitioned stacks up under these keys, and downstream
//! tooling expects the composed template under [`ROOT_TEMPLATE_FILE`].

/// Uploaded/local file name of the log partition document.
pub const LOG_STACK_FILE: &str = "logStack.json";

/// Uploaded/local file name of the API partition document.
pub const API_STACK_FILE: &str = "apiStack.json";

/// Uploaded/local file name of the permission partition document.
pub const PERMISSION_STACK_FILE: &str = "permissionStack.json";

/// Local file name of the composed parent template.
pub const ROOT_TEMPLATE_FILE: &str = "compiled-cloudformation-template.json";

/// Deployment state file consulted when no bucket is given explicitly.
pub const STATE_FILE: &str = "serverless-state.json";

/// Logical name of the log nested stack in the parent template.
pub const LOG_STACK_ID: &str = "LogStack";

/// Logical name of the API nested stack in the parent template.
pub const API_STACK_ID: &str = "ApiStack";

/// Logical name of the permission nested stack in the parent template.
pub const PERMISSION_STACK_ID: &str = "PermissionStack";

/// Suffix appended to a role's logical name for its physical-ID parameter.
///
/// A relocated role is exported twice from the log stack: its ARN under the
/// bare name and its physical resource id under `<name>ID`. Consumers that
/// need the id (IAM policies) reference the suffixed form.
pub const ROLE_ID_SUFFIX: &str = "ID";
