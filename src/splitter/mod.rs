//! The deployment-run pipeline.
//!
//! One [`SplitRun`] covers one deployment: partition the compiled template,
//! rewrite cross-partition references, upload the three partition documents
//! concurrently, and compose the parent template once every upload has
//! settled. A failed upload rejects the run before composition; nothing is
//! retried.
//!
//! Phase order per run:
//! resolve bucket → partition → rewrite → upload (fan-out/fan-in) →
//! compose → write local outputs. The rewrite phase mutates each partition
//! independently; siblings are only touched to append the synthesized
//! parameter/output declarations.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::compose::{StackUrls, compose};
use crate::constants::{API_STACK_FILE, LOG_STACK_FILE, PERMISSION_STACK_FILE, ROOT_TEMPLATE_FILE};
use crate::partition::{Partitions, check_dangling_bucket_references, partition};
use crate::rewrite::{
    add_role_parameters, export_role_outputs, reduce_execution_role_policy,
    rewrite_permission_references, rewrite_rest_api_references, set_arn_for_lambda_functions,
    set_arn_for_state_machines, set_ref_for_policy,
};
use crate::template::{Template, io::render_template, io::write_template};
use crate::upload::{ArtifactStore, resolve_deployment_bucket};

/// Deployment context for one run.
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Deployment stage (dev, prod, ...).
    pub stage: String,
    /// Deployment region; used in nested-stack template URLs.
    pub region: String,
    /// Local package directory for compiled artifacts.
    pub package_dir: PathBuf,
    /// Deployment-specific artifact path inside the bucket.
    pub artifact_dir: String,
    /// Explicit deployment bucket name, if configured.
    pub bucket: Option<String>,
}

/// The produced multi-document bundle.
#[derive(Debug)]
pub struct SplitOutput {
    /// The log partition (log groups + relocated roles).
    pub log_stack: Template,
    /// The API partition (the original template, mutated in place).
    pub api_stack: Template,
    /// The permission partition (event rules + permissions).
    pub permission_stack: Template,
    /// The composed parent template.
    pub root: Template,
}

/// Orchestrates one split-and-upload run.
pub struct SplitRun {
    context: DeployContext,
    store: Arc<dyn ArtifactStore>,
}

impl SplitRun {
    /// A run against the given context and storage collaborator.
    pub fn new(context: DeployContext, store: Arc<dyn ArtifactStore>) -> Self {
        Self { context, store }
    }

    /// Execute the full pipeline on a compiled template.
    ///
    /// Takes the template by value: the run owns the document and mutates
    /// it destructively while carving out partitions. On success the
    /// partition documents and the composed parent have been uploaded and
    /// written to the package directory.
    pub async fn run(&self, mut template: Template) -> Result<SplitOutput> {
        info!(
            stage = %self.context.stage,
            region = %self.context.region,
            "splitting compiled template into nested stacks"
        );

        // Resolve the bucket up front: an unresolvable bucket must abort
        // before any upload is attempted, and the rewrite phase needs it.
        let bucket =
            resolve_deployment_bucket(self.context.bucket.as_deref(), &self.context.package_dir)?;
        debug!(bucket = %bucket, "resolved deployment bucket");

        let Partitions {
            log_groups,
            roles,
            permissions,
            buckets,
        } = partition(&mut template);
        let role_names: Vec<String> = roles.keys().cloned().collect();
        info!(
            log_groups = log_groups.len(),
            roles = roles.len(),
            permissions = permissions.len(),
            dropped_buckets = buckets.len(),
            remaining = template.resources.len(),
            "partitioned compiled template"
        );

        let mut log_stack = Template::new();
        log_stack.resources.extend(log_groups);
        log_stack.resources.extend(roles);
        reduce_execution_role_policy(&mut log_stack);
        export_role_outputs(&mut log_stack, &role_names);

        let mut permission_stack = Template::new();
        permission_stack.resources = permissions;

        add_role_parameters(&mut template, &role_names);
        let mut wiring = rewrite_permission_references(&mut permission_stack, &mut template)?;
        rewrite_rest_api_references(&mut permission_stack, &mut template, &mut wiring);
        set_arn_for_lambda_functions(&mut template, &bucket, &role_names);
        set_arn_for_state_machines(&mut template, &role_names);
        set_ref_for_policy(&mut template);
        debug!(wired_parameters = wiring.bindings.len(), "rewrote cross-stack references");

        // Anything still pointing at a dropped bucket has no referent in
        // any partition; reject instead of shipping a broken bundle.
        let bucket_names: Vec<&str> = buckets.keys().map(String::as_str).collect();
        let views: IndexMap<&str, &Template> = IndexMap::from_iter([
            (LOG_STACK_FILE, &log_stack),
            (API_STACK_FILE, &template),
            (PERMISSION_STACK_FILE, &permission_stack),
        ]);
        check_dangling_bucket_references(&views, &bucket_names)?;

        // Fan out the three uploads, fail fast on the first error. Local
        // copies are written first so a failed upload still leaves the
        // partition documents inspectable.
        let documents = [
            (LOG_STACK_FILE, &log_stack),
            (API_STACK_FILE, &template),
            (PERMISSION_STACK_FILE, &permission_stack),
        ];
        for (file_name, document) in &documents {
            write_template(&self.context.package_dir.join(file_name), document)?;
        }
        futures::future::try_join_all(
            documents
                .iter()
                .map(|(file_name, document)| self.upload_document(file_name, document)),
        )
        .await?;

        let urls = StackUrls::new(&self.context.region, &bucket, &self.context.artifact_dir);
        let root = compose(&template, &role_names, &wiring, &urls);
        write_template(&self.context.package_dir.join(ROOT_TEMPLATE_FILE), &root)?;
        info!("composed parent template with nested stacks");

        Ok(SplitOutput {
            log_stack,
            api_stack: template,
            permission_stack,
            root,
        })
    }

    async fn upload_document(&self, file_name: &str, document: &Template) -> Result<()> {
        let key = format!("{}/{file_name}", self.context.artifact_dir);
        info!(key = %key, "uploading partition document");
        let body = render_template(document)?;
        self.store.put_template(&key, body).await?;
        Ok(())
    }

    /// Upload every packaged function archive from the package directory.
    ///
    /// Archives fan out concurrently with the same fail-fast semantics as
    /// the document uploads. A package directory without archives is a
    /// no-op.
    pub async fn upload_archives(&self) -> Result<()> {
        let mut archives = Vec::new();
        let entries = std::fs::read_dir(&self.context.package_dir).with_context(|| {
            format!(
                "cannot read package directory: {}",
                self.context.package_dir.display()
            )
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "zip") {
                archives.push(path);
            }
        }
        if archives.is_empty() {
            debug!("no packaged archives to upload");
            return Ok(());
        }

        info!(count = archives.len(), "uploading packaged archives");
        futures::future::try_join_all(archives.iter().map(|path| async move {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("archive file name is not valid UTF-8")?;
            let key = format!("{}/{file_name}", self.context.artifact_dir);
            self.store.put_archive(&key, path).await?;
            Ok::<_, anyhow::Error>(())
        }))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SplitError;
    use crate::template::{Reference, ResourceType};
    use crate::upload::LocalDirStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn put_template(&self, key: &str, _body: String) -> Result<(), SplitError> {
            Err(SplitError::Upload {
                key: key.to_string(),
                reason: "simulated transport failure".to_string(),
            })
        }

        async fn put_archive(&self, key: &str, _path: &Path) -> Result<(), SplitError> {
            Err(SplitError::Upload {
                key: key.to_string(),
                reason: "simulated transport failure".to_string(),
            })
        }
    }

    fn compiled_template() -> Template {
        Template::from_value(json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Resources": {
                "HelloLogGroup": { "Type": "AWS::Logs::LogGroup", "Properties": { "LogGroupName": "/aws/lambda/hello" } },
                "IamRoleLambdaExecution": { "Type": "AWS::IAM::Role", "Properties": {} },
                "HelloLambdaFunction": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": {
                        "Role": { "Fn::GetAtt": ["IamRoleLambdaExecution", "Arn"] },
                        "Code": { "S3Bucket": "old-bucket", "S3Key": "hello.zip" }
                    },
                    "DependsOn": ["IamRoleLambdaExecution", "HelloLogGroup"]
                },
                "ScheduleRule": {
                    "Type": "AWS::Events::Rule",
                    "Properties": {
                        "Targets": [{ "Arn": { "Fn::GetAtt": ["HelloLambdaFunction", "Arn"] }, "Id": "HelloTarget" }]
                    }
                },
                "ServerlessDeploymentBucket": { "Type": "AWS::S3::Bucket", "Properties": {} }
            },
            "Outputs": {
                "ServerlessDeploymentBucketName": { "Value": { "Ref": "ServerlessDeploymentBucket" } }
            }
        }))
        .unwrap()
    }

    fn context(package_dir: &Path) -> DeployContext {
        DeployContext {
            stage: "dev".to_string(),
            region: "us-east-1".to_string(),
            package_dir: package_dir.to_path_buf(),
            artifact_dir: "serverless/svc/dev/1712340000".to_string(),
            bucket: Some("deploy-bucket".to_string()),
        }
    }

    #[tokio::test]
    async fn full_run_produces_a_wired_bundle() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LocalDirStore::new(temp.path().join("remote")));
        let run = SplitRun::new(context(&temp.path().join("pkg")), store);

        let output = run.run(compiled_template()).await.unwrap();

        // Log partition holds the role with its ARN/ID output pair.
        assert!(output.log_stack.resources.contains_key("IamRoleLambdaExecution"));
        assert!(output.log_stack.resources.contains_key("HelloLogGroup"));
        assert_eq!(
            output.log_stack.outputs["IamRoleLambdaExecution"].value,
            json!({ "Fn::GetAtt": ["IamRoleLambdaExecution", "Arn"] })
        );
        assert_eq!(
            output.log_stack.outputs["IamRoleLambdaExecutionID"].value,
            json!({ "Ref": "IamRoleLambdaExecution" })
        );

        // Permission partition: rule rewritten to a direct reference with a
        // matching parameter.
        assert_eq!(
            output.permission_stack.resources["ScheduleRule"].properties["Targets"][0]["Arn"],
            json!({ "Ref": "HelloLambdaFunction" })
        );
        assert!(output.permission_stack.parameters.contains_key("HelloLambdaFunction"));

        // API partition: role parameter pair declared, function rewired,
        // bucket name resolved, ARN output exposed.
        assert!(output.api_stack.parameters.contains_key("IamRoleLambdaExecution"));
        assert!(output.api_stack.parameters.contains_key("IamRoleLambdaExecutionID"));
        let function = &output.api_stack.resources["HelloLambdaFunction"];
        assert_eq!(function.properties["Role"], json!({ "Ref": "IamRoleLambdaExecution" }));
        assert_eq!(function.properties["Code"]["S3Bucket"], json!("deploy-bucket"));
        assert_eq!(
            output.api_stack.outputs["HelloLambdaFunction"].value,
            json!({ "Fn::GetAtt": ["HelloLambdaFunction", "Arn"] })
        );

        // Dropped bucket is in no partition and its output is gone.
        for stack in [&output.log_stack, &output.api_stack, &output.permission_stack] {
            assert!(!stack.resources.contains_key("ServerlessDeploymentBucket"));
        }
        assert!(!output.api_stack.outputs.contains_key("ServerlessDeploymentBucketName"));

        // Root wires producer outputs into consumer parameters.
        assert_eq!(
            output.root.resources["PermissionStack"].properties["Parameters"]["HelloLambdaFunction"],
            Reference::get_att("ApiStack", "Outputs.HelloLambdaFunction").to_value()
        );
        assert_eq!(
            output.root.resources["ApiStack"].properties["Parameters"]["IamRoleLambdaExecution"],
            Reference::get_att("LogStack", "Outputs.IamRoleLambdaExecution").to_value()
        );
        assert_eq!(
            output.root.resources["LogStack"].resource_type,
            ResourceType::NestedStack
        );

        // All three documents were uploaded under the artifact path, and the
        // composed parent was written locally.
        let remote = temp.path().join("remote/serverless/svc/dev/1712340000");
        for file in [LOG_STACK_FILE, API_STACK_FILE, PERMISSION_STACK_FILE] {
            assert!(remote.join(file).exists(), "missing uploaded {file}");
        }
        assert!(temp.path().join("pkg").join(ROOT_TEMPLATE_FILE).exists());
    }

    #[tokio::test]
    async fn failed_upload_rejects_the_run_without_a_root_document() {
        let temp = TempDir::new().unwrap();
        let run = SplitRun::new(context(&temp.path().join("pkg")), Arc::new(FailingStore));

        let err = run.run(compiled_template()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SplitError>(),
            Some(SplitError::Upload { .. })
        ));
        assert!(!temp.path().join("pkg").join(ROOT_TEMPLATE_FILE).exists());
    }

    #[tokio::test]
    async fn unresolvable_bucket_aborts_before_any_upload() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp.path().join("pkg"));
        ctx.bucket = None;
        std::fs::create_dir_all(&ctx.package_dir).unwrap();
        let remote = temp.path().join("remote");
        let run = SplitRun::new(ctx, Arc::new(LocalDirStore::new(&remote)));

        let err = run.run(compiled_template()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SplitError>(),
            Some(SplitError::ConfigResolution { .. })
        ));
        assert!(!remote.exists());
    }

    #[tokio::test]
    async fn archives_upload_under_the_artifact_path() {
        let temp = TempDir::new().unwrap();
        let package_dir = temp.path().join("pkg");
        std::fs::create_dir_all(&package_dir).unwrap();
        std::fs::write(package_dir.join("hello.zip"), b"zipbytes").unwrap();
        std::fs::write(package_dir.join("notes.txt"), b"skip me").unwrap();

        let store = Arc::new(LocalDirStore::new(temp.path().join("remote")));
        let run = SplitRun::new(context(&package_dir), store);
        run.upload_archives().await.unwrap();

        let remote = temp.path().join("remote/serverless/svc/dev/1712340000");
        assert!(remote.join("hello.zip").exists());
        assert!(!remote.join("notes.txt").exists());
    }
}
