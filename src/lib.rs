//! stacksplit — nested-stack partitioning for compiled CloudFormation templates.
//!
//! CloudFormation caps the number of resources a single stack may hold;
//! large serverless services blow past it mostly on boilerplate (one log
//! group and permission per function). stacksplit takes the compiled
//! template and splits it into nested stacks grouped by resource type,
//! preserving every cross-resource reference so the multi-stack bundle
//! deploys identically to the monolith:
//!
//! - **log stack** — log groups and IAM roles, with ARN/ID output pairs
//!   for every relocated role
//! - **permission stack** — event rules and invoke permissions, their
//!   function references rewritten to parameters
//! - **API stack** — everything else (the original template mutated in
//!   place), gaining role parameters and function-ARN outputs
//! - **parent template** — composes the three as
//!   `AWS::CloudFormation::Stack` resources and relays the wiring
//!
//! S3 bucket resources are dropped, not relocated: the deployment bucket
//! is managed out of band and its resolved name is substituted into
//! function code locations.
//!
//! A reference that crosses a stack boundary after partitioning becomes a
//! parameter on the consuming stack, an output on the producing stack, and
//! a wiring entry in the parent — see [`rewrite`] for the rules and
//! [`compose`] for the parent synthesis.
//!
//! # Module map
//!
//! - [`template`] — the document model: resources, outputs, parameters,
//!   and the tagged [`template::Reference`] view of `Ref`/`Fn::GetAtt`
//! - [`partition`] — type-directed partitioning
//! - [`rewrite`] — cross-partition reference rewriting and
//!   parameter/output synthesis
//! - [`compose`] — parent template composition
//! - [`upload`] — artifact storage (HTTP bucket store, local store)
//! - [`splitter`] — the per-deployment pipeline tying it all together
//! - [`cli`] — the `stacksplit prepare` command

pub mod cli;
pub mod compose;
pub mod constants;
pub mod core;
pub mod partition;
pub mod rewrite;
pub mod splitter;
pub mod template;
pub mod upload;
