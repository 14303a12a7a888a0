//! Decide whether a workload needs the sidecars and compute the patch
//! injecting them.

pub mod defaults;
mod mutator;
pub mod patch;
pub mod policy;

pub use mutator::Mutator;

/// Annotation used by workloads to request the injection, only `true`
/// (case insensitive) enables it
pub const INJECT_ANNOTATION_KEY: &str = "sidecar-injector-webhook.nginx.sidecar/need_inject";

/// Annotation set on the workloads that have been injected
pub const STATUS_ANNOTATION_KEY: &str = "sidecar-injector-webhook.nginx.sidecar/status";

pub const INJECTED_STATUS: &str = "injected";

/// Namespaces whose workloads are never mutated, unless configured otherwise
pub const DEFAULT_IGNORED_NAMESPACES: [&str; 2] = ["kube-system", "kube-public"];
