use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{INJECTED_STATUS, INJECT_ANNOTATION_KEY, STATUS_ANNOTATION_KEY};

/// What the workload asks for through the inject annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectIntent {
    Yes,
    No,
    Unset,
}

impl InjectIntent {
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        match annotations.and_then(|a| a.get(INJECT_ANNOTATION_KEY)) {
            None => InjectIntent::Unset,
            Some(value) if value.eq_ignore_ascii_case("true") => InjectIntent::Yes,
            Some(_) => InjectIntent::No,
        }
    }
}

/// Whether the workload has already been through the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStatus {
    Injected,
    NotInjected,
}

impl InjectStatus {
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        match annotations.and_then(|a| a.get(STATUS_ANNOTATION_KEY)) {
            Some(value) if value.eq_ignore_ascii_case(INJECTED_STATUS) => InjectStatus::Injected,
            _ => InjectStatus::NotInjected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SpecialNamespace,
    AlreadyInjected,
    NotRequested,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::SpecialNamespace => write!(f, "special_namespace"),
            SkipReason::AlreadyInjected => write!(f, "already_injected"),
            SkipReason::NotRequested => write!(f, "not_requested"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationDecision {
    Mutate,
    Skip(SkipReason),
}

/// Decide whether a workload must receive the sidecars.
///
/// The checks are evaluated in order, the first one that matches wins:
/// 1. workloads living inside of an excluded namespace are never touched
/// 2. workloads already carrying the injected status are never touched again
/// 3. workloads explicitly asking for injection are mutated
/// 4. everything else is left alone
pub fn evaluate(
    namespace: &str,
    annotations: Option<&BTreeMap<String, String>>,
    exclusion_list: &BTreeSet<String>,
) -> MutationDecision {
    if exclusion_list.contains(namespace) {
        return MutationDecision::Skip(SkipReason::SpecialNamespace);
    }

    if InjectStatus::from_annotations(annotations) == InjectStatus::Injected {
        return MutationDecision::Skip(SkipReason::AlreadyInjected);
    }

    match InjectIntent::from_annotations(annotations) {
        InjectIntent::Yes => MutationDecision::Mutate,
        InjectIntent::No | InjectIntent::Unset => MutationDecision::Skip(SkipReason::NotRequested),
    }
}

pub fn should_mutate(
    namespace: &str,
    annotations: Option<&BTreeMap<String, String>>,
    exclusion_list: &BTreeSet<String>,
) -> bool {
    evaluate(namespace, annotations, exclusion_list) == MutationDecision::Mutate
}
