use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Volume};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SidecarConfig;

pub const CONTAINERS_PATH: &str = "/spec/containers";
pub const VOLUMES_PATH: &str = "/spec/volumes";
pub const ANNOTATIONS_PATH: &str = "/metadata/annotations";

/// A single RFC 6902 operation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => Some(value),
            PatchOperation::Remove { .. } => None,
        }
    }
}

/// Build the operations injecting the sidecar containers, volumes and the
/// given annotations into a workload.
///
/// Container operations come first, then volume ones and finally the
/// annotation ones.
pub fn build_patch(
    original_containers: &[Container],
    original_volumes: &[Volume],
    original_annotations: Option<&BTreeMap<String, String>>,
    sidecar_config: &SidecarConfig,
    status_annotations: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let mut patch = append_to_array(
        original_containers.is_empty(),
        &sidecar_config.containers,
        CONTAINERS_PATH,
    );
    patch.extend(append_to_array(
        original_volumes.is_empty(),
        &sidecar_config.volumes,
        VOLUMES_PATH,
    ));
    patch.extend(update_annotations(original_annotations, status_annotations));

    patch
}

/// Appending with `<path>/-` requires the array to exist. When the target
/// is empty the first item creates the array instead.
fn append_to_array<T: Serialize>(
    target_is_empty: bool,
    added: &[T],
    base_path: &str,
) -> Vec<PatchOperation> {
    let mut create_array = target_is_empty;

    added
        .iter()
        .map(|item| {
            if create_array {
                create_array = false;
                PatchOperation::Add {
                    path: base_path.to_owned(),
                    value: json!([item]),
                }
            } else {
                PatchOperation::Add {
                    path: format!("{base_path}/-"),
                    value: json!(item),
                }
            }
        })
        .collect()
}

fn update_annotations(
    target: Option<&BTreeMap<String, String>>,
    added: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    if added.is_empty() {
        return vec![];
    }

    let Some(target) = target else {
        // a single operation creating the whole map, one per key would
        // overwrite each other
        return vec![PatchOperation::Add {
            path: ANNOTATIONS_PATH.to_owned(),
            value: json!(added),
        }];
    };

    added
        .iter()
        .map(|(key, value)| {
            let path = format!("{ANNOTATIONS_PATH}/{}", escape_json_pointer_token(key));
            match target.get(key) {
                Some(current) if !current.is_empty() => PatchOperation::Replace {
                    path,
                    value: json!(value),
                },
                _ => PatchOperation::Add {
                    path,
                    value: json!(value),
                },
            }
        })
        .collect()
}

/// Escape a reference token as mandated by RFC 6901
pub fn escape_json_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::{INJECTED_STATUS, STATUS_ANNOTATION_KEY};
    use rstest::rstest;

    fn container(name: &str) -> Container {
        Container {
            name: name.to_owned(),
            image: Some(format!("{name}:latest")),
            ..Default::default()
        }
    }

    fn volume(name: &str) -> Volume {
        Volume {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn sidecar_config(containers: &[&str], volumes: &[&str]) -> SidecarConfig {
        SidecarConfig {
            containers: containers.iter().map(|n| container(n)).collect(),
            volumes: volumes.iter().map(|n| volume(n)).collect(),
        }
    }

    fn status_annotations() -> BTreeMap<String, String> {
        BTreeMap::from([(STATUS_ANNOTATION_KEY.to_owned(), INJECTED_STATUS.to_owned())])
    }

    fn workload(
        containers: &[Container],
        volumes: &[Volume],
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Value {
        let mut metadata = json!({"name": "workload", "namespace": "default"});
        if let Some(annotations) = annotations {
            metadata["annotations"] = json!(annotations);
        }
        let mut spec = json!({"containers": containers});
        if !volumes.is_empty() {
            spec["volumes"] = json!(volumes);
        }
        json!({"apiVersion": "v1", "kind": "Pod", "metadata": metadata, "spec": spec})
    }

    fn apply(document: &mut Value, patch: &[PatchOperation]) {
        let patch: json_patch::Patch =
            serde_json::from_value(serde_json::to_value(patch).unwrap()).unwrap();
        json_patch::patch(document, &patch.0).expect("patch should apply cleanly");
    }

    #[test]
    fn operations_wire_format() {
        let patch = vec![
            PatchOperation::Add {
                path: "/a".to_owned(),
                value: json!(1),
            },
            PatchOperation::Replace {
                path: "/b".to_owned(),
                value: json!("x"),
            },
            PatchOperation::Remove {
                path: "/c".to_owned(),
            },
        ];

        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([
                {"op": "add", "path": "/a", "value": 1},
                {"op": "replace", "path": "/b", "value": "x"},
                {"op": "remove", "path": "/c"},
            ])
        );
    }

    #[test]
    fn empty_original_containers_creates_the_array_first() {
        let config = sidecar_config(&["proxy", "logger", "metrics"], &[]);

        let patch = build_patch(&[], &[], None, &config, &BTreeMap::new());

        assert_eq!(patch.len(), 3);
        assert_eq!(patch[0].path(), CONTAINERS_PATH);
        assert_eq!(patch[0].value(), Some(&json!([container("proxy")])));
        assert_eq!(patch[1].path(), "/spec/containers/-");
        assert_eq!(patch[1].value(), Some(&json!(container("logger"))));
        assert_eq!(patch[2].path(), "/spec/containers/-");
        assert_eq!(patch[2].value(), Some(&json!(container("metrics"))));
    }

    #[test]
    fn non_empty_original_containers_only_appends() {
        let config = sidecar_config(&["proxy", "logger"], &[]);

        let patch = build_patch(&[container("app")], &[], None, &config, &BTreeMap::new());

        assert_eq!(patch.len(), 2);
        assert!(patch
            .iter()
            .all(|op| matches!(op, PatchOperation::Add { path, .. } if path == "/spec/containers/-")));
    }

    #[rstest]
    #[case::no_original_volumes(&[], &[VOLUMES_PATH, "/spec/volumes/-"])]
    #[case::with_original_volumes(&["data"], &["/spec/volumes/-", "/spec/volumes/-"])]
    fn volumes_follow_the_container_algorithm(
        #[case] original: &[&str],
        #[case] expected_paths: &[&str],
    ) {
        let config = sidecar_config(&[], &["proxy-config", "proxy-certs"]);
        let original: Vec<Volume> = original.iter().map(|n| volume(n)).collect();

        let patch = build_patch(&[container("app")], &original, None, &config, &BTreeMap::new());

        let paths: Vec<&str> = patch.iter().map(|op| op.path()).collect();
        assert_eq!(paths, expected_paths);
    }

    #[test]
    fn empty_sidecar_config_only_touches_annotations() {
        let patch = build_patch(
            &[container("app")],
            &[],
            None,
            &SidecarConfig::default(),
            &status_annotations(),
        );

        assert_eq!(
            patch,
            vec![PatchOperation::Add {
                path: ANNOTATIONS_PATH.to_owned(),
                value: json!({STATUS_ANNOTATION_KEY: INJECTED_STATUS}),
            }]
        );
    }

    #[test]
    fn nothing_to_do() {
        let patch = build_patch(
            &[container("app")],
            &[],
            None,
            &SidecarConfig::default(),
            &BTreeMap::new(),
        );
        assert!(patch.is_empty());
    }

    #[test]
    fn operations_are_ordered_containers_volumes_annotations() {
        let config = sidecar_config(&["proxy"], &["proxy-config"]);

        let patch = build_patch(
            &[container("app")],
            &[volume("data")],
            None,
            &config,
            &status_annotations(),
        );

        let paths: Vec<&str> = patch.iter().map(|op| op.path()).collect();
        assert_eq!(
            paths,
            vec!["/spec/containers/-", "/spec/volumes/-", ANNOTATIONS_PATH]
        );
    }

    #[test]
    fn absent_annotations_are_created_with_a_single_operation() {
        let added = BTreeMap::from([
            (STATUS_ANNOTATION_KEY.to_owned(), INJECTED_STATUS.to_owned()),
            ("example.com/version".to_owned(), "1".to_owned()),
        ]);

        let patch = build_patch(&[], &[], None, &SidecarConfig::default(), &added);

        assert_eq!(
            patch,
            vec![PatchOperation::Add {
                path: ANNOTATIONS_PATH.to_owned(),
                value: json!({
                    STATUS_ANNOTATION_KEY: INJECTED_STATUS,
                    "example.com/version": "1",
                }),
            }]
        );
    }

    #[test]
    fn existing_annotations_are_updated_through_the_key_path() {
        let original = BTreeMap::from([("app".to_owned(), "nginx".to_owned())]);

        let patch = build_patch(
            &[],
            &[],
            Some(&original),
            &SidecarConfig::default(),
            &status_annotations(),
        );

        assert_eq!(
            patch,
            vec![PatchOperation::Add {
                path: "/metadata/annotations/sidecar-injector-webhook.nginx.sidecar~1status"
                    .to_owned(),
                value: json!(INJECTED_STATUS),
            }]
        );
    }

    #[test]
    fn existing_value_is_replaced() {
        let original = BTreeMap::from([(STATUS_ANNOTATION_KEY.to_owned(), "pending".to_owned())]);

        let patch = build_patch(
            &[],
            &[],
            Some(&original),
            &SidecarConfig::default(),
            &status_annotations(),
        );

        assert_eq!(
            patch,
            vec![PatchOperation::Replace {
                path: "/metadata/annotations/sidecar-injector-webhook.nginx.sidecar~1status"
                    .to_owned(),
                value: json!(INJECTED_STATUS),
            }]
        );
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a/b", "a~1b")]
    #[case("a~b", "a~0b")]
    #[case("~/", "~0~1")]
    fn escape_tokens(#[case] token: &str, #[case] expected: &str) {
        assert_eq!(escape_json_pointer_token(token), expected);
    }

    #[rstest]
    #[case::nothing_existing(vec![], vec![], None)]
    #[case::existing_everything(
        vec![container("app")],
        vec![volume("data")],
        Some(BTreeMap::from([("app".to_owned(), "nginx".to_owned())])),
    )]
    #[case::empty_annotation_map(vec![container("app")], vec![], Some(BTreeMap::new()))]
    #[case::stale_status(
        vec![container("app"), container("worker")],
        vec![],
        Some(BTreeMap::from([(STATUS_ANNOTATION_KEY.to_owned(), "".to_owned())])),
    )]
    fn applying_the_patch_appends_sidecars(
        #[case] containers: Vec<Container>,
        #[case] volumes: Vec<Volume>,
        #[case] annotations: Option<BTreeMap<String, String>>,
    ) {
        let config = sidecar_config(&["proxy", "logger"], &["proxy-config", "proxy-certs"]);
        let mut document = workload(&containers, &volumes, annotations.as_ref());

        let patch = build_patch(
            &containers,
            &volumes,
            annotations.as_ref(),
            &config,
            &status_annotations(),
        );
        apply(&mut document, &patch);

        let expected_containers: Vec<Container> = containers
            .iter()
            .chain(config.containers.iter())
            .cloned()
            .collect();
        let expected_volumes: Vec<Volume> = volumes
            .iter()
            .chain(config.volumes.iter())
            .cloned()
            .collect();
        assert_eq!(document["spec"]["containers"], json!(expected_containers));
        assert_eq!(document["spec"]["volumes"], json!(expected_volumes));
        assert_eq!(
            document["metadata"]["annotations"][STATUS_ANNOTATION_KEY],
            json!(INJECTED_STATUS)
        );

        for (key, value) in annotations.unwrap_or_default() {
            if key != STATUS_ANNOTATION_KEY {
                assert_eq!(document["metadata"]["annotations"][key.as_str()], json!(value));
            }
        }
    }
}
