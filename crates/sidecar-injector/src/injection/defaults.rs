use k8s_openapi::api::core::v1::{Container, Volume};

pub const DEFAULT_TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";
pub const DEFAULT_TERMINATION_MESSAGE_POLICY: &str = "File";
pub const DEFAULT_PORT_PROTOCOL: &str = "TCP";
/// 0644, the mode used by Kubernetes for projected files
pub const DEFAULT_VOLUME_MODE: i32 = 0o644;

const PULL_ALWAYS: &str = "Always";
const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Fill the fields Kubernetes would default when the sidecars were
/// submitted as part of a Pod. Values that are already set are kept.
///
/// Injected containers are not defaulted by the API server once they are
/// part of a patch, doing that here keeps the persisted object stable.
pub fn apply_defaults(containers: &mut [Container], volumes: &mut [Volume]) {
    containers.iter_mut().for_each(default_container);
    volumes.iter_mut().for_each(default_volume);
}

fn default_container(container: &mut Container) {
    container
        .termination_message_path
        .get_or_insert_with(|| DEFAULT_TERMINATION_MESSAGE_PATH.to_owned());
    container
        .termination_message_policy
        .get_or_insert_with(|| DEFAULT_TERMINATION_MESSAGE_POLICY.to_owned());

    if container.image_pull_policy.is_none() {
        container.image_pull_policy = container
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .map(|image| image_pull_policy(image).to_owned());
    }

    for port in container.ports.iter_mut().flatten() {
        port.protocol
            .get_or_insert_with(|| DEFAULT_PORT_PROTOCOL.to_owned());
    }
}

/// Images without a tag, or using the `latest` one, are always pulled.
/// Everything else, including images referenced by digest, is pulled only
/// when missing.
fn image_pull_policy(image: &str) -> &'static str {
    if image.contains('@') {
        return PULL_IF_NOT_PRESENT;
    }

    // a colon before the last slash belongs to the registry host:port
    let name = image.rsplit('/').next().unwrap_or(image);
    match name.split_once(':') {
        Some((_, tag)) if tag != "latest" => PULL_IF_NOT_PRESENT,
        _ => PULL_ALWAYS,
    }
}

fn default_volume(volume: &mut Volume) {
    if let Some(config_map) = volume.config_map.as_mut() {
        config_map.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
    }
    if let Some(secret) = volume.secret.as_mut() {
        secret.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
    }
    if let Some(downward_api) = volume.downward_api.as_mut() {
        downward_api.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
    }
    if let Some(projected) = volume.projected.as_mut() {
        projected.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
    }
    if let Some(host_path) = volume.host_path.as_mut() {
        host_path.type_.get_or_insert_with(String::new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ConfigMapVolumeSource, ContainerPort, EmptyDirVolumeSource, SecretVolumeSource,
    };
    use rstest::rstest;

    #[rstest]
    #[case("nginx", PULL_ALWAYS)]
    #[case("nginx:latest", PULL_ALWAYS)]
    #[case("nginx:1.25", PULL_IF_NOT_PRESENT)]
    #[case("registry.local:5000/nginx", PULL_ALWAYS)]
    #[case("registry.local:5000/team/nginx:1.25", PULL_IF_NOT_PRESENT)]
    #[case("nginx@sha256:0123456789abcdef", PULL_IF_NOT_PRESENT)]
    fn pull_policy_from_image(#[case] image: &str, #[case] expected: &str) {
        assert_eq!(image_pull_policy(image), expected);
    }

    #[test]
    fn container_defaults() {
        let mut containers = vec![Container {
            name: "proxy".to_owned(),
            image: Some("nginx:1.25".to_owned()),
            ports: Some(vec![ContainerPort {
                container_port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }];

        apply_defaults(&mut containers, &mut []);

        let container = &containers[0];
        assert_eq!(
            container.termination_message_path.as_deref(),
            Some(DEFAULT_TERMINATION_MESSAGE_PATH)
        );
        assert_eq!(
            container.termination_message_policy.as_deref(),
            Some(DEFAULT_TERMINATION_MESSAGE_POLICY)
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some(PULL_IF_NOT_PRESENT));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].protocol.as_deref(),
            Some(DEFAULT_PORT_PROTOCOL)
        );
    }

    #[test]
    fn explicit_container_values_are_kept() {
        let original = Container {
            name: "proxy".to_owned(),
            image: Some("nginx".to_owned()),
            image_pull_policy: Some("Never".to_owned()),
            termination_message_path: Some("/tmp/log".to_owned()),
            termination_message_policy: Some("FallbackToLogsOnError".to_owned()),
            ports: Some(vec![ContainerPort {
                container_port: 53,
                protocol: Some("UDP".to_owned()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let mut containers = vec![original.clone()];

        apply_defaults(&mut containers, &mut []);

        assert_eq!(containers[0], original);
    }

    #[test]
    fn container_without_image_gets_no_pull_policy() {
        let mut containers = vec![Container {
            name: "proxy".to_owned(),
            ..Default::default()
        }];

        apply_defaults(&mut containers, &mut []);

        assert!(containers[0].image_pull_policy.is_none());
    }

    #[test]
    fn volume_defaults() {
        let mut volumes = vec![
            Volume {
                name: "config".to_owned(),
                config_map: Some(ConfigMapVolumeSource::default()),
                ..Default::default()
            },
            Volume {
                name: "certs".to_owned(),
                secret: Some(SecretVolumeSource {
                    default_mode: Some(0o400),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: "scratch".to_owned(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        ];
        let scratch = volumes[2].clone();

        apply_defaults(&mut [], &mut volumes);

        assert_eq!(
            volumes[0].config_map.as_ref().unwrap().default_mode,
            Some(DEFAULT_VOLUME_MODE)
        );
        assert_eq!(volumes[1].secret.as_ref().unwrap().default_mode, Some(0o400));
        assert_eq!(volumes[2], scratch);
    }
}
