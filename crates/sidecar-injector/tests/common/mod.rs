use axum::Router;
use sidecar_injector::{
    config::{read_sidecar_config_file, Config},
    injection::DEFAULT_IGNORED_NAMESPACES,
    SidecarInjector,
};
use std::{net::SocketAddr, path::Path};

pub(crate) fn default_test_config() -> Config {
    let sidecar_config = read_sidecar_config_file(Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/sidecarconfig.yaml"
    )))
    .unwrap();

    Config {
        addr: SocketAddr::from(([127, 0, 0, 1], 8443)),
        tls_config: None,
        sidecar_config,
        ignored_namespaces: DEFAULT_IGNORED_NAMESPACES
            .iter()
            .map(|ns| ns.to_string())
            .collect(),
        log_level: "info".to_owned(),
        log_fmt: "json".to_owned(),
        log_no_color: false,
    }
}

pub(crate) async fn app(config: Config) -> Router {
    let server = SidecarInjector::new_from_config(config).await.unwrap();

    server.router()
}
