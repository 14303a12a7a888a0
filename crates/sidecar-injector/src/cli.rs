use clap::builder::PossibleValue;
use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    let mut args = vec![
        Arg::new("log-level")
            .long("log-level")
            .value_name("LOG_LEVEL")
            .env("SIDECAR_INJECTOR_LOG_LEVEL")
            .default_value("info")
            .value_parser([
                PossibleValue::new("trace"),
                PossibleValue::new("debug"),
                PossibleValue::new("info"),
                PossibleValue::new("warn"),
                PossibleValue::new("error"),
            ])
            .help("Log level"),
        Arg::new("log-fmt")
            .long("log-fmt")
            .value_name("LOG_FMT")
            .env("SIDECAR_INJECTOR_LOG_FMT")
            .default_value("text")
            .value_parser([PossibleValue::new("text"), PossibleValue::new("json")])
            .help("Log output format"),
        Arg::new("log-no-color")
            .long("log-no-color")
            .env("NO_COLOR")
            .action(ArgAction::SetTrue)
            .help("Disable colored output for logs"),
        Arg::new("address")
            .long("addr")
            .value_name("BIND_ADDRESS")
            .default_value("0.0.0.0")
            .env("SIDECAR_INJECTOR_BIND_ADDRESS")
            .help("Bind against ADDRESS"),
        Arg::new("port")
            .long("port")
            .value_name("PORT")
            .default_value("8443")
            .env("SIDECAR_INJECTOR_PORT")
            .help("Listen on PORT"),
        Arg::new("cert-file")
            .long("cert-file")
            .value_name("CERT_FILE")
            .default_value("")
            .env("SIDECAR_INJECTOR_CERT_FILE")
            .help("Path to an X.509 certificate file for HTTPS"),
        Arg::new("key-file")
            .long("key-file")
            .value_name("KEY_FILE")
            .default_value("")
            .env("SIDECAR_INJECTOR_KEY_FILE")
            .help("Path to an X.509 private key file for HTTPS"),
        Arg::new("sidecar-config")
            .long("sidecar-config")
            .value_name("SIDECAR_CONFIG_FILE")
            .default_value("/etc/webhook/config/sidecarconfig.yaml")
            .env("SIDECAR_INJECTOR_SIDECAR_CONFIG")
            .help("YAML file holding the containers and volumes to be injected"),
        Arg::new("ignored-namespaces")
            .long("ignored-namespaces")
            .value_name("NAMESPACES")
            .value_delimiter(',')
            .default_value("kube-system,kube-public")
            .env("SIDECAR_INJECTOR_IGNORED_NAMESPACES")
            .help("Comma separated list of namespaces whose workloads are never mutated"),
    ];
    args.sort_by(|a, b| a.get_id().cmp(b.get_id()));

    Command::new(crate_name!())
        .author(crate_authors!())
        .version(crate_version!())
        .about(crate_description!())
        .args(args)
}
