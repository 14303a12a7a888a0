use anyhow::{anyhow, Result};
use clap::ArgMatches;
use k8s_openapi::api::core::v1::{Container, Volume};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::injection::defaults::apply_defaults;

lazy_static! {
    pub(crate) static ref HOSTNAME: String =
        std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));
}

pub struct Config {
    pub addr: SocketAddr,
    pub tls_config: Option<TlsConfig>,
    pub sidecar_config: SidecarConfig,
    pub ignored_namespaces: BTreeSet<String>,
    pub log_level: String,
    pub log_fmt: String,
    pub log_no_color: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let addr = api_bind_address(matches)?;
        let tls_config = tls_config(matches)?;

        let sidecar_config_file = Path::new(string_arg(matches, "sidecar-config")?);
        let sidecar_config = read_sidecar_config_file(sidecar_config_file)?;

        let ignored_namespaces = matches
            .get_many::<String>("ignored-namespaces")
            .map(|values| {
                values
                    .map(|ns| ns.trim())
                    .filter(|ns| !ns.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let log_level = string_arg(matches, "log-level")?.to_owned();
        let log_fmt = string_arg(matches, "log-fmt")?.to_owned();
        let log_no_color = matches.get_flag("log-no-color");

        Ok(Self {
            addr,
            tls_config,
            sidecar_config,
            ignored_namespaces,
            log_level,
            log_fmt,
            log_no_color,
        })
    }
}

fn string_arg<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| anyhow!("error parsing arguments: missing value for {}", id))
}

fn api_bind_address(matches: &ArgMatches) -> Result<SocketAddr> {
    format!(
        "{}:{}",
        string_arg(matches, "address")?,
        string_arg(matches, "port")?
    )
    .parse()
    .map_err(|e| anyhow!("error parsing arguments: {}", e))
}

fn tls_config(matches: &ArgMatches) -> Result<Option<TlsConfig>> {
    let cert_file = string_arg(matches, "cert-file")?;
    let key_file = string_arg(matches, "key-file")?;
    match (cert_file.is_empty(), key_file.is_empty()) {
        (true, true) => Ok(None),
        (false, false) => Ok(Some(TlsConfig {
            cert_file: PathBuf::from(cert_file),
            key_file: PathBuf::from(key_file),
        })),
        _ => Err(anyhow!("error parsing arguments: either both --cert-file and --key-file must be provided, or neither")),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read sidecar configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse sidecar configuration {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid sidecar configuration: {0}")]
    Invalid(String),
}

/// The containers and volumes added to every workload requesting the
/// injection.
///
/// ```yaml
/// containers:
///   - name: sidecar-nginx
///     image: nginx:1.25
/// volumes:
///   - name: nginx-conf
///     configMap:
///       name: nginx-configmap
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SidecarConfig {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl SidecarConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut container_names = BTreeSet::new();
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(ConfigError::Invalid(
                    "container without name".to_owned(),
                ));
            }
            if container.image.as_deref().unwrap_or_default().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "container {} has no image",
                    container.name
                )));
            }
            if !container_names.insert(container.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicated container name {}",
                    container.name
                )));
            }
        }

        let mut volume_names = BTreeSet::new();
        for volume in &self.volumes {
            if volume.name.is_empty() {
                return Err(ConfigError::Invalid("volume without name".to_owned()));
            }
            if !volume_names.insert(volume.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicated volume name {}",
                    volume.name
                )));
            }
        }

        Ok(())
    }
}

/// Load the sidecar configuration from a YAML file. The returned
/// configuration is validated and already carries the Kubernetes defaults.
pub fn read_sidecar_config_file(path: &Path) -> Result<SidecarConfig, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut sidecar_config: SidecarConfig =
        serde_yaml::from_reader(&file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    sidecar_config.validate()?;
    apply_defaults(
        &mut sidecar_config.containers,
        &mut sidecar_config.volumes,
    );

    Ok(sidecar_config)
}
