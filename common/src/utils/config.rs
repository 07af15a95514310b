use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::jobs::FailurePolicy;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_batch_name")]
    pub batch_name: String,
    #[serde(default = "default_artifact_formats")]
    pub artifact_formats: Vec<String>,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_publish_dir")]
    pub publish_dir: String,
    #[serde(default = "default_delivery_retries")]
    pub delivery_retries: usize,
    #[serde(default)]
    pub fan_out_failure_policy: FailurePolicy,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_batch_name() -> String {
    "00".to_string()
}

fn default_artifact_formats() -> Vec<String> {
    vec![".txt".to_string(), ".docx".to_string()]
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_publish_dir() -> String {
    "./public".to_string()
}

fn default_delivery_retries() -> usize {
    3
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "orca".to_string(),
            surrealdb_database: "orca".to_string(),
            data_dir: default_data_dir(),
            batch_name: default_batch_name(),
            artifact_formats: default_artifact_formats(),
            public_base_url: default_public_base_url(),
            storage: default_storage_kind(),
            publish_dir: default_publish_dir(),
            delivery_retries: default_delivery_retries(),
            fan_out_failure_policy: FailurePolicy::default(),
        }
    }
}

impl AppConfig {
    /// Public URL prefix for delivered artifacts, without a trailing slash.
    pub fn public_base(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("artifact_formats"),
        )
        .build()?;

    config.try_deserialize()
}
