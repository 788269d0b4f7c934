//! Container manifest for the pair and its admin UI.
//!
//! Renders a docker-compose file with one MySQL service per node, each on
//! its own named volume, and a phpMyAdmin service that lists every node as
//! a selectable server and keeps its configuration storage on the primary.

use std::collections::BTreeMap;

use pairctl_core::{Node, NodeRole, TopologyState};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for the rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// Network shared by all services.
    pub network: String,

    /// MySQL server image.
    pub mysql_image: String,

    /// phpMyAdmin image.
    pub admin_ui_image: String,

    /// Host port the admin UI is published on.
    pub admin_ui_port: u16,

    /// Database holding phpMyAdmin's configuration storage.
    pub pmadb: String,

    /// Environment variable the root password is read from at deploy time.
    pub root_password_env: String,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            network: "pairctl".to_string(),
            mysql_image: "mysql:8.0".to_string(),
            admin_ui_image: "phpmyadmin:5".to_string(),
            admin_ui_port: 8080,
            pmadb: "phpmyadmin".to_string(),
            root_password_env: "MYSQL_ROOT_PASSWORD".to_string(),
        }
    }
}

/// Service name of the admin UI.
pub const ADMIN_UI_SERVICE: &str = "phpmyadmin";

/// Renders the manifest as YAML.
pub fn generate_compose_yaml(topology: &TopologyState, settings: &ComposeSettings) -> Result<String> {
    let mut compose = ComposeFile::default();
    compose.networks.insert(
        settings.network.clone(),
        ComposeNetwork {
            driver: "bridge".to_string(),
        },
    );

    let mut nodes: Vec<&Node> = topology.nodes().collect();
    nodes.sort_by_key(|n| (n.role != NodeRole::Primary, n.id));

    for node in &nodes {
        let volume = format!("{}-data", node.container_name());
        compose.volumes.insert(volume.clone(), ComposeVolume {});
        compose
            .services
            .insert(node.container_name().to_string(), mysql_service(node, &volume, topology, settings));
    }

    if let Some(primary) = nodes.iter().find(|n| n.is_primary()) {
        compose
            .services
            .insert(ADMIN_UI_SERVICE.to_string(), admin_ui_service(primary, &nodes, settings));
    }

    Ok(serde_yaml::to_string(&compose)?)
}

fn mysql_service(node: &Node, volume: &str, topology: &TopologyState, settings: &ComposeSettings) -> ComposeService {
    let mut command = vec![
        format!("--server-id={}", node.id.inner()),
        "--gtid-mode=ON".to_string(),
        "--enforce-gtid-consistency=ON".to_string(),
        "--log-bin=mysql-bin".to_string(),
        "--binlog-format=ROW".to_string(),
    ];
    let mut depends_on = Vec::new();
    if node.role == NodeRole::Replica {
        command.push("--read-only=ON".to_string());
        if let Ok(primary) = topology.primary() {
            depends_on.push(primary.container_name().to_string());
        }
    }

    ComposeService {
        image: settings.mysql_image.clone(),
        container_name: Some(node.container_name().to_string()),
        hostname: Some(node.container_name().to_string()),
        networks: vec![settings.network.clone()],
        ports: vec![format!("{}:3306", node.address.port)],
        environment: BTreeMap::from([(
            "MYSQL_ROOT_PASSWORD".to_string(),
            format!("${{{}}}", settings.root_password_env),
        )]),
        command: Some(command),
        volumes: vec![format!("{}:/var/lib/mysql", volume)],
        depends_on,
        restart: "unless-stopped".to_string(),
        labels: BTreeMap::from([
            ("pairctl.node".to_string(), node.name.clone()),
            ("pairctl.role".to_string(), node.role.name().to_string()),
        ]),
        healthcheck: Some(HealthcheckConfig {
            test: vec![
                "CMD-SHELL".to_string(),
                format!("mysqladmin ping -h 127.0.0.1 -uroot -p\"$${}\"", settings.root_password_env),
            ],
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries: 10,
            start_period: "30s".to_string(),
        }),
    }
}

fn admin_ui_service(primary: &Node, nodes: &[&Node], settings: &ComposeSettings) -> ComposeService {
    let hosts: Vec<&str> = nodes.iter().map(|n| n.container_name()).collect();
    let ports: Vec<&str> = nodes.iter().map(|_| "3306").collect();

    ComposeService {
        image: settings.admin_ui_image.clone(),
        container_name: Some(ADMIN_UI_SERVICE.to_string()),
        networks: vec![settings.network.clone()],
        ports: vec![format!("{}:80", settings.admin_ui_port)],
        environment: BTreeMap::from([
            ("PMA_HOSTS".to_string(), hosts.join(",")),
            ("PMA_PORTS".to_string(), ports.join(",")),
            ("PMA_PMADB".to_string(), settings.pmadb.clone()),
            ("PMA_CONTROLHOST".to_string(), primary.container_name().to_string()),
            ("PMA_CONTROLPORT".to_string(), "3306".to_string()),
        ]),
        depends_on: hosts.iter().map(|h| h.to_string()).collect(),
        restart: "unless-stopped".to_string(),
        labels: BTreeMap::from([("pairctl.role".to_string(), "admin-ui".to_string())]),
        ..Default::default()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    restart: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<HealthcheckConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeNetwork {
    driver: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeVolume {}

#[derive(Debug, Serialize, Deserialize)]
struct HealthcheckConfig {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}
