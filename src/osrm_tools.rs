//! OSRM toolchain driver: graph preparation, contraction and `osrm-routed`
//! servers, run either from the local PATH or through docker.

use std::collections::HashMap;
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{DurationMatrix, RouteSummary, RoutingEngine, Scenario};
use crate::error::EngineError;
use crate::model::Coordinate;
use crate::osrm::{OsrmClient, OsrmConfig};

/// How OSRM binaries are invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Launcher {
    Native,
    Docker { image: String },
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::Docker {
            image: "osrm/osrm-backend".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmToolsConfig {
    pub launcher: Launcher,
    /// Profile name used in HTTP request paths.
    pub profile: String,
    /// Lua profile passed to `osrm-extract`.
    pub extract_profile: String,
    /// File name of the graph inside every scenario directory.
    pub graph_file: String,
    pub max_table_size: usize,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for OsrmToolsConfig {
    fn default() -> Self {
        Self {
            launcher: Launcher::default(),
            profile: "car".to_string(),
            extract_profile: "/opt/car.lua".to_string(),
            graph_file: "roadnetwork.osrm".to_string(),
            max_table_size: 10_000,
            startup_timeout_secs: 120,
            request_timeout_secs: 600,
        }
    }
}

impl OsrmToolsConfig {
    /// Builds the command running `tool` with `data_dir` as working directory.
    /// Arguments must name files relative to `data_dir`.
    fn tool_command(&self, tool: &str, data_dir: &Path, args: &[String]) -> Command {
        match &self.launcher {
            Launcher::Native => {
                let mut command = Command::new(tool);
                command.args(args).current_dir(data_dir);
                command
            }
            Launcher::Docker { image } => {
                let mut command = Command::new("docker");
                command
                    .arg("run")
                    .arg("--rm")
                    .arg("-v")
                    .arg(format!("{}:/data", data_dir.display()))
                    .arg("-w")
                    .arg("/data")
                    .arg(image)
                    .arg(tool)
                    .args(args);
                command
            }
        }
    }

    fn run_tool(&self, tool: &str, data_dir: &Path, args: &[String]) -> Result<(), EngineError> {
        let output = self.tool_command(tool, data_dir, args).output()?;
        if output.status.success() {
            debug!(tool, dir = %data_dir.display(), "tool finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            Err(EngineError::ProcessFailure {
                command: format!("{} {}", tool, args.join(" ")),
                status: format!("{} ({})", output.status, tail),
            })
        }
    }
}

/// Runs `osrm-extract` and `osrm-contract` on `osm_file` inside `osrm_dir`,
/// skipping steps whose outputs already exist. Returns the base scenario.
pub fn prepare_base_graph(
    config: &OsrmToolsConfig,
    osm_file: &Path,
    osrm_dir: &Path,
) -> Result<Scenario, EngineError> {
    let osrm_dir = if osrm_dir.is_absolute() {
        osrm_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(osrm_dir)
    };
    fs::create_dir_all(&osrm_dir)?;

    let osm_name = file_name(osm_file);
    let local_osm = osrm_dir.join(&osm_name);
    if !local_osm.exists() {
        fs::copy(osm_file, &local_osm)?;
    }

    let graph_file = graph_file_for(&osm_name);
    let graph = osrm_dir.join(&graph_file);

    if !graph.with_extension("osrm.ebg").exists() {
        info!(osm = %osm_name, "running osrm-extract");
        config.run_tool(
            "osrm-extract",
            &osrm_dir,
            &["-p".to_string(), config.extract_profile.clone(), osm_name],
        )?;
    }

    if !graph.with_extension("osrm.hsgr").exists() {
        info!(graph = %graph_file, "running osrm-contract");
        config.run_tool("osrm-contract", &osrm_dir, &[graph_file.clone()])?;
    }

    Ok(Scenario::new(osrm_dir, graph_file))
}

/// `roadnetwork.osm.pbf` -> `roadnetwork.osrm`.
fn graph_file_for(osm_name: &str) -> String {
    let stem = osm_name
        .strip_suffix(".osm.pbf")
        .or_else(|| osm_name.strip_suffix(".osm"))
        .or_else(|| osm_name.strip_suffix(".pbf"))
        .unwrap_or(osm_name);
    format!("{}.osrm", stem)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}

/// An `osrm-routed` process serving one scenario on a private port.
pub struct RoutedServer {
    child: Child,
    container: Option<String>,
    client: OsrmClient,
}

impl RoutedServer {
    pub fn start(config: &OsrmToolsConfig, scenario: &Scenario) -> Result<Self, EngineError> {
        if !scenario.dir().is_dir() {
            return Err(EngineError::MissingGraph(scenario.graph_path()));
        }

        let port = free_port()?;
        let serve_args = vec![
            "--algorithm".to_string(),
            "ch".to_string(),
            "--max-table-size".to_string(),
            config.max_table_size.to_string(),
        ];

        let (mut command, container) = match &config.launcher {
            Launcher::Native => {
                let mut command = Command::new("osrm-routed");
                command
                    .args(&serve_args)
                    .arg("--ip")
                    .arg("127.0.0.1")
                    .arg("--port")
                    .arg(port.to_string())
                    .arg(scenario.graph_file())
                    .current_dir(scenario.dir());
                (command, None)
            }
            Launcher::Docker { image } => {
                let name = format!("osrm-eaul-{}-{}", std::process::id(), port);
                let mut command = Command::new("docker");
                command
                    .arg("run")
                    .arg("--rm")
                    .arg("--name")
                    .arg(&name)
                    .arg("-p")
                    .arg(format!("127.0.0.1:{}:5000", port))
                    .arg("-v")
                    .arg(format!("{}:/data", scenario.dir().display()))
                    .arg("-w")
                    .arg("/data")
                    .arg(image)
                    .arg("osrm-routed")
                    .args(&serve_args)
                    .arg(scenario.graph_file());
                (command, Some(name))
            }
        };

        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let client = OsrmClient::new(OsrmConfig {
            base_url: format!("http://127.0.0.1:{}", port),
            profile: config.profile.clone(),
            timeout_secs: config.request_timeout_secs,
        })?;

        let mut server = Self {
            child,
            container,
            client,
        };
        server.wait_ready(port, config.startup_timeout_secs)?;
        debug!(port, scenario = %scenario.dir().display(), "osrm-routed ready");
        Ok(server)
    }

    fn wait_ready(&mut self, port: u16, timeout_secs: u64) -> Result<(), EngineError> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(timeout_secs) {
            if let Some(status) = self.child.try_wait()? {
                return Err(EngineError::ProcessFailure {
                    command: "osrm-routed".to_string(),
                    status: status.to_string(),
                });
            }
            if self.client.is_ready() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(250));
        }
        Err(EngineError::StartupTimeout { port, timeout_secs })
    }

    pub fn client(&self) -> &OsrmClient {
        &self.client
    }
}

impl Drop for RoutedServer {
    fn drop(&mut self) {
        if let Some(name) = &self.container {
            // Killing the docker CLI leaves the container running.
            let _ = Command::new("docker")
                .args(["stop", name.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        if let Err(err) = self.child.kill() {
            debug!(error = %err, "osrm-routed already exited");
        }
        let _ = self.child.wait();
    }
}

fn free_port() -> Result<u16, EngineError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

type ServerSlot = Arc<Mutex<Option<Arc<RoutedServer>>>>;

/// [`RoutingEngine`] backed by the OSRM command line tools.
///
/// One `osrm-routed` is started lazily per scenario and kept until
/// [`RoutingEngine::release`] is called for it or the engine is dropped.
pub struct OsrmEngine {
    config: OsrmToolsConfig,
    servers: Mutex<HashMap<PathBuf, ServerSlot>>,
}

impl OsrmEngine {
    pub fn new(config: OsrmToolsConfig) -> Self {
        Self {
            config,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OsrmToolsConfig {
        &self.config
    }

    fn server(&self, scenario: &Scenario) -> Result<Arc<RoutedServer>, EngineError> {
        let slot = {
            let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
            servers
                .entry(scenario.dir().to_path_buf())
                .or_default()
                .clone()
        };

        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(server) = slot.as_ref() {
            return Ok(server.clone());
        }
        let server = Arc::new(RoutedServer::start(&self.config, scenario)?);
        *slot = Some(server.clone());
        Ok(server)
    }
}

impl RoutingEngine for OsrmEngine {
    fn table(
        &self,
        scenario: &Scenario,
        coordinates: &[Coordinate],
    ) -> Result<DurationMatrix, EngineError> {
        self.server(scenario)?.client().table(coordinates)
    }

    fn route(
        &self,
        scenario: &Scenario,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<RouteSummary, EngineError> {
        self.server(scenario)?.client().route(from, to)
    }

    fn contract(&self, scenario: &Scenario, speed_file: &Path) -> Result<(), EngineError> {
        // A running server would keep serving the old weights.
        self.release(scenario);

        let speed_arg = speed_file
            .strip_prefix(scenario.dir())
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| speed_file.display().to_string());
        if matches!(self.config.launcher, Launcher::Docker { .. })
            && speed_file.strip_prefix(scenario.dir()).is_err()
        {
            warn!(file = %speed_file.display(), "speed file outside the mounted scenario directory");
        }

        self.config.run_tool(
            "osrm-contract",
            scenario.dir(),
            &[
                "--segment-speed-file".to_string(),
                speed_arg,
                scenario.graph_file().to_string(),
            ],
        )
    }

    fn release(&self, scenario: &Scenario) {
        let removed = self
            .servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(scenario.dir());
        if removed.is_some() {
            debug!(scenario = %scenario.dir().display(), "stopping osrm-routed");
        }
    }
}
