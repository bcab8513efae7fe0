//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tpclash::config::{
    ConfigFetcher, FetchError, ParsedConfig, RawConfigSnapshot, ReloadMode, SupervisorConfig,
};
use tpclash::environment::{Environment, EnvironmentError};
use tpclash::observability::{EventSink, LifecycleEvent};
use tpclash::sidecar::{Sidecar, SidecarError};
use tpclash::supervisor::EngineLauncher;
use tpclash::ControlLoop;

/// A config with short timings and a scratch home.
pub fn test_config(home: &Path) -> SupervisorConfig {
    SupervisorConfig {
        home: home.to_path_buf(),
        check_interval: Duration::from_millis(20),
        reload_mode: ReloadMode::Restart,
        stop_grace_period: Duration::from_secs(2),
        restart_timeout: Duration::from_secs(2),
        sidecar_teardown_timeout: Duration::from_millis(300),
        ..Default::default()
    }
}

/// Engine configuration that passes validation.
pub fn clash_yaml(mode: &str, extra: &str) -> String {
    format!(
        "mode: {}\n{}dns:\n  enable: true\n  listen: 0.0.0.0:1053\ntun:\n  enable: true\n",
        mode, extra
    )
}

/// Fake engine: logs start/stop to `<home>/engine.log`, stops on SIGINT.
pub const ENGINE_SCRIPT: &str = r#"log="$4/engine.log"
echo "start $$ $(head -n 1 "$2")" >> "$log"
trap 'echo "stop $$" >> "$log"; exit 0' INT
while :; do sleep 0.05; done
"#;

/// Fake engine that dies on its own shortly after starting.
pub const CRASHING_ENGINE_SCRIPT: &str = r#"echo "start $$" >> "$4/engine.log"
sleep 0.3
exit 3
"#;

/// Install `script` as the engine binary, run through `/bin/sh`.
pub fn install_engine(config: &SupervisorConfig, script: &str) -> EngineLauncher {
    std::fs::write(config.engine_bin_path(), script).unwrap();
    EngineLauncher::for_engine(config).with_interpreter("/bin/sh")
}

pub fn engine_log(home: &Path) -> String {
    std::fs::read_to_string(home.join("engine.log")).unwrap_or_default()
}

pub fn engine_starts(home: &Path) -> usize {
    engine_log(home).lines().filter(|l| l.starts_with("start")).count()
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Fetcher serving whatever content the test last set.
pub struct MemoryFetcher {
    content: Mutex<Option<String>>,
}

impl MemoryFetcher {
    pub fn new(content: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            content: Mutex::new(Some(content.into())),
        })
    }

    pub fn set(&self, content: impl Into<String>) {
        *self.content.lock().unwrap() = Some(content.into());
    }

    /// Make every fetch fail.
    pub fn break_source(&self) {
        *self.content.lock().unwrap() = None;
    }
}

#[async_trait]
impl ConfigFetcher for MemoryFetcher {
    async fn fetch(&self) -> Result<RawConfigSnapshot, FetchError> {
        match self.content.lock().unwrap().clone() {
            Some(content) => Ok(RawConfigSnapshot::new(content)),
            None => Err(FetchError::Io {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("source unavailable"),
            }),
        }
    }
}

/// Records host environment calls.
#[derive(Default)]
pub struct RecordingEnvironment {
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_preconditions: bool,
}

impl RecordingEnvironment {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Environment for RecordingEnvironment {
    async fn apply_preconditions(&self) -> Result<(), EnvironmentError> {
        self.record("preconditions");
        if self.fail_preconditions {
            return Err(EnvironmentError::Sysctl {
                key: "net.ipv4.ip_forward".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        Ok(())
    }

    async fn enable_docker_compat(&self) -> Result<(), EnvironmentError> {
        self.record("enable_docker_compat");
        Ok(())
    }

    async fn disable_docker_compat(&self) -> Result<(), EnvironmentError> {
        self.record("disable_docker_compat");
        Ok(())
    }
}

/// Records sidecar calls; can fail deploys or hang teardowns.
#[derive(Default)]
pub struct RecordingSidecar {
    pub calls: Mutex<Vec<String>>,
    pub fail_deploy: bool,
    /// Teardowns after a deploy never finish on their own.
    pub hang_teardown: bool,
}

impl RecordingSidecar {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sidecar for RecordingSidecar {
    async fn deploy(&self, _scope: &CancellationToken, config: &ParsedConfig) -> Result<(), SidecarError> {
        let controller = config.controller_endpoint().unwrap_or_default();
        self.calls.lock().unwrap().push(format!("deploy {}", controller));
        if self.fail_deploy {
            return Err(SidecarError::NoController);
        }
        Ok(())
    }

    async fn teardown(&self, scope: &CancellationToken) -> Result<(), SidecarError> {
        let deployed = {
            let mut calls = self.calls.lock().unwrap();
            let deployed = calls.iter().any(|c| c.starts_with("deploy"));
            calls.push("teardown".to_string());
            deployed
        };
        if self.hang_teardown && deployed {
            scope.cancelled().await;
            return Err(SidecarError::Cancelled);
        }
        Ok(())
    }
}

/// Test doubles wired into a control loop.
pub struct Harness {
    pub home: tempfile::TempDir,
    pub config: SupervisorConfig,
    pub fetcher: Arc<MemoryFetcher>,
    pub environment: Arc<RecordingEnvironment>,
    pub sidecar: Arc<RecordingSidecar>,
}

impl Harness {
    pub fn new(initial: impl Into<String>) -> Self {
        let home = tempfile::tempdir().unwrap();
        let config = test_config(home.path());
        Self {
            home,
            config,
            fetcher: MemoryFetcher::new(initial),
            environment: Arc::new(RecordingEnvironment::default()),
            sidecar: Arc::new(RecordingSidecar::default()),
        }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn live_config(&self) -> Option<String> {
        std::fs::read_to_string(self.config.internal_config_path()).ok()
    }

    /// Build the loop, running the fake engine unless `launcher` is given.
    pub fn control_loop(
        &self,
        launcher: Option<EngineLauncher>,
    ) -> (ControlLoop, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let launcher = launcher.unwrap_or_else(|| install_engine(&self.config, ENGINE_SCRIPT));
        let (events, rx) = EventSink::channel();
        let control = ControlLoop::new(self.config.clone())
            .with_fetcher(self.fetcher.clone())
            .with_environment(self.environment.clone())
            .with_sidecar(self.sidecar.clone())
            .with_launcher(launcher)
            .with_events(events);
        (control, rx)
    }
}

/// Everything emitted so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Variant names, for ordering assertions.
pub fn kinds(events: &[LifecycleEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            LifecycleEvent::PreconditionsApplied { .. } => "preconditions",
            LifecycleEvent::ConfigAccepted { .. } => "config_accepted",
            LifecycleEvent::ConfigRejected { .. } => "config_rejected",
            LifecycleEvent::ProcessStarted { .. } => "process_started",
            LifecycleEvent::DockerCompatEnabled { .. } => "compat_enabled",
            LifecycleEvent::ReloadWatchStarted => "watch_started",
            LifecycleEvent::SidecarTornDown { .. } => "sidecar_torn_down",
            LifecycleEvent::SidecarDeployed { .. } => "sidecar_deployed",
            LifecycleEvent::ConfigUnchanged { .. } => "config_unchanged",
            LifecycleEvent::ConfigReloaded { .. } => "config_reloaded",
            LifecycleEvent::ShutdownTriggered { .. } => "shutdown_triggered",
            LifecycleEvent::DockerCompatDisabled { .. } => "compat_disabled",
            LifecycleEvent::ProcessStopRequested { .. } => "stop_requested",
            LifecycleEvent::Stopped => "stopped",
        })
        .collect()
}

/// Teardown runs compat reversal, sidecar teardown, then the graceful stop.
pub fn assert_teardown_order(kinds: &[&str]) {
    let position = |kind: &str| {
        kinds
            .iter()
            .rposition(|k| *k == kind)
            .unwrap_or_else(|| panic!("missing {} in {:?}", kind, kinds))
    };
    let compat_off = position("compat_disabled");
    let torn_down = position("sidecar_torn_down");
    let stop = position("stop_requested");
    let stopped = position("stopped");
    assert!(position("shutdown_triggered") < compat_off, "{:?}", kinds);
    assert!(compat_off < torn_down, "{:?}", kinds);
    assert!(torn_down < stop, "{:?}", kinds);
    assert!(stop < stopped, "{:?}", kinds);
}

/// One request seen by the mock controller.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub headers: Vec<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Start a programmable mock controller on an ephemeral port.
///
/// Every request is recorded; `f` decides the status and body.
pub async fn start_programmable_backend<F, Fut>(
    f: F,
) -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let requests = recorded.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        requests.lock().unwrap().push(request);

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            204 => "204 No Content",
                            400 => "400 Bad Request",
                            401 => "401 Unauthorized",
                            500 => "500 Internal Server Error",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, recorded)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<String> = lines.map(str::to_string).collect();

    let length = headers
        .iter()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}
