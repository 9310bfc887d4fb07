use async_trait::async_trait;
use reqwest::Client;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::TtsConfig;
use crate::error::{Result, VerbaError};
use super::{SpeechBackend, SpeechModel};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coqui TTS backend: one `tts-server` process per resident voice.
pub struct CoquiBackend {
    binary_path: String,
    host: String,
    next_port: AtomicU32,
    startup_timeout: Duration,
    client: Client,
}

impl CoquiBackend {
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(VerbaError::Http)?;

        Ok(Self {
            binary_path: config.binary_path.clone(),
            host: config.host.clone(),
            next_port: AtomicU32::new(u32::from(config.base_port)),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            client,
        })
    }

    /// Next unused port. Fails once the range above `base_port` is exhausted.
    fn allocate_port(&self, model: &str) -> Result<u16> {
        let port = self.allocate_port(model)?;
        u16::try_from(port).map_err(|_| VerbaError::ModelLoad {
            model: model.to_string(),
            reason: "No free port left for another speech server".to_string(),
        })
    }

    /// Hand `port` back after a failed load, unless a later load already took the next one.
    fn release_port(&self, port: u16) {
        let _ = self.next_port.compare_exchange(
            u32::from(port) + 1,
            u32::from(port),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn spawn_server(&self, model: &str, port: u16) -> Result<Child> {
        debug!("Starting speech server: {} --model_name {} --port {}", self.binary_path, model, port);

        Command::new(&self.binary_path)
            .arg("--model_name")
            .arg(model)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VerbaError::ModelLoad {
                model: model.to_string(),
                reason: format!("Failed to start {}: {}", self.binary_path, e),
            })
    }

    /// Poll the server until it answers, exits, or the startup timeout passes.
    async fn wait_until_ready(&self, child: &mut Child, model: &str, base_url: &str) -> Result<()> {
        let started = Instant::now();

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(VerbaError::ModelLoad {
                    model: model.to_string(),
                    reason: format!("Speech server exited during startup with {}", status),
                });
            }

            if let Ok(response) = self.client.get(base_url).send().await {
                if response.status().is_success() {
                    return Ok(());
                }
            }

            if started.elapsed() >= self.startup_timeout {
                return Err(VerbaError::ModelLoad {
                    model: model.to_string(),
                    reason: format!("Speech server not ready after {:?}", self.startup_timeout),
                });
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl SpeechBackend for CoquiBackend {
    async fn probe(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("--help")
            .output()
            .await
            .map_err(|e| VerbaError::SynthesisUnavailable(format!("{} not found: {}", self.binary_path, e)))?;

        if output.status.success() {
            debug!("Speech backend is available: {}", self.binary_path);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(VerbaError::SynthesisUnavailable(format!(
                "{} --help failed: {}",
                self.binary_path,
                stderr.trim()
            )))
        }
    }

    async fn load(&self, model: &str) -> Result<Box<dyn SpeechModel>> {
        let port = self.allocate_port(model)?;
        let base_url = format!("http://{}:{}", self.host, port);
        info!("Loading speech model {} on {}", model, base_url);

        let mut child = match self.spawn_server(model, port) {
            Ok(child) => child,
            Err(e) => {
                self.release_port(port);
                return Err(e);
            }
        };

        if let Err(e) = self.wait_until_ready(&mut child, model, &base_url).await {
            // Dropping the child kills the half-started server
            drop(child);
            self.release_port(port);
            return Err(e);
        }

        info!("Speech model loaded: {}", model);
        Ok(Box::new(CoquiVoice {
            client: self.client.clone(),
            base_url,
            _server: Mutex::new(child),
        }))
    }
}

/// A running speech server. The process is killed when the voice is dropped.
pub struct CoquiVoice {
    client: Client,
    base_url: String,
    _server: Mutex<Child>,
}

#[async_trait]
impl SpeechModel for CoquiVoice {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/tts", self.base_url);

        let response = self.client
            .get(&url)
            .query(&[("text", text)])
            .send()
            .await
            .map_err(|e| VerbaError::Synthesis(format!("HTTP request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(VerbaError::Synthesis(format!("Speech server error {}: {}", status, error_text)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VerbaError::Synthesis(format!("Failed to read audio: {}", e)))?;

        Ok(bytes.to_vec())
    }
}
