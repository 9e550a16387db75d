/// mpv-backed media element.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
///
///   MpvElement
///         └── event_pump    ← folds events into a watch channel, forwards
///                             stream errors to the session as MediaError
///                             unless a play() call is waiting to report them
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docta_core::error::PlaybackError;
use docta_core::playback::{MediaElement, ReadyState};
use docta_core::SessionEvent;
use docta_proto::protocol::StreamEndpoint;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `core-idle`.
pub const OBS_CORE_IDLE: u64 = 1;

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `end-file` caused by a broken stream rather than a stop or replace.
    pub fn stream_failure(&self) -> Option<String> {
        if self.event_name()? != "end-file" {
            return None;
        }
        let reason = self.raw.get("reason")?.as_str()?;
        if !matches!(reason, "error" | "network") {
            return None;
        }
        let detail = self
            .raw
            .get("file_error")
            .and_then(Value::as_str)
            .unwrap_or(reason);
        Some(format!("mpv end-file ({}): {}", reason, detail))
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_core_idle(&self) {
        match self
            .send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
            .await
        {
            Ok(_) => debug!("mpv: observing core-idle"),
            Err(e) => warn!("mpv: observe_property core-idle failed: {}", e),
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: docta_proto::platform::mpv_socket_name(),
            process: None,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary = docta_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(docta_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(volume).await?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process(volume).await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel, shared between writer (inserts) and reader (resolves)
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── media element ─────────────────────────────────────────────────────────────

/// What mpv has told us about the current file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observed {
    pub file_loaded: bool,
    pub core_idle: Option<bool>,
    pub failure: Option<String>,
}

impl Observed {
    pub fn ready_state(&self) -> ReadyState {
        match (self.file_loaded, self.core_idle) {
            (false, _) => ReadyState::HaveNothing,
            (true, Some(false)) => ReadyState::HaveEnoughData,
            (true, _) => ReadyState::HaveMetadata,
        }
    }

    /// Fold one mpv event in.  Returns a failure description for stream errors.
    pub fn apply(&mut self, evt: &MpvEvent) -> Option<String> {
        if let Some((OBS_CORE_IDLE, data)) = evt.as_property_change() {
            self.core_idle = data.as_bool();
            return None;
        }
        match evt.event_name() {
            Some("start-file") => {
                self.file_loaded = false;
                self.failure = None;
            }
            Some("file-loaded") => self.file_loaded = true,
            Some("idle") => self.file_loaded = false,
            Some("end-file") => {
                self.file_loaded = false;
                if let Some(reason) = evt.stream_failure() {
                    self.failure = Some(reason.clone());
                    return Some(reason);
                }
            }
            _ => {}
        }
        None
    }
}

pub struct MpvElement {
    driver: Mutex<MpvDriver>,
    handle: MpvHandle,
    source: std::sync::Mutex<Option<String>>,
    observed: watch::Receiver<Observed>,
    reset: watch::Sender<Observed>,
    awaiting_play: Arc<AtomicBool>,
    connect_timeout: Duration,
}

/// Marks a `play()` call in flight; cleared on every exit path.
struct PlayAttempt<'a>(&'a AtomicBool);

impl<'a> PlayAttempt<'a> {
    fn begin(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PlayAttempt<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MpvElement {
    /// Start mpv and the event pump.  Stream failures are reported to the
    /// session through `session_tx`.
    pub async fn launch(
        volume: f32,
        connect_timeout: Duration,
        session_tx: mpsc::Sender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(256);
        let mut driver = MpvDriver::new();
        let handle = driver.spawn_and_connect(volume, event_tx).await?;
        handle.observe_core_idle().await;

        let (reset, observed) = watch::channel(Observed::default());
        let awaiting_play = Arc::new(AtomicBool::new(false));
        tokio::spawn(event_pump(
            event_rx,
            reset.clone(),
            awaiting_play.clone(),
            session_tx,
        ));

        Ok(Self {
            driver: Mutex::new(driver),
            handle,
            source: std::sync::Mutex::new(None),
            observed,
            reset,
            awaiting_play,
            connect_timeout,
        })
    }

    fn bound_url(&self) -> Result<String, PlaybackError> {
        self.source
            .lock()
            .map_err(|_| PlaybackError::Media("source lock poisoned".into()))?
            .clone()
            .ok_or_else(|| PlaybackError::Media("no stream bound".into()))
    }

    pub async fn shutdown(&self) {
        info!("mpv: shutting down");
        let _ = self.handle.stop().await;
        self.driver.lock().await.kill().await;
    }
}

async fn event_pump(
    mut event_rx: mpsc::Receiver<MpvEvent>,
    observed: watch::Sender<Observed>,
    awaiting_play: Arc<AtomicBool>,
    session_tx: mpsc::Sender<SessionEvent>,
) {
    while let Some(evt) = event_rx.recv().await {
        let mut failure = None;
        let mut claimed = false;
        // Read the flag under the watch lock so a waiting play() cannot
        // settle between the two.
        observed.send_modify(|o| {
            failure = o.apply(&evt);
            claimed = awaiting_play.load(Ordering::SeqCst);
        });
        let Some(reason) = failure else {
            continue;
        };
        if claimed {
            debug!("mpv: {} (reported by play)", reason);
            continue;
        }
        warn!("mpv: {}", reason);
        if session_tx.send(SessionEvent::MediaError(reason)).await.is_err() {
            break;
        }
    }
    debug!("mpv: event pump exiting");
}

fn media_err(e: anyhow::Error) -> PlaybackError {
    PlaybackError::Media(e.to_string())
}

#[async_trait]
impl MediaElement for MpvElement {
    async fn bind(&self, endpoint: &StreamEndpoint) -> Result<(), PlaybackError> {
        info!("mpv: bound to {} ({})", endpoint.url, endpoint.mime_type);
        *self
            .source
            .lock()
            .map_err(|_| PlaybackError::Media("source lock poisoned".into()))? =
            Some(endpoint.url.clone());
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let _attempt = PlayAttempt::begin(&self.awaiting_play);
        let loaded = self.observed.borrow().file_loaded;
        if !loaded {
            self.load().await?;
        }
        self.handle.set_pause(false).await.map_err(media_err)?;

        let mut rx = self.observed.clone();
        let waited = tokio::time::timeout(
            self.connect_timeout,
            rx.wait_for(|o| o.core_idle == Some(false) || o.failure.is_some()),
        )
        .await
        .map(|r| r.map(|o| o.failure.clone()));

        match waited {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(reason))) => Err(PlaybackError::Rejected(reason)),
            Ok(Err(_)) => Err(PlaybackError::Media("mpv event pump gone".into())),
            Err(_) => {
                let _ = self.handle.set_pause(true).await;
                Err(PlaybackError::Rejected(format!(
                    "no audio after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.handle.set_pause(true).await.map_err(media_err)
    }

    async fn load(&self) -> Result<(), PlaybackError> {
        let url = self.bound_url()?;
        self.reset.send_modify(|o| {
            o.core_idle = None;
            o.failure = None;
        });
        self.handle.load_stream(&url).await.map_err(media_err)
    }

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        self.handle.set_volume(volume).await.map_err(media_err)
    }

    async fn ready_state(&self) -> ReadyState {
        self.observed.borrow().ready_state()
    }
}
