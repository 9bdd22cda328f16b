//! RTMP engine built on `rml_rtmp` over a tokio TCP stream.
//!
//! The engine carries encoded FLV payloads pushed through
//! [`RmlRtmpEngine::packet_sender`]. Capture and encoding happen upstream,
//! so the device calls only record what the host selected.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType, StreamMetadata,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use livestream_ipc::{CameraDevice, CaptureError, Microphone, PreviewSurface, Protocol};

use crate::engine::{codes, AudioSettings, DeviceTuning, EngineStatus, TransportEngine, VideoSettings};
use crate::error::TransportError;
use crate::{TransportResult, PACKET_CHANNEL_CAPACITY};

const DEFAULT_RTMP_PORT: u16 = 1935;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_INTERVAL: Duration = Duration::from_millis(10);
const READ_BUFFER_SIZE: usize = 4096;

/// A packet to send over RTMP.
#[derive(Debug, Clone)]
pub struct RtmpPacket {
    /// Packet data.
    pub data: Bytes,

    /// Presentation timestamp in milliseconds.
    pub timestamp_ms: u32,

    /// Whether this is a video packet.
    pub is_video: bool,

    /// Whether this is a keyframe (for video).
    pub is_keyframe: bool,
}

/// Transport statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStatistics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
}

/// Host selections and encoder settings, read by the connection task.
#[derive(Debug, Default)]
struct MediaState {
    camera: Option<CameraDevice>,
    microphone: Option<Microphone>,
    preview: Option<PreviewSurface>,
    video: Option<VideoSettings>,
    audio: Option<AudioSettings>,
    muted: bool,
    zoom: f32,
}

enum Command {
    Publish(String),
    Close,
}

/// Where an RTMP URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RtmpTarget {
    host: String,
    port: u16,
    app: String,
}

impl RtmpTarget {
    fn parse(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if parsed.scheme() != Protocol::Rtmp.scheme() {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp://".to_string(),
            ));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_RTMP_PORT);
        let app = parsed.path().trim_matches('/').to_string();

        if app.is_empty() {
            return Err(TransportError::InvalidUrl(
                "Missing application name in URL path".to_string(),
            ));
        }

        Ok(Self { host, port, app })
    }
}

/// Map a connection error to the status reported to the adapter.
fn status_for(error: &TransportError) -> EngineStatus {
    match error {
        TransportError::Rejected(_) => EngineStatus::Failed {
            code: codes::CONNECT_REJECTED.to_string(),
        },
        TransportError::InvalidUrl(_) | TransportError::Connection(_) => EngineStatus::Failed {
            code: codes::CONNECT_FAILED.to_string(),
        },
        TransportError::Io(_) | TransportError::Send(_) | TransportError::NotConnected => {
            EngineStatus::IoError {
                message: error.to_string(),
            }
        }
    }
}

/// [`TransportEngine`] speaking RTMP through `rml_rtmp`.
pub struct RmlRtmpEngine {
    runtime: Option<Runtime>,
    status_tx: Sender<EngineStatus>,
    status_rx: Receiver<EngineStatus>,
    packet_tx: Sender<RtmpPacket>,
    packet_rx: Receiver<RtmpPacket>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    connection_id: Arc<Mutex<u64>>,
    media: Arc<RwLock<MediaState>>,
    counters: Arc<Counters>,
}

impl RmlRtmpEngine {
    /// Create the engine and its network runtime.
    pub fn new() -> TransportResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rtmp-engine")
            .enable_all()
            .build()?;

        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        let (packet_tx, packet_rx) = crossbeam_channel::bounded(PACKET_CHANNEL_CAPACITY);

        Ok(Self {
            runtime: Some(runtime),
            status_tx,
            status_rx,
            packet_tx,
            packet_rx,
            commands: Mutex::new(None),
            connection_id: Arc::new(Mutex::new(0)),
            media: Arc::new(RwLock::new(MediaState {
                zoom: 1.0,
                ..MediaState::default()
            })),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Sender for encoded packets. Packets queued before publishing starts
    /// are sent once the server accepts the publish request.
    pub fn packet_sender(&self) -> Sender<RtmpPacket> {
        self.packet_tx.clone()
    }

    /// Queue a packet, dropping it if the send queue is full.
    pub fn send_packet(&self, packet: RtmpPacket) -> TransportResult<()> {
        match self.packet_tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Send("Packet queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::NotConnected),
        }
    }

    /// Get transport statistics.
    pub fn statistics(&self) -> TransportStatistics {
        TransportStatistics {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, status: EngineStatus) {
        let _ = self.status_tx.send(status);
    }

    /// Silence the running connection task. Returns the id for the next one.
    fn retire_connection(&self) -> u64 {
        let mut current = self.connection_id.lock();
        *current += 1;
        *current
    }
}

impl TransportEngine for RmlRtmpEngine {
    fn name(&self) -> &'static str {
        "rml-rtmp"
    }

    fn subscribe(&self) -> Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    fn attach_camera(&self, camera: Option<&CameraDevice>) -> Result<(), CaptureError> {
        debug!(camera = ?camera.map(|c| c.id.as_str()), "Camera selected");
        self.media.write().camera = camera.cloned();
        Ok(())
    }

    fn attach_microphone(&self, microphone: Option<&Microphone>) -> Result<(), CaptureError> {
        debug!(microphone = ?microphone.map(|m| m.id.as_str()), "Microphone selected");
        self.media.write().microphone = microphone.cloned();
        Ok(())
    }

    fn configure_camera(&self, tuning: &DeviceTuning) -> Result<(), CaptureError> {
        if self.media.read().camera.is_none() {
            return Err(CaptureError::DeviceNotFound("No camera attached".to_string()));
        }
        debug!(?tuning, "Camera tuning");
        Ok(())
    }

    fn attach_preview(&self, preview: Option<&PreviewSurface>) {
        self.media.write().preview = preview.cloned();
    }

    fn apply_video_settings(&self, settings: &VideoSettings) {
        debug!(size = %settings.size, bitrate = settings.bitrate, "Video settings");
        self.media.write().video = Some(settings.clone());
    }

    fn apply_audio_settings(&self, settings: &AudioSettings) {
        debug!(bitrate = settings.bitrate, "Audio settings");
        self.media.write().audio = Some(*settings);
    }

    fn set_muted(&self, muted: bool) {
        self.media.write().muted = muted;
    }

    fn set_zoom(&self, ratio: f32) {
        self.media.write().zoom = ratio;
    }

    #[instrument(name = "rtmp_connect", skip(self))]
    fn connect(&self, url: &str) {
        let Some(runtime) = self.runtime.as_ref() else {
            error!("RTMP runtime is shut down");
            self.emit(EngineStatus::Failed {
                code: codes::CONNECT_FAILED.to_string(),
            });
            return;
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.commands.lock().replace(commands) {
            let _ = previous.send(Command::Close);
        }
        let id = self.retire_connection();

        info!("Connecting to RTMP server");
        let task = ConnectionTask {
            url: url.to_string(),
            id,
            current_id: Arc::clone(&self.connection_id),
            commands: command_rx,
            statuses: self.status_tx.clone(),
            packets: self.packet_rx.clone(),
            media: Arc::clone(&self.media),
            counters: Arc::clone(&self.counters),
        };
        runtime.spawn(task.run());
    }

    fn publish(&self, stream_name: &str) {
        match self.commands.lock().as_ref() {
            Some(commands) => {
                if commands.send(Command::Publish(stream_name.to_string())).is_err() {
                    warn!("RTMP connection task is gone, publish dropped");
                }
            }
            None => warn!("Publish requested without a connection"),
        }
    }

    #[instrument(name = "rtmp_close", skip(self))]
    fn close(&self) {
        self.retire_connection();
        if let Some(commands) = self.commands.lock().take() {
            info!("Disconnecting from RTMP server");
            let _ = commands.send(Command::Close);
        }
    }
}

impl Drop for RmlRtmpEngine {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(5));
        }
    }
}

/// One connection attempt and, once accepted, the publishing session.
struct ConnectionTask {
    url: String,
    id: u64,
    current_id: Arc<Mutex<u64>>,
    commands: mpsc::UnboundedReceiver<Command>,
    statuses: Sender<EngineStatus>,
    packets: Receiver<RtmpPacket>,
    media: Arc<RwLock<MediaState>>,
    counters: Arc<Counters>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let opened = tokio::select! {
            result = open_connection(&self.url) => result,
            _ = wait_for_close(&mut self.commands) => {
                debug!("Connect cancelled");
                return;
            }
        };

        let mut connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                warn!(url = %self.url, "RTMP connect failed: {}", e);
                self.emit(status_for(&e));
                return;
            }
        };

        info!("RTMP connection established");
        self.emit(EngineStatus::Connected);

        if let Some(status) = self.serve(&mut connection).await {
            self.emit(status);
        }
    }

    /// Run the open connection until it ends. Returns the status to report,
    /// or `None` after an explicit close.
    async fn serve(&mut self, connection: &mut RtmpConnection) -> Option<EngineStatus> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut tick = tokio::time::interval(SEND_INTERVAL);
        let mut publish_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Publish(stream_key)) => {
                        debug!(stream_key = %stream_key, "Requesting publish");
                        if let Err(e) = connection.request_publishing(&stream_key).await {
                            return Some(status_for(&e));
                        }
                        publish_deadline = Some(Instant::now() + PUBLISH_TIMEOUT);
                    }
                    Some(Command::Close) | None => {
                        debug!("Closing RTMP connection");
                        return None;
                    }
                },
                read = connection.stream.read(&mut read_buf) => {
                    let n = match read {
                        Ok(0) => {
                            info!("RTMP server closed the connection");
                            return Some(EngineStatus::Closed);
                        }
                        Ok(n) => n,
                        Err(e) => return Some(status_for(&TransportError::Io(e))),
                    };

                    let events = match connection.handle_input(&read_buf[..n]).await {
                        Ok(events) => events,
                        Err(e) => return Some(status_for(&e)),
                    };

                    for event in events {
                        match event {
                            ClientSessionEvent::PublishRequestAccepted => {
                                debug!("Publish request accepted");
                                publish_deadline = None;
                                connection.publishing = true;

                                let metadata = stream_metadata(&self.media.read());
                                if let Err(e) = connection.publish_metadata(&metadata).await {
                                    warn!("Failed to send stream metadata: {}", e);
                                }
                                self.emit(EngineStatus::PublishStarted);
                            }
                            other => trace!("Received event: {:?}", other),
                        }
                    }
                }
                _ = tick.tick() => {
                    if connection.publishing {
                        if let Err(e) = self.drain_packets(connection).await {
                            warn!("Send error: {}", e);
                            return Some(status_for(&e));
                        }
                    } else if publish_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        warn!("Timeout waiting for publish acceptance");
                        return Some(EngineStatus::Failed {
                            code: codes::PUBLISH_FAILED.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn drain_packets(&self, connection: &mut RtmpConnection) -> TransportResult<()> {
        let muted = self.media.read().muted;

        while let Ok(packet) = self.packets.try_recv() {
            if muted && !packet.is_video {
                continue;
            }

            if let Err(e) = send_packet(connection, &packet).await {
                self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            self.counters
                .bytes_sent
                .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
            self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Report a status unless this connection was closed or replaced.
    fn emit(&self, status: EngineStatus) {
        let current = self.current_id.lock();
        if *current == self.id {
            let _ = self.statuses.send(status);
        } else {
            debug!(?status, "Dropping status of a retired connection");
        }
    }
}

/// Resolves once a close is requested or the engine drops the command
/// channel.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Publish(_)) => {
                warn!("Publish requested before the connection was accepted");
            }
        }
    }
}

fn stream_metadata(media: &MediaState) -> StreamMetadata {
    debug!(
        camera = ?media.camera.as_ref().map(|c| c.id.as_str()),
        microphone = ?media.microphone.as_ref().map(|m| m.id.as_str()),
        preview = ?media.preview.as_ref().map(|p| p.id.as_str()),
        muted = media.muted,
        zoom = media.zoom,
        "Publishing"
    );

    let mut metadata = StreamMetadata::new();

    if let Some(video) = &media.video {
        metadata.video_width = Some(video.size.width);
        metadata.video_height = Some(video.size.height);
        metadata.video_frame_rate = Some(video.fps as f32);
        metadata.video_bitrate_kbps = Some(video.bitrate / 1000);
    }
    if let Some(audio) = &media.audio {
        metadata.audio_bitrate_kbps = Some(audio.bitrate / 1000);
    }
    metadata.encoder = Some(concat!("livestream/", env!("CARGO_PKG_VERSION")).to_string());

    metadata
}

/// RTMP connection with session state.
struct RtmpConnection {
    /// TCP stream to the RTMP server.
    stream: TcpStream,
    /// RTMP client session for protocol handling.
    session: ClientSession,
    /// Whether we've successfully started publishing.
    publishing: bool,
}

impl RtmpConnection {
    /// Write outbound packets and collect raised events.
    async fn write_results(
        &mut self,
        results: Vec<ClientSessionResult>,
    ) -> TransportResult<Vec<ClientSessionEvent>> {
        let mut events = Vec::new();
        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    self.stream.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(event) => events.push(event),
                _ => {}
            }
        }
        Ok(events)
    }

    async fn handle_input(&mut self, bytes: &[u8]) -> TransportResult<Vec<ClientSessionEvent>> {
        let results = self
            .session
            .handle_input(bytes)
            .map_err(|e| TransportError::Connection(format!("Session input error: {:?}", e)))?;
        self.write_results(results).await
    }

    async fn wait_for_acceptance(&mut self) -> TransportResult<()> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = self.stream.read(&mut read_buf).await?;
            if n == 0 {
                return Err(TransportError::Connection("Connection closed".to_string()));
            }

            for event in self.handle_input(&read_buf[..n]).await? {
                match event {
                    ClientSessionEvent::ConnectionRequestAccepted => {
                        debug!("Connection accepted by server");
                        return Ok(());
                    }
                    ClientSessionEvent::ConnectionRequestRejected { description } => {
                        return Err(TransportError::Rejected(description));
                    }
                    other => trace!("Received event: {:?}", other),
                }
            }
        }
    }

    async fn request_publishing(&mut self, stream_key: &str) -> TransportResult<()> {
        let result = self
            .session
            .request_publishing(stream_key.to_string(), PublishRequestType::Live)
            .map_err(|e| TransportError::Connection(format!("Publish request failed: {:?}", e)))?;
        self.write_results(vec![result]).await?;
        Ok(())
    }

    async fn publish_metadata(&mut self, metadata: &StreamMetadata) -> TransportResult<()> {
        let result = self
            .session
            .publish_metadata(metadata)
            .map_err(|e| TransportError::Send(format!("Failed to publish metadata: {:?}", e)))?;
        self.write_results(vec![result]).await?;
        Ok(())
    }
}

async fn open_connection(url: &str) -> TransportResult<RtmpConnection> {
    let target = RtmpTarget::parse(url)?;
    info!(host = %target.host, port = target.port, app = %target.app, "Connecting to RTMP server");

    let connect = TcpStream::connect((target.host.as_str(), target.port));
    let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
        Ok(stream) => stream?,
        Err(_) => {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out").into());
        }
    };

    debug!("TCP connection established, starting handshake");
    let leftover_bytes = perform_handshake(&mut stream).await?;

    debug!("Handshake complete, creating RTMP session");
    let (session, initial_results) = ClientSession::new(ClientSessionConfig::new())
        .map_err(|e| TransportError::Connection(format!("Session creation failed: {:?}", e)))?;

    let mut connection = RtmpConnection {
        stream,
        session,
        publishing: false,
    };
    connection.write_results(initial_results).await?;

    if !leftover_bytes.is_empty() {
        for event in connection.handle_input(&leftover_bytes).await? {
            trace!("Received event: {:?}", event);
        }
    }

    debug!(app = %target.app, "Requesting RTMP connection");
    let request = connection
        .session
        .request_connection(target.app.clone())
        .map_err(|e| TransportError::Connection(format!("Connection request failed: {:?}", e)))?;
    connection.write_results(vec![request]).await?;

    match tokio::time::timeout(CONNECT_TIMEOUT, connection.wait_for_acceptance()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(TransportError::Connection(
                "Timeout waiting for connection acceptance".to_string(),
            ));
        }
    }

    Ok(connection)
}

/// Run the client side of the handshake. Returns bytes received past the
/// end of the handshake.
async fn perform_handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);

    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Connection(format!("Handshake generation failed: {:?}", e)))?;
    stream.write_all(&p0_p1).await?;

    // S0+S1+S2 is 3073 bytes
    let mut handshake_buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = stream.read(&mut handshake_buf).await?;
        if n == 0 {
            return Err(TransportError::Connection(
                "Connection closed during handshake".to_string(),
            ));
        }

        match handshake.process_bytes(&handshake_buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
                return Ok(remaining_bytes);
            }
            Err(e) => {
                return Err(TransportError::Connection(format!(
                    "Handshake failed: {:?}",
                    e
                )));
            }
        }
    }
}

async fn send_packet(connection: &mut RtmpConnection, packet: &RtmpPacket) -> TransportResult<()> {
    let timestamp = RtmpTimestamp::new(packet.timestamp_ms);

    let result = if packet.is_video {
        connection.session.publish_video_data(
            packet.data.clone(),
            timestamp,
            !packet.is_keyframe, // can_be_dropped: true for non-keyframes
        )
    } else {
        connection
            .session
            .publish_audio_data(packet.data.clone(), timestamp, false)
    };

    let session_result =
        result.map_err(|e| TransportError::Send(format!("Failed to publish data: {:?}", e)))?;
    connection.write_results(vec![session_result]).await?;

    Ok(())
}
