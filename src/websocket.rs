//! # WebSocket Audio Ingress
//!
//! The capture collaborator streams microphone audio here; each connection is
//! an actor that decodes PCM and hands frames to the detectors through the
//! [`FrameRouter`](crate::audio::FrameRouter).
//!
//! ## Endpoints:
//! - `/ws/audio/{channel}`: mono stream for one configured channel
//! - `/ws/audio`: interleaved stream from the multi-input capture device,
//!   split per channel by each channel's `input_index`
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: server sends `ready` with the connection id
//! 2. **Configuration** (optional): client sends `stream_config` declaring the
//!    sample rate, channel count and sample format
//! 3. **Audio Streaming**: binary messages carry little-endian PCM
//! 4. **Heartbeat**: `ping` text messages are answered with `pong`
//!
//! Connections are closed once the shutdown signal is raised.

use crate::attention::ChannelId;
use crate::audio::processor::{decode_pcm, StreamFormat};
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the connection checks the shutdown flag and client liveness.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// A client silent for this long is disconnected.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON text messages exchanged on the audio socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebSocketMessage {
    /// Client declares its stream format
    StreamConfig(StreamFormat),

    /// Server greeting
    Ready {
        connection_id: String,
        channels: Vec<ChannelId>,
    },

    /// Server acknowledgement of a `stream_config`
    Configured(StreamFormat),

    Error {
        code: String,
        message: String,
    },

    Ping {
        timestamp: u64,
    },

    Pong {
        timestamp: u64,
    },
}

/// Which channels a connection feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestTarget {
    /// Mono audio for one channel
    Channel(ChannelId),
    /// Interleaved audio from the capture device
    Device,
}

/// One audio ingress connection.
pub struct AudioIngest {
    connection_id: Uuid,
    target: IngestTarget,
    format: StreamFormat,
    state: web::Data<AppState>,
    last_heartbeat: Instant,
    frames: u64,
}

impl AudioIngest {
    pub fn new(target: IngestTarget, state: web::Data<AppState>) -> Self {
        let settings = &state.get_config().audio;
        let format = match target {
            IngestTarget::Channel(_) => StreamFormat::mono(settings),
            IngestTarget::Device => StreamFormat::device(settings),
        };
        Self {
            connection_id: Uuid::new_v4(),
            target,
            format,
            state,
            last_heartbeat: Instant::now(),
            frames: 0,
        }
    }

    fn channels(&self) -> Vec<ChannelId> {
        match self.target {
            IngestTarget::Channel(channel) => vec![channel],
            IngestTarget::Device => self.state.router.channels(),
        }
    }

    /// Accept a declared stream format if the detectors can use it.
    fn apply_stream_config(&mut self, format: StreamFormat) -> Result<(), String> {
        let settings = &self.state.get_config().audio;
        format.validate(settings)?;

        match self.target {
            IngestTarget::Channel(_) if format.channels != 1 => {
                return Err(format!(
                    "Per-channel stream must be mono, got {} channels",
                    format.channels
                ));
            }
            IngestTarget::Device if format.channels != settings.device_channels => {
                return Err(format!(
                    "Device stream must have {} channels, got {}",
                    settings.device_channels, format.channels
                ));
            }
            _ => {}
        }

        info!(
            connection = %self.connection_id,
            sample_rate = format.sample_rate,
            channels = format.channels,
            sample_format = ?format.format,
            "Audio stream configured"
        );
        self.format = format;
        Ok(())
    }

    fn handle_audio_data(&mut self, data: &[u8]) -> Result<(), String> {
        let samples = decode_pcm(data, self.format.format)?;
        self.frames += 1;

        match self.target {
            IngestTarget::Channel(channel) => {
                self.state
                    .router
                    .route(channel, samples)
                    .map_err(|e| e.to_string())?;
            }
            IngestTarget::Device => {
                if samples.len() % self.format.channels != 0 {
                    return Err(format!(
                        "Frame of {} samples does not divide into {} channels",
                        samples.len(),
                        self.format.channels
                    ));
                }
                self.state
                    .router
                    .route_interleaved(&samples, self.format.channels);
            }
        }
        Ok(())
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &WebSocketMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to encode WebSocket message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(connection = %self.connection_id, code, "{}", message);
        self.state.message_rejected();
        self.send(
            ctx,
            &WebSocketMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<WebSocketMessage>(text) {
            Ok(WebSocketMessage::StreamConfig(format)) => {
                match self.apply_stream_config(format.clone()) {
                    Ok(()) => self.send(ctx, &WebSocketMessage::Configured(format)),
                    Err(e) => self.send_error(ctx, "config_error", &e),
                }
            }
            Ok(WebSocketMessage::Ping { timestamp }) => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, &WebSocketMessage::Pong { timestamp });
            }
            Ok(WebSocketMessage::Pong { .. }) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(_) => {
                self.send_error(ctx, "unexpected_message", "Message type is server-to-client only");
            }
            Err(e) => {
                self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", e));
            }
        }
    }
}

impl Actor for AudioIngest {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, target = ?self.target, "Audio connection started");
        self.state.connection_opened();

        let ready = WebSocketMessage::Ready {
            connection_id: self.connection_id.to_string(),
            channels: self.channels(),
        };
        self.send(ctx, &ready);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if act.state.shutdown.is_triggered() {
                debug!(connection = %act.connection_id, "Closing audio connection for shutdown");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Away,
                    description: Some("server shutting down".to_string()),
                }));
                ctx.stop();
            } else if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state.connection_closed();
        info!(
            connection = %self.connection_id,
            frames = self.frames,
            "Audio connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioIngest {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                if let Err(err) = self.handle_audio_data(&data) {
                    self.send_error(ctx, "audio_error", &err);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws/audio/{channel}`
pub async fn channel_audio(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<ChannelId>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let channel = path.into_inner();
    state.router.ensure_route(channel).map_err(AppError::from)?;
    if state.shutdown.is_triggered() {
        return Err(AppError::Unavailable("Server is shutting down".to_string()).into());
    }
    info!(channel, "New audio connection from {:?}", req.connection_info().peer_addr());
    ws::start(AudioIngest::new(IngestTarget::Channel(channel), state), &req, stream)
}

/// `GET /ws/audio`
pub async fn device_audio(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    if state.shutdown.is_triggered() {
        return Err(AppError::Unavailable("Server is shutting down".to_string()).into());
    }
    info!("New device audio connection from {:?}", req.connection_info().peer_addr());
    ws::start(AudioIngest::new(IngestTarget::Device, state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::SampleFormat;
    use crate::state::tests::test_state;

    #[test]
    fn test_stream_config_parses() {
        let json = r#"{"type":"stream_config","sample_rate":16000,"channels":6,"format":"f32"}"#;
        match serde_json::from_str::<WebSocketMessage>(json).unwrap() {
            WebSocketMessage::StreamConfig(format) => {
                assert_eq!(format.sample_rate, 16000);
                assert_eq!(format.channels, 6);
                assert_eq!(format.format, SampleFormat::F32);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_error_message_shape() {
        let msg = WebSocketMessage::Error {
            code: "audio_error".to_string(),
            message: "Audio data is empty".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "audio_error");
    }

    #[test]
    fn test_stream_config_rules() {
        let state = web::Data::new(test_state());
        let settings = state.get_config().audio.clone();

        let mut mono = AudioIngest::new(IngestTarget::Channel(1), state.clone());
        assert!(mono.apply_stream_config(StreamFormat::mono(&settings)).is_ok());
        assert!(mono.apply_stream_config(StreamFormat::device(&settings)).is_err());

        let mut device = AudioIngest::new(IngestTarget::Device, state);
        let mut wrong_rate = StreamFormat::device(&settings);
        wrong_rate.sample_rate = 8000;
        assert!(device.apply_stream_config(wrong_rate).is_err());
        assert!(device.apply_stream_config(StreamFormat::device(&settings)).is_ok());
    }

    #[actix_web::test]
    async fn test_unknown_channel_endpoint_is_404() {
        use actix_web::{http::StatusCode, test, App};

        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/audio/{channel}", web::get().to(channel_audio)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws/audio/9").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["message"], "Channel 9 is not registered");
    }

    #[test]
    fn test_audio_data_validation() {
        let state = web::Data::new(test_state());
        let mut device = AudioIngest::new(IngestTarget::Device, state.clone());

        // Six inputs of 16-bit PCM: 12 bytes per device frame
        assert!(device.handle_audio_data(&[0u8; 24]).is_ok());
        assert!(device.handle_audio_data(&[0u8; 10]).is_err());
        assert!(device.handle_audio_data(&[]).is_err());

        let mut unknown = AudioIngest::new(IngestTarget::Channel(9), state);
        assert!(unknown.handle_audio_data(&[0u8; 4]).is_err());
    }
}
