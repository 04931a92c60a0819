//! WebSocket 对话服务客户端
//!
//! 建连流程：加载会话 → 带 Basic 鉴权头连接端点 → 发送 session_start →
//! 后台任务负责收发；入站消息转换为 [`ChannelEvent`] 推入事件流，
//! 服务端下发的新会话直接经 [`SessionHandle`] 落盘。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::protocol::{self, ClientMessage, ServerMessage};
use super::{
    AudioChunk, ChannelEvent, ChannelSetup, Credentials, DialogueChannel, DialogueService,
    OpenError, OpenedChannel, Packet, ServiceError,
};
use crate::store::{SessionHandle, SessionRecord};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 关闭通道时等待后台任务退出的上限
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct WebSocketDialogueService {
    endpoint: Url,
    connect_timeout: Duration,
}

impl WebSocketDialogueService {
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self, ServiceError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ServiceError::new(format!("Invalid endpoint '{endpoint}': {e}")))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ServiceError::new(format!(
                    "Unsupported endpoint scheme '{other}', expected ws or wss"
                )))
            }
        }
        Ok(Self {
            endpoint: url,
            connect_timeout,
        })
    }

    fn build_request(&self, credentials: &Credentials) -> Result<Request, ServiceError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ServiceError::new(format!("Invalid WebSocket request: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Basic {}", credentials.basic_token()))
            .map_err(|e| ServiceError::new(format!("Invalid credentials header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);
        Ok(request)
    }
}

#[async_trait]
impl DialogueService for WebSocketDialogueService {
    async fn open(&self, setup: ChannelSetup) -> Result<OpenedChannel, OpenError> {
        let session = setup.session.load().await?;
        let request = self.build_request(&setup.credentials)?;

        debug!(
            "Connecting to dialogue service: {}",
            self.endpoint.host_str().unwrap_or("<unknown host>")
        );

        let (ws_stream, response) = match timeout(self.connect_timeout, connect_async(request)).await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(ServiceError::new(format!("WebSocket connection failed: {e}")).into())
            }
            Err(_) => return Err(ServiceError::new("Connection timed out").into()),
        };
        info!("Connected to dialogue service (status: {})", response.status());

        let (mut ws_write, ws_read) = ws_stream.split();

        let start = ClientMessage::SessionStart {
            scene: setup.scene.clone(),
            user: setup.user.clone(),
            capabilities: setup.capabilities,
            session: session.map(SessionRecord::into_value),
        };
        let json = protocol::encode(&start)
            .map_err(|e| ServiceError::new(format!("Failed to encode session start: {e}")))?;
        ws_write
            .send(Message::Text(json))
            .await
            .map_err(|e| ServiceError::new(format!("Failed to start session: {e}")))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(message_loop(
            ws_write,
            ws_read,
            out_rx,
            event_tx,
            setup.session,
        ));

        Ok(OpenedChannel {
            channel: Box::new(WebSocketChannel {
                out_tx: Some(out_tx),
                task: Some(task),
            }),
            events: event_rx,
        })
    }
}

struct WebSocketChannel {
    out_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl DialogueChannel for WebSocketChannel {
    async fn send_text(&mut self, text: &str) -> Result<(), ServiceError> {
        let sender = self
            .out_tx
            .as_ref()
            .ok_or_else(|| ServiceError::new("Channel is closed"))?;
        sender
            .send(ClientMessage::Text {
                packet_id: uuid::Uuid::new_v4().to_string(),
                text: text.to_string(),
            })
            .map_err(|e| ServiceError::new(format!("Failed to queue message: {e}")))
    }

    async fn close(&mut self) {
        // 丢弃发送端即通知后台任务发送 Close 帧并退出
        self.out_tx.take();
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if timeout(CLOSE_GRACE, task).await.is_err() {
                warn!("Dialogue socket task did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn message_loop(
    mut ws_write: futures_util::stream::SplitSink<WsStream, Message>,
    mut ws_read: futures_util::stream::SplitStream<WsStream>,
    mut out_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    session: SessionHandle,
) {
    loop {
        tokio::select! {
            outgoing = out_rx.recv() => match outgoing {
                Some(msg) => {
                    let json = match protocol::encode(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize message: {e}");
                            continue;
                        }
                    };
                    trace!("Sending: {}", json.chars().take(100).collect::<String>());
                    if let Err(e) = ws_write.send(Message::Text(json)).await {
                        error!("Failed to send WebSocket message: {e}");
                        let _ = events.send(ChannelEvent::error(format!("Send failed: {e}")));
                        break;
                    }
                }
                None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    trace!("Received: {}", text.chars().take(100).collect::<String>());
                    handle_server_text(&text, &events, &session).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Received binary audio frame: {} bytes", data.len());
                    let _ = events.send(ChannelEvent::Packet(Packet::Audio(AudioChunk::from_bytes(&data))));
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {e}");
                    let _ = events.send(ChannelEvent::error(format!("WebSocket error: {e}")));
                    break;
                }
                None => break,
            },
        }
    }

    debug!("Dialogue socket loop ended");
}

async fn handle_server_text(
    text: &str,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    session: &SessionHandle,
) {
    let msg = match protocol::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to decode server message: {e}");
            return;
        }
    };

    let event = match msg {
        ServerMessage::Text { text } => ChannelEvent::Packet(Packet::Text(text)),
        ServerMessage::Audio { chunk } => ChannelEvent::Packet(Packet::Audio(AudioChunk::new(chunk))),
        ServerMessage::InteractionEnd => ChannelEvent::Packet(Packet::InteractionEnd),
        ServerMessage::Error { message } => ChannelEvent::Error(ServiceError::new(message)),
        ServerMessage::Session { session: value } => {
            session.save(SessionRecord::new(value)).await;
            return;
        }
        ServerMessage::Unknown => ChannelEvent::Packet(Packet::Other("unknown".to_string())),
    };
    let _ = events.send(event);
}
