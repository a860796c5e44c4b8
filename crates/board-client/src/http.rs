use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use board_types::api::{ApiErrorBody, CreateMessageResponse, LIST_ORDER};
use board_types::events::{GatewayCommand, GatewayEvent, MESSAGES_CHANNEL};
use board_types::{Message, NewMessage};

use crate::backend::{Backend, ChannelEvent, Subscription};
use crate::config::ClientConfig;
use crate::error::BackendError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the unsubscribe/close exchange when a subscription is
/// canceled.
const GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);

/// Backend reached over its REST API and WebSocket gateway.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: ClientConfig,
    access_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: ClientConfig, access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            access_token,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Open the gateway and wait until the server confirms the subscription,
    /// so no insert made after this returns can be missed.
    async fn open_channel(&self, channel: &str) -> Result<WsStream, BackendError> {
        let mut url = self.config.gateway_url.clone();
        if let Some(token) = &self.access_token {
            url.query_pairs_mut().append_pair("token", token);
        }

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let subscribe = encode_command(&GatewayCommand::Subscribe {
            channel: channel.to_string(),
        })?;
        ws.send(WsMessage::Text(subscribe.into())).await?;

        while let Some(frame) = ws.next().await {
            match frame? {
                WsMessage::Text(text) => match serde_json::from_str::<GatewayEvent>(&text) {
                    Ok(GatewayEvent::Subscribed { channel: acked }) if acked == channel => {
                        return Ok(ws);
                    }
                    Ok(GatewayEvent::Error { message }) => return Err(BackendError::Channel(message)),
                    Ok(other) => debug!("ignoring {:?} before subscription ack", other),
                    Err(e) => warn!("bad gateway frame: {} -- raw: {}", e, preview(&text)),
                },
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "gateway closed before subscribing".into());
                    return Err(BackendError::Channel(reason));
                }
                _ => {}
            }
        }

        Err(BackendError::Channel("gateway closed before subscribing".into()))
    }
}

fn encode_command(cmd: &GatewayCommand) -> Result<String, BackendError> {
    serde_json::to_string(cmd).map_err(|e| BackendError::Decode(e.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Pass successful responses through; turn everything else into a
/// `Rejected` error carrying the backend's message.
async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl Backend for HttpBackend {
    async fn create_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        if message.is_blank() {
            return Err(BackendError::empty_body());
        }

        let req = self.client.post(self.config.messages_url()).json(&message);
        let resp = check(self.authorize(req).send().await?).await?;

        resp.json::<CreateMessageResponse>()
            .await?
            .into_message()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".into()))
    }

    async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        let req = self
            .client
            .get(self.config.messages_url())
            .query(&[("order", LIST_ORDER)]);
        let resp = check(self.authorize(req).send().await?).await?;

        Ok(resp.json::<Vec<Message>>().await?)
    }

    async fn subscribe_inserts<F>(&self, on_event: F) -> Result<Subscription, BackendError>
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let ws = self.open_channel(MESSAGES_CHANNEL).await?;
        info!("subscribed to '{}' at {}", MESSAGES_CHANNEL, self.config.gateway_url);

        let (sink, stream) = ws.split();
        let token = CancellationToken::new();
        let task = tokio::spawn(pump(sink, stream, token.clone(), on_event));

        Ok(Subscription::new(MESSAGES_CHANNEL, token, task))
    }
}

/// Unsubscribe and close. Errors are ignored: the connection is going away
/// either way.
async fn goodbye(sink: &mut SplitSink<WsStream, WsMessage>) {
    if let Ok(unsubscribe) = encode_command(&GatewayCommand::Unsubscribe {
        channel: MESSAGES_CHANNEL.to_string(),
    }) {
        let _ = sink.send(WsMessage::Text(unsubscribe.into())).await;
    }
    let _ = sink.send(WsMessage::Close(None)).await;
}

/// Forward gateway frames to `on_event` until canceled or the connection
/// ends.
async fn pump<F>(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut stream: SplitStream<WsStream>,
    cancelled: CancellationToken,
    mut on_event: F,
) where
    F: FnMut(ChannelEvent) + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = cancelled.cancelled() => {
                if tokio::time::timeout(GOODBYE_TIMEOUT, goodbye(&mut sink)).await.is_err() {
                    warn!("gateway stalled on unsubscribe, dropping the connection");
                }
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<GatewayEvent>(&text) {
                    Ok(GatewayEvent::Insert(message)) => on_event(ChannelEvent::Insert(message)),
                    Ok(GatewayEvent::Error { message }) => {
                        on_event(ChannelEvent::Closed(message));
                        break;
                    }
                    Ok(GatewayEvent::Subscribed { .. }) => {}
                    Err(e) => warn!("bad gateway frame: {} -- raw: {}", e, preview(&text)),
                },
                Some(Ok(WsMessage::Ping(payload))) => {
                    if sink.send(WsMessage::Pong(payload)).await.is_err() {
                        on_event(ChannelEvent::Closed("gateway connection lost".into()));
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "gateway closed the connection".into());
                    on_event(ChannelEvent::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    on_event(ChannelEvent::Closed(e.to_string()));
                    break;
                }
                None => {
                    on_event(ChannelEvent::Closed("gateway connection ended".into()));
                    break;
                }
            },
        }
    }
    debug!("gateway pump for '{}' stopped", MESSAGES_CHANNEL);
}
