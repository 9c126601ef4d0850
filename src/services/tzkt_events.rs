use crate::error::SubscriptionError;
use crate::models::{Channel, TzktEvent};
use crate::utils::helpers::to_ws_scheme;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

const RECORD_SEPARATOR: char = '\u{1e}';
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const INVOCATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence tolerated from the hub, which pings every 15 seconds.
const SERVER_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

const MSG_INVOCATION: u8 = 1;
const MSG_COMPLETION: u8 = 3;
const MSG_PING: u8 = 6;
const MSG_CLOSE: u8 = 7;

/// A live "new head" feed.
///
/// `connect` may be called again after any failure or after `next_event`
/// returned `None`; it replaces the previous connection.
#[async_trait]
pub trait EventSubscription: Send {
    async fn connect(&mut self) -> Result<(), SubscriptionError>;

    async fn subscribe_to_head(&mut self) -> Result<(), SubscriptionError>;

    /// Next message, or `None` once the connection has dropped.
    async fn next_event(&mut self) -> Option<TzktEvent>;
}

/// A SignalR hub message (JSON protocol). The handshake reply is also parsed
/// through this, where only `error` is meaningful.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HubMessage {
    #[serde(rename = "type")]
    pub kind: Option<u8>,
    pub target: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
    pub invocation_id: Option<String>,
    pub error: Option<String>,
}

impl HubMessage {
    fn into_event(self) -> Option<TzktEvent> {
        if self.kind != Some(MSG_INVOCATION) {
            return None;
        }
        let channel = Channel::from(self.target.as_deref()?);
        let data = self
            .arguments
            .into_iter()
            .next()
            .and_then(|arg| arg.get("data").cloned())
            .unwrap_or(Value::Null);
        Some(TzktEvent { channel, data })
    }
}

/// Splits one websocket text frame into hub messages. Unparseable records
/// are dropped with a warning.
pub(crate) fn parse_frame(text: &str) -> Vec<HubMessage> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| match serde_json::from_str(record) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping malformed hub message: {}", e);
                None
            }
        })
        .collect()
}

fn frame(message: &Value) -> String {
    format!("{}{}", message, RECORD_SEPARATOR)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: String,
    connection_token: Option<String>,
}

struct Connection {
    outgoing: mpsc::UnboundedSender<String>,
    events: mpsc::Receiver<TzktEvent>,
    completions: mpsc::UnboundedReceiver<HubMessage>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader.abort();
        self.writer.abort();
    }
}

/// Waits for the handshake reply, failing if none arrives within `wait`.
async fn await_handshake<S>(stream: &mut S, wait: Duration) -> Result<(), SubscriptionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reply = timeout(wait, stream.next())
        .await
        .map_err(|_| SubscriptionError::Handshake("no handshake reply".to_string()))?;
    match reply {
        Some(Ok(Message::Text(text))) => {
            match parse_frame(&text).into_iter().find_map(|m| m.error) {
                Some(error) => Err(SubscriptionError::Handshake(error)),
                None => Ok(()),
            }
        }
        Some(Ok(other)) => Err(SubscriptionError::Handshake(format!(
            "unexpected handshake reply: {:?}",
            other
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(SubscriptionError::Closed),
    }
}

/// Sends queued invocations and keepalive pings until the queue closes, a
/// write fails or `closed` fires. A failed write fires `closed` so the reader
/// stops too.
async fn write_messages<K>(
    mut sink: K,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = interval(KEEPALIVE_INTERVAL);
    let ping = frame(&json!({ "type": MSG_PING }));
    loop {
        let text = tokio::select! {
            _ = closed.cancelled() => break,
            next = outgoing.recv() => match next {
                Some(text) => text,
                None => break,
            },
            _ = keepalive.tick() => ping.clone(),
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!("Events hub write failed: {}", e);
            closed.cancel();
            break;
        }
    }
}

/// Routes hub messages to the completion and event channels.
///
/// Returns, dropping the event sender so `next_event` yields `None`, when the
/// hub closes, a read fails, nothing arrives for `idle`, or `closed` fires.
async fn read_messages<S>(
    mut stream: S,
    events: mpsc::Sender<TzktEvent>,
    completions: mpsc::UnboundedSender<HubMessage>,
    closed: CancellationToken,
    idle: Duration,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            next = timeout(idle, stream.next()) => match next {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    warn!("Nothing from the events hub for {:?}, dropping connection", idle);
                    break;
                }
            },
        };
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                info!("Events hub closed the connection: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Events hub read failed: {}", e);
                break;
            }
        };

        for hub_message in parse_frame(&text) {
            match hub_message.kind {
                Some(MSG_COMPLETION) => {
                    let _ = completions.send(hub_message);
                }
                Some(MSG_CLOSE) => {
                    info!("Events hub sent close: {:?}", hub_message.error);
                    closed.cancel();
                    return;
                }
                Some(MSG_PING) => debug!("Events hub ping"),
                _ => {
                    if let Some(event) = hub_message.into_event() {
                        if events.send(event).await.is_err() {
                            closed.cancel();
                            return;
                        }
                    }
                }
            }
        }
    }
    closed.cancel();
}

/// Client for the TzKT events hub at `<base>/v1/ws`.
pub struct TzktEventsClient {
    http: reqwest::Client,
    hub_url: String,
    connection: Option<Connection>,
    next_invocation: u64,
}

impl TzktEventsClient {
    pub fn new(hub_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            hub_url: hub_url.trim_end_matches('/').to_string(),
            connection: None,
            next_invocation: 0,
        }
    }

    async fn negotiate(&self) -> Result<String, SubscriptionError> {
        let url = format!("{}/negotiate?negotiateVersion=1", self.hub_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SubscriptionError::Negotiate(e.to_string()))?;
        let negotiated: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| SubscriptionError::Negotiate(e.to_string()))?;
        Ok(negotiated
            .connection_token
            .unwrap_or(negotiated.connection_id))
    }
}

#[async_trait]
impl EventSubscription for TzktEventsClient {
    async fn connect(&mut self) -> Result<(), SubscriptionError> {
        self.connection = None;

        let token = self.negotiate().await?;
        let ws_url = format!("{}?id={}", to_ws_scheme(&self.hub_url), token);
        let (ws, _) = connect_async(ws_url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(frame(&json!({ "protocol": "json", "version": 1 }))))
            .await?;
        await_handshake(&mut stream, SERVER_TIMEOUT).await?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let writer = tokio::spawn(write_messages(sink, outgoing_rx, closed.clone()));
        let reader = tokio::spawn(read_messages(
            stream,
            events_tx,
            completions_tx,
            closed.clone(),
            SERVER_TIMEOUT,
        ));

        self.connection = Some(Connection {
            outgoing: outgoing_tx,
            events: events_rx,
            completions: completions_rx,
            closed,
            reader,
            writer,
        });
        Ok(())
    }

    async fn subscribe_to_head(&mut self) -> Result<(), SubscriptionError> {
        let invocation_id = self.next_invocation.to_string();
        self.next_invocation += 1;
        let connection = self.connection.as_mut().ok_or(SubscriptionError::Closed)?;

        let invocation = json!({
            "type": MSG_INVOCATION,
            "invocationId": invocation_id,
            "target": "SubscribeToHead",
            "arguments": [],
        });
        connection
            .outgoing
            .send(frame(&invocation))
            .map_err(|_| SubscriptionError::Closed)?;

        let wait_for_completion = async {
            while let Some(completion) = connection.completions.recv().await {
                if completion.invocation_id.as_deref() == Some(invocation_id.as_str()) {
                    return match completion.error {
                        Some(error) => Err(SubscriptionError::Subscribe(error)),
                        None => Ok(()),
                    };
                }
            }
            Err(SubscriptionError::Closed)
        };

        timeout(INVOCATION_TIMEOUT, wait_for_completion)
            .await
            .map_err(|_| SubscriptionError::Subscribe("no completion received".to_string()))?
    }

    async fn next_event(&mut self) -> Option<TzktEvent> {
        self.connection.as_mut()?.events.recv().await
    }
}
