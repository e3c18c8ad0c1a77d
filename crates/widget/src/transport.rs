use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use casabot_api_types::{ClientMessage, ServerMessage};

const CHANNEL_CAPACITY: usize = 64;

/// An open chat socket, split into typed channels.
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub fn close(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Connect to `ws_url` and pump frames through typed channels.
pub async fn connect(ws_url: &str) -> Result<Connection> {
    let (socket, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("connecting to {ws_url}"))?;
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize client message: {e}");
                    continue;
                }
            };
            if sink.send(Message::text(json)).await.is_err() {
                debug!("socket closed while sending");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("socket error: {e}");
                    break;
                }
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => {
                    if inbound_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("ignoring unknown server frame: {e}"),
            }
        }
    });

    Ok(Connection {
        outbound: outbound_tx,
        inbound: inbound_rx,
        reader,
        writer,
    })
}
