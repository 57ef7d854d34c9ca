//! Native WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_channel::mpsc::unbounded;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Connector, TransportError, TransportEvent, TransportLink};

/// Opens real `ws://` / `wss://` connections.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = unbounded::<String>();
        let (in_tx, in_rx) = unbounded::<TransportEvent>();

        let link = TransportLink::new(out_tx, in_rx);
        let link_id = link.id.clone();

        // Read task: forwards text frames until the socket ends.
        let link_id_for_read = link_id.clone();
        let read_task = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx
                            .unbounded_send(TransportEvent::Message(text.to_string()))
                            .is_err()
                        {
                            // Link dropped; nobody is listening.
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        crate::log_info!("[{}] received close frame", link_id_for_read);
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Protocol-level pongs are answered by tungstenite itself.
                        crate::log_debug!("[{}] received transport ping", link_id_for_read);
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong, etc.
                    }
                    Some(Err(e)) => {
                        crate::log_error!("[{}] read error: {}", link_id_for_read, e);
                        break Some(e.to_string());
                    }
                    None => break None,
                }
            };
            let _ = in_tx.unbounded_send(TransportEvent::Closed { reason });
        });

        // Write task: ends when the link drops its sender, then closes the socket.
        tokio::spawn(async move {
            while let Some(text) = out_rx.next().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    crate::log_error!("[{}] send failed: {}", link_id, e);
                    return;
                }
            }
            let _ = write.close().await;
            crate::log_debug!("[{}] write half closed", link_id);
        });

        Ok(link.with_task(read_task))
    }
}
