use crate::error::{BrowserError, Result};
use crate::transport::connection::RawTransport;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Websocket implementation of [`RawTransport`].
///
/// Connects to a browser's devtools websocket endpoint and pumps incoming
/// text frames into the channel handed to `CdpConnection::connect`. The pump
/// task ends when the socket closes, which the connection observes as the
/// stream ending.
pub struct WsTransport {
    sink: tokio::sync::Mutex<WsSink>,
}

impl WsTransport {
    /// Connect to a devtools websocket URL (e.g. `ws://127.0.0.1:9222/...`).
    pub async fn connect(
        url: &str,
    ) -> Result<(std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>)> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed(e.to_string()))?;

        let (sink, mut read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::debug!("websocket read error: {}", err);
                        break;
                    }
                }
            }
        });

        let transport = std::sync::Arc::new(Self {
            sink: tokio::sync::Mutex::new(sink),
        });
        Ok((transport, rx))
    }
}

#[async_trait]
impl RawTransport for WsTransport {
    async fn send(&self, text: String) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BrowserError::ConnectionClosed(e.to_string()))
    }
}
