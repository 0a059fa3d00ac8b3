//! Relay client session
//!
//! One WebSocket connection to a relay server. A background task prints every
//! text frame it receives; the caller drives the outbound side line by line and
//! closes the session when input ends.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::server::normal_close;

/// Errors that can occur during a client session
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("Failed to send message: {0}")]
    Send(#[source] WsError),

    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected client
pub struct ClientSession {
    url: String,
    sink: SplitSink<ClientStream, Message>,
    inbound: JoinHandle<()>,
}

impl ClientSession {
    /// Connect to `url` and start printing inbound messages to `output`
    pub async fn connect<W>(url: &str, output: W) -> ClientResult<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|source| ClientError::Connect {
                url: url.to_string(),
                source,
            })?;
        info!("Connected to {}", url);

        let (sink, stream) = ws_stream.split();
        let inbound = tokio::spawn(print_inbound(stream, output));

        Ok(Self {
            url: url.to_string(),
            sink,
            inbound,
        })
    }

    /// Whether the inbound loop has ended (peer closed or errored)
    #[cfg(test)]
    pub fn inbound_finished(&self) -> bool {
        self.inbound.is_finished()
    }

    /// Send one text frame
    pub async fn send(&mut self, text: &str) -> ClientResult<()> {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(ClientError::Send)
    }

    /// Send each input line until an empty line or end of input
    ///
    /// Returns the number of lines sent.
    pub async fn run_outbound<R>(&mut self, mut input: R) -> ClientResult<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        let mut sent = 0;

        loop {
            line.clear();
            if input.read_line(&mut line).await? == 0 {
                break;
            }

            let text = line.trim_end_matches(&['\r', '\n'][..]);
            if text.is_empty() {
                break;
            }

            self.send(text).await?;
            sent += 1;
        }

        Ok(sent)
    }

    /// Close the connection gracefully
    ///
    /// The inbound loop is left to finish on its own once the server
    /// acknowledges.
    pub async fn close(mut self) {
        if self.inbound.is_finished() {
            debug!("Server {} had already closed the connection", self.url);
        }
        if let Err(e) = self.sink.send(Message::Close(Some(normal_close()))).await {
            debug!("Close to {} not delivered: {}", self.url, e);
        }
        info!("Disconnected from {}", self.url);
    }
}

/// Connect to `url` and relay stdin lines until an empty line or EOF
pub async fn run(url: &str) -> ClientResult<()> {
    let mut session = ClientSession::connect(url, tokio::io::stdout()).await?;
    let stdin = BufReader::new(tokio::io::stdin());

    let result = session.run_outbound(stdin).await;
    session.close().await;

    let sent = result?;
    debug!("Sent {} messages", sent);
    Ok(())
}

async fn print_inbound<W>(mut stream: SplitStream<ClientStream>, mut output: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = write_line(&mut output, &text).await {
                    debug!("Failed to display message: {}", e);
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Inbound stream ended: {}", e);
                break;
            }
        }
    }
}

async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
