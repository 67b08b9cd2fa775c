//! Client side of the matchmaking connection

use log::{debug, info, warn};
use shared::{parse_greeting, MatchGreeting};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    greeting: Option<MatchGreeting>,
}

impl Client {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        info!("Connected to {}", stream.peer_addr()?);
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            greeting: None,
        }
    }

    /// Greeting received so far, if any.
    pub fn greeting(&self) -> Option<MatchGreeting> {
        self.greeting
    }

    /// Sends bytes to the server; before the match starts they are replayed
    /// to the other players once it does.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    /// Blocks until the server announces the match.
    ///
    /// A server that is full closes the connection without a greeting; that
    /// is reported as `ConnectionRefused`.
    pub async fn wait_for_match(&mut self) -> io::Result<MatchGreeting> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "server closed the connection before a match was formed",
            ));
        }

        let greeting = parse_greeting(&line).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected greeting {:?}", line.trim_end()),
            )
        })?;

        info!(
            "Joined match {} as seat {} of {}",
            greeting.match_id, greeting.seat, greeting.seats
        );
        self.greeting = Some(greeting);
        Ok(greeting)
    }

    /// Pipes `input` to the match and the match to `output` until the server
    /// side closes. Returns the number of bytes received.
    pub async fn run<R, W>(self, mut input: R, mut output: W) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Client {
            mut reader,
            mut writer,
            ..
        } = self;

        let download = async {
            let received = tokio::io::copy_buf(&mut reader, &mut output).await?;
            output.flush().await?;
            Ok::<u64, io::Error>(received)
        };
        let upload = async {
            let sent = tokio::io::copy(&mut input, &mut writer).await?;
            writer.shutdown().await?;
            Ok::<u64, io::Error>(sent)
        };
        tokio::pin!(download);
        tokio::pin!(upload);

        let mut uploading = true;
        loop {
            tokio::select! {
                received = &mut download => {
                    info!("Match ended");
                    return received;
                }
                sent = &mut upload, if uploading => {
                    uploading = false;
                    match sent {
                        Ok(n) => debug!("Input closed after {} bytes", n),
                        Err(e) => warn!("Sending to the match failed: {}", e),
                    }
                }
            }
        }
    }
}
