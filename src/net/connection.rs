//! Per-connection reader/writer task (spec §4.1).
//!
//! One task per accepted connection: read a [`Header`], read the declared
//! body into a pooled buffer, hand both to a [`RequestHandler`], and write
//! back whatever it returns framed the same way. Idle and I/O timeouts both
//! apply per read/write, matching the teacher's per-operation timeout
//! wrapping in its own connection loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::buffer::BufferPool;
use crate::net::timers::with_timeout;
use crate::protocol::{Command, Header};

/// Implemented by whatever assembles `FileOpContext`s and talks to the disk
/// worker pool (spec §4.2's dispatcher); kept as a trait so connection
/// handling can be tested without a real disk subsystem behind it.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, command: Command, body: &[u8]) -> (u8, Vec<u8>);
}

pub struct ConnectionConfig {
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
}

pub async fn serve_connection<H: RequestHandler>(
    mut stream: TcpStream,
    handler: &H,
    buffers: &BufferPool,
    config: &ConnectionConfig,
) -> std::io::Result<()> {
    loop {
        let mut header_buf = [0u8; crate::protocol::header::HEADER_LEN];
        match with_timeout(config.idle_timeout, stream.read_exact(&mut header_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()), // idle timeout: close quietly
        }

        let header = Header::parse(&mut &header_buf[..], buffers.buffer_size())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut body = buffers.acquire();
        body.resize(header.body_len as usize);
        with_timeout(config.io_timeout, stream.read_exact(body.as_mut_slice())).await??;

        let command = crate::protocol::Command::from_byte(header.cmd)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let (status, response_body) = handler.handle(command, body.as_slice()).await;
        drop(body);

        let response_header = Header::response(command.as_byte(), response_body.len() as u64, status);
        let mut out = response_header.to_bytes().to_vec();
        out.extend_from_slice(&response_body);
        with_timeout(config.io_timeout, stream.write_all(&out)).await??;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::command::Command as Cmd;
    use tokio::net::TcpListener;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, _command: Cmd, body: &[u8]) -> (u8, Vec<u8>) {
            (0, body.to_vec())
        }
    }

    #[tokio::test]
    async fn round_trips_one_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let buffers = BufferPool::new(4, 4096);
        let config = ConnectionConfig { idle_timeout: Duration::from_secs(5), io_timeout: Duration::from_secs(5) };

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let handler = EchoHandler;
            let _ = serve_connection(stream, &handler, &buffers, &config).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let header = Header::request(Cmd::ActiveTest.as_byte(), 5);
        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut resp_header = [0u8; crate::protocol::header::HEADER_LEN];
        client.read_exact(&mut resp_header).await.unwrap();
        let parsed = Header::parse(&mut &resp_header[..], 4096).unwrap();
        let mut resp_body = vec![0u8; parsed.body_len as usize];
        client.read_exact(&mut resp_body).await.unwrap();
        assert_eq!(resp_body, b"hello");

        drop(client);
        let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
    }
}
