//! One TCP session with MPD

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::{parse_greeting, parse_line, Line, MpdCommand, MpdError, Response};

pub struct MpdConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    version: (u32, u32, u32),
    timeout: Duration,
}

impl MpdConnection {
    /// Connect and consume the greeting. `io_timeout` bounds the connect and
    /// every later response line.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self, MpdError> {
        let addr = format!("{}:{}", host, port);
        let stream = timeout(io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MpdError::Timeout)??;
        let _ = stream.set_nodelay(true);

        let (read_half, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer,
            version: (0, 0, 0),
            timeout: io_timeout,
        };
        let greeting = conn.read_line().await?;
        conn.version = parse_greeting(&greeting)?;
        Ok(conn)
    }

    pub fn version(&self) -> (u32, u32, u32) {
        self.version
    }

    /// Send one command and collect its response.
    pub async fn run(&mut self, cmd: &MpdCommand) -> Result<Response, MpdError> {
        self.writer.write_all(cmd.to_line().as_bytes()).await?;
        self.writer.flush().await?;

        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            match parse_line(&line)? {
                Line::Ok => return Ok(Response::new(pairs)),
                Line::Pair(key, value) => pairs.push((key, value)),
            }
        }
    }

    async fn read_line(&mut self) -> Result<String, MpdError> {
        let mut line = String::new();
        let n = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| MpdError::Timeout)??;
        if n == 0 {
            return Err(MpdError::Closed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}
