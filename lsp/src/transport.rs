//! `Content-Length` framed JSON-RPC transport.
//!
//! The server speaks standard LSP framing over stdio:
//! `Content-Length: N\r\n\r\n{json}`. [`MessageReader`] and
//! [`MessageWriter`] handle the framing on top of any async byte stream.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body to keep a misbehaving server from
/// ballooning memory.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages.
pub(crate) struct MessageReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
        }
    }

    /// Read the next message. `Ok(None)` means clean EOF before any
    /// header byte; EOF anywhere else is an error.
    pub async fn read(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(body_len) = self.read_header_block().await? else {
            return Ok(None);
        };

        if body_len > MAX_BODY_BYTES {
            bail!("Content-Length {body_len} exceeds maximum {MAX_BODY_BYTES}");
        }

        let mut body = vec![0u8; body_len];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading message body")?;

        let value = serde_json::from_slice(&body).context("parsing JSON-RPC message")?;
        Ok(Some(value))
    }

    /// Consume the header block up to the blank separator line and
    /// return the announced body length, or `None` on clean EOF.
    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut body_len = None;
        let mut line = String::new();
        let mut mid_block = false;

        loop {
            line.clear();
            let n = self
                .input
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if n == 0 {
                if mid_block {
                    bail!("unexpected EOF inside header block");
                }
                return Ok(None);
            }
            mid_block = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }

            // Header names parse case-insensitively; servers vary in
            // spelling. Other headers (Content-Type) are ignored.
            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .context("invalid Content-Length value")?;
                body_len = Some(len);
            }
        }

        match body_len {
            Some(len) => Ok(Some(len)),
            None => bail!("header block without Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages.
pub(crate) struct MessageWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Frame and write a message. Header and body go out as one write.
    pub async fn write(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("encoding JSON-RPC message")?;
        let mut frame = Vec::with_capacity(body.len() + 32);
        frame.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        frame.extend_from_slice(&body);

        self.output
            .write_all(&frame)
            .await
            .context("writing message frame")?;
        self.output.flush().await.context("flushing message frame")?;
        Ok(())
    }
}
