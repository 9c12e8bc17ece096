// low-level stdio transport: framing (Content-Length) over any async byte stream
use crate::lsp::error::{LspError, Result};
use crate::lsp::message_parser::parse_message_from_slice;
use crate::lsp::transport::LspTransport;
use crate::lsp::types::Message;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const CONTENT_LENGTH: &str = "Content-Length";

/// Frames messages onto `writer` and reads frames back from `reader`.
///
/// Both halves are usually borrowed from a child process (`&mut ChildStdin`,
/// `&mut BufReader<ChildStdout>`), so the transport holds no state of its own
/// between calls.
pub struct StdioTransport<W, R> {
    writer: W,
    reader: R,
}

impl<W, R> StdioTransport<W, R> {
    pub fn new(writer: W, reader: R) -> Self {
        StdioTransport { writer, reader }
    }
}

#[async_trait::async_trait]
impl<W, R> LspTransport for StdioTransport<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> Result<()> {
        write_message_to(&mut self.writer, message).await
    }

    async fn receive(&mut self) -> Result<Message> {
        read_message_from(&mut self.reader).await
    }
}

/// Write a single LSP message with Content-Length framing and flush it.
pub(crate) async fn write_message_to<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let body = serde_json::to_vec(message).map_err(LspError::Encode)?;
    // byte length, not char count
    let header = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    debug!(bytes = body.len(), "sent frame");
    Ok(())
}

/// Read a single LSP message from an async reader (Content-Length framing).
pub(crate) async fn read_message_from<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncBufRead + Unpin + Send,
{
    let headers = read_headers(reader).await?;
    let content_length = get_content_length_from(&headers)?;
    let body = read_body(reader, content_length).await?;

    debug!(bytes = content_length, "received frame");
    parse_message_from_slice(&body)
}

/// Read header lines up to the blank separator line.
async fn read_headers<R>(reader: &mut R) -> Result<Vec<(String, String)>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut headers = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 || !line.ends_with(b"\n") {
            return Err(LspError::ConnectionClosed);
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(headers);
        }

        trace!(line = text, "header");
        let (key, value) =
            text.split_once(": ")
                .ok_or_else(|| LspError::MissingHeaderDelimiter {
                    line: text.to_string(),
                })?;
        headers.push((key.to_string(), value.to_string()));
    }
}

/// Extract Content-Length from parsed headers. Case-insensitive lookup.
pub(crate) fn get_content_length_from(headers: &[(String, String)]) -> Result<usize> {
    let (_, value) = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(CONTENT_LENGTH))
        .ok_or(LspError::MissingContentLength)?;

    value
        .trim()
        .parse::<usize>()
        .map_err(|_| LspError::InvalidContentLength {
            value: value.clone(),
        })
}

async fn read_body<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut body = Vec::with_capacity(len.min(64 * 1024));
    (&mut *reader).take(len as u64).read_to_end(&mut body).await?;

    if body.len() < len {
        return Err(LspError::TruncatedStream {
            expected: len,
            received: body.len(),
        });
    }
    Ok(body)
}
