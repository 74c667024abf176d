use anyhow::{anyhow, bail, Result};
use rtsp_types::{headers, Message, Method, Request, Response, StatusCode, Url, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{self, Duration};
use tracing::trace;

use crate::auth::Credentials;

const USER_AGENT: &str = "rtsp-proxy";

const READ_CHUNK_SIZE: usize = 8192;

// Cap on buffered, not-yet-parsed input. Interleaved payloads are at most
// 64 KiB each, so this holds several frames plus any response in between.
const MAX_PENDING_BYTES: usize = 512 * 1024;

/// RTSP 1.0 client side of a control connection.
///
/// Owns the transport stream for the lifetime of the session and numbers
/// every request with an incrementing CSeq. When credentials are present
/// they are applied to every request as a Basic `Authorization` header.
pub struct RtspClient<T> {
    stream: T,
    cseq: u32,
    session_id: Option<String>,
    credentials: Option<Credentials>,
    read_timeout: Duration,
    write_timeout: Duration,
    pending: Vec<u8>,
}

impl<T> RtspClient<T>
where
    T: AsyncReadExt + AsyncWriteExt + Unpin,
{
    pub fn new(
        stream: T,
        credentials: Option<Credentials>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            cseq: 1,
            session_id: None,
            credentials,
            read_timeout,
            write_timeout,
            pending: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn send_request(&mut self, request: &Request<Vec<u8>>) -> Result<()> {
        let mut buffer = Vec::new();
        request.write(&mut buffer)?;
        time::timeout(self.write_timeout, self.stream.write_all(&buffer))
            .await
            .map_err(|_| anyhow!("write timed out"))??;
        trace!("sent {:?} cseq={}", request.method(), self.cseq);
        Ok(())
    }

    /// Reads the next message from the connection: a response, a stray
    /// request, or an interleaved data frame. Input is accumulated across
    /// reads so a message split over several segments is reassembled.
    pub async fn read_message(&mut self) -> Result<Message<Vec<u8>>> {
        loop {
            if !self.pending.is_empty() {
                match Message::parse(&self.pending) {
                    Ok((message, consumed)) => {
                        self.pending.drain(..consumed);
                        return Ok(message);
                    }
                    Err(rtsp_types::ParseError::Incomplete(_)) => {}
                    Err(e) => bail!("malformed rtsp message: {e:?}"),
                }
            }

            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            let n = time::timeout(self.read_timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| anyhow!("read timed out"))??;
            if n == 0 {
                bail!("connection closed by peer");
            }
            if self.pending.len() + n > MAX_PENDING_BYTES {
                bail!("receive buffer overrun ({} bytes pending)", self.pending.len());
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn read_response(&mut self) -> Result<Response<Vec<u8>>> {
        match self.read_message().await? {
            Message::Response(response) => {
                trace!("received response {}", response.status());
                Ok(response)
            }
            _ => Err(anyhow!("expected a response message")),
        }
    }

    pub async fn send_options_request(&mut self, url: &Url) -> Result<Response<Vec<u8>>> {
        let mut builder = Request::builder(Method::Options, Version::V1_0)
            .request_uri(url.clone())
            .header(headers::CSEQ, self.cseq.to_string())
            .header(headers::USER_AGENT, USER_AGENT);
        if let Some(credentials) = &self.credentials {
            builder = builder.header(headers::AUTHORIZATION, credentials.basic_header());
        }
        if let Some(session_id) = &self.session_id {
            builder = builder.header(headers::SESSION, session_id.as_str());
        }
        let request = builder.empty();

        self.send_request(&request.map_body(|_| vec![])).await?;
        let response = self.read_response().await?;
        self.cseq += 1;
        Ok(response)
    }

    pub async fn send_describe_request(&mut self, url: &Url) -> Result<Response<Vec<u8>>> {
        let mut builder = Request::builder(Method::Describe, Version::V1_0)
            .request_uri(url.clone())
            .header(headers::CSEQ, self.cseq.to_string())
            .header(headers::USER_AGENT, USER_AGENT)
            .header(headers::ACCEPT, "application/sdp");
        if let Some(credentials) = &self.credentials {
            builder = builder.header(headers::AUTHORIZATION, credentials.basic_header());
        }
        let request = builder.empty();

        self.send_request(&request.map_body(|_| vec![])).await?;
        let response = self.read_response().await?;
        self.cseq += 1;
        Ok(response)
    }

    /// SETUP with a caller-built Transport header. On success the session
    /// identifier from the response is captured and echoed on every
    /// subsequent request.
    pub async fn send_setup_request(
        &mut self,
        url: &Url,
        transport: &str,
    ) -> Result<Response<Vec<u8>>> {
        let mut builder = Request::builder(Method::Setup, Version::V1_0)
            .request_uri(url.clone())
            .header(headers::CSEQ, self.cseq.to_string())
            .header(headers::USER_AGENT, USER_AGENT)
            .header(headers::TRANSPORT, transport);
        if let Some(credentials) = &self.credentials {
            builder = builder.header(headers::AUTHORIZATION, credentials.basic_header());
        }
        if let Some(session_id) = &self.session_id {
            builder = builder.header(headers::SESSION, session_id.as_str());
        }
        let request = builder.empty();

        self.send_request(&request.map_body(|_| vec![])).await?;
        let response = self.read_response().await?;
        self.cseq += 1;

        if response.status() == StatusCode::Ok {
            if let Some(session) = response.header(&headers::SESSION) {
                let session_id = session
                    .as_str()
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim();
                if !session_id.is_empty() {
                    self.session_id = Some(session_id.to_string());
                }
            }
        }
        Ok(response)
    }

    pub async fn send_play_request(&mut self, url: &Url) -> Result<Response<Vec<u8>>> {
        self.write_play_request(url).await?;
        self.read_response().await
    }

    /// Writes PLAY without waiting for the response. Interleaved sessions
    /// read it back themselves, as data frames may arrive first.
    pub async fn write_play_request(&mut self, url: &Url) -> Result<()> {
        let mut builder = Request::builder(Method::Play, Version::V1_0)
            .request_uri(url.clone())
            .header(headers::CSEQ, self.cseq.to_string())
            .header(headers::USER_AGENT, USER_AGENT);
        if let Some(credentials) = &self.credentials {
            builder = builder.header(headers::AUTHORIZATION, credentials.basic_header());
        }
        if let Some(session_id) = &self.session_id {
            builder = builder.header(headers::SESSION, session_id.as_str());
        }
        let request = builder.empty();

        self.send_request(&request.map_body(|_| vec![])).await?;
        self.cseq += 1;
        Ok(())
    }
}
