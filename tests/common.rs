#![allow(dead_code)]

use std::sync::Arc;

use rtsp_types::{headers, Message, Method};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub const SINGLE_AUDIO_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=audio 0 RTP/AVP 0\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=control\r\n";

pub const TWO_TRACK_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Mock\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:trackID=1\r\n\
m=audio 0 RTP/AVP 0\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=control:trackID=2\r\n";

/// What the mock publisher answers with.
pub struct Behavior {
    pub options_status: u16,
    pub describe_content_type: &'static str,
    pub sdp: &'static str,
    /// Base of the `server_port` pair echoed on UDP SETUP.
    pub server_port_base: u16,
    /// Interleaved frames written right after the PLAY response.
    pub frames_after_play: Vec<(u8, Vec<u8>)>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            options_status: 200,
            describe_content_type: "application/sdp",
            sdp: SINGLE_AUDIO_SDP,
            server_port_base: 50000,
            frames_after_play: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Options,
    Describe,
    Setup { client_rtp_port: Option<u16> },
    Play,
}

/// Starts a mock RTSP publisher; handles any number of connections, so
/// the proxy can retry against it. Returns the stream URL and the request
/// event feed.
pub async fn start_upstream(behavior: Behavior) -> (String, UnboundedReceiver<Event>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, event_rx) = unbounded_channel();
    let behavior = Arc::new(behavior);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let behavior = behavior.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let _ = serve(socket, behavior, event_tx).await;
            });
        }
    });

    (format!("rtsp://{addr}/cam"), event_rx)
}

async fn serve(
    mut socket: TcpStream,
    behavior: Arc<Behavior>,
    events: UnboundedSender<Event>,
) -> std::io::Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        loop {
            let (request, consumed) = match Message::<Vec<u8>>::parse(&pending) {
                Ok((Message::Request(request), consumed)) => (request, consumed),
                Ok((_, consumed)) => {
                    pending.drain(..consumed);
                    continue;
                }
                Err(rtsp_types::ParseError::Incomplete(_)) => break,
                Err(_) => return Ok(()),
            };
            pending.drain(..consumed);

            let cseq = request
                .header(&headers::CSEQ)
                .map(|v| v.as_str().to_string())
                .unwrap_or_else(|| "1".to_string());

            match request.method() {
                Method::Options => {
                    let _ = events.send(Event::Options);
                    let reason = match behavior.options_status {
                        200 => "OK",
                        404 => "Not Found",
                        _ => "Error",
                    };
                    let response = format!(
                        "RTSP/1.0 {} {}\r\nCSeq: {}\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY\r\n\r\n",
                        behavior.options_status, reason, cseq
                    );
                    socket.write_all(response.as_bytes()).await?;
                }
                Method::Describe => {
                    let _ = events.send(Event::Describe);
                    let response = format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
                        cseq,
                        behavior.describe_content_type,
                        behavior.sdp.len(),
                        behavior.sdp
                    );
                    socket.write_all(response.as_bytes()).await?;
                }
                Method::Setup => {
                    let transport = request
                        .header(&headers::TRANSPORT)
                        .map(|v| v.as_str().to_string())
                        .unwrap_or_default();
                    let _ = events.send(Event::Setup {
                        client_rtp_port: client_rtp_port(&transport),
                    });

                    let reply_transport = if transport.contains("interleaved=") {
                        transport
                    } else {
                        format!(
                            "{};server_port={}-{}",
                            transport,
                            behavior.server_port_base,
                            behavior.server_port_base + 1
                        )
                    };
                    let response = format!(
                        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: 12345678\r\nTransport: {}\r\n\r\n",
                        cseq, reply_transport
                    );
                    socket.write_all(response.as_bytes()).await?;
                }
                Method::Play => {
                    let _ = events.send(Event::Play);
                    let response =
                        format!("RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: 12345678\r\n\r\n", cseq);
                    socket.write_all(response.as_bytes()).await?;

                    for (channel, payload) in &behavior.frames_after_play {
                        let mut frame = vec![
                            b'$',
                            *channel,
                            (payload.len() >> 8) as u8,
                            (payload.len() & 0xff) as u8,
                        ];
                        frame.extend_from_slice(payload);
                        socket.write_all(&frame).await?;
                    }
                }
                _ => {
                    let response = format!(
                        "RTSP/1.0 405 Method Not Allowed\r\nCSeq: {}\r\n\r\n",
                        cseq
                    );
                    socket.write_all(response.as_bytes()).await?;
                }
            }
        }
    }
}

fn client_rtp_port(transport: &str) -> Option<u16> {
    transport
        .split(';')
        .find_map(|part| part.strip_prefix("client_port="))
        .and_then(|pair| pair.split('-').next())
        .and_then(|port| port.parse().ok())
}
