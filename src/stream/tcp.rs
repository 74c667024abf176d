use anyhow::{anyhow, ensure, Context, Result};
use rtsp_types::{headers, Message, StatusCode};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{negotiate, Stream, Track};
use rtsp::RtspClient;

/// TCP session: every track rides the control connection on an interleaved
/// channel pair, so after PLAY this loops over tagged frames and hands
/// them to the distribution layer until termination or a connection error.
pub(crate) async fn run(
    stream: &Stream,
    mut client: RtspClient<TcpStream>,
    tracks: &[Track],
) -> Result<()> {
    for track in tracks {
        let url = negotiate::setup_url(&stream.target, track);
        let response = client
            .send_setup_request(&url, &negotiate::tcp_transport(track.id))
            .await
            .with_context(|| format!("SETUP track {}", track.id))?;
        ensure!(
            response.status() == StatusCode::Ok,
            "SETUP track {} returned {}",
            track.id,
            response.status()
        );
        let transport = response
            .header(&headers::TRANSPORT)
            .ok_or_else(|| anyhow!("SETUP track {}: no transport header", track.id))?
            .as_str();
        ensure!(
            negotiate::echoes_interleaved(transport, track.id),
            "SETUP track {}: interleaved channels not echoed",
            track.id
        );
        let (rtp_channel, rtcp_channel) = negotiate::track_channels(track.id);
        info!(
            "[STREAM {}] track {} via TCP, interleaved={}-{}",
            stream.path, track.id, rtp_channel, rtcp_channel
        );
    }

    // The publisher may start pushing frames before its PLAY response;
    // skip them until the response shows up.
    client
        .write_play_request(&stream.target)
        .await
        .context("PLAY")?;
    let status = loop {
        tokio::select! {
            _ = stream.terminate.cancelled() => return Ok(()),
            message = client.read_message() => match message.context("PLAY response")? {
                Message::Response(response) => break response.status(),
                Message::Data(_) => continue,
                Message::Request(request) => {
                    debug!(
                        "[STREAM {}] ignoring {:?} from publisher",
                        stream.path,
                        request.method()
                    );
                }
            }
        }
    };
    ensure!(status == StatusCode::Ok, "PLAY returned {status}");

    stream.bridge.set_ready(&stream.path).await;
    info!("[STREAM {}] ready", stream.path);

    loop {
        tokio::select! {
            _ = stream.terminate.cancelled() => return Ok(()),
            message = client.read_message() => match message.context("interleaved read")? {
                Message::Data(data) => {
                    let (track_id, flow) = negotiate::channel_track(data.channel_id());
                    let payload = data.into_body();
                    stream
                        .bridge
                        .forward_track(&stream.path, track_id, flow, &payload)
                        .await;
                }
                Message::Response(_) => {}
                Message::Request(request) => {
                    debug!(
                        "[STREAM {}] ignoring {:?} from publisher",
                        stream.path,
                        request.method()
                    );
                }
            }
        }
    }
}
