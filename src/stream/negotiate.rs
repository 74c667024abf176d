use anyhow::{anyhow, ensure, Result};
use url::Url;

use crate::forward::TrackFlow;

/// One media section of the upstream's SDP, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: usize,
    /// `control` attribute value; `Some("")` for a valueless attribute,
    /// `None` when the attribute is absent.
    pub control: Option<String>,
}

pub(crate) fn track_list(sdp: &sdp_types::Session) -> Vec<Track> {
    sdp.medias
        .iter()
        .enumerate()
        .map(|(id, media)| Track {
            id,
            control: media
                .attributes
                .iter()
                .find(|attr| attr.attribute == "control")
                .map(|attr| attr.value.clone().unwrap_or_default()),
        })
        .collect()
}

/// Derives the SETUP URL for a track.
///
/// No control attribute selects the stream URL itself; an absolute
/// `rtsp://` control is used as-is (stream URL on parse failure); anything
/// else is appended to the stream path, falling back to `trackID=<id+1>`
/// when empty. The stream URL's query survives in the last case.
pub(crate) fn setup_url(base: &Url, track: &Track) -> Url {
    let control = match &track.control {
        None => return base.clone(),
        Some(control) => control.as_str(),
    };
    if control.starts_with("rtsp://") {
        return Url::parse(control).unwrap_or_else(|_| base.clone());
    }

    let mut url = base.clone();
    let mut path = base.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    if control.is_empty() {
        path.push_str(&format!("trackID={}", track.id + 1));
    } else {
        path.push_str(control);
    }
    url.set_path(&path);
    url
}

pub(crate) fn udp_transport(rtp_port: u16) -> String {
    format!(
        "RTP/AVP/UDP;unicast;client_port={}-{}",
        rtp_port,
        rtp_port + 1
    )
}

pub(crate) fn tcp_transport(track_id: usize) -> String {
    let (rtp_channel, rtcp_channel) = track_channels(track_id);
    format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}")
}

/// Extracts the `server_port` pair from a SETUP Transport header. Both
/// ports must be present and non-zero.
pub(crate) fn parse_server_ports(transport: &str) -> Result<(u16, u16)> {
    let pair = transport
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("server_port="))
        .ok_or_else(|| anyhow!("no server_port in transport header"))?;

    let mut ports = pair.splitn(2, '-');
    let rtp: u16 = ports
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| anyhow!("bad server_port {pair:?}"))?;
    let rtcp: u16 = ports
        .next()
        .ok_or_else(|| anyhow!("server_port {pair:?} is not a pair"))?
        .parse()
        .map_err(|_| anyhow!("bad server_port {pair:?}"))?;
    ensure!(rtp != 0 && rtcp != 0, "zero server_port {pair:?}");
    Ok((rtp, rtcp))
}

/// Whether a SETUP response echoes the interleaved pair we asked for.
pub(crate) fn echoes_interleaved(transport: &str, track_id: usize) -> bool {
    let (rtp_channel, rtcp_channel) = track_channels(track_id);
    let token = format!("interleaved={rtp_channel}-{rtcp_channel}");
    transport.split(';').map(str::trim).any(|part| part == token)
}

/// Interleaved channel pair for a track: `(2i, 2i + 1)`.
pub(crate) fn track_channels(track_id: usize) -> (u8, u8) {
    ((track_id * 2) as u8, (track_id * 2 + 1) as u8)
}

/// Inverse of `track_channels`: even channels carry RTP, odd RTCP.
pub(crate) fn channel_track(channel: u8) -> (usize, TrackFlow) {
    let flow = if channel % 2 == 0 {
        TrackFlow::Rtp
    } else {
        TrackFlow::Rtcp
    };
    ((channel / 2) as usize, flow)
}
