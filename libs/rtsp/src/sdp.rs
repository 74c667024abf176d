use anyhow::{anyhow, Result};
use sdp::description::common::Attribute;
use sdp::SessionDescription;
use std::io::Cursor;

/// Rewrites the SDP from a DESCRIBE response into the description served
/// to downstream subscribers.
///
/// Media sections keep only their codec attributes and get a fresh
/// `control:trackID=<i>` matching the proxy's track numbering; the
/// publisher's ports and any session-level control are dropped. Returns
/// the serialized bytes together with their re-parsed form.
pub fn filter_describe(raw: &[u8]) -> Result<(Vec<u8>, sdp_types::Session)> {
    let mut reader = Cursor::new(raw);
    let mut session = SessionDescription::unmarshal(&mut reader)
        .map_err(|e| anyhow!("failed to parse SDP: {e:?}"))?;

    session.attributes.retain(|attr| attr.key != "control");

    for (i, media) in session.media_descriptions.iter_mut().enumerate() {
        media
            .attributes
            .retain(|attr| matches!(attr.key.as_str(), "rtpmap" | "fmtp"));
        media.attributes.push(Attribute {
            key: "control".to_string(),
            value: Some(format!("trackID={i}")),
        });
        media.media_name.protos = vec!["RTP".to_string(), "AVP".to_string()];
        media.media_name.port.value = 0;
        media.media_name.port.range = None;
    }

    let filtered = session.marshal();
    let parsed = sdp_types::Session::parse(filtered.as_bytes())
        .map_err(|e| anyhow!("failed to re-parse filtered SDP: {e}"))?;
    Ok((filtered.into_bytes(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Camera\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
a=control:*\r\n\
m=video 5004 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1\r\n\
a=control:rtsp://127.0.0.1/cam/trackID=1\r\n\
m=audio 5006 RTP/AVP 0\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=control:rtsp://127.0.0.1/cam/trackID=2\r\n";

    #[test]
    fn test_controls_rewritten_per_track() {
        let (raw, parsed) = filter_describe(SDP.as_bytes()).unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert!(text.contains("a=control:trackID=0"));
        assert!(text.contains("a=control:trackID=1"));
        assert!(!text.contains("a=control:*"));
        assert!(!text.contains("rtsp://127.0.0.1/cam"));
        assert_eq!(parsed.medias.len(), 2);
    }

    #[test]
    fn test_codec_attributes_survive_and_ports_cleared() {
        let (raw, parsed) = filter_describe(SDP.as_bytes()).unwrap();
        let text = String::from_utf8(raw).unwrap();

        assert!(text.contains("a=rtpmap:96 H264/90000"));
        assert!(text.contains("a=fmtp:96 packetization-mode=1"));
        assert!(text.contains("m=video 0 RTP/AVP 96"));
        assert_eq!(parsed.medias[1].port, 0);
    }

    #[test]
    fn test_malformed_sdp_rejected() {
        assert!(filter_describe(b"not an sdp").is_err());
    }
}
