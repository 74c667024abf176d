use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, ensure, Context, Result};
use rand::Rng;
use rtsp_types::{headers, StatusCode};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    negotiate, Stream, Track, CHECK_STREAM_INTERVAL, KEEPALIVE_INTERVAL, STREAM_DEAD_AFTER,
};
use crate::forward::{DistributionBridge, TrackFlow};
use rtsp::RtspClient;

// Even RTP ports only, each paired with port + 1 for RTCP.
const RTP_PORT_MIN: u16 = 10000;
const RTP_PORT_MAX: u16 = 65534;
const PORT_BIND_ATTEMPTS: usize = 20;

const RECV_BUFFER_SIZE: usize = 2048;

/// Timestamp of the last datagram seen on a listener, shared between its
/// receive task and the liveness watchdog.
#[derive(Clone)]
pub(crate) struct FrameClock(Arc<Mutex<Instant>>);

impl FrameClock {
    fn start() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn touch(&self) {
        *self.0.lock().unwrap() = Instant::now();
    }

    fn last_frame(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

/// A bound socket relaying one flow of one track.
struct UdpListener {
    socket: UdpSocket,
    path: String,
    track_id: usize,
    flow: TrackFlow,
    publisher_ip: IpAddr,
    publisher_port: u16,
    clock: FrameClock,
}

impl UdpListener {
    fn new(
        socket: UdpSocket,
        path: String,
        track_id: usize,
        flow: TrackFlow,
        publisher_ip: IpAddr,
        publisher_port: u16,
    ) -> Self {
        Self {
            socket,
            path,
            track_id,
            flow,
            publisher_ip,
            publisher_port,
            clock: FrameClock::start(),
        }
    }

    fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    async fn receive(self, bridge: Arc<dyn DistributionBridge>, stop: CancellationToken) {
        debug!(
            "[STREAM {}] track {} {} listener up, publisher {}:{}",
            self.path, self.track_id, self.flow, self.publisher_ip, self.publisher_port
        );
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, _)) => {
                        self.clock.touch();
                        bridge
                            .forward_track(&self.path, self.track_id, self.flow, &buf[..n])
                            .await;
                    }
                    Err(e) => {
                        debug!("[STREAM {}] {} receive: {}", self.path, self.flow, e);
                        break;
                    }
                }
            }
        }
    }
}

struct PortPair {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    rtp_port: u16,
}

/// Binds a random even RTP port with its odd RTCP partner, retrying with a
/// fresh draw when either bind loses the race.
async fn bind_pair() -> Result<PortPair> {
    for _ in 0..PORT_BIND_ATTEMPTS {
        let rtp_port = {
            let mut rng = rand::rng();
            rng.random_range((RTP_PORT_MIN / 2)..=(RTP_PORT_MAX / 2)) * 2
        };
        let rtp = match UdpSocket::bind(("0.0.0.0", rtp_port)).await {
            Ok(socket) => socket,
            Err(_) => continue,
        };
        match UdpSocket::bind(("0.0.0.0", rtp_port + 1)).await {
            Ok(rtcp) => {
                return Ok(PortPair {
                    rtp,
                    rtcp,
                    rtp_port,
                })
            }
            Err(_) => continue,
        }
    }
    bail!("no free rtp/rtcp port pair after {PORT_BIND_ATTEMPTS} attempts")
}

/// UDP session: SETUP every track on a fresh port pair, PLAY, then hold
/// the control connection as keepalive channel while the listeners relay
/// packets, until termination, a keepalive failure, or silence from the
/// publisher.
pub(crate) async fn run(
    stream: &Stream,
    mut client: RtspClient<TcpStream>,
    publisher_ip: IpAddr,
    tracks: &[Track],
) -> Result<()> {
    let mut listeners = Vec::with_capacity(tracks.len() * 2);
    for track in tracks {
        let pair = bind_pair().await?;
        let url = negotiate::setup_url(&stream.target, track);

        let response = client
            .send_setup_request(&url, &negotiate::udp_transport(pair.rtp_port))
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
        let (server_rtp, server_rtcp) = negotiate::parse_server_ports(transport)
            .with_context(|| format!("SETUP track {}", track.id))?;

        info!(
            "[STREAM {}] track {} via UDP, client_port={}-{} server_port={}-{}",
            stream.path,
            track.id,
            pair.rtp_port,
            pair.rtp_port + 1,
            server_rtp,
            server_rtcp
        );
        listeners.push(UdpListener::new(
            pair.rtp,
            stream.path.clone(),
            track.id,
            TrackFlow::Rtp,
            publisher_ip,
            server_rtp,
        ));
        listeners.push(UdpListener::new(
            pair.rtcp,
            stream.path.clone(),
            track.id,
            TrackFlow::Rtcp,
            publisher_ip,
            server_rtcp,
        ));
    }

    let response = client
        .send_play_request(&stream.target)
        .await
        .context("PLAY")?;
    ensure!(
        response.status() == StatusCode::Ok,
        "PLAY returned {}",
        response.status()
    );

    let clocks: Vec<FrameClock> = listeners.iter().map(UdpListener::clock).collect();
    let session = stream.terminate.child_token();
    let mut receivers = Vec::with_capacity(listeners.len());
    for listener in listeners {
        receivers.push(tokio::spawn(
            listener.receive(stream.bridge.clone(), session.clone()),
        ));
    }

    stream.bridge.set_ready(&stream.path).await;
    info!("[STREAM {}] ready", stream.path);

    let outcome = watch(stream, &mut client, &clocks).await;

    // Every listener is gone before the session returns.
    session.cancel();
    for receiver in receivers {
        let _ = receiver.await;
    }
    outcome
}

/// Steady state: keepalive on the control connection and a watchdog over
/// the listeners' last-frame clocks.
async fn watch(
    stream: &Stream,
    client: &mut RtspClient<TcpStream>,
    clocks: &[FrameClock],
) -> Result<()> {
    let started = Instant::now();
    let mut keepalive = time::interval_at(started + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    let mut liveness = time::interval_at(started + CHECK_STREAM_INTERVAL, CHECK_STREAM_INTERVAL);

    loop {
        tokio::select! {
            _ = stream.terminate.cancelled() => return Ok(()),
            _ = keepalive.tick() => {
                client
                    .send_options_request(&stream.base)
                    .await
                    .context("keepalive OPTIONS")?;
            }
            _ = liveness.tick() => {
                let newest = clocks
                    .iter()
                    .map(FrameClock::last_frame)
                    .max()
                    .unwrap_or(started);
                if newest.elapsed() >= STREAM_DEAD_AFTER {
                    bail!("stream is dead");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_pair_is_aligned_and_in_range() {
        for _ in 0..8 {
            let pair = bind_pair().await.unwrap();
            assert_eq!(pair.rtp_port % 2, 0);
            assert!((RTP_PORT_MIN..=RTP_PORT_MAX).contains(&pair.rtp_port));
            assert_eq!(pair.rtp.local_addr().unwrap().port(), pair.rtp_port);
            assert_eq!(pair.rtcp.local_addr().unwrap().port(), pair.rtp_port + 1);
        }
    }

    #[tokio::test]
    async fn test_frame_clock_advances_on_touch() {
        let clock = FrameClock::start();
        let before = clock.last_frame();
        time::sleep(time::Duration::from_millis(10)).await;
        clock.touch();
        assert!(clock.last_frame() > before);
    }
}
