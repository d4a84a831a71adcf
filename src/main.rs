//! Daemon entry point: load configuration, wire every inbound feed through
//! an [`nmea::Reassembler`] into the vessel database and configured output
//! streamers, optionally serve the embedded HTTP API, and run until SIGINT
//! or a non-persistent streamer's send failure asks to stop.
//!
//! Exit codes follow spec.md \S6: 0 normal, 1 configuration error. Codes 2/3
//! (device/network fatal) in the original belong to an SDR capture frontend
//! this daemon has none of - every network failure here is recoverable
//! (reconnect-and-continue) rather than process-fatal, so they're unused.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use tokio::sync::mpsc;

use aisd::config::{Config, InputConfig, OutputConfig, SinkConfig, TransportConfig};
use aisd::error::Error;
use aisd::http;
use aisd::logger::Logger;
use aisd::message::Message;
use aisd::nmea;
use aisd::ring::RingFifo;
use aisd::stream::{ALL_GROUPS, Receiver};
use aisd::streamer;
use aisd::streamer::ChannelReceiver;
use aisd::transport;
use aisd::vessel::persist::SnapshotHandle;

/// Per-input ring buffer sizing: 16 4KiB blocks, well above
/// `transport::MAX_FRAME_BYTES` so a single socket read never overflows it.
const FIFO_BLOCK_SIZE: usize = 4096;
const FIFO_BLOCK_COUNT: usize = 16;

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn load_config() -> Result<Config, Error> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| Error::ConfigInvalid("usage: aisd <config.json>".into()))?;
    let text = std::fs::read_to_string(&path).map_err(|e| Error::ConfigInvalid(format!("reading {path}: {e}")))?;
    serde_json::from_str(&text).map_err(|e| Error::ConfigInvalid(format!("parsing {path}: {e}")))
}

/// Whether the base TCP layer of a transport chain reconnects on failure,
/// regardless of how many TLS/WebSocket/MQTT layers sit on top of it.
fn root_is_persistent(cfg: &TransportConfig) -> bool {
    match cfg {
        TransportConfig::Tcp(c) => c.persistent,
        TransportConfig::Tls(c) => c.tcp.persistent,
        TransportConfig::WebSocket(w) => root_is_persistent(&w.transport),
        TransportConfig::Mqtt(m) => root_is_persistent(&m.transport),
    }
}

fn build_streamer(output: &OutputConfig, station_id: i32, shutdown: &mpsc::UnboundedSender<()>) -> Result<ChannelReceiver, Error> {
    let format = output.format;
    match &output.sink {
        SinkConfig::Udp { host, port, broadcast, reset_minutes } => {
            let mut s = streamer::udp::UdpStreamer::new(host.clone(), *port, format)
                .with_station_id(station_id)
                .with_reset_interval(Duration::from_secs(u64::from(*reset_minutes) * 60));
            if *broadcast {
                s = s.with_broadcast();
            }
            Ok(s.spawn())
        }
        SinkConfig::TcpClient { transport: t } => {
            let inner = transport::build(t);
            let mut s = streamer::tcp_client::TcpClientStreamer::new(inner, format).with_station_id(station_id);
            if !root_is_persistent(t) {
                s = s.non_persistent(shutdown.clone());
            }
            Ok(s.spawn())
        }
        SinkConfig::TcpListener { bind, port, client_timeout_secs } => {
            let s = streamer::tcp_listener::TcpListenerStreamer::new(bind.clone(), *port, format)
                .with_client_timeout(Duration::from_secs(u64::from(*client_timeout_secs)))
                .with_station_id(station_id);
            Ok(s.spawn())
        }
        SinkConfig::HttpPost { url, interval_secs, container, gzip } => {
            let mut s = streamer::http_post::HttpPostStreamer::new(url, Duration::from_secs(u64::from(*interval_secs)), *container)
                .map_err(|e| Error::ConfigInvalid(format!("http_post url {url}: {e}")))?
                .with_station_id(station_id);
            if *gzip {
                s = s.with_gzip();
            }
            if let Ok(parsed) = url::Url::parse(url)
                && let Some(pass) = parsed.password()
            {
                s = s.with_basic_auth(parsed.username(), pass);
            }
            Ok(s.spawn())
        }
        SinkConfig::Mqtt(cfg) => {
            let s = streamer::mqtt_streamer::MqttStreamer::from_config(cfg, format).with_station_id(station_id);
            Ok(s.spawn())
        }
    }
}

/// Push `data` into `fifo`, retrying on overflow rather than dropping or
/// splitting the write, per spec.md \S4.1 ("push... rejected, never
/// partially applied"). Overflow only persists if the consumer thread has
/// genuinely stalled, since `FIFO_BLOCK_SIZE * FIFO_BLOCK_COUNT` is well
/// above any single read's size.
async fn push_to_fifo(fifo: &RingFifo, data: &[u8]) {
    const MAX_ATTEMPTS: u32 = 50;
    for attempt in 0..MAX_ATTEMPTS {
        if fifo.push(data) {
            return;
        }
        if attempt == 0 {
            warn!("input: ring fifo full, backing off");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    warn!("input: ring fifo still full after backoff, dropping {} bytes", data.len());
}

/// Run one inbound feed: connect its transport and push whatever bytes it
/// produces into a [`RingFifo`], decoupling "read the socket" (this task)
/// from "reassemble NMEA" (a dedicated blocking thread draining the FIFO),
/// matching spec.md \S4.1's device-thread ownership model ("the FIFO is
/// written by the capture thread and drained by one worker thread per
/// device").
async fn run_input(input: InputConfig, reassembler_cfg: nmea::Config, subscribers: Vec<Arc<dyn Receiver<Message>>>) {
    let fifo = Arc::new(RingFifo::new(FIFO_BLOCK_SIZE, FIFO_BLOCK_COUNT));

    let consumer_fifo = fifo.clone();
    tokio::task::spawn_blocking(move || {
        let mut reassembler = nmea::Reassembler::new(reassembler_cfg);
        for sub in subscribers {
            reassembler.subscribe_messages(ALL_GROUPS, sub);
        }
        loop {
            if consumer_fifo.wait()
                && let Some(block) = consumer_fifo.front()
            {
                reassembler.feed_bytes(&block);
                consumer_fifo.pop();
            }
        }
    });

    let mut transport = transport::build(&input.transport);
    let mut buf = Vec::new();
    loop {
        if !transport.is_connected()
            && let Err(e) = transport.connect().await
        {
            warn!("input: connect failed: {e}, retrying in {}s", transport::RECONNECT_SECS);
            tokio::time::sleep(Duration::from_secs(transport::RECONNECT_SECS)).await;
            continue;
        }
        buf.clear();
        match transport.read(&mut buf).await {
            Ok(0) => {}
            Ok(_) => push_to_fifo(&fifo, &buf).await,
            Err(Error::WouldBlock) => {}
            Err(e) => {
                warn!("input: read failed: {e}");
                transport.disconnect().await;
            }
        }
    }
}

async fn run(cfg: Config, shutdown_tx: mpsc::UnboundedSender<()>) -> Result<(), Error> {
    let logger = Logger::install(log::Level::from_str(&cfg.log_level).unwrap_or(log::Level::Info));

    let snapshot = Arc::new(SnapshotHandle::new(now_secs(), cfg.vessel_db.capacity));

    if let Some(path) = &cfg.vessel_db.snapshot_path
        && let Ok(mut f) = std::fs::File::open(path)
    {
        match snapshot.load(&mut f) {
            Ok(true) => info!("vessel db: restored snapshot from {path}"),
            Ok(false) => warn!("vessel db: snapshot at {path} truncated or unrecognized, starting fresh"),
            Err(e) => warn!("vessel db: failed to read snapshot {path}: {e}"),
        }
    }
    snapshot.with_snapshot_mut(|snap| {
        let cutoff = cfg.station.long_range_cutoff_km;
        snap.counter.set_cutoff(cutoff);
        snap.seconds.set_cutoff(cutoff);
        snap.minutes.set_cutoff(cutoff);
        snap.hours.set_cutoff(cutoff);
        snap.days.set_cutoff(cutoff);
    });

    let mut subscribers: Vec<Arc<dyn Receiver<Message>>> = vec![snapshot.clone()];

    for output in &cfg.outputs {
        let recv = build_streamer(output, cfg.station.station_id, &shutdown_tx)?;
        subscribers.push(Arc::new(recv));
    }

    if let Some(http_cfg) = cfg.http.clone() {
        let state = http::AppState::new(snapshot.clone(), logger, cfg.station.station_id);
        subscribers.push(state.sse.clone());

        let serve_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(&http_cfg, serve_state).await {
                error!("http server exited: {e}");
            }
        });

        let signal_state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let json = signal_state.snapshot.with_snapshot(|snap| snap.counter.to_json(false)).to_string();
                signal_state.sse.publish_signal(json);
            }
        });
    }

    if let Some(path) = cfg.vessel_db.snapshot_path.clone() {
        let snapshot = snapshot.clone();
        let interval = Duration::from_secs(u64::from(cfg.vessel_db.snapshot_interval_minutes) * 60);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let tmp = format!("{path}.tmp");
                match std::fs::File::create(&tmp).and_then(|mut f| snapshot.save(&mut f)) {
                    Ok(()) => {
                        if let Err(e) = std::fs::rename(&tmp, &path) {
                            warn!("vessel db: failed to install snapshot {path}: {e}");
                        }
                    }
                    Err(e) => warn!("vessel db: failed to write snapshot {tmp}: {e}"),
                }
            }
        });
    }

    for input in cfg.inputs.clone() {
        let reassembler_cfg = nmea::Config {
            own_mmsi: cfg.station.own_mmsi.map_or(-1, |m| m as i32),
            station: cfg.station.station_id,
            station_lat: cfg.station.lat,
            station_lon: cfg.station.lon,
            ..nmea::Config::default()
        };
        let subs = subscribers.clone();
        tokio::spawn(run_input(input, reassembler_cfg, subs));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
    let ctrlc_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    }) {
        eprintln!("failed to install SIGINT handler: {e}");
        return std::process::ExitCode::from(1);
    }

    if let Err(e) = run(cfg, shutdown_tx).await {
        eprintln!("startup failed: {e}");
        return std::process::ExitCode::from(1);
    }

    shutdown_rx.recv().await;
    info!("shutting down");
    std::process::ExitCode::from(0)
}
