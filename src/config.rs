//! Typed configuration tree the rest of the daemon is constructed from.
//!
//! Loading this from TOML/JSON and CLI argument parsing are named external
//! collaborators (out of scope here); what belongs in this crate is the
//! `Deserialize`-able shape a loader populates, the way `sigmf.rs` models
//! on-disk structure with `serde` derives without owning the file format.

use serde::Deserialize;

use crate::vessel::VesselDb;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Receiving station identity, used to stamp outbound peer JSON and
    /// compute per-message distance/bearing.
    pub station: StationConfig,
    /// Inbound NMEA/JSON network sources to reassemble messages from.
    pub inputs: Vec<InputConfig>,
    /// Outbound streamers fed from the reassembled message stream.
    pub outputs: Vec<OutputConfig>,
    /// Vessel database sizing and persistence.
    pub vessel_db: VesselDbConfig,
    /// HTTP server, if enabled.
    pub http: Option<HttpConfig>,
    /// Minimum `log` level, as a string (`"trace"`..`"error"`).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station: StationConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            vessel_db: VesselDbConfig::default(),
            http: None,
            log_level: "info".to_string(),
        }
    }
}

/// Receiving station identity and position.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Receiving station id stamped into [`crate::frame::Tag::driver`]-
    /// adjacent peer JSON fields.
    pub station_id: i32,
    /// This receiver's own MMSI, distinguishing AIVDO from AIVDM, or `None`
    /// if not configured.
    pub own_mmsi: Option<u32>,
    /// Station latitude, degrees, if known (enables distance/bearing and
    /// radar-bucket statistics).
    pub lat: Option<f32>,
    /// Station longitude, degrees.
    pub lon: Option<f32>,
    /// Reject position enrichment beyond this great-circle distance, km,
    /// per spec.md \S4.7's spoofed-range guard.
    pub long_range_cutoff_km: f32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: 0,
            own_mmsi: None,
            lat: None,
            lon: None,
            long_range_cutoff_km: 500.0,
        }
    }
}

/// One inbound feed: a transport endpoint plus the framing it carries.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Transport endpoint.
    pub transport: TransportConfig,
    /// True if multi-fragment AIVDM sentences should be reassembled before
    /// messages are routed downstream; false passes every fragment as it
    /// arrives (rare, diagnostic use).
    #[serde(default = "default_true")]
    pub reassemble: bool,
}

/// One outbound streamer: a sink plus the wire format it emits.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// What this streamer writes to.
    pub sink: SinkConfig,
    /// Wire format, per spec.md \S4.6's `MessageFormat` enum.
    pub format: MessageFormat,
}

/// `MessageFormat`, named verbatim from spec.md \S4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageFormat {
    /// Raw/rebuilt `!AIVDM` sentence(s), newline-joined.
    Nmea,
    /// NMEA prefixed with an IEC 61162-450 tag block.
    NmeaTag,
    /// The custom `0xAC`-framed binary encoding.
    BinaryNmea,
    /// AIS-Catcher peer JSON, one object per NMEA sentence.
    JsonNmea,
    /// Sparse JSON: only fields a consumer is likely to need.
    JsonSparse,
    /// Every decoded field.
    JsonFull,
    /// Community-hub container format (AISCATCHER/AIRFRAMES JSON envelope).
    CommunityHub,
    /// Accept and discard (testing/benchmarking sink).
    Silent,
}

/// A transport endpoint, matching the `transport::` layer stack.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Plain TCP.
    Tcp(TcpConfig),
    /// TCP wrapped in TLS.
    Tls(TlsConfig),
    /// TLS (or plain TCP) wrapped in a WebSocket.
    WebSocket(WebSocketConfig),
    /// MQTT over any of the above.
    Mqtt(MqttConfig),
}

/// TCP endpoint settings, per `Protocol::TCP`.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Reconnect after failure rather than giving up permanently.
    #[serde(default = "default_true")]
    pub persistent: bool,
    /// Enable TCP keepalive.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

/// TLS endpoint settings, layered over a [`TcpConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// The TCP connection TLS is negotiated over.
    pub tcp: TcpConfig,
    /// SNI / certificate hostname, if different from `tcp.host`.
    pub server_name: Option<String>,
    /// Accept any peer certificate (self-signed aggregators).
    #[serde(default)]
    pub insecure: bool,
}

/// WebSocket endpoint settings, per `Protocol::WebSocket`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Underlying TCP or TLS transport.
    pub transport: Box<TransportConfig>,
    /// Request path, defaulting to `"/"` as in the original.
    #[serde(default = "default_path")]
    pub path: String,
    /// Send TEXT frames instead of BINARY.
    #[serde(default)]
    pub text: bool,
}

/// MQTT endpoint settings, per `Protocol::MQTT`.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Underlying transport (TCP, TLS, or WebSocket).
    pub transport: Box<TransportConfig>,
    /// MQTT client id.
    pub client_id: String,
    /// Broker username, if required.
    pub username: Option<String>,
    /// Broker password, if required.
    pub password: Option<String>,
    /// Publish topic, templated with `${mmsi}`/`${channel}`/`${type}`/
    /// `${station}`, per spec.md \S4.6's MQTT streamer.
    #[serde(default = "default_topic")]
    pub topic_template: String,
    /// Publish at QoS 1 instead of the default QoS 0.
    #[serde(default)]
    pub qos1: bool,
}

/// Where an [`OutputConfig`] streamer writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Fire-and-forget UDP datagrams.
    Udp {
        /// Destination host.
        host: String,
        /// Destination port.
        port: u16,
        /// Send to the broadcast address.
        #[serde(default)]
        broadcast: bool,
        /// Recreate the socket every N minutes, guarding against NAT
        /// timeouts, per spec.md \S4.6.
        #[serde(default = "default_reset_minutes")]
        reset_minutes: u32,
    },
    /// Persistent TCP client streamer.
    TcpClient {
        /// Outbound transport.
        transport: TransportConfig,
    },
    /// TCP listener fanning out to every accepted client.
    TcpListener {
        /// Local bind address.
        bind: String,
        /// Local bind port.
        port: u16,
        /// Per-client write timeout, seconds.
        #[serde(default = "default_client_timeout")]
        client_timeout_secs: u32,
    },
    /// Periodic HTTP POST of batched messages.
    HttpPost {
        /// Target URL.
        url: String,
        /// Batch interval, seconds.
        interval_secs: u32,
        /// Container format.
        container: HttpContainer,
        /// gzip the request body.
        #[serde(default)]
        gzip: bool,
    },
    /// MQTT (or MQTT-over-WS) publish streamer.
    Mqtt(MqttConfig),
}

/// HTTP POSTer container format, per spec.md \S4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpContainer {
    /// `{protocol, encodetime, stationid, receiver{...}, device{...},
    /// msgs:[...]}` container used by aiscatcher.org.
    Aiscatcher,
    /// Same container shape, different community endpoint.
    Airframes,
    /// jsonais group-of-paths payload, posted as multipart field `jsonais`.
    Aprs,
    /// Newline-joined raw NMEA sentences.
    Nmea,
}

/// Vessel database sizing and persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VesselDbConfig {
    /// Fixed slot capacity, per spec.md \S3 (`VesselDb::DEFAULT_CAPACITY`
    /// unless overridden).
    pub capacity: usize,
    /// Path to periodically write a binary snapshot to, if any.
    pub snapshot_path: Option<String>,
    /// Snapshot interval, minutes. Spec.md \S5 requires this stay `>= 5`.
    pub snapshot_interval_minutes: u32,
}

impl Default for VesselDbConfig {
    fn default() -> Self {
        Self {
            capacity: VesselDb::DEFAULT_CAPACITY,
            snapshot_path: None,
            snapshot_interval_minutes: 5,
        }
    }
}

/// HTTP server settings, per spec.md \S6's external interface subset this
/// crate implements (`/api/*` and `/api/sse|signal|log`; `/metrics` and
/// `/tiles/...` are out of scope per SPEC_FULL.md \S4).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Local bind address.
    pub bind: String,
    /// Local bind port.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_path() -> String {
    "/".to_string()
}

fn default_topic() -> String {
    "ais/data".to_string()
}

fn default_reset_minutes() -> u32 {
    30
}

fn default_client_timeout() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_station_and_db_sizing() {
        let cfg = Config::default();
        assert_eq!(cfg.vessel_db.capacity, VesselDb::DEFAULT_CAPACITY);
        assert_eq!(cfg.station.long_range_cutoff_km, 500.0);
        assert!(cfg.inputs.is_empty());
        assert!(cfg.outputs.is_empty());
    }

    #[test]
    fn transport_config_deserializes_tagged_variants() {
        let json = r#"{"kind":"tcp","host":"example.com","port":4001}"#;
        let t: TransportConfig = serde_json::from_str(json).unwrap();
        match t {
            TransportConfig::Tcp(c) => {
                assert_eq!(c.host, "example.com");
                assert_eq!(c.port, 4001);
                assert!(c.persistent);
            }
            _ => panic!("expected Tcp variant"),
        }
    }

    #[test]
    fn message_format_deserializes_screaming_snake_case() {
        let f: MessageFormat = serde_json::from_str("\"JSON_SPARSE\"").unwrap();
        assert_eq!(f, MessageFormat::JsonSparse);
    }
}
