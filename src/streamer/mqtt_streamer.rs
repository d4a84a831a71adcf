//! MQTT publish output streamer, translated from `Source/IO/Protocol.h`'s
//! `Protocol::MQTT` used as an output sink: builds the `Tcp`\[`-> Tls`\]
//! `-> [WebSocket] -> Mqtt` chain from a broker URL scheme and republishes
//! every accepted message to a per-message topic.
//!
//! Grounded on spec.md \S4.6: "Topic is a template substituting `${mmsi}`,
//! `${channel}`, `${type}`, `${station}`."

use log::warn;
use tokio::sync::mpsc;

use super::{ChannelReceiver, MessageFormat, render};
use crate::frame::Tag;
use crate::message::Message;
use crate::transport::Transport;
use crate::transport::mqtt::MqttTransport;
use crate::transport::tcp::TcpTransport;
use crate::transport::tls::TlsTransport;
use crate::transport::websocket::WebSocketTransport;

/// MQTT streamer: formats each message, substitutes its topic template, and
/// publishes it.
pub struct MqttStreamer {
    transport: MqttTransport,
    topic_template: String,
    format: MessageFormat,
    station_id: i32,
}

impl MqttStreamer {
    /// Build the transport chain implied by `url`'s scheme
    /// (`mqtt://`/`mqtts://`/`ws://`/`wss://`) and wrap it in an
    /// [`MqttTransport`] publishing as `client_id`.
    pub fn new(url: &url::Url, client_id: impl Into<String>, format: MessageFormat) -> Result<Self, crate::error::Error> {
        let host = url
            .host_str()
            .ok_or_else(|| crate::error::Error::ConfigInvalid("mqtt streamer: url has no host".into()))?
            .to_string();

        let transport: Box<dyn Transport> = match url.scheme() {
            "mqtt" => {
                let port = url.port().unwrap_or(1883);
                Box::new(TcpTransport::new(host, port))
            }
            "mqtts" => {
                let port = url.port().unwrap_or(8883);
                let tcp = TcpTransport::new(host.clone(), port);
                Box::new(TlsTransport::new(host, tcp))
            }
            "ws" => {
                let port = url.port().unwrap_or(80);
                let tcp = TcpTransport::new(host.clone(), port);
                Box::new(WebSocketTransport::new(Box::new(tcp), host, url.path().to_string()))
            }
            "wss" => {
                let port = url.port().unwrap_or(443);
                let tcp = TcpTransport::new(host.clone(), port);
                let tls = TlsTransport::new(host.clone(), tcp);
                Box::new(WebSocketTransport::new(Box::new(tls), host, url.path().to_string()))
            }
            other => {
                return Err(crate::error::Error::ConfigInvalid(format!(
                    "mqtt streamer: unsupported scheme {other}"
                )));
            }
        };

        let mut mqtt = MqttTransport::new(transport, client_id.into());
        if let Some(pass) = url.password() {
            mqtt = mqtt.with_credentials(url.username(), pass);
        }

        Ok(Self {
            transport: mqtt,
            topic_template: "ais/data".to_string(),
            format,
            station_id: 0,
        })
    }

    /// Build from an already-structured [`crate::config::MqttConfig`]
    /// (as used by [`crate::config::SinkConfig::Mqtt`]) rather than a broker
    /// URL - the transport chain comes from [`crate::transport::build`]
    /// instead of being inferred from a URL scheme.
    #[must_use]
    pub fn from_config(cfg: &crate::config::MqttConfig, format: MessageFormat) -> Self {
        let inner = crate::transport::build(&cfg.transport);
        let mut mqtt = MqttTransport::new(inner, cfg.client_id.clone());
        if let Some(pass) = &cfg.password {
            mqtt = mqtt.with_credentials(cfg.username.clone().unwrap_or_default(), pass.clone());
        }
        if cfg.qos1 {
            mqtt = mqtt.with_qos1();
        }
        Self {
            transport: mqtt,
            topic_template: cfg.topic_template.clone(),
            format,
            station_id: 0,
        }
    }

    /// Override the publish topic template (default `"ais/data"`).
    #[must_use]
    pub fn with_topic_template(mut self, template: impl Into<String>) -> Self {
        self.topic_template = template.into();
        self
    }

    /// Publish at QoS 1 instead of the default QoS 0.
    #[must_use]
    pub fn with_qos1(mut self) -> Self {
        self.transport = self.transport.with_qos1();
        self
    }

    /// Stamp this station's id into `${station}` topic substitutions and
    /// every rendered message.
    #[must_use]
    pub fn with_station_id(mut self, station_id: i32) -> Self {
        self.station_id = station_id;
        self
    }

    /// Wire this streamer into a [`crate::stream::Connection`], returning
    /// the `Receiver` half to subscribe and spawning the publish-loop task.
    #[must_use]
    pub fn spawn(self) -> ChannelReceiver {
        let (recv, rx) = ChannelReceiver::new();
        tokio::spawn(self.run(rx));
        recv
    }

    fn topic_for(&self, msg: &Message) -> String {
        self.topic_template
            .replace("${mmsi}", &msg.mmsi().to_string())
            .replace("${channel}", &(msg.channel as char).to_string())
            .replace("${type}", &msg.kind().to_string())
            .replace("${station}", &self.station_id.to_string())
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<(Message, Tag)>) {
        while let Some((msg, tag)) = rx.recv().await {
            let Some(rendered) = render(self.format, &msg, &tag, self.station_id) else {
                continue;
            };

            if !self.transport.is_connected() && self.transport.connect().await.is_err() {
                warn!("mqtt streamer: connect failed, dropping message");
                continue;
            }

            self.transport.topic = self.topic_for(&msg);
            if let Err(e) = self.transport.send(rendered.as_bytes()).await {
                warn!("mqtt streamer: publish failed: {e}");
                self.transport.disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_uint(8, 30, 123_456_789).unwrap();
        m.set_length_bits(168);
        m
    }

    #[test]
    fn topic_template_substitutes_known_placeholders() {
        let url = url::Url::parse("mqtt://broker.example:1883").unwrap();
        let streamer = MqttStreamer::new(&url, "feeder-1", MessageFormat::JsonFull)
            .unwrap()
            .with_topic_template("ais/${type}/${mmsi}");
        let msg = sample_message();
        let topic = streamer.topic_for(&msg);
        assert_eq!(topic, format!("ais/{}/{}", msg.kind(), msg.mmsi()));
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let url = url::Url::parse("http://broker.example").unwrap();
        assert!(MqttStreamer::new(&url, "feeder-1", MessageFormat::Nmea).is_err());
    }

    #[test]
    fn from_config_uses_the_configured_topic_template() {
        let cfg = crate::config::MqttConfig {
            transport: Box::new(crate::config::TransportConfig::Tcp(crate::config::TcpConfig {
                host: "broker.example".into(),
                port: 1883,
                persistent: true,
                keep_alive: true,
            })),
            client_id: "feeder-1".into(),
            username: None,
            password: None,
            topic_template: "ais/${mmsi}".into(),
            qos1: false,
        };
        let streamer = MqttStreamer::from_config(&cfg, MessageFormat::JsonFull);
        let topic = streamer.topic_for(&sample_message());
        assert_eq!(topic, format!("ais/{}", sample_message().mmsi()));
    }
}
