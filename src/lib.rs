#![warn(missing_docs)]
/*! An AIS (Automatic Identification System) receiver and message-routing
daemon: it takes in NMEA 0183 `!AIVDM`/`!AIVDO` sentences (and a handful
of sibling formats) from one or more network feeds, reassembles
multi-fragment sentences, decodes them into typed messages, folds them
into a vessel database, and republishes the result over a set of output
streamers and an HTTP API.

This is a message-plane daemon, not a signal-processing one: demodulating
raw RF into NMEA sentences is somebody else's job (an SDR receiver, or
another AIS decoder feeding this one over the network). Everything here
starts from already-framed bytes on the wire.

# Architecture overview

```text
[ transport (TCP/TLS/WebSocket/MQTT) ]
               ↓ raw bytes
        [ nmea::Reassembler ]
               ↓ Message
  [ vessel::VesselDb ]   [ streamer::* outputs ]
               ↓
        [ http API ]
```

Each inbound feed is a [`transport::Transport`] chain terminating in an
[`nmea::Reassembler`], which turns fragmented sentences into
[`message::Message`]s and fans them out over a [`stream::Connection`] to
every subscriber interested in that message's group - normally the
vessel database and zero or more output streamers.
 */

pub mod config;
pub mod crc;
pub mod error;
pub mod frame;
/// Embedded HTTP API and SSE dashboard feed.
pub mod http;
/// Central logger: stderr, an in-memory ring, and an SSE broadcast channel.
pub mod logger;
pub mod message;
pub mod nmea;
/// Single-producer single-consumer bounded FIFOs, sitting between each
/// input's socket-reading half and its reassembly half.
pub mod ring;
pub mod stream;
/// Output streamers: UDP, persistent/non-persistent TCP, TCP listener
/// fan-out, HTTP POST, and MQTT.
pub mod streamer;
pub mod transport;
pub mod vessel;
