//! InfluxDB line-protocol sink over UDP.
//!
//! Measurements are flattened to one line per record, tagged with the tag's
//! hardware address, and sent as datagrams. UDP keeps the write path
//! non-blocking; delivery retries and drop-with-log are handled by the
//! hub's sink writer.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use taghub_core::{Error, MeasurementSink, Result};
use taghub_types::MeasurementRecord;

/// Measurement sink speaking InfluxDB line protocol over UDP.
pub struct LineProtocolSink {
    socket: UdpSocket,
    measurement: String,
}

impl LineProtocolSink {
    /// Bind a local socket and associate it with the sink endpoint.
    pub async fn connect(endpoint: &str, measurement: impl Into<String>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(endpoint).await?;
        info!(endpoint, "measurement sink connected");
        Ok(Self {
            socket,
            measurement: measurement.into(),
        })
    }
}

#[async_trait]
impl MeasurementSink for LineProtocolSink {
    async fn write(&self, record: &MeasurementRecord) -> Result<()> {
        let line = format_line(&self.measurement, record);
        debug!(%line, "sending datagram");
        self.socket
            .send(line.as_bytes())
            .await
            .map_err(|e| Error::SinkUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Render one record as an InfluxDB line-protocol line with a nanosecond
/// timestamp.
pub fn format_line(measurement: &str, record: &MeasurementRecord) -> String {
    let mut line = escape_measurement(measurement);
    line.push_str(",address=");
    line.push_str(&escape_tag(record.device.as_str()));
    line.push(' ');

    let fields = record.measurement.fields();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(key);
        line.push('=');
        line.push_str(&value.to_string());
    }

    line.push(' ');
    line.push_str(&record.captured_at.unix_timestamp_nanos().to_string());
    line
}

fn escape_measurement(name: &str) -> String {
    name.replace(' ', "\\ ").replace(',', "\\,")
}

fn escape_tag(value: &str) -> String {
    value
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}
