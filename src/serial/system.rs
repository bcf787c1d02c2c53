//! `serialport`-backed transport
//!
//! The port is read on a dedicated OS thread; complete lines are forwarded
//! to the async side over a channel.

use async_trait::async_trait;
use serialport::{DataBits, Parity, SerialPortType, StopBits};
use std::io::{BufRead, BufReader, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{LineStream, PortDescriptor, SerialTransport};
use crate::error::ConnectionError;

/// Read timeout; bounds how long the reader takes to notice a close
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Lines buffered between the reader thread and the event loop
const LINE_BUFFER: usize = 256;

/// System serial ports
#[derive(Debug, Default, Clone)]
pub struct SystemSerial;

impl SystemSerial {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SerialTransport for SystemSerial {
    async fn list(&self) -> Result<Vec<PortDescriptor>, ConnectionError> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| ConnectionError::Enumeration(e.to_string()))?
            .map_err(|e| ConnectionError::Enumeration(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => PortDescriptor {
                    path: port.port_name,
                    manufacturer: usb.manufacturer,
                    vendor_id: Some(format!("{:04x}", usb.vid)),
                },
                _ => PortDescriptor {
                    path: port.port_name,
                    ..Default::default()
                },
            })
            .collect())
    }

    async fn open(&self, path: &str, baud_rate: u32) -> Result<LineStream, ConnectionError> {
        let owned_path = path.to_string();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&owned_path, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .timeout(READ_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| ConnectionError::OpenFailure {
            path: path.to_string(),
            reason: e.to_string(),
        })?
        .map_err(|e| ConnectionError::OpenFailure {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let (released_tx, released_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_path = path.to_string();

        std::thread::Builder::new()
            .name(format!("serial-reader-{}", path))
            .spawn(move || {
                // The port is dropped when read_lines returns
                read_lines(port, tx, thread_stop, thread_path);
                let _ = released_tx.send(());
            })
            .map_err(|e| ConnectionError::OpenFailure {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(LineStream::new(rx, move || {
            stop.store(true, Ordering::SeqCst);
        })
        .with_release(released_rx))
    }
}

fn read_lines(
    port: Box<dyn serialport::SerialPort>,
    tx: mpsc::Sender<std::io::Result<String>>,
    stop: Arc<AtomicBool>,
    path: String,
) {
    let mut reader = BufReader::new(port);
    // Partial data survives read timeouts until the delimiter arrives
    let mut buf = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                debug!("Serial port {} reached end of stream", path);
                break;
            }
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    continue;
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                buf.clear();
                trace!("Serial line: {}", line);
                if tx.blocking_send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => {
                warn!("Serial read error on {}: {}", path, e);
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }

    debug!("Serial reader for {} stopped", path);
}
