//! Serial link to the fader controller
//!
//! The transport is a capability: it lists devices and opens one as a
//! stream of CRLF-delimited text lines. `ConnectionManager` owns the open
//! link and keeps it alive across failures, rescans and stalls.

pub mod connection;
pub mod system;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::ConnectionError;

pub use connection::{ConnectionHandle, ConnectionManager, ConnectionStatus};
pub use system::SystemSerial;

/// Device descriptor reported by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDescriptor {
    pub path: String,
    pub manufacturer: Option<String>,
    /// USB vendor id as lowercase hex, e.g. `1a86`
    pub vendor_id: Option<String>,
}

/// One line received from the device, without its delimiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    pub received_at: Instant,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Instant::now(),
        }
    }
}

/// Open serial link delivering text lines
///
/// Closing happens on `close()` or drop. A transport that releases the
/// device asynchronously attaches a release signal so the next open can
/// wait for it.
pub struct LineStream {
    rx: mpsc::Receiver<std::io::Result<String>>,
    closer: Option<Box<dyn FnOnce() + Send>>,
    released: Option<oneshot::Receiver<()>>,
}

impl LineStream {
    pub fn new(
        rx: mpsc::Receiver<std::io::Result<String>>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            closer: Some(Box::new(closer)),
            released: None,
        }
    }

    /// Attach a signal that fires (or is dropped) once the device handle is gone
    pub fn with_release(mut self, released: oneshot::Receiver<()>) -> Self {
        self.released = Some(released);
        self
    }

    /// Next line; `None` once the link has ended
    pub async fn next_line(&mut self) -> Option<std::io::Result<String>> {
        self.rx.recv().await
    }

    /// Release the underlying device; safe to call repeatedly
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
        self.rx.close();
    }

    /// Release signal, if the transport provided one
    pub fn take_release(&mut self) -> Option<oneshot::Receiver<()>> {
        self.released.take()
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("open", &self.closer.is_some())
            .finish()
    }
}

/// Serial transport capability
#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// List available serial devices
    async fn list(&self) -> Result<Vec<PortDescriptor>, ConnectionError>;

    /// Open a device with 8N1 framing
    async fn open(&self, path: &str, baud_rate: u32) -> Result<LineStream, ConnectionError>;
}

/// Connection parameters, live-updatable from config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub port: String,
    pub baud_rate: u32,
    pub auto_detect: bool,
    pub manufacturers: Vec<String>,
    pub vendor_ids: Vec<String>,
    pub exit_on_disconnect: bool,
}

impl ConnectionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            port: config.com_port.clone(),
            baud_rate: config.baud_rate,
            auto_detect: config.auto_com_port,
            manufacturers: config.manufacturer.to_vec(),
            vendor_ids: config.vendor_id.to_vec(),
            exit_on_disconnect: config.exit_on_disconnect,
        }
    }

    /// Whether switching to `other` requires a new connection
    pub fn target_changed(&self, other: &ConnectionSettings) -> bool {
        self.port != other.port || self.baud_rate != other.baud_rate
    }
}

/// Pick the path to open from the device list
///
/// The requested path wins when present. Otherwise, with auto-detection,
/// the first device whose manufacturer or vendor id is allow-listed is
/// substituted; without a match the requested path is still attempted.
pub fn resolve_port(
    settings: &ConnectionSettings,
    ports: &[PortDescriptor],
) -> Result<String, ConnectionError> {
    if ports.iter().any(|p| p.path == settings.port) {
        return Ok(settings.port.clone());
    }

    if !settings.auto_detect {
        return Err(ConnectionError::PortNotFound(settings.port.clone()));
    }

    info!("No device at '{}', attempting auto port detection", settings.port);

    let detected = ports.iter().find(|port| {
        let manufacturer_match = port
            .manufacturer
            .as_ref()
            .is_some_and(|m| settings.manufacturers.iter().any(|allowed| allowed == m));
        let vendor_match = port.vendor_id.as_ref().is_some_and(|vid| {
            settings
                .vendor_ids
                .iter()
                .any(|allowed| normalize_vendor_id(allowed) == normalize_vendor_id(vid))
        });
        manufacturer_match || vendor_match
    });

    match detected {
        Some(port) => {
            info!("Port detected at path {}", port.path);
            Ok(port.path.clone())
        }
        None => {
            debug!("Auto detection found no candidate among {} devices", ports.len());
            Ok(settings.port.clone())
        }
    }
}

fn normalize_vendor_id(vid: &str) -> String {
    let vid = vid.trim().to_ascii_lowercase();
    vid.strip_prefix("0x").unwrap_or(&vid).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: &str, auto_detect: bool) -> ConnectionSettings {
        ConnectionSettings {
            port: port.to_string(),
            baud_rate: 9600,
            auto_detect,
            manufacturers: vec!["wch.cn".to_string()],
            vendor_ids: vec!["0x2341".to_string()],
            exit_on_disconnect: false,
        }
    }

    fn ports() -> Vec<PortDescriptor> {
        vec![
            PortDescriptor {
                path: "COM1".into(),
                manufacturer: Some("Microsoft".into()),
                vendor_id: None,
            },
            PortDescriptor {
                path: "COM7".into(),
                manufacturer: Some("Arduino LLC".into()),
                vendor_id: Some("2341".into()),
            },
        ]
    }

    #[test]
    fn test_requested_path_present() {
        assert_eq!(resolve_port(&settings("COM1", false), &ports()).unwrap(), "COM1");
    }

    #[test]
    fn test_missing_path_without_auto_detect() {
        let err = resolve_port(&settings("COM9", false), &ports()).unwrap_err();
        assert!(matches!(err, ConnectionError::PortNotFound(p) if p == "COM9"));
    }

    #[test]
    fn test_auto_detect_by_vendor_id() {
        assert_eq!(resolve_port(&settings("COM9", true), &ports()).unwrap(), "COM7");
    }

    #[test]
    fn test_auto_detect_by_manufacturer() {
        let mut list = ports();
        list.push(PortDescriptor {
            path: "/dev/ttyUSB0".into(),
            manufacturer: Some("wch.cn".into()),
            vendor_id: Some("1a86".into()),
        });
        list.remove(1);
        assert_eq!(
            resolve_port(&settings("COM9", true), &list).unwrap(),
            "/dev/ttyUSB0"
        );
    }

    #[test]
    fn test_auto_detect_without_candidate_keeps_requested_path() {
        let list = vec![ports().remove(0)];
        assert_eq!(resolve_port(&settings("COM9", true), &list).unwrap(), "COM9");
    }

    #[test]
    fn test_target_changed_ignores_policy_fields() {
        let a = settings("COM1", false);
        let mut b = a.clone();
        b.exit_on_disconnect = true;
        b.auto_detect = true;
        assert!(!a.target_changed(&b));
        b.baud_rate = 115200;
        assert!(a.target_changed(&b));
    }
}
