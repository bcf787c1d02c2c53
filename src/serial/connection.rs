//! ConnectionManager - serial connection lifecycle actor
//!
//! Owns the open serial link and drives the state machine
//! `Disconnected → Connecting → Connected`:
//! - failed attempts are retried with exponential backoff (1s doubling, capped at 60s)
//! - a settings change (port/baud), a lost link or a manual rescan abandons
//!   any in-flight attempt and starts over from the latest inputs
//! - a link that delivers no line for 5s is treated as lost
//!
//! All state is owned by the actor task; callers talk to it through a
//! [`ConnectionHandle`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{resolve_port, ConnectionSettings, LineStream, RawLine, SerialTransport};
use crate::error::ConnectionError;

/// Silence on an open link before it is considered stalled
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the retry delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Longest wait for a closed link to give its device back before reopening
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before retry number `attempt` (0-based): `min(60s, 2^attempt s)`
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Externally visible connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting { port: String, baud_rate: u32 },
    Connected { port: String, baud_rate: u32 },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting { port, baud_rate } => {
                write!(f, "connecting to {} at {} baud", port, baud_rate)
            }
            ConnectionStatus::Connected { port, baud_rate } => {
                write!(f, "connected to {} at {} baud", port, baud_rate)
            }
        }
    }
}

/// Commands accepted by the actor
#[derive(Debug)]
pub enum ConnectionCommand {
    /// New port/baud/detection settings from config
    UpdateSettings(ConnectionSettings),
    /// Re-evaluate the connection even if currently connected
    Rescan,
    /// Close the link and stop the actor
    Shutdown,
}

/// Handle for interacting with the ConnectionManager
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::UnboundedSender<ConnectionCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    pub fn update_settings(&self, settings: ConnectionSettings) {
        let _ = self.cmd_tx.send(ConnectionCommand::UpdateSettings(settings));
    }

    /// Manual rescan request
    pub fn rescan(&self) {
        debug!("Rescanning port");
        let _ = self.cmd_tx.send(ConnectionCommand::Rescan);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ConnectionCommand::Shutdown);
    }

    /// Current status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

/// Actor owning the serial link
pub struct ConnectionManager {
    transport: Arc<dyn SerialTransport>,
    settings: ConnectionSettings,
    link: Option<LineStream>,
    /// Fires once the previously closed link has dropped its device
    pending_release: Option<oneshot::Receiver<()>>,
    /// Consecutive failures since the last successful connection
    attempt: u32,
    retry_at: Option<Instant>,
    stall_deadline: Instant,
    cmd_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    line_tx: mpsc::Sender<RawLine>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    /// Spawn the actor; it connects immediately
    ///
    /// The task resolves to `Err` only when the `exitOnDisconnect` policy
    /// ends it.
    pub fn spawn(
        transport: Arc<dyn SerialTransport>,
        settings: ConnectionSettings,
        line_tx: mpsc::Sender<RawLine>,
    ) -> (ConnectionHandle, JoinHandle<Result<(), ConnectionError>>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let actor = Self {
            transport,
            settings,
            link: None,
            pending_release: None,
            attempt: 0,
            retry_at: Some(Instant::now()),
            stall_deadline: Instant::now() + STALL_TIMEOUT,
            cmd_rx,
            line_tx,
            status_tx,
        };

        let task = tokio::spawn(actor.run());
        (ConnectionHandle { cmd_tx, status_rx }, task)
    }

    async fn run(mut self) -> Result<(), ConnectionError> {
        info!("INIT | ConnectionManager");

        let result = loop {
            let step = if self.link.is_some() {
                self.serve_link().await
            } else {
                self.wait_for_attempt().await
            };
            if let ControlFlow::Break(result) = step {
                break result;
            }
        };

        self.close_link();
        self.set_status(ConnectionStatus::Disconnected);
        debug!("ConnectionManager stopped");
        result
    }

    /// Disconnected: wait for the retry timer or a command
    async fn wait_for_attempt(&mut self) -> ControlFlow<Result<(), ConnectionError>> {
        match self.retry_at {
            Some(retry_at) => {
                tokio::select! {
                    _ = sleep_until(retry_at) => self.attempt_connection().await,
                    cmd = self.cmd_rx.recv() => self.on_command(cmd),
                }
            }
            None => {
                let cmd = self.cmd_rx.recv().await;
                self.on_command(cmd)
            }
        }
    }

    /// Connecting: race the attempt against superseding commands
    async fn attempt_connection(&mut self) -> ControlFlow<Result<(), ConnectionError>> {
        self.retry_at = None;
        let settings = self.settings.clone();

        debug!(
            "Attempting connection for port {} at {} baud",
            settings.port, settings.baud_rate
        );
        self.set_status(ConnectionStatus::Connecting {
            port: settings.port.clone(),
            baud_rate: settings.baud_rate,
        });

        let attempt = try_connect(
            Arc::clone(&self.transport),
            settings.clone(),
            self.pending_release.take(),
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => return self.on_attempt_result(result, &settings),
                cmd = self.cmd_rx.recv() => {
                    let superseded = match &cmd {
                        Some(ConnectionCommand::UpdateSettings(new)) => settings.target_changed(new),
                        Some(ConnectionCommand::Rescan) => true,
                        _ => false,
                    };
                    let flow = self.on_command(cmd);
                    if flow.is_break() {
                        return flow;
                    }
                    if superseded {
                        debug!("In-flight connection attempt superseded");
                        self.set_status(ConnectionStatus::Disconnected);
                        return ControlFlow::Continue(());
                    }
                }
            }
        }
    }

    fn on_attempt_result(
        &mut self,
        result: Result<(LineStream, String), ConnectionError>,
        settings: &ConnectionSettings,
    ) -> ControlFlow<Result<(), ConnectionError>> {
        match result {
            Ok((link, port)) => {
                info!(
                    "Connection successful for port {} at {} baud",
                    port, settings.baud_rate
                );
                self.attempt = 0;
                self.link = Some(link);
                self.stall_deadline = Instant::now() + STALL_TIMEOUT;
                self.set_status(ConnectionStatus::Connected {
                    port,
                    baud_rate: settings.baud_rate,
                });
                ControlFlow::Continue(())
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.set_status(ConnectionStatus::Disconnected);

                if self.settings.exit_on_disconnect {
                    return ControlFlow::Break(Err(e));
                }

                let delay = backoff_delay(self.attempt);
                self.attempt = self.attempt.saturating_add(1);
                self.retry_at = Some(Instant::now() + delay);
                info!("Retrying connection in {}s (attempt #{})", delay.as_secs(), self.attempt);
                ControlFlow::Continue(())
            }
        }
    }

    /// Connected: forward lines, watch for stalls and commands
    async fn serve_link(&mut self) -> ControlFlow<Result<(), ConnectionError>> {
        let Some(link) = self.link.as_mut() else {
            return ControlFlow::Continue(());
        };

        tokio::select! {
            line = link.next_line() => match line {
                Some(Ok(text)) => {
                    self.stall_deadline = Instant::now() + STALL_TIMEOUT;
                    if self.line_tx.send(RawLine::new(text)).await.is_err() {
                        debug!("Line consumer dropped, stopping");
                        return ControlFlow::Break(Ok(()));
                    }
                    ControlFlow::Continue(())
                }
                Some(Err(e)) => {
                    warn!("Serial link error: {}", e);
                    self.on_link_lost()
                }
                None => {
                    warn!("Serial link closed");
                    self.on_link_lost()
                }
            },
            _ = sleep_until(self.stall_deadline) => {
                error!("Connection with device timed out");
                self.on_link_lost()
            }
            cmd = self.cmd_rx.recv() => self.on_command(cmd),
        }
    }

    fn on_link_lost(&mut self) -> ControlFlow<Result<(), ConnectionError>> {
        self.close_link();
        self.set_status(ConnectionStatus::Disconnected);

        if self.settings.exit_on_disconnect {
            return ControlFlow::Break(Err(ConnectionError::ExitOnDisconnect));
        }

        self.retry_at = Some(Instant::now());
        ControlFlow::Continue(())
    }

    fn on_command(
        &mut self,
        cmd: Option<ConnectionCommand>,
    ) -> ControlFlow<Result<(), ConnectionError>> {
        match cmd {
            None | Some(ConnectionCommand::Shutdown) => ControlFlow::Break(Ok(())),
            Some(ConnectionCommand::Rescan) => {
                info!("Manual port rescan requested");
                self.restart();
                ControlFlow::Continue(())
            }
            Some(ConnectionCommand::UpdateSettings(settings)) => {
                let changed = self.settings.target_changed(&settings);
                self.settings = settings;
                if changed {
                    info!(
                        "Serial settings changed to {} at {} baud",
                        self.settings.port, self.settings.baud_rate
                    );
                    self.restart();
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Drop the current link and connect again right away
    fn restart(&mut self) {
        if self.link.is_some() {
            self.close_link();
            self.set_status(ConnectionStatus::Disconnected);
        }
        self.retry_at = Some(Instant::now());
    }

    fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            self.pending_release = link.take_release();
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

/// One connection attempt from fixed inputs
async fn try_connect(
    transport: Arc<dyn SerialTransport>,
    settings: ConnectionSettings,
    release: Option<oneshot::Receiver<()>>,
) -> Result<(LineStream, String), ConnectionError> {
    // Serial devices open exclusively; reopening before the old reader let
    // go of the handle fails
    if let Some(release) = release {
        if tokio::time::timeout(RELEASE_TIMEOUT, release).await.is_err() {
            warn!(
                "Previous serial handle not released after {}ms, opening anyway",
                RELEASE_TIMEOUT.as_millis()
            );
        }
    }

    let ports = transport.list().await?;
    let port = resolve_port(&settings, &ports)?;
    let link = transport.open(&port, settings.baud_rate).await?;
    Ok((link, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::PortDescriptor;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum OpenBehavior {
        Succeed,
        /// Succeed, but the device stays held until the test releases it
        SucceedHeld,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct FakeTransport {
        ports: Mutex<Vec<PortDescriptor>>,
        script: Mutex<VecDeque<OpenBehavior>>,
        opens: Mutex<Vec<(String, Instant)>>,
        senders: Mutex<Vec<mpsc::Sender<std::io::Result<String>>>>,
        releases: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl FakeTransport {
        fn with_ports(paths: &[&str]) -> Arc<Self> {
            let t = Self::default();
            *t.ports.lock() = paths
                .iter()
                .map(|p| PortDescriptor {
                    path: p.to_string(),
                    ..Default::default()
                })
                .collect();
            Arc::new(t)
        }

        fn script(&self, steps: impl IntoIterator<Item = OpenBehavior>) {
            self.script.lock().extend(steps);
        }

        fn open_count(&self) -> usize {
            self.opens.lock().len()
        }

        fn open_times(&self) -> Vec<Instant> {
            self.opens.lock().iter().map(|(_, t)| *t).collect()
        }

        async fn push_line(&self, line: &str) {
            let tx = self.senders.lock().last().cloned().unwrap();
            tx.send(Ok(line.to_string())).await.unwrap();
        }
    }

    #[async_trait]
    impl SerialTransport for FakeTransport {
        async fn list(&self) -> Result<Vec<PortDescriptor>, ConnectionError> {
            Ok(self.ports.lock().clone())
        }

        async fn open(&self, path: &str, _baud_rate: u32) -> Result<LineStream, ConnectionError> {
            self.opens.lock().push((path.to_string(), Instant::now()));
            // Default behaviour once the script runs out: fail
            let step = self.script.lock().pop_front().unwrap_or(OpenBehavior::Fail);
            match step {
                OpenBehavior::Succeed => {
                    let (tx, rx) = mpsc::channel(16);
                    self.senders.lock().push(tx);
                    Ok(LineStream::new(rx, || {}))
                }
                OpenBehavior::SucceedHeld => {
                    let (tx, rx) = mpsc::channel(16);
                    let (release_tx, release_rx) = oneshot::channel();
                    self.senders.lock().push(tx);
                    self.releases.lock().push(release_tx);
                    Ok(LineStream::new(rx, || {}).with_release(release_rx))
                }
                OpenBehavior::Fail => Err(ConnectionError::OpenFailure {
                    path: path.to_string(),
                    reason: "access denied".to_string(),
                }),
                OpenBehavior::Hang => std::future::pending().await,
            }
        }
    }

    fn settings(port: &str) -> ConnectionSettings {
        ConnectionSettings {
            port: port.to_string(),
            baud_rate: 9600,
            auto_detect: false,
            manufacturers: Vec::new(),
            vendor_ids: Vec::new(),
            exit_on_disconnect: false,
        }
    }

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (0..9).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(backoff_delay(200), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_back_off() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_secs(200)).await;
        handle.shutdown();

        let times = transport.open_times();
        let gaps: Vec<u64> = times
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .take(8)
            .collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_success() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([
            OpenBehavior::Fail,
            OpenBehavior::Fail,
            OpenBehavior::Succeed,
            OpenBehavior::Fail,
        ]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (_handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        // fail @0, fail @1, connect @3, stall @8 -> reconnect fails @8, retry @9
        tokio::time::sleep(Duration::from_millis(9_500)).await;

        let start = transport.open_times()[0];
        let offsets: Vec<u64> = transport
            .open_times()
            .iter()
            .map(|t| (*t - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 1, 3, 8, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_port_is_retried() {
        let transport = FakeTransport::with_ports(&["COM1"]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM9"), line_tx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.open_count(), 0);
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);

        // The device shows up later
        transport.ports.lock().push(PortDescriptor {
            path: "COM9".into(),
            ..Default::default()
        });
        transport.script([OpenBehavior::Succeed]);
        // Attempts run at 0, 1, 3, 7 and 15s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_are_forwarded_and_reset_stall_timer() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed]);
        let (line_tx, mut line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.status().is_connected());
        transport.push_line("512|1023").await;
        assert_eq!(line_rx.recv().await.unwrap().text, "512|1023");

        tokio::time::sleep(Duration::from_secs(3)).await;
        transport.push_line("512|1023").await;
        line_rx.recv().await.unwrap();

        // 6s since connect but only 3s since the last line
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.status().is_connected());
        assert_eq!(transport.open_count(), 1);

        // 5s of silence
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_marks_disconnected_and_reconnects() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);
        let mut status = handle.subscribe();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.status().is_connected());
        status.borrow_and_update();

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(transport.open_count(), 2);
        assert!(status.has_changed().unwrap());
        assert!(handle.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_reconnects_while_connected() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.open_count(), 1);

        handle.rescan();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.open_count(), 2);
        assert!(handle.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_supersedes_in_flight_attempt() {
        let transport = FakeTransport::with_ports(&["COM3", "COM4"]);
        transport.script([OpenBehavior::Hang, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            handle.status(),
            ConnectionStatus::Connecting {
                port: "COM3".into(),
                baud_rate: 9600
            }
        );

        handle.update_settings(settings("COM4"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            handle.status(),
            ConnectionStatus::Connected {
                port: "COM4".into(),
                baud_rate: 9600
            }
        );
        let opened: Vec<String> = transport.opens.lock().iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(opened, vec!["COM3", "COM4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_supersedes_in_flight_attempt() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Hang, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(handle.status(), ConnectionStatus::Connecting { .. }));

        handle.rescan();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            handle.status(),
            ConnectionStatus::Connected {
                port: "COM3".into(),
                baud_rate: 9600
            }
        );
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_waits_for_previous_handle_release() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::SucceedHeld, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.status().is_connected());

        handle.rescan();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // old reader still owns the device
        assert_eq!(transport.open_count(), 1);
        assert!(!handle.status().is_connected());

        let release = transport.releases.lock().pop().unwrap();
        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.open_count(), 2);
        assert!(handle.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_proceeds_when_release_times_out() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::SucceedHeld, OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.rescan();

        tokio::time::sleep(RELEASE_TIMEOUT - Duration::from_millis(50)).await;
        assert_eq!(transport.open_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.open_count(), 2);
        assert!(handle.status().is_connected());
        // keep the held release alive until here
        assert_eq!(transport.releases.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_only_change_keeps_link() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionManager::spawn(transport.clone(), settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut updated = settings("COM3");
        updated.auto_detect = true;
        handle.update_settings(updated);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.open_count(), 1);
        assert!(handle.status().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_on_disconnect_ends_actor() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let mut config = settings("COM3");
        config.exit_on_disconnect = true;
        let (_handle, task) = ConnectionManager::spawn(transport.clone(), config, line_tx);

        let result = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::ExitOnDisconnect)));
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_on_failed_attempt() {
        let transport = FakeTransport::with_ports(&[]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let mut config = settings("COM3");
        config.exit_on_disconnect = true;
        let (_handle, task) = ConnectionManager::spawn(transport, config, line_tx);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::PortNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_actor() {
        let transport = FakeTransport::with_ports(&["COM3"]);
        transport.script([OpenBehavior::Succeed]);
        let (line_tx, _line_rx) = mpsc::channel(16);
        let (handle, task) = ConnectionManager::spawn(transport, settings("COM3"), line_tx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }
}
