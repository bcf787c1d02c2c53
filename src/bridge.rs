//! Bridge - event loop wiring serial lines to the mixer
//!
//! Sources handled one at a time, in arrival order per source:
//! - lines from the ConnectionManager (throttled, then piped through
//!   the signal pipeline and the router)
//! - the throttle's trailing-edge deadline
//! - configuration reloads
//! - operator console commands
//! - ConnectionManager termination (exitOnDisconnect)
//! - the shutdown signal

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::ConnectionError;
use crate::mixer::{RefreshReason, VolumeSink};
use crate::router::VolumeRouter;
use crate::serial::connection::ConnectionManager;
use crate::serial::{ConnectionHandle, ConnectionSettings, RawLine, SerialTransport};
use crate::signal::{LineThrottle, PipelineSettings, SignalPipeline};

/// Lines buffered between the ConnectionManager and the bridge
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Operator console requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Rescan,
    Status,
    Sessions,
    Refresh,
    Quit,
}

/// Why the event loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    Console,
    /// Every input source has closed
    Drained,
}

pub struct Bridge {
    config: AppConfig,
    pipeline: SignalPipeline,
    throttle: LineThrottle,
    router: VolumeRouter,
    connection: ConnectionHandle,
    connection_task: JoinHandle<Result<(), ConnectionError>>,
    lines_rx: mpsc::Receiver<RawLine>,
}

impl Bridge {
    /// Build all components and start connecting
    pub fn start(
        config: AppConfig,
        transport: Arc<dyn SerialTransport>,
        sink: Arc<dyn VolumeSink>,
    ) -> Self {
        let (line_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (connection, connection_task) =
            ConnectionManager::spawn(transport, ConnectionSettings::from_config(&config), line_tx);

        match sink.output_devices() {
            Ok(devices) => {
                for device in &devices {
                    info!("Output device: {}", device);
                }
            }
            Err(e) => warn!("Could not list output devices: {}", e),
        }

        let router = VolumeRouter::from_config(sink, &config);
        info!(
            "Router initialized ({} sessions, {} mapped channels)",
            router.sessions().sessions().len(),
            config.mapping().len()
        );

        Self {
            pipeline: SignalPipeline::new(PipelineSettings::from_config(&config)),
            throttle: LineThrottle::default(),
            router,
            connection,
            connection_task,
            lines_rx,
            config,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Run until shutdown, console quit, or a fatal connection error
    pub async fn run(
        mut self,
        mut config_updates: mpsc::Receiver<AppConfig>,
        mut commands: mpsc::UnboundedReceiver<ConsoleCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<StopReason, ConnectionError> {
        info!("Ready to process slider events");
        tokio::pin!(shutdown);

        let mut config_open = true;
        let mut commands_open = true;

        let outcome = loop {
            let throttle_deadline = self.throttle.next_deadline();

            tokio::select! {
                Some(line) = self.lines_rx.recv() => {
                    if let Some(line) = self.throttle.offer(line, Instant::now()) {
                        self.process_line(&line);
                    }
                }

                _ = sleep_until(throttle_deadline.unwrap_or_else(Instant::now)), if throttle_deadline.is_some() => {
                    if let Some(line) = self.throttle.flush_due(Instant::now()) {
                        self.process_line(&line);
                    }
                }

                update = config_updates.recv(), if config_open => match update {
                    Some(new_config) => self.apply_config(new_config),
                    None => {
                        debug!("Config updates closed");
                        config_open = false;
                    }
                },

                command = commands.recv(), if commands_open => match command {
                    Some(ConsoleCommand::Quit) => break Ok(StopReason::Console),
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("Console closed");
                        commands_open = false;
                    }
                },

                joined = &mut self.connection_task => {
                    break match joined {
                        Ok(Ok(())) => Ok(StopReason::Drained),
                        Ok(Err(e)) => {
                            error!("Connection ended: {}", e);
                            Err(e)
                        }
                        Err(e) => {
                            error!("Connection task failed: {}", e);
                            Ok(StopReason::Drained)
                        }
                    };
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping event loop");
                    break Ok(StopReason::Signal);
                }
            }
        };

        self.connection.shutdown();
        outcome
    }

    fn process_line(&mut self, line: &RawLine) {
        for event in self.pipeline.process(&line.text) {
            debug!("Slider {} → {:.2}", event.channel, event.value);
            self.router.handle(event);
        }
    }

    fn apply_config(&mut self, config: AppConfig) {
        info!("📝 Applying reloaded configuration");

        self.connection
            .update_settings(ConnectionSettings::from_config(&config));
        self.pipeline
            .update_settings(PipelineSettings::from_config(&config));
        self.router.update_config(&config);
        self.config = config;

        info!("✅ Configuration applied");
    }

    fn on_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Rescan => {
                info!("Manual rescan requested");
                self.connection.rescan();
            }
            ConsoleCommand::Status => {
                println!(
                    "Connection: {} | sessions cached: {} | mapped channels: {}",
                    self.connection.status(),
                    self.router.sessions().sessions().len(),
                    self.config.mapping().len()
                );
            }
            ConsoleCommand::Sessions => {
                for session in self.router.sessions().sessions() {
                    println!("  [{:>6}] {}", session.pid, session.name);
                }
            }
            ConsoleCommand::Refresh => self.router.refresh_sessions(RefreshReason::Manual),
            ConsoleCommand::Quit => {}
        }
    }
}
