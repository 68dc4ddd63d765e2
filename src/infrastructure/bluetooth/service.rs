//! Wheel Session Module
//!
//! Owns one decoder and everything that happens around it while a wheel is
//! attached: command dispatch, keep-alive, reconnect and telemetry.

use crate::domain::commands::{cumulative_offsets, WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{
    AppEvent, ConnectionState, GpsFix, MessageSeverity, ReconnectState, StatusMessage, WheelState,
    WheelType,
};
use crate::domain::settings::SettingsService;
use crate::error::Result;
use crate::infrastructure::bluetooth::radio::{
    send_request, ConnectionStateHandle, RadioRequest, RadioSender,
};
use crate::infrastructure::connection::{
    CommandScheduler, DataWatchdog, KeepAliveTicker, ReconnectConfig, ReconnectManager,
    StartupConnector,
};
use crate::infrastructure::protocol::{create_decoder, WheelDecoder};
use crate::infrastructure::telemetry::{TelemetrySink, TelemetryThrottle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// How often the run loop checks the data watchdog
const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a session reacts to, processed strictly in order.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Bytes from the wheel's notify characteristic
    Notification(Vec<u8>),
    Command(WheelCommand),
    KeepAliveTick,
    Connection(ConnectionState),
    Gps(GpsFix),
    Shutdown,
}

pub struct WheelSession {
    decoder: Box<dyn WheelDecoder>,
    state: WheelState,
    config: DecoderConfig,
    radio: RadioSender,
    connection: ConnectionStateHandle,
    events: mpsc::UnboundedSender<AppEvent>,
    input: mpsc::UnboundedSender<SessionInput>,
    settings: Arc<Mutex<SettingsService>>,
    scheduler: CommandScheduler,
    keep_alive: KeepAliveTicker,
    watchdog: DataWatchdog,
    reconnect: ReconnectManager,
    startup: StartupConnector,
    startup_timeout: Duration,
    throttle: TelemetryThrottle,
    sink: Option<Box<dyn TelemetrySink>>,
    gps: Option<GpsFix>,
    stale_reported: bool,
}

impl WheelSession {
    /// Create a session for `wheel_type`. The returned receiver feeds
    /// [`run`](Self::run).
    pub fn new(
        wheel_type: WheelType,
        radio: RadioSender,
        connection: ConnectionStateHandle,
        events: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<SessionInput>)> {
        let decoder = create_decoder(wheel_type)
            .ok_or_else(|| anyhow::anyhow!("No decoder for wheel type {}", wheel_type.as_str()))?;

        let (config, reconnect_config, startup_timeout, data_timeout) = {
            let settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            let s = settings.get();
            (
                s.decoder,
                ReconnectConfig::from_settings(s),
                s.startup_connect_timeout(),
                s.data_timeout(),
            )
        };

        let (input, input_rx) = mpsc::unbounded_channel();
        let session = Self {
            decoder,
            state: WheelState::new(wheel_type),
            config,
            reconnect: ReconnectManager::new(reconnect_config, radio.clone(), connection.subscribe()),
            startup: StartupConnector::new(radio.clone(), connection.subscribe()),
            radio,
            connection,
            events,
            input,
            settings,
            scheduler: CommandScheduler::new(),
            keep_alive: KeepAliveTicker::new(),
            watchdog: DataWatchdog::new(data_timeout),
            startup_timeout,
            throttle: TelemetryThrottle::default(),
            sink: None,
            gps: None,
            stale_reported: false,
        };
        Ok((session, input_rx))
    }

    pub fn input_sender(&self) -> mpsc::UnboundedSender<SessionInput> {
        self.input.clone()
    }

    pub fn state(&self) -> &WheelState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.decoder.is_ready()
    }

    pub fn set_telemetry_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sink = Some(sink);
    }

    /// Connect to the remembered wheel if auto-connect is enabled and the
    /// remembered wheel speaks this session's protocol.
    pub fn auto_connect(&mut self) -> anyhow::Result<bool> {
        let address = {
            let settings = self
                .settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            let s = settings.get();
            match (&s.last_wheel_address, s.last_wheel_type) {
                (Some(address), Some(kind)) if s.auto_connect && kind == self.decoder.wheel_type() => {
                    address.clone()
                }
                _ => return Ok(false),
            }
        };
        self.startup.attempt(&address, self.startup_timeout)?;
        Ok(true)
    }

    /// User-initiated connect; any reconnect loop is abandoned.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        self.reconnect.stop();
        send_request(
            &self.radio,
            RadioRequest::Connect {
                address: address.to_string(),
            },
        )
    }

    /// User-initiated disconnect; no reconnect follows.
    pub fn disconnect(&mut self) -> Result<()> {
        self.stop_timers();
        send_request(&self.radio, RadioRequest::Disconnect)
    }

    /// Encode and send `command`. Returns how many wire primitives were sent
    /// or scheduled; zero means the wheel does not support it.
    pub fn execute_command(&mut self, command: &WheelCommand) -> Result<usize> {
        let wires = self.decoder.build_command(command);
        if wires.is_empty() {
            debug!(
                "{:?} not supported by {}",
                command,
                self.decoder.wheel_type().as_str()
            );
            return Ok(0);
        }
        self.dispatch(&wires)?;
        Ok(wires.len())
    }

    /// Handle one input. Returns `false` once the session should end.
    pub fn handle_input(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Notification(data) => self.on_notification(&data),
            SessionInput::Command(command) => {
                if let Err(e) = self.execute_command(&command) {
                    warn!("Command {:?} failed: {}", command, e);
                    self.log_message(format!("Command failed: {}", e), MessageSeverity::Error);
                }
            }
            SessionInput::KeepAliveTick => self.on_keep_alive_tick(),
            SessionInput::Connection(state) => self.on_connection_state(state),
            SessionInput::Gps(fix) => self.gps = Some(fix),
            SessionInput::Shutdown => return false,
        }
        true
    }

    /// Process inputs and connection changes until shut down.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<SessionInput>) {
        let mut connection = self.connection.subscribe();
        let mut reconnect = self.reconnect.subscribe();
        let mut watchdog_check = tokio::time::interval(WATCHDOG_CHECK_INTERVAL);

        loop {
            tokio::select! {
                message = input.recv() => match message {
                    Some(message) => {
                        if !self.handle_input(message) {
                            break;
                        }
                    }
                    None => break,
                },
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = connection.borrow_and_update().clone();
                    self.on_connection_state(state);
                }
                changed = reconnect.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *reconnect.borrow_and_update();
                    let _ = self.events.send(AppEvent::ReconnectStatus(state));
                }
                _ = watchdog_check.tick() => self.check_watchdog(),
            }
        }

        self.stop_timers();
        info!("Wheel session ended");
    }

    fn on_notification(&mut self, data: &[u8]) {
        self.watchdog.on_data_received();
        if self.stale_reported {
            info!("Wheel data resumed");
            self.stale_reported = false;
        }
        trace!("Notification {}", hex::encode(data));

        let Some(result) = self.decoder.decode(data, &self.state, &self.config) else {
            return;
        };
        self.state = result.state;

        if !result.commands.is_empty() {
            if let Err(e) = self.dispatch(&result.commands) {
                warn!("Failed to send decoder request: {}", e);
            }
        }
        if result.has_new_data {
            let _ = self
                .events
                .send(AppEvent::WheelData(Box::new(self.state.clone())));
            self.record_telemetry();
        }
    }

    fn record_telemetry(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Some(sample) = self.throttle.offer(&self.state, self.gps) {
            if let Err(e) = sink.record(&sample) {
                warn!("Telemetry write failed: {:#}", e);
            }
        }
    }

    fn on_keep_alive_tick(&mut self) {
        if let Some(request) = self.decoder.keep_alive_request() {
            if let Err(e) = self.dispatch(&[request]) {
                warn!("Keep-alive write failed: {}", e);
            }
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        let _ = self.events.send(AppEvent::ConnectionStatus(state.clone()));
        match &state {
            ConnectionState::Connected { address, name } => {
                info!("Connected to {} ({})", name, address);
                self.reconnect.stop();
                self.watchdog.reset();
                self.stale_reported = false;
                self.start_keep_alive();
                self.remember_wheel(address);
                self.log_message(format!("Connected to {}", name), MessageSeverity::Success);
            }
            ConnectionState::ConnectionLost { address, reason } => {
                warn!("Connection to {} lost: {}", address, reason);
                self.keep_alive.stop();
                self.scheduler.cancel_all();
                self.decoder.reset();
                if self.reconnect.state() == ReconnectState::Idle {
                    self.reconnect.start(address);
                } else {
                    debug!("Reconnect to {} already running, keeping its backoff", address);
                }
                self.log_message(
                    format!("Connection lost ({}), reconnecting", reason),
                    MessageSeverity::Warning,
                );
            }
            ConnectionState::Disconnected => {
                self.keep_alive.stop();
                self.scheduler.cancel_all();
                self.decoder.reset();
            }
            ConnectionState::Failed { error } => {
                warn!("Connection failed: {}", error);
                self.log_message(format!("Connection failed: {}", error), MessageSeverity::Error);
            }
            ConnectionState::Scanning
            | ConnectionState::Connecting { .. }
            | ConnectionState::DiscoveringServices { .. } => {}
        }
    }

    fn start_keep_alive(&mut self) {
        let Some(interval) = self.decoder.keep_alive_interval() else {
            return;
        };
        let input = self.input.clone();
        self.keep_alive.start(
            interval,
            Duration::ZERO,
            Arc::new(move || {
                input
                    .send(SessionInput::KeepAliveTick)
                    .map_err(|_| anyhow::anyhow!("session input closed"))
            }),
        );
    }

    fn check_watchdog(&mut self) {
        if self.stale_reported || !self.connection.get().is_connected() {
            return;
        }
        if self.watchdog.is_timed_out() {
            warn!(
                "No wheel data for {:?}",
                self.watchdog.since_last_data()
            );
            self.stale_reported = true;
            self.log_message("No data from wheel".to_string(), MessageSeverity::Warning);
        }
    }

    fn remember_wheel(&self, address: &str) {
        let result = self
            .settings
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock error"))
            .and_then(|mut s| s.remember_wheel(address, self.decoder.wheel_type()));
        if let Err(e) = result {
            warn!("Could not remember wheel: {:#}", e);
        }
    }

    /// Send immediate primitives now and hand delayed ones to the scheduler.
    fn dispatch(&mut self, wires: &[WireCommand]) -> Result<()> {
        for (wire, offset) in wires.iter().zip(cumulative_offsets(wires)) {
            let bytes = wire.bytes().to_vec();
            if offset == 0 {
                send_request(&self.radio, RadioRequest::Write(bytes))?;
            } else {
                let radio = self.radio.clone();
                self.scheduler
                    .schedule(Duration::from_millis(offset), move || {
                        send_request(&radio, RadioRequest::Write(bytes)).map_err(Into::into)
                    });
            }
        }
        Ok(())
    }

    fn stop_timers(&mut self) {
        self.keep_alive.stop();
        self.scheduler.cancel_all();
        self.reconnect.stop();
        self.startup.cancel();
    }

    fn log_message(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .events
            .send(AppEvent::LogMessage(StatusMessage { message, severity }));
    }
}
