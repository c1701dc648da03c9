//! Replay Controller
//!
//! Single-threaded event loop tying the pieces together. Transport reports,
//! pacing ticks and operator commands are multiplexed with `tokio::select!`
//! and handled one at a time, in arrival order. The controller is the only
//! mutator of the connection, the scheduler and the prediction view; the
//! outside world observes it through a `watch` channel of [`ViewState`].

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::PredictionView;
use crate::connection::{
    event_channel, ConnectionEvent, ConnectionManager, ConnectionState, Transport,
    TransportEvent, TransportEventReceiver,
};
use crate::models::PredictionMessage;
use crate::replay::{ReplayScheduler, ReplayStats, StartOutcome, TickOutcome};

/// Operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Step,
    Restart,
    Status,
    Shutdown,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "step" | "send" => Ok(Command::Step),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Shutdown),
            other => Err(format!("unknown command: {other:?}")),
        }
    }
}

/// Everything externally observable about a replay session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub status: String,
    pub connection: ConnectionState,
    pub row: usize,
    pub total: usize,
    pub running: bool,
    pub latest_prediction: Option<PredictionMessage>,
    pub predictions_received: u64,
    pub messages_received: usize,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub endpoint: String,
    /// Start auto-sending as soon as the connection opens.
    pub auto_start: bool,
    /// Leave the loop once nothing more can happen: the dataset is
    /// exhausted (after `finish_grace`) or the connection is gone.
    pub exit_on_finish: bool,
    /// Time allowed for the last predictions to arrive after the final row.
    pub finish_grace: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/ws".to_string(),
            auto_start: true,
            exit_on_finish: false,
            finish_grace: Duration::from_secs(2),
        }
    }
}

pub struct ReplayController<T: Transport> {
    // Field order is drop order: the timer is disarmed before the link is
    // torn down.
    scheduler: ReplayScheduler,
    connection: ConnectionManager<T>,
    view: PredictionView,
    events_rx: TransportEventReceiver,
    view_tx: watch::Sender<ViewState>,
    options: ControllerOptions,
    finish_deadline: Option<Instant>,
}

impl<T: Transport> ReplayController<T> {
    pub fn new(transport: T, scheduler: ReplayScheduler, options: ControllerOptions) -> Self {
        let (events_tx, events_rx) = event_channel();
        let connection = ConnectionManager::new(transport, events_tx);
        let view = PredictionView::new();
        let initial = build_view(&connection, &scheduler, &view);
        let (view_tx, _) = watch::channel(initial);
        Self {
            scheduler,
            connection,
            view,
            events_rx,
            view_tx,
            options,
            finish_deadline: None,
        }
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn scheduler(&self) -> &ReplayScheduler {
        &self.scheduler
    }

    pub fn predictions(&self) -> &PredictionView {
        &self.view
    }

    pub fn replay_stats(&self) -> &ReplayStats {
        self.scheduler.stats()
    }

    pub fn snapshot(&self) -> ViewState {
        build_view(&self.connection, &self.scheduler, &self.view)
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Open the configured endpoint.
    pub fn connect(&mut self) {
        let endpoint = self.options.endpoint.clone();
        self.connection.open(&endpoint);
        self.publish();
    }

    /// Stop replay and tear down the link. Safe from any state.
    pub fn close(&mut self) {
        self.scheduler.stop_auto_sending();
        if let Some(event) = self.connection.close() {
            self.on_connection_event(event);
        }
        self.publish();
    }

    /// Feed one transport report through the state machine.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if let Some(produced) = self.connection.handle_transport_event(event) {
            self.on_connection_event(produced);
        }
        self.publish();
    }

    /// Drain every transport report already queued.
    pub fn drain_transport_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_transport_event(event);
            handled += 1;
        }
        handled
    }

    pub fn tick(&mut self) -> TickOutcome {
        let outcome = self.scheduler.on_tick(&mut self.connection);
        self.after_step(outcome);
        self.publish();
        outcome
    }

    /// Apply one operator command. Returns false for `Shutdown`.
    pub fn handle_command(&mut self, command: Command) -> bool {
        debug!(?command, "operator command");
        match command {
            Command::Start => {
                let outcome = self.scheduler.start_auto_sending(&mut self.connection);
                self.after_start(outcome);
            }
            Command::Stop => {
                self.scheduler.stop_auto_sending();
            }
            Command::Step => {
                let outcome = self.scheduler.send_sensor_data(&mut self.connection);
                self.after_step(outcome);
            }
            Command::Restart => {
                self.scheduler.restart();
                self.finish_deadline = None;
            }
            Command::Status => {
                let snapshot = self.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(json) => info!(target: "evap_replay::status", "{}", json),
                    Err(e) => warn!(error = %e, "failed to encode status"),
                }
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        self.publish();
        true
    }

    /// Connect and process events until shutdown. `commands` closing (for
    /// example stdin EOF) does not end the loop.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        self.connect();
        let mut commands_open = true;

        loop {
            if self.should_exit() {
                info!("Replay session finished");
                break;
            }

            let deadline = self.finish_deadline;
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.handle_transport_event(event);
                }
                _ = self.scheduler.next_tick() => {
                    self.tick();
                }
                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            debug!("command channel closed");
                            commands_open = false;
                        }
                    }
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    self.finish_deadline = None;
                    if self.options.exit_on_finish {
                        info!("Grace period after last row elapsed");
                        break;
                    }
                }
            }
        }

        self.close();
        let stats = self.scheduler.stats();
        info!(
            rows_sent = stats.rows_sent,
            skipped = stats.skipped_not_connected,
            predictions = self.view.prediction_count(),
            messages = self.view.log().len(),
            "📊 Replay summary"
        );
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                if self.options.auto_start {
                    let outcome = self.scheduler.start_auto_sending(&mut self.connection);
                    self.after_start(outcome);
                }
            }
            ConnectionEvent::MessageReceived(text) => {
                self.view.ingest(&text);
            }
            ConnectionEvent::Errored(_) => {}
            ConnectionEvent::Closed => {
                if self.scheduler.stop_auto_sending() {
                    warn!("Connection closed during replay; auto-send stopped");
                }
            }
        }
    }

    /// Nothing left to send once a start finds the dataset done or empty.
    fn after_start(&mut self, outcome: StartOutcome) {
        if matches!(
            outcome,
            StartOutcome::FinishedImmediately | StartOutcome::EmptyDataset | StartOutcome::Exhausted
        ) {
            self.arm_finish();
        }
    }

    fn after_step(&mut self, outcome: TickOutcome) {
        if matches!(
            outcome,
            TickOutcome::Finished { .. } | TickOutcome::EmptyDataset | TickOutcome::Exhausted
        ) {
            self.arm_finish();
        }
    }

    fn arm_finish(&mut self) {
        if self.options.exit_on_finish && self.finish_deadline.is_none() {
            self.finish_deadline = Some(Instant::now() + self.options.finish_grace);
        }
    }

    fn should_exit(&self) -> bool {
        self.options.exit_on_finish
            && self.connection.state() == ConnectionState::Disconnected
            && !self.scheduler.is_running()
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.snapshot());
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn build_view<T: Transport>(
    connection: &ConnectionManager<T>,
    scheduler: &ReplayScheduler,
    view: &PredictionView,
) -> ViewState {
    let (row, total) = scheduler.position();
    ViewState {
        status: connection.state().to_string(),
        connection: connection.state(),
        row,
        total,
        running: scheduler.is_running(),
        latest_prediction: view.latest().cloned(),
        predictions_received: view.prediction_count(),
        messages_received: view.log().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MemoryTransport, TransportEventKind};
    use crate::dataset::Dataset;
    use crate::models::{Record, SensorSchema};
    use crate::replay::{RunState, DEFAULT_INTERVAL};

    fn controller(n: usize, auto_start: bool) -> ReplayController<MemoryTransport> {
        let records = (0..n).map(|i| Record::new().with("part", i.to_string())).collect();
        let scheduler = ReplayScheduler::new(
            Dataset::from_records(records),
            SensorSchema::evaporator(),
            DEFAULT_INTERVAL,
        );
        let options = ControllerOptions {
            endpoint: "ws://test/ws".to_string(),
            auto_start,
            ..ControllerOptions::default()
        };
        ReplayController::new(MemoryTransport::new(), scheduler, options)
    }

    fn inject(c: &mut ReplayController<MemoryTransport>, kind: TransportEventKind) {
        assert!(c.connection().transport().inject(kind));
        c.drain_transport_events();
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("start".parse::<Command>(), Ok(Command::Start));
        assert_eq!(" STOP \n".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("send".parse::<Command>(), Ok(Command::Step));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Shutdown));
        assert!("dance".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn test_auto_start_on_open() {
        let mut c = controller(3, true);
        let view = c.subscribe_view();
        c.connect();
        assert_eq!(view.borrow().status, "Connecting");

        inject(&mut c, TransportEventKind::Opened);
        assert!(c.scheduler().is_running());
        assert_eq!(c.connection().transport().sent().len(), 1);

        let state = view.borrow().clone();
        assert_eq!(state.status, "Connected");
        assert_eq!((state.row, state.total), (2, 3));
        assert!(state.running);
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_start() {
        let mut c = controller(3, false);
        c.connect();
        inject(&mut c, TransportEventKind::Opened);
        assert!(!c.scheduler().is_running());

        assert!(c.handle_command(Command::Step));
        assert!(c.handle_command(Command::Start));
        assert!(c.scheduler().is_running());
        assert_eq!(c.connection().transport().sent().len(), 2);
        assert!(!c.handle_command(Command::Shutdown));
    }

    #[tokio::test]
    async fn test_prediction_updates_view() {
        let mut c = controller(2, true);
        let view = c.subscribe_view();
        c.connect();
        inject(&mut c, TransportEventKind::Opened);

        inject(&mut c, TransportEventKind::Message("not json".into()));
        assert!(view.borrow().latest_prediction.is_none());

        inject(
            &mut c,
            TransportEventKind::Message(r#"{"recommended_settings": {"x": 1.5}}"#.into()),
        );
        let state = view.borrow().clone();
        assert_eq!(state.latest_prediction.unwrap().setting("x"), Some(1.5));
        assert_eq!(state.messages_received, 2);
    }

    #[tokio::test]
    async fn test_repeated_prediction_is_counted() {
        let mut c = controller(2, false);
        let mut view = c.subscribe_view();
        c.connect();
        inject(&mut c, TransportEventKind::Opened);
        let _ = view.borrow_and_update();

        let same = r#"{"recommended_settings": {"x": 4.0}}"#;
        inject(&mut c, TransportEventKind::Message(same.into()));
        assert!(view.has_changed().unwrap());
        let first = view.borrow_and_update().clone();

        inject(&mut c, TransportEventKind::Message(same.into()));
        assert!(view.has_changed().unwrap());
        let second = view.borrow_and_update().clone();

        assert_eq!(first.latest_prediction, second.latest_prediction);
        assert_eq!(first.predictions_received, 1);
        assert_eq!(second.predictions_received, 2);
    }

    #[tokio::test]
    async fn test_transport_close_disarms_replay() {
        let mut c = controller(5, true);
        c.connect();
        inject(&mut c, TransportEventKind::Opened);
        assert!(c.scheduler().timer_armed());

        inject(&mut c, TransportEventKind::Error("reset".into()));
        assert_eq!(c.connection().state(), ConnectionState::Error);
        assert!(c.scheduler().is_running());

        inject(
            &mut c,
            TransportEventKind::Closed { code: Some(1011), reason: "internal".into() },
        );
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);
        assert_eq!(c.scheduler().run_state(), RunState::Idle);
        assert!(!c.scheduler().timer_armed());
    }

    #[tokio::test]
    async fn test_local_close_from_any_state() {
        let mut c = controller(5, true);
        c.close();
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);

        c.connect();
        inject(&mut c, TransportEventKind::Opened);
        assert!(c.scheduler().timer_armed());
        c.close();
        c.close();
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);
        assert!(!c.scheduler().timer_armed());
        assert_eq!(c.snapshot().status, "Disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_after_finish_grace() {
        let records = (0..3).map(|i| Record::new().with("part", i.to_string())).collect();
        let scheduler = ReplayScheduler::new(
            Dataset::from_records(records),
            SensorSchema::evaporator(),
            DEFAULT_INTERVAL,
        );
        let options = ControllerOptions {
            endpoint: "ws://test/ws".to_string(),
            auto_start: true,
            exit_on_finish: true,
            finish_grace: Duration::from_millis(500),
        };
        let mut c = ReplayController::new(MemoryTransport::auto_open(), scheduler, options);
        let (_tx, rx) = mpsc::channel(4);

        let start = Instant::now();
        c.run(rx).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2500) && elapsed < Duration::from_millis(2600));
        assert_eq!(c.connection().transport().sent().len(), 3);
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_with_empty_dataset() {
        let scheduler = ReplayScheduler::new(
            Dataset::from_records(Vec::new()),
            SensorSchema::evaporator(),
            DEFAULT_INTERVAL,
        );
        let options = ControllerOptions {
            endpoint: "ws://test/ws".to_string(),
            auto_start: true,
            exit_on_finish: true,
            finish_grace: Duration::from_millis(500),
        };
        let mut c = ReplayController::new(MemoryTransport::auto_open(), scheduler, options);
        let (_tx, rx) = mpsc::channel(4);

        let finished = tokio::time::timeout(Duration::from_secs(3600), c.run(rx)).await;
        assert!(finished.is_ok(), "run never returned");
        assert!(c.connection().transport().sent().is_empty());
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_after_exhaustion_arms_finish() {
        let mut c = controller(1, false);
        c.options.exit_on_finish = true;
        c.connect();
        inject(&mut c, TransportEventKind::Opened);

        assert!(c.handle_command(Command::Step));
        assert!(c.finish_deadline.is_some());

        c.finish_deadline = None;
        assert!(c.handle_command(Command::Start));
        assert_eq!(c.replay_stats().skipped_exhausted, 1);
        assert!(c.finish_deadline.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_command() {
        let mut c = controller(3, false);
        let (tx, rx) = mpsc::channel(4);
        tx.send(Command::Shutdown).await.unwrap();

        c.run(rx).await;
        assert_eq!(c.connection().state(), ConnectionState::Disconnected);
        assert!(c.connection().transport().sent().is_empty());
    }
}
