// src/run/controller.rs
//! Run controller: start delay, paced pings, pause gate, logging

use super::{logger::RunLogger, params::RunParameters};
use crate::{
    error::{Result, StartRejection},
    gps::{Fix, GpsHealth, GpsReader},
    transponder::TransponderDriver,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    /// Counting down the start delay
    Starting,
    Pinging,
    /// Loop alive but held at the pause gate
    Paused,
}

/// Why the last run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of pings was reached
    Completed,
    /// `stop` was called
    Stopped,
    /// The transponder did not complete a pulse
    PingFailed,
    /// The GPS read loop ended during an unbypassed run
    GpsLost,
    /// A row could not be appended to the log file
    LogWriteFailed(String),
}

impl StopReason {
    pub fn description(&self) -> String {
        match self {
            StopReason::Completed => "Ping count reached".to_string(),
            StopReason::Stopped => "Stopped by operator".to_string(),
            StopReason::PingFailed => "Ping failed".to_string(),
            StopReason::GpsLost => "GPS lost".to_string(),
            StopReason::LogWriteFailed(msg) => format!("Log write failed: {}", msg),
        }
    }
}

/// Progress of the current (or last) run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub phase: RunPhase,
    pub ping_count: u64,
    pub countdown_remaining: u32,
    pub paused: bool,
    pub last_stop_reason: Option<StopReason>,
    pub log_path: Option<PathBuf>,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.phase != RunPhase::Idle
    }
}

/// Everything a control surface needs to draw itself
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub gps_connected: bool,
    pub gps_running: bool,
    pub gps_health: GpsHealth,
    pub transponder_connected: bool,
    pub is_running: bool,
    pub phase: RunPhase,
    pub paused: bool,
    pub ping_count: u64,
    pub countdown_remaining: u32,
    pub last_fix: Fix,
    pub last_stop_reason: Option<StopReason>,
    pub log_path: Option<PathBuf>,
}

struct RunTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything the background run loop needs
struct RunContext {
    params: RunParameters,
    interval: Duration,
    bypass_gps: bool,
    logger: RunLogger,
    gps: Arc<GpsReader>,
    transponder: Arc<TransponderDriver>,
    state: Arc<watch::Sender<RunState>>,
    pause: watch::Receiver<bool>,
    cancel: CancellationToken,
}

/// Coordinates the GPS reader, the transponder and the run log
pub struct RunController {
    gps: Arc<GpsReader>,
    transponder: Arc<TransponderDriver>,
    state: Arc<watch::Sender<RunState>>,
    pause: watch::Sender<bool>,
    task: Mutex<Option<RunTask>>,
}

impl RunController {
    pub fn new(gps: Arc<GpsReader>, transponder: Arc<TransponderDriver>) -> Self {
        let (state, _) = watch::channel(RunState::default());
        let (pause, _) = watch::channel(false);
        Self {
            gps,
            transponder,
            state: Arc::new(state),
            pause,
            task: Mutex::new(None),
        }
    }

    pub fn gps(&self) -> &Arc<GpsReader> {
        &self.gps
    }

    pub fn transponder(&self) -> &Arc<TransponderDriver> {
        &self.transponder
    }

    pub async fn connect_gps(&self, port: &str, baud_rate: u32) -> Result<()> {
        self.gps.connect(port, baud_rate).await
    }

    /// Stop any active run, then release the GPS
    pub async fn disconnect_gps(&self) {
        self.stop().await;
        self.gps.disconnect().await;
    }

    pub async fn connect_transponder(&self) -> Result<()> {
        self.transponder.connect().await
    }

    /// Stop any active run, then release the transponder
    pub async fn disconnect_transponder(&self) {
        self.stop().await;
        self.transponder.disconnect().await;
    }

    /// Arm a new run. Creates the log file and spawns the run loop, then
    /// returns the log path without waiting for the first ping.
    pub async fn start(&self, params: RunParameters, bypass_gps: bool) -> Result<PathBuf> {
        let mut task = self.task.lock().await;

        if self.state.borrow().is_running() {
            warn!("Already running");
            return Err(StartRejection::AlreadyRunning.into());
        }
        if !self.transponder.is_connected() {
            warn!("Transponder not connected. Ping run not started");
            return Err(StartRejection::TransponderDisconnected.into());
        }
        if !bypass_gps && !self.gps.is_running() {
            warn!("GPS not running. Ping run not started");
            return Err(StartRejection::GpsNotRunning.into());
        }
        params.validate()?;
        let interval = params.interval()?;

        // Reap a run that ended on its own
        if let Some(finished) = task.take() {
            if let Err(e) = finished.handle.await {
                error!("Previous run loop ended abnormally: {}", e);
            }
        }

        let logger = RunLogger::init_run(&params, &self.gps.fix())?;
        let log_path = logger.path().to_path_buf();

        self.pause.send_replace(false);
        self.state.send_replace(RunState {
            phase: RunPhase::Starting,
            ping_count: 0,
            countdown_remaining: params.start_delay_seconds,
            paused: false,
            last_stop_reason: None,
            log_path: Some(log_path.clone()),
        });

        let cancel = CancellationToken::new();
        let context = RunContext {
            params,
            interval,
            bypass_gps,
            logger,
            gps: Arc::clone(&self.gps),
            transponder: Arc::clone(&self.transponder),
            state: Arc::clone(&self.state),
            pause: self.pause.subscribe(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move {
            let state = Arc::clone(&context.state);
            let reason = run_loop(context).await;
            finish_run(&state, reason);
        });

        *task = Some(RunTask { cancel, handle });
        Ok(log_path)
    }

    /// Hold the run at its next iteration boundary
    pub fn pause(&self) {
        let applied = self.state.send_if_modified(|s| {
            if !s.is_running() || s.paused {
                return false;
            }
            s.paused = true;
            self.pause.send_replace(true);
            true
        });
        if applied {
            info!("Ping run paused");
        } else if !self.is_running() {
            warn!("Pause ignored, no run active");
        }
    }

    /// Release the pause gate
    pub fn resume(&self) {
        let was_paused = self.pause.send_replace(false);
        self.state.send_modify(|s| s.paused = false);
        if was_paused {
            info!("Ping run resumed");
        }
    }

    /// End the run and wait for the loop to exit. Safe to call at any time.
    pub async fn stop(&self) {
        self.resume();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!("Run loop ended abnormally: {}", e);
            }
        }

        self.state.send_modify(|s| {
            s.phase = RunPhase::Idle;
            s.ping_count = 0;
            s.countdown_remaining = 0;
            s.paused = false;
        });
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every run state change
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            gps_connected: self.gps.is_connected(),
            gps_running: self.gps.is_running(),
            gps_health: self.gps.health(),
            transponder_connected: self.transponder.is_connected(),
            is_running: state.is_running(),
            phase: state.phase,
            paused: state.paused,
            ping_count: state.ping_count,
            countdown_remaining: state.countdown_remaining,
            last_fix: self.gps.fix(),
            last_stop_reason: state.last_stop_reason,
            log_path: state.log_path,
        }
    }
}

fn finish_run(state: &watch::Sender<RunState>, reason: StopReason) {
    match &reason {
        StopReason::Completed | StopReason::Stopped => info!("Ping run ended: {}", reason.description()),
        _ => error!("Ping run aborted: {}", reason.description()),
    }
    state.send_modify(|s| {
        s.phase = RunPhase::Idle;
        s.countdown_remaining = 0;
        s.paused = false;
        s.last_stop_reason = Some(reason);
    });
}

async fn run_loop(mut ctx: RunContext) -> StopReason {
    let delay = ctx.params.start_delay_seconds;
    info!("Start delay: {} seconds", delay);

    // Pause does not hold the countdown; it takes effect before the first ping
    for remaining in (0..delay).rev() {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return StopReason::Stopped,
            _ = sleep(COUNTDOWN_TICK) => {}
        }
        ctx.state.send_modify(|s| s.countdown_remaining = remaining);
    }

    info!("Ping run started. Interval: {} seconds", ctx.params.ping_interval);
    if !*ctx.pause.borrow() {
        set_phase(&ctx.state, RunPhase::Pinging);
    }
    let limit = ctx.params.ping_limit();
    let interval = ctx.interval;

    loop {
        if !wait_while_paused(&mut ctx).await {
            return StopReason::Stopped;
        }

        if !ctx.bypass_gps && !ctx.gps.is_running() {
            return StopReason::GpsLost;
        }

        if !ctx.transponder.ping().await {
            return StopReason::PingFailed;
        }

        let fix = ctx.gps.fix();
        if let Err(e) = ctx.logger.append_row(&fix) {
            return StopReason::LogWriteFailed(e.to_string());
        }

        let mut count = 0;
        ctx.state.send_modify(|s| {
            s.ping_count += 1;
            count = s.ping_count;
        });

        if limit.is_some_and(|limit| count >= limit) {
            return StopReason::Completed;
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => return StopReason::Stopped,
            _ = sleep(interval) => {}
        }
    }
}

/// Block at the pause gate. Returns false if the run was cancelled.
async fn wait_while_paused(ctx: &mut RunContext) -> bool {
    if ctx.cancel.is_cancelled() {
        return false;
    }
    if !*ctx.pause.borrow_and_update() {
        return true;
    }

    info!("Ping run holding at pause gate");
    set_phase(&ctx.state, RunPhase::Paused);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return false,
            changed = ctx.pause.changed() => {
                if changed.is_err() {
                    // Controller dropped
                    return false;
                }
                let paused = *ctx.pause.borrow_and_update();
                if !paused {
                    break;
                }
            }
        }
    }

    info!("Ping run released from pause gate");
    set_phase(&ctx.state, RunPhase::Pinging);
    !ctx.cancel.is_cancelled()
}

fn set_phase(state: &watch::Sender<RunState>, phase: RunPhase) {
    state.send_modify(|s| s.phase = phase);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SurveyError,
        gps::GpsSettings,
        run::logger::FIELD_WIDTHS,
        transponder::{relay::mock::MockRelay, TransponderSettings},
    };
    use std::{fs, path::Path, time::Instant};
    use tokio::{
        io::{duplex, AsyncWriteExt, DuplexStream},
        time::timeout,
    };

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    async fn controller_with(relay: MockRelay) -> RunController {
        let gps = Arc::new(GpsReader::new(GpsSettings {
            read_timeout_ms: 50,
            ..GpsSettings::default()
        }));
        let transponder = Arc::new(TransponderDriver::new(TransponderSettings {
            dwell_ms: 1,
            ..TransponderSettings::default()
        }));
        transponder.connect_device(Box::new(relay)).await.unwrap();
        RunController::new(gps, transponder)
    }

    async fn controller() -> RunController {
        controller_with(MockRelay::new().0).await
    }

    /// Connect the controller's GPS to an in-memory stream, returning the device end
    async fn attach_gps(controller: &RunController) -> DuplexStream {
        let (device, host) = duplex(4096);
        controller.gps().connect_stream(host).await.unwrap();
        device
    }

    fn params(dir: &Path, number_of_pings: i64, ping_interval: f64) -> RunParameters {
        RunParameters {
            output_dir: dir.to_path_buf(),
            ship_name: "Leim".to_string(),
            transponder_depth: "1".to_string(),
            ping_interval,
            number_of_pings,
            start_delay_seconds: 0,
        }
    }

    async fn wait_until<F>(controller: &RunController, predicate: F) -> RunState
    where
        F: Fn(&RunState) -> bool,
    {
        let mut rx = controller.subscribe();
        let state = timeout(Duration::from_secs(5), rx.wait_for(|state| predicate(state)))
            .await
            .expect("timed out waiting for run state")
            .expect("run state channel closed")
            .clone();
        state
    }

    fn data_rows(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(7)
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_bounded_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, relay_log) = MockRelay::new();
        let controller = controller_with(relay).await;

        let started = Instant::now();
        let path = controller.start(params(dir.path(), 20, 0.05), true).await.unwrap();
        assert!(controller.is_running());

        let state = wait_until(&controller, |s| !s.is_running()).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(state.ping_count, 20);
        assert_eq!(state.last_stop_reason, Some(StopReason::Completed));
        assert!(path.to_string_lossy().ends_with("_Leim.ping"));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 6 + 1 + 20);
        for row in data_rows(&path) {
            let widths: Vec<usize> = row.split(',').map(str::len).collect();
            assert_eq!(widths, FIELD_WIDTHS.to_vec());
        }
        assert_eq!(relay_log.lock().unwrap().commands.len(), 40);
    }

    #[tokio::test]
    async fn test_unbounded_run_only_stops_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        controller.start(params(dir.path(), 0, 0.01), true).await.unwrap();
        wait_until(&controller, |s| s.ping_count >= 5).await;
        assert!(controller.is_running());

        controller.stop().await;

        let state = controller.state();
        assert_eq!(state.phase, RunPhase::Idle);
        assert_eq!(state.ping_count, 0);
        assert_eq!(state.last_stop_reason, Some(StopReason::Stopped));
    }

    #[tokio::test]
    async fn test_pause_resume_keeps_count_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        let path = controller.start(params(dir.path(), 0, 0.02), true).await.unwrap();
        wait_until(&controller, |s| s.ping_count >= 3).await;

        controller.pause();
        let paused = wait_until(&controller, |s| s.phase == RunPhase::Paused).await;
        assert!(paused.paused);
        let held = paused.ping_count;

        sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.state().ping_count, held);
        assert_eq!(data_rows(&path).len() as u64, held);
        assert!(controller.is_running());

        controller.resume();
        let resumed = wait_until(&controller, |s| s.ping_count >= held + 3).await;
        assert_eq!(resumed.log_path.as_deref(), Some(path.as_path()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let controller = controller().await;

        controller.stop().await;
        controller.stop().await;

        let state = controller.state();
        assert_eq!(state.phase, RunPhase::Idle);
        assert_eq!(state.ping_count, 0);
        assert_eq!(state.last_stop_reason, None);

        let dir = tempfile::tempdir().unwrap();
        controller.start(params(dir.path(), 2, 0.01), true).await.unwrap();
        wait_until(&controller, |s| !s.is_running()).await;
        controller.stop().await;
        controller.stop().await;

        let state = controller.state();
        assert_eq!(state.phase, RunPhase::Idle);
        assert_eq!(state.ping_count, 0);
        assert_eq!(state.last_stop_reason, Some(StopReason::Completed));
    }

    #[tokio::test]
    async fn test_stop_unblocks_paused_run() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        controller.start(params(dir.path(), 0, 0.01), true).await.unwrap();
        controller.pause();
        wait_until(&controller, |s| s.phase == RunPhase::Paused).await;

        timeout(Duration::from_secs(1), controller.stop())
            .await
            .expect("stop blocked on a paused run");

        let state = controller.state();
        assert!(!state.is_running());
        assert!(!state.paused);
        assert_eq!(state.last_stop_reason, Some(StopReason::Stopped));
    }

    #[tokio::test]
    async fn test_ping_failure_halts_run() {
        let dir = tempfile::tempdir().unwrap();
        // Three full pulses succeed, the fourth assert fails
        let controller = controller_with(MockRelay::failing_after(6).0).await;

        let path = controller.start(params(dir.path(), 0, 0.01), true).await.unwrap();
        let state = wait_until(&controller, |s| !s.is_running()).await;

        assert_eq!(state.last_stop_reason, Some(StopReason::PingFailed));
        assert_eq!(state.ping_count, 3);
        assert_eq!(data_rows(&path).len(), 3);
        assert!(!controller.transponder().is_connected());

        sleep(Duration::from_millis(50)).await;
        assert_eq!(data_rows(&path).len(), 3);

        assert!(matches!(
            controller.start(params(dir.path(), 0, 0.01), true).await,
            Err(SurveyError::StartRejected(StartRejection::TransponderDisconnected))
        ));
    }

    #[tokio::test]
    async fn test_start_preconditions() {
        let dir = tempfile::tempdir().unwrap();

        let gps = Arc::new(GpsReader::new(GpsSettings::default()));
        let transponder = Arc::new(TransponderDriver::new(TransponderSettings::default()));
        let disconnected = RunController::new(gps, transponder);
        assert!(matches!(
            disconnected.start(params(dir.path(), 1, 0.01), true).await,
            Err(SurveyError::StartRejected(StartRejection::TransponderDisconnected))
        ));

        let controller = controller().await;
        assert!(matches!(
            controller.start(params(dir.path(), 1, 0.01), false).await,
            Err(SurveyError::StartRejected(StartRejection::GpsNotRunning))
        ));

        let mut invalid = params(dir.path(), 1, 0.01);
        invalid.ping_interval = -1.0;
        assert!(matches!(
            controller.start(invalid, true).await,
            Err(SurveyError::InvalidParameters(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        controller.start(params(dir.path(), 0, 0.05), true).await.unwrap();
        assert!(matches!(
            controller.start(params(dir.path(), 0, 0.05), true).await,
            Err(SurveyError::StartRejected(StartRejection::AlreadyRunning))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_run_can_be_restarted_with_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        let first = controller.start(params(dir.path(), 2, 0.01), true).await.unwrap();
        wait_until(&controller, |s| !s.is_running()).await;
        let second = controller.start(params(dir.path(), 2, 0.01), true).await.unwrap();
        let state = wait_until(&controller, |s| !s.is_running()).await;

        assert_ne!(first, second);
        assert_eq!(state.ping_count, 2);
        assert_eq!(data_rows(&first).len(), 2);
        assert_eq!(data_rows(&second).len(), 2);
    }

    #[tokio::test]
    async fn test_rows_carry_latest_fix() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let mut device = attach_gps(&controller).await;
        device.write_all(RMC.as_bytes()).await.unwrap();

        let mut fix_rx = controller.gps().subscribe();
        timeout(Duration::from_secs(2), fix_rx.wait_for(Fix::has_position))
            .await
            .unwrap()
            .unwrap();

        let path = controller.start(params(dir.path(), 2, 0.01), false).await.unwrap();
        wait_until(&controller, |s| !s.is_running()).await;

        assert!(path.ends_with("19940323123519_Leim.ping"));
        let rows = data_rows(&path);
        assert_eq!(rows.len(), 2);
        let fields: Vec<&str> = rows[0].split(',').map(str::trim).collect();
        assert_eq!(&fields[1..5], &["1994-03-23", "12:35:19+00:00", "4807.038 N", "01131.000 E"]);

        controller.disconnect_gps().await;
    }

    #[tokio::test]
    async fn test_run_starts_with_empty_fix_when_gps_running() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let _device = attach_gps(&controller).await;

        assert!(controller.snapshot().last_fix.is_empty());
        let path = controller.start(params(dir.path(), 1, 0.01), false).await.unwrap();
        wait_until(&controller, |s| !s.is_running()).await;

        let rows = data_rows(&path);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].split(',').skip(1).all(|field| field.trim().is_empty()));

        controller.disconnect_gps().await;
    }

    #[tokio::test]
    async fn test_gps_loss_aborts_unbypassed_run() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let device = attach_gps(&controller).await;

        controller.start(params(dir.path(), 0, 0.01), false).await.unwrap();
        wait_until(&controller, |s| s.ping_count >= 2).await;

        drop(device);
        let state = wait_until(&controller, |s| !s.is_running()).await;

        assert_eq!(state.last_stop_reason, Some(StopReason::GpsLost));
        assert!(controller.gps().is_connected());
        assert!(!controller.gps().is_running());
    }

    #[tokio::test]
    async fn test_pause_during_countdown_holds_first_ping() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let mut run = params(dir.path(), 2, 0.01);
        run.start_delay_seconds = 1;

        controller.start(run, true).await.unwrap();
        controller.pause();

        let state = controller.state();
        assert_eq!(state.phase, RunPhase::Starting);
        assert!(state.paused);

        let held = wait_until(&controller, |s| s.phase == RunPhase::Paused).await;
        assert_eq!(held.ping_count, 0);
        assert_eq!(held.countdown_remaining, 0);

        controller.resume();
        let done = wait_until(&controller, |s| !s.is_running()).await;
        assert_eq!(done.ping_count, 2);
        assert_eq!(done.last_stop_reason, Some(StopReason::Completed));
    }

    #[tokio::test]
    async fn test_stop_during_countdown_is_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let mut run = params(dir.path(), 2, 0.01);
        run.start_delay_seconds = 5;

        let path = controller.start(run, true).await.unwrap();
        assert_eq!(controller.state().countdown_remaining, 5);
        sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        controller.stop().await;

        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(controller.state().last_stop_reason, Some(StopReason::Stopped));
        assert!(data_rows(&path).is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_long_interval_is_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        controller.start(params(dir.path(), 0, 30.0), true).await.unwrap();
        wait_until(&controller, |s| s.ping_count == 1).await;

        let started = Instant::now();
        controller.stop().await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_log_write_failure_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;
        let mut run = params(dir.path(), 0, 0.01);
        run.start_delay_seconds = 1;

        let path = controller.start(run, true).await.unwrap();
        fs::remove_file(&path).unwrap();

        let state = wait_until(&controller, |s| !s.is_running()).await;
        assert!(matches!(state.last_stop_reason, Some(StopReason::LogWriteFailed(_))));
        assert_eq!(state.ping_count, 0);
    }

    #[tokio::test]
    async fn test_disconnect_transponder_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        controller.start(params(dir.path(), 0, 0.01), true).await.unwrap();
        wait_until(&controller, |s| s.ping_count >= 1).await;

        controller.disconnect_transponder().await;

        let snapshot = controller.snapshot();
        assert!(!snapshot.is_running);
        assert!(!snapshot.transponder_connected);
        assert_eq!(snapshot.ping_count, 0);
        assert_eq!(snapshot.last_stop_reason, Some(StopReason::Stopped));
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        assert!(matches!(
            controller.start(params(dir.path(), 0, 1e20), true).await,
            Err(SurveyError::InvalidParameters(_))
        ));

        let state = controller.state();
        assert!(!state.is_running());
        assert_eq!(state.last_stop_reason, None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pause_after_completion_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller().await;

        controller.start(params(dir.path(), 1, 0.01), true).await.unwrap();
        wait_until(&controller, |s| !s.is_running()).await;

        controller.pause();

        let state = controller.state();
        assert_eq!(state.phase, RunPhase::Idle);
        assert!(!state.paused);
        assert!(!*controller.pause.borrow());

        // The next run is not held by a stale pause
        controller.start(params(dir.path(), 2, 0.01), true).await.unwrap();
        let done = wait_until(&controller, |s| !s.is_running()).await;
        assert_eq!(done.ping_count, 2);
    }

    #[tokio::test]
    async fn test_pause_without_run_is_ignored() {
        let controller = controller().await;

        controller.pause();
        controller.resume();

        let state = controller.state();
        assert!(!state.paused);
        assert_eq!(state.phase, RunPhase::Idle);
    }
}
