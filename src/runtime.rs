// Perception-decision loop: capture -> detect -> decide -> dispatch, once per tick
// Each cycle runs strictly in order and waits for every command's outcome
// before sending the next. Motion commands are always followed by a stop after
// the dwell period, and the loop sends a final stop on every way out.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{CommandLink, TransportError};
use crate::config::FollowConfig;
use crate::messages::SteeringDecision;
use crate::perception::{
    decide, select_best, Branch, Detector, FrameSource, PerceptionError, SteeringPlan,
    SteeringThresholds,
};

/// Resolves once `shutdown` holds true or every sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}

/// Shutdown channel flipped to true on Ctrl-C
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so receivers do not read this as shutdown
                std::future::pending::<()>().await;
                drop(tx);
            }
        }
    });
    rx
}

/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    NoFrame,
    NoTarget,
    BadGeometry,
    Dispatched(Branch),
    TransportFailed,
    SourceClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    SourceClosed,
    CycleLimit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub commands_sent: u64,
    pub skipped: u64,
    pub transport_failures: u64,
    pub exit: Option<ExitReason>,
}

/// Extra wait after `failures` consecutive transport failures
pub fn backoff_for(failures: u32, period: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << failures.min(16);
    period.saturating_mul(factor).min(max)
}

pub struct FollowLoop<S, D, L> {
    source: S,
    detector: D,
    link: L,
    config: FollowConfig,
    thresholds: SteeringThresholds,
    consecutive_failures: u32,
    stats: LoopStats,
}

impl<S, D, L> FollowLoop<S, D, L>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    L: CommandLink,
{
    pub fn new(source: S, detector: D, link: L, config: FollowConfig) -> Self {
        Self {
            source,
            detector,
            link,
            config,
            thresholds: SteeringThresholds::default(),
            consecutive_failures: 0,
            stats: LoopStats::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: SteeringThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run until shutdown, source exhaustion or the cycle limit, then stop the
    /// robot.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        info!(
            "Follow loop started: {}ms period, {}ms dwell, targets {:?}",
            self.config.period.as_millis(),
            self.config.dwell.as_millis(),
            self.config.targets
        );

        let reason = self.run_cycles(&mut shutdown).await;
        info!("Follow loop exiting ({:?}), stopping robot", reason);
        match self.link.halt().await {
            Ok(_) => info!("Robot stopped"),
            Err(e) => error!("Final stop failed: {}", e),
        }

        self.stats.exit = Some(reason);
        self.stats
    }

    async fn run_cycles(&mut self, shutdown: &mut watch::Receiver<bool>) -> ExitReason {
        let mut tick = interval(self.config.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(max) = self.config.max_cycles {
                if self.stats.cycles >= max {
                    return ExitReason::CycleLimit;
                }
            }

            // Shutdown wins over a tick that is ready at the same time
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return ExitReason::Shutdown,
                _ = tick.tick() => {}
            }

            match self.cycle(shutdown).await {
                CycleOutcome::SourceClosed => return ExitReason::SourceClosed,
                CycleOutcome::Dispatched(_) | CycleOutcome::TransportFailed => {}
                _ => self.stats.skipped += 1,
            }

            let backoff = backoff_for(
                self.consecutive_failures,
                self.config.period,
                self.config.max_backoff,
            );
            if !backoff.is_zero() {
                debug!("Backing off {:?}", backoff);
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(shutdown) => return ExitReason::Shutdown,
                    _ = sleep(backoff) => {}
                }
            }
        }
    }

    /// One capture/detect/decide/dispatch pass
    async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        self.stats.cycles += 1;

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("No frame available");
                return CycleOutcome::NoFrame;
            }
            Err(PerceptionError::SourceClosed) => return CycleOutcome::SourceClosed,
            Err(e) => {
                warn!("Capture failed: {}", e);
                return CycleOutcome::NoFrame;
            }
        };

        let observation = match self.detector.detect(&frame, &self.config.targets) {
            Ok(obs) => obs,
            Err(e) => {
                warn!("Detector failed: {}", e);
                return CycleOutcome::NoTarget;
            }
        };

        let Some(target) =
            select_best(&observation.detections, &self.config.targets, self.config.min_score)
        else {
            debug!("No target in frame");
            return CycleOutcome::NoTarget;
        };
        debug!(
            "Target {} ({:.3}) box {:?} in {}x{}",
            target.label,
            target.score,
            target.bbox,
            observation.geometry.width,
            observation.geometry.height
        );

        let plan = match decide(&target.bbox, &observation.geometry, &self.thresholds) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Skipping detection: {}", e);
                return CycleOutcome::BadGeometry;
            }
        };

        self.dispatch(plan, shutdown).await
    }

    async fn dispatch(
        &mut self,
        plan: SteeringPlan,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        let mut failure: Option<TransportError> = None;

        for &decision in &plan.commands {
            match self.link.send(decision).await {
                Ok(_) => {
                    info!("{:?}: sent {}", plan.branch, decision);
                    self.stats.commands_sent += 1;
                }
                Err(e) => {
                    warn!("{:?}: sending {} failed: {}", plan.branch, decision, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if plan.needs_dwell() {
            if failure.is_none() {
                tokio::select! {
                    _ = sleep(self.config.dwell) => {}
                    _ = wait_for_shutdown(shutdown) => debug!("Dwell cut short by shutdown"),
                }
            }
            // The closing stop goes out even if the motion command failed
            match self.link.send(SteeringDecision::STOP).await {
                Ok(_) => self.stats.commands_sent += 1,
                Err(e) => {
                    warn!("Closing stop failed: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            None => {
                self.consecutive_failures = 0;
                CycleOutcome::Dispatched(plan.branch)
            }
            Some(e) => {
                self.stats.transport_failures += 1;
                if e.is_retryable() {
                    self.consecutive_failures += 1;
                }
                CycleOutcome::TransportFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use crate::messages::{Direction, MoveResponse};
    use crate::perception::{RecordedDetector, RecordedFrame, ReplaySource};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Move(SteeringDecision),
        Halt,
    }

    /// Records every call; the first `fail_first` sends time out
    #[derive(Clone, Default)]
    struct MockLink {
        log: Arc<Mutex<Vec<(Sent, bool)>>>,
        fail_first: Arc<Mutex<usize>>,
    }

    impl MockLink {
        fn failing(n: usize) -> Self {
            let link = Self::default();
            *link.fail_first.lock().unwrap() = n;
            link
        }

        fn sent(&self) -> Vec<Sent> {
            self.log.lock().unwrap().iter().filter(|(_, ok)| *ok).map(|(s, _)| s.clone()).collect()
        }

        fn attempts(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        fn record(&self, sent: Sent) -> Result<MoveResponse, TransportError> {
            let mut remaining = self.fail_first.lock().unwrap();
            let ok = *remaining == 0;
            if !ok {
                *remaining -= 1;
            }
            let decision = match &sent {
                Sent::Move(d) => *d,
                Sent::Halt => SteeringDecision::STOP,
            };
            self.log.lock().unwrap().push((sent, ok));
            if ok {
                Ok(MoveResponse::success(decision))
            } else {
                Err(TransportError::Timeout(Duration::from_secs(3)))
            }
        }
    }

    impl CommandLink for MockLink {
        async fn send(
            &mut self,
            decision: SteeringDecision,
        ) -> Result<MoveResponse, TransportError> {
            self.record(Sent::Move(decision))
        }

        async fn halt(&mut self) -> Result<MoveResponse, TransportError> {
            self.record(Sent::Halt)
        }
    }

    /// Yields the same frame forever
    struct Repeat(RecordedFrame);

    impl FrameSource for Repeat {
        type Frame = RecordedFrame;

        fn next_frame(&mut self) -> Result<Option<RecordedFrame>, PerceptionError> {
            Ok(Some(self.0.clone()))
        }
    }

    fn fast_config() -> FollowConfig {
        FollowConfig {
            period: Duration::from_millis(1),
            dwell: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            targets: vec!["a bottle".to_string()],
            min_score: 0.1,
            max_cycles: None,
        }
    }

    fn frame_line(bbox: [f64; 4]) -> String {
        format!(
            r#"{{"width":400,"height":300,"detections":[{{"label":"a bottle","score":0.9,"box":[{},{},{},{}]}}]}}"#,
            bbox[0], bbox[1], bbox[2], bbox[3]
        )
    }

    fn replay(lines: &[String]) -> ReplaySource<Cursor<String>> {
        ReplaySource::new(Cursor::new(lines.join("\n")))
    }

    fn mv(direction: Direction, speed: u8) -> Sent {
        Sent::Move(SteeringDecision::new(direction, speed))
    }

    fn stop() -> Sent {
        Sent::Move(SteeringDecision::STOP)
    }

    fn centered_frame() -> RecordedFrame {
        serde_json::from_str(&frame_line([190.0, 100.0, 210.0, 150.0])).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_scenarios() {
        let lines = vec![
            frame_line([100.0, 100.0, 300.0, 200.0]), // too close
            frame_line([0.0, 0.0, 50.0, 50.0]),       // far left
            frame_line([190.0, 100.0, 210.0, 150.0]), // centred
        ];
        let link = MockLink::default();
        let (_tx, rx) = watch::channel(false);

        let stats = FollowLoop::new(replay(&lines), RecordedDetector, link.clone(), fast_config())
            .run(rx)
            .await;

        assert_eq!(
            link.sent(),
            vec![
                stop(),
                mv(Direction::Left, 15),
                mv(Direction::Backward, 5),
                stop(),
                mv(Direction::Backward, 15),
                stop(),
                Sent::Halt,
            ]
        );
        assert_eq!(stats.exit, Some(ExitReason::SourceClosed));
        assert_eq!(stats.commands_sent, 6);
        assert_eq!(stats.skipped, 0);
    }

    #[tokio::test]
    async fn test_no_target_sends_nothing() {
        let lines = vec![
            r#"{"width":400,"height":300,"detections":[{"label":"a cat","score":0.9,"box":[0,0,50,50]}]}"#
                .to_string(),
            r#"{"width":400,"height":300,"detections":[{"label":"a bottle","score":0.01,"box":[0,0,50,50]}]}"#
                .to_string(),
            r#"{"width":400,"height":300}"#.to_string(),
        ];
        let link = MockLink::default();
        let (_tx, rx) = watch::channel(false);

        let stats = FollowLoop::new(replay(&lines), RecordedDetector, link.clone(), fast_config())
            .run(rx)
            .await;

        assert_eq!(link.sent(), vec![Sent::Halt], "only the exit stop is sent");
        assert_eq!(stats.skipped, 3);
    }

    #[tokio::test]
    async fn test_capture_failures_skip_cycles() {
        let lines = vec![
            "null".to_string(),
            "{broken".to_string(),
            frame_line([500.0, 0.0, 600.0, 50.0]), // box from a bigger frame
            frame_line([190.0, 100.0, 210.0, 150.0]),
        ];
        let link = MockLink::default();
        let (_tx, rx) = watch::channel(false);

        let stats = FollowLoop::new(replay(&lines), RecordedDetector, link.clone(), fast_config())
            .run(rx)
            .await;

        assert_eq!(link.sent(), vec![mv(Direction::Backward, 15), stop(), Sent::Halt]);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.cycles, 5, "four frames plus the closing read");
    }

    #[tokio::test]
    async fn test_transport_failure_still_sends_closing_stop() {
        let lines = vec![frame_line([0.0, 0.0, 50.0, 50.0]), frame_line([0.0, 0.0, 50.0, 50.0])];
        // First send (left 15) fails
        let link = MockLink::failing(1);
        let (_tx, rx) = watch::channel(false);

        let stats = FollowLoop::new(replay(&lines), RecordedDetector, link.clone(), fast_config())
            .run(rx)
            .await;

        // Cycle 1: left 15 fails, nudge dropped, stop still sent.
        // Cycle 2 recovers fully.
        assert_eq!(
            link.sent(),
            vec![
                stop(),
                mv(Direction::Left, 15),
                mv(Direction::Backward, 5),
                stop(),
                Sent::Halt,
            ]
        );
        assert_eq!(link.attempts(), 6);
        assert_eq!(stats.transport_failures, 1);
    }

    #[tokio::test]
    async fn test_link_down_never_crashes_loop() {
        let mut config = fast_config();
        config.max_cycles = Some(3);
        let link = MockLink::failing(usize::MAX);
        let (_tx, rx) = watch::channel(false);

        let stats =
            FollowLoop::new(Repeat(centered_frame()), RecordedDetector, link.clone(), config)
                .run(rx)
                .await;

        assert_eq!(stats.exit, Some(ExitReason::CycleLimit));
        assert_eq!(stats.transport_failures, 3);
        assert_eq!(stats.commands_sent, 0);
        // Two attempts per cycle plus the final halt
        assert_eq!(link.attempts(), 7);
    }

    #[tokio::test]
    async fn test_cycle_limit() {
        let mut config = fast_config();
        config.max_cycles = Some(2);
        let link = MockLink::default();
        let (_tx, rx) = watch::channel(false);

        let stats =
            FollowLoop::new(Repeat(centered_frame()), RecordedDetector, link.clone(), config)
                .run(rx)
                .await;

        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.exit, Some(ExitReason::CycleLimit));
        assert_eq!(link.sent().last(), Some(&Sent::Halt));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_halts() {
        let link = MockLink::default();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let stats = FollowLoop::new(
            Repeat(centered_frame()),
            RecordedDetector,
            link.clone(),
            fast_config(),
        )
        .run(rx)
        .await;

        assert_eq!(stats.exit, Some(ExitReason::Shutdown));
        assert_eq!(stats.cycles, 0);
        assert_eq!(link.sent(), vec![Sent::Halt]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_dwell() {
        let mut config = fast_config();
        config.dwell = Duration::from_secs(60);
        let link = MockLink::default();
        let (tx, rx) = watch::channel(false);

        let follow =
            FollowLoop::new(Repeat(centered_frame()), RecordedDetector, link.clone(), config);
        let handle = tokio::spawn(follow.run(rx));

        // Wait for the approach command, then request shutdown mid-dwell
        while link.attempts() == 0 {
            sleep(Duration::from_millis(1)).await;
        }
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop must exit promptly")
            .unwrap();

        assert_eq!(stats.exit, Some(ExitReason::Shutdown));
        assert_eq!(link.sent(), vec![mv(Direction::Backward, 15), stop(), Sent::Halt]);
    }

    #[test]
    fn test_backoff_growth() {
        let period = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        assert_eq!(backoff_for(0, period, max), Duration::ZERO);
        assert_eq!(backoff_for(1, period, max), Duration::from_millis(200));
        assert_eq!(backoff_for(3, period, max), Duration::from_millis(800));
        assert_eq!(backoff_for(5, period, max), max);
        assert_eq!(backoff_for(u32::MAX, period, max), max);
    }
}
