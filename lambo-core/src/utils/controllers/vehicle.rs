//! The vehicle orchestrator.
//!
//! `Vehicle` owns the drive, both sensor aggregators and the centering
//! controller. Foreground operations (race, free driving, maneuvers) run on the
//! caller's task and race a `StopSignal`; `guard` runs forever on its own task
//! and evades obstacles while a race is on.
//!
//! The drive mutex is taken for one check-and-apply at a time, never across a
//! hold, so a stop issued from another task lands within one step.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex as BlockingMutex},
    mutex::Mutex,
};
use embassy_time::{Duration, Timer};

use super::{
    actuators::Drive,
    maneuvers::{Maneuver, Step, Turn, MAX_EIGHT_LOOPS},
    CommandOutcome, LapCounter, SelfTestReport, StopSignal, VehicleCommand, VehicleError,
    VehicleState,
};
use crate::utils::{
    config::VehicleConfig,
    math::centering::{CenteringController, DriveCommand},
    sensors::{
        ColorSensor, CurrentSensor, DistanceAggregator, DistanceReading, LineError, LineSensor,
        PerceptionAggregator, RangingSensor, MAX_RANGE_CM,
    },
};

type Result<T, E> = core::result::Result<T, VehicleError<E>>;

struct Shared {
    state: VehicleState,
    laps: LapCounter,
    commanded: DriveCommand,
    cruise: bool,
}

pub struct Vehicle<D, R, L, C, I> {
    drive: Mutex<CriticalSectionRawMutex, D>,
    distances: Mutex<CriticalSectionRawMutex, DistanceAggregator<R>>,
    perception: Mutex<CriticalSectionRawMutex, PerceptionAggregator<L, C, I>>,
    centering: CenteringController,
    shared: BlockingMutex<CriticalSectionRawMutex, RefCell<Shared>>,
    config: VehicleConfig,
}

impl<D, R, L, C, I> Vehicle<D, R, L, C, I>
where
    D: Drive,
    R: RangingSensor,
    L: LineSensor,
    C: ColorSensor,
    I: CurrentSensor,
{
    pub fn new(
        drive: D,
        distances: DistanceAggregator<R>,
        perception: PerceptionAggregator<L, C, I>,
        config: VehicleConfig,
    ) -> Self {
        Self {
            drive: Mutex::new(drive),
            distances: Mutex::new(distances),
            perception: Mutex::new(perception),
            centering: CenteringController::new(config.centering),
            shared: BlockingMutex::new(RefCell::new(Shared {
                state: VehicleState::Idle,
                laps: LapCounter::new(),
                commanded: DriveCommand::STOP,
                cruise: false,
            })),
            config,
        }
    }

    pub fn state(&self) -> VehicleState {
        self.with_shared(|s| s.state)
    }

    /// Laps completed in the current (or last) race.
    pub fn laps(&self) -> u32 {
        self.with_shared(|s| s.laps.laps())
    }

    /// Last speed and steering successfully sent to the drive.
    pub fn commanded(&self) -> DriveCommand {
        self.with_shared(|s| s.commanded)
    }

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    fn with_shared<U>(
        &self,
        f: impl FnOnce(&mut Shared) -> U,
    ) -> U {
        self.shared.lock(|cell| f(&mut cell.borrow_mut()))
    }

    fn transition(
        &self,
        to: VehicleState,
    ) {
        let from = self.with_shared(|s| core::mem::replace(&mut s.state, to));
        if from != to {
            tracing::info!(?from, ?to, "vehicle state changed");
        }
    }

    /// Move from `from` to `to` only if the car is still in `from`.
    fn swap_state(
        &self,
        from: VehicleState,
        to: VehicleState,
    ) -> bool {
        let swapped = self.with_shared(|s| {
            if s.state == from {
                s.state = to;
                true
            } else {
                false
            }
        });
        if swapped {
            tracing::info!(?from, ?to, "vehicle state changed");
        }
        swapped
    }

    /// Claim the car for a foreground operation.
    fn begin(
        &self,
        cruise: bool,
    ) -> Result<(), D::Error> {
        let claimed: Result<(), D::Error> = self.with_shared(|s| match s.state {
            VehicleState::Idle | VehicleState::Stopped => {
                s.state = VehicleState::Racing;
                s.laps = LapCounter::new();
                s.cruise = cruise;
                Ok(())
            }
            busy => Err(VehicleError::Busy(busy)),
        });
        match claimed {
            Ok(()) => {
                tracing::info!(cruise, "vehicle state changed to Racing");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(?e, "car is busy");
                Err(e)
            }
        }
    }

    fn apply_locked(
        &self,
        drive: &mut D,
        speed: Option<f32>,
        steering: Option<f32>,
    ) -> Result<(), D::Error> {
        if let Some(speed) = speed {
            drive.set_speed(speed).map_err(VehicleError::Drive)?;
            self.with_shared(|s| s.commanded.speed = speed);
        }
        if let Some(steering) = steering {
            drive.set_steering(steering).map_err(VehicleError::Drive)?;
            self.with_shared(|s| s.commanded.steering = steering);
        }
        Ok(())
    }

    async fn apply(
        &self,
        cmd: DriveCommand,
    ) -> Result<(), D::Error> {
        let mut drive = self.drive.lock().await;
        self.apply_locked(&mut drive, Some(cmd.speed), Some(cmd.steering))
    }

    /// Apply `cmd` only if the car is still in `expected`; the check and the
    /// write happen under the drive lock.
    async fn apply_if(
        &self,
        expected: VehicleState,
        cmd: DriveCommand,
    ) -> Result<bool, D::Error> {
        let mut drive = self.drive.lock().await;
        if self.state() != expected {
            return Ok(false);
        }
        self.apply_locked(&mut drive, Some(cmd.speed), Some(cmd.steering))?;
        Ok(true)
    }

    /// Best-effort full stop; failures are logged, the state becomes Stopped.
    async fn halt(&self) {
        self.with_shared(|s| s.cruise = false);
        self.transition(VehicleState::Stopped);
        if let Err(e) = self.apply(DriveCommand::STOP).await {
            tracing::error!(?e, "emergency stop failed");
        }
    }

    /// Stop fully after a foreground loop, keeping its first error.
    async fn finish<T>(
        &self,
        outcome: Result<T, D::Error>,
    ) -> Result<T, D::Error> {
        self.with_shared(|s| s.cruise = false);
        self.transition(VehicleState::Stopped);
        let stopped = self.apply(DriveCommand::STOP).await;
        match outcome {
            Ok(value) => stopped.map(|()| value),
            Err(e) => {
                tracing::error!(?e, "operation failed, car stopped");
                if let Err(stop) = stopped {
                    tracing::error!(?stop, "emergency stop failed");
                }
                Err(e)
            }
        }
    }

    async fn sample(&self) -> DistanceReading {
        self.distances.lock().await.sample_distances().await
    }

    /// One line sample; sensor timeouts are skipped, bad encodings abort.
    async fn read_line(&self) -> Result<Option<bool>, D::Error> {
        let timeout = self.config.race.line_timeout();
        let detected = self.perception.lock().await.detect_line(timeout).await;
        match detected {
            Ok(on_line) => Ok(Some(on_line)),
            Err(LineError::Sensor(fault)) => {
                tracing::warn!(?fault, "line reading skipped");
                Ok(None)
            }
            Err(e) => Err(VehicleError::Line(e)),
        }
    }

    /// Race until `max_laps` laps are done or `cancel` fires, then stop.
    ///
    /// Returns the laps completed.
    pub async fn race(
        &self,
        max_laps: u32,
        cancel: &StopSignal,
    ) -> Result<u32, D::Error> {
        cancel.reset();
        self.run_race(max_laps, cancel).await
    }

    async fn run_race(
        &self,
        max_laps: u32,
        cancel: &StopSignal,
    ) -> Result<u32, D::Error> {
        self.begin(false)?;
        tracing::info!(max_laps, "race started");
        let outcome = match select(self.race_loop(max_laps), cancel.wait()).await {
            Either::First(outcome) => outcome,
            Either::Second(()) => {
                tracing::info!("race cancelled");
                Ok(self.laps())
            }
        };
        let laps = self.finish(outcome).await?;
        tracing::info!(laps, "race finished");
        Ok(laps)
    }

    async fn race_loop(
        &self,
        max_laps: u32,
    ) -> Result<u32, D::Error> {
        if max_laps == 0 {
            return Ok(0);
        }
        // A skipped first reading falls back to where the last one left the car.
        self.read_line().await?;
        let start = self.perception.lock().await.was_on_line();
        self.with_shared(|s| s.laps = LapCounter::primed(start));

        loop {
            match self.state() {
                VehicleState::Racing => {
                    let distances = self.sample().await;
                    let cmd = self.centering.decide(&distances);
                    self.apply_if(VehicleState::Racing, cmd).await?;
                }
                VehicleState::Avoiding => {}
                VehicleState::Idle | VehicleState::Stopped => {
                    tracing::warn!("race halted externally");
                    return Ok(self.laps());
                }
            }

            if let Some(on_line) = self.read_line().await? {
                let (lap, laps) = self.with_shared(|s| (s.laps.observe(on_line), s.laps.laps()));
                if lap {
                    tracing::info!(laps, max_laps, "lap completed");
                }
                if laps >= max_laps {
                    return Ok(laps);
                }
            }
            Timer::after(self.config.race.poll_period()).await;
        }
    }

    /// Wait, cancellably, for a green light and then race.
    pub async fn race_on_green(
        &self,
        max_laps: u32,
        cancel: &StopSignal,
    ) -> Result<u32, D::Error> {
        cancel.reset();
        tracing::info!("waiting for green");
        if let Either::Second(()) = select(self.wait_for_green(), cancel.wait()).await {
            tracing::info!("cancelled before green");
            self.halt().await;
            return Ok(0);
        }
        self.run_race(max_laps, cancel).await
    }

    async fn wait_for_green(&self) {
        loop {
            if self.perception.lock().await.sees_green() {
                tracing::info!("green light");
                return;
            }
            Timer::after(self.config.race.poll_period()).await;
        }
    }

    /// Cruise with obstacle avoidance until cancelled, then stop.
    pub async fn drive_free(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        cancel.reset();
        self.begin(true)?;
        let outcome = match select(self.free_loop(), cancel.wait()).await {
            Either::First(outcome) => outcome,
            Either::Second(()) => {
                tracing::info!("free driving cancelled");
                Ok(())
            }
        };
        self.finish(outcome).await
    }

    async fn free_loop(&self) -> Result<(), D::Error> {
        let period = Duration::from_millis(self.config.avoidance.period_ms);
        loop {
            self.avoid_once(true).await?;
            if self.state() == VehicleState::Stopped {
                return Ok(());
            }
            Timer::after(period).await;
        }
    }

    /// Background avoidance loop; spawn once at boot.
    ///
    /// Passive unless a race is on. Free driving runs its own cycles, so the
    /// guard stands back while the cruise flag is set.
    pub async fn guard(&self) -> ! {
        let period = Duration::from_millis(self.config.avoidance.period_ms);
        loop {
            Timer::after(period).await;
            let (state, cruise) = self.with_shared(|s| (s.state, s.cruise));
            if cruise || state != VehicleState::Racing {
                continue;
            }
            if let Err(e) = self.avoid_once(false).await {
                tracing::error!(?e, "avoidance failed, stopping");
                self.halt().await;
            }
        }
    }

    /// One avoidance cycle: evade on a breach, otherwise optionally cruise.
    async fn avoid_once(
        &self,
        cruise: bool,
    ) -> Result<(), D::Error> {
        let distances = self.sample().await;
        match self.breach(&distances) {
            Some(escape) => self.evade(escape).await,
            None if cruise => {
                let cmd = DriveCommand::new(self.config.avoidance.cruise_speed, 0.0);
                self.apply_if(VehicleState::Racing, cmd).await.map(|_| ())
            }
            None => Ok(()),
        }
    }

    /// Escape direction if a measured distance is under its threshold.
    fn breach(
        &self,
        d: &DistanceReading,
    ) -> Option<Turn> {
        let a = &self.config.avoidance;
        let under = |v: Option<f32>, limit: f32| v.is_some_and(|cm| cm < limit);

        if !under(d.front, a.front_threshold_cm)
            && !under(d.left, a.side_threshold_cm)
            && !under(d.right, a.side_threshold_cm)
        {
            return None;
        }
        let left = d.left.unwrap_or(MAX_RANGE_CM);
        let right = d.right.unwrap_or(MAX_RANGE_CM);
        tracing::info!(?d, "obstacle detected");
        Some(if left >= right { Turn::Left } else { Turn::Right })
    }

    /// Reverse, turn toward `escape`, then resume straight.
    ///
    /// Each step is applied only while the car is still Avoiding, so a stop
    /// from another task ends the evasion.
    async fn evade(
        &self,
        escape: Turn,
    ) -> Result<(), D::Error> {
        if !self.swap_state(VehicleState::Racing, VehicleState::Avoiding) {
            return Ok(());
        }
        let a = self.config.avoidance;
        let steps = [
            (DriveCommand::new(a.reverse_speed, 0.0), a.reverse_ms),
            (DriveCommand::new(a.turn_speed, escape.lock()), a.turn_ms),
            (DriveCommand::new(a.cruise_speed, 0.0), 0),
        ];
        for (cmd, hold_ms) in steps {
            if !self.apply_if(VehicleState::Avoiding, cmd).await? {
                return Ok(());
            }
            if hold_ms > 0 {
                Timer::after_millis(hold_ms).await;
            }
        }
        self.swap_state(VehicleState::Avoiding, VehicleState::Racing);
        Ok(())
    }

    /// Run an open-loop maneuver; on cancel or error the car stops fully.
    pub async fn perform(
        &self,
        maneuver: Maneuver,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.run_maneuver(maneuver, cancel).await.map(|_| ())
    }

    /// Like `perform`, but tells a completed run (`true`) from a cancelled one.
    async fn run_maneuver(
        &self,
        maneuver: Maneuver,
        cancel: &StopSignal,
    ) -> Result<bool, D::Error> {
        cancel.reset();
        tracing::info!(maneuver = maneuver.name(), "maneuver started");
        let steps = maneuver.steps(&self.config.timings);
        match select(self.run_steps(&steps), cancel.wait()).await {
            Either::First(Ok(())) => {
                tracing::info!(maneuver = maneuver.name(), "maneuver finished");
                Ok(true)
            }
            Either::First(Err(e)) => {
                tracing::error!(?e, maneuver = maneuver.name(), "maneuver failed");
                self.halt().await;
                Err(e)
            }
            Either::Second(()) => {
                tracing::info!(maneuver = maneuver.name(), "maneuver cancelled");
                self.halt().await;
                Ok(false)
            }
        }
    }

    async fn run_steps(
        &self,
        steps: &[Step],
    ) -> Result<(), D::Error> {
        for step in steps {
            {
                let mut drive = self.drive.lock().await;
                self.apply_locked(&mut drive, step.speed, step.steering)?;
            }
            if step.hold_ms > 0 {
                Timer::after_millis(step.hold_ms).await;
            }
        }
        Ok(())
    }

    pub async fn start_car(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.perform(Maneuver::StartCar, cancel).await
    }

    /// Full stop from any state.
    pub async fn stop_car(&self) -> Result<(), D::Error> {
        self.with_shared(|s| s.cruise = false);
        self.transition(VehicleState::Stopped);
        self.apply(DriveCommand::STOP).await
    }

    pub async fn reverse_gear(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.perform(Maneuver::ReverseGear, cancel).await
    }

    pub async fn u_turn(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.perform(Maneuver::UTurn, cancel).await
    }

    pub async fn turn_left(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.perform(Maneuver::Turn(Turn::Left), cancel).await
    }

    pub async fn turn_right(
        &self,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        self.perform(Maneuver::Turn(Turn::Right), cancel).await
    }

    /// Drive a full-lock circle; `direction` is "left" or "right".
    pub async fn circle(
        &self,
        direction: &str,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        let turn = direction.parse::<Turn>().map_err(|_| {
            tracing::error!(direction, "circle direction must be left or right");
            VehicleError::InvalidArgument
        })?;
        self.perform(Maneuver::Circle(turn), cancel).await
    }

    pub async fn eight_turn(
        &self,
        loops: u8,
        cancel: &StopSignal,
    ) -> Result<(), D::Error> {
        if loops > MAX_EIGHT_LOOPS {
            tracing::warn!(loops, max = MAX_EIGHT_LOOPS, "figure eight loops capped");
        }
        self.perform(Maneuver::EightTurn(loops), cancel).await
    }

    /// Exercise the actuators, then read every sensor once.
    pub async fn self_test(
        &self,
        cancel: &StopSignal,
    ) -> Result<Option<SelfTestReport>, D::Error> {
        if !self.run_maneuver(Maneuver::SelfTest, cancel).await? {
            return Ok(None);
        }

        let distances = self.sample().await;
        let timeout = self.config.race.line_timeout();
        let mut perception = self.perception.lock().await;
        let power = perception.power();
        let color = perception.read_color();
        let line = perception.detect_line(timeout).await;
        drop(perception);

        tracing::info!(?distances, "self test distances");
        tracing::info!(?power, "self test power");
        tracing::info!(?color, "self test color");
        tracing::info!(?line, "self test line");
        Ok(Some(SelfTestReport {
            distances,
            power,
            color,
            line,
        }))
    }

    /// Run one operator command to completion.
    pub async fn execute(
        &self,
        command: VehicleCommand,
        cancel: &StopSignal,
    ) -> Result<CommandOutcome, D::Error> {
        tracing::info!(?command, "executing command");
        let done = |r: Result<(), D::Error>| r.map(|()| CommandOutcome::Done);
        match command {
            VehicleCommand::Test => self
                .self_test(cancel)
                .await
                .map(|report| report.map_or(CommandOutcome::Cancelled, CommandOutcome::Report)),
            VehicleCommand::Start { laps } => self.race(laps, cancel).await.map(CommandOutcome::Laps),
            VehicleCommand::Green { laps } => {
                self.race_on_green(laps, cancel).await.map(CommandOutcome::Laps)
            }
            VehicleCommand::Avoid => done(self.drive_free(cancel).await),
            VehicleCommand::StartCar => done(self.start_car(cancel).await),
            VehicleCommand::ReverseGear => done(self.reverse_gear(cancel).await),
            VehicleCommand::UTurn => done(self.u_turn(cancel).await),
            VehicleCommand::EightTurn { loops } => done(self.eight_turn(loops, cancel).await),
            VehicleCommand::Circle { direction } => {
                done(self.perform(Maneuver::Circle(direction), cancel).await)
            }
            VehicleCommand::TurnLeft => done(self.turn_left(cancel).await),
            VehicleCommand::TurnRight => done(self.turn_right(cancel).await),
            VehicleCommand::Stop => done(self.stop_car().await),
        }
    }
}
