use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use embassy_futures::{
    block_on,
    join::join,
    select::{select, Either},
};
use embassy_time::{Duration, Timer};
use lambo_core::utils::{
    config::{ManeuverTimings, RaceConfig, SamplingConfig, VehicleConfig},
    controllers::{
        CommandOutcome, Drive, StopSignal, Vehicle, VehicleCommand, VehicleError, VehicleState,
    },
    sensors::{
        ColorReading, ColorSensor, CurrentSensor, DistanceAggregator, LineError, LineSensor,
        PerceptionAggregator, PowerReading, RangingSensor, SensorFault,
    },
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cmd {
    Speed(f32),
    Steering(f32),
}

type Log = Rc<RefCell<Vec<Cmd>>>;

/// Drive double that records every command it accepts.
struct RecordingDrive {
    log: Log,
    reject_turns: bool,
}

impl Drive for RecordingDrive {
    type Error = &'static str;

    fn set_speed(
        &mut self,
        speed: f32,
    ) -> Result<(), Self::Error> {
        self.log.borrow_mut().push(Cmd::Speed(speed));
        Ok(())
    }

    fn set_steering(
        &mut self,
        steering: f32,
    ) -> Result<(), Self::Error> {
        if self.reject_turns && steering != 0.0 {
            return Err("servo channel nacked");
        }
        self.log.borrow_mut().push(Cmd::Steering(steering));
        Ok(())
    }
}

/// Ranger replaying a script, then repeating its last value forever.
struct Ranger {
    script: VecDeque<Result<f32, SensorFault>>,
    last: Result<f32, SensorFault>,
}

impl Ranger {
    fn steady(cm: f32) -> Self {
        Self::scripted(&[], Ok(cm))
    }

    fn scripted(
        script: &[Result<f32, SensorFault>],
        last: Result<f32, SensorFault>,
    ) -> Self {
        Self {
            script: script.iter().copied().collect(),
            last,
        }
    }
}

impl RangingSensor for Ranger {
    async fn measure(&mut self) -> Result<f32, SensorFault> {
        self.script.pop_front().unwrap_or(self.last)
    }
}

/// Line sensor replaying raw levels, then reporting bare track.
struct Line(VecDeque<Result<u8, SensorFault>>);

impl Line {
    fn levels(levels: &[u8]) -> Self {
        Self(levels.iter().map(|l| Ok(*l)).collect())
    }
}

impl LineSensor for Line {
    async fn read(
        &mut self,
        _timeout: Duration,
    ) -> Result<u8, SensorFault> {
        self.0.pop_front().unwrap_or(Ok(1))
    }
}

/// Color sensor replaying readings, then repeating the last one.
struct Color {
    script: VecDeque<ColorReading>,
    last: Result<ColorReading, SensorFault>,
}

impl ColorSensor for Color {
    fn read(&mut self) -> Result<ColorReading, SensorFault> {
        self.script.pop_front().map_or(self.last, Ok)
    }
}

struct Power(Result<PowerReading, SensorFault>);

impl CurrentSensor for Power {
    fn read(&mut self) -> Result<PowerReading, SensorFault> {
        self.0
    }
}

const BLACK: ColorReading = ColorReading {
    red: 10,
    green: 10,
    blue: 10,
};
const GREEN: ColorReading = ColorReading {
    red: 40,
    green: 220,
    blue: 40,
};
const BATTERY: PowerReading = PowerReading {
    bus_voltage: 7.4,
    shunt_voltage: 0.042,
    current: 420.0,
};

type TestVehicle = Vehicle<RecordingDrive, Ranger, Line, Color, Power>;

fn fast_config() -> VehicleConfig {
    let mut config = VehicleConfig::default();
    config.sampling = SamplingConfig {
        samples: 1,
        sample_interval_ms: 0,
        echo_timeout_ms: 5,
    };
    config.race = RaceConfig {
        poll_period_ms: 1,
        line_timeout_ms: 5,
    };
    config.avoidance.period_ms = 1;
    config.avoidance.reverse_ms = 1;
    config.avoidance.turn_ms = 1;
    config.timings = ManeuverTimings {
        step_ms: 1,
        reverse_step_ms: 1,
        u_turn_ms: 1,
        circle_ms: 1,
        eight_half_ms: 1,
        turn_ms: 1,
        eight_loops: 2,
    };
    config
}

struct Bench {
    rangers: [Ranger; 3],
    line: Line,
    color: Color,
    power: Power,
    reject_turns: bool,
    config: VehicleConfig,
}

impl Default for Bench {
    fn default() -> Self {
        Self {
            rangers: [Ranger::steady(200.0), Ranger::steady(35.0), Ranger::steady(35.0)],
            line: Line::levels(&[]),
            color: Color {
                script: VecDeque::new(),
                last: Ok(BLACK),
            },
            power: Power(Ok(BATTERY)),
            reject_turns: false,
            config: fast_config(),
        }
    }
}

impl Bench {
    fn build(self) -> (TestVehicle, Log) {
        let log = Log::default();
        let drive = RecordingDrive {
            log: log.clone(),
            reject_turns: self.reject_turns,
        };
        let [front, left, right] = self.rangers;
        let distances = DistanceAggregator::new(front, left, right, self.config.sampling);
        let perception =
            PerceptionAggregator::new(self.line, self.color, self.power, self.config.colors);
        (Vehicle::new(drive, distances, perception, self.config), log)
    }
}

fn ends_stopped(log: &Log) -> bool {
    log.borrow().ends_with(&[Cmd::Speed(0.0), Cmd::Steering(0.0)])
}

/// Raise `stop` after `ms` milliseconds.
async fn stop_after(
    stop: &StopSignal,
    ms: u64,
) {
    Timer::after_millis(ms).await;
    stop.signal(());
}

#[test]
fn race_counts_rising_edges_and_stops() {
    let (vehicle, log) = Bench {
        line: Line::levels(&[1, 0, 0, 1, 0, 0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let laps = block_on(vehicle.race(2, &stop)).unwrap();
    assert_eq!(laps, 2);
    assert_eq!(vehicle.laps(), 2);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));
    assert_eq!(vehicle.commanded().speed, 0.0);
}

#[test]
fn start_on_the_line_is_not_a_lap() {
    let (vehicle, _log) = Bench {
        line: Line::levels(&[0, 0, 1, 0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    assert_eq!(block_on(vehicle.race(1, &stop)).unwrap(), 1);
}

#[test]
fn unreadable_start_resumes_from_last_line_reading() {
    // The first race ends over the line; the next one cannot read its start
    let (vehicle, _log) = Bench {
        line: Line(VecDeque::from([
            Ok(1),
            Ok(0),
            Err(SensorFault::Timeout),
            Ok(0),
            Ok(1),
            Ok(0),
        ])),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    assert_eq!(block_on(vehicle.race(1, &stop)).unwrap(), 1);
    let (laps, ()) = block_on(join(vehicle.race(2, &stop), stop_after(&stop, 30)));
    assert_eq!(laps.unwrap(), 1);
}

#[test]
fn race_applies_centering() {
    let (vehicle, log) = Bench {
        rangers: [Ranger::steady(50.0), Ranger::steady(30.0), Ranger::steady(10.0)],
        line: Line::levels(&[1, 0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    block_on(vehicle.race(1, &stop)).unwrap();
    let log = log.borrow();
    assert_eq!(log[0], Cmd::Speed(25.0));
    assert_eq!(log[1], Cmd::Steering(-100.0));
}

#[test]
fn zero_laps_stops_immediately() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    assert_eq!(block_on(vehicle.race(0, &stop)).unwrap(), 0);
    assert_eq!(*log.borrow(), vec![Cmd::Speed(0.0), Cmd::Steering(0.0)]);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
}

#[test]
fn race_is_cancellable() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    let (laps, ()) = block_on(join(vehicle.race(10, &stop), stop_after(&stop, 30)));
    assert_eq!(laps.unwrap(), 0);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));
}

#[test]
fn line_timeouts_are_skipped() {
    let (vehicle, _log) = Bench {
        line: Line(VecDeque::from([Ok(1), Err(SensorFault::Timeout), Ok(0)])),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    assert_eq!(block_on(vehicle.race(1, &stop)).unwrap(), 1);
}

#[test]
fn unexpected_line_encoding_aborts_the_race() {
    let (vehicle, log) = Bench {
        line: Line::levels(&[1, 7]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let result = block_on(vehicle.race(3, &stop));
    assert!(matches!(
        result,
        Err(VehicleError::Line(LineError::UnexpectedEncoding(7)))
    ));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));
}

#[test]
fn drive_error_stops_and_propagates() {
    let (vehicle, log) = Bench {
        rangers: [Ranger::steady(50.0), Ranger::steady(30.0), Ranger::steady(10.0)],
        reject_turns: true,
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let result = block_on(vehicle.race(1, &stop));
    assert!(matches!(result, Err(VehicleError::Drive("servo channel nacked"))));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));
}

#[test]
fn free_driving_evades_toward_open_side() {
    let (vehicle, log) = Bench {
        rangers: [
            Ranger::scripted(&[Ok(10.0)], Ok(200.0)),
            Ranger::steady(100.0),
            Ranger::steady(50.0),
        ],
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let (result, ()) = block_on(join(vehicle.drive_free(&stop), stop_after(&stop, 30)));
    result.unwrap();

    let log = log.borrow();
    assert_eq!(
        log[..6],
        [
            Cmd::Speed(-40.0),
            Cmd::Steering(0.0),
            Cmd::Speed(40.0),
            Cmd::Steering(-100.0),
            Cmd::Speed(50.0),
            Cmd::Steering(0.0),
        ]
    );
    assert!(log.ends_with(&[Cmd::Speed(0.0), Cmd::Steering(0.0)]));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
}

#[test]
fn missing_readings_are_not_obstacles() {
    let (vehicle, log) = Bench {
        rangers: [
            Ranger::steady(200.0),
            Ranger::scripted(&[], Err(SensorFault::Timeout)),
            Ranger::steady(60.0),
        ],
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let (result, ()) = block_on(join(vehicle.drive_free(&stop), stop_after(&stop, 20)));
    result.unwrap();
    assert!(!log.borrow().contains(&Cmd::Speed(-40.0)));
    assert_eq!(log.borrow()[0], Cmd::Speed(50.0));
}

#[test]
fn guard_is_passive_when_idle() {
    let (vehicle, log) = Bench {
        rangers: [Ranger::steady(5.0), Ranger::steady(5.0), Ranger::steady(5.0)],
        ..Bench::default()
    }
    .build();

    let _ = block_on(select(vehicle.guard(), Timer::after_millis(20)));
    assert!(log.borrow().is_empty());
    assert_eq!(vehicle.state(), VehicleState::Idle);
}

#[test]
fn guard_evades_during_a_race() {
    let mut line = vec![1u8; 30];
    line.push(0);
    let (vehicle, log) = Bench {
        rangers: [Ranger::steady(25.0), Ranger::steady(60.0), Ranger::steady(60.0)],
        line: Line::levels(&line),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let raced = block_on(select(vehicle.guard(), vehicle.race(1, &stop)));
    let laps = match raced {
        Either::Second(laps) => laps.unwrap(),
        Either::First(never) => never,
    };
    assert_eq!(laps, 1);
    assert!(log.borrow().contains(&Cmd::Speed(-40.0)));
    assert!(ends_stopped(&log));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
}

#[test]
fn green_light_starts_the_race() {
    let (vehicle, _log) = Bench {
        color: Color {
            script: VecDeque::from([BLACK, BLACK]),
            last: Ok(GREEN),
        },
        line: Line::levels(&[1, 0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    assert_eq!(block_on(vehicle.race_on_green(1, &stop)).unwrap(), 1);
}

#[test]
fn waiting_for_green_is_cancellable() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    let (laps, ()) = block_on(join(vehicle.race_on_green(1, &stop), stop_after(&stop, 20)));
    assert_eq!(laps.unwrap(), 0);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert_eq!(*log.borrow(), vec![Cmd::Speed(0.0), Cmd::Steering(0.0)]);
}

#[test]
fn u_turn_runs_open_loop() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    block_on(vehicle.u_turn(&stop)).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            Cmd::Speed(50.0),
            Cmd::Steering(-100.0),
            Cmd::Speed(75.0),
            Cmd::Steering(0.0),
        ]
    );
    assert_eq!(vehicle.state(), VehicleState::Idle);
}

#[test]
fn circle_rejects_unknown_direction() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    let result = block_on(vehicle.circle("up", &stop));
    assert!(matches!(result, Err(VehicleError::InvalidArgument)));
    assert!(log.borrow().is_empty());

    block_on(vehicle.circle("Right", &stop)).unwrap();
    assert_eq!(log.borrow()[1], Cmd::Steering(100.0));
    assert!(ends_stopped(&log));
}

#[test]
fn eight_turn_alternates_and_stops() {
    let (vehicle, log) = Bench::default().build();
    let stop = StopSignal::new();

    block_on(vehicle.eight_turn(1, &stop)).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            Cmd::Speed(50.0),
            Cmd::Steering(-100.0),
            Cmd::Steering(100.0),
            Cmd::Speed(0.0),
            Cmd::Steering(0.0),
        ]
    );
}

#[test]
fn cancelled_maneuver_stops_the_car() {
    let mut config = fast_config();
    config.timings.reverse_step_ms = 10_000;
    let (vehicle, log) = Bench {
        config,
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let (result, ()) = block_on(join(vehicle.reverse_gear(&stop), stop_after(&stop, 20)));
    result.unwrap();
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert_eq!(
        *log.borrow(),
        vec![Cmd::Speed(25.0), Cmd::Speed(0.0), Cmd::Steering(0.0)]
    );
}

#[test]
fn failed_maneuver_stops_the_car() {
    let (vehicle, log) = Bench {
        reject_turns: true,
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let result = block_on(vehicle.turn_left(&stop));
    assert!(matches!(result, Err(VehicleError::Drive(_))));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));
}

#[test]
fn self_test_reports_every_sensor() {
    let (vehicle, log) = Bench {
        rangers: [
            Ranger::steady(120.0),
            Ranger::scripted(&[], Err(SensorFault::Timeout)),
            Ranger::steady(30.0),
        ],
        color: Color {
            script: VecDeque::new(),
            last: Err(SensorFault::Bus),
        },
        line: Line::levels(&[0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let report = block_on(vehicle.self_test(&stop)).unwrap().expect("self test completes");
    assert_eq!(report.distances.front, Some(120.0));
    assert_eq!(report.distances.left, None);
    assert_eq!(report.distances.right, Some(30.0));
    assert_eq!(report.power, Some(BATTERY));
    assert_eq!(report.color, None);
    assert_eq!(report.line, Ok(true));
    assert!(ends_stopped(&log));
}

#[test]
fn cancelled_self_test_has_no_report() {
    let mut config = fast_config();
    config.timings.step_ms = 50;
    let (vehicle, log) = Bench {
        config,
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let (report, ()) = block_on(join(vehicle.self_test(&stop), stop_after(&stop, 20)));
    assert_eq!(report.unwrap(), None);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert!(ends_stopped(&log));

    let (outcome, ()) = block_on(join(
        vehicle.execute(VehicleCommand::Test, &stop),
        stop_after(&stop, 20),
    ));
    assert_eq!(outcome.unwrap(), CommandOutcome::Cancelled);
}

#[test]
fn execute_maps_commands() {
    let (vehicle, log) = Bench {
        line: Line::levels(&[1, 0]),
        ..Bench::default()
    }
    .build();
    let stop = StopSignal::new();

    let outcome = block_on(vehicle.execute(VehicleCommand::Start { laps: 1 }, &stop)).unwrap();
    assert_eq!(outcome, CommandOutcome::Laps(1));

    log.borrow_mut().clear();
    let outcome = block_on(vehicle.execute(VehicleCommand::Stop, &stop)).unwrap();
    assert_eq!(outcome, CommandOutcome::Done);
    assert_eq!(*log.borrow(), vec![Cmd::Speed(0.0), Cmd::Steering(0.0)]);
    assert_eq!(vehicle.state(), VehicleState::Stopped);
}
