mod sim;

use clap::{Parser, Subcommand};
use core::cell::RefCell;
use embassy_executor::{Executor, Spawner};
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::i2c::RefCellDevice;
use lambo_core::mk_static;
use lambo_core::utils::{
    config::VehicleConfig,
    controllers::{
        Actuators, CommandOutcome, DcMotor, I2cPeripherals, Pca9685Output, StopSignal, Turn,
        Vehicle, VehicleCommand,
    },
    sensors::{
        distance::Side, DigitalLineSensor, DistanceAggregator, Ina219, PerceptionAggregator,
        Tcs34725,
    },
};
use sim::{SimI2c, SimLinePin, SimPin, SimRanger};
use static_cell::StaticCell;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

type Bus = RefCellDevice<'static, SimI2c>;
type Car = Vehicle<
    Actuators<Pca9685Output<Bus>, SimPin>,
    SimRanger,
    DigitalLineSensor<SimLinePin>,
    Tcs34725<Bus>,
    Ina219<Bus>,
>;

/// Raised by Enter on stdin or by `--stop-after`.
static STOP: StopSignal = StopSignal::new();

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON file overriding the default calibration
    #[clap(long)]
    config: Option<PathBuf>,
    /// interrupt the command after this many seconds
    #[clap(long)]
    stop_after: Option<u64>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exercise the actuators and read every sensor
    Test,
    /// Race for the given number of laps
    Start { laps: u32 },
    /// Wait for a green light, then race
    Green { laps: u32 },
    /// Cruise and avoid obstacles until stopped
    Avoid,
    /// Throttle ramp 25, 50, 75
    StartCar,
    ReverseGear,
    UTurn,
    /// Figure eight; loops default to the configured count
    EightTurn { loops: Option<u8> },
    /// Full-lock circle, "left" or "right"
    Circle { direction: String },
    TurnLeft,
    TurnRight,
    /// Full stop
    Stop,
}

fn load_config(path: Option<&Path>) -> Result<VehicleConfig, String> {
    let Some(path) = path else {
        return Ok(VehicleConfig::default());
    };
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    VehicleConfig::from_json(&bytes).map_err(|e| format!("{}: {}", path.display(), e))
}

#[embassy_executor::task]
async fn guard_task(car: &'static Car) -> ! {
    car.guard().await
}

#[embassy_executor::task]
async fn stop_timer(after: Duration) {
    Timer::after(after).await;
    info!("stop timer elapsed");
    STOP.signal(());
}

#[embassy_executor::task]
async fn main_task(
    spawner: Spawner,
    opts: Opts,
) {
    let config = match load_config(opts.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    let command = match vehicle_command(opts.command, &config) {
        Ok(command) => command,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    // Simulated I2C bus shared by the PWM chip and both sensors
    static I2C_BUS: StaticCell<RefCell<SimI2c>> = StaticCell::new();
    let i2c_bus = I2C_BUS.init(RefCell::new(SimI2c::new(&config)));

    let I2cPeripherals {
        pwm,
        color,
        current,
    } = match I2cPeripherals::new(i2c_bus, &config, &mut Delay) {
        Ok(devices) => devices,
        Err(e) => {
            error!("I2C bring-up failed: {:?}", e);
            std::process::exit(1);
        }
    };

    let motors = [
        DcMotor::new(config.motors[0], SimPin::new("motor_a_in1"), SimPin::new("motor_a_in2")),
        DcMotor::new(config.motors[1], SimPin::new("motor_b_in1"), SimPin::new("motor_b_in2")),
    ];
    let drive = Actuators::new(pwm, motors, config.servo);
    let distances = DistanceAggregator::new(
        SimRanger::new(Side::Front),
        SimRanger::new(Side::Left),
        SimRanger::new(Side::Right),
        config.sampling,
    );
    let perception = PerceptionAggregator::new(
        DigitalLineSensor::new(SimLinePin::new()),
        color,
        current,
        config.colors,
    );
    let car: &'static Car = mk_static!(Car, Vehicle::new(drive, distances, perception, config));
    spawner.spawn(guard_task(car)).unwrap();

    if let Some(secs) = opts.stop_after {
        spawner.spawn(stop_timer(Duration::from_secs(secs))).unwrap();
    }
    std::thread::spawn(|| {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            STOP.signal(());
        }
    });
    info!("Press Enter to stop");

    let outcome = car.execute(command, &STOP).await;

    let code = match outcome {
        Ok(CommandOutcome::Done) => 0,
        Ok(CommandOutcome::Laps(laps)) => {
            info!(laps, "race over");
            0
        }
        Ok(CommandOutcome::Report(report)) => {
            info!(?report, "self test complete");
            0
        }
        Ok(CommandOutcome::Cancelled) => {
            warn!("self test interrupted");
            0
        }
        Err(e) => {
            error!("Command failed: {:?}", e);
            1
        }
    };
    if let Err(e) = car.stop_car().await {
        warn!("Final stop failed: {:?}", e);
    }
    std::process::exit(code);
}

fn vehicle_command(
    command: Command,
    config: &VehicleConfig,
) -> Result<VehicleCommand, String> {
    Ok(match command {
        Command::Test => VehicleCommand::Test,
        Command::Start { laps } => VehicleCommand::Start { laps },
        Command::Green { laps } => VehicleCommand::Green { laps },
        Command::Avoid => VehicleCommand::Avoid,
        Command::StartCar => VehicleCommand::StartCar,
        Command::ReverseGear => VehicleCommand::ReverseGear,
        Command::UTurn => VehicleCommand::UTurn,
        Command::EightTurn { loops } => VehicleCommand::EightTurn {
            loops: loops.unwrap_or(config.timings.eight_loops),
        },
        Command::Circle { direction } => VehicleCommand::Circle {
            direction: direction
                .parse::<Turn>()
                .map_err(|_| format!("circle direction must be left or right, got {:?}", direction))?,
        },
        Command::TurnLeft => VehicleCommand::TurnLeft,
        Command::TurnRight => VehicleCommand::TurnRight,
        Command::Stop => VehicleCommand::Stop,
    })
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let opts: Opts = Opts::parse();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner, opts)).unwrap();
    });
}
