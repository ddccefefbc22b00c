//! Three-channel distance sensing.
//!
//! `DistanceAggregator` polls the front, left and right rangers concurrently.
//! Each channel averages several raw readings and drops the ones that faulted,
//! so one blind ranger never masks the other two.

use embassy_futures::join::join3;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::digital::Wait;

use super::{DistanceReading, RangingSensor, SensorFault, MAX_RANGE_CM, MIN_RANGE_CM};
use crate::utils::config::SamplingConfig;

/// Speed of sound over the round trip, in cm per second of echo.
const HALF_SPEED_OF_SOUND_CM_S: f32 = 17_150.0;

/// Mounting position of a ranger, used to tag log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Left,
    Right,
}

/// Averages three rangers into one `DistanceReading` per poll.
pub struct DistanceAggregator<R> {
    front: R,
    left: R,
    right: R,
    config: SamplingConfig,
}

impl<R: RangingSensor> DistanceAggregator<R> {
    pub fn new(
        front: R,
        left: R,
        right: R,
        config: SamplingConfig,
    ) -> Self {
        Self {
            front,
            left,
            right,
            config,
        }
    }

    /// Sample the three channels concurrently and wait for all of them.
    ///
    /// A channel with no valid reading reports `None`; faults never escape.
    pub async fn sample_distances(&mut self) -> DistanceReading {
        let config = self.config;
        let (front, left, right) = join3(
            sample_channel(&mut self.front, Side::Front, &config),
            sample_channel(&mut self.left, Side::Left, &config),
            sample_channel(&mut self.right, Side::Right, &config),
        )
        .await;

        DistanceReading { front, left, right }
    }
}

async fn sample_channel<R: RangingSensor>(
    sensor: &mut R,
    side: Side,
    config: &SamplingConfig,
) -> Option<f32> {
    let mut sum = 0.0f32;
    let mut valid = 0u8;

    for i in 0..config.samples {
        match sensor.measure().await {
            Ok(cm) if (MIN_RANGE_CM..=MAX_RANGE_CM).contains(&cm) => {
                sum += cm;
                valid += 1;
            }
            Ok(cm) => tracing::debug!(?side, cm, "discarding out of range sample"),
            Err(fault) => tracing::debug!(?side, ?fault, "ranger sample failed"),
        }
        if i + 1 < config.samples {
            Timer::after(config.sample_interval()).await;
        }
    }

    if valid == 0 {
        tracing::debug!(?side, "no valid samples this cycle");
        return None;
    }
    Some(round_to_tenth(sum / valid as f32))
}

fn round_to_tenth(value: f32) -> f32 {
    libm::roundf(value * 10.0) / 10.0
}

/// Convert an echo pulse width into a distance rounded to the hundredth of a cm.
pub fn echo_to_distance(echo: Duration) -> Result<f32, SensorFault> {
    let seconds = echo.as_micros() as f32 / 1_000_000.0;
    let cm = libm::roundf(seconds * HALF_SPEED_OF_SOUND_CM_S * 100.0) / 100.0;
    if (MIN_RANGE_CM..=MAX_RANGE_CM).contains(&cm) {
        Ok(cm)
    } else {
        Err(SensorFault::OutOfRange(cm))
    }
}

/// HC-SR04 ultrasonic ranger on a trigger output and an edge-waitable echo input.
pub struct Hcsr04<T, E> {
    trigger: T,
    echo: E,
    echo_timeout: Duration,
}

impl<T, E> Hcsr04<T, E>
where
    T: OutputPin,
    E: Wait,
{
    pub fn new(
        trigger: T,
        echo: E,
        echo_timeout: Duration,
    ) -> Self {
        Self {
            trigger,
            echo,
            echo_timeout,
        }
    }
}

impl<T, E> RangingSensor for Hcsr04<T, E>
where
    T: OutputPin,
    E: Wait,
{
    async fn measure(&mut self) -> Result<f32, SensorFault> {
        self.trigger.set_high().map_err(|_| SensorFault::Pin)?;
        Timer::after_micros(10).await;
        self.trigger.set_low().map_err(|_| SensorFault::Pin)?;

        with_timeout(self.echo_timeout, self.echo.wait_for_high())
            .await
            .map_err(|_| SensorFault::Timeout)?
            .map_err(|_| SensorFault::Pin)?;
        let rise = Instant::now();

        with_timeout(self.echo_timeout, self.echo.wait_for_low())
            .await
            .map_err(|_| SensorFault::Timeout)?
            .map_err(|_| SensorFault::Pin)?;

        echo_to_distance(rise.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Ranger double replaying a fixed script; `None` plays back a timeout.
    struct Scripted(VecDeque<Option<f32>>);

    impl Scripted {
        fn new(samples: &[Option<f32>]) -> Self {
            Self(samples.iter().copied().collect())
        }

        fn all(value: f32) -> Self {
            Self::new(&[Some(value); 5])
        }
    }

    impl RangingSensor for Scripted {
        async fn measure(&mut self) -> Result<f32, SensorFault> {
            self.0
                .pop_front()
                .flatten()
                .ok_or(SensorFault::Timeout)
        }
    }

    /// Ranger that never answers before its own timeout expires.
    struct Deaf;

    impl RangingSensor for Deaf {
        async fn measure(&mut self) -> Result<f32, SensorFault> {
            Timer::after_millis(3).await;
            Err(SensorFault::Timeout)
        }
    }

    fn fast() -> SamplingConfig {
        SamplingConfig {
            sample_interval_ms: 1,
            ..SamplingConfig::default()
        }
    }

    #[test]
    fn averages_every_channel() {
        let sample = || Scripted::new(&[Some(10.0), Some(12.0), Some(11.0), Some(13.0), Some(10.0)]);
        let mut agg = DistanceAggregator::new(sample(), sample(), sample(), fast());
        let reading = embassy_futures::block_on(agg.sample_distances());
        assert_eq!(reading, DistanceReading::new(Some(11.2), Some(11.2), Some(11.2)));
    }

    #[test]
    fn missing_samples_are_dropped_per_channel() {
        let front = Scripted::new(&[None; 5]);
        let left = Scripted::new(&[Some(20.0), Some(21.0), Some(19.0), Some(20.0), Some(21.0)]);
        let right = Scripted::new(&[Some(30.0), None, Some(30.0), Some(29.0), Some(31.0)]);
        let mut agg = DistanceAggregator::new(front, left, right, fast());
        let reading = embassy_futures::block_on(agg.sample_distances());
        assert_eq!(reading.front, None);
        assert_eq!(reading.left, Some(20.2));
        assert_eq!(reading.right, Some(30.0));
    }

    #[test]
    fn out_of_range_values_never_reach_the_average() {
        let front = Scripted::new(&[Some(1.0), Some(500.0), Some(40.0), Some(42.0), Some(0.0)]);
        let mut agg = DistanceAggregator::new(front, Scripted::all(50.0), Scripted::all(60.0), fast());
        let reading = embassy_futures::block_on(agg.sample_distances());
        assert_eq!(reading.front, Some(41.0));
    }

    #[test]
    fn single_valid_sample_is_enough() {
        let front = Scripted::new(&[None, None, None, None, Some(33.33)]);
        let mut agg = DistanceAggregator::new(front, Scripted::all(50.0), Scripted::all(60.0), fast());
        let reading = embassy_futures::block_on(agg.sample_distances());
        assert_eq!(reading.front, Some(33.3));
    }

    #[test]
    fn a_deaf_channel_does_not_disturb_its_siblings() {
        struct Either(Option<Deaf>, Scripted);
        impl RangingSensor for Either {
            async fn measure(&mut self) -> Result<f32, SensorFault> {
                match self.0.as_mut() {
                    Some(deaf) => deaf.measure().await,
                    None => self.1.measure().await,
                }
            }
        }

        let mut agg = DistanceAggregator::new(
            Either(Some(Deaf), Scripted::new(&[])),
            Either(None, Scripted::all(25.0)),
            Either(None, Scripted::all(75.5)),
            fast(),
        );
        let reading = embassy_futures::block_on(agg.sample_distances());
        assert_eq!(reading, DistanceReading::new(None, Some(25.0), Some(75.5)));
    }

    #[test]
    fn echo_width_converts_to_centimeters() {
        assert_eq!(echo_to_distance(Duration::from_micros(1_000)), Ok(17.15));
        assert_eq!(echo_to_distance(Duration::from_micros(2_000)), Ok(34.3));
    }

    #[test]
    fn echo_outside_the_ranger_limits_is_rejected() {
        assert!(matches!(
            echo_to_distance(Duration::from_micros(100)),
            Err(SensorFault::OutOfRange(_))
        ));
        assert!(matches!(
            echo_to_distance(Duration::from_millis(30)),
            Err(SensorFault::OutOfRange(_))
        ));
    }
}
