//! HX711 24-bit load-cell ADC, bit-banged over two GPIOs.
//!
//! DOUT goes low when a conversion is ready. Each of the 24 data bits is
//! clocked out MSB first on a SCK pulse; 1-3 extra pulses select the
//! channel/gain of the *next* conversion. Holding SCK high for more than
//! 60 µs powers the chip down.
//!
//! Generic over `embedded-hal` pins so the framing runs on the host; the
//! readiness wait is the async `Wait` trait (GPIOTE on the nRF52840).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

use crate::config::HX711_GAIN_PULSES;
use crate::error::Error;
use crate::scale::pipeline::raw_count_from_frame;

const DATA_BITS: u8 = 24;

/// SCK half period in ns. Well inside the 0.2-50 µs window.
const HALF_PERIOD_NS: u32 = 1_000;

/// SCK high time that guarantees power-down.
const POWER_DOWN_US: u32 = 100;

pub struct Hx711<SCK, DOUT, D> {
    sck: SCK,
    dout: DOUT,
    delay: D,
}

impl<SCK, DOUT, D> Hx711<SCK, DOUT, D>
where
    SCK: OutputPin,
    DOUT: InputPin + Wait,
    D: DelayNs,
{
    pub fn new(mut sck: SCK, dout: DOUT, delay: D) -> Result<Self, Error> {
        sck.set_low().map_err(|_| Error::Sensor)?;
        Ok(Self { sck, dout, delay })
    }

    /// Wait for the next conversion and return it as a signed count.
    pub async fn read(&mut self) -> Result<i32, Error> {
        self.dout.wait_for_low().await.map_err(|_| Error::Sensor)?;

        let mut frame: u32 = 0;
        for _ in 0..DATA_BITS {
            self.pulse()?;
            let bit = self.dout.is_high().map_err(|_| Error::Sensor)?;
            frame = (frame << 1) | bit as u32;
        }
        for _ in 0..HX711_GAIN_PULSES {
            self.pulse()?;
        }

        Ok(raw_count_from_frame(frame))
    }

    /// Fill `samples` with consecutive conversions.
    pub async fn read_into(&mut self, samples: &mut [i32]) -> Result<(), Error> {
        for sample in samples.iter_mut() {
            *sample = self.read().await?;
        }
        Ok(())
    }

    pub fn power_down(&mut self) -> Result<(), Error> {
        self.sck.set_low().map_err(|_| Error::Sensor)?;
        self.sck.set_high().map_err(|_| Error::Sensor)?;
        self.delay.delay_us(POWER_DOWN_US);
        Ok(())
    }

    pub fn power_up(&mut self) -> Result<(), Error> {
        self.sck.set_low().map_err(|_| Error::Sensor)
    }

    fn pulse(&mut self) -> Result<(), Error> {
        self.sck.set_high().map_err(|_| Error::Sensor)?;
        self.delay.delay_ns(HALF_PERIOD_NS);
        self.sck.set_low().map_err(|_| Error::Sensor)?;
        self.delay.delay_ns(HALF_PERIOD_NS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeSck {
        high: bool,
        pulses: u32,
    }

    impl ErrorType for FakeSck {
        type Error = ErrorKind;
    }

    impl OutputPin for FakeSck {
        fn set_low(&mut self) -> Result<(), ErrorKind> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), ErrorKind> {
            if !self.high {
                self.pulses += 1;
            }
            self.high = true;
            Ok(())
        }
    }

    /// Shifts out queued 24-bit frames, one bit per read.
    #[derive(Default)]
    struct FakeDout {
        frames: VecDeque<u32>,
        current: u32,
        bit: u8,
        broken: bool,
    }

    impl FakeDout {
        fn with_frames(frames: &[u32]) -> Self {
            Self {
                frames: frames.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl ErrorType for FakeDout {
        type Error = ErrorKind;
    }

    impl InputPin for FakeDout {
        fn is_high(&mut self) -> Result<bool, ErrorKind> {
            if self.bit == 0 {
                self.current = self.frames.pop_front().ok_or(ErrorKind::Other)?;
            }
            let level = (self.current >> (DATA_BITS - 1 - self.bit)) & 1 == 1;
            self.bit = (self.bit + 1) % DATA_BITS;
            Ok(level)
        }

        fn is_low(&mut self) -> Result<bool, ErrorKind> {
            self.is_high().map(|h| !h)
        }
    }

    impl Wait for FakeDout {
        async fn wait_for_high(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }

        async fn wait_for_low(&mut self) -> Result<(), ErrorKind> {
            if self.broken {
                return Err(ErrorKind::Other);
            }
            Ok(())
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), ErrorKind> {
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[test]
    fn frames_are_clocked_msb_first_and_sign_extended() {
        let dout = FakeDout::with_frames(&[0x00_0001, 0xFF_FFFF, 0x80_0000]);
        let mut adc = Hx711::new(FakeSck::default(), dout, NoDelay).unwrap();

        let mut samples = [0i32; 3];
        block_on(adc.read_into(&mut samples)).unwrap();

        assert_eq!(samples, [1, -1, -8_388_608]);
        assert_eq!(adc.sck.pulses, 3 * (24 + HX711_GAIN_PULSES as u32));
        assert!(!adc.sck.high);
    }

    #[test]
    fn pin_failure_is_a_sensor_error() {
        let dout = FakeDout {
            broken: true,
            ..Default::default()
        };
        let mut adc = Hx711::new(FakeSck::default(), dout, NoDelay).unwrap();
        assert_eq!(block_on(adc.read()), Err(Error::Sensor));
    }

    #[test]
    fn power_down_holds_clock_high_until_power_up() {
        let mut adc = Hx711::new(FakeSck::default(), FakeDout::default(), NoDelay).unwrap();
        adc.power_down().unwrap();
        assert!(adc.sck.high);
        adc.power_up().unwrap();
        assert!(!adc.sck.high);
    }
}
