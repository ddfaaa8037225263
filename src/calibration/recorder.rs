//! # Calibration Recorder
//!
//! Collects raw samples for one analog pin while the user walks the lever
//! through the calibration procedure:
//!
//! 1. **Minimum** - hold the lever at its start position
//! 2. **Sweep** - move it slowly to the end position
//! 3. **Maximum** - hold it at the end position
//!
//! Samples for other pins are ignored, so the recorder can be fed straight
//! from the session's input value stream.

use tracing::{debug, info};

use super::{analyzer, Calibration, CalibrationError};

/// Current collection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Minimum,
    Sweep,
    Maximum,
}

/// Sample collector for a single pin
#[derive(Debug, Clone)]
pub struct Recorder {
    pin: u8,
    max_hardware_value: i32,
    phase: Phase,
    min_samples: Vec<i32>,
    sweep: Vec<i32>,
    max_samples: Vec<i32>,
}

impl Recorder {
    /// Starts recording the minimum phase for `pin`.
    #[must_use]
    pub fn new(pin: u8, max_hardware_value: i32) -> Self {
        Self {
            pin,
            max_hardware_value,
            phase: Phase::Minimum,
            min_samples: Vec::new(),
            sweep: Vec::new(),
            max_samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn pin(&self) -> u8 {
        self.pin
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Records a sample if it belongs to this recorder's pin.
    pub fn record(&mut self, pin: u8, value: i16) {
        if pin != self.pin {
            return;
        }

        let value = i32::from(value);
        match self.phase {
            Phase::Minimum => self.min_samples.push(value),
            // Repeated readings carry no direction information
            Phase::Sweep if self.sweep.last() == Some(&value) => {}
            Phase::Sweep => self.sweep.push(value),
            Phase::Maximum => self.max_samples.push(value),
        }
    }

    /// Moves to the next phase. Has no effect in the last phase.
    pub fn advance(&mut self) {
        self.phase = match self.phase {
            Phase::Minimum => Phase::Sweep,
            Phase::Sweep | Phase::Maximum => Phase::Maximum,
        };
        debug!("Calibration of pin {} now in {:?} phase", self.pin, self.phase);
    }

    /// Derives the calibration from everything recorded so far.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError`] if a phase is empty or the travel is empty.
    pub fn finish(&self) -> Result<Calibration, CalibrationError> {
        if self.sweep.is_empty() {
            return Err(CalibrationError::MissingSamples("sweep"));
        }

        let calibration = analyzer::calibrate(
            &self.min_samples,
            &self.sweep,
            &self.max_samples,
            self.max_hardware_value,
        )?;

        info!(
            "Calibrated pin {}: min {} max {} inverted {} rollover {}",
            self.pin,
            calibration.min_value,
            calibration.max_value,
            calibration.is_inverted,
            calibration.has_rollover
        );
        Ok(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_advance_in_order() {
        let mut recorder = Recorder::new(3, 1023);
        assert_eq!(recorder.phase(), Phase::Minimum);
        recorder.advance();
        assert_eq!(recorder.phase(), Phase::Sweep);
        recorder.advance();
        assert_eq!(recorder.phase(), Phase::Maximum);
        recorder.advance();
        assert_eq!(recorder.phase(), Phase::Maximum);
    }

    #[test]
    fn test_other_pins_are_ignored() {
        let mut recorder = Recorder::new(3, 1023);
        recorder.record(4, 100);
        recorder.advance();
        recorder.record(4, 200);
        recorder.advance();
        recorder.record(4, 300);

        assert_eq!(recorder.finish(), Err(CalibrationError::MissingSamples("sweep")));
    }

    #[test]
    fn test_full_procedure() {
        let mut recorder = Recorder::new(14, 1023);
        for value in [40, 42, 41] {
            recorder.record(14, value);
        }
        recorder.advance();
        for value in (40..=960).step_by(20) {
            recorder.record(14, value);
            // Duplicate readings are skipped during the sweep
            recorder.record(14, value);
        }
        recorder.advance();
        for value in [960, 958, 961] {
            recorder.record(14, value);
        }

        let cal = recorder.finish().unwrap();
        assert!(!cal.is_inverted);
        assert!(!cal.has_rollover);
        assert_eq!(cal.min_value, 42);
        assert_eq!(cal.max_value, 958);
    }

    #[test]
    fn test_missing_maximum_phase() {
        let mut recorder = Recorder::new(1, 1023);
        recorder.record(1, 10);
        recorder.advance();
        recorder.record(1, 10);
        recorder.record(1, 500);

        assert_eq!(recorder.finish(), Err(CalibrationError::MissingSamples("maximum")));
    }
}
