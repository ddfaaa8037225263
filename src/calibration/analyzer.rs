//! # Sweep Analyzer
//!
//! Characterizes a calibration sweep (the lever moved once from its start to
//! its end position) and derives conservative travel boundaries from the
//! samples collected while the lever rested at each end.
//!
//! ## Detection rules
//!
//! - **Inverted**: the median delta between consecutive samples is negative.
//! - **Rollover**: the largest absolute delta is more than 3× the typical
//!   step (median absolute delta, floored at 10) *and* more than 80% of the
//!   hardware range, i.e. the reading jumped across the wrap point.

use super::{Calibration, CalibrationError};

/// Typical step below which the rollover threshold stops shrinking
const MIN_TYPICAL_STEP: i32 = 10;

/// Jump must exceed this multiple of the typical step to count as a wrap
const ROLLOVER_STEP_FACTOR: i32 = 3;

/// Jump must exceed this fraction (percent) of the hardware range
const ROLLOVER_RANGE_PERCENT: i32 = 80;

/// Characteristics of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Analysis {
    pub inverted: bool,
    pub rollover: bool,
}

fn median(values: &mut [i32]) -> i32 {
    values.sort_unstable();
    values[values.len() / 2]
}

/// Analyze a sweep of raw samples
///
/// # Arguments
///
/// * `samples` - Raw values in the order they were read
/// * `max_hardware_value` - Largest raw value the sensor can report
///
/// # Returns
///
/// Detected inversion and rollover. Fewer than two samples yield the default
/// (neither).
///
/// # Examples
///
/// ```
/// use train_io_bridge::calibration::analyzer::analyze_sweep;
///
/// let analysis = analyze_sweep(&[1000, 1010, 1020, 6, 16, 26], 1023);
/// assert!(!analysis.inverted);
/// assert!(analysis.rollover);
/// ```
#[must_use]
pub fn analyze_sweep(samples: &[i32], max_hardware_value: i32) -> Analysis {
    if samples.len() < 2 {
        return Analysis::default();
    }

    let mut deltas: Vec<i32> = samples.windows(2).map(|w| w[1] - w[0]).collect();
    let mut abs_deltas: Vec<i32> = deltas.iter().map(|d| d.abs()).collect();
    let max_abs = abs_deltas.iter().copied().max().unwrap_or(0);

    let inverted = median(&mut deltas) < 0;

    let typical_step = median(&mut abs_deltas).max(MIN_TYPICAL_STEP);
    let rollover = max_abs > ROLLOVER_STEP_FACTOR * typical_step
        && max_abs * 100 > max_hardware_value * ROLLOVER_RANGE_PERCENT;

    Analysis { inverted, rollover }
}

/// Mirror raw samples into logical-raw space
fn to_logical(samples: &[i32], analysis: Analysis, max_hardware_value: i32) -> Vec<i32> {
    samples
        .iter()
        .map(|&raw| if analysis.inverted { max_hardware_value - raw } else { raw })
        .collect()
}

/// Conservative start-of-travel boundary, in logical-raw space
///
/// Takes the sample furthest into the travel so the calibrated window never
/// starts before physically observed travel. When the resting cluster itself
/// straddles the wrap point, low samples are unwrapped first.
///
/// # Errors
///
/// Returns [`CalibrationError::MissingSamples`] if `samples` is empty.
pub fn calculate_min(
    samples: &[i32],
    analysis: Analysis,
    max_hardware_value: i32,
) -> Result<i32, CalibrationError> {
    let mut logical = to_logical(samples, analysis, max_hardware_value);
    if logical.is_empty() {
        return Err(CalibrationError::MissingSamples("minimum"));
    }

    let span = max_hardware_value + 1;
    let lowest = logical.iter().copied().min().unwrap_or(0);
    let highest = logical.iter().copied().max().unwrap_or(0);
    if analysis.rollover && highest - lowest > span / 2 {
        for value in logical.iter_mut().filter(|v| **v < span / 2) {
            *value += span;
        }
    }

    let inner = logical.iter().copied().max().unwrap_or(0);
    Ok(inner.rem_euclid(span))
}

/// Conservative end-of-travel boundary, in logical-raw space
///
/// Takes the sample least far into the travel. For rollover inputs, values
/// below `min_value` lie past the wrap point and are unwrapped, so the result
/// may exceed `max_hardware_value`.
///
/// # Errors
///
/// Returns [`CalibrationError::MissingSamples`] if `samples` is empty.
pub fn calculate_max(
    samples: &[i32],
    min_value: i32,
    analysis: Analysis,
    max_hardware_value: i32,
) -> Result<i32, CalibrationError> {
    let span = max_hardware_value + 1;
    let logical = to_logical(samples, analysis, max_hardware_value);

    logical
        .into_iter()
        .map(|v| if analysis.rollover && v < min_value { v + span } else { v })
        .min()
        .ok_or(CalibrationError::MissingSamples("maximum"))
}

/// Build a complete calibration from the three collection phases
///
/// # Errors
///
/// Returns [`CalibrationError`] if a phase has no samples, the hardware range
/// is not positive, or the resulting travel is empty.
///
/// # Examples
///
/// ```
/// use train_io_bridge::calibration::analyzer::calibrate;
///
/// let cal = calibrate(&[898, 900, 899], &[900, 700, 500, 300, 100], &[101, 100, 102], 1023).unwrap();
/// assert!(cal.is_inverted);
/// assert_eq!(cal.normalize(900), 0);
/// assert_eq!(cal.normalize(100), cal.total_travel());
/// ```
pub fn calibrate(
    min_samples: &[i32],
    sweep: &[i32],
    max_samples: &[i32],
    max_hardware_value: i32,
) -> Result<Calibration, CalibrationError> {
    if !(1..=super::MAX_HARDWARE_VALUE_LIMIT).contains(&max_hardware_value) {
        return Err(CalibrationError::InvalidHardwareRange(max_hardware_value));
    }

    let analysis = analyze_sweep(sweep, max_hardware_value);
    let min_value = calculate_min(min_samples, analysis, max_hardware_value)?;
    let max_value = calculate_max(max_samples, min_value, analysis, max_hardware_value)?;

    let calibration = Calibration {
        min_value,
        max_value,
        max_hardware_value,
        is_inverted: analysis.inverted,
        has_rollover: analysis.rollover,
    };
    calibration.validate()?;
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_samples() {
        assert_eq!(analyze_sweep(&[], 1023), Analysis::default());
        assert_eq!(analyze_sweep(&[512], 1023), Analysis::default());
    }

    #[test]
    fn test_increasing_sweep() {
        let sweep: Vec<i32> = (0..50).map(|i| 100 + i * 15).collect();
        assert_eq!(
            analyze_sweep(&sweep, 1023),
            Analysis { inverted: false, rollover: false }
        );
    }

    #[test]
    fn test_decreasing_sweep_is_inverted() {
        let sweep: Vec<i32> = (0..50).map(|i| 900 - i * 15).collect();
        let analysis = analyze_sweep(&sweep, 1023);
        assert!(analysis.inverted);
        assert!(!analysis.rollover);
    }

    #[test]
    fn test_noise_does_not_flip_direction() {
        // Mostly rising with a few small backwards wiggles
        let sweep = [100, 120, 118, 140, 160, 158, 180, 200];
        assert!(!analyze_sweep(&sweep, 1023).inverted);
    }

    #[test]
    fn test_rollover_detected_on_wrap() {
        let sweep = [990, 1000, 1010, 1020, 5, 15, 25];
        let analysis = analyze_sweep(&sweep, 1023);
        assert!(!analysis.inverted);
        assert!(analysis.rollover);
    }

    #[test]
    fn test_inverted_rollover_detected() {
        let sweep = [30, 20, 10, 0, 1015, 1005, 995];
        let analysis = analyze_sweep(&sweep, 1023);
        assert!(analysis.inverted);
        assert!(analysis.rollover);
    }

    #[test]
    fn test_large_but_partial_jump_is_not_rollover() {
        // Jump of 500 is > 3x the step but below 80% of the range
        let sweep = [100, 110, 120, 620, 630];
        assert!(!analyze_sweep(&sweep, 1023).rollover);
    }

    #[test]
    fn test_calculate_min_takes_inner_sample() {
        let analysis = Analysis::default();
        assert_eq!(calculate_min(&[10, 12, 9, 11], analysis, 1023).unwrap(), 12);
    }

    #[test]
    fn test_calculate_min_inverted_is_mirrored() {
        let analysis = Analysis { inverted: true, rollover: false };
        // Raw cluster around 900 -> logical around 123; inner = 1023 - 898
        assert_eq!(calculate_min(&[900, 899, 898], analysis, 1023).unwrap(), 125);
    }

    #[test]
    fn test_calculate_min_cluster_across_wrap() {
        let analysis = Analysis { inverted: false, rollover: true };
        // Resting at the wrap point: 1022, 1023, 0, 1 -> inner is 1
        assert_eq!(calculate_min(&[1022, 1023, 0, 1], analysis, 1023).unwrap(), 1);
    }

    #[test]
    fn test_calculate_max_takes_inner_sample() {
        let analysis = Analysis::default();
        assert_eq!(calculate_max(&[150, 148, 151], 10, analysis, 1023).unwrap(), 148);
    }

    #[test]
    fn test_calculate_max_rollover_is_unwrapped() {
        let analysis = Analysis { inverted: false, rollover: true };
        assert_eq!(calculate_max(&[10, 11, 12], 1010, analysis, 1023).unwrap(), 1034);
    }

    #[test]
    fn test_missing_samples() {
        let analysis = Analysis::default();
        assert_eq!(
            calculate_min(&[], analysis, 1023),
            Err(CalibrationError::MissingSamples("minimum"))
        );
        assert_eq!(
            calculate_max(&[], 0, analysis, 1023),
            Err(CalibrationError::MissingSamples("maximum"))
        );
    }

    #[test]
    fn test_calibrate_rollover_lever() {
        let min_samples = [1009, 1010, 1008];
        let sweep = [1010, 1015, 1020, 2, 7, 10];
        let max_samples = [10, 11, 12];

        let cal = calibrate(&min_samples, &sweep, &max_samples, 1023).unwrap();
        assert!(cal.has_rollover);
        assert!(!cal.is_inverted);
        assert_eq!(cal.min_value, 1010);
        assert_eq!(cal.max_value, 1034);
        assert_eq!(cal.normalize(1010), 0);
        assert_eq!(cal.normalize(10), 24);
    }

    #[test]
    fn test_calibrate_rejects_empty_travel() {
        let result = calibrate(&[500], &[500, 501], &[500], 1023);
        assert!(matches!(result, Err(CalibrationError::NoTravel { .. })));
    }
}
