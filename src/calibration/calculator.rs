//! # Calibration Calculator
//!
//! Maps a raw sample to a position in `0..=total_travel` using a stored
//! [`Calibration`]. Pure functions, safe to call from any thread.

use super::Calibration;

/// Length of the calibrated travel
///
/// Boundaries are stored in logical-raw space (mirrored when inverted,
/// unwrapped when rolling over), so the travel is the same difference for all
/// four inversion × rollover combinations. Never negative.
#[must_use]
pub fn total_travel(cal: &Calibration) -> i32 {
    cal.max_value.saturating_sub(cal.min_value).max(0)
}

/// Normalize a raw sample
///
/// # Arguments
///
/// * `raw` - Raw sensor value as reported by the device
/// * `cal` - Stored calibration of the input
///
/// # Returns
///
/// Position in `0..=total_travel(cal)`; out-of-travel samples are clamped.
///
/// # Examples
///
/// ```
/// use train_io_bridge::calibration::{calculator::normalize, Calibration};
///
/// // Inverted: raw 900 is the start of travel
/// let cal = Calibration {
///     min_value: 123,
///     max_value: 923,
///     max_hardware_value: 1023,
///     is_inverted: true,
///     has_rollover: false,
/// };
/// assert_eq!(normalize(900, &cal), 0);
/// assert_eq!(normalize(100, &cal), 800);
/// ```
#[must_use]
pub fn normalize(raw: i32, cal: &Calibration) -> i32 {
    let total = total_travel(cal);

    let position = match (cal.is_inverted, cal.has_rollover) {
        (false, false) => raw.saturating_sub(cal.min_value),
        (true, false) => cal
            .max_hardware_value
            .saturating_sub(cal.min_value)
            .saturating_sub(raw),
        (false, true) => wrapped_position(raw, cal, total),
        (true, true) => wrapped_position(cal.max_hardware_value.saturating_sub(raw), cal, total),
    };

    position.clamp(0, total)
}

/// Position of a logical-raw value on a travel that wraps past
/// `max_hardware_value` back to zero.
///
/// Values between the wrapped end and the start cannot be reached physically;
/// they snap to whichever end is nearer.
fn wrapped_position(logical: i32, cal: &Calibration, total: i32) -> i32 {
    let span = cal.max_hardware_value.saturating_add(1);
    let end = cal.max_value.saturating_sub(span);

    if logical >= cal.min_value {
        logical.saturating_sub(cal.min_value)
    } else if logical <= end {
        span.saturating_sub(cal.min_value).saturating_add(logical)
    } else if logical.saturating_sub(end) < cal.min_value.saturating_sub(logical) {
        total
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cal(min: i32, max: i32, inverted: bool, rollover: bool) -> Calibration {
        Calibration {
            min_value: min,
            max_value: max,
            max_hardware_value: 1023,
            is_inverted: inverted,
            has_rollover: rollover,
        }
    }

    #[test]
    fn test_plain_calibration() {
        let c = cal(10, 150, false, false);
        assert_eq!(normalize(10, &c), 0);
        assert_eq!(normalize(80, &c), 70);
        assert_eq!(normalize(150, &c), 140);
        assert_eq!(normalize(200, &c), 140);
        assert_eq!(normalize(0, &c), 0);
    }

    #[test]
    fn test_inverted_calibration() {
        let c = cal(123, 923, true, false);
        assert_eq!(total_travel(&c), 800);
        assert_eq!(normalize(900, &c), 0);
        assert_eq!(normalize(100, &c), 800);
        assert_eq!(normalize(500, &c), 400);
        // Beyond either end
        assert_eq!(normalize(1000, &c), 0);
        assert_eq!(normalize(0, &c), 800);
    }

    #[test]
    fn test_rollover_calibration() {
        let c = cal(1010, 1034, false, true);
        assert_eq!(total_travel(&c), 24);
        assert_eq!(normalize(1010, &c), 0);
        assert_eq!(normalize(1023, &c), 13);
        assert_eq!(normalize(0, &c), 14);
        assert_eq!(normalize(10, &c), 24);
    }

    #[test]
    fn test_rollover_dead_zone_snaps_to_nearest_end() {
        let c = cal(1010, 1034, false, true);
        // Wrapped end is raw 10, start is raw 1010; midpoint 510
        assert_eq!(normalize(11, &c), 24);
        assert_eq!(normalize(400, &c), 24);
        assert_eq!(normalize(700, &c), 0);
        assert_eq!(normalize(1009, &c), 0);
    }

    #[test]
    fn test_inverted_rollover_calibration() {
        // Raw travel 10 -> 0 -> 1023 -> 1010; logical start 1013, end 13 + 1024
        let c = cal(1013, 1037, true, true);
        assert_eq!(total_travel(&c), 24);
        assert_eq!(normalize(10, &c), 0);
        assert_eq!(normalize(0, &c), 10);
        assert_eq!(normalize(1023, &c), 11);
        assert_eq!(normalize(1010, &c), 24);
    }

    #[test]
    fn test_inverted_rollover_dead_zone() {
        let c = cal(1013, 1037, true, true);
        // Raw 1000 sits just past the end of travel
        assert_eq!(normalize(1000, &c), 24);
        // Raw 20 sits just before the start of travel
        assert_eq!(normalize(20, &c), 0);
    }

    #[test]
    fn test_inverted_travel_never_negative() {
        let c = cal(500, 400, false, false);
        assert_eq!(total_travel(&c), 0);
        assert_eq!(normalize(450, &c), 0);
    }

    #[test]
    fn test_extreme_boundaries_do_not_overflow() {
        let c = cal(i32::MIN, i32::MAX, false, false);
        assert_eq!(total_travel(&c), i32::MAX);
        assert_eq!(normalize(i32::MIN, &c), 0);
        assert_eq!(normalize(i32::MAX, &c), i32::MAX);

        let c = cal(i32::MIN, i32::MAX, true, false);
        assert_eq!(normalize(i32::MIN, &c), i32::MAX);

        let c = cal(i32::MIN, i32::MAX, true, true);
        let value = normalize(i32::MAX, &c);
        assert!((0..=i32::MAX).contains(&value));

        let c = cal(i32::MAX, i32::MIN, false, true);
        assert_eq!(normalize(0, &c), 0);
    }

    fn arb_calibration() -> impl Strategy<Value = (Calibration, i32, i32)> {
        // (calibration, raw start endpoint, raw end endpoint)
        (0i32..=1023, 1i32..=1023, any::<bool>(), any::<bool>()).prop_map(|(start, len, inverted, rollover)| {
            let span = 1024;
            let min = start;
            let max = if rollover {
                // Force the travel past the top of the range
                let end = (start + len).max(span);
                end.min(start + span - 1)
            } else {
                (start + len).min(1023)
            };
            let c = Calibration {
                min_value: min,
                max_value: max,
                max_hardware_value: 1023,
                is_inverted: inverted,
                has_rollover: rollover,
            };
            let to_raw = |logical: i32| {
                let wrapped = logical.rem_euclid(span);
                if inverted { 1023 - wrapped } else { wrapped }
            };
            (c, to_raw(min), to_raw(max))
        })
    }

    proptest! {
        #[test]
        fn prop_normalize_is_clamped((c, _, _) in arb_calibration(), raw in -100i32..1200) {
            let value = normalize(raw, &c);
            prop_assert!(value >= 0);
            prop_assert!(value <= total_travel(&c));
        }

        #[test]
        fn prop_endpoints_map_to_bounds((c, raw_min, raw_max) in arb_calibration()) {
            prop_assume!(total_travel(&c) > 0);
            prop_assert_eq!(normalize(raw_min, &c), 0);
            prop_assert_eq!(normalize(raw_max, &c), total_travel(&c));
        }
    }
}
