//! Mapping between the controller's 0..=255 device scale and the 0..=100
//! scale used on the bus.

use crate::error::ConversionError;

pub const DEVICE_MAX: i64 = 255;
pub const HUMAN_MAX: i64 = 100;

/// `round(100 * v / 255)`.
pub fn to_human(device_value: i64) -> Result<u8, ConversionError> {
    check(device_value, DEVICE_MAX)?;
    Ok(rounded_div(HUMAN_MAX * device_value, DEVICE_MAX))
}

/// `round(255 * v / 100)`, halves round up (10 -> 26).
pub fn to_device(human_value: i64) -> Result<u8, ConversionError> {
    check(human_value, HUMAN_MAX)?;
    Ok(rounded_div(DEVICE_MAX * human_value, HUMAN_MAX))
}

/// Fan speed of a FanLinc motor: 0 off, 1 low, 2 medium, 3 high.
pub fn fan_speed(device_value: i64) -> Result<u8, ConversionError> {
    let speed = match to_human(device_value)? {
        0 => 0,
        1..=49 => 1,
        50..=99 => 2,
        _ => 3,
    };
    Ok(speed)
}

fn check(value: i64, max: i64) -> Result<(), ConversionError> {
    if (0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConversionError::OutOfRange { value, min: 0, max })
    }
}

// Both operands are non-negative and the quotient is bounded by 255.
fn rounded_div(numerator: i64, denominator: i64) -> u8 {
    ((numerator * 2 + denominator) / (denominator * 2)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_points() {
        assert_eq!(to_device(50), Ok(128));
        assert_eq!(to_device(10), Ok(26));
        assert_eq!(to_device(100), Ok(255));
        assert_eq!(to_human(255), Ok(100));
        assert_eq!(to_human(128), Ok(50));
        assert_eq!(to_human(0), Ok(0));
    }

    #[test]
    fn rejects_values_outside_their_scale() {
        assert_eq!(
            to_device(101),
            Err(ConversionError::OutOfRange { value: 101, min: 0, max: 100 })
        );
        assert!(to_device(-1).is_err());
        assert!(to_human(256).is_err());
        assert!(to_human(-5).is_err());
    }

    #[test]
    fn round_trips_stay_within_one_step() {
        for v in 0..=HUMAN_MAX {
            let back = to_human(to_device(v).unwrap() as i64).unwrap() as i64;
            assert!((back - v).abs() <= 1, "human {v} came back as {back}");
        }
        for v in 0..=DEVICE_MAX {
            let back = to_device(to_human(v).unwrap() as i64).unwrap() as i64;
            assert!((back - v).abs() <= 1, "device {v} came back as {back}");
        }
    }

    #[test]
    fn fan_speed_bands() {
        assert_eq!(fan_speed(0), Ok(0));
        assert_eq!(fan_speed(63), Ok(1));
        assert_eq!(fan_speed(191), Ok(2));
        assert_eq!(fan_speed(255), Ok(3));
    }
}
