//! Wire-format coercions applied by `ColumnData::get_value` (spec §4.2).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Converts an IEEE-754 half-precision (binary16) bit pattern to `f32`.
/// The wire driver has no 16-bit float representation, so every half
/// column is carried as its 32-bit widening from the point it enters a
/// buffer.
pub fn half_bits_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 0x1;
    let exponent = (bits >> 10) & 0x1f;
    let mantissa = bits & 0x3ff;

    let f32_bits: u32 = if exponent == 0 {
        if mantissa == 0 {
            (sign as u32) << 31
        } else {
            // Subnormal half -> normalized f32.
            let mut exp = -1i32;
            let mut mantissa = mantissa as u32;
            while mantissa & 0x400 == 0 {
                mantissa <<= 1;
                exp -= 1;
            }
            mantissa &= 0x3ff;
            let exp = (exp + 127 - 15 + 1) as u32;
            ((sign as u32) << 31) | (exp << 23) | (mantissa << 13)
        }
    } else if exponent == 0x1f {
        ((sign as u32) << 31) | (0xff << 23) | ((mantissa as u32) << 13)
    } else {
        let exp = exponent as u32 + (127 - 15);
        ((sign as u32) << 31) | (exp << 23) | ((mantissa as u32) << 13)
    };

    f32::from_bits(f32_bits)
}

/// A date-only value is sent on the wire as a date-time at midnight.
pub fn date_to_midnight_datetime(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
}

/// A time-of-day is sent on the wire as a duration since midnight, not a
/// wall-clock timestamp.
pub fn time_to_duration_since_midnight(time: NaiveTime) -> chrono::Duration {
    chrono::Duration::nanoseconds(
        i64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + i64::from(time.nanosecond()),
    )
}
