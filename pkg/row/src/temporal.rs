//! Sort-order-preserving encodings for the temporal native types.
//!
//! Every encoding here is chosen so that `a < b` (by the natural ordering
//! of the value) implies `encode(a) < encode(b)` lexicographically on the
//! produced bytes, which is what lets the storage layer use raw byte
//! comparison as its key comparator.

use common::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Nanoseconds within the second, always normalized to [0, 1e9).
    pub nanos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub epoch_seconds: i64,
    pub nanos: u32,
}

/// Width in bytes of the fractional-second trailer for a given `precision`
/// (digits of sub-second resolution kept): none for 0, 2 bytes (millis) up
/// to precision 3, 3 bytes (micros) up to 6, 4 bytes (nanos) up to 9.
pub fn fractional_width(precision: u8) -> usize {
    match precision {
        0 => 0,
        1..=3 => 2,
        4..=6 => 3,
        _ => 4,
    }
}

fn fractional_scale(precision: u8) -> u32 {
    match precision {
        0 => 0,
        1..=3 => 1_000,      // milliseconds
        4..=6 => 1,          // microseconds (already sub-millisecond granularity below)
        _ => 1,              // nanoseconds
    }
}

pub fn date_width() -> usize {
    3
}

pub fn time_width(precision: u8) -> usize {
    3 + fractional_width(precision)
}

pub fn datetime_width(precision: u8) -> usize {
    date_width() + time_width(precision)
}

pub fn timestamp_width(precision: u8) -> usize {
    if precision == 0 {
        8
    } else {
        12
    }
}

pub fn encode_date(date: &Date, out: &mut Vec<u8>) {
    let packed: u32 = ((date.year as u32) << 9) | ((date.month as u32) << 5) | (date.day as u32);
    out.extend_from_slice(&packed.to_be_bytes()[1..4]);
}

pub fn decode_date(input: &[u8]) -> Result<Date> {
    if input.len() < 3 {
        return Err(err_msg("truncated date"));
    }
    let packed = u32::from_be_bytes([0, input[0], input[1], input[2]]);
    Ok(Date {
        year: (packed >> 9) as u16,
        month: ((packed >> 5) & 0xF) as u8,
        day: (packed & 0x1F) as u8,
    })
}

pub fn encode_time(time: &Time, precision: u8, out: &mut Vec<u8>) {
    let packed: u32 =
        ((time.hour as u32) << 12) | ((time.minute as u32) << 6) | (time.second as u32);
    out.extend_from_slice(&packed.to_be_bytes()[1..4]);

    let width = fractional_width(precision);
    if width == 0 {
        return;
    }
    let scale = fractional_scale(precision);
    let frac = time.nanos / scale;
    match width {
        2 => out.extend_from_slice(&(frac as u16).to_be_bytes()),
        3 => out.extend_from_slice(&frac.to_be_bytes()[1..4]),
        _ => out.extend_from_slice(&frac.to_be_bytes()),
    }
}

pub fn decode_time(input: &[u8], precision: u8) -> Result<Time> {
    if input.len() < 3 {
        return Err(err_msg("truncated time"));
    }
    let packed = u32::from_be_bytes([0, input[0], input[1], input[2]]);
    let hour = (packed >> 12) as u8;
    let minute = ((packed >> 6) & 0x3F) as u8;
    let second = (packed & 0x3F) as u8;

    let width = fractional_width(precision);
    let nanos = if width == 0 {
        0
    } else {
        let rest = &input[3..];
        if rest.len() < width {
            return Err(err_msg("truncated time fraction"));
        }
        let scale = fractional_scale(precision);
        let frac = match width {
            2 => u16::from_be_bytes([rest[0], rest[1]]) as u32,
            3 => u32::from_be_bytes([0, rest[0], rest[1], rest[2]]),
            _ => u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]),
        };
        frac * scale
    };

    Ok(Time {
        hour,
        minute,
        second,
        nanos,
    })
}

pub fn encode_datetime(dt: &DateTime, precision: u8, out: &mut Vec<u8>) {
    encode_date(&dt.date, out);
    encode_time(&dt.time, precision, out);
}

pub fn decode_datetime(input: &[u8], precision: u8) -> Result<DateTime> {
    let date = decode_date(&input[0..3])?;
    let time = decode_time(&input[3..], precision)?;
    Ok(DateTime { date, time })
}

/// Flips the sign bit of a two's-complement integer so that unsigned
/// big-endian byte comparison matches signed numeric comparison.
pub fn sign_flip_i64(value: i64) -> u64 {
    (value as u64) ^ (1u64 << 63)
}

pub fn sign_unflip_i64(value: u64) -> i64 {
    (value ^ (1u64 << 63)) as i64
}

pub fn encode_timestamp(ts: &Timestamp, precision: u8, out: &mut Vec<u8>) {
    out.extend_from_slice(&sign_flip_i64(ts.epoch_seconds).to_be_bytes());
    if precision > 0 {
        out.extend_from_slice(&ts.nanos.to_be_bytes());
    }
}

pub fn decode_timestamp(input: &[u8], precision: u8) -> Result<Timestamp> {
    if input.len() < 8 {
        return Err(err_msg("truncated timestamp"));
    }
    let epoch_seconds = sign_unflip_i64(u64::from_be_bytes(input[0..8].try_into().unwrap()));
    let nanos = if precision > 0 {
        if input.len() < 12 {
            return Err(err_msg("truncated timestamp nanos"));
        }
        u32::from_be_bytes(input[8..12].try_into().unwrap())
    } else {
        0
    };
    Ok(Timestamp {
        epoch_seconds,
        nanos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_order_preserving() {
        let dates = [
            Date { year: 2020, month: 1, day: 1 },
            Date { year: 2020, month: 1, day: 2 },
            Date { year: 2020, month: 2, day: 1 },
            Date { year: 2021, month: 1, day: 1 },
        ];
        let mut encoded = vec![];
        for d in &dates {
            let mut out = vec![];
            encode_date(d, &mut out);
            encoded.push(out);
        }
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
        for d in &dates {
            let mut out = vec![];
            encode_date(d, &mut out);
            assert_eq!(decode_date(&out).unwrap(), *d);
        }
    }

    #[test]
    fn time_roundtrip_with_precision() {
        let t = Time {
            hour: 23,
            minute: 59,
            second: 59,
            nanos: 123_000_000,
        };
        let mut out = vec![];
        encode_time(&t, 3, &mut out);
        let decoded = decode_time(&out, 3).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn timestamp_order_preserving_across_negative_and_positive() {
        let values = [-1_000_000i64, -1, 0, 1, 1_000_000];
        let mut encoded = vec![];
        for &v in &values {
            let mut out = vec![];
            encode_timestamp(
                &Timestamp {
                    epoch_seconds: v,
                    nanos: 0,
                },
                0,
                &mut out,
            );
            encoded.push(out);
        }
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn datetime_roundtrip() {
        let dt = DateTime {
            date: Date { year: 1999, month: 12, day: 31 },
            time: Time { hour: 1, minute: 2, second: 3, nanos: 0 },
        };
        let mut out = vec![];
        encode_datetime(&dt, 0, &mut out);
        assert_eq!(decode_datetime(&out, 0).unwrap(), dt);
    }
}
