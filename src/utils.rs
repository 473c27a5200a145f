//! grab bag of functions used across the board.
use num::{Float, FromPrimitive};
use std::time::{SystemTime, UNIX_EPOCH};

/// microseconds since the epoch.  Used by the timers that pace refresh
/// ticks, RTCP reports and session pruning.
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros()
}

/// nanoseconds since the epoch.  Capture timestamps ride in this clock.
pub fn get_nano_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

/// Get frame power in dB of a slice of samples
///
/// results are clipped at -60dB which is essentially silence
pub fn get_frame_power_in_db(frame: &[f32]) -> f64 {
    // linear calculation.  sum of the squares / number of values
    if frame.len() == 0 {
        return to_db(0.0);
    }
    let mut pow: f64 = 0.0;
    for v in frame {
        pow = pow + f64::powi(*v as f64, 2);
    }
    to_db(pow / (frame.len() as f64))
}

// Convert a linear to db
pub fn to_db(v: f64) -> f64 {
    return (10.0 * f64::log10(v)).clamp(-60.0, 100.0);
}

// convert db to linear
pub fn to_lin(v: f64) -> f64 {
    f64::powf(10.0, v / 10.0)
}

/// calculate a smoothing filter coefficient given a time constant and sample rate
pub fn get_coef<T: Float + FromPrimitive>(val: T, rate: T) -> T {
    let one = T::from_f64(1.0).unwrap();
    let neg_one = T::from_f64(-1.0).unwrap();
    let tau = T::from_f64(2.0 * std::f64::consts::PI).unwrap();
    T::from_i32(27).unwrap() * (one - T::exp(neg_one / (tau * val * rate)))
}

/// clamp a float to the legal 0.0 - 1.0 gain range
pub fn clip_float(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod test_utils {
    use super::*;

    #[test]
    fn get_coefficient() {
        let c: f32 = get_coef(0.1, 2666.0);
        println!("Coef: {}", c);
        let c: f64 = get_coef(0.1, 2666.0);
        println!("Coef: {}", c);
    }
    #[test]
    fn micro_and_nano() {
        // the two clocks should agree to within a second
        let us = get_micro_time();
        let ns = get_nano_time();
        assert!((ns / 1000) as i128 - (us as i128) < 1_000_000);
    }
    #[test]
    fn get_frame_power() {
        let frame = [0.0; 128];
        assert_eq!(get_frame_power_in_db(&frame), -60.0);
        let frame = [0.5; 128];
        assert_eq!(get_frame_power_in_db(&frame).round(), -6.0);
    }
    #[test]
    fn lin_to_db_and_back() {
        assert_eq!(to_db(1.0), 0.0);
        assert_eq!(to_lin(-10.0), 0.1);
    }
    #[test]
    fn clipping() {
        assert_eq!(clip_float(1.5), 1.0);
        assert_eq!(clip_float(-0.5), 0.0);
        assert_eq!(clip_float(0.25), 0.25);
    }
}
