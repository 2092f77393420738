//! Signal health score derived from received power and noise ratio.

/// Weighted quality score from 1.0 to 5.0, rounded to one decimal.
///
/// `0.7 * rsrp_tier + 0.3 * sinr_tier`.
pub fn signal_health(rsrp: i32, sinr: i32) -> f64 {
    let score = 0.7 * f64::from(rsrp_tier(rsrp)) + 0.3 * f64::from(sinr_tier(sinr));
    (score * 10.0).round() / 10.0
}

/// Map received power (dBm) onto 1..=5.
pub fn rsrp_tier(rsrp: i32) -> u8 {
    match rsrp {
        v if v > -90 => 5,
        v if v >= -100 => 4,
        v if v >= -110 => 3,
        v if v >= -120 => 2,
        _ => 1,
    }
}

/// Map signal-to-noise ratio (dB) onto 1..=5.
pub fn sinr_tier(sinr: i32) -> u8 {
    match sinr {
        v if v > 20 => 5,
        v if v >= 10 => 4,
        v if v >= 0 => 3,
        v if v >= -10 => 2,
        _ => 1,
    }
}
