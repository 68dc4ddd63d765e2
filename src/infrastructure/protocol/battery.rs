//! Battery percentage from pack voltage.
//!
//! The reference curves were tuned on 16S (67.2 V) packs; other packs use the
//! same curve scaled by cell count.

use super::bytes::round_half_up;

/// Series cell count of common wheel packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackSeries {
    S16,
    S20,
    S24,
    S30,
    S36,
    S40,
    S42,
}

impl PackSeries {
    pub fn cells(&self) -> u32 {
        match self {
            Self::S16 => 16,
            Self::S20 => 20,
            Self::S24 => 24,
            Self::S30 => 30,
            Self::S36 => 36,
            Self::S40 => 40,
            Self::S42 => 42,
        }
    }
}

/// Percentage for a pack voltage in 1/100 V.
pub fn battery_percent(voltage: i32, series: PackSeries, better_percents: bool) -> i32 {
    // per-cell voltage in 1/100 V, expressed on the 16S scale
    let v = voltage as f64 * 16.0 / series.cells() as f64;

    let percent = if better_percents {
        if v > 6680.0 {
            100.0
        } else if v > 5440.0 {
            (v - 5380.0) / 13.0
        } else if v > 5290.0 {
            (v - 5290.0) / 32.5
        } else {
            0.0
        }
    } else if v <= 5290.0 {
        0.0
    } else if v >= 6580.0 {
        100.0
    } else {
        (v - 5290.0) / 13.0
    };

    (round_half_up(percent) as i32).clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_curve() {
        assert_eq!(battery_percent(6720, PackSeries::S16, false), 100);
        assert_eq!(battery_percent(5290, PackSeries::S16, false), 0);
        assert_eq!(battery_percent(5940, PackSeries::S16, false), 50);
        // 84V pack at the same per-cell voltage
        assert_eq!(battery_percent(7425, PackSeries::S20, false), 50);
    }

    #[test]
    fn test_better_curve() {
        assert_eq!(battery_percent(6700, PackSeries::S16, true), 100);
        assert_eq!(battery_percent(5380 + 13 * 40, PackSeries::S16, true), 40);
        assert_eq!(battery_percent(5000, PackSeries::S16, true), 0);
    }
}
