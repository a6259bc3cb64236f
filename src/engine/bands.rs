use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Band {
    pub max_correct: usize,
    pub level: f64,
}

const fn band(max_correct: usize, level: f64) -> Band {
    Band { max_correct, level }
}

/// Ordered `(max correct inclusive, level)` thresholds. Counts above the last
/// threshold map to `ceiling`.
#[derive(Debug, PartialEq, Serialize)]
pub struct BandTable {
    pub name: &'static str,
    pub items: usize,
    pub bands: &'static [Band],
    pub ceiling: f64,
}

pub static READING_BANDS: BandTable = BandTable {
    name: "reading",
    items: 35,
    bands: &[
        band(3, 1.0),
        band(6, 1.5),
        band(10, 2.0),
        band(13, 2.5),
        band(17, 3.0),
        band(20, 3.5),
        band(24, 4.0),
        band(27, 4.5),
        band(30, 5.0),
        band(33, 5.5),
    ],
    ceiling: 6.0,
};

pub static LISTENING_BANDS: BandTable = BandTable {
    name: "listening",
    items: 32,
    bands: &[
        band(3, 1.0),
        band(5, 1.5),
        band(8, 2.0),
        band(11, 2.5),
        band(15, 3.0),
        band(18, 3.5),
        band(21, 4.0),
        band(24, 4.5),
        band(27, 5.0),
        band(30, 5.5),
    ],
    ceiling: 6.0,
};

impl BandTable {
    pub fn level_for(&self, correct_count: usize) -> f64 {
        self.bands
            .iter()
            .find(|b| b.max_correct >= correct_count)
            .map(|b| b.level)
            .unwrap_or(self.ceiling)
    }

    /// Thresholds strictly increase and levels never decrease, ceiling included.
    pub fn is_monotonic(&self) -> bool {
        let thresholds = self.bands.windows(2).all(|w| w[0].max_correct < w[1].max_correct);
        let levels = self.bands.windows(2).all(|w| w[0].level <= w[1].level);
        let top = self.bands.last().is_none_or(|b| b.level <= self.ceiling);
        thresholds && levels && top
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_are_monotonic() {
        assert!(READING_BANDS.is_monotonic());
        assert!(LISTENING_BANDS.is_monotonic());
    }

    #[test]
    fn test_reading_band_edges() {
        let cases = [
            (0, 1.0),
            (3, 1.0),
            (4, 1.5),
            (6, 1.5),
            (7, 2.0),
            (10, 2.0),
            (11, 2.5),
            (13, 2.5),
            (14, 3.0),
            (17, 3.0),
            (18, 3.5),
            (20, 3.5),
            (21, 4.0),
            (24, 4.0),
            (25, 4.5),
            (27, 4.5),
            (28, 5.0),
            (30, 5.0),
            (31, 5.5),
            (33, 5.5),
            (34, 6.0),
            (35, 6.0),
        ];
        for (correct, level) in cases {
            assert_eq!(READING_BANDS.level_for(correct), level, "correct={correct}");
        }
    }

    #[test]
    fn test_listening_band_edges() {
        let cases = [
            (0, 1.0),
            (3, 1.0),
            (4, 1.5),
            (5, 1.5),
            (6, 2.0),
            (8, 2.0),
            (9, 2.5),
            (11, 2.5),
            (12, 3.0),
            (15, 3.0),
            (16, 3.5),
            (18, 3.5),
            (19, 4.0),
            (21, 4.0),
            (22, 4.5),
            (24, 4.5),
            (25, 5.0),
            (27, 5.0),
            (28, 5.5),
            (30, 5.5),
            (31, 6.0),
            (32, 6.0),
        ];
        for (correct, level) in cases {
            assert_eq!(LISTENING_BANDS.level_for(correct), level, "correct={correct}");
        }
    }

    #[test]
    fn test_counts_past_table_map_to_ceiling() {
        assert_eq!(READING_BANDS.level_for(500), READING_BANDS.ceiling);
    }

    #[test]
    fn test_level_never_decreases() {
        for table in [&READING_BANDS, &LISTENING_BANDS] {
            for correct in 0..table.items {
                assert!(table.level_for(correct) <= table.level_for(correct + 1));
            }
        }
    }

    #[test]
    fn test_non_monotonic_table_detected() {
        static BROKEN: BandTable = BandTable {
            name: "broken",
            items: 10,
            bands: &[band(5, 2.0), band(3, 1.0)],
            ceiling: 3.0,
        };
        assert!(!BROKEN.is_monotonic());
    }
}
