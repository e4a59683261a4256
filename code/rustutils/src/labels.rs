/// Human-readable labels for spans of time.
///
/// `format_duration` buckets a span into a small fixed set of labels and is used to build grouping
/// keys, so its output must be stable.  `format_trunc_seconds` is for display and rounds to the
/// nearest unit.

const MINUTE: i64 = 60;
const HOUR: i64 = 3600;
const DAY: i64 = 86400;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

const DURATION_BUCKETS: [(i64, &str); 11] = [
    (10 * MINUTE, "10m"),
    (HOUR, "1h"),
    (6 * HOUR, "6h"),
    (12 * HOUR, "12h"),
    (DAY, "1d"),
    (2 * DAY, "2d"),
    (7 * DAY, "7d"),
    (MONTH, "1M"),
    (3 * MONTH, "3M"),
    (6 * MONTH, "6M"),
    (YEAR, "1Y"),
];

/// Bucket `sec` into the first label whose threshold is not less than it; beyond a year round to
/// the nearest year.  With `offset` set, spans under a day have no label.

pub fn format_duration(sec: i64, offset: bool) -> String {
    if sec == 0 || (offset && sec < DAY) {
        return "".to_string();
    }
    for (limit, label) in DURATION_BUCKETS {
        if sec <= limit {
            return label.to_string();
        }
    }
    let mut years = sec / YEAR;
    if sec % YEAR > YEAR / 2 {
        years += 1;
    }
    format!("{years}Y")
}

fn round_to(sec: i64, unit: i64) -> i64 {
    let mut n = sec / unit;
    if sec % unit > unit / 2 {
        n += 1;
    }
    n
}

/// Format seconds to the nearest whole unit, rounding halves down: `15` is `10s`, `16` is `20s`,
/// `91` is `2m`.

pub fn format_trunc_seconds(sec: i64) -> String {
    if sec < 0 {
        return match sec.checked_neg() {
            Some(n) => format!("-{}", format_trunc_seconds(n)),
            None => "".to_string(),
        };
    }
    if sec == 0 {
        "".to_string()
    } else if sec < 10 {
        format!("{sec}s")
    } else if sec < 55 {
        format!("{}s", round_to(sec, 10) * 10)
    } else if sec <= 30 * MINUTE {
        format!("{}m", round_to(sec, MINUTE))
    } else if sec <= 23 * HOUR + 30 * MINUTE {
        format!("{}h", round_to(sec, HOUR))
    } else if sec <= 29 * DAY + 12 * HOUR {
        format!("{}d", round_to(sec, DAY))
    } else if sec <= YEAR - MONTH {
        format!("{}M", round_to(sec, MONTH))
    } else {
        format!("{}Y", round_to(sec, YEAR))
    }
}

#[test]
fn test_format_duration() {
    let cases: &[(i64, bool, &str)] = &[
        (0, false, ""),
        (1, false, "10m"),
        (600, false, "10m"),
        (601, false, "1h"),
        (3600, false, "1h"),
        (3601, false, "6h"),
        (21600, false, "6h"),
        (21601, false, "12h"),
        (43200, false, "12h"),
        (43201, false, "1d"),
        (86399, true, ""),
        (86400, false, "1d"),
        (86400, true, "1d"),
        (86401, false, "2d"),
        (172800, false, "2d"),
        (172801, false, "7d"),
        (604800, false, "7d"),
        (604801, false, "1M"),
        (2592000, false, "1M"),
        (2592001, false, "3M"),
        (7776000, false, "3M"),
        (7776001, false, "6M"),
        (15552000, false, "6M"),
        (15552001, false, "1Y"),
        (31536000, false, "1Y"),
        (2 * 31536000 - 15768000, false, "1Y"),
        (2 * 31536000 - 15768000 + 1, false, "2Y"),
        (2 * 31536000, false, "2Y"),
    ];
    for &(sec, offset, want) in cases {
        assert!(format_duration(sec, offset) == want);
    }
}

#[test]
fn test_format_trunc_seconds() {
    let cases: &[(i64, &str)] = &[
        (0, ""),
        (1, "1s"),
        (10, "10s"),
        (15, "10s"),
        (16, "20s"),
        (50, "50s"),
        (54, "50s"),
        (55, "1m"),
        (60, "1m"),
        (90, "1m"),
        (91, "2m"),
        (120, "2m"),
        (150, "2m"),
        (151, "3m"),
        (180, "3m"),
        (1800, "30m"),
        (1801, "1h"),
        (3600, "1h"),
        (5400, "1h"),
        (5401, "2h"),
        (7200, "2h"),
        (10800, "3h"),
        (79200, "22h"),
        (81000, "22h"),
        (81001, "23h"),
        (82800, "23h"),
        (84600, "23h"),
        (84601, "1d"),
        (86400, "1d"),
        (129600, "1d"),
        (129601, "2d"),
        (172800, "2d"),
        (253800, "3d"),
        (2548800, "29d"),
        (2548801, "1M"),
        (2592000, "1M"),
        (2 * 2592000, "2M"),
        (28944000, "11M"),
        (28944001, "1Y"),
        (31536000, "1Y"),
        (2 * 31536000 - 15768000, "1Y"),
        (2 * 31536000 - 15768000 + 1, "2Y"),
        (2 * 31536000, "2Y"),
    ];
    for &(sec, want) in cases {
        assert!(format_trunc_seconds(sec) == want);
    }
    assert!(format_trunc_seconds(-90) == "-1m");
    assert!(format_trunc_seconds(29808000) == "1Y");
    assert!(format_trunc_seconds(i64::MIN) == "");
}
