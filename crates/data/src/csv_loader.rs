use chrono::{DateTime, NaiveDateTime, Utc};
use fxbot_core::{Bar, DataError};
use rust_decimal::Decimal;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Load M1 bars from a CSV file.
///
/// Expected columns (case-insensitive, any order):
/// `time` (or `timestamp`, `date`, `datetime`), `open`, `high`, `low`,
/// `close`, and optionally `volume` / `tick_volume`.
///
/// Bars are tagged with `symbol`, or with the file stem when `None`.
pub fn load_bars_from_csv(path: &Path, symbol: Option<&str>) -> Result<Vec<Bar>, DataError> {
    if !path.exists() {
        return Err(DataError::NotFound(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }

    let symbol = match symbol {
        Some(s) => s.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    };

    let file = std::fs::File::open(path)?;
    let bars = load_bars_from_reader(file, &symbol)?;
    debug!(path = %path.display(), count = bars.len(), "Loaded bars");
    Ok(bars)
}

/// Parse bars from any CSV source with a header row.
pub fn load_bars_from_reader<R: io::Read>(source: R, symbol: &str) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_bar_columns(&headers)?;

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        let field = |idx: usize, name: &str| {
            record
                .get(idx)
                .ok_or_else(|| DataError::ParseError(format!("Missing {} field", name)))
        };

        let timestamp = parse_timestamp(field(col_map.timestamp, "time")?)?;
        let open = parse_decimal(field(col_map.open, "open")?, "open")?;
        let high = parse_decimal(field(col_map.high, "high")?, "high")?;
        let low = parse_decimal(field(col_map.low, "low")?, "low")?;
        let close = parse_decimal(field(col_map.close, "close")?, "close")?;
        let volume = match col_map.volume {
            Some(idx) => parse_decimal(field(idx, "volume")?, "volume")?,
            None => Decimal::ZERO,
        };

        bars.push(Bar {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

struct BarColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

fn resolve_bar_columns(headers: &csv::StringRecord) -> Result<BarColumnMap, DataError> {
    let required = |names: &[&str], label: &str| {
        find_column(headers, names)
            .ok_or_else(|| DataError::ParseError(format!("No {} column found", label)))
    };

    Ok(BarColumnMap {
        timestamp: required(&["time", "timestamp", "date", "datetime"], "timestamp")?,
        open: required(&["open"], "open")?,
        high: required(&["high"], "high")?,
        low: required(&["low"], "low")?,
        close: required(&["close"], "close")?,
        volume: find_column(headers, &["volume", "tick_volume"]),
    })
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let h = header.trim().to_lowercase();
        names.iter().any(|name| h == *name)
    })
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(s.trim())
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Naive formats are taken as UTC. The dotted ones are MT5 history exports.
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
    ];
    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(DataError::ParseError(format!(
        "Unable to parse timestamp: '{}'",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mt5_export_sorted() {
        let data = "\
Time,Open,High,Low,Close,Tick_Volume
2024.01.15 09:01,1.3502,1.3510,1.3499,1.3508,42
2024.01.15 09:00,1.3500,1.3505,1.3495,1.3502,37
";
        let bars = load_bars_from_reader(data.as_bytes(), "USDCAD").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
        );
        assert_eq!(bars[0].close, dec!(1.3502));
        assert_eq!(bars[1].high, dec!(1.3510));
        assert_eq!(bars[1].volume, dec!(42));
        assert_eq!(bars[1].symbol, "USDCAD");
    }

    #[test]
    fn test_unix_and_rfc3339_timestamps() {
        let data = "\
timestamp,close,low,high,open
1705309200,1.35,1.34,1.36,1.35
2024-01-15T09:01:00+00:00,1.36,1.35,1.37,1.35
";
        let bars = load_bars_from_reader(data.as_bytes(), "USDCAD").unwrap();
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
        );
        assert_eq!(
            bars[1].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 1, 0).unwrap()
        );
        assert_eq!(bars[1].low, dec!(1.35));
        assert_eq!(bars[0].volume, Decimal::ZERO);
    }

    #[test]
    fn test_missing_column() {
        let data = "time,open,high,low\n2024-01-15 09:00:00,1,1,1\n";
        let err = load_bars_from_reader(data.as_bytes(), "USDCAD").unwrap_err();
        assert!(matches!(err, DataError::ParseError(msg) if msg.contains("close")));
    }

    #[test]
    fn test_bad_price() {
        let data = "time,open,high,low,close\n2024-01-15 09:00:00,1,1,1,abc\n";
        assert!(matches!(
            load_bars_from_reader(data.as_bytes(), "USDCAD"),
            Err(DataError::ParseError(_))
        ));
    }

    #[test]
    fn test_file_symbol_from_stem() {
        let path = std::env::temp_dir().join(format!("EURUSD_{}.csv", std::process::id()));
        std::fs::write(
            &path,
            "date,open,high,low,close\n2024-01-15 09:00:00,1.1,1.2,1.0,1.15\n",
        )
        .unwrap();

        let bars = load_bars_from_csv(&path, None).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(bars.len(), 1);
        assert!(bars[0].symbol.starts_with("EURUSD_"));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("fxbot-does-not-exist.csv");
        assert!(matches!(
            load_bars_from_csv(&path, Some("USDCAD")),
            Err(DataError::NotFound(_))
        ));
    }
}
