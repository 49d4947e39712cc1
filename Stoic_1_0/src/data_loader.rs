// Stoic_1_0/src/data_loader.rs

//! Reads trade history and baseline metrics from disk.

use anyhow::Context;

/// One CSV row. `timestamp` accepts Unix milliseconds, RFC 3339, or `YYYY-MM-DD HH:MM:SS` (UTC).
#[derive(Debug, serde::Deserialize)]
struct TradeRecord {
    timestamp: String,
    entry_price: f64,
    exit_price: f64,
    quantity: f64,
    pnl: f64,
    side: stoic_core::trade::Side,
}

pub fn load_trades<P: AsRef<std::path::Path>>(
    path: P,
) -> anyhow::Result<Vec<stoic_core::trade::Trade>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open trades file {}", path.display()))?;
    read_trades(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to read trades from {}", path.display()))
}

pub fn read_trades<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<stoic_core::trade::Trade>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut trades = Vec::new();
    for (row, result) in rdr.deserialize().enumerate() {
        let record: TradeRecord =
            result.with_context(|| format!("Malformed trade on row {}", row + 1))?;
        let timestamp = parse_timestamp(&record.timestamp)
            .with_context(|| format!("Bad timestamp '{}' on row {}", record.timestamp, row + 1))?;

        trades.push(stoic_core::trade::Trade::new(
            timestamp,
            record.entry_price,
            record.exit_price,
            record.quantity,
            record.pnl,
            record.side,
        ));
    }

    trades.sort_by_key(|t| t.timestamp);
    anyhow::Ok(trades)
}

fn parse_timestamp(value: &str) -> anyhow::Result<i64> {
    if let Ok(millis) = value.parse::<i64>() {
        return anyhow::Ok(millis);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return anyhow::Ok(dt.timestamp_millis());
    }
    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")?;
    anyhow::Ok(naive.and_utc().timestamp_millis())
}

/// Loads baseline metrics; fields missing from the file default to 0.
pub fn load_baseline<P: AsRef<std::path::Path>>(
    path: P,
) -> anyhow::Result<stoic_core::performance::PerformanceMetrics> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read baseline {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse baseline JSON {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_mixed_timestamp_formats() {
        let data = "\
timestamp,entry_price,exit_price,quantity,pnl,side
2024-01-02 10:00:00,100.0,101.0,1,1.0,long
1704189600000,101.0,100.0,2,-2.0,short
2024-01-01T09:00:00Z,99.0,98.0,1,-1.0,buy
";
        let trades = read_trades(data.as_bytes()).unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].timestamp, 1_704_099_600_000);
        assert_eq!(trades[1].timestamp, 1_704_189_600_000);
        assert_eq!(trades[2].side, stoic_core::trade::Side::Short);
        assert_eq!(trades[1].side, stoic_core::trade::Side::Long);
    }

    #[test]
    fn test_rejects_bad_rows() {
        let data = "timestamp,entry_price,exit_price,quantity,pnl,side\nyesterday,1,1,1,0,long\n";
        assert!(read_trades(data.as_bytes()).is_err());

        let data = "timestamp,entry_price,exit_price,quantity,pnl,side\n0,1,1,1,0,sideways\n";
        assert!(read_trades(data.as_bytes()).is_err());
    }
}
