use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Close prices of several symbols on the dates they all trade.
#[derive(Clone, Debug)]
pub struct AlignedPrices {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// One row per date (ascending), one column per symbol in `symbols` order.
    pub prices: Vec<Vec<f64>>,
}

#[derive(Debug)]
struct PriceSeries {
    symbol: String,
    closes: BTreeMap<NaiveDate, f64>,
}

pub fn symbol_csv_path(data_dir: &Path, exchange: &str, symbol: &str) -> PathBuf {
    data_dir.join(exchange).join(format!("{}.csv", symbol))
}

/// Accepts `2024-01-31` and anything with that prefix (`2024-01-31 00:00:00-05:00`).
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn read_series(path: &Path, symbol: &str) -> Result<PriceSeries> {
    if !path.is_file() {
        bail!("CSV not found: {}", path.display());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let date_idx = headers
        .iter()
        .position(|h| h == "Date")
        .with_context(|| format!("CSV {} has no 'Date' column", path.display()))?;
    let price_idx = headers
        .iter()
        .position(|h| h == "Adj Close")
        .or_else(|| headers.iter().position(|h| h == "Close"));
    let Some(price_idx) = price_idx else {
        bail!("CSV {} must have either 'Adj Close' or 'Close' column", path.display());
    };

    let mut closes = BTreeMap::new();
    let mut skipped = 0usize;
    let mut duplicates = 0usize;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        let Some(date) = record.get(date_idx).and_then(parse_date) else {
            skipped += 1;
            continue;
        };
        // Blank or non-numeric prices stay NaN; the return preprocessor zeroes them.
        let close = record
            .get(price_idx)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        if closes.insert(date, close).is_some() {
            duplicates += 1;
        }
    }

    if skipped > 0 {
        warn!("{}: skipped {} rows with unparseable dates", symbol, skipped);
    }
    if duplicates > 0 {
        warn!("{}: {} duplicate dates, keeping the last row for each", symbol, duplicates);
    }

    Ok(PriceSeries { symbol: symbol.to_string(), closes })
}

/// Loads `<data_dir>/<exchange>/<SYMBOL>.csv` for every symbol and keeps only
/// the dates present in all of them, sorted ascending.
pub fn load_aligned_prices(data_dir: &Path, exchange: &str, symbols: &[String]) -> Result<AlignedPrices> {
    if symbols.is_empty() {
        bail!("No symbols provided");
    }

    let series: Vec<PriceSeries> = symbols
        .par_iter()
        .map(|symbol| read_series(&symbol_csv_path(data_dir, exchange, symbol), symbol))
        .collect::<Result<Vec<_>>>()?;

    let dates: Vec<NaiveDate> = series[0]
        .closes
        .keys()
        .filter(|d| series[1..].iter().all(|s| s.closes.contains_key(*d)))
        .copied()
        .collect();

    let prices: Vec<Vec<f64>> = dates
        .iter()
        .map(|d| series.iter().map(|s| s.closes[d]).collect::<Vec<f64>>())
        .collect();

    info!(
        "Aligned {} symbols on {} common dates ({} .. {})",
        series.len(),
        dates.len(),
        dates.first().map(|d| d.to_string()).unwrap_or_default(),
        dates.last().map(|d| d.to_string()).unwrap_or_default()
    );

    Ok(AlignedPrices {
        dates,
        symbols: series.into_iter().map(|s| s.symbol).collect(),
        prices,
    })
}
