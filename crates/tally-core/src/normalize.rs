//! Record Normalizer: raw billing payloads to canonical cost records
//!
//! Raw entries arrive from the billing source (JSON) or from a billing CSV
//! export. Normalization validates each entry, converts mixed currencies to
//! the reporting currency, and produces records sorted by
//! `(service, period_start)`. A malformed entry is skipped and logged; a
//! missing conversion rate aborts the whole batch, since partially-converted
//! ingestion is worse than none.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use chrono::{NaiveDate, Utc};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::CostRecord;

/// One entry of a raw billing batch, prior to validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUsageEntry {
    #[serde(default)]
    pub service: String,
    pub amount: Decimal,
    /// ISO currency code; absent means already in the reporting currency
    #[serde(default)]
    pub currency: Option<String>,
    /// Entry-level period; absent means the batch period applies
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    /// Region, account, tag key/value pairs
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

/// A raw batch as returned by the billing source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBatch {
    pub entries: Vec<RawUsageEntry>,
}

/// Conversion rates into a single reporting currency
#[derive(Debug, Clone)]
pub struct RateTable {
    reporting_currency: String,
    /// Units of reporting currency per unit of the keyed currency
    rates: HashMap<String, Decimal>,
}

impl RateTable {
    /// Table that only accepts amounts already in the reporting currency
    pub fn identity(reporting_currency: &str) -> Self {
        Self {
            reporting_currency: reporting_currency.to_uppercase(),
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, currency: &str, rate: Decimal) -> Self {
        self.rates.insert(currency.to_uppercase(), rate);
        self
    }

    /// Parse `CUR=rate` pairs (e.g. from CLI flags)
    pub fn parse_pairs(reporting_currency: &str, pairs: &[String]) -> Result<Self> {
        let mut table = Self::identity(reporting_currency);
        for pair in pairs {
            let (currency, rate) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidData(format!("Invalid rate pair: {}", pair)))?;
            let rate: Decimal = rate
                .trim()
                .parse()
                .map_err(|_| Error::InvalidData(format!("Invalid rate value: {}", pair)))?;
            table.rates.insert(currency.trim().to_uppercase(), rate);
        }
        Ok(table)
    }

    pub fn reporting_currency(&self) -> &str {
        &self.reporting_currency
    }

    /// Convert an amount into the reporting currency.
    ///
    /// Fails with `Conversion` when no rate is known for the source currency.
    pub fn convert(&self, amount: Decimal, currency: &str) -> Result<Decimal> {
        let currency = currency.to_uppercase();
        if currency == self.reporting_currency {
            return Ok(amount);
        }
        match self.rates.get(&currency) {
            Some(rate) => Ok(amount * rate),
            None => Err(Error::Conversion(currency)),
        }
    }
}

/// Normalize a raw batch into canonical records for the given period.
///
/// Entries failing validation (empty service, negative amount, inverted
/// period) are skipped and logged; a missing currency rate aborts the batch.
/// Within a batch, a repeated `(service, period, dimension-set)` key keeps
/// the last entry, matching the replace-on-reingest storage semantics.
pub fn normalize(
    entries: &[RawUsageEntry],
    period: (NaiveDate, NaiveDate),
    rates: &RateTable,
) -> Result<Vec<CostRecord>> {
    let ingested_at = Utc::now();
    let mut by_key: BTreeMap<String, CostRecord> = BTreeMap::new();
    let mut skipped = 0usize;

    for entry in entries {
        let period_start = entry.period_start.unwrap_or(period.0);
        let period_end = entry.period_end.unwrap_or(period.1);

        if let Err(e) = validate_entry(entry, period_start, period_end) {
            warn!(
                service = %entry.service,
                period_start = %period_start,
                period_end = %period_end,
                error = %e,
                "Skipping invalid billing entry"
            );
            skipped += 1;
            continue;
        }

        let currency = entry
            .currency
            .as_deref()
            .unwrap_or(rates.reporting_currency());
        let amount = rates.convert(entry.amount, currency)?;

        let record = CostRecord {
            service: entry.service.trim().to_string(),
            amount,
            currency: rates.reporting_currency().to_string(),
            period_start,
            period_end,
            dimensions: entry.dimensions.clone(),
            source_ingested_at: ingested_at,
        };
        by_key.insert(record.record_key(), record);
    }

    let mut records: Vec<CostRecord> = by_key.into_values().collect();
    records.sort_by(|a, b| {
        a.service
            .cmp(&b.service)
            .then(a.period_start.cmp(&b.period_start))
    });

    debug!(
        records = records.len(),
        skipped, "Normalized billing batch"
    );
    Ok(records)
}

/// Per-entry validation: the failure modes that skip a single record
fn validate_entry(
    entry: &RawUsageEntry,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> Result<()> {
    if entry.service.trim().is_empty() {
        return Err(Error::Validation("missing service name".into()));
    }
    if entry.amount < Decimal::ZERO {
        return Err(Error::Validation(format!(
            "negative amount: {}",
            entry.amount
        )));
    }
    if period_start > period_end {
        return Err(Error::Validation(format!(
            "period_start {} after period_end {}",
            period_start, period_end
        )));
    }
    Ok(())
}

/// Parse a billing CSV export into raw entries.
///
/// Expected columns (case-insensitive): `service`, `amount` (or `cost`),
/// and optionally `currency`, `period_start` (or `date`), `period_end`.
/// Any remaining columns become dimensions.
pub fn parse_billing_csv<R: Read>(reader: R) -> Result<Vec<RawUsageEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = map_columns(&headers)?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for result in rdr.records() {
        let record = result?;

        let amount_str = record.get(columns.amount).unwrap_or_default();
        let amount = match parse_amount(amount_str) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(row = ?record, error = %e, "Skipping CSV row with unparseable amount");
                skipped += 1;
                continue;
            }
        };

        let service = record.get(columns.service).unwrap_or_default().to_string();
        let currency = columns
            .currency
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let period_start = match columns.period_start.and_then(|i| record.get(i)) {
            Some(s) if !s.is_empty() => match parse_date(s) {
                Ok(date) => Some(date),
                Err(e) => {
                    warn!(row = ?record, error = %e, "Skipping CSV row with unparseable date");
                    skipped += 1;
                    continue;
                }
            },
            _ => None,
        };
        let period_end = match columns.period_end.and_then(|i| record.get(i)) {
            Some(s) if !s.is_empty() => match parse_date(s) {
                Ok(date) => Some(date),
                Err(e) => {
                    warn!(row = ?record, error = %e, "Skipping CSV row with unparseable date");
                    skipped += 1;
                    continue;
                }
            },
            _ => period_start,
        };

        let mut dimensions = BTreeMap::new();
        for (i, header) in headers.iter().enumerate() {
            if columns.is_reserved(i) {
                continue;
            }
            if let Some(value) = record.get(i) {
                if !value.is_empty() {
                    dimensions.insert(header.to_lowercase(), value.to_string());
                }
            }
        }

        entries.push(RawUsageEntry {
            service,
            amount,
            currency,
            period_start,
            period_end,
            dimensions,
        });
    }

    debug!(entries = entries.len(), skipped, "Parsed billing CSV");
    Ok(entries)
}

/// Resolved column positions for a billing CSV header
struct ColumnMap {
    service: usize,
    amount: usize,
    currency: Option<usize>,
    period_start: Option<usize>,
    period_end: Option<usize>,
}

impl ColumnMap {
    /// Whether a column is consumed by a canonical field (vs. a dimension)
    fn is_reserved(&self, i: usize) -> bool {
        i == self.service
            || i == self.amount
            || self.currency == Some(i)
            || self.period_start == Some(i)
            || self.period_end == Some(i)
    }
}

fn map_columns(headers: &csv::StringRecord) -> Result<ColumnMap> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&h.to_lowercase().as_str()))
    };

    let service = find(&["service", "service_name"])
        .ok_or_else(|| Error::Validation("CSV is missing a service column".into()))?;
    let amount = find(&["amount", "cost", "unblended_cost"])
        .ok_or_else(|| Error::Validation("CSV is missing an amount column".into()))?;

    Ok(ColumnMap {
        service,
        amount,
        currency: find(&["currency", "currency_code"]),
        period_start: find(&["period_start", "start", "date", "usage_date"]),
        period_end: find(&["period_end", "end"]),
    })
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%m-%d-%Y", // 01-15-2024
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::Validation(format!("Unable to parse date: {}", s)))
}

/// Parse an amount string, handling currency symbols and commas
fn parse_amount(s: &str) -> Result<Decimal> {
    let cleaned: String = s
        .trim()
        .replace(['$', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    cleaned
        .parse::<Decimal>()
        .map_err(|_| Error::Validation(format!("Unable to parse amount: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn entry(service: &str, amount: Decimal) -> RawUsageEntry {
        RawUsageEntry {
            service: service.to_string(),
            amount,
            currency: None,
            period_start: None,
            period_end: None,
            dimensions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_normalize_sorts_by_service_and_period() {
        let mut late = entry("AmazonS3", dec!(5));
        late.period_start = Some(day(8));
        late.period_end = Some(day(14));
        let entries = vec![
            entry("AmazonS3", dec!(3)),
            late,
            entry("AmazonEC2", dec!(10)),
        ];

        let records = normalize(&entries, (day(1), day(7)), &RateTable::identity("USD")).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].service, "AmazonEC2");
        assert_eq!(records[1].service, "AmazonS3");
        assert_eq!(records[1].period_start, day(1));
        assert_eq!(records[2].period_start, day(8));
    }

    #[test]
    fn test_normalize_skips_invalid_entries() {
        let entries = vec![
            entry("", dec!(10)),
            entry("AmazonEC2", dec!(-5)),
            entry("AmazonEC2", dec!(42)),
        ];

        let records = normalize(&entries, (day(1), day(7)), &RateTable::identity("USD")).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service, "AmazonEC2");
        assert_eq!(records[0].amount, dec!(42));
    }

    #[test]
    fn test_normalize_converts_currencies() {
        let mut eur = entry("AmazonEC2", dec!(100));
        eur.currency = Some("EUR".to_string());
        let rates = RateTable::identity("USD").with_rate("EUR", dec!(1.10));

        let records = normalize(&[eur], (day(1), day(7)), &rates).unwrap();

        assert_eq!(records[0].amount, dec!(110.00));
        assert_eq!(records[0].currency, "USD");
    }

    #[test]
    fn test_normalize_missing_rate_aborts_batch() {
        let good = entry("AmazonS3", dec!(5));
        let mut gbp = entry("AmazonEC2", dec!(100));
        gbp.currency = Some("GBP".to_string());

        let result = normalize(&[good, gbp], (day(1), day(7)), &RateTable::identity("USD"));

        assert!(matches!(result, Err(Error::Conversion(c)) if c == "GBP"));
    }

    #[test]
    fn test_normalize_repeated_key_keeps_last() {
        let entries = vec![entry("AmazonEC2", dec!(10)), entry("AmazonEC2", dec!(20))];

        let records = normalize(&entries, (day(1), day(7)), &RateTable::identity("USD")).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, dec!(20));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut tagged = entry("AmazonEC2", dec!(10));
        tagged
            .dimensions
            .insert("region".to_string(), "us-east-1".to_string());
        let entries = vec![tagged, entry("AmazonS3", dec!(3))];
        let rates = RateTable::identity("USD");

        let first = normalize(&entries, (day(1), day(7)), &rates).unwrap();
        let second = normalize(&entries, (day(1), day(7)), &rates).unwrap();

        let first_keys: Vec<_> = first.iter().map(|r| r.record_key()).collect();
        let second_keys: Vec<_> = second.iter().map(|r| r.record_key()).collect();
        assert_eq!(first_keys, second_keys);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.amount, b.amount);
            assert_eq!(a.dimensions, b.dimensions);
        }
    }

    #[test]
    fn test_rate_table_parse_pairs() {
        let table = RateTable::parse_pairs("USD", &["EUR=1.08".to_string()]).unwrap();
        assert_eq!(table.convert(dec!(100), "eur").unwrap(), dec!(108.00));
        assert!(RateTable::parse_pairs("USD", &["bogus".to_string()]).is_err());
    }

    #[test]
    fn test_parse_billing_csv() {
        let csv = "\
service,amount,currency,period_start,period_end,region,account
AmazonEC2,\"$1,234.56\",USD,2024-01-01,2024-01-07,us-east-1,123456789
AmazonS3,42.00,,2024-01-01,2024-01-07,us-west-2,123456789";

        let entries = parse_billing_csv(csv.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "AmazonEC2");
        assert_eq!(entries[0].amount, dec!(1234.56));
        assert_eq!(entries[0].currency.as_deref(), Some("USD"));
        assert_eq!(entries[0].period_start, Some(day(1)));
        assert_eq!(
            entries[0].dimensions.get("region").map(String::as_str),
            Some("us-east-1")
        );
        assert_eq!(entries[1].currency, None);
    }

    #[test]
    fn test_parse_billing_csv_skips_bad_amounts() {
        let csv = "\
service,cost,date
AmazonEC2,not-a-number,2024-01-01
AmazonS3,10.00,2024-01-01";

        let entries = parse_billing_csv(csv.as_bytes()).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service, "AmazonS3");
    }

    #[test]
    fn test_parse_billing_csv_requires_service_column() {
        let csv = "name,amount\nAmazonEC2,10.00";
        assert!(matches!(
            parse_billing_csv(csv.as_bytes()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), dec!(1234.56));
        assert_eq!(parse_amount("(100.00)").unwrap(), dec!(-100.00));
        assert_eq!(parse_amount("0.0000000017").unwrap(), dec!(0.0000000017));
    }
}
