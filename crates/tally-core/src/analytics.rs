//! Spend analytics: trend classification, anomaly detection, forecasting
//!
//! All three passes are pure functions over a record slice. They hold no
//! state and touch no storage, so the engine can run them against a freshly
//! ingested snapshot and throw the intermediate signals away.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::models::{
    AnomalyEvent, CostRecord, CostSummary, ForecastPoint, RegionSpend, ServiceForecast,
    ServiceSpend, Severity, TrendDirection, TrendSignal,
};

/// Observations a service needs before it can be projected
const MIN_FORECAST_POINTS: usize = 3;

/// Classify window-over-window spend movement per service.
///
/// Windows are fixed-length, anchored at each service's earliest
/// `period_start`. Records bucket into a window by their `period_start`;
/// a window is complete once the service's data coverage reaches its last
/// day. Services with fewer than two complete windows are skipped, and
/// partial trailing windows are never compared.
pub fn trend(records: &[CostRecord], config: &AnalyticsConfig) -> Vec<TrendSignal> {
    let window_days = config.window_size_days;
    if window_days <= 0 {
        return Vec::new();
    }

    let mut signals = Vec::new();

    for (service, (points, latest_end)) in group_with_coverage(records) {
        let anchor = match points.keys().next() {
            Some(date) => *date,
            None => continue,
        };

        let covered_days = (latest_end - anchor).num_days() + 1;
        let complete_windows = covered_days / window_days;
        if complete_windows < 2 {
            continue;
        }

        let last = complete_windows - 1;
        let (mut previous_total, mut current_total) = (Decimal::ZERO, Decimal::ZERO);
        for (date, amount) in &points {
            let idx = (*date - anchor).num_days() / window_days;
            if idx == last - 1 {
                previous_total += *amount;
            } else if idx == last {
                current_total += *amount;
            }
        }

        let delta_amount = current_total - previous_total;
        let delta_pct = if previous_total.is_zero() {
            if current_total.is_zero() {
                0.0
            } else {
                100.0
            }
        } else {
            (delta_amount / previous_total).to_f64().unwrap_or(0.0) * 100.0
        };

        let direction = if delta_pct.abs() <= config.stable_band_pct {
            TrendDirection::Stable
        } else if delta_pct > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let window_start = anchor + Duration::days(last * window_days);
        signals.push(TrendSignal {
            service,
            window_start,
            window_end: window_start + Duration::days(window_days - 1),
            delta_amount,
            delta_pct,
            direction,
        });
    }

    debug!(signals = signals.len(), "Computed trend signals");
    signals
}

/// Flag observations that deviate from a service's historic baseline.
///
/// Each service's per-period totals form a chronological series. An
/// observation is scored against the mean and standard deviation of all
/// observations before it, once at least `min_history` of them exist.
/// Services still building history produce no events.
pub fn detect_anomalies(records: &[CostRecord], config: &AnalyticsConfig) -> Vec<AnomalyEvent> {
    let mut events = Vec::new();

    for (service, series) in series_with_spans(records) {
        for (i, (date, observed, period_days)) in series.iter().enumerate() {
            if i < config.min_history {
                continue;
            }

            let history: Vec<f64> = series[..i]
                .iter()
                .map(|(_, amount, _)| amount.to_f64().unwrap_or(0.0))
                .collect();
            let baseline_mean = mean(&history);
            let baseline_std = std_dev(&history, baseline_mean);
            let observed_f = observed.to_f64().unwrap_or(0.0);

            let score = if baseline_std < f64::EPSILON {
                // Flat baseline: any departure is maximally surprising
                if (observed_f - baseline_mean).abs() < f64::EPSILON {
                    continue;
                }
                config.flat_baseline_score * (observed_f - baseline_mean).signum()
            } else {
                (observed_f - baseline_mean) / baseline_std
            };

            if score.abs() <= config.anomaly_threshold {
                continue;
            }

            events.push(AnomalyEvent {
                service: service.clone(),
                observed_at: *date,
                observed_amount: *observed,
                expected_amount: Decimal::from_f64(baseline_mean)
                    .unwrap_or_default()
                    .round_dp(2),
                period_days: *period_days,
                deviation_score: score,
                severity: severity_for(score.abs(), config),
            });
        }
    }

    debug!(events = events.len(), "Detected anomalies");
    events
}

fn severity_for(score: f64, config: &AnalyticsConfig) -> Severity {
    if score >= config.severity_high {
        Severity::High
    } else if score >= config.severity_medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Project every service with enough history over the configured horizon.
///
/// Services with too few observations are skipped rather than failing the
/// whole pass.
pub fn forecast(records: &[CostRecord], config: &AnalyticsConfig) -> Vec<ServiceForecast> {
    let mut forecasts = Vec::new();

    for (service, series) in service_series(records) {
        match forecast_service(&service, &series, config.forecast_horizon) {
            Ok(projection) => forecasts.push(projection),
            Err(e) => debug!(service = %service, error = %e, "Skipping forecast"),
        }
    }

    forecasts
}

/// Fit a least-squares line through one service's series and project it
/// forward `horizon` periods, clamping projected spend at zero.
pub fn forecast_service(
    service: &str,
    series: &[(NaiveDate, Decimal)],
    horizon: usize,
) -> Result<ServiceForecast> {
    if series.len() < MIN_FORECAST_POINTS {
        return Err(Error::InsufficientData {
            service: service.to_string(),
            points: series.len(),
            required: MIN_FORECAST_POINTS,
        });
    }

    let first = series[0].0;
    let xs: Vec<f64> = series
        .iter()
        .map(|(date, _)| (*date - first).num_days() as f64)
        .collect();
    let ys: Vec<f64> = series
        .iter()
        .map(|(_, amount)| amount.to_f64().unwrap_or(0.0))
        .collect();

    let (slope, intercept) = linear_fit(&xs, &ys);
    let step = typical_spacing(series);
    let last_x = (series[series.len() - 1].0 - first).num_days();

    let mut points = Vec::with_capacity(horizon);
    let mut projected_total = Decimal::ZERO;
    for i in 1..=horizon {
        let x = last_x + step * i as i64;
        let projected = (intercept + slope * x as f64).max(0.0);
        let amount = Decimal::from_f64(projected).unwrap_or_default().round_dp(2);
        projected_total += amount;
        points.push(ForecastPoint {
            date: first + Duration::days(x),
            amount,
        });
    }

    Ok(ServiceForecast {
        service: service.to_string(),
        points,
        projected_total,
    })
}

/// Account-wide rollup over the canonical record set.
///
/// `top_n` bounds the per-service breakdown. Regions come from the `region`
/// dimension where present; records without one simply do not contribute to
/// the region table.
pub fn summarize(
    records: &[CostRecord],
    total_insights: usize,
    total_potential_savings: Decimal,
    currency: &str,
    top_n: usize,
) -> CostSummary {
    let mut service_totals: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut region_totals: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut total_spend = Decimal::ZERO;
    let mut first_start: Option<NaiveDate> = None;
    let mut last_end: Option<NaiveDate> = None;

    for record in records {
        total_spend += record.amount;
        *service_totals
            .entry(record.service.as_str())
            .or_insert(Decimal::ZERO) += record.amount;
        if let Some(region) = record.region() {
            *region_totals.entry(region).or_insert(Decimal::ZERO) += record.amount;
        }
        first_start = Some(first_start.map_or(record.period_start, |d| d.min(record.period_start)));
        last_end = Some(last_end.map_or(record.period_end, |d| d.max(record.period_end)));
    }

    let service_count = service_totals.len();

    let mut top_services: Vec<ServiceSpend> = service_totals
        .into_iter()
        .map(|(service, total)| ServiceSpend {
            service: service.to_string(),
            total,
            share_pct: if total_spend.is_zero() {
                0.0
            } else {
                (total / total_spend).to_f64().unwrap_or(0.0) * 100.0
            },
        })
        .collect();
    top_services.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.service.cmp(&b.service)));
    top_services.truncate(top_n);

    let mut regions: Vec<RegionSpend> = region_totals
        .into_iter()
        .map(|(region, total)| RegionSpend {
            region: region.to_string(),
            total,
        })
        .collect();
    regions.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.region.cmp(&b.region)));

    CostSummary {
        record_count: records.len(),
        total_spend,
        currency: currency.to_string(),
        total_insights,
        total_potential_savings,
        service_count,
        first_period_start: first_start,
        last_period_end: last_end,
        top_services,
        regions,
    }
}

/// Least-squares slope and intercept. A degenerate x spread fits a flat
/// line at the mean.
fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return (0.0, sum_y / n);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

/// Median gap between consecutive observations, in days (at least one)
fn typical_spacing(series: &[(NaiveDate, Decimal)]) -> i64 {
    let mut gaps: Vec<i64> = series
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].0).num_days())
        .collect();
    if gaps.is_empty() {
        return 1;
    }
    gaps.sort_unstable();
    gaps[gaps.len() / 2].max(1)
}

/// Per-service chronological series of per-period totals.
///
/// Records sharing a `period_start` (for example per-region splits of the
/// same service) are summed into a single observation.
fn service_series(records: &[CostRecord]) -> BTreeMap<String, Vec<(NaiveDate, Decimal)>> {
    let mut grouped: BTreeMap<String, BTreeMap<NaiveDate, Decimal>> = BTreeMap::new();
    for record in records {
        *grouped
            .entry(record.service.clone())
            .or_default()
            .entry(record.period_start)
            .or_insert(Decimal::ZERO) += record.amount;
    }

    grouped
        .into_iter()
        .map(|(service, by_date)| (service, by_date.into_iter().collect()))
        .collect()
}

/// Like `service_series`, but each observation also carries the days its
/// billing period covers. Where summed records disagree, the widest span
/// wins.
fn series_with_spans(records: &[CostRecord]) -> BTreeMap<String, Vec<(NaiveDate, Decimal, i64)>> {
    let mut grouped: BTreeMap<String, BTreeMap<NaiveDate, (Decimal, i64)>> = BTreeMap::new();
    for record in records {
        let entry = grouped
            .entry(record.service.clone())
            .or_default()
            .entry(record.period_start)
            .or_insert((Decimal::ZERO, 1));
        entry.0 += record.amount;
        entry.1 = entry.1.max(record.period_days());
    }

    grouped
        .into_iter()
        .map(|(service, by_date)| {
            let series = by_date
                .into_iter()
                .map(|(date, (amount, days))| (date, amount, days))
                .collect();
            (service, series)
        })
        .collect()
}

/// Per-service period totals plus the latest `period_end` seen
fn group_with_coverage(
    records: &[CostRecord],
) -> BTreeMap<String, (BTreeMap<NaiveDate, Decimal>, NaiveDate)> {
    let mut grouped: BTreeMap<String, (BTreeMap<NaiveDate, Decimal>, NaiveDate)> = BTreeMap::new();
    for record in records {
        let entry = grouped
            .entry(record.service.clone())
            .or_insert_with(|| (BTreeMap::new(), record.period_end));
        *entry.0.entry(record.period_start).or_insert(Decimal::ZERO) += record.amount;
        if record.period_end > entry.1 {
            entry.1 = record.period_end;
        }
    }
    grouped
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a precomputed mean
fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn daily_record(service: &str, d: u32, amount: Decimal) -> CostRecord {
        CostRecord {
            service: service.to_string(),
            amount,
            currency: "USD".to_string(),
            period_start: day(d),
            period_end: day(d),
            dimensions: BTreeMap::new(),
            source_ingested_at: Utc::now(),
        }
    }

    fn daily_series(service: &str, amounts: &[Decimal]) -> Vec<CostRecord> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| daily_record(service, i as u32 + 1, *amount))
            .collect()
    }

    #[test]
    fn test_trend_fifty_percent_increase() {
        // $100/day for a week, then $150/day: $700 -> $1050
        let mut amounts = vec![dec!(100); 7];
        amounts.extend(vec![dec!(150); 7]);
        let records = daily_series("AmazonEC2", &amounts);

        let signals = trend(&records, &AnalyticsConfig::default());

        assert_eq!(signals.len(), 1);
        let s = &signals[0];
        assert_eq!(s.service, "AmazonEC2");
        assert_eq!(s.delta_amount, dec!(350));
        assert!((s.delta_pct - 50.0).abs() < 1e-9);
        assert_eq!(s.direction, TrendDirection::Increasing);
        assert_eq!(s.window_start, day(8));
        assert_eq!(s.window_end, day(14));
    }

    #[test]
    fn test_trend_requires_two_complete_windows() {
        // Ten days of data covers one complete 7-day window plus a partial
        let records = daily_series("AmazonS3", &vec![dec!(10); 10]);
        assert!(trend(&records, &AnalyticsConfig::default()).is_empty());
    }

    #[test]
    fn test_trend_partial_trailing_window_ignored() {
        // 16 days: the two complete windows are flat, the partial third
        // window holds the spike and must not influence the comparison
        let mut amounts = vec![dec!(100); 14];
        amounts.extend(vec![dec!(900); 2]);
        let records = daily_series("AmazonEC2", &amounts);

        let signals = trend(&records, &AnalyticsConfig::default());

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, TrendDirection::Stable);
        assert!((signals[0].delta_pct - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_small_change_is_stable() {
        let mut amounts = vec![dec!(100); 7];
        amounts.extend(vec![dec!(101); 7]);
        let records = daily_series("AmazonRDS", &amounts);

        let signals = trend(&records, &AnalyticsConfig::default());

        assert_eq!(signals[0].direction, TrendDirection::Stable);
    }

    #[test]
    fn test_trend_decreasing() {
        let mut amounts = vec![dec!(100); 7];
        amounts.extend(vec![dec!(50); 7]);
        let records = daily_series("AmazonRDS", &amounts);

        let signals = trend(&records, &AnalyticsConfig::default());

        assert_eq!(signals[0].direction, TrendDirection::Decreasing);
        assert!((signals[0].delta_pct - (-50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_anomaly_flat_baseline_spike() {
        // Seven $100 periods then a $500 spike: exactly one high-severity event
        let mut amounts = vec![dec!(100); 7];
        amounts.push(dec!(500));
        let records = daily_series("AmazonEC2", &amounts);

        let events = detect_anomalies(&records, &AnalyticsConfig::default());

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.observed_at, day(8));
        assert_eq!(e.observed_amount, dec!(500));
        assert_eq!(e.expected_amount, dec!(100));
        assert_eq!(e.severity, Severity::High);
        assert!(e.deviation_score > 0.0);
    }

    #[test]
    fn test_anomaly_suppressed_below_min_history() {
        // Spike after only five observations: baseline not yet trusted
        let mut amounts = vec![dec!(100); 5];
        amounts.push(dec!(500));
        let records = daily_series("AmazonEC2", &amounts);

        assert!(detect_anomalies(&records, &AnalyticsConfig::default()).is_empty());
    }

    #[test]
    fn test_anomaly_score_and_low_severity() {
        // Alternating 90/110 gives mean 100, population std 10; an
        // observation of 128 scores 2.8: flagged, but below medium
        let mut amounts = Vec::new();
        for _ in 0..4 {
            amounts.push(dec!(90));
            amounts.push(dec!(110));
        }
        amounts.push(dec!(128));
        let records = daily_series("AmazonS3", &amounts);

        let events = detect_anomalies(&records, &AnalyticsConfig::default());

        assert_eq!(events.len(), 1);
        assert!((events[0].deviation_score - 2.8).abs() < 1e-9);
        assert_eq!(events[0].severity, Severity::Low);
    }

    #[test]
    fn test_anomaly_unchanged_flat_series_is_quiet() {
        let records = daily_series("AmazonS3", &vec![dec!(100); 12]);
        assert!(detect_anomalies(&records, &AnalyticsConfig::default()).is_empty());
    }

    #[test]
    fn test_anomaly_sums_dimension_splits_per_period() {
        // Two $50 regional records per day equal one $100 observation
        let mut records = Vec::new();
        for d in 1..=8u32 {
            for region in ["us-east-1", "us-west-2"] {
                let mut r = daily_record("AmazonEC2", d, dec!(50));
                r.dimensions
                    .insert("region".to_string(), region.to_string());
                if d == 8 {
                    r.amount = dec!(250);
                }
                records.push(r);
            }
        }

        let events = detect_anomalies(&records, &AnalyticsConfig::default());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].observed_amount, dec!(500));
        assert_eq!(events[0].expected_amount, dec!(100));
    }

    #[test]
    fn test_forecast_linear_series() {
        let series = vec![(day(1), dec!(10)), (day(2), dec!(20)), (day(3), dec!(30))];

        let projection = forecast_service("AmazonEC2", &series, 2).unwrap();

        assert_eq!(projection.points.len(), 2);
        assert_eq!(projection.points[0].date, day(4));
        assert_eq!(projection.points[0].amount, dec!(40));
        assert_eq!(projection.points[1].amount, dec!(50));
        assert_eq!(projection.projected_total, dec!(90));
    }

    #[test]
    fn test_forecast_clamps_at_zero() {
        let series = vec![(day(1), dec!(100)), (day(2), dec!(50)), (day(3), dec!(0))];

        let projection = forecast_service("AmazonEC2", &series, 3).unwrap();

        assert!(projection.points.iter().all(|p| p.amount >= Decimal::ZERO));
        assert_eq!(projection.points[2].amount, Decimal::ZERO);
    }

    #[test]
    fn test_forecast_insufficient_data() {
        let series = vec![(day(1), dec!(10)), (day(2), dec!(20))];

        let err = forecast_service("AmazonEC2", &series, 5).unwrap_err();

        match err {
            Error::InsufficientData {
                service,
                points,
                required,
            } => {
                assert_eq!(service, "AmazonEC2");
                assert_eq!(points, 2);
                assert_eq!(required, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_forecast_batch_skips_thin_services() {
        let mut records = daily_series("AmazonEC2", &[dec!(10), dec!(20), dec!(30)]);
        records.push(daily_record("AmazonS3", 1, dec!(5)));

        let forecasts = forecast(&records, &AnalyticsConfig::default());

        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0].service, "AmazonEC2");
    }

    #[test]
    fn test_forecast_weekly_spacing() {
        let series = vec![
            (day(1), dec!(70)),
            (day(8), dec!(140)),
            (day(15), dec!(210)),
        ];

        let projection = forecast_service("AmazonEC2", &series, 1).unwrap();

        assert_eq!(projection.points[0].date, day(22));
        assert_eq!(projection.points[0].amount, dec!(280));
    }

    #[test]
    fn test_summarize_totals_and_shares() {
        let mut records = vec![
            daily_record("AmazonEC2", 1, dec!(60)),
            daily_record("AmazonEC2", 2, dec!(20)),
            daily_record("AmazonS3", 1, dec!(20)),
        ];
        records[0]
            .dimensions
            .insert("region".to_string(), "us-east-1".to_string());
        records[2]
            .dimensions
            .insert("region".to_string(), "eu-west-1".to_string());

        let summary = summarize(&records, 2, dec!(35.50), "USD", 10);

        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.total_spend, dec!(100));
        assert_eq!(summary.service_count, 2);
        assert_eq!(summary.total_insights, 2);
        assert_eq!(summary.total_potential_savings, dec!(35.50));
        assert_eq!(summary.first_period_start, Some(day(1)));
        assert_eq!(summary.last_period_end, Some(day(2)));

        assert_eq!(summary.top_services[0].service, "AmazonEC2");
        assert_eq!(summary.top_services[0].total, dec!(80));
        assert!((summary.top_services[0].share_pct - 80.0).abs() < 1e-9);
        assert_eq!(summary.top_services[1].service, "AmazonS3");

        assert_eq!(summary.regions.len(), 2);
        assert_eq!(summary.regions[0].region, "us-east-1");
        assert_eq!(summary.regions[0].total, dec!(60));
    }

    #[test]
    fn test_summarize_truncates_top_services() {
        let records = vec![
            daily_record("AmazonEC2", 1, dec!(50)),
            daily_record("AmazonS3", 1, dec!(30)),
            daily_record("AmazonRDS", 1, dec!(20)),
        ];

        let summary = summarize(&records, 0, Decimal::ZERO, "USD", 2);

        assert_eq!(summary.top_services.len(), 2);
        // Count still reflects every service, not just the truncated list
        assert_eq!(summary.service_count, 3);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[], 0, Decimal::ZERO, "USD", 5);

        assert_eq!(summary.record_count, 0);
        assert_eq!(summary.total_spend, Decimal::ZERO);
        assert!(summary.first_period_start.is_none());
        assert!(summary.top_services.is_empty());
        assert!(summary.regions.is_empty());
    }
}
