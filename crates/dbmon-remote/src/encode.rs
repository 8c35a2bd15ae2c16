//! Gathered metric families flattened into remote-write series
//!
//! One output series per metric: scalar types carry a single sample,
//! histograms carry one sample per cumulative bucket plus the sum, and
//! summaries one per quantile plus the sum. Bucket boundaries and quantile
//! points ride along as labels so a consumer can reconstruct the
//! distribution from the sample order.

use chrono::Utc;
use dbmon_common::types::EnrichmentLabels;
use prometheus::proto::{Metric, MetricFamily, MetricType};

use crate::prompb::{Label, Sample, TimeSeries};

/// Label carrying histogram bucket upper bounds, `;`-joined in sample order.
pub const BUCKET_BOUNDS_LABEL: &str = "bucket_bounds";

/// Label carrying summary quantile points, `;`-joined in sample order.
pub const QUANTILES_LABEL: &str = "quantiles";

/// Encoded batch ready for serialization
#[derive(Debug, Default)]
pub struct RemoteWriteBatch {
    pub timeseries: Vec<TimeSeries>,
    /// Metrics dropped because their payload did not match the family type
    pub skipped: usize,
}

impl RemoteWriteBatch {
    pub fn is_empty(&self) -> bool {
        self.timeseries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timeseries.len()
    }
}

/// Flatten gathered families into a batch.
///
/// Every series carries `__name__`, the metric's own labels, and the full
/// enrichment set, sorted by label name. On a name clash the metric's own
/// label wins over enrichment. A metric whose payload does not match its
/// family type is skipped and counted, never failing the batch. Zero
/// families yield an empty batch.
pub fn encode(families: &[MetricFamily], enrichment: &EnrichmentLabels) -> RemoteWriteBatch {
    let now_ms = Utc::now().timestamp_millis();
    let mut batch = RemoteWriteBatch::default();

    for family in families {
        for metric in family.get_metric() {
            match encode_metric(family, metric, enrichment, now_ms) {
                Some(series) => batch.timeseries.push(series),
                None => {
                    tracing::debug!(
                        "Skipping metric in family {} with mismatched payload",
                        family.get_name()
                    );
                    batch.skipped += 1;
                }
            }
        }
    }
    batch
}

fn encode_metric(
    family: &MetricFamily,
    metric: &Metric,
    enrichment: &EnrichmentLabels,
    now_ms: i64,
) -> Option<TimeSeries> {
    let timestamp = sample_timestamp(metric, now_ms);
    let mut extra_labels: Vec<(String, String)> = Vec::new();

    let samples = match family.get_field_type() {
        MetricType::COUNTER => {
            if !metric.has_counter() {
                return None;
            }
            vec![Sample {
                value: metric.get_counter().get_value(),
                timestamp,
            }]
        }
        MetricType::GAUGE => {
            if !metric.has_gauge() {
                return None;
            }
            vec![Sample {
                value: metric.get_gauge().get_value(),
                timestamp,
            }]
        }
        MetricType::UNTYPED => {
            if !metric.has_untyped() {
                return None;
            }
            vec![Sample {
                value: metric.get_untyped().get_value(),
                timestamp,
            }]
        }
        MetricType::HISTOGRAM => {
            if !metric.has_histogram() {
                return None;
            }
            let histogram = metric.get_histogram();
            let mut samples: Vec<Sample> = histogram
                .get_bucket()
                .iter()
                .map(|bucket| Sample {
                    value: bucket.get_cumulative_count() as f64,
                    timestamp,
                })
                .collect();
            samples.push(Sample {
                value: histogram.get_sample_sum(),
                timestamp,
            });
            let bounds: Vec<String> = histogram
                .get_bucket()
                .iter()
                .map(|bucket| format_point(bucket.get_upper_bound()))
                .collect();
            extra_labels.push((BUCKET_BOUNDS_LABEL.to_string(), bounds.join(";")));
            samples
        }
        MetricType::SUMMARY => {
            if !metric.has_summary() {
                return None;
            }
            let summary = metric.get_summary();
            let mut samples: Vec<Sample> = summary
                .get_quantile()
                .iter()
                .map(|quantile| Sample {
                    value: quantile.get_value(),
                    timestamp,
                })
                .collect();
            samples.push(Sample {
                value: summary.get_sample_sum(),
                timestamp,
            });
            let points: Vec<String> = summary
                .get_quantile()
                .iter()
                .map(|quantile| format_point(quantile.get_quantile()))
                .collect();
            extra_labels.push((QUANTILES_LABEL.to_string(), points.join(";")));
            samples
        }
    };

    Some(TimeSeries {
        labels: build_labels(family.get_name(), metric, &extra_labels, enrichment),
        samples,
    })
}

/// The family's reported timestamp when present, else encode-time wall clock
fn sample_timestamp(metric: &Metric, now_ms: i64) -> i64 {
    let reported = metric.get_timestamp_ms();
    if reported != 0 {
        reported
    } else {
        now_ms
    }
}

fn build_labels(
    name: &str,
    metric: &Metric,
    extra: &[(String, String)],
    enrichment: &EnrichmentLabels,
) -> Vec<Label> {
    let mut labels: Vec<Label> =
        Vec::with_capacity(1 + metric.get_label().len() + extra.len() + 5);
    labels.push(Label {
        name: "__name__".to_string(),
        value: name.to_string(),
    });
    for pair in metric.get_label() {
        labels.push(Label {
            name: pair.get_name().to_string(),
            value: pair.get_value().to_string(),
        });
    }
    for (key, value) in extra {
        labels.push(Label {
            name: key.clone(),
            value: value.clone(),
        });
    }
    for (key, value) in enrichment.pairs() {
        labels.push(Label {
            name: key.to_string(),
            value: value.to_string(),
        });
    }

    // Stable sort keeps the earlier (more specific) entry first for equal
    // names, which dedup then retains.
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    labels.dedup_by(|a, b| a.name == b.name);
    labels
}

fn format_point(value: f64) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else {
        value.to_string()
    }
}
