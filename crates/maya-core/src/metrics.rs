use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use maya_bus::BusPublisher;
use maya_provider::{FeedbackAggregate, FeedbackStore, StoredFeedback};
use maya_schema::{ConsoleEvent, FeedbackKind, HealthGauge};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::MetricsConfig;

/// One stored feedback record tagged with the prompt it was filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub prompt_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub record: StoredFeedback,
}

/// Operational snapshot shown on the monitoring view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMetrics {
    pub total_conversations: usize,
    pub avg_response_time: f64,
    pub satisfaction: f64,
    pub likes: usize,
    pub dislikes: usize,
    /// Overall scores of the recent window, oldest first.
    pub recent_scores: Vec<f64>,
    pub recent_average: Option<f64>,
    pub gauge: HealthGauge,
    pub total_entries: usize,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Flatten every prompt's records into one list, newest first. Records
/// without a readable timestamp sort last.
pub fn flatten_feedback(aggregate: &FeedbackAggregate) -> Vec<FeedbackEntry> {
    let mut entries: Vec<FeedbackEntry> = aggregate
        .iter()
        .flat_map(|(prompt_id, records)| {
            records.iter().map(move |record| FeedbackEntry {
                prompt_id: prompt_id.clone(),
                timestamp: record.timestamp.as_deref().and_then(parse_timestamp),
                record: record.clone(),
            })
        })
        .collect();
    entries.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    entries
}

/// Classify recent scores. Flagged content overrides every threshold.
pub fn classify_health(
    recent_scores: &[f64],
    inappropriate: bool,
    config: &MetricsConfig,
) -> HealthGauge {
    if inappropriate {
        return HealthGauge::InappropriateContent;
    }
    if recent_scores.is_empty() {
        return HealthGauge::NoData;
    }
    let average = recent_scores.iter().sum::<f64>() / recent_scores.len() as f64;
    if average >= config.healthy_threshold {
        HealthGauge::Healthy
    } else if average >= config.warning_threshold {
        HealthGauge::Warning
    } else {
        HealthGauge::Poor
    }
}

/// Derive metrics from entries sorted newest first.
pub fn derive_metrics(entries: &[FeedbackEntry], config: &MetricsConfig) -> LiveMetrics {
    let sessions: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.record.session_id.as_deref())
        .collect();

    let times: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.record.response_time_seconds)
        .collect();
    let avg_response_time = if times.is_empty() {
        0.0
    } else {
        times.iter().sum::<f64>() / times.len() as f64
    };

    let likes = entries
        .iter()
        .filter(|e| e.record.kind() == Some(FeedbackKind::Like))
        .count();
    let dislikes = entries
        .iter()
        .filter(|e| e.record.kind() == Some(FeedbackKind::Dislike))
        .count();
    let satisfaction = if likes + dislikes == 0 {
        0.0
    } else {
        likes as f64 / (likes + dislikes) as f64 * 5.0
    };

    let window: Vec<&FeedbackEntry> = entries.iter().take(config.recent_window).rev().collect();
    let recent_scores: Vec<f64> = window.iter().filter_map(|e| e.record.overall()).collect();
    let recent_average = if recent_scores.is_empty() {
        None
    } else {
        Some(recent_scores.iter().sum::<f64>() / recent_scores.len() as f64)
    };
    let inappropriate = window.iter().any(|e| e.record.inappropriate);

    LiveMetrics {
        total_conversations: sessions.len(),
        avg_response_time,
        satisfaction,
        likes,
        dislikes,
        gauge: classify_health(&recent_scores, inappropriate, config),
        recent_scores,
        recent_average,
        total_entries: entries.len(),
    }
}

/// Polls the feedback store and keeps the last good snapshot.
pub struct MetricsAggregator {
    store: Arc<dyn FeedbackStore>,
    config: MetricsConfig,
    publisher: Option<BusPublisher>,
    latest: Mutex<Option<LiveMetrics>>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn FeedbackStore>, config: MetricsConfig) -> Self {
        Self {
            store,
            config,
            publisher: None,
            latest: Mutex::new(None),
        }
    }

    pub fn with_publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn latest(&self) -> Option<LiveMetrics> {
        self.latest.lock().await.clone()
    }

    /// Refresh from the store. A failed fetch keeps the previous snapshot.
    pub async fn poll(&self) -> Option<LiveMetrics> {
        let aggregate = match self.store.aggregate().await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                tracing::warn!(error = %e, "metrics poll failed, keeping previous values");
                return self.latest().await;
            }
        };

        let metrics = derive_metrics(&flatten_feedback(&aggregate), &self.config);
        tracing::debug!(
            total_conversations = metrics.total_conversations,
            satisfaction = metrics.satisfaction,
            gauge = %metrics.gauge,
            "metrics refreshed"
        );
        *self.latest.lock().await = Some(metrics.clone());

        if let Some(publisher) = &self.publisher {
            publisher
                .publish(ConsoleEvent::MetricsUpdated {
                    total_conversations: metrics.total_conversations,
                    avg_response_time: metrics.avg_response_time,
                    satisfaction: metrics.satisfaction,
                    gauge: metrics.gauge,
                })
                .await;
        }
        Some(metrics)
    }
}
