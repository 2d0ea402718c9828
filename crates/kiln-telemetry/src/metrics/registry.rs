// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Registry for managing metrics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Metric, MetricId, MetricType, MetricValue, MetricsError, MetricsResult};

type Storage = Arc<RwLock<HashMap<MetricId, Metric>>>;

/// Central registry for the scheduler's metrics.
///
/// Registration returns a typed handle; handles share the registry's storage
/// and can be cloned freely. Registering an id twice with the same type
/// returns a handle to the existing metric.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    storage: Storage,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter starting at zero.
    pub fn register_counter(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> MetricsResult<CounterHandle> {
        let id = MetricId::new(namespace, name);
        self.put_if_absent(Metric {
            id: id.clone(),
            description: description.into(),
            unit: String::new(),
            value: MetricValue::Counter(0),
        })?;
        Ok(CounterHandle {
            id,
            storage: self.storage.clone(),
        })
    }

    /// Registers a gauge starting at zero.
    pub fn register_gauge(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> MetricsResult<GaugeHandle> {
        let id = MetricId::new(namespace, name);
        self.put_if_absent(Metric {
            id: id.clone(),
            description: description.into(),
            unit: unit.into(),
            value: MetricValue::Gauge(0.0),
        })?;
        Ok(GaugeHandle {
            id,
            storage: self.storage.clone(),
        })
    }

    /// Registers a histogram with ascending bucket upper bounds.
    pub fn register_histogram(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        buckets: Vec<f64>,
    ) -> MetricsResult<HistogramHandle> {
        if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(MetricsError::InvalidOperation(
                "histogram bucket bounds must be strictly ascending".to_owned(),
            ));
        }
        let id = MetricId::new(namespace, name);
        let bucket_counts = vec![0; buckets.len()];
        self.put_if_absent(Metric {
            id: id.clone(),
            description: description.into(),
            unit: unit.into(),
            value: MetricValue::Histogram {
                samples: Vec::new(),
                bucket_bounds: buckets,
                bucket_counts,
            },
        })?;
        Ok(HistogramHandle {
            id,
            storage: self.storage.clone(),
        })
    }

    /// Returns a copy of the metric with `id`.
    pub fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        self.storage
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| MetricsError::MetricNotFound(id.clone()))
    }

    /// Returns `true` if a metric with `id` is registered.
    pub fn contains_metric(&self, id: &MetricId) -> bool {
        self.storage.read().unwrap().contains_key(id)
    }

    /// The number of registered metrics.
    pub fn metric_count(&self) -> usize {
        self.storage.read().unwrap().len()
    }

    /// Every metric in `namespace`, sorted by name.
    pub fn namespace_metrics(&self, namespace: &str) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .storage
            .read()
            .unwrap()
            .values()
            .filter(|m| m.id.namespace == namespace)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    /// Renders every metric as a JSON array sorted by id.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        let mut metrics: Vec<Metric> = self.storage.read().unwrap().values().cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::to_string_pretty(&metrics)
    }

    fn put_if_absent(&self, metric: Metric) -> MetricsResult<()> {
        let mut storage = self.storage.write().unwrap();
        if let Some(existing) = storage.get(&metric.id) {
            let (expected, found) = (metric.value.metric_type(), existing.value.metric_type());
            return if expected == found {
                Ok(())
            } else {
                Err(MetricsError::TypeMismatch { expected, found })
            };
        }
        storage.insert(metric.id.clone(), metric);
        Ok(())
    }
}

fn update<T>(
    storage: &Storage,
    id: &MetricId,
    f: impl FnOnce(&mut MetricValue) -> MetricsResult<T>,
) -> MetricsResult<T> {
    let mut storage = storage.write().unwrap();
    let metric = storage
        .get_mut(id)
        .ok_or_else(|| MetricsError::MetricNotFound(id.clone()))?;
    f(&mut metric.value)
}

fn mismatch(expected: MetricType, value: &MetricValue) -> MetricsError {
    MetricsError::TypeMismatch {
        expected,
        found: value.metric_type(),
    }
}

/// Handle for counter operations.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    storage: Storage,
}

impl CounterHandle {
    /// Increments the counter by 1.
    pub fn increment(&self) -> MetricsResult<u64> {
        self.increment_by(1)
    }

    /// Increments the counter by `amount`, returning the new value.
    pub fn increment_by(&self, amount: u64) -> MetricsResult<u64> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Counter(v) => {
                *v = v.saturating_add(amount);
                Ok(*v)
            }
            other => Err(mismatch(MetricType::Counter, other)),
        })
    }

    /// The current value.
    pub fn get(&self) -> MetricsResult<u64> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Counter(v) => Ok(*v),
            other => Err(mismatch(MetricType::Counter, other)),
        })
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for gauge operations.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    id: MetricId,
    storage: Storage,
}

impl GaugeHandle {
    /// Sets the gauge.
    pub fn set(&self, new_value: f64) -> MetricsResult<()> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Gauge(v) => {
                *v = new_value;
                Ok(())
            }
            other => Err(mismatch(MetricType::Gauge, other)),
        })
    }

    /// The current value.
    pub fn get(&self) -> MetricsResult<f64> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Gauge(v) => Ok(*v),
            other => Err(mismatch(MetricType::Gauge, other)),
        })
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}

/// Handle for histogram operations.
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    id: MetricId,
    storage: Storage,
}

impl HistogramHandle {
    /// Records a sample.
    pub fn observe(&self, sample: f64) -> MetricsResult<()> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Histogram {
                samples,
                bucket_bounds,
                bucket_counts,
            } => {
                samples.push(sample);
                for (count, &bound) in bucket_counts.iter_mut().zip(bucket_bounds.iter()) {
                    if sample <= bound {
                        *count += 1;
                    }
                }
                Ok(())
            }
            other => Err(mismatch(MetricType::Histogram, other)),
        })
    }

    /// The number of recorded samples.
    pub fn sample_count(&self) -> MetricsResult<usize> {
        update(&self.storage, &self.id, |value| match value {
            MetricValue::Histogram { samples, .. } => Ok(samples.len()),
            other => Err(mismatch(MetricType::Histogram, other)),
        })
    }

    /// The metric id.
    pub fn id(&self) -> &MetricId {
        &self.id
    }
}
