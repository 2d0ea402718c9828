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

//! Metric identifiers, values and errors.

pub mod registry;

use std::fmt::{self, Display};

use serde::Serialize;

/// Identifies a metric by namespace and name, e.g. `scheduler:packages_loaded`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricId {
    /// The broad category of the metric (e.g. "scheduler", "gc").
    pub namespace: String,
    /// The specific name of the metric.
    pub name: String,
}

impl MetricId {
    /// Creates a new `MetricId`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// The kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricType {
    /// A monotonically increasing count.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// A distribution of samples.
    Histogram,
}

/// The current value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetricValue {
    /// A counter value.
    Counter(u64),
    /// A gauge value.
    Gauge(f64),
    /// Raw samples plus cumulative bucket counts.
    Histogram {
        /// Every recorded sample.
        samples: Vec<f64>,
        /// Bucket upper bounds, ascending.
        bucket_bounds: Vec<f64>,
        /// Samples less than or equal to each bound.
        bucket_counts: Vec<u64>,
    },
}

impl MetricValue {
    /// Returns the [`MetricType`] of this value.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Histogram { .. } => MetricType::Histogram,
        }
    }

    /// The counter value, if this is a counter.
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// The gauge value, if this is a gauge.
    pub fn as_gauge(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            _ => None,
        }
    }
}

/// A registered metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    /// The metric identifier.
    pub id: MetricId,
    /// Human-readable description.
    pub description: String,
    /// Unit of the values (`"ms"`, `"bytes"`, empty for plain counts).
    pub unit: String,
    /// The current value.
    pub value: MetricValue,
}

/// An error raised by the metrics registry.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// The requested metric does not exist.
    MetricNotFound(MetricId),
    /// The metric exists with a different type.
    TypeMismatch {
        /// The type the operation needs.
        expected: MetricType,
        /// The type actually registered.
        found: MetricType,
    },
    /// The operation was rejected, e.g. unsorted histogram bounds.
    InvalidOperation(String),
}

impl Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::MetricNotFound(id) => write!(f, "Metric not found: {id}"),
            MetricsError::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {expected:?}, found {found:?}")
            }
            MetricsError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
        }
    }
}

impl std::error::Error for MetricsError {}

/// Result alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
