use std::time::Duration;

use cpq_common::{status_code, sub_status_code};

use crate::item::ResultItem;

/// Structured failure carried by a failed page.
///
/// Failures travel as page payloads, not as `Err` values: the cursor never
/// throws for ordinary query outcomes, and lower layers never swallow them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub status_code: u16,
    pub sub_status_code: u32,
    pub message: String,
    /// Server-suggested delay before retrying, present on throttles.
    pub retry_after: Option<Duration>,
}

impl QueryFailure {
    pub fn new(status_code: u16, sub_status_code: u32, message: impl Into<String>) -> Self {
        Self {
            status_code,
            sub_status_code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn throttled(retry_after: Duration, message: impl Into<String>) -> Self {
        Self {
            status_code: status_code::TOO_MANY_REQUESTS,
            sub_status_code: sub_status_code::UNKNOWN,
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            status_code::INTERNAL_SERVER_ERROR,
            sub_status_code::UNKNOWN,
            message,
        )
    }

    pub fn is_throttle(&self) -> bool {
        self.status_code == status_code::TOO_MANY_REQUESTS
    }

    pub fn is_name_cache_stale(&self) -> bool {
        self.status_code == status_code::GONE
            && self.sub_status_code == sub_status_code::NAME_CACHE_IS_STALE
    }

    pub fn is_partition_split(&self) -> bool {
        self.status_code == status_code::GONE
            && self.sub_status_code == sub_status_code::PARTITION_KEY_RANGE_GONE
    }
}

/// One page returned upward through the pipeline.
///
/// Charge is additive and diagnostics concatenable across every drain that
/// contributed to the page. A page may carry both items and a failure: the
/// order-by merge commits partially merged items before attaching the
/// failure that interrupted it.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<ResultItem>,
    pub request_charge: f64,
    pub diagnostics: Vec<String>,
    pub failure: Option<QueryFailure>,
}

impl QueryPage {
    pub fn from_failure(failure: QueryFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Folds another page's cost and diagnostics into this one.
    pub fn absorb_metadata(&mut self, other: &QueryPage) {
        self.request_charge += other.request_charge;
        self.diagnostics.extend(other.diagnostics.iter().cloned());
    }
}
