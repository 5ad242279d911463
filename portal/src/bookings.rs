//! Booking reads proxied to the field-service API with mock fallback.
//!
//! Any upstream failure (missing token, transport error, non-2xx) degrades to
//! the placeholder payloads in [`crate::fallback`]; the result records which
//! source served it.

use crate::{
    fallback,
    upstream::{eq_filter, UpstreamClient},
};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Live,
    Mock,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Mock => "mock",
        }
    }
}

/// JSON payload plus the source that produced it.
#[derive(Debug, Clone)]
pub struct Sourced {
    pub data: Value,
    pub source: DataSource,
}

impl Sourced {
    fn live(data: Value) -> Self {
        Self {
            data,
            source: DataSource::Live,
        }
    }

    fn mock(data: Value) -> Self {
        Self {
            data,
            source: DataSource::Mock,
        }
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// List job activities. `customer_email` is only sent upstream when
/// `forward_filter` is set.
pub async fn list(
    client: &UpstreamClient,
    customer_email: Option<&str>,
    forward_filter: bool,
) -> Sourced {
    let query = match customer_email.filter(|e| forward_filter && !e.is_empty()) {
        Some(email) => vec![("$filter", eq_filter("customer_email", email))],
        None => Vec::new(),
    };
    match client.get_json("/jobactivity.json", &query).await {
        Ok(data) if !data.is_null() => Sourced::live(data),
        Ok(_) => Sourced::mock(fallback::bookings()),
        Err(e) => {
            warn!(error = %e, "booking list fetch failed, serving mock data");
            Sourced::mock(fallback::bookings())
        }
    }
}

/// Look the id up as a job, then as a job activity.
pub async fn detail(client: &UpstreamClient, id: &str) -> Sourced {
    let query = [("$filter", eq_filter("uuid", id))];
    let data = match client.get_json("/job.json", &query).await {
        Ok(v) => Some(v),
        Err(e) => {
            info!(error = %e, booking = id, "job lookup failed, trying job activity");
            match client.get_json("/jobactivity.json", &query).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, booking = id, "both booking lookups failed");
                    None
                }
            }
        }
    };
    match data {
        Some(v) if !is_empty(&v) => Sourced::live(v),
        _ => Sourced::mock(fallback::booking(id)),
    }
}

pub async fn attachments(client: &UpstreamClient, job_uuid: &str) -> Sourced {
    let query = [("$filter", eq_filter("job_uuid", job_uuid))];
    match client.get_json("/attachment.json", &query).await {
        Ok(data) if !data.is_null() => Sourced::live(data),
        Ok(_) => Sourced::mock(fallback::attachments(job_uuid)),
        Err(e) => {
            warn!(error = %e, booking = job_uuid, "attachment fetch failed, serving mock data");
            Sourced::mock(fallback::attachments(job_uuid))
        }
    }
}
