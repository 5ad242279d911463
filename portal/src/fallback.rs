//! Placeholder payloads served when the field-service API cannot be reached.

use crate::model::now_rfc3339;
use serde_json::{json, Value};

pub fn bookings() -> Value {
    let now = now_rfc3339();
    json!([
        {
            "uuid": "mock-1",
            "job_uuid": "job-1",
            "title": "Mock Booking A",
            "scheduled_for": now,
            "notes": "Demo booking"
        },
        {
            "uuid": "mock-2",
            "job_uuid": "job-2",
            "title": "Mock Booking B",
            "scheduled_for": now,
            "notes": "Demo booking 2"
        }
    ])
}

/// Single booking tagged with the requested id.
pub fn booking(id: &str) -> Value {
    json!({
        "uuid": id,
        "title": format!("Mock booking {}", id),
        "description": "Fallback detail"
    })
}

pub fn attachments(job_uuid: &str) -> Value {
    json!([
        { "uuid": "att-mock-1", "filename": "photo1.jpg", "job_uuid": job_uuid },
        { "uuid": "att-mock-2", "filename": "invoice.pdf", "job_uuid": job_uuid }
    ])
}
