//! Critical failure reporting.

use chrono::Utc;

/// Record a failure that left a user without any reply.
///
/// Emits one structured `error` event and never fails.
pub fn report_critical(context: &str, error: &dyn std::error::Error, details: serde_json::Value) {
    tracing::error!(
        target: "linerelay::critical",
        context,
        error = %error,
        details = %details,
        reported_at = %Utc::now().to_rfc3339(),
        "critical failure"
    );
}
