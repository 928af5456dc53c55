//! Session-scoped instrumentation.
//!
//! Funnel timers (form-open, page dwell) are owned by the session they
//! belong to, never by the process, so concurrent sessions cannot
//! cross-contaminate each other's measurements. Events go out as tracing
//! records; the downstream analytics taxonomy is an external concern.

use std::time::Instant;

const TARGET: &str = "workboard::telemetry";

#[derive(Debug)]
pub struct SessionTelemetry {
    user_id: String,
    form_opened_at: Option<Instant>,
    last_field_touched: Option<String>,
    current_page: Option<(String, Instant)>,
}

impl SessionTelemetry {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            form_opened_at: None,
            last_field_touched: None,
            current_page: None,
        }
    }

    /// Funnel start: the task form was opened.
    pub fn form_open(&mut self, source: &str) {
        self.form_opened_at = Some(Instant::now());
        self.last_field_touched = None;
        tracing::info!(target: TARGET, user = %self.user_id, source, "task_form_open");
    }

    pub fn field_touch(&mut self, field: &str) {
        self.last_field_touched = Some(field.to_string());
    }

    /// Funnel completion; closes the open-form timer.
    pub fn form_submit(&mut self, fields_filled: usize) {
        let elapsed = self
            .form_opened_at
            .take()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        tracing::info!(
            target: TARGET,
            user = %self.user_id,
            total_time_sec = elapsed,
            fields_filled,
            "task_form_submit"
        );
    }

    /// Funnel exit without saving. A no-op when no form is open.
    pub fn form_abandon(&mut self) {
        let Some(opened_at) = self.form_opened_at.take() else {
            return;
        };
        tracing::info!(
            target: TARGET,
            user = %self.user_id,
            time_spent_sec = opened_at.elapsed().as_secs(),
            last_field_touched = self.last_field_touched.as_deref().unwrap_or("none"),
            "task_form_abandon"
        );
        self.last_field_touched = None;
    }

    /// View switch: record dwell time on the page being left, then start
    /// timing the new one.
    pub fn page_view(&mut self, page: &str) {
        if let Some((previous, entered_at)) = self.current_page.take() {
            let dwell = entered_at.elapsed().as_secs();
            if dwell > 0 {
                tracing::info!(
                    target: TARGET,
                    user = %self.user_id,
                    page = %previous,
                    time_spent_sec = dwell,
                    "page_leave"
                );
            }
        }
        self.current_page = Some((page.to_string(), Instant::now()));
        tracing::info!(target: TARGET, user = %self.user_id, page, "page_view");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandon_without_open_is_a_noop() {
        let mut telemetry = SessionTelemetry::new("u1");
        telemetry.form_abandon();
        assert!(telemetry.form_opened_at.is_none());
    }

    #[test]
    fn submit_clears_the_funnel_timer() {
        let mut telemetry = SessionTelemetry::new("u1");
        telemetry.form_open("board");
        telemetry.field_touch("title");
        telemetry.form_submit(3);
        assert!(telemetry.form_opened_at.is_none());
        // A stray abandon after submit stays silent.
        telemetry.form_abandon();
    }

    #[test]
    fn sessions_do_not_share_timers() {
        let mut a = SessionTelemetry::new("u1");
        let b = SessionTelemetry::new("u2");
        a.form_open("header");
        assert!(a.form_opened_at.is_some());
        assert!(b.form_opened_at.is_none());
    }
}
