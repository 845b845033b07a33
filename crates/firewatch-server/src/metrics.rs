use firewatch_core::stats::ReportStats;
use metrics::{counter, gauge};

pub fn record_change_batch(added: usize, modified: usize, removed: usize) {
    counter!("change_events_total", "kind" => "added").increment(added as u64);
    counter!("change_events_total", "kind" => "modified").increment(modified as u64);
    counter!("change_events_total", "kind" => "removed").increment(removed as u64);
}

pub fn record_write_failure(op: &'static str) {
    counter!("backend_write_failures_total", "op" => op).increment(1);
}

pub fn update_report_gauges(stats: &ReportStats) {
    gauge!("fire_reports_total").set(stats.total as f64);
    gauge!("fire_reports_pending").set(stats.pending as f64);
    gauge!("fire_reports_unassigned").set(stats.unassigned as f64);
}

pub fn update_unread(unread: usize) {
    gauge!("notifications_unread").set(unread as f64);
}
