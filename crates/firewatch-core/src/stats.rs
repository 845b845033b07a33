use crate::types::{IncidentRecord, IncidentStatus};
use serde::Serialize;

/// How many reports the dashboard's "recent" panel shows.
pub const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportStats {
    pub total: usize,
    pub pending: usize,
    pub resolved: usize,
    pub unassigned: usize,
    pub unread_notifications: usize,
}

impl ReportStats {
    pub fn compute(reports: &[IncidentRecord], unread_notifications: usize) -> Self {
        let mut stats = Self {
            total: reports.len(),
            unread_notifications,
            ..Default::default()
        };
        for report in reports {
            match report.status {
                Some(IncidentStatus::Pending) => stats.pending += 1,
                Some(IncidentStatus::Resolved) => stats.resolved += 1,
                None => {}
            }
            if report.is_unassigned() {
                stats.unassigned += 1;
            }
        }
        stats
    }
}

pub fn recent(reports: &[IncidentRecord]) -> &[IncidentRecord] {
    &reports[..reports.len().min(RECENT_LIMIT)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;
    use serde_json::json;

    fn report(id: &str, status: &str, assigned: Option<&str>) -> IncidentRecord {
        let mut data: Document = json!({ "status": status }).as_object().cloned().unwrap();
        if let Some(handler) = assigned {
            data.insert("assignedTo".into(), json!(handler));
        }
        IncidentRecord::from_document(id, &data)
    }

    #[test]
    fn test_counts() {
        let reports = vec![
            report("a", "Pending", None),
            report("b", "Resolved", Some("ff1")),
            report("c", "Resolved", None),
            report("d", "Pending", Some("")),
            report("e", "Burning", Some("ff2")),
        ];
        let stats = ReportStats::compute(&reports, 3);

        // An unrecognised status counts as neither pending nor resolved.
        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.unassigned, 3);
        assert_eq!(stats.unread_notifications, 3);
    }

    #[test]
    fn test_recent_caps_at_five() {
        let reports: Vec<_> = (0..8).map(|i| report(&i.to_string(), "Pending", None)).collect();
        let top = recent(&reports);
        assert_eq!(top.len(), RECENT_LIMIT);
        assert_eq!(top[0].id, "0");

        assert_eq!(recent(&reports[..2]).len(), 2);
        assert!(recent(&[]).is_empty());
    }
}
