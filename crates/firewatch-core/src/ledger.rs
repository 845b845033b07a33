use crate::types::{IncidentRecord, Notification};
use std::collections::VecDeque;

/// Newest-first list of notifications with a cached unread count.
#[derive(Debug, Clone, Default)]
pub struct NotificationLedger {
    entries: VecDeque<Notification>,
    unread: usize,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always creates a new entry, even if one exists for this incident.
    pub fn add_notification(&mut self, record: &IncidentRecord) {
        self.entries.push_front(Notification::for_incident(record));
        self.recount();
    }

    /// Marks the first entry with this id. Returns whether anything changed.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(entry) if !entry.read => {
                entry.read = true;
                self.recount();
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.read = true;
        }
        self.recount();
    }

    /// Drops read entries; unread ones keep their relative order.
    pub fn clear_read(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|n| !n.read);
        self.recount();
        before - self.entries.len()
    }

    fn recount(&mut self) {
        self.unread = self.entries.iter().filter(|n| !n.read).count();
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn entries(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
