use crate::types::{ChangeKind, DocumentChange, IncidentRecord, IncidentStatus};
use tracing::debug;

/// What a single change did to the local list.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOutcome {
    Added(IncidentRecord),
    Modified,
    Removed,
    /// Id not present (modify/remove).
    Ignored,
}

/// Local copy of the live incident query.
///
/// New records go to the front; modified records keep their index. The
/// backend decides the order of everything else.
#[derive(Debug, Clone, Default)]
pub struct IncidentMirror {
    reports: Vec<IncidentRecord>,
}

impl IncidentMirror {
    pub fn new() -> Self {
        Self { reports: Vec::new() }
    }

    pub fn apply(&mut self, change: &DocumentChange) -> MirrorOutcome {
        match change.kind {
            ChangeKind::Added => {
                let record = IncidentRecord::from_document(&change.id, &change.data);
                // A repeated add moves the record to the front.
                if let Some(index) = self.position(&change.id) {
                    self.reports.remove(index);
                }
                self.reports.insert(0, record.clone());
                MirrorOutcome::Added(record)
            }
            ChangeKind::Modified => match self.position(&change.id) {
                Some(index) => {
                    self.reports[index] = IncidentRecord::from_document(&change.id, &change.data);
                    MirrorOutcome::Modified
                }
                None => {
                    debug!("Ignoring modification of unknown report {}", change.id);
                    MirrorOutcome::Ignored
                }
            },
            ChangeKind::Removed => match self.position(&change.id) {
                Some(index) => {
                    self.reports.remove(index);
                    MirrorOutcome::Removed
                }
                None => MirrorOutcome::Ignored,
            },
        }
    }

    /// Optimistic status patch. Returns false when the id is not mirrored.
    pub fn patch_status(&mut self, id: &str, status: IncidentStatus) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Optimistic assignment patch; assignment always resolves.
    pub fn patch_assignment(&mut self, id: &str, handler: &str) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.assigned_to = Some(handler.to_string());
                record.status = Some(IncidentStatus::Resolved);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&IncidentRecord> {
        self.reports.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut IncidentRecord> {
        self.reports.iter_mut().find(|r| r.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.reports.iter().position(|r| r.id == id)
    }

    pub fn reports(&self) -> &[IncidentRecord] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
