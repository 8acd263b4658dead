use super::document::FlowDocument;
use super::registry::{DocumentRegistry, SaveFlow};

/// What the user picked in the unsaved-changes prompt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaveChoice {
    /// Stay on the document; nothing changes.
    Cancel,
    /// Leave without persisting; the saved data keeps its old contents.
    Discard,
    /// Persist first, then leave only if the save succeeded.
    SaveAndLeave,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    Stayed,
    Left,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaveRequest {
    /// Nothing unsaved; navigation may proceed immediately.
    Proceed,
    /// Unsaved changes; the caller must surface the three choices and feed
    /// the answer back through `resolve`.
    Blocked,
}

/// Intercepts navigation away from a dirty document.
///
/// Clean documents pass straight through. A dirty document blocks until one
/// of the three choices resolves it; while a save-and-leave is running the
/// guard is held, so a second navigation attempt cannot re-enter it.
#[derive(Default)]
pub struct NavigationGuard {
    blocked: bool,
    save_in_flight: bool,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn request_leave(&mut self, doc: &FlowDocument) -> LeaveRequest {
        if self.save_in_flight {
            return LeaveRequest::Blocked;
        }
        if doc.is_dirty() {
            self.blocked = true;
            LeaveRequest::Blocked
        } else {
            LeaveRequest::Proceed
        }
    }

    /// A blocked navigation can always be abandoned before a choice is made.
    pub fn cancel(&mut self) {
        if !self.save_in_flight {
            self.blocked = false;
        }
    }

    pub fn resolve(
        &mut self,
        choice: LeaveChoice,
        doc: &mut FlowDocument,
        registry: &mut DocumentRegistry,
        saver: &mut dyn SaveFlow,
    ) -> LeaveOutcome {
        if self.save_in_flight {
            return LeaveOutcome::Stayed;
        }
        match choice {
            LeaveChoice::Cancel => {
                self.blocked = false;
                LeaveOutcome::Stayed
            }
            LeaveChoice::Discard => {
                self.blocked = false;
                LeaveOutcome::Left
            }
            LeaveChoice::SaveAndLeave => {
                self.save_in_flight = true;
                let result = saver.save_flow(doc);
                self.save_in_flight = false;
                match result {
                    Ok(()) => {
                        doc.mark_saved();
                        registry.set_document_pending(doc.id, false);
                        self.blocked = false;
                        LeaveOutcome::Left
                    }
                    Err(err) => {
                        // Keep blocking and keep the dirty flag; silently
                        // discarding on a failed save would lose work.
                        log::warn!("save before leaving failed: {err:#}");
                        LeaveOutcome::Stayed
                    }
                }
            }
        }
    }
}
