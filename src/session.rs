//! Draw session: `Idle -> Drawing -> Revealed -> Idle`.
//!
//! The session owns no presentation. It reports through a [`Notifier`] and
//! broadcasts [`SessionEvent`]s that views subscribe to.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::Storage;
use crate::error::{SessionError, StorageError};
use crate::models::{AttendanceRecord, AttendanceStatus, Student, WeightAdjustment};
use crate::notify::Notifier;
use crate::selector::select_weighted;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Drawing,
    Revealed(Student),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    DrawStarted,
    Revealed(Student),
    Recorded(AttendanceRecord),
    RosterRefreshed(Vec<Student>),
    RecordsRefreshed(Vec<AttendanceRecord>),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub draw_delay: Duration,
    pub recent_limit: usize,
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            draw_delay: settings.draw_delay(),
            recent_limit: settings.recent_limit,
        }
    }
}

pub struct Session<'a> {
    storage: &'a Storage,
    notifier: &'a dyn Notifier,
    options: SessionOptions,
    state: SessionState,
    rng: StdRng,
    events: broadcast::Sender<SessionEvent>,
}

impl<'a> Session<'a> {
    pub fn new(storage: &'a Storage, notifier: &'a dyn Notifier, options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            notifier,
            options,
            state: SessionState::Idle,
            rng: StdRng::from_entropy(),
            events,
        }
    }

    /// Replace the random source, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_student(&self) -> Option<&Student> {
        match &self.state {
            SessionState::Revealed(student) => Some(student),
            _ => None,
        }
    }

    /// Pick a student. Returns `None` (and warns) when the roster is empty.
    pub async fn draw(&mut self) -> Result<Option<Student>, SessionError> {
        if self.state != SessionState::Idle {
            self.notifier
                .warning("Record the current student's attendance before drawing again");
            return Err(SessionError::InvalidState("a drawn student is awaiting confirmation"));
        }

        let roster = match self.storage.get_all_students().await {
            Ok(roster) => roster,
            Err(err) => return Err(self.storage_failure("load the roster", err)),
        };

        if roster.is_empty() {
            self.notifier.warning("Import a student roster first");
            return Ok(None);
        }

        self.state = SessionState::Drawing;
        self.emit(SessionEvent::DrawStarted);

        let picked = match select_weighted(&roster, &mut self.rng) {
            Ok(student) => student.clone(),
            Err(err) => {
                self.state = SessionState::Idle;
                return Err(err.into());
            }
        };
        debug!("Picked {} (weight {})", picked.name, picked.weight);

        if !self.options.draw_delay.is_zero() {
            tokio::time::sleep(self.options.draw_delay).await;
        }

        self.state = SessionState::Revealed(picked.clone());
        self.emit(SessionEvent::Revealed(picked.clone()));
        Ok(Some(picked))
    }

    /// Record the outcome for the revealed student and apply the weight policy.
    ///
    /// On a storage failure the session stays `Revealed` so the caller can retry.
    pub async fn confirm(
        &mut self,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<AttendanceRecord, SessionError> {
        let student = match &self.state {
            SessionState::Revealed(student) => student.clone(),
            _ => {
                self.notifier.warning("No student has been drawn");
                return Err(SessionError::InvalidState("no student has been drawn"));
            }
        };

        let record = AttendanceRecord::for_draw(&student, status, note);
        let adjustment = WeightAdjustment::for_outcome(status);

        let updated = match self.storage.record_attendance(&record, adjustment).await {
            Ok(updated) => updated,
            Err(err) => return Err(self.storage_failure("save the attendance record", err)),
        };

        match updated {
            Some(student) => info!(
                "Recorded {} as {}; weight now {}",
                student.name, status, student.weight
            ),
            None => warn!("Recorded {} as {} but the student no longer exists", student.name, status),
        }
        self.emit(SessionEvent::Recorded(record.clone()));

        if let Err(err) = self.refresh().await {
            self.storage_failure("refresh the views", err);
        }

        self.state = SessionState::Idle;
        self.notifier.success(&format!("Saved: {} {}", student.name, status));
        Ok(record)
    }

    /// Confirm with the default outcome, `present`.
    pub async fn confirm_default(
        &mut self,
        note: Option<String>,
    ) -> Result<AttendanceRecord, SessionError> {
        self.confirm(AttendanceStatus::Present, note).await
    }

    /// Broadcast the current roster and the recent records.
    pub async fn refresh(&self) -> Result<(), StorageError> {
        let roster = self.storage.get_all_students().await?;
        self.emit(SessionEvent::RosterRefreshed(roster));

        let records = self
            .storage
            .get_recent_records(self.options.recent_limit)
            .await?;
        self.emit(SessionEvent::RecordsRefreshed(records));
        Ok(())
    }

    /// Put a student's weight back to 1. Returns `false` for unknown ids.
    pub async fn reset_weight(&self, id: Uuid) -> Result<bool, SessionError> {
        let found = match self.storage.update_student_weight(id, 1).await {
            Ok(found) => found,
            Err(err) => return Err(self.storage_failure("reset the weight", err)),
        };

        if !found {
            self.notifier.warning(&format!("No student with id {id}"));
            return Ok(false);
        }

        if let Err(err) = self.refresh().await {
            self.storage_failure("refresh the views", err);
        }
        self.notifier.success("Weight reset to 1");
        Ok(true)
    }

    /// Delete a student after confirmation. Their records are kept.
    pub async fn delete_student(&self, id: Uuid) -> Result<bool, SessionError> {
        if !self
            .notifier
            .confirm("Delete this student? This cannot be undone.")
        {
            return Ok(false);
        }

        let found = match self.storage.delete_student(id).await {
            Ok(found) => found,
            Err(err) => return Err(self.storage_failure("delete the student", err)),
        };

        if !found {
            self.notifier.warning(&format!("No student with id {id}"));
            return Ok(false);
        }

        if let Err(err) = self.refresh().await {
            self.storage_failure("refresh the views", err);
        }
        self.notifier.success("Student deleted");
        Ok(true)
    }

    /// Remove the whole roster after confirmation. Records are kept.
    pub async fn clear_students(&self) -> Result<bool, SessionError> {
        if !self
            .notifier
            .confirm("Delete every student? This cannot be undone.")
        {
            return Ok(false);
        }

        if let Err(err) = self.storage.clear_students().await {
            return Err(self.storage_failure("clear the roster", err));
        }

        if let Err(err) = self.refresh().await {
            self.storage_failure("refresh the views", err);
        }
        self.notifier.success("Roster cleared");
        Ok(true)
    }

    pub async fn clear_records(&self) -> Result<bool, SessionError> {
        if !self
            .notifier
            .confirm("Delete every attendance record? This cannot be undone.")
        {
            return Ok(false);
        }

        if let Err(err) = self.storage.clear_records().await {
            return Err(self.storage_failure("clear the records", err));
        }

        if let Err(err) = self.refresh().await {
            self.storage_failure("refresh the views", err);
        }
        self.notifier.success("Records cleared");
        Ok(true)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn storage_failure(&self, action: &str, err: StorageError) -> SessionError {
        error!("Failed to {action}: {err}");
        self.notifier.error(&format!("Could not {action}: {err}"));
        SessionError::Storage(err)
    }
}
