use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Locale;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Normal,
    Present,
    Late,
    Absent,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Normal => "normal",
            StudentStatus::Present => "present",
            StudentStatus::Late => "late",
            StudentStatus::Absent => "absent",
        }
    }

    pub fn label(self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::En, StudentStatus::Normal) => "normal",
            (Locale::En, StudentStatus::Present) => "present",
            (Locale::En, StudentStatus::Late) => "late",
            (Locale::En, StudentStatus::Absent) => "absent",
            (Locale::ZhCn, StudentStatus::Normal) => "正常",
            (Locale::ZhCn, StudentStatus::Present) => "出席",
            (Locale::ZhCn, StudentStatus::Late) => "迟到",
            (Locale::ZhCn, StudentStatus::Absent) => "缺席",
        }
    }
}

impl FromStr for StudentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(StudentStatus::Normal),
            "present" => Ok(StudentStatus::Present),
            "late" => Ok(StudentStatus::Late),
            "absent" => Ok(StudentStatus::Absent),
            other => Err(format!("unknown student status '{other}'")),
        }
    }
}

/// Outcome chosen for a revealed student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        StudentStatus::from(self).as_str()
    }
}

impl From<AttendanceStatus> for StudentStatus {
    fn from(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present => StudentStatus::Present,
            AttendanceStatus::Late => StudentStatus::Late,
            AttendanceStatus::Absent => StudentStatus::Absent,
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<StudentStatus>()? {
            StudentStatus::Present => Ok(AttendanceStatus::Present),
            StudentStatus::Late => Ok(AttendanceStatus::Late),
            StudentStatus::Absent => Ok(AttendanceStatus::Absent),
            StudentStatus::Normal => Err("'normal' is not an attendance outcome".to_string()),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an attendance record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Draw,
    /// An entry not produced by a draw. Nothing in roll-caller writes one, but
    /// stored rows may carry the tag and must still load.
    Manual,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Draw => "draw",
            RecordType::Manual => "manual",
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draw" => Ok(RecordType::Draw),
            "manual" => Ok(RecordType::Manual),
            other => Err(format!("unknown record type '{other}'")),
        }
    }
}

/// How a confirmed outcome changes the drawn student's weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightAdjustment {
    /// Back to the default weight of 1.
    Reset,
    /// Twice the current weight, never less than 2.
    Double,
    Keep,
}

impl WeightAdjustment {
    pub fn for_outcome(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present => WeightAdjustment::Reset,
            AttendanceStatus::Late => WeightAdjustment::Double,
            AttendanceStatus::Absent => WeightAdjustment::Keep,
        }
    }

    pub fn apply(self, current: u32) -> u32 {
        match self {
            WeightAdjustment::Reset => 1,
            WeightAdjustment::Double => current.max(1).saturating_mul(2),
            WeightAdjustment::Keep => current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub weight: u32,
    pub status: StudentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Student {
    /// A fresh roster entry with the default weight of 1.
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            weight: 1,
            status: StudentStatus::Normal,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    /// Weak reference; the student may since have been deleted.
    pub student_id: Uuid,
    /// Name as it was when the record was taken.
    pub student_name: String,
    pub record_type: RecordType,
    pub status: AttendanceStatus,
    pub note: Option<String>,
    pub timestamp: i64,
}

impl AttendanceRecord {
    pub fn for_draw(student: &Student, status: AttendanceStatus, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student.id,
            student_name: student.name.clone(),
            record_type: RecordType::Draw,
            status,
            note: note.filter(|n| !n.trim().is_empty()),
            timestamp: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_students_start_normal_with_unit_weight() {
        let student = Student::new("Avery Lee");
        assert_eq!(student.weight, 1);
        assert_eq!(student.status, StudentStatus::Normal);
        assert_eq!(student.created_at, student.updated_at);
    }

    #[test]
    fn statuses_parse_from_their_stored_form() {
        for status in [
            StudentStatus::Normal,
            StudentStatus::Present,
            StudentStatus::Late,
            StudentStatus::Absent,
        ] {
            assert_eq!(status.as_str().parse::<StudentStatus>(), Ok(status));
        }
        assert!("normal".parse::<AttendanceStatus>().is_err());
        assert_eq!("late".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Late));
        assert_eq!("manual".parse::<RecordType>(), Ok(RecordType::Manual));
        assert!("import".parse::<RecordType>().is_err());
    }

    #[test]
    fn draw_records_snapshot_the_name_and_drop_blank_notes() {
        let student = Student::new("Jules Moreno");
        let record =
            AttendanceRecord::for_draw(&student, AttendanceStatus::Absent, Some("  ".to_string()));
        assert_eq!(record.student_id, student.id);
        assert_eq!(record.student_name, "Jules Moreno");
        assert_eq!(record.record_type, RecordType::Draw);
        assert_eq!(record.note, None);
    }

    #[test]
    fn outcomes_map_to_weight_policy() {
        assert_eq!(WeightAdjustment::for_outcome(AttendanceStatus::Present).apply(7), 1);
        assert_eq!(WeightAdjustment::for_outcome(AttendanceStatus::Late).apply(1), 2);
        assert_eq!(WeightAdjustment::for_outcome(AttendanceStatus::Late).apply(3), 6);
        assert_eq!(WeightAdjustment::for_outcome(AttendanceStatus::Late).apply(0), 2);
        assert_eq!(WeightAdjustment::Double.apply(u32::MAX), u32::MAX);
        assert_eq!(WeightAdjustment::for_outcome(AttendanceStatus::Absent).apply(4), 4);
    }

    #[test]
    fn labels_follow_locale() {
        assert_eq!(StudentStatus::Late.label(Locale::En), "late");
        assert_eq!(StudentStatus::Late.label(Locale::ZhCn), "迟到");
    }
}
