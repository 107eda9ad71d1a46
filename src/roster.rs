//! Roster import: delimited text in, a pending batch of new students out.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::db::Storage;
use crate::error::ImportError;
use crate::models::Student;

/// Column text that marks the first line as a header.
const HEADER_TOKENS: [&str; 2] = ["name", "姓名"];

/// Used when no default roster file can be found.
pub const FALLBACK_NAMES: [&str; 12] = [
    "Avery Lee",
    "Jules Moreno",
    "Kiara Patel",
    "Noah Fischer",
    "Mei Chen",
    "Samir Haddad",
    "Lucia Romero",
    "Tomás Silva",
    "Hana Sato",
    "Oliver Brooks",
    "Priya Nair",
    "Elena Petrova",
];

/// Parse roster text into new students. Pure apart from id and clock.
pub fn parse_roster(text: &str) -> Vec<Student> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut students = Vec::new();

    for (index, raw_line) in text.split('\n').enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split(',').map(str::trim).collect();

        if index == 0 && columns.iter().any(|column| is_header(column)) {
            continue;
        }

        let name = if columns.len() > 1 { columns[1] } else { columns[0] };

        if !name.is_empty() && seen.insert(name) {
            students.push(Student::new(name));
        }
    }

    students
}

fn is_header(column: &str) -> bool {
    let lowered = column.to_lowercase();
    HEADER_TOKENS.iter().any(|token| lowered.contains(token))
}

/// Students parsed but not yet saved.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    students: Vec<Student>,
}

impl ImportBatch {
    pub fn from_text(text: &str) -> Result<Self, ImportError> {
        let students = parse_roster(text);
        if students.is_empty() {
            return Err(ImportError::Empty);
        }
        Ok(Self { students })
    }

    pub async fn from_file(path: &Path) -> Result<Self, ImportError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ImportError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_text(&text)
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// The first `limit` names and how many more follow.
    pub fn preview(&self, limit: usize) -> (Vec<&str>, usize) {
        let names = self
            .students
            .iter()
            .take(limit)
            .map(|s| s.name.as_str())
            .collect();
        (names, self.students.len().saturating_sub(limit))
    }

    /// Save every student in one transaction. The batch is consumed either way.
    pub async fn commit(self, storage: &Storage) -> Result<usize, ImportError> {
        storage.add_students(&self.students).await?;
        info!("Imported {} students", self.students.len());
        Ok(self.students.len())
    }
}

/// Where a default roster came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterSource {
    File(PathBuf),
    Fallback,
}

/// Try each candidate file in order; fall back to [`FALLBACK_NAMES`].
pub async fn load_default_roster(candidates: &[PathBuf]) -> (ImportBatch, RosterSource) {
    for candidate in candidates {
        match fetch_candidate(candidate).await {
            Ok(batch) => {
                debug!("Default roster loaded from {}", candidate.display());
                return (batch, RosterSource::File(candidate.clone()));
            }
            Err(err) => warn!("{err}"),
        }
    }

    info!("No default roster file found, using built-in names");
    let students = FALLBACK_NAMES.iter().map(|name| Student::new(*name)).collect();
    (ImportBatch { students }, RosterSource::Fallback)
}

async fn fetch_candidate(path: &Path) -> Result<ImportBatch, ImportError> {
    let fetch_error = |reason: String| ImportError::Fetch {
        location: path.display().to_string(),
        reason,
    };

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    ImportBatch::from_text(&text).map_err(|e| fetch_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(students: &[Student]) -> Vec<&str> {
        students.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let students = parse_roster("Alice\nBob\nAlice");
        assert_eq!(names(&students), vec!["Alice", "Bob"]);
    }

    #[test]
    fn header_row_is_skipped() {
        let students = parse_roster("id,name\n1,Alice");
        assert_eq!(names(&students), vec!["Alice"]);

        let localized = parse_roster("学号,姓名\r\n1,张三\r\n2,李四\r\n");
        assert_eq!(names(&localized), vec!["张三", "李四"]);
    }

    #[test]
    fn header_tokens_only_count_on_the_first_line() {
        let students = parse_roster("Bob\nUsername");
        assert_eq!(names(&students), vec!["Bob", "Username"]);
    }

    #[test]
    fn multi_column_lines_use_second_column() {
        let students = parse_roster(" 1 , Avery Lee , 2026\n2,,x\r\n\n   \nKiara Patel\n");
        assert_eq!(names(&students), vec!["Avery Lee", "Kiara Patel"]);
    }

    #[test]
    fn new_students_have_defaults_and_distinct_ids() {
        let first = parse_roster("Alice\nBob");
        let second = parse_roster("Alice\nBob");

        assert_eq!(names(&first), names(&second));
        assert_ne!(first[0].id, second[0].id);
        assert_ne!(first[0].id, first[1].id);
        assert!(first.iter().all(|s| s.weight == 1));
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let students = parse_roster("\u{feff}name\nAlice");
        assert_eq!(names(&students), vec!["Alice"]);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            ImportBatch::from_text("name\n  \n\n"),
            Err(ImportError::Empty)
        ));
    }

    #[test]
    fn preview_reports_remainder() {
        let text: String = (0..25).map(|i| format!("Student {i}\n")).collect();
        let batch = ImportBatch::from_text(&text).unwrap();

        let (shown, more) = batch.preview(20);
        assert_eq!(shown.len(), 20);
        assert_eq!(more, 5);
        assert_eq!(batch.preview(30).1, 0);
    }

    #[tokio::test]
    async fn commit_saves_the_batch() {
        let storage = Storage::open_in_memory().await.unwrap();
        let batch = ImportBatch::from_text("Alice\nBob").unwrap();

        assert_eq!(batch.commit(&storage).await.unwrap(), 2);
        assert_eq!(storage.count_students().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_commit_reports_storage_error() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.close().await;

        let batch = ImportBatch::from_text("Alice").unwrap();
        assert!(matches!(
            batch.commit(&storage).await,
            Err(ImportError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn default_roster_prefers_first_readable_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.csv");
        let good = dir.path().join("students.csv");
        std::fs::write(&empty, "name\n").unwrap();
        std::fs::write(&good, "id,name\n1,Hana Sato\n2,Priya Nair\n").unwrap();

        let candidates = vec![dir.path().join("missing.csv"), empty, good.clone()];
        let (batch, source) = load_default_roster(&candidates).await;

        assert_eq!(source, RosterSource::File(good));
        assert_eq!(names(batch.students()), vec!["Hana Sato", "Priya Nair"]);
    }

    #[tokio::test]
    async fn default_roster_falls_back_to_built_in_names() {
        let (batch, source) = load_default_roster(&[PathBuf::from("/nonexistent/roster.csv")]).await;

        assert_eq!(source, RosterSource::Fallback);
        assert_eq!(batch.len(), FALLBACK_NAMES.len());
    }
}
