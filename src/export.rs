use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{error, info};

use crate::config::Locale;
use crate::db::Storage;
use crate::error::ExportError;
use crate::models::AttendanceRecord;
use crate::notify::Notifier;

const BOM: &str = "\u{feff}";
const MISSING_NOTE: &str = "-";

/// Inclusive instant range for record filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// From the start of `first` to the last millisecond of `last`, local time.
    pub fn from_local_dates(first: NaiveDate, last: NaiveDate) -> Option<Self> {
        let start = Local
            .from_local_datetime(&first.and_time(NaiveTime::MIN))
            .earliest()?;
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
        let end = Local.from_local_datetime(&last.and_time(end_of_day)).latest()?;

        Some(Self::new(start.with_timezone(&Utc), end.with_timezone(&Utc)))
    }
}

pub fn header_row(locale: Locale) -> [&'static str; 5] {
    match locale {
        Locale::En => ["timestamp", "student name", "type", "status", "note"],
        Locale::ZhCn => ["时间", "学生姓名", "类型", "状态", "备注"],
    }
}

pub fn file_label(locale: Locale) -> &'static str {
    match locale {
        Locale::En => "attendance_records",
        Locale::ZhCn => "签到记录",
    }
}

/// `<label>_<YYYY-MM-DD>.csv`
pub fn export_filename(locale: Locale, date: NaiveDate) -> String {
    format!("{}_{}.csv", file_label(locale), date.format("%Y-%m-%d"))
}

/// Local date-time for display, e.g. `2026/1/5 14:03:07`.
pub fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y/%-m/%-d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

/// BOM, header, then one row per record in the given order.
pub fn records_to_csv(records: &[AttendanceRecord], locale: Locale) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(BOM.as_bytes());

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(buffer);

    writer.write_record(header_row(locale))?;

    for record in records {
        writer.write_record([
            format_timestamp(record.timestamp).as_str(),
            record.student_name.as_str(),
            record.record_type.as_str(),
            record.status.as_str(),
            record.note.as_deref().unwrap_or(MISSING_NOTE),
        ])?;
    }

    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub contents: Vec<u8>,
    pub record_count: usize,
}

impl ExportFile {
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.filename);
        tokio::fs::write(&path, &self.contents).await?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    /// No records matched; nothing should be written.
    Nothing,
    Ready(ExportFile),
}

/// Load, sort and serialize the records in `range` (all records if `None`).
pub async fn export_records(
    storage: &Storage,
    range: Option<DateRange>,
    locale: Locale,
    today: NaiveDate,
) -> Result<ExportOutcome, ExportError> {
    let mut records = match range {
        Some(range) => {
            storage
                .get_records_by_date_range(range.start, range.end)
                .await?
        }
        None => storage.get_all_records().await?,
    };

    if records.is_empty() {
        return Ok(ExportOutcome::Nothing);
    }

    records.sort_by_key(|record| record.timestamp);

    Ok(ExportOutcome::Ready(ExportFile {
        filename: export_filename(locale, today),
        contents: records_to_csv(&records, locale)?,
        record_count: records.len(),
    }))
}

/// Export to `out_dir`, reporting the outcome through `notifier`.
pub async fn run_export(
    storage: &Storage,
    notifier: &dyn Notifier,
    range: Option<DateRange>,
    locale: Locale,
    out_dir: &Path,
) -> Option<PathBuf> {
    let today = Local::now().date_naive();
    let written = match export_records(storage, range, locale, today).await {
        Ok(ExportOutcome::Nothing) => {
            notifier.warning("No records to export");
            return None;
        }
        Ok(ExportOutcome::Ready(file)) => match file.write_to(out_dir).await {
            Ok(path) => Ok((path, file)),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    match written {
        Ok((path, file)) => {
            info!("Exported {} records to {}", file.record_count, path.display());
            notifier.success(&format!(
                "Exported {} records to {}",
                file.record_count,
                path.display()
            ));
            Some(path)
        }
        Err(err) => {
            error!("Export failed: {err}");
            notifier.error(&format!("Export failed: {err}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttendanceStatus, RecordType, Student};
    use crate::notify::{MemoryNotifier, NoticeLevel};
    use uuid::Uuid;

    fn record(name: &str, status: AttendanceStatus, note: Option<&str>, ts: i64) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            student_name: name.to_string(),
            record_type: RecordType::Draw,
            status,
            note: note.map(str::to_string),
            timestamp: ts,
        }
    }

    fn parse_body(bytes: &[u8]) -> Vec<csv::StringRecord> {
        let text = std::str::from_utf8(bytes).unwrap();
        let body = text.strip_prefix(BOM).expect("missing byte-order mark");
        csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(body.as_bytes())
            .records()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn csv_starts_with_bom_and_header() {
        let bytes = records_to_csv(&[], Locale::En).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "\u{feff}timestamp,student name,type,status,note\n");

        let localized = String::from_utf8(records_to_csv(&[], Locale::ZhCn).unwrap()).unwrap();
        assert!(localized.starts_with("\u{feff}时间,学生姓名,类型,状态,备注"));
    }

    #[test]
    fn commas_are_quoted_and_missing_notes_become_dashes() {
        let records = vec![
            record("Lee, Avery", AttendanceStatus::Late, Some("bus, again"), 1_000),
            record("Kiara Patel", AttendanceStatus::Present, None, 2_000),
        ];
        let text = String::from_utf8(records_to_csv(&records, Locale::En).unwrap()).unwrap();

        assert!(text.contains("\"Lee, Avery\",draw,late,\"bus, again\""));
        assert!(text.contains("Kiara Patel,draw,present,-"));
    }

    #[test]
    fn filenames_carry_label_and_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(export_filename(Locale::En, date), "attendance_records_2026-03-09.csv");
        assert_eq!(export_filename(Locale::ZhCn, date), "签到记录_2026-03-09.csv");
    }

    #[test]
    fn local_date_range_covers_whole_days() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let range = DateRange::from_local_dates(day, day).unwrap();
        let span = range.end - range.start;
        assert_eq!(span.num_milliseconds(), 24 * 60 * 60 * 1000 - 1);
    }

    #[tokio::test]
    async fn export_round_trips_through_csv() {
        let storage = Storage::open_in_memory().await.unwrap();
        let student = Student::new("Avery Lee");
        let stored = vec![
            record("Jules Moreno", AttendanceStatus::Absent, Some("sick, excused"), 3_000),
            AttendanceRecord::for_draw(&student, AttendanceStatus::Present, None),
            record("Kiara Patel", AttendanceStatus::Late, Some("traffic"), 1_000),
        ];
        for r in &stored {
            storage.add_record(r).await.unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let file = match export_records(&storage, None, Locale::En, today).await.unwrap() {
            ExportOutcome::Ready(file) => file,
            ExportOutcome::Nothing => panic!("expected an export"),
        };
        assert_eq!(file.record_count, 3);

        let mut expected = stored.clone();
        expected.sort_by_key(|r| r.timestamp);

        let rows = parse_body(&file.contents);
        assert_eq!(rows.len(), expected.len());
        for (row, record) in rows.iter().zip(expected.iter()) {
            assert_eq!(&row[0], format_timestamp(record.timestamp));
            assert_eq!(&row[1], record.student_name);
            assert_eq!(&row[2], record.record_type.as_str());
            assert_eq!(&row[3], record.status.as_str());
            assert_eq!(&row[4], record.note.as_deref().unwrap_or("-"));
        }
    }

    #[tokio::test]
    async fn range_filter_applies_and_empty_range_exports_nothing() {
        let storage = Storage::open_in_memory().await.unwrap();
        for ts in [1_000, 2_000, 3_000] {
            storage
                .add_record(&record("Hana Sato", AttendanceStatus::Present, None, ts))
                .await
                .unwrap();
        }
        let today = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let instant = |ms| Utc.timestamp_millis_opt(ms).unwrap();

        let some = export_records(
            &storage,
            Some(DateRange::new(instant(1_500), instant(3_000))),
            Locale::En,
            today,
        )
        .await
        .unwrap();
        assert!(matches!(some, ExportOutcome::Ready(ref f) if f.record_count == 2));

        let none = export_records(
            &storage,
            Some(DateRange::new(instant(5_000), instant(6_000))),
            Locale::En,
            today,
        )
        .await
        .unwrap();
        assert!(matches!(none, ExportOutcome::Nothing));
    }

    #[tokio::test]
    async fn run_export_writes_file_or_warns() {
        let storage = Storage::open_in_memory().await.unwrap();
        let notifier = MemoryNotifier::new(true);
        let dir = tempfile::tempdir().unwrap();

        let nothing = run_export(&storage, &notifier, None, Locale::En, dir.path()).await;
        assert!(nothing.is_none());
        assert_eq!(notifier.levels(), vec![NoticeLevel::Warning]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        storage
            .add_record(&record("Hana Sato", AttendanceStatus::Late, None, 1_000))
            .await
            .unwrap();
        let path = run_export(&storage, &notifier, None, Locale::En, dir.path())
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(notifier.levels().last(), Some(&NoticeLevel::Success));
    }
}
