//! User-facing notices and confirmations.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
    Warning,
    Info,
}

impl NoticeLevel {
    pub fn icon(self) -> &'static str {
        match self {
            NoticeLevel::Success => "✓",
            NoticeLevel::Error => "✕",
            NoticeLevel::Warning => "⚠",
            NoticeLevel::Info => "ℹ",
        }
    }
}

/// Presentation seam: shows notices and asks yes/no questions.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);

    fn confirm(&self, prompt: &str) -> bool;

    fn success(&self, message: &str) {
        self.notify(NoticeLevel::Success, message);
    }

    fn error(&self, message: &str) {
        self.notify(NoticeLevel::Error, message);
    }

    fn warning(&self, message: &str) {
        self.notify(NoticeLevel::Warning, message);
    }

    fn info(&self, message: &str) {
        self.notify(NoticeLevel::Info, message);
    }
}

/// Prints to the terminal and reads confirmations from stdin.
pub struct ConsoleNotifier {
    assume_yes: bool,
}

impl ConsoleNotifier {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Error | NoticeLevel::Warning => {
                eprintln!("{} {}", level.icon(), message)
            }
            NoticeLevel::Success | NoticeLevel::Info => println!("{} {}", level.icon(), message),
        }
    }

    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }

        print!("{prompt} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Keeps notices in memory and answers every confirmation the same way.
pub struct MemoryNotifier {
    answer: bool,
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl MemoryNotifier {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    pub fn levels(&self) -> Vec<NoticeLevel> {
        self.notices().into_iter().map(|(level, _)| level).collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push((level, message.to_string()));
        }
    }

    fn confirm(&self, _prompt: &str) -> bool {
        self.answer
    }
}
