use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an integrity test over every entry of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub entries_checked: u32,
}

impl TestResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            entries_checked: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.entries_checked += 1;
    }

    pub fn record_failure(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for TestResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid {
            write!(f, "Archive is valid. {} entries checked.", self.entries_checked)
        } else {
            write!(f, "Archive has errors:\n{}", self.errors.join("\n"))
        }
    }
}
