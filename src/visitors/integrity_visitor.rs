use crate::archive::EntryVisitor;
use crate::error::Result;
use crate::models::{ArchiveEntry, TestResult};
use std::io::{self, Read};
use tracing::warn;

/**
 * Reads every file entry to the end and collects failures
 *
 * A failing entry is recorded and the walk continues, so one pass reports
 * every damaged entry. Only the handler's own failures (an unreadable header,
 * cancellation) stop the walk.
 */
#[derive(Debug, Default)]
pub struct IntegrityVisitor {
    result: TestResult,
}

impl IntegrityVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> TestResult {
        self.result
    }
}

impl EntryVisitor for IntegrityVisitor {
    fn visit(&mut self, entry: &ArchiveEntry, content: Option<&mut dyn Read>) -> Result<()> {
        let Some(reader) = content else {
            return Ok(());
        };

        match io::copy(reader, &mut io::sink()) {
            Ok(_) => self.result.record_success(),
            Err(e) => {
                warn!(entry = %entry.full_name, error = %e, "Entry failed integrity check");
                self.result
                    .record_failure(format!("Error testing '{}': {}", entry.full_name, e));
            }
        }
        Ok(())
    }
}
