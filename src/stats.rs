/// Counters collected during a conversion run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConversionStats {
    pub pages_written: u64,
    pub revisions_written: u64,
    pub statements_written: u64,
    pub bytes_written: u64,
    pub ignored_fields: u64,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages(&mut self) {
        self.pages_written += 1;
    }

    pub fn inc_revisions(&mut self) {
        self.revisions_written += 1;
    }

    pub fn inc_ignored(&mut self) {
        self.ignored_fields += 1;
    }

    /// Copies the writer-side totals once output is complete.
    pub fn set_output_totals(&mut self, statements: u64, bytes: u64) {
        self.statements_written = statements;
        self.bytes_written = bytes;
    }

    pub fn pages(&self) -> u64 {
        self.pages_written
    }

    pub fn revisions(&self) -> u64 {
        self.revisions_written
    }

    pub fn statements(&self) -> u64 {
        self.statements_written
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_written
    }

    pub fn ignored(&self) -> u64 {
        self.ignored_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = ConversionStats::new();
        assert_eq!(stats.pages(), 0);
        assert_eq!(stats.revisions(), 0);
        assert_eq!(stats.statements(), 0);
        assert_eq!(stats.bytes(), 0);
        assert_eq!(stats.ignored(), 0);
    }

    #[test]
    fn inc_counters() {
        let mut stats = ConversionStats::new();
        stats.inc_pages();
        stats.inc_revisions();
        stats.inc_revisions();
        stats.inc_ignored();
        assert_eq!(stats.pages(), 1);
        assert_eq!(stats.revisions(), 2);
        assert_eq!(stats.ignored(), 1);
    }

    #[test]
    fn output_totals_overwrite() {
        let mut stats = ConversionStats::new();
        stats.set_output_totals(3, 100);
        stats.set_output_totals(4, 250);
        assert_eq!(stats.statements(), 4);
        assert_eq!(stats.bytes(), 250);
    }
}
