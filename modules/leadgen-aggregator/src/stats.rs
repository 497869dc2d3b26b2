/// Counters from one aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationStats {
    pub raw_scraped: usize,
    pub canonical_records: usize,
    pub duplicates_collapsed: usize,
    pub merges_run: u32,
    pub ticks_skipped: u32,
    pub merge_failures: u32,
    pub source_failures: u32,
    pub sources_cancelled: u32,
}

impl std::fmt::Display for AggregationStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Aggregation Run Complete ===")?;
        writeln!(f, "Raw records:        {}", self.raw_scraped)?;
        writeln!(f, "Canonical records:  {}", self.canonical_records)?;
        writeln!(f, "Duplicates merged:  {}", self.duplicates_collapsed)?;
        writeln!(f, "Merges run:         {}", self.merges_run)?;
        writeln!(f, "Ticks skipped:      {}", self.ticks_skipped)?;
        if self.merge_failures > 0 {
            writeln!(f, "Merge failures:     {}", self.merge_failures)?;
        }
        writeln!(f, "Sources failed:     {}", self.source_failures)?;
        if self.sources_cancelled > 0 {
            writeln!(f, "Sources cancelled:  {}", self.sources_cancelled)?;
        }
        Ok(())
    }
}
