//! Output rendering and formatting

use crate::commands::{CachedPackage, OperationResult, PlannedNode};
use crate::events::format_duration;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::{Style, Term};
use kiln_cache::{CacheStatistics, CleanReport};
use kiln_types::{BuildReport, ColorChoice, NodeState, TestOutcome};
use std::io;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    /// Color configuration
    color_choice: ColorChoice,
    /// Terminal instance
    term: Term,
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool, color_choice: ColorChoice) -> Self {
        Self {
            json_output,
            color_choice,
            term: Term::stdout(),
        }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            self.render_json(result)
        } else {
            self.render_table(result)
        }
    }

    fn render_json(&self, result: &OperationResult) -> io::Result<()> {
        let json = result.to_json().map_err(io::Error::other)?;
        self.term.write_line(&json)
    }

    fn render_table(&self, result: &OperationResult) -> io::Result<()> {
        match result {
            OperationResult::BuildReport(report) => self.render_build_report(report),
            OperationResult::Resolution(nodes) => self.render_resolution(nodes),
            OperationResult::CacheList(entries) => self.render_cache_list(entries),
            OperationResult::CacheStats(stats) => self.render_cache_stats(stats),
            OperationResult::CacheCleaned(report) => self.render_clean_report(report),
        }
    }

    /// One row per node in topological order, then a summary line
    fn render_build_report(&self, report: &BuildReport) -> io::Result<()> {
        let mut table = self.table(&["Package", "Context", "State", "Test", "Time", "Details"]);

        for node in &report.nodes {
            let details = match &node.state {
                NodeState::Failed { code, message } => format!("{code}: {message}"),
                NodeState::Skipped(_) => node.state.to_string(),
                NodeState::Built | NodeState::Cached => node.fingerprint.clone().unwrap_or_default(),
            };
            table.add_row(vec![
                Cell::new(node.package.to_string()),
                Cell::new(node.context.to_string()),
                self.state_cell(&node.state),
                self.test_cell(&node.test),
                Cell::new(format_duration(node.duration_ms)),
                Cell::new(details),
            ]);
        }
        self.term.write_line(&table.to_string())?;

        let summary = report.summary();
        let line = format!(
            "{} built, {} cached, {} failed, {} skipped, {} tests failed in {}",
            summary.built,
            summary.cached,
            summary.failed,
            summary.skipped,
            summary.tests_failed,
            format_duration(report.duration_ms)
        );
        let style = if report.is_success() && summary.tests_failed == 0 {
            Style::new().green()
        } else {
            Style::new().red()
        };
        self.term.write_line(&self.paint(&style, &line))
    }

    fn render_resolution(&self, nodes: &[PlannedNode]) -> io::Result<()> {
        if nodes.is_empty() {
            return self.term.write_line("Nothing to build.");
        }

        let mut table = self.table(&["#", "Package", "Context", "Kind", "Fingerprint", "Requires", "Cached"]);
        for (index, node) in nodes.iter().enumerate() {
            let mut requires = node.links.clone();
            requires.extend(node.tools.iter().map(|tool| format!("{tool} [tool]")));
            let cached = if node.cached {
                self.colored(Cell::new("yes"), Color::Green)
            } else {
                Cell::new("no")
            };
            table.add_row(vec![
                Cell::new(index + 1),
                Cell::new(&node.package),
                Cell::new(node.context.to_string()),
                Cell::new(node.kind.to_string()),
                Cell::new(&node.fingerprint),
                Cell::new(requires.join("\n")),
                cached,
            ]);
        }
        self.term.write_line(&table.to_string())
    }

    fn render_cache_list(&self, entries: &[CachedPackage]) -> io::Result<()> {
        if entries.is_empty() {
            return self.term.write_line("Cache is empty.");
        }

        let mut table = self.table(&["Package", "Context", "Kind", "Fingerprint", "Size", "Created"]);
        for entry in entries {
            table.add_row(vec![
                Cell::new(&entry.package),
                Cell::new(entry.context.to_string()),
                Cell::new(entry.kind.to_string()),
                Cell::new(&entry.fingerprint),
                Cell::new(format_size(entry.size_bytes)),
                Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            ]);
        }
        self.term.write_line(&table.to_string())
    }

    fn render_cache_stats(&self, stats: &CacheStatistics) -> io::Result<()> {
        self.term.write_line(&format!("Entries:     {}", stats.entries))?;
        self.term.write_line(&format!("Packages:    {}", stats.packages))?;
        self.term.write_line(&format!("Total size:  {}", format_size(stats.total_bytes)))?;
        self.term.write_line(&format!("Build dirs:  {}", stats.build_dirs))
    }

    fn render_clean_report(&self, report: &CleanReport) -> io::Result<()> {
        self.term.write_line(&format!(
            "Removed {} entries and {} build directories, freed {}",
            report.entries_removed,
            report.build_dirs_removed,
            format_size(report.bytes_freed)
        ))
    }

    fn table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                headers
                    .iter()
                    .map(|header| Cell::new(header).add_attribute(Attribute::Bold)),
            );
        if !self.colors_enabled() {
            table.force_no_tty();
        }
        table
    }

    fn state_cell(&self, state: &NodeState) -> Cell {
        let cell = Cell::new(state.label());
        match state {
            NodeState::Built => self.colored(cell, Color::Green),
            NodeState::Cached => self.colored(cell, Color::Cyan),
            NodeState::Failed { .. } => self.colored(cell, Color::Red),
            NodeState::Skipped(_) => self.colored(cell, Color::Yellow),
        }
    }

    fn test_cell(&self, test: &TestOutcome) -> Cell {
        match test {
            TestOutcome::Passed => self.colored(Cell::new("passed"), Color::Green),
            TestOutcome::Failed { .. } => self.colored(Cell::new("failed"), Color::Red),
            TestOutcome::NotRun => Cell::new("-"),
        }
    }

    fn colored(&self, cell: Cell, color: Color) -> Cell {
        if self.colors_enabled() {
            cell.fg(color)
        } else {
            cell
        }
    }

    fn paint(&self, style: &Style, text: &str) -> String {
        if self.colors_enabled() {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn colors_enabled(&self) -> bool {
        match self.color_choice {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => self.term.features().colors_supported(),
        }
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
