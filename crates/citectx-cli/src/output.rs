use std::io::Write;

use citectx_core::{EquivalenceClass, InspectionReport, ProgressEvent, TermBucket};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Resolved {
            titles,
            pub_ids,
            rounds,
        } => {
            writeln!(
                w,
                "Resolved {} title variants via {} identifiers in {} rounds",
                titles, pub_ids, rounds
            )?;
        }
        ProgressEvent::Located { citations } => {
            writeln!(w, "Found {} citations", citations)?;
        }
        ProgressEvent::DocumentDone { .. } => {
            // Shown in the final report
        }
        ProgressEvent::DocumentSkipped {
            citing_file,
            reason,
        } => {
            if color.enabled() {
                writeln!(w, "{} {}: {}", "SKIPPED:".yellow(), citing_file, reason)?;
            } else {
                writeln!(w, "SKIPPED: {}: {}", citing_file, reason)?;
            }
        }
    }
    Ok(())
}

/// Print `(count, title)` pairs, most cited first.
pub fn print_most_cited(
    w: &mut dyn Write,
    buckets: &[TermBucket],
    color: ColorMode,
) -> std::io::Result<()> {
    if buckets.is_empty() {
        writeln!(w, "The index holds no titles")?;
        return Ok(());
    }
    let width = buckets
        .iter()
        .map(|b| b.count.to_string().len())
        .max()
        .unwrap_or(1);
    for bucket in buckets {
        if color.enabled() {
            writeln!(
                w,
                "{:>width$}  {}",
                bucket.count.bold(),
                bucket.key,
                width = width
            )?;
        } else {
            writeln!(w, "{:>width$}  {}", bucket.count, bucket.key, width = width)?;
        }
    }
    Ok(())
}

/// Print the titles and identifiers of one work.
pub fn print_equivalence_class(
    w: &mut dyn Write,
    class: &EquivalenceClass,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} ({})", "Titles".bold(), class.titles.len())?;
    } else {
        writeln!(w, "Titles ({})", class.titles.len())?;
    }
    for title in &class.titles {
        if color.enabled() {
            writeln!(w, "  {}", title.cyan())?;
        } else {
            writeln!(w, "  {}", title)?;
        }
    }
    writeln!(w)?;

    if color.enabled() {
        writeln!(w, "{} ({})", "Identifiers".bold(), class.pub_ids.len())?;
    } else {
        writeln!(w, "Identifiers ({})", class.pub_ids.len())?;
    }
    for pub_id in &class.pub_ids {
        writeln!(w, "  {}", pub_id)?;
    }
    if color.enabled() {
        writeln!(w, "{}", format!("({} rounds)", class.rounds).dimmed())?;
    } else {
        writeln!(w, "({} rounds)", class.rounds)?;
    }
    Ok(())
}

/// Print every context window, then a one-line summary.
pub fn print_report(
    w: &mut dyn Write,
    report: &InspectionReport,
    color: ColorMode,
) -> std::io::Result<()> {
    for context in &report.contexts {
        writeln!(w)?;
        let location = format!("{} #{}", context.citing_file, context.marker_id);
        if color.enabled() {
            writeln!(w, "{}", location.dimmed())?;
            writeln!(
                w,
                "{} {} {}",
                context.window.before,
                "[*]".green().bold(),
                context.window.after
            )?;
        } else {
            writeln!(w, "{}", location)?;
            writeln!(w, "{} [*] {}", context.window.before, context.window.after)?;
        }
    }

    writeln!(w)?;
    let summary = format!(
        "{} contexts from {} citations across {} title variants",
        report.contexts.len(),
        report.citations.len(),
        report.class.titles.len()
    );
    if color.enabled() {
        writeln!(w, "{}", summary.bold())?;
    } else {
        writeln!(w, "{}", summary)?;
    }
    if !report.failed.is_empty() {
        let failed = format!("{} documents could not be read", report.failed.len());
        if color.enabled() {
            writeln!(w, "{}", failed.yellow())?;
        } else {
            writeln!(w, "{}", failed)?;
        }
    }
    Ok(())
}
