//! # Pretty Printing - Terminal Rendering of Index Data
//!
//! Colored terminal output for what the CLI shows: namespace listings, ranked search
//! matches, and collection/sample summaries.
//!
//! Every function writes to any [`Write`] so it can render to `stdout` in the binary and
//! to a `Vec<u8>` in tests. Colors come from `crossterm` commands queued on the writer.
//!
//! ## Score colors
//!
//! | Score        | Color  |
//! |--------------|--------|
//! | `>= 0.8`     | Green  |
//! | `>= 0.5`     | Yellow |
//! | below        | Red    |
//!
//! ## Example
//!
//! ```no_run
//! use medvec::pretty::print_namespaces;
//! use medvec::vector_store::NamespaceInfo;
//! use std::io::stdout;
//!
//! let namespaces = vec![NamespaceInfo { name: "cardiology".into(), record_count: 1200 }];
//! print_namespaces(&mut stdout(), &namespaces).unwrap();
//! ```

use crate::collector::CollectionOutcome;
use crate::sampler::SampleBatch;
use crate::vector_store::{NamespaceInfo, QueryResponse, SearchMatch};
use crossterm::{
    QueueableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::io::Write;

const METADATA_FIELDS: usize = 4;
const METADATA_VALUE_WIDTH: usize = 60;

fn styled<W: Write>(
    out: &mut W,
    color: Color,
    bold: bool,
    text: &str,
) -> Result<(), Box<dyn Error>> {
    out.queue(SetForegroundColor(color))?;
    if bold {
        out.queue(SetAttribute(Attribute::Bold))?;
    }
    write!(out, "{text}")?;
    out.queue(SetAttribute(Attribute::Reset))?;
    out.queue(SetForegroundColor(Color::Reset))?;
    Ok(())
}

fn header<W: Write>(out: &mut W, text: &str) -> Result<(), Box<dyn Error>> {
    styled(out, Color::Cyan, true, text)?;
    writeln!(out)?;
    Ok(())
}

/// Color for a similarity score.
pub fn score_color(score: f32) -> Color {
    if score >= 0.8 {
        Color::Green
    } else if score >= 0.5 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `…`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// One-line `key=value` digest of the first few metadata fields, in key order.
pub fn metadata_summary(metadata: &Map<String, JsonValue>) -> String {
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    let mut parts: Vec<String> = keys
        .iter()
        .take(METADATA_FIELDS)
        .map(|key| {
            let value = match &metadata[key.as_str()] {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{key}={}", truncate(value.trim(), METADATA_VALUE_WIDTH))
        })
        .collect();
    if metadata.len() > METADATA_FIELDS {
        parts.push(format!("(+{} more)", metadata.len() - METADATA_FIELDS));
    }
    parts.join("  ")
}

pub fn print_namespaces<W: Write>(
    out: &mut W,
    namespaces: &[NamespaceInfo],
) -> Result<(), Box<dyn Error>> {
    header(out, &format!("{} namespace(s)", namespaces.len()))?;
    let width = namespaces.iter().map(|n| n.name.len()).max().unwrap_or(0);
    for namespace in namespaces {
        styled(out, Color::White, true, &format!("  {:<width$}", namespace.name))?;
        writeln!(out, "  {} records", namespace.record_count)?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_namespace<W: Write>(out: &mut W, namespace: &NamespaceInfo) -> Result<(), Box<dyn Error>> {
    header(out, &namespace.name)?;
    writeln!(out, "  records: {}", namespace.record_count)?;
    out.flush()?;
    Ok(())
}

fn print_match<W: Write>(out: &mut W, rank: usize, m: &SearchMatch) -> Result<(), Box<dyn Error>> {
    write!(out, "{rank:>3}. ")?;
    styled(out, score_color(m.score), true, &format!("{:.4}", m.score))?;
    write!(out, "  ")?;
    styled(out, Color::White, false, &m.id)?;
    writeln!(out)?;
    if let Some(metadata) = m.metadata.as_ref().filter(|m| !m.is_empty()) {
        styled(out, Color::DarkGrey, false, &format!("     {}", metadata_summary(metadata)))?;
        writeln!(out)?;
    }
    Ok(())
}

/// Ranked matches of a semantic search, best first.
pub fn print_matches<W: Write>(
    out: &mut W,
    query: &str,
    response: &QueryResponse,
) -> Result<(), Box<dyn Error>> {
    header(
        out,
        &format!(
            "{} result(s) for \"{}\" in {}",
            response.matches.len(),
            query,
            response.namespace
        ),
    )?;
    if response.matches.is_empty() {
        styled(out, Color::Yellow, false, "  no matches")?;
        writeln!(out)?;
    }
    for (i, m) in response.matches.iter().enumerate() {
        print_match(out, i + 1, m)?;
    }
    if let Some(usage) = &response.usage {
        styled(out, Color::DarkGrey, false, &format!("read units: {}", usage.read_units))?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_collection_summary<W: Write>(
    out: &mut W,
    outcome: &CollectionOutcome,
) -> Result<(), Box<dyn Error>> {
    header(out, "Collection")?;
    writeln!(out, "  vectors:    {}", outcome.vectors.len())?;
    writeln!(out, "  pages:      {}", outcome.steps)?;
    writeln!(out, "  namespaces: {}", outcome.namespaces_count)?;
    if !outcome.namespaces.is_empty() {
        writeln!(out, "  visited:    {}", outcome.namespaces.join(", "))?;
    }
    if outcome.has_more {
        styled(out, Color::Yellow, false, "  page limit reached, more vectors remain")?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

pub fn print_sample_summary<W: Write>(out: &mut W, batch: &SampleBatch) -> Result<(), Box<dyn Error>> {
    header(out, "Sample")?;
    if let Some(namespace) = &batch.selected_namespace {
        writeln!(out, "  namespace:  {namespace}")?;
    }
    writeln!(out, "  vectors:    {}", batch.total_sampled_vectors)?;
    writeln!(out, "  namespaces: {}", batch.namespaces_count)?;
    writeln!(out, "  per namespace: up to {}", batch.max_vectors_per_namespace)?;
    if !batch.skipped.is_empty() {
        styled(
            out,
            Color::Red,
            false,
            &format!("  skipped:    {}", batch.skipped.join(", ")),
        )?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
