//! Reading and writing mixture snapshots.
//!
//! A snapshot is a line-oriented text file: header comments carrying the
//! run id and the starting time, then one `%init:` line per species with
//! its count, size, and site-graph expression.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use crate::mixture::Mixture;
use crate::parsers::{complex_expr, ParsedComplex};
use crate::system::System;
use crate::ConfigError;

/// The payload of a parsed snapshot file.
#[derive(Debug, Default)]
pub struct SnapshotContents {
    pub time: f64,
    pub event: u64,
    pub species: Vec<(u64, ParsedComplex)>,
}

/// Writes a snapshot of the mixture, species in decreasing size order.
pub fn write(
    mix: &Mixture,
    sys: &System,
    time: f64,
    event: u64,
    path: &Path,
    labeled: bool,
) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "// Snapshot [Event: {event}]")?;
    writeln!(out, "// \"uuid\" : \"{}\"", sys.run_id)?;
    writeln!(out, "%def: \"T0\" \"{time}\"")?;
    writeln!(out)?;
    for m in mix
        .complexes
        .iter()
        .sorted_by_key(|m| std::cmp::Reverse(m.size))
    {
        writeln!(
            out,
            "%init: {} /*{} agents*/ {}",
            m.count,
            m.size,
            m.expression(labeled, &sys.sig)
        )?;
    }
    out.flush()
}

/// Reads a snapshot file back into parsed species. Unknown comment lines
/// are skipped; malformed `%init:` lines are configuration errors.
pub fn read(path: &Path) -> Result<SnapshotContents, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut contents = SnapshotContents::default();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let context = |msg: String| ConfigError::Directive {
            file: path.display().to_string(),
            line: lineno + 1,
            msg,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("// Snapshot [Event:") {
            let digits = rest.trim().trim_end_matches(']').trim();
            contents.event = digits
                .parse()
                .map_err(|_| context(format!("bad event count '{digits}'")))?;
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("%def:") {
            if let Some(value) = rest.trim().strip_prefix("\"T0\"") {
                let value = value.trim().trim_matches('"');
                contents.time = value
                    .parse()
                    .map_err(|_| context(format!("bad T0 value '{value}'")))?;
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("%init:") {
            let rest = rest.trim();
            let (count, rest) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| context("missing expression after count".into()))?;
            let count: u64 = count
                .parse()
                .map_err(|_| context(format!("bad species count '{count}'")))?;
            // Drop the /*n agents*/ annotation if present.
            let expr = match rest.split_once("*/") {
                Some((_, tail)) if rest.trim_start().starts_with("/*") => tail.trim(),
                _ => rest.trim(),
            };
            let parsed = match complex_expr(expr) {
                Ok(("", parsed)) => parsed,
                Ok((tail, _)) => return Err(context(format!("trailing input near '{tail}'"))),
                Err(err) => return Err(context(format!("{err}"))),
            };
            contents.species.push((count, parsed));
            continue;
        }
        return Err(context(format!("unrecognized line '{trimmed}'")));
    }
    Ok(contents)
}
