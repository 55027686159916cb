use std::{collections::BTreeMap, fmt};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    frame::{Column, Frame},
};

static SCHEDULER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("(prio|rr)").expect("static scheduler pattern"));

// A resource tag must start a token, so the `io` inside `prio` is not a match.
static RESOURCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?:^|[^a-z])(cpu|io|mem)").expect("static resource pattern"));

/// Scheduler under which an experiment ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scheduler {
    /// Priority scheduler (`prio` in the file name).
    #[serde(rename = "PRIORITY")]
    Priority,
    /// Round-robin scheduler (`rr` in the file name).
    #[serde(rename = "RR")]
    Rr,
}

impl Scheduler {
    /// Label used in indicator column names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Priority => "PRIORITY",
            Self::Rr => "RR",
        }
    }

    /// First scheduler tag in a (lowercase) source file name.
    #[must_use]
    pub fn from_source(source: &str) -> Option<Self> {
        let source = source.to_lowercase();
        let caps = SCHEDULER_PATTERN.captures(&source)?;
        match caps.get(1)?.as_str() {
            "prio" => Some(Self::Priority),
            "rr" => Some(Self::Rr),
            _ => None,
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resource an experiment stressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resource {
    /// CPU-bound workload.
    Cpu,
    /// IO-bound workload.
    Io,
    /// Memory-bound workload.
    Mem,
}

impl Resource {
    /// Label used in indicator column names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Io => "IO",
            Self::Mem => "MEM",
        }
    }

    /// First resource tag in a (lowercase) source file name.
    #[must_use]
    pub fn from_source(source: &str) -> Option<Self> {
        let source = source.to_lowercase();
        let caps = RESOURCE_PATTERN.captures(&source)?;
        match caps.get(1)?.as_str() {
            "cpu" => Some(Self::Cpu),
            "io" => Some(Self::Io),
            "mem" => Some(Self::Mem),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lowercases the source column and appends `scheduler` and `resource`
/// text columns derived from it. Unmatched names leave the cells unset.
pub fn categorize(frame: &mut Frame, source_column: &str, context: &str) -> Result<()> {
    // A header-only file reads back as an empty numeric column.
    let sources: Vec<Option<String>> = frame
        .require(source_column, context)?
        .to_text()
        .into_iter()
        .map(|value| value.map(|name| name.to_lowercase()))
        .collect();
    let schedulers = sources
        .iter()
        .map(|source| {
            source
                .as_deref()
                .and_then(Scheduler::from_source)
                .map(|s| s.label().to_string())
        })
        .collect();
    let resources = sources
        .iter()
        .map(|source| {
            source
                .as_deref()
                .and_then(Resource::from_source)
                .map(|r| r.label().to_string())
        })
        .collect();
    frame.set_column(source_column, Column::Text(sources))?;
    frame.set_column(super::SCHEDULER_FIELD, Column::Text(schedulers))?;
    frame.set_column(super::RESOURCE_FIELD, Column::Text(resources))?;
    Ok(())
}

/// One previewed row of the combined dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedRow {
    /// Lowercase source file name.
    pub source_file: String,
    /// Derived scheduler, if any.
    pub scheduler: Option<Scheduler>,
    /// Derived resource, if any.
    pub resource: Option<Resource>,
}

/// Category assignment overview for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryPreview {
    /// First rows.
    pub head: Vec<CategorizedRow>,
    /// Rows per scheduler label (`unset` for no match).
    pub schedulers: BTreeMap<String, usize>,
    /// Rows per resource label (`unset` for no match).
    pub resources: BTreeMap<String, usize>,
}

impl CategoryPreview {
    /// Builds the preview from the raw source column.
    pub fn from_frame(frame: &Frame, source_column: &str, limit: usize) -> Result<Self> {
        let values = frame.require(source_column, "combined dataset")?.to_text();
        let mut preview = Self {
            head: Vec::with_capacity(limit.min(values.len())),
            schedulers: BTreeMap::new(),
            resources: BTreeMap::new(),
        };
        for value in values {
            let source = value.as_deref().unwrap_or_default().to_lowercase();
            let scheduler = Scheduler::from_source(&source);
            let resource = Resource::from_source(&source);
            *preview
                .schedulers
                .entry(scheduler.map_or("unset", Scheduler::label).to_string())
                .or_default() += 1;
            *preview
                .resources
                .entry(resource.map_or("unset", Resource::label).to_string())
                .or_default() += 1;
            if preview.head.len() < limit {
                preview.head.push(CategorizedRow {
                    source_file: source,
                    scheduler,
                    resource,
                });
            }
        }
        Ok(preview)
    }

    /// Console table of the previewed rows followed by the counts.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{:<32} {:<10} {:<8}\n", "source_file", "scheduler", "resource");
        for row in &self.head {
            out.push_str(&format!(
                "{:<32} {:<10} {:<8}\n",
                row.source_file,
                row.scheduler.map_or("-", Scheduler::label),
                row.resource.map_or("-", Resource::label),
            ));
        }
        out.push_str(&format!("schedulers: {:?}\n", self.schedulers));
        out.push_str(&format!("resources:  {:?}", self.resources));
        out
    }
}
