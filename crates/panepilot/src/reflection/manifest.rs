//! The tools manifest: a Markdown list of tools grouped by `## ` sections.
//!
//! ```markdown
//! ## Search
//!
//! - `rg` – fast recursive grep
//! - `fd` – friendlier find
//! ```
//!
//! Tool names match case-insensitively within a section. Adding a tool
//! that exists replaces its line (keeping indentation); adding to a missing
//! section creates the section at the end of the file.

use std::path::Path;

const SECTION_PREFIX: &str = "## ";
const TOOL_PREFIX: &str = "- `";

/// What an edit did to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChange {
    Added,
    Updated,
    Unchanged,
    Removed,
    NotFound,
}

impl ToolChange {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolChange::Added => "added",
            ToolChange::Updated => "updated",
            ToolChange::Unchanged => "unchanged",
            ToolChange::Removed => "removed",
            ToolChange::NotFound => "not-found",
        }
    }

    pub fn modified(self) -> bool {
        matches!(
            self,
            ToolChange::Added | ToolChange::Updated | ToolChange::Removed
        )
    }
}

/// Format one tool bullet.
pub fn tool_line(name: &str, description: &str) -> String {
    let description = if description.is_empty() {
        "(no description)"
    } else {
        description
    };
    format!("{TOOL_PREFIX}{name}` – {description}")
}

/// Name inside the backticks of a tool bullet.
fn tool_name(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix(TOOL_PREFIX)?;
    Some(rest.split('`').next().unwrap_or(rest).trim())
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// An in-memory manifest, line by line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolsManifest {
    lines: Vec<String>,
}

impl ToolsManifest {
    pub fn parse(content: &str) -> Self {
        if content.trim().is_empty() {
            return Self::default();
        }
        Self {
            lines: content.split('\n').map(str::to_string).collect(),
        }
    }

    /// Render with exactly one trailing newline.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    /// `(header index, end)` where `end` is the next header or EOF.
    fn section_bounds(&self, section: &str) -> Option<(usize, usize)> {
        let header = format!("{SECTION_PREFIX}{section}");
        let start = self.lines.iter().position(|l| l.trim() == header)?;
        let end = self
            .lines
            .iter()
            .enumerate()
            .skip(start + 1)
            .find(|(_, l)| l.trim().starts_with(SECTION_PREFIX))
            .map_or(self.lines.len(), |(i, _)| i);
        Some((start, end))
    }

    fn find_tool(&self, start: usize, end: usize, name: &str) -> Option<usize> {
        (start + 1..end).find(|&i| {
            self.lines
                .get(i)
                .and_then(|l| tool_name(l))
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    fn append_section(&mut self, section: &str) -> (usize, usize) {
        if !self.lines.iter().all(|l| is_blank(l)) {
            while self.lines.last().is_some_and(|l| is_blank(l)) {
                self.lines.pop();
            }
            self.lines.push(String::new());
        } else {
            self.lines.clear();
        }
        self.lines.push(format!("{SECTION_PREFIX}{section}"));
        self.lines.push(String::new());
        (self.lines.len() - 2, self.lines.len())
    }

    /// Add or update `name` in `section`.
    pub fn upsert(&mut self, section: &str, name: &str, description: &str) -> ToolChange {
        let line = tool_line(name, description);
        let (start, end) = match self.section_bounds(section) {
            Some(bounds) => bounds,
            None => self.append_section(section),
        };

        if let Some(i) = self.find_tool(start, end, name) {
            let existing = &self.lines[i];
            if existing.trim() == line {
                return ToolChange::Unchanged;
            }
            let indent: String = existing
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .map(|_| ' ')
                .collect();
            self.lines[i] = format!("{indent}{line}");
            return ToolChange::Updated;
        }

        // Insert after the last non-blank line of the section.
        let mut at = end;
        while at > start + 1 && is_blank(&self.lines[at - 1]) {
            at -= 1;
        }
        if at == start + 1 {
            // Keep a blank line between header and list.
            if self.lines.get(at).is_some_and(|l| is_blank(l)) {
                at += 1;
            } else {
                self.lines.insert(at, String::new());
                at += 1;
            }
        }
        self.lines.insert(at, line);
        ToolChange::Added
    }

    /// Remove `name` from `section`.
    pub fn remove(&mut self, section: &str, name: &str) -> ToolChange {
        let Some((start, end)) = self.section_bounds(section) else {
            return ToolChange::NotFound;
        };
        let Some(i) = self.find_tool(start, end, name) else {
            return ToolChange::NotFound;
        };
        self.lines.remove(i);
        self.collapse_blank_runs(start);
        ToolChange::Removed
    }

    /// Drop repeated blank lines inside the section starting at `start`.
    fn collapse_blank_runs(&mut self, start: usize) {
        let mut i = start + 1;
        let mut prev_blank = false;
        while i < self.lines.len() {
            let line = &self.lines[i];
            if line.trim().starts_with(SECTION_PREFIX) {
                break;
            }
            if is_blank(line) {
                if prev_blank {
                    self.lines.remove(i);
                    continue;
                }
                prev_blank = true;
            } else {
                prev_blank = false;
            }
            i += 1;
        }
    }
}

fn validate<'a>(section: &'a str, name: &'a str) -> Result<(&'a str, &'a str), String> {
    let (section, name) = (section.trim(), name.trim());
    if section.is_empty() || name.is_empty() {
        return Err("section and name are required".into());
    }
    Ok((section, name))
}

fn read_manifest(path: &Path) -> Result<ToolsManifest, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(ToolsManifest::parse(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("tools manifest not found at {}", path.display()))
        }
        Err(e) => Err(format!("Failed to read tools manifest: {e}")),
    }
}

fn write_manifest(path: &Path, manifest: &ToolsManifest) -> Result<(), String> {
    let tmp_path = path.with_extension("md.tmp");
    std::fs::write(&tmp_path, manifest.render())
        .map_err(|e| format!("Failed to write temp manifest: {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| format!("Failed to rename manifest: {e}"))
}

/// Add or update a tool in the manifest file. The file must exist.
pub fn add_tool(
    path: &Path,
    section: &str,
    name: &str,
    description: &str,
) -> Result<ToolChange, String> {
    let (section, name) = validate(section, name)?;
    let mut manifest = read_manifest(path)?;
    let change = manifest.upsert(section, name, description.trim());
    if change.modified() {
        write_manifest(path, &manifest)?;
    }
    Ok(change)
}

/// Remove a tool from the manifest file. The file must exist.
pub fn remove_tool(path: &Path, section: &str, name: &str) -> Result<ToolChange, String> {
    let (section, name) = validate(section, name)?;
    let mut manifest = read_manifest(path)?;
    let change = manifest.remove(section, name);
    if change.modified() {
        write_manifest(path, &manifest)?;
    }
    Ok(change)
}

/// The manifest contents with a single trailing newline.
pub fn list_tools(path: &Path) -> Result<String, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("tools manifest not found at {}", path.display()));
        }
        Err(e) => return Err(format!("Failed to read tools manifest: {e}")),
    };
    Ok(format!("{}\n", content.trim_end_matches('\n')))
}
