// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Reading and editing INI-style option files (`my.cnf`).
//!
//! Edits keep every line they do not touch, including comments, and replace
//! the file atomically: the new content is written to a temporary file in the
//! same directory which is then renamed over the original.

use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionFileError {
    #[error("option file {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("cannot access option file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl OptionFileError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            OptionFileError::NotFound(path.to_path_buf())
        } else {
            OptionFileError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// An option as written in a file: `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedOption {
    pub name: String,
    pub value: Option<String>,
}

impl NamedOption {
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            value: value.map(Into::into),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Values that would not read back as written are double-quoted.
    fn to_line(&self) -> String {
        match &self.value {
            Some(value) if unquote(value.trim()) != *value => {
                format!("{}=\"{}\"", self.name, value)
            }
            Some(value) => format!("{}={}", self.name, value),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub options: Vec<NamedOption>,
}

/// Option names are compared with `_` and `-` treated as equal.
pub fn same_option(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x == y || (matches!(x, b'-' | b'_') && matches!(y, b'-' | b'_')))
}

enum Line<'a> {
    Blank,
    Header(&'a str),
    Option(NamedOption),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(['#', ';', '!']) {
        return Line::Blank;
    }
    if let Some(rest) = trimmed.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((header, _)) => Line::Header(header.trim()),
            None => Line::Blank,
        };
    }
    match trimmed.split_once('=') {
        Some((name, value)) => Line::Option(NamedOption {
            name: name.trim().to_string(),
            value: Some(unquote(value.trim())),
        }),
        None => Line::Option(NamedOption::flag(trimmed)),
    }
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    // trailing comment: "value # note"
    value
        .split_once(" #")
        .or_else(|| value.split_once("\t#"))
        .map_or(value, |(v, _)| v)
        .trim_end()
        .to_string()
}

pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for line in text.lines() {
        match classify(line) {
            Line::Blank => {}
            Line::Header(name) => sections.push(Section {
                name: name.to_string(),
                options: Vec::new(),
            }),
            Line::Option(option) => match sections.last_mut() {
                Some(section) => section.options.push(option),
                None => debug!("ignoring option '{}' outside of any section", option.name),
            },
        }
    }
    sections
}

pub fn read_sections(path: &Path) -> Result<Vec<Section>, OptionFileError> {
    let text = fs::read_to_string(path).map_err(|e| OptionFileError::io(path, e))?;
    Ok(parse_sections(&text))
}

/// Line-level view of a file being edited.
struct Document {
    path: PathBuf,
    lines: Vec<String>,
}

impl Document {
    fn open(path: &Path) -> Result<Self, OptionFileError> {
        let text = fs::read_to_string(path).map_err(|e| OptionFileError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: text.lines().map(str::to_string).collect(),
        })
    }

    /// Line ranges (header index, end exclusive) of every section called
    /// `name`.
    fn sections(&self, name: &str) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut current: Option<usize> = None;
        for (idx, line) in self.lines.iter().enumerate() {
            if let Line::Header(header) = classify(line) {
                if let Some(start) = current.take() {
                    ranges.push((start, idx));
                }
                if header == name {
                    current = Some(idx);
                }
            }
        }
        if let Some(start) = current {
            ranges.push((start, self.lines.len()));
        }
        ranges
    }

    /// Drops every line in `name` sections that sets option `key`. Returns the
    /// index at which a replacement line belongs, if the section exists.
    fn remove_key(&mut self, name: &str, key: &str) -> Option<usize> {
        let mut insert_at = None;
        for (start, end) in self.sections(name).into_iter().rev() {
            let mut end = end;
            let mut idx = start + 1;
            let mut first_match = None;
            while idx < end {
                let matches = matches!(self.lines.get(idx).map(|l| classify(l)),
                    Some(Line::Option(ref o)) if same_option(&o.name, key));
                if matches {
                    self.lines.remove(idx);
                    end -= 1;
                    first_match.get_or_insert(idx);
                    // sections are visited back to front
                    if let Some(at) = insert_at.as_mut() {
                        *at -= 1;
                    }
                } else {
                    idx += 1;
                }
            }
            if insert_at.is_none() {
                insert_at = Some(first_match.unwrap_or_else(|| self.options_end(start, end)));
            }
        }
        insert_at
    }

    /// Index just past the last option line of the section spanning
    /// `start..end`; trailing blank lines, comments and directives stay
    /// outside.
    fn options_end(&self, start: usize, end: usize) -> usize {
        (start + 1..end)
            .rev()
            .find(|i| matches!(self.lines.get(*i).map(|l| classify(l)), Some(Line::Option(_))))
            .map_or(start + 1, |i| i + 1)
    }

    fn save(&self) -> Result<(), OptionFileError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let err = |e| OptionFileError::io(&self.path, e);
        let mut tmp = NamedTempFile::new_in(dir).map_err(err)?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions()).map_err(err)?;
        }
        for line in &self.lines {
            writeln!(tmp, "{line}").map_err(err)?;
        }
        tmp.as_file().sync_all().map_err(err)?;
        tmp.persist(&self.path).map_err(|e| err(e.error))?;
        Ok(())
    }
}

/// Sets `key` (or `key=value`) in section `name`, replacing any previous
/// setting. The section is created if it does not exist.
pub fn set_option(path: &Path, name: &str, option: &NamedOption) -> Result<(), OptionFileError> {
    let mut doc = Document::open(path)?;
    match doc.remove_key(name, &option.name) {
        Some(idx) => doc.lines.insert(idx, option.to_line()),
        None => {
            doc.lines.push(String::new());
            doc.lines.push(format!("[{name}]"));
            doc.lines.push(option.to_line());
        }
    }
    doc.save()
}

/// Removes every setting of `key` from section `name`.
pub fn unset_option(path: &Path, name: &str, key: &str) -> Result<(), OptionFileError> {
    let mut doc = Document::open(path)?;
    doc.remove_key(name, key);
    doc.save()
}

/// Appends a new section with the given options.
pub fn add_section(path: &Path, name: &str, options: &[NamedOption]) -> Result<(), OptionFileError> {
    let mut doc = Document::open(path)?;
    if doc.lines.last().is_some_and(|l| !l.trim().is_empty()) {
        doc.lines.push(String::new());
    }
    doc.lines.push(format!("[{name}]"));
    doc.lines.extend(options.iter().map(NamedOption::to_line));
    doc.save()
}

/// Removes every section called `name` together with its options.
pub fn remove_section(path: &Path, name: &str) -> Result<(), OptionFileError> {
    let mut doc = Document::open(path)?;
    for (start, end) in doc.sections(name).into_iter().rev() {
        let end = doc.options_end(start, end);
        doc.lines.drain(start..end);
    }
    doc.save()
}
