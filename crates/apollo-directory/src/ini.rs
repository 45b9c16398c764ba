//! Order-preserving INI documents.
//!
//! Section names and keys are case-insensitive and stored lowercased. Both
//! `=` and `:` separate a key from its value; whichever comes first wins, so
//! member lists such as `system = 15:20` keep their colons. Lines starting
//! with `;` or `#` are comments and are not preserved on save. An unquoted
//! value ends at a `;` or `#` that follows whitespace.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;

/// Name of the implicit section holding keys that precede any header.
pub const DEFAULT_SECTION: &str = "default";

/// Parse failure with the offending line number (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct IniError {
    pub line: usize,
    pub message: String,
}

/// One `[name]` block with its keys in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key`, or `default` when the key is absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replace the value of an existing key in place, or append a new one.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A whole INI file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, IniError> {
        let mut doc = Self::new();
        let mut current = DEFAULT_SECTION.to_string();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| IniError {
                    line: index + 1,
                    message: format!("unterminated section header `{}`", line),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(IniError {
                        line: index + 1,
                        message: "empty section name".to_string(),
                    });
                }
                current = name.to_lowercase();
                doc.section_entry(&current);
                continue;
            }

            let split = line.find(['=', ':']).ok_or_else(|| IniError {
                line: index + 1,
                message: format!("expected `key = value`, found `{}`", line),
            })?;
            let key = line[..split].trim();
            if key.is_empty() {
                return Err(IniError {
                    line: index + 1,
                    message: "empty key".to_string(),
                });
            }
            let value = parse_value(line[split + 1..].trim());
            doc.section_entry(&current).set(key, value);
        }

        Ok(doc)
    }

    /// Read and parse a file. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Rewrite the file wholesale through a sibling temp file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(self.to_string().as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        let name = name.to_lowercase();
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        let name = name.to_lowercase();
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Existing section, or a new empty one appended at the end.
    pub fn section_entry(&mut self, name: &str) -> &mut Section {
        let name = name.trim().to_lowercase();
        let pos = match self.sections.iter().position(|s| s.name == name) {
            Some(pos) => pos,
            None => {
                self.sections.push(Section::new(&name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos]
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        let name = name.to_lowercase();
        let pos = self.sections.iter().position(|s| s.name == name)?;
        Some(self.sections.remove(pos))
    }

    /// Append this document to the end of `path`, leaving existing text
    /// and the file itself in place. Repeated headers merge on load.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let existing = std::fs::read(path)?;
        let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
        if existing.last().is_some_and(|&b| b != b'\n') {
            file.write_all(b"\n")?;
        }
        if !existing.is_empty() {
            file.write_all(b"\n")?;
        }
        file.write_all(self.to_string().as_bytes())?;
        file.sync_all()
    }

    /// Drop any existing section of that name and append `section` in its place.
    pub fn replace_section(&mut self, section: Section) {
        self.remove_section(&section.name);
        self.sections.push(section);
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for section in &self.sections {
            if section.name == DEFAULT_SECTION {
                if section.is_empty() {
                    continue;
                }
            } else {
                if !first {
                    writeln!(f)?;
                }
                writeln!(f, "[{}]", section.name)?;
            }
            for (key, value) in &section.entries {
                writeln!(f, "{} = {}", key, quote(value))?;
            }
            first = false;
        }
        Ok(())
    }
}

fn parse_value(raw: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(q) {
            if let Some(end) = rest.rfind(q) {
                return &rest[..end];
            }
        }
    }
    match inline_comment(raw) {
        Some(pos) => raw[..pos].trim_end(),
        None => raw,
    }
}

/// Byte offset of a `;` or `#` preceded by whitespace.
fn inline_comment(value: &str) -> Option<usize> {
    value
        .char_indices()
        .find(|&(i, c)| (c == ';' || c == '#') && value[..i].ends_with(char::is_whitespace))
        .map(|(i, _)| i)
}

fn quote(value: &str) -> String {
    let needs = value != value.trim()
        || value.starts_with('"')
        || value.starts_with('\'')
        || inline_comment(value).is_some();
    if needs {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}
