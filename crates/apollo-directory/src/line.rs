//! Extension line records.
//!
//! [`LineRecord`] is what a configuration section holds for one extension:
//! every field optional, exactly the keys present. [`Line`] is the merged
//! view handed to callers, with live registry fields attached.
//!
//! The section key for each field is fixed by [`LineField::key`] so the
//! on-disk format does not depend on struct layout.

use serde::Serialize;

use crate::digest::Credentials;
use crate::ini::Section;
use crate::registry::LiveFields;

/// Lowest provisioned extension number.
pub const FIRST_EXTENSION: u32 = 10;
/// Highest provisioned extension number.
pub const LAST_EXTENSION: u32 = 89;

pub fn is_extension(id: u32) -> bool {
    (FIRST_EXTENSION..=LAST_EXTENSION).contains(&id)
}

/// Extension number named by a section, if the name is its canonical decimal
/// form and lies in range.
pub fn parse_extension(name: &str) -> Option<u32> {
    let id: u32 = name.parse().ok()?;
    (is_extension(id) && id.to_string() == name).then_some(id)
}

/// Persisted line fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineField {
    Caller,
    Display,
    Lines,
    Type,
    Location,
    Cabling,
    Email,
    Secret,
    Md5,
    Sha256,
    Acl,
    Coverage,
    Delayed,
}

impl LineField {
    pub const ALL: [LineField; 13] = [
        LineField::Caller,
        LineField::Display,
        LineField::Lines,
        LineField::Type,
        LineField::Location,
        LineField::Cabling,
        LineField::Email,
        LineField::Secret,
        LineField::Md5,
        LineField::Sha256,
        LineField::Acl,
        LineField::Coverage,
        LineField::Delayed,
    ];

    pub fn key(self) -> &'static str {
        match self {
            LineField::Caller => "caller",
            LineField::Display => "display",
            LineField::Lines => "lines",
            LineField::Type => "type",
            LineField::Location => "location",
            LineField::Cabling => "cabling",
            LineField::Email => "email",
            LineField::Secret => "secret",
            LineField::Md5 => "md5",
            LineField::Sha256 => "sha256",
            LineField::Acl => "acl",
            LineField::Coverage => "coverage",
            LineField::Delayed => "delayed",
        }
    }
}

/// The keys one configuration section defines for an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRecord {
    pub caller: Option<String>,
    pub display: Option<String>,
    pub lines: Option<u16>,
    pub line_type: Option<String>,
    pub location: Option<String>,
    pub cabling: Option<String>,
    pub email: Option<String>,
    pub secret: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub acl: Option<String>,
    pub coverage: Option<String>,
    pub delayed: Option<String>,
}

impl LineRecord {
    /// Read the known keys of a section. A `lines` value that is not a
    /// number is ignored.
    pub fn from_section(section: &Section) -> Self {
        let mut record = Self::default();
        for field in LineField::ALL {
            if let Some(value) = section.get(field.key()) {
                record.set(field, value);
            }
        }
        record
    }

    /// A fresh section holding exactly the non-empty fields.
    pub fn to_section(&self, name: &str) -> Section {
        let mut section = Section::new(name);
        for field in LineField::ALL {
            if let Some(value) = self.get(field) {
                if !value.is_empty() {
                    section.set(field.key(), value);
                }
            }
        }
        section
    }

    pub fn get(&self, field: LineField) -> Option<String> {
        match field {
            LineField::Lines => self.lines.map(|n| n.to_string()),
            _ => self.text(field).clone(),
        }
    }

    pub fn set(&mut self, field: LineField, value: &str) {
        match field {
            LineField::Lines => {
                if let Ok(n) = value.trim().parse() {
                    self.lines = Some(n);
                }
            }
            _ => *self.text_mut(field) = Some(value.to_string()),
        }
    }

    /// True when no field is set to a non-empty value.
    pub fn is_empty(&self) -> bool {
        LineField::ALL
            .iter()
            .all(|f| self.get(*f).map_or(true, |v| v.is_empty()))
    }

    /// Drop every stored credential and keep only the supplied digests.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.secret = None;
        self.md5 = credentials.md5;
        self.sha256 = credentials.sha256;
    }

    /// Copy into `self` each field of `edited` whose value differs from the
    /// merged `current` line. Untouched fields keep their saved value.
    pub fn record_changes(&mut self, current: &Line, edited: &LineRecord) {
        for field in LineField::ALL {
            if let Some(value) = edited.get(field) {
                if current.get(field) != value {
                    self.set(field, &value);
                }
            }
        }
    }

    // `lines` is numeric; callers handle it before reaching the text slots.
    fn text(&self, field: LineField) -> &Option<String> {
        match field {
            LineField::Caller => &self.caller,
            LineField::Display => &self.display,
            LineField::Type => &self.line_type,
            LineField::Location => &self.location,
            LineField::Cabling => &self.cabling,
            LineField::Email => &self.email,
            LineField::Secret => &self.secret,
            LineField::Md5 => &self.md5,
            LineField::Sha256 => &self.sha256,
            LineField::Acl => &self.acl,
            LineField::Coverage => &self.coverage,
            LineField::Delayed | LineField::Lines => &self.delayed,
        }
    }

    fn text_mut(&mut self, field: LineField) -> &mut Option<String> {
        match field {
            LineField::Caller => &mut self.caller,
            LineField::Display => &mut self.display,
            LineField::Type => &mut self.line_type,
            LineField::Location => &mut self.location,
            LineField::Cabling => &mut self.cabling,
            LineField::Email => &mut self.email,
            LineField::Secret => &mut self.secret,
            LineField::Md5 => &mut self.md5,
            LineField::Sha256 => &mut self.sha256,
            LineField::Acl => &mut self.acl,
            LineField::Coverage => &mut self.coverage,
            LineField::Delayed | LineField::Lines => &mut self.delayed,
        }
    }
}

/// Merged view of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub caller: String,
    pub display: String,
    pub lines: u16,
    #[serde(rename = "type")]
    pub line_type: String,
    pub location: String,
    pub cabling: String,
    pub email: String,
    #[serde(skip)]
    pub secret: String,
    #[serde(skip)]
    pub md5: String,
    #[serde(skip)]
    pub sha256: String,
    #[serde(skip)]
    pub acl: String,
    #[serde(skip)]
    pub coverage: String,
    #[serde(skip)]
    pub delayed: String,

    // live fields, never persisted
    pub count: u16,
    #[serde(rename = "status")]
    pub presence: String,
    pub agent: String,
    #[serde(skip)]
    pub host: String,
    #[serde(skip)]
    pub editable: bool,
}

impl Default for Line {
    fn default() -> Self {
        Self {
            caller: String::new(),
            display: String::new(),
            lines: 0,
            line_type: String::new(),
            location: String::new(),
            cabling: String::new(),
            email: String::new(),
            secret: String::new(),
            md5: String::new(),
            sha256: String::new(),
            acl: String::new(),
            coverage: String::new(),
            delayed: String::new(),
            count: 0,
            presence: LiveFields::PRESENCE_DOWN.to_string(),
            agent: LiveFields::AGENT_OFFLINE.to_string(),
            host: String::new(),
            editable: true,
        }
    }
}

impl Line {
    /// Starting point for a newly allocated extension.
    pub fn template() -> Self {
        Self {
            lines: 1,
            line_type: "generic".to_string(),
            location: "unspecified".to_string(),
            ..Self::default()
        }
    }

    /// Overlay the fields a section record defines.
    pub fn apply(&mut self, record: &LineRecord) {
        if let Some(n) = record.lines {
            self.lines = n;
        }
        for field in LineField::ALL {
            if field == LineField::Lines {
                continue;
            }
            if let Some(value) = record.get(field) {
                *self.text_mut(field) = value;
            }
        }
    }

    pub fn apply_live(&mut self, live: LiveFields) {
        self.agent = live.agent;
        self.presence = live.presence;
        self.count = live.count;
        self.host = live.host;
    }

    pub fn get(&self, field: LineField) -> String {
        match field {
            LineField::Lines => self.lines.to_string(),
            LineField::Caller => self.caller.clone(),
            LineField::Display => self.display.clone(),
            LineField::Type => self.line_type.clone(),
            LineField::Location => self.location.clone(),
            LineField::Cabling => self.cabling.clone(),
            LineField::Email => self.email.clone(),
            LineField::Secret => self.secret.clone(),
            LineField::Md5 => self.md5.clone(),
            LineField::Sha256 => self.sha256.clone(),
            LineField::Acl => self.acl.clone(),
            LineField::Coverage => self.coverage.clone(),
            LineField::Delayed => self.delayed.clone(),
        }
    }

    fn text_mut(&mut self, field: LineField) -> &mut String {
        match field {
            LineField::Caller => &mut self.caller,
            LineField::Display => &mut self.display,
            LineField::Type => &mut self.line_type,
            LineField::Location => &mut self.location,
            LineField::Cabling => &mut self.cabling,
            LineField::Email => &mut self.email,
            LineField::Secret => &mut self.secret,
            LineField::Md5 => &mut self.md5,
            LineField::Sha256 => &mut self.sha256,
            LineField::Acl => &mut self.acl,
            LineField::Coverage => &mut self.coverage,
            LineField::Delayed | LineField::Lines => &mut self.delayed,
        }
    }
}
