//! Declarative command arguments: how they are named, scanned and validated.

pub mod scanner;
pub mod validate;

use chrono::{DateTime, TimeDelta, Utc};

use crate::permissions::{Subject, SubjectKind};
use crate::platform::ChannelInfo;

pub use scanner::{scan, ScanContext};
pub use validate::{validate, ValidationFailure, ValidationRule};

/// A scanned argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Text(String),
    Bool(bool),
    List(Vec<ArgValue>),
    Time(TimePoint),
    Channels(Vec<ChannelInfo>),
    Subject(Subject),
}

impl ArgValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Either a signed distance from "now" or a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePoint {
    Relative(TimeDelta),
    Absolute(DateTime<Utc>),
}

/// A value a value-table token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableValue {
    Bool(bool),
    Text(&'static str),
}

impl TableValue {
    fn to_value(self) -> ArgValue {
        match self {
            TableValue::Bool(b) => ArgValue::Bool(b),
            TableValue::Text(s) => ArgValue::Text(s.to_string()),
        }
    }
}

/// Keyword → value pairs, matched case-insensitively.
pub type ValueTable = &'static [(&'static str, TableValue)];

/// How an argument consumes tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scanner {
    /// One token, verbatim or resolved through a value table.
    Simple(Option<ValueTable>),
    /// A comma-separated run of simple items.
    Array(Option<ValueTable>),
    TimeDistance,
    ChannelRef,
    Subject,
    /// Every remaining token, joined by single spaces.
    Rest,
}

/// Why a token could not become a value, or a value failed a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NoInput,
    NotInTable(String),
    BadTime(String),
    UnknownChannel(String),
    UnknownSubject(String),
    NotArray,
    Empty,
    ZeroShift,
    AbsoluteTime,
    NotTextChannel(String),
    WrongSubjectKind(SubjectKind),
    WrongType,
}

impl FailureReason {
    /// Localization id of the detail message.
    pub fn string_id(&self) -> &'static str {
        match self {
            FailureReason::NoInput => "reason.no_input",
            FailureReason::NotInTable(_) => "reason.not_in_table",
            FailureReason::BadTime(_) => "reason.bad_time",
            FailureReason::UnknownChannel(_) => "reason.unknown_channel",
            FailureReason::UnknownSubject(_) => "reason.unknown_subject",
            FailureReason::NotArray => "reason.not_array",
            FailureReason::Empty => "reason.empty",
            FailureReason::ZeroShift => "reason.zero_shift",
            FailureReason::AbsoluteTime => "reason.absolute_time",
            FailureReason::NotTextChannel(_) => "reason.not_text_channel",
            FailureReason::WrongSubjectKind(_) => "reason.wrong_subject_kind",
            FailureReason::WrongType => "reason.wrong_type",
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            FailureReason::NotInTable(t)
            | FailureReason::BadTime(t)
            | FailureReason::UnknownChannel(t)
            | FailureReason::UnknownSubject(t)
            | FailureReason::NotTextChannel(t) => vec![t.clone()],
            FailureReason::WrongSubjectKind(kind) => vec![kind.as_str().to_string()],
            _ => Vec::new(),
        }
    }
}

/// Declarative description of one named argument.
#[derive(Debug, Clone)]
pub struct ArgDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub scanner: Scanner,
    pub rules: &'static [ValidationRule],
    /// Only filled by `name:value` tokens, never by position.
    pub skip_in_sequential_read: bool,
    /// Localization id of the help line.
    pub help: &'static str,
}

impl ArgDef {
    pub fn new(name: &'static str, scanner: Scanner) -> Self {
        Self {
            name,
            aliases: &[],
            scanner,
            rules: &[],
            skip_in_sequential_read: false,
            help: "",
        }
    }

    pub fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn rules(mut self, rules: &'static [ValidationRule]) -> Self {
        self.rules = rules;
        self
    }

    pub fn skip_sequential(mut self) -> Self {
        self.skip_in_sequential_read = true;
        self
    }

    pub fn help(mut self, id: &'static str) -> Self {
        self.help = id;
        self
    }

    /// Whether `token` names this argument (already lowercased).
    pub fn is_named(&self, token: &str) -> bool {
        self.name == token || self.aliases.iter().any(|a| a.to_lowercase() == token)
    }
}
