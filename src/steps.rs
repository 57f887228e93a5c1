//! Typed steps and selectors, parsed from the stored [`StepRecord`] wire form.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::config::DEFAULT_WAIT_MS;
use crate::model::StepRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
    Text { text: String, exact: bool },
    Role { role: String, name: Option<String> },
    TestId(String),
    Placeholder(String),
    Label(String),
    /// Natural-language description resolved by the element-discovery model.
    AiDescribe(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s)
            | Selector::XPath(s)
            | Selector::TestId(s)
            | Selector::Placeholder(s)
            | Selector::Label(s)
            | Selector::AiDescribe(s) => f.write_str(s),
            Selector::Text { text, .. } => f.write_str(text),
            Selector::Role { role, name: None } => write!(f, "role={}", role),
            Selector::Role {
                role,
                name: Some(name),
            } => write!(f, "role={}[name=\"{}\"]", role, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Visit { url: String },
    Click { target: Selector },
    Type { target: Selector, text: String },
    Hover { target: Selector },
    Select { target: Selector, option: String },
    Check { target: Selector },
    Uncheck { target: Selector },
    Wait { ms: u64 },
    AssertText { target: Selector, expected: String },
    AssertVisible { target: Selector },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Unknown selector type: {0}")]
    UnknownSelectorType(String),
    #[error("Action '{0}' requires a selector")]
    MissingSelector(String),
    #[error("Action '{0}' requires a value")]
    MissingValue(String),
}

impl TryFrom<&StepRecord> for Step {
    type Error = StepError;

    fn try_from(record: &StepRecord) -> Result<Self, Self::Error> {
        let action = record.action.as_str();
        let value = || {
            record
                .value
                .clone()
                .ok_or_else(|| StepError::MissingValue(action.to_string()))
        };
        let target = || parse_selector(record);

        let step = match action {
            "visit" => Step::Visit { url: value()? },
            "click" => Step::Click { target: target()? },
            "type" => Step::Type {
                target: target()?,
                text: value()?,
            },
            "hover" => Step::Hover { target: target()? },
            "select" => Step::Select {
                target: target()?,
                option: value()?,
            },
            "check" => Step::Check { target: target()? },
            "uncheck" => Step::Uncheck { target: target()? },
            "wait" => Step::Wait {
                ms: parse_wait_ms(&value()?),
            },
            "assert_text" => Step::AssertText {
                target: target()?,
                expected: value()?,
            },
            "assert_visible" => Step::AssertVisible { target: target()? },
            other => return Err(StepError::UnknownAction(other.to_string())),
        };
        Ok(step)
    }
}

fn parse_selector(record: &StepRecord) -> Result<Selector, StepError> {
    let raw = record
        .selector
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StepError::MissingSelector(record.action.clone()))?
        .to_string();

    let kind = record
        .selector_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("css");

    let selector = match kind {
        "css" => Selector::Css(raw),
        "xpath" => Selector::XPath(raw),
        "text" => Selector::Text {
            text: raw,
            exact: record.exact.unwrap_or(true),
        },
        "role" => {
            let (role, name) = parse_role_selector(&raw);
            Selector::Role { role, name }
        }
        "testid" => Selector::TestId(raw),
        "placeholder" => Selector::Placeholder(raw),
        "label" => Selector::Label(raw),
        "ai_describe" => Selector::AiDescribe(raw),
        other => return Err(StepError::UnknownSelectorType(other.to_string())),
    };
    Ok(selector)
}

static ROLE_SELECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^role=([^\[]+)(?:\[name="([^"]+)"\])?"#).unwrap());

/// Split `role=<role>[name="<name>"]` into its parts. Anything that does not
/// follow that shape is taken as a bare role.
pub fn parse_role_selector(raw: &str) -> (String, Option<String>) {
    match ROLE_SELECTOR.captures(raw) {
        Some(caps) => {
            let role = caps[1].trim().to_string();
            let name = caps.get(2).map(|m| m.as_str().to_string());
            (role, name)
        }
        None => (raw.trim().to_string(), None),
    }
}

/// Leading digits in milliseconds; anything unparsable waits the default.
pub fn parse_wait_ms(value: &str) -> u64 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<u64>() {
        Ok(ms) if ms > 0 => ms,
        _ => DEFAULT_WAIT_MS,
    }
}
