//! Network-condition rules: mocked API responses, blocked resources and
//! throttling, keyed by glob URL patterns.

use regex::Regex;
use serde_json::Value;

use crate::config::DEFAULT_THROTTLE_MS;
use crate::model::{MockKind, NetworkMock};

/// Glob over full URLs. `**` spans any number of path segments, `*` stays
/// within one segment; everything else matches literally.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    glob: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&glob_to_regex(glob))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Anchored regular expression source equivalent to the glob.
    pub fn regex_source(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]*");
            }
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
    out.push('$');
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkRule {
    /// Answer matching requests locally without touching the network.
    Fulfill {
        pattern: UrlPattern,
        status: u16,
        content_type: String,
        body: String,
    },
    /// Abort matching requests.
    Abort { pattern: UrlPattern },
    /// Delay every request before letting it continue.
    Delay { delay_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("{0} mock is missing its URL pattern")]
    MissingPattern(&'static str),
    #[error("invalid URL pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl NetworkRule {
    /// Build the rule for a configured mock. `Ok(None)` for mock types this
    /// worker does not know.
    pub fn from_mock(mock: &NetworkMock) -> Result<Option<Self>, MockError> {
        let rule = match mock.kind {
            MockKind::MockApi => {
                let glob = mock
                    .url
                    .as_deref()
                    .ok_or(MockError::MissingPattern("mock_api"))?;
                NetworkRule::Fulfill {
                    pattern: compile(glob)?,
                    status: mock.status.unwrap_or(200),
                    content_type: mock
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "application/json".to_string()),
                    body: mock_body(mock),
                }
            }
            MockKind::BlockResource => {
                let glob = mock
                    .pattern
                    .as_deref()
                    .ok_or(MockError::MissingPattern("block_resource"))?;
                NetworkRule::Abort {
                    pattern: compile(glob)?,
                }
            }
            MockKind::Throttle => NetworkRule::Delay {
                delay_ms: mock.delay_ms.unwrap_or(DEFAULT_THROTTLE_MS),
            },
            MockKind::Unsupported => return Ok(None),
        };
        Ok(Some(rule))
    }

    /// Evidence line appended when the rule is installed.
    pub fn describe(&self) -> String {
        match self {
            NetworkRule::Fulfill { pattern, .. } => {
                format!("[Network Mock] API mocked: {}", pattern.glob())
            }
            NetworkRule::Abort { pattern } => {
                format!("[Network Mock] Resource blocked: {}", pattern.glob())
            }
            NetworkRule::Delay { delay_ms } => {
                format!("[Network Mock] Network throttled: {}ms", delay_ms)
            }
        }
    }
}

fn compile(glob: &str) -> Result<UrlPattern, MockError> {
    UrlPattern::new(glob).map_err(|source| MockError::InvalidPattern {
        pattern: glob.to_string(),
        source,
    })
}

/// `response_body` strings are sent verbatim; otherwise the JSON encoding of
/// `response` (or of `response_body`), defaulting to `null`.
fn mock_body(mock: &NetworkMock) -> String {
    match (&mock.response_body, &mock.response) {
        (Some(Value::String(s)), _) => s.clone(),
        (_, Some(v)) => v.to_string(),
        (Some(v), None) => v.to_string(),
        (None, None) => Value::Null.to_string(),
    }
}

/// What happens to a request under a set of installed rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    Continue {
        delay_ms: u64,
    },
    Fulfill {
        status: u16,
        content_type: String,
        body: String,
        delay_ms: u64,
    },
    Abort {
        delay_ms: u64,
    },
}

/// Decide a request's fate. Delays accumulate across all delay rules; the
/// first matching fulfill or abort rule, in installation order, wins.
pub fn intercept(rules: &[NetworkRule], url: &str) -> Interception {
    let delay_ms: u64 = rules
        .iter()
        .map(|rule| match rule {
            NetworkRule::Delay { delay_ms } => *delay_ms,
            _ => 0,
        })
        .sum();

    for rule in rules {
        match rule {
            NetworkRule::Fulfill {
                pattern,
                status,
                content_type,
                body,
            } if pattern.matches(url) => {
                return Interception::Fulfill {
                    status: *status,
                    content_type: content_type.clone(),
                    body: body.clone(),
                    delay_ms,
                };
            }
            NetworkRule::Abort { pattern } if pattern.matches(url) => {
                return Interception::Abort { delay_ms };
            }
            _ => {}
        }
    }
    Interception::Continue { delay_ms }
}
