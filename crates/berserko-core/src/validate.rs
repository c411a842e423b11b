//! Sanity checks applied to operator-entered domain settings and credentials.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

const MAX_HOSTNAME_LEN: usize = 255;

static HOSTNAME: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9A-Za-z](?:[0-9A-Za-z-]{0,61}[0-9A-Za-z])?(?:\.[0-9A-Za-z](?:[0-9A-Za-z-]{0,61}[0-9A-Za-z])?)*\.?$",
    )
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Domain,
    Kdc,
    Username,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Domain => "DNS domain name",
            Self::Kdc => "KDC hostname",
            Self::Username => "Username",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Blank(Field),
    TrailingDotRemoved(Field),
    NotAHostname(Field),
    SingleLabelDomain,
    QualifiedUsername,
}

impl Notice {
    pub fn severity(self) -> Severity {
        match self {
            Self::TrailingDotRemoved(_) => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank(field) => write!(f, "{field} is blank"),
            Self::TrailingDotRemoved(field) => write!(f, "Removing dot from end of {field}"),
            Self::NotAHostname(field) => {
                write!(f, "{field} does not match hostname regexp - please check")
            }
            Self::SingleLabelDomain => f.write_str(
                "This seems to be a single-component DNS name - this isn't valid for Windows domains but might be valid for other Kerberos realms",
            ),
            Self::QualifiedUsername => f.write_str(
                "Username shouldn't contain slash, backslash or '@' - just a plain username is required",
            ),
        }
    }
}

/// A cleaned-up input value and what was noticed while cleaning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked {
    pub value: String,
    pub notices: Vec<Notice>,
}

impl Checked {
    pub fn has_warnings(&self) -> bool {
        self.notices
            .iter()
            .any(|notice| notice.severity() == Severity::Warning)
    }
}

pub fn check_domain(input: &str) -> Checked {
    let mut checked = check_hostname(input, Field::Domain);
    if !checked.value.is_empty() && !checked.value.contains('.') {
        checked.notices.push(Notice::SingleLabelDomain);
    }
    checked
}

pub fn check_kdc(input: &str) -> Checked {
    check_hostname(input, Field::Kdc)
}

pub fn check_username(input: &str) -> Checked {
    let value = input.trim().to_owned();
    let mut notices = Vec::new();
    if value.is_empty() {
        notices.push(Notice::Blank(Field::Username));
    } else if value.contains(['\\', '/', '@']) {
        notices.push(Notice::QualifiedUsername);
    }
    Checked { value, notices }
}

pub fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    matches_pattern(&HOSTNAME, name)
}

/// A pattern that failed to compile accepts nothing.
fn matches_pattern(pattern: &Result<Regex, regex::Error>, name: &str) -> bool {
    match pattern {
        Ok(regex) => regex.is_match(name),
        Err(error) => {
            warn!(%error, "hostname pattern failed to compile, rejecting {name}");
            false
        }
    }
}

fn check_hostname(input: &str, field: Field) -> Checked {
    let mut value = input.trim().to_owned();
    let mut notices = Vec::new();

    if value.is_empty() {
        notices.push(Notice::Blank(field));
        return Checked { value, notices };
    }

    if value.ends_with('.') {
        value.pop();
        notices.push(Notice::TrailingDotRemoved(field));
    }

    if !is_valid_hostname(&value) {
        notices.push(Notice::NotAHostname(field));
    }

    Checked { value, notices }
}
