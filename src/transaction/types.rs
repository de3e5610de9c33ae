//! Typed header values carried by MSRP transactions.

use std::fmt;

/// Request method of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionType {
    /// `SEND`, carrying a chunk of message content.
    Send,
    /// `REPORT`, carrying a delivery status.
    Report,
    /// Any other well-formed method name.
    Unsupported,
}

impl TransactionType {
    /// Map a method token from a request start line.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            "SEND" => Self::Send,
            "REPORT" => Self::Report,
            _ => Self::Unsupported,
        }
    }

    /// Method token as written on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Send => "SEND",
            Self::Report => "REPORT",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Whether a transaction was received from or is being sent to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received from the peer.
    Inbound,
    /// Produced locally for the peer.
    Outbound,
}

/// Flag closing every transaction's end-line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContinuationFlag {
    /// `$`: the message ends with this chunk.
    Complete,
    /// `+`: more chunks follow.
    Interrupted,
    /// `#`: the message was aborted.
    Aborted,
}

impl ContinuationFlag {
    /// Parse the flag byte of an end-line.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'$' => Some(Self::Complete),
            b'+' => Some(Self::Interrupted),
            b'#' => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Wire byte for the flag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Complete => b'$',
            Self::Interrupted => b'+',
            Self::Aborted => b'#',
        }
    }
}

/// Value of the `Failure-Report` header field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FailureReport {
    /// Failures and successful transactions are acknowledged.
    #[default]
    Yes,
    /// No failure reports or responses are wanted.
    No,
    /// Only failures are reported.
    Partial,
}

impl FailureReport {
    /// Parse a header value, ignoring case and surrounding whitespace;
    /// unknown values yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Header value as written on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Partial => "partial",
        }
    }
}

/// `Byte-Range` header: 1-based inclusive span plus total size.
///
/// `None` stands for the `*` wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte carried, 1-based.
    pub start: u64,
    /// Last byte carried, if known.
    pub end: Option<u64>,
    /// Total message size, if known.
    pub total: Option<u64>,
}

impl ByteRange {
    /// Range for a chunk starting at `start` of a message of `total` bytes.
    #[must_use]
    pub const fn open(start: u64, total: Option<u64>) -> Self {
        Self {
            start,
            end: None,
            total,
        }
    }

    /// Parse `start-(end|*)/(total|*)`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (span, total) = value.split_once('/')?;
        let (start, end) = span.split_once('-')?;
        let start = parse_digits(start).filter(|s| *s >= 1)?;
        Some(Self {
            start,
            end: parse_bound(end)?,
            total: parse_bound(total)?,
        })
    }

    /// Zero-based offset of the first carried byte.
    #[must_use]
    pub const fn offset(&self) -> u64 { self.start.saturating_sub(1) }
}

fn parse_digits(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[expect(
    clippy::option_option,
    reason = "outer None is a parse failure, inner None is the wildcard"
)]
fn parse_bound(value: &str) -> Option<Option<u64>> {
    if value == "*" {
        Some(None)
    } else {
        parse_digits(value).map(Some)
    }
}

fn write_bound(f: &mut fmt::Formatter<'_>, value: Option<u64>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v}"),
        None => f.write_str("*"),
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.start)?;
        write_bound(f, self.end)?;
        f.write_str("/")?;
        write_bound(f, self.total)
    }
}

/// `Status` header of a REPORT: namespace, code and optional comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusHeader {
    /// Three-digit namespace, `000` for MSRP.
    pub namespace: u16,
    /// Three-digit status code.
    pub code: u16,
    /// Free-form trailing text.
    pub comment: Option<String>,
}

impl StatusHeader {
    /// Parse `ddd SP ddd [SP comment]`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (namespace, rest) = value.split_at_checked(3)?;
        let rest = rest.strip_prefix(' ')?;
        let (code, comment) = rest.split_at_checked(3)?;
        if !namespace.bytes().chain(code.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let comment = comment.trim();
        Some(Self {
            namespace: namespace.parse().ok()?,
            code: code.parse().ok()?,
            comment: (!comment.is_empty()).then(|| comment.to_owned()),
        })
    }
}

impl fmt::Display for StatusHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {:03}", self.namespace, self.code)?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}
