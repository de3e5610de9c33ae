//! Header accumulation and field recognition.
//!
//! Header bytes are collected into a bounded [`HeaderBuffer`]. Once the
//! buffer is complete for its grammar, [`recognize`] scans it one line at a
//! time: an ASCII check first, then the mandatory `To-Path`/`From-Path`
//! pair, then the optional fields.

use tracing::{trace, warn};
use url::Url;

use super::{
    ByteRange,
    FailureReport,
    MessageId,
    StatusHeader,
    TransactionError,
    TransactionId,
    TransactionType,
};

const MIN_PATH_VALUE: usize = 10;
const MAX_MEDIA_PART: usize = 30;

/// Which start line introduced the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Grammar {
    Request(TransactionType),
    Response,
}

/// Header bytes received so far, capped at a byte budget.
#[derive(Debug)]
pub(crate) struct HeaderBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl HeaderBuffer {
    pub(crate) const fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> Result<(), TransactionError> {
        let len = self.bytes.len() + data.len();
        if len > self.limit {
            return Err(TransactionError::HeaderTooLarge {
                len,
                limit: self.limit,
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] { &self.bytes }

    /// Requests end at the first blank line, which may be the very first
    /// line. Responses end after a complete `From-Path` line following the
    /// leading `To-Path` line.
    pub(crate) fn is_complete(&self, grammar: Grammar) -> bool {
        match grammar {
            Grammar::Request(_) => {
                self.bytes.starts_with(b"\r\n") || self.bytes.windows(4).any(|w| w == b"\r\n\r\n")
            }
            Grammar::Response => {
                has_field_prefix(&self.bytes, b"To-Path: ")
                    && self.bytes.ends_with(b"\r\n")
                    && self
                        .bytes
                        .split(|b| *b == b'\n')
                        .skip(1)
                        .any(|line| has_field_prefix(line, b"From-Path: "))
            }
        }
    }
}

/// Field names compare case-insensitively.
fn has_field_prefix(line: &[u8], prefix: &[u8]) -> bool {
    line.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Values recognised in a complete header.
#[derive(Debug, Default)]
pub(crate) struct HeaderFields {
    pub(crate) to_path: Vec<Url>,
    pub(crate) from_path: Vec<Url>,
    pub(crate) message_id: Option<MessageId>,
    pub(crate) byte_range: Option<ByteRange>,
    pub(crate) content_type: Option<String>,
    pub(crate) failure_report: FailureReport,
    pub(crate) success_report: bool,
    pub(crate) status: Option<StatusHeader>,
}

fn invalid(reason: impl Into<String>) -> TransactionError {
    TransactionError::InvalidHeader(reason.into())
}

fn path_line(line: Option<&str>, name: &str) -> Result<Vec<Url>, TransactionError> {
    let value = line
        .and_then(|l| l.split_once(": "))
        .filter(|(field, _)| field.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
        .ok_or_else(|| invalid(format!("expected {name} line")))?;
    if value.len() < MIN_PATH_VALUE {
        return Err(invalid(format!("{name} value too short")));
    }
    value
        .split(' ')
        .filter(|uri| !uri.is_empty())
        .map(|uri| Url::parse(uri).map_err(|e| invalid(format!("{name} URI {uri:?}: {e}"))))
        .collect()
}

fn media_type(value: &str) -> Option<String> {
    let main = value.split(';').next()?;
    let (ty, subtype) = main.split_once('/')?;
    let part_ok = |p: &str| (1..=MAX_MEDIA_PART).contains(&p.len());
    (part_ok(ty) && part_ok(subtype)).then(|| main.to_owned())
}

fn scan_field(
    fields: &mut HeaderFields,
    line: &str,
    grammar: Grammar,
    tid: &TransactionId,
) -> Result<(), TransactionError> {
    let Some((name, value)) = line.split_once(':') else {
        warn!(%tid, line, "header line without field name ignored");
        return Ok(());
    };
    let value = value.trim();
    match name.to_ascii_lowercase().as_str() {
        "message-id" => {
            fields.message_id = Some(
                MessageId::parse(value).ok_or_else(|| invalid(format!("malformed Message-ID {value:?}")))?,
            );
        }
        "byte-range" => match ByteRange::parse(value) {
            Some(range) => fields.byte_range = Some(range),
            None => warn!(%tid, value, "malformed Byte-Range ignored"),
        },
        "content-type" => match media_type(value) {
            Some(ct) => fields.content_type = Some(ct),
            None => warn!(%tid, value, "malformed Content-Type ignored"),
        },
        "failure-report" => match FailureReport::parse(value) {
            Some(fr) => fields.failure_report = fr,
            None => warn!(%tid, value, "unrecognised Failure-Report value ignored"),
        },
        "success-report" => match value.to_ascii_lowercase().as_str() {
            "yes" => fields.success_report = true,
            "no" => fields.success_report = false,
            _ => warn!(%tid, value, "unrecognised Success-Report value ignored"),
        },
        "status" if grammar == Grammar::Request(TransactionType::Report) => {
            match StatusHeader::parse(value) {
                Some(status) => fields.status = Some(status),
                None => warn!(%tid, value, "malformed Status ignored"),
            }
        }
        _ => trace!(%tid, name, "header field not interpreted"),
    }
    Ok(())
}

/// Recognise the fields of a complete header.
///
/// # Errors
/// Returns [`TransactionError::InvalidHeader`] for non-ASCII bytes, missing
/// or malformed paths, and a missing or malformed `Message-ID` on SEND and
/// REPORT requests.
pub(crate) fn recognize(
    bytes: &[u8],
    grammar: Grammar,
    tid: &TransactionId,
) -> Result<HeaderFields, TransactionError> {
    if !bytes.is_ascii() {
        return Err(invalid("non-ASCII byte in header"));
    }
    let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    let mut lines = text.split("\r\n");
    let mut fields = HeaderFields {
        to_path: path_line(lines.next(), "To-Path")?,
        from_path: path_line(lines.next(), "From-Path")?,
        ..HeaderFields::default()
    };
    if fields.to_path.is_empty() || fields.from_path.is_empty() {
        return Err(invalid("empty path"));
    }
    if grammar == Grammar::Response {
        return Ok(fields);
    }
    for line in lines.take_while(|l| !l.is_empty()) {
        scan_field(&mut fields, line, grammar, tid)?;
    }
    let needs_id = matches!(
        grammar,
        Grammar::Request(TransactionType::Send | TransactionType::Report)
    );
    if needs_id && fields.message_id.is_none() {
        return Err(invalid("missing Message-ID"));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    const SEND: Grammar = Grammar::Request(TransactionType::Send);

    #[fixture]
    fn tid() -> TransactionId { TransactionId::parse("tid0001").expect("tid") }

    fn header(extra: &str) -> Vec<u8> {
        format!(
            "To-Path: msrp://bob.example:2855/bs;tcp\r\nFrom-Path: \
             msrp://alice.example:2855/as;tcp\r\n{extra}\r\n"
        )
        .into_bytes()
    }

    #[rstest]
    fn recognises_send_fields(tid: TransactionId) {
        let bytes = header(
            "Message-ID: m123456\r\nByte-Range: 1-5/5\r\nContent-Type: text/plain; \
             charset=utf-8\r\nSuccess-Report: yes\r\nFailure-Report: partial\r\n",
        );
        let fields = recognize(&bytes, SEND, &tid).expect("valid");
        assert_eq!(fields.to_path.len(), 1);
        assert_eq!(fields.message_id.as_ref().map(MessageId::as_str), Some("m123456"));
        assert_eq!(fields.byte_range, ByteRange::parse("1-5/5"));
        assert_eq!(fields.content_type.as_deref(), Some("text/plain"));
        assert!(fields.success_report);
        assert_eq!(fields.failure_report, FailureReport::Partial);
    }

    #[rstest]
    fn unknown_report_values_keep_defaults(tid: TransactionId) {
        let bytes = header("Message-ID: m123456\r\nSuccess-Report: maybe\r\nFailure-Report: sometimes\r\n");
        let fields = recognize(&bytes, SEND, &tid).expect("valid");
        assert!(!fields.success_report);
        assert_eq!(fields.failure_report, FailureReport::Yes);
    }

    #[rstest]
    fn field_names_ignore_case(tid: TransactionId) {
        let bytes = b"to-path: msrp://bob.example:2855/bs;tcp\r\nFROM-PATH: \
                      msrp://alice.example:2855/as;tcp\r\nmessage-id: msg1234\r\n\
                      byte-range: 1-3/3\r\ncontent-TYPE: text/plain\r\n\r\n";
        let fields = recognize(bytes, SEND, &tid).expect("valid");
        assert_eq!(fields.message_id.as_ref().map(MessageId::as_str), Some("msg1234"));
        assert_eq!(fields.byte_range, ByteRange::parse("1-3/3"));
        assert_eq!(fields.content_type.as_deref(), Some("text/plain"));
    }

    #[rstest]
    #[case("Success-Report: Yes\r\nFailure-Report: PARTIAL\r\n", true, FailureReport::Partial)]
    #[case("success-report: YES \r\nfailure-report:  No\r\n", true, FailureReport::No)]
    #[case("SUCCESS-REPORT: no\r\n", false, FailureReport::Yes)]
    fn report_values_ignore_case(
        tid: TransactionId,
        #[case] extra: &str,
        #[case] success: bool,
        #[case] failure: FailureReport,
    ) {
        let bytes = header(&format!("Message-ID: m123456\r\n{extra}"));
        let fields = recognize(&bytes, SEND, &tid).expect("valid");
        assert_eq!(fields.success_report, success);
        assert_eq!(fields.failure_report, failure);
    }

    #[rstest]
    fn relay_paths_are_split(tid: TransactionId) {
        let bytes = b"To-Path: msrp://r.example:2855/r;tcp msrp://bob.example:2855/bs;tcp\r\n\
                      From-Path: msrp://alice.example:2855/as;tcp\r\nMessage-ID: m1234\r\n\r\n";
        let fields = recognize(bytes, SEND, &tid).expect("valid");
        assert_eq!(fields.to_path.len(), 2);
    }

    #[rstest]
    #[case::missing_id(header(""))]
    #[case::bad_id(header("Message-ID: !bad\r\n"))]
    #[case::swapped_paths(b"From-Path: msrp://a.example:1/x;tcp\r\nTo-Path: msrp://b.example:1/y;tcp\r\n\r\n".to_vec())]
    #[case::short_path(b"To-Path: a:b\r\nFrom-Path: msrp://b.example:1/y;tcp\r\n\r\n".to_vec())]
    #[case::non_ascii(header("Message-ID: m123456\r\nSubject: caf\u{e9}\r\n"))]
    fn rejects_invalid_headers(tid: TransactionId, #[case] bytes: Vec<u8>) {
        assert!(matches!(
            recognize(&bytes, SEND, &tid),
            Err(TransactionError::InvalidHeader(_))
        ));
    }

    #[rstest]
    fn unsupported_method_needs_no_message_id(tid: TransactionId) {
        let bytes = header("");
        assert!(recognize(&bytes, Grammar::Request(TransactionType::Unsupported), &tid).is_ok());
    }

    #[rstest]
    fn report_status_is_parsed(tid: TransactionId) {
        let bytes = header("Message-ID: m123456\r\nStatus: 000 200 OK\r\n");
        let fields = recognize(&bytes, Grammar::Request(TransactionType::Report), &tid).expect("valid");
        assert_eq!(fields.status.map(|s| s.code), Some(200));
    }

    #[rstest]
    fn buffer_enforces_budget() {
        let mut buffer = HeaderBuffer::new(8);
        buffer.push(b"1234").expect("fits");
        assert!(matches!(
            buffer.push(b"56789"),
            Err(TransactionError::HeaderTooLarge { len: 9, limit: 8 })
        ));
    }

    #[rstest]
    fn completeness_depends_on_grammar() {
        let mut request = HeaderBuffer::new(1024);
        request.push(&header("Message-ID: m123456\r\n")).expect("fits");
        assert!(request.is_complete(SEND));

        let mut response = HeaderBuffer::new(1024);
        response.push(b"To-Path: msrp://alice.example:2855/as;tcp\r\n").expect("fits");
        assert!(!response.is_complete(Grammar::Response));
        response.push(b"From-Path: msrp://bob.example:2855/bs;tcp\r\n").expect("fits");
        assert!(response.is_complete(Grammar::Response));

        let mut lower = HeaderBuffer::new(1024);
        lower
            .push(b"to-path: msrp://alice.example:2855/as;tcp\r\nfrom-path: msrp://bob.example:2855/bs;tcp\r\n")
            .expect("fits");
        assert!(lower.is_complete(Grammar::Response));
    }
}
