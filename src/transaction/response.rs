//! Pre-serialised responses to incoming requests.

use bytes::Bytes;
use url::Url;

use super::{StatusCode, TransactionId};

/// Response to an incoming request, serialised when created.
///
/// The response's `To-Path` is the first URI of the request's `From-Path`
/// and its `From-Path` the first URI of the request's `To-Path`. Paths that
/// were never parsed are omitted.
#[derive(Clone, Debug)]
pub struct TransactionResponse {
    tid: TransactionId,
    code: StatusCode,
    comment: Option<String>,
    bytes: Bytes,
    position: usize,
}

impl TransactionResponse {
    /// Serialise a response to the request `tid`.
    #[must_use]
    pub fn new(
        tid: TransactionId,
        code: StatusCode,
        comment: Option<String>,
        request_to_path: &[Url],
        request_from_path: &[Url],
    ) -> Self {
        let mut text = format!(
            "MSRP {tid} {code} {}\r\n",
            comment.as_deref().unwrap_or(code.reason())
        );
        if let Some(to) = request_from_path.first() {
            text.push_str(&format!("To-Path: {to}\r\n"));
        }
        if let Some(from) = request_to_path.first() {
            text.push_str(&format!("From-Path: {from}\r\n"));
        }
        text.push_str(&format!("-------{tid}$\r\n"));
        Self {
            tid,
            code,
            comment,
            bytes: Bytes::from(text),
            position: 0,
        }
    }

    /// Identifier of the answered request.
    #[must_use]
    pub const fn tid(&self) -> &TransactionId { &self.tid }

    /// Response code.
    #[must_use]
    pub const fn code(&self) -> StatusCode { self.code }

    /// Optional comment replacing the reason phrase.
    #[must_use]
    pub fn comment(&self) -> Option<&str> { self.comment.as_deref() }

    /// Complete wire form.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.bytes }

    /// Whether bytes remain to be pulled.
    #[must_use]
    pub fn has_data(&self) -> bool { self.position < self.bytes.len() }

    /// Copy the next bytes into `out`, returning how many were written.
    pub fn next_bytes(&mut self, out: &mut [u8]) -> usize {
        let remaining = self.bytes.get(self.position..).unwrap_or_default();
        let n = remaining.len().min(out.len());
        if let (Some(dst), Some(src)) = (out.get_mut(..n), remaining.get(..n)) {
            dst.copy_from_slice(src);
        }
        self.position += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn url(s: &str) -> Url { Url::parse(s).expect("url") }

    #[rstest]
    fn serialises_paths_swapped() {
        let tid = TransactionId::parse("a1b2c3").expect("tid");
        let response = TransactionResponse::new(
            tid,
            StatusCode::OK,
            None,
            &[url("msrp://bob.example:2855/bs;tcp")],
            &[url("msrp://alice.example:2855/as;tcp")],
        );
        assert_eq!(
            response.as_bytes(),
            b"MSRP a1b2c3 200 OK\r\nTo-Path: msrp://alice.example:2855/as;tcp\r\nFrom-Path: \
              msrp://bob.example:2855/bs;tcp\r\n-------a1b2c3$\r\n"
        );
    }

    #[rstest]
    fn pulls_in_pieces() {
        let tid = TransactionId::parse("zz99").expect("tid");
        let mut response = TransactionResponse::new(
            tid,
            StatusCode::BAD_REQUEST,
            Some("bad header".to_owned()),
            &[],
            &[],
        );
        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        while response.has_data() {
            let n = response.next_bytes(&mut buf);
            out.extend_from_slice(buf.get(..n).unwrap_or_default());
        }
        assert_eq!(out, b"MSRP zz99 400 bad header\r\n-------zz99$\r\n");
        assert_eq!(response.next_bytes(&mut buf), 0);
    }
}
