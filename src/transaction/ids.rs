//! Identifier and status-code newtypes shared by requests and responses.
//!
//! Transaction and message identifiers follow the `ident` production of
//! RFC 4975: one alphanumeric character followed by three to thirty-one
//! characters drawn from alphanumerics and `.-+%=`.

use std::{borrow::Borrow, fmt};

use rand::{Rng, distributions::Alphanumeric};

const TRANSACTION_ID_LEN: usize = 8;
const MESSAGE_ID_LEN: usize = 10;

/// Whether `value` matches the RFC 4975 `ident` production.
#[must_use]
pub fn is_ident(value: &str) -> bool {
    let Some((first, rest)) = value.as_bytes().split_first() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && (3..=31).contains(&rest.len())
        && rest
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+' | b'%' | b'='))
}

fn random_ident(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

macro_rules! ident_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an identifier.
            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                is_ident(value).then(|| Self(value.to_owned()))
            }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self { Self(random_ident($len)) }

            /// Borrow the identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str { &self.0 }

            /// Borrow the identifier as wire bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] { self.0.as_bytes() }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str { &self.0 }
        }
    };
}

ident_newtype!(
    /// Transaction identifier, unique per connection.
    TransactionId,
    TRANSACTION_ID_LEN
);

ident_newtype!(
    /// Message identifier, unique within a session.
    MessageId,
    MESSAGE_ID_LEN
);

/// Response status code from the RFC 4975 registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    /// Transaction accepted.
    pub const OK: Self = Self(200);
    /// Malformed transaction.
    pub const BAD_REQUEST: Self = Self(400);
    /// Action forbidden.
    pub const FORBIDDEN: Self = Self(403);
    /// Request timed out.
    pub const TIMEOUT: Self = Self(408);
    /// Stop sending the message.
    pub const STOP_SENDING: Self = Self(413);
    /// Media type not understood.
    pub const UNSUPPORTED_MEDIA: Self = Self(415);
    /// Byte-Range out of bounds.
    pub const OUT_OF_BOUNDS: Self = Self(423);
    /// Session does not exist.
    pub const NO_SUCH_SESSION: Self = Self(481);
    /// Method not understood.
    pub const UNKNOWN_METHOD: Self = Self(501);
    /// Session is bound to another connection.
    pub const WRONG_CONNECTION: Self = Self(506);

    const ALL: [Self; 10] = [
        Self::OK,
        Self::BAD_REQUEST,
        Self::FORBIDDEN,
        Self::TIMEOUT,
        Self::STOP_SENDING,
        Self::UNSUPPORTED_MEDIA,
        Self::OUT_OF_BOUNDS,
        Self::NO_SUCH_SESSION,
        Self::UNKNOWN_METHOD,
        Self::WRONG_CONNECTION,
    ];

    /// Validate a numeric code against the registry.
    #[must_use]
    pub fn new(code: u16) -> Option<Self> { Self::ALL.into_iter().find(|c| c.0 == code) }

    /// Numeric value of the code.
    #[must_use]
    pub const fn as_u16(self) -> u16 { self.0 }

    /// Whether the code may be used to reject a message.
    #[must_use]
    pub const fn is_rejection(self) -> bool { self.0 != 200 }

    /// Reason phrase placed after the code on a response start line.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            408 => "Request Timeout",
            413 => "Stop Sending Message",
            415 => "Unsupported Media Type",
            423 => "Parameters Out Of Bounds",
            481 => "No Such Session",
            501 => "Unknown Method",
            _ => "Session Already Bound",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("abcd", true)]
    #[case("a1.b-c+d%e=f", true)]
    #[case("abc", false)]
    #[case(".abcd", false)]
    #[case("abcd efg", false)]
    #[case("a23456789012345678901234567890123", false)]
    #[case("a2345678901234567890123456789012", true)]
    fn ident_grammar(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(is_ident(value), ok);
    }

    #[rstest]
    fn generated_ids_are_valid() {
        let tid = TransactionId::generate();
        let mid = MessageId::generate();
        assert!(is_ident(tid.as_str()));
        assert!(is_ident(mid.as_str()));
        assert_ne!(TransactionId::generate(), tid);
    }

    #[rstest]
    #[case(200, true)]
    #[case(413, true)]
    #[case(506, true)]
    #[case(404, false)]
    #[case(999, false)]
    fn status_registry(#[case] code: u16, #[case] known: bool) {
        assert_eq!(StatusCode::new(code).is_some(), known);
    }

    #[rstest]
    fn ok_is_not_a_rejection() {
        assert!(!StatusCode::OK.is_rejection());
        assert!(StatusCode::STOP_SENDING.is_rejection());
        assert_eq!(StatusCode::WRONG_CONNECTION.reason(), "Session Already Bound");
    }
}
