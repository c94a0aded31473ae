use std::fmt;
use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PATH: &str = "/";

/// Text frame sent to a client whose requested resource does not match the server path.
pub const REJECTION_TEXT: &str = "wrong websocket url path";
/// Close reason accompanying a path rejection.
pub const INVALID_PATH_REASON: &str = "Invalid request path";
/// Close reason used when the server shuts down or is not accepting connections.
pub const SERVER_CLOSED_REASON: &str = "server closed";
/// Close reason a client sends when it disconnects on its own.
pub const CLIENT_CLOSING_REASON: &str = "closing";

/// An outbound or inbound WebSocket payload.
///
/// Payloads are reference counted so a broadcast shares one allocation
/// across every connection queue it lands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    Text(Arc<str>),
    Binary(Arc<[u8]>),
}

impl Message {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Message::Text(text.into())
    }

    pub fn binary(data: impl Into<Arc<[u8]>>) -> Self {
        Message::Binary(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => &data[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => f.write_str(text),
            Message::Binary(data) => write!(f, "<{} binary bytes>", data.len()),
        }
    }
}

/// WebSocket close status codes (RFC 6455 §7.4.1) used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001, endpoint is going away (server shutdown).
    GoingAway,
    /// 1008, message or request violates server policy.
    PolicyViolation,
    /// 1011, the server hit an unexpected condition.
    InternalError,
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::PolicyViolation => 1008,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1008 => CloseCode::PolicyViolation,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message() {
        let message = Message::text("hello");
        assert_eq!(message.as_bytes(), b"hello");
        assert_eq!(message.len(), 5);
        assert!(!message.is_empty());
    }

    #[test]
    fn test_binary_message() {
        let message = Message::from(vec![1u8, 2, 3]);
        assert_eq!(message.as_bytes(), &[1, 2, 3]);
        assert_eq!(message.to_string(), "<3 binary bytes>");
    }

    #[test]
    fn test_empty_message() {
        assert!(Message::text("").is_empty());
        assert!(Message::binary(Vec::<u8>::new()).is_empty());
    }

    #[test]
    fn test_clone_shares_payload() {
        let message = Message::text("shared");
        let copy = message.clone();
        match (&message, &copy) {
            (Message::Text(a), Message::Text(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_close_code_values() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::GoingAway.as_u16(), 1001);
        assert_eq!(CloseCode::PolicyViolation.as_u16(), 1008);
        assert_eq!(CloseCode::InternalError.as_u16(), 1011);
        assert_eq!(CloseCode::Other(4000).as_u16(), 4000);
    }

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from(1008), CloseCode::PolicyViolation);
        assert_eq!(CloseCode::from(1001), CloseCode::GoingAway);
        assert_eq!(CloseCode::from(3001), CloseCode::Other(3001));
        assert_eq!(u16::from(CloseCode::Normal), 1000);
    }

    #[test]
    fn test_rejection_constants() {
        assert_eq!(REJECTION_TEXT, "wrong websocket url path");
        assert_eq!(INVALID_PATH_REASON, "Invalid request path");
        assert!(DEFAULT_PATH.starts_with('/'));
    }
}
