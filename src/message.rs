//! Heartbeat messages
//!
//! The client treats the body as opaque bytes. The only field it reads or
//! writes is the correlation id, which it stamps from the acquired slot
//! before transmission and which the service echoes back on the response.

/// Correlation id carried by a message that has not been assigned a slot.
pub const UNASSIGNED_ID: i32 = -1;

/// What a message is for, as far as the client is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Caller request, correlated by slot id
    Request,
    /// Service response, echoing the request's slot id
    Response,
    /// Digest handshake token (either direction)
    SaslToken,
    /// Handshake finished successfully
    SaslComplete,
    /// Handshake rejected
    NotAuthorized,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::SaslToken => "sasl_token",
            MessageKind::SaslComplete => "sasl_complete",
            MessageKind::NotAuthorized => "not_authorized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(MessageKind::Request),
            "response" => Some(MessageKind::Response),
            "sasl_token" => Some(MessageKind::SaslToken),
            "sasl_complete" => Some(MessageKind::SaslComplete),
            "not_authorized" => Some(MessageKind::NotAuthorized),
            _ => None,
        }
    }
}

/// A message exchanged with the pacemaker service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    kind: MessageKind,
    message_id: i32,
    body: Vec<u8>,
}

impl HeartbeatMessage {
    pub fn new(kind: MessageKind, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            message_id: UNASSIGNED_ID,
            body: body.into(),
        }
    }

    pub fn request(body: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Request, body)
    }

    /// A response carrying the given correlation id.
    pub fn response(message_id: i32, body: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Response, body).with_message_id(message_id)
    }

    pub fn with_message_id(mut self, message_id: i32) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn set_message_id(&mut self, message_id: i32) {
        self.message_id = message_id;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_starts_unassigned() {
        let msg = HeartbeatMessage::request(b"pulse".to_vec());
        assert_eq!(msg.message_id(), UNASSIGNED_ID);
        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(msg.body(), b"pulse");
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in [
            MessageKind::Request,
            MessageKind::Response,
            MessageKind::SaslToken,
            MessageKind::SaslComplete,
            MessageKind::NotAuthorized,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("call_zome"), None);
    }
}
