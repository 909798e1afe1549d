//! The wire message taxonomy and its numeric-`type`-discriminated codec.
//!
//! `spec.md` §4.6/§9 are explicit: decode by peeking the numeric `type`
//! field first, then dispatch to a type-specific deserializer — replacing
//! the teacher's `ws.rs`, which tags its client commands with an
//! `"action"` string and branches on it (`"create_game"`, `"submit_move"`,
//! …). This module is the "tagged-variant sum type" `spec.md` §9 prescribes
//! in place of that runtime string dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Numeric `type` codes, stable per `spec.md` §4.6/§6.
pub mod codes {
    pub const CONNECT: i64 = 0;
    pub const CONNECT_RESPONSE: i64 = 1;
    pub const DISCONNECT: i64 = 2;
    pub const HEARTBEAT: i64 = 3;
    pub const HEARTBEAT_ACK: i64 = 4;
    pub const LOGIN: i64 = 10;
    pub const LOGIN_RESPONSE: i64 = 11;
    pub const LOGOUT: i64 = 12;
    pub const REGISTER: i64 = 13;
    pub const REGISTER_RESPONSE: i64 = 14;
    pub const FIND_MATCH: i64 = 20;
    pub const CANCEL_FIND_MATCH: i64 = 21;
    pub const MATCH_FOUND: i64 = 22;
    pub const QUEUE_STATUS: i64 = 23;
    pub const GAME_START: i64 = 30;
    pub const GAME_STATE: i64 = 31;
    pub const GAME_END: i64 = 32;
    pub const MOVE_REQUEST: i64 = 40;
    pub const MOVE_RESPONSE: i64 = 41;
    pub const MOVE_NOTIFICATION: i64 = 42;
    pub const RESIGN: i64 = 50;
    pub const OFFER_DRAW: i64 = 51;
    pub const DRAW_OFFERED: i64 = 52;
    pub const ACCEPT_DRAW: i64 = 53;
    pub const DECLINE_DRAW: i64 = 54;
    pub const TIME_UPDATE: i64 = 60;
    pub const TIMEOUT_WARNING: i64 = 61;
    pub const ERROR: i64 = 99;
}

/// The three fields every frame carries, independent of payload
/// (`spec.md` §4.6).
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub type_code: i64,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub timestamp: i64,
}

/// Every error code the core may report (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownMessage,
    RateLimited,
    InvalidCredentials,
    InvalidToken,
    NotLoggedIn,
    PlayerNotFound,
    SessionReplaced,
    SessionError,
    InvalidUsername,
    InvalidEmail,
    UsernameTaken,
    EmailTaken,
    DatabaseError,
    DrawDeclined,
    InternalError,
    AccountBanned,
    Disconnected,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownMessage => "UNKNOWN_MESSAGE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::NotLoggedIn => "NOT_LOGGED_IN",
            ErrorCode::PlayerNotFound => "PLAYER_NOT_FOUND",
            ErrorCode::SessionReplaced => "SESSION_REPLACED",
            ErrorCode::SessionError => "SESSION_ERROR",
            ErrorCode::InvalidUsername => "INVALID_USERNAME",
            ErrorCode::InvalidEmail => "INVALID_EMAIL",
            ErrorCode::UsernameTaken => "USERNAME_TAKEN",
            ErrorCode::EmailTaken => "EMAIL_TAKEN",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::DrawDeclined => "DRAW_DECLINED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::AccountBanned => "ACCOUNT_BANNED",
            ErrorCode::Disconnected => "DISCONNECTED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(rename = "relatedMessageId", skip_serializing_if = "Option::is_none")]
    pub related_message_id: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.as_str(), message: message.into(), details: None, related_message_id: None }
    }

    pub fn related_to(mut self, message_id: impl Into<String>) -> Self {
        self.related_message_id = Some(message_id.into());
        self
    }
}

/// Every message a client may send, decoded from its numeric `type`.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Connect,
    Heartbeat,
    Login { username: String, password: String },
    Register { username: String, email: String, password: String },
    Logout,
    FindMatch { time_control: String, initial_time_ms: i64, increment_ms: i64 },
    CancelFindMatch,
    MoveRequest { game_id: Uuid, from: String, to: String, promotion: Option<char>, expected_sequence: u64 },
    Resign { game_id: Uuid },
    OfferDraw { game_id: Uuid },
    AcceptDraw { game_id: Uuid },
    DeclineDraw { game_id: Uuid },
}

#[derive(Deserialize)]
struct LoginFields {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RegisterFields {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct FindMatchFields {
    #[serde(rename = "timeControl")]
    time_control: String,
    #[serde(rename = "initialTimeMs")]
    initial_time_ms: i64,
    #[serde(rename = "incrementMs")]
    increment_ms: i64,
}

#[derive(Deserialize)]
struct MoveRequestFields {
    #[serde(rename = "gameId")]
    game_id: Uuid,
    from: String,
    to: String,
    #[serde(default)]
    promotion: Option<char>,
    #[serde(rename = "expectedSequence", default)]
    expected_sequence: u64,
}

#[derive(Deserialize)]
struct GameIdFields {
    #[serde(rename = "gameId")]
    game_id: Uuid,
}

/// Decodes one newline-delimited frame: peek `type`, then dispatch to a
/// type-specific deserializer (`spec.md` §4.6's two-step contract).
pub fn decode(line: &str) -> Result<(Envelope, ClientMessage), ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(|_| ProtocolError::Malformed)?;
    let envelope: Envelope = serde_json::from_value(value.clone()).map_err(|_| ProtocolError::Malformed)?;

    let bad = || ProtocolError::BadPayload(envelope.type_code);
    let msg = match envelope.type_code {
        codes::CONNECT => ClientMessage::Connect,
        codes::HEARTBEAT => ClientMessage::Heartbeat,
        codes::LOGOUT => ClientMessage::Logout,
        codes::CANCEL_FIND_MATCH => ClientMessage::CancelFindMatch,
        codes::LOGIN => {
            let f: LoginFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::Login { username: f.username, password: f.password }
        }
        codes::REGISTER => {
            let f: RegisterFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::Register { username: f.username, email: f.email, password: f.password }
        }
        codes::FIND_MATCH => {
            let f: FindMatchFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::FindMatch { time_control: f.time_control, initial_time_ms: f.initial_time_ms, increment_ms: f.increment_ms }
        }
        codes::MOVE_REQUEST => {
            let f: MoveRequestFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::MoveRequest { game_id: f.game_id, from: f.from, to: f.to, promotion: f.promotion, expected_sequence: f.expected_sequence }
        }
        codes::RESIGN => {
            let f: GameIdFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::Resign { game_id: f.game_id }
        }
        codes::OFFER_DRAW => {
            let f: GameIdFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::OfferDraw { game_id: f.game_id }
        }
        codes::ACCEPT_DRAW => {
            let f: GameIdFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::AcceptDraw { game_id: f.game_id }
        }
        codes::DECLINE_DRAW => {
            let f: GameIdFields = serde_json::from_value(value).map_err(|_| bad())?;
            ClientMessage::DeclineDraw { game_id: f.game_id }
        }
        other => return Err(ProtocolError::UnknownType(other)),
    };

    Ok((envelope, msg))
}

/// Serializes any payload plus the common envelope fields into one
/// newline-terminated JSON frame.
pub fn encode<T: Serialize>(type_code: i64, message_id: &str, timestamp: i64, payload: &T) -> String {
    let mut value = serde_json::to_value(payload).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::from(type_code));
        map.insert("messageId".to_string(), Value::from(message_id));
        map.insert("timestamp".to_string(), Value::from(timestamp));
    }
    format!("{value}\n")
}

pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_move_request_by_numeric_type() {
        let line = r#"{"type":40,"messageId":"abc0123456789def","timestamp":1,"gameId":"3fa85f64-5717-4562-b3fc-2c963f66afa6","from":"e2","to":"e4"}"#;
        let (envelope, msg) = decode(line).unwrap();
        assert_eq!(envelope.type_code, codes::MOVE_REQUEST);
        match msg {
            ClientMessage::MoveRequest { from, to, .. } => {
                assert_eq!(from, "e2");
                assert_eq!(to, "e4");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let line = r#"{"type":9999,"messageId":"abc0123456789def","timestamp":1}"#;
        let err = decode(line).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(9999)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed));
    }

    #[test]
    fn encode_includes_the_numeric_type_field() {
        let payload = ErrorPayload::new(ErrorCode::RateLimited, "slow down");
        let line = encode(codes::ERROR, "id", 0, &payload);
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], 99);
        assert_eq!(value["code"], "RATE_LIMITED");
    }
}
