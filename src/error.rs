//! Typed error enums for each module boundary.
//!
//! Every fallible core operation returns one of these instead of a bare
//! `String` or `&'static str`. The dispatch loop in [`crate::net::hub`] is the
//! only place an error is turned into a wire-level `Error` message; everywhere
//! else these propagate with `?`.

use thiserror::Error;

/// Errors produced by [`crate::chess::validator`] while validating a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("no piece on the origin square")]
    InvalidPiece,
    #[error("it is not that player's turn")]
    NotYourTurn,
    #[error("a piece blocks the path")]
    PathBlocked,
    #[error("castling is not available")]
    InvalidCastling,
    #[error("en passant is not available on this square")]
    InvalidEnPassant,
    #[error("promotion is required or the requested piece is invalid")]
    InvalidPromotion,
    #[error("that move would leave the mover's own king in check")]
    WouldBeInCheck,
}

/// Errors produced by [`crate::session::GameSession`] while applying a
/// game-level action (as opposed to a move).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("the game is not in progress")]
    GameNotInProgress,
    #[error("it is not that player's turn")]
    NotYourTurn,
    #[error("that player is not part of this game")]
    NotAParticipant,
    #[error("there is no pending draw offer to accept")]
    NoDrawOffer,
}

/// Errors surfaced by the [`crate::storage`] DAO layer.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("no such record")]
    NotFound,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("email is already taken")]
    EmailTaken,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors surfaced while decoding a wire frame in [`crate::net::protocol`].
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("frame was not valid UTF-8 JSON")]
    Malformed,
    #[error("unrecognized message type {0}")]
    UnknownType(i64),
    #[error("message type {0} did not match its expected payload shape")]
    BadPayload(i64),
}

/// Top-level startup error, fatal to the process (see spec.md §7: "Startup
/// failures of the persistence backend are fatal unless in-memory mode").
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("persistence backend failed to initialize: {0}")]
    Persistence(String),
}
