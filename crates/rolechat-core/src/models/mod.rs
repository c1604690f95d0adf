//! Data models for the rolechat backend.
//!
//! This module contains the request and response bodies exchanged with the
//! REST API:
//!
//! - `UserProfile` and the auth request/response bodies
//! - `Character` and its create/update/query shapes
//! - `Conversation`, `Message` and their list wrappers

pub mod character;
pub mod conversation;
pub mod user;

pub use character::{Character, CharacterList, CharacterQuery, CharacterUpdate, NewCharacter};
pub use conversation::{
    Conversation, ConversationList, ConversationQuery, Message, MessageList, MessageRole,
    NewConversation, PageQuery,
};
pub use user::{LoginCredentials, LoginResponse, NewUser, RegisterResponse, SuccessResponse, UserProfile};
