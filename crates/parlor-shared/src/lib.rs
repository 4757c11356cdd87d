//! # parlor-shared
//!
//! Types shared by the Parlor store and server: identifiers, conversation
//! keys, the message model and the JSON wire protocol spoken on the push
//! stream and the request endpoints.

pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use message::{Media, Message, NewMessage, Target};
pub use protocol::{ChatEvent, MessageEvent, SendRequest, TypingRequest};
pub use types::{ConversationKey, GroupId, MessageId, UserId};
