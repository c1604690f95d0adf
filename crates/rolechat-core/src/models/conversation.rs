use serde::{Deserialize, Serialize};

use super::Character;

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub character_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub session_prompt: Option<String>,
    pub last_message_at: String,
    pub created_at: String,
    pub character: Character,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    pub character_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub messages: Vec<Message>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Page/limit pair shared by the paged message endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}
