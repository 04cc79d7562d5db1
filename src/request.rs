//! Request payloads handed to the executor by prompt assembly

use serde::{Deserialize, Serialize};
use log::debug;

use crate::config::GenerationParams;
use crate::providers::anthropic::{MessagesRequest, ThinkingParam};

/// Temperature the provider requires while extended reasoning is on
pub const REASONING_TEMPERATURE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role
{   User
  , Assistant
}

/// One named sub-part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart
{   Text
    {   text: String
    }
}

/// Plain text or a list of parts (used for attachments)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent
{   Text(String)
  , Parts(Vec<ContentPart>)
}

impl MessageContent
{   /// Concatenated text of every part
    pub fn as_text(&self) -> String
    {   match self
        {   MessageContent::Text(t) => t.clone()
          , MessageContent::Parts(parts) => parts
              .iter()
              .map(|ContentPart::Text { text }| text.as_str())
              .collect::<Vec<_>>()
              .join("\n")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message
{   pub role: Role
  , pub content: MessageContent
}

/// A text file attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment
{   pub name: String
  , pub content: String
}

impl Message
{   pub fn user(text: impl Into<String>) -> Self
    {   Message
        {   role: Role::User
          , content: MessageContent::Text(text.into())
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self
    {   Message
        {   role: Role::Assistant
          , content: MessageContent::Text(text.into())
        }
    }

    /// Each attachment becomes a `[File: name]` part ahead of the text.
    /// Without attachments the content stays plain text.
    pub fn with_attachments(
      role: Role
    , text: impl Into<String>
    , attachments: &[Attachment]
    ) -> Self
    {   let text = text.into();
        if attachments.is_empty()
        {   return Message
            {   role
              , content: MessageContent::Text(text)
            };
        }

        let mut parts: Vec<ContentPart> = attachments
          .iter()
          .map(|a| ContentPart::Text
          {   text: format!("[File: {}]\n{}", a.name, a.content)
          })
          .collect();
        parts.push(ContentPart::Text { text });

        Message
        {   role
          , content: MessageContent::Parts(parts)
        }
    }
}

/// One logical generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload
{   pub model: String
  , pub max_tokens: u32
  , pub temperature: f32
  , /// Requested reasoning budget; ignored for models outside the
    /// allow-list
    pub reasoning_budget: Option<u32>
  , pub system: String
  , pub messages: Vec<Message>
}

impl RequestPayload
{   pub fn new(
      params: &GenerationParams
    , system: impl Into<String>
    , messages: Vec<Message>
    ) -> Self
    {   RequestPayload
        {   model: params.model.clone()
          , max_tokens: params.max_tokens
          , temperature: params.temperature
          , reasoning_budget: params.reasoning_budget
          , system: system.into()
          , messages
        }
    }

    /// Whether extended reasoning will actually be sent
    pub fn reasoning_enabled(&self) -> bool
    {   self.reasoning_budget.is_some()
          && crate::models::supports_extended_reasoning(&self.model)
    }

    /// Build the provider request, applying the reasoning rules:
    /// forced temperature, and `max_tokens` above the budget.
    pub fn to_wire(&self, stream: bool) -> MessagesRequest
    {   let (thinking, temperature, max_tokens)
          = match self.reasoning_budget
          {   Some(budget) if self.reasoning_enabled() => {
                let max_tokens = if self.max_tokens <= budget
                {   budget + self.max_tokens
                } else
                {   self.max_tokens
                };
                (
                  Some(ThinkingParam::enabled(budget))
                , REASONING_TEMPERATURE
                , max_tokens
                )
              }
            , _ => (None, self.temperature, self.max_tokens)
          };

        debug!(
          "Building request for {} (reasoning: {})",
          self.model,
          thinking.is_some()
        );

        MessagesRequest
        {   model: self.model.clone()
          , max_tokens
          , system: if self.system.is_empty()
            {   None
            } else
            {   Some(self.system.clone())
            }
          , messages: self.messages.clone()
          , temperature: Some(temperature)
          , thinking
          , stream: if stream { Some(true) } else { None }
        }
    }
}
