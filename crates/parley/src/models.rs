//! These models represent the objects passed around by the agent
//!
//! Every backend speaks a slightly different dialect: OpenAI and Ollama accept
//! `tool` messages keyed by id, Anthropic folds tool results into user turns, and
//! Gemini calls the assistant `model`. We always convert at the adapter edge, so
//! the canonical history stored in a [`conversation::Conversation`] uses the
//! single vocabulary defined here.
pub mod conversation;
pub mod message;
pub mod role;
pub mod tool;
