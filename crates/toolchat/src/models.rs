//! These models represent the objects passed around by the orchestrator
//!
//! There are several related formats we need to interact with:
//! - the chat wire format, sent between the UI and the server
//! - openai messages/tools, sent from the orchestrator to the LLM
//! - anthropic messages/tools, sent from the orchestrator to the LLM
//!
//! The internal models follow the chat wire format closely so a history can be
//! persisted verbatim. Provider formats are produced and parsed only inside
//! the provider adapters.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
