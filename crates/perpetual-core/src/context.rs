//! Outbound payload construction with bounded history
//!
//! Request size is bounded by a message-count budget rather than token
//! estimation. When history exceeds the budget, the window is cut so it
//! starts at an assistant turn, preceded by a synthetic user notice, which
//! keeps the user/assistant alternation coherent for the API.

use crate::types::{Message, Role};

/// Synthetic user message marking where older turns were dropped
pub const TRUNCATION_NOTICE: &str = "[Conversation truncated]";

/// Build the exact ordered message list to submit to the API.
///
/// The system prompt, if non-blank after trimming, always becomes the single
/// leading system message; system messages found in history are never
/// forwarded. Pure function of its inputs.
pub fn build_payload(system_prompt: &str, history: &[Message], budget: usize) -> Vec<Message> {
    let mut payload = Vec::new();

    let prompt = system_prompt.trim();
    if !prompt.is_empty() {
        payload.push(Message::system(prompt));
    }

    let non_system: Vec<&Message> = history
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();

    if non_system.len() <= budget {
        payload.extend(non_system.into_iter().cloned());
        return payload;
    }

    // Over budget: keep the last `budget` messages, then advance the window
    // start to the first assistant turn within it.
    let tail = &non_system[non_system.len() - budget..];

    match tail.iter().position(|m| m.role == Role::Assistant) {
        Some(k) => {
            payload.push(Message::user(TRUNCATION_NOTICE));
            payload.extend(tail[k..].iter().map(|&m| m.clone()));
        }
        None => {
            // No assistant turn anywhere in the window; send it as-is.
            payload.extend(tail.iter().map(|&m| m.clone()));
        }
    }

    payload
}
