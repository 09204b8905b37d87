//! Multi-turn prompts: at most one pending question per user.
//!
//! Opening a prompt records what the next free-text input from that user
//! means. [`Conversations::take`] consumes it atomically, so a message can
//! never be answered twice. Prompts older than the configured timeout read
//! as idle.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::chain::ChainId;
use crate::error::WalletError;

/// What the next input from a user will be interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    /// A token contract address to register.
    AwaitingTokenAddress {
        /// Chain that was current when the prompt opened.
        chain_id: ChainId,
    },
    /// `"<recipient> <amount>"` for a native transfer.
    AwaitingSendDetails {
        /// Chain that was current when the prompt opened.
        chain_id: ChainId,
    },
}

/// Prompt kinds a front-end can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Ask for a token contract address.
    AddToken,
    /// Ask for transfer details.
    Send,
}

impl PromptKind {
    /// The prompt for this kind on `chain_id`.
    #[must_use]
    pub const fn on(self, chain_id: ChainId) -> Prompt {
        match self {
            Self::AddToken => Prompt::AwaitingTokenAddress { chain_id },
            Self::Send => Prompt::AwaitingSendDetails { chain_id },
        }
    }
}

/// Pending prompts keyed by user id.
#[derive(Debug)]
pub struct Conversations {
    pending: Mutex<HashMap<String, (Prompt, Instant)>>,
    timeout: Duration,
}

impl Conversations {
    /// Create an empty table whose prompts expire after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Replace any pending prompt for `user_id`.
    pub fn open(&self, user_id: &str, prompt: Prompt) {
        debug!(user_id, ?prompt, "prompt opened");
        let mut pending = self.pending.lock();
        self.expire(&mut pending);
        pending.insert(user_id.to_owned(), (prompt, Instant::now()));
    }

    /// Remove and return the user's prompt if it has not expired.
    pub fn take(&self, user_id: &str) -> Option<Prompt> {
        let mut pending = self.pending.lock();
        self.expire(&mut pending);
        pending.remove(user_id).map(|(prompt, _)| prompt)
    }

    /// Drop the user's prompt. Returns whether a live one was pending.
    pub fn cancel(&self, user_id: &str) -> bool {
        self.take(user_id).is_some()
    }

    fn expire(&self, pending: &mut HashMap<String, (Prompt, Instant)>) {
        pending.retain(|_, (_, opened)| opened.elapsed() < self.timeout);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Split send input into recipient and amount.
///
/// # Errors
///
/// Returns [`WalletError::InvalidInput`] unless the input has exactly two
/// whitespace-separated fields.
pub fn parse_send_details(input: &str) -> Result<(&str, &str), WalletError> {
    let mut fields = input.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(recipient), Some(amount), None) => Ok((recipient, amount)),
        _ => Err(WalletError::invalid(
            "expected '<recipient address> <amount>'",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn take_consumes_prompt_once() {
        let conversations = Conversations::new(Duration::from_secs(300));
        conversations.open("alice", PromptKind::Send.on(137));

        assert_eq!(
            conversations.take("alice"),
            Some(Prompt::AwaitingSendDetails { chain_id: 137 })
        );
        assert_eq!(conversations.take("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_prompt_reads_as_idle() {
        let conversations = Conversations::new(Duration::from_secs(300));
        conversations.open("alice", PromptKind::AddToken.on(1));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(conversations.take("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn opening_drops_expired_prompts_of_other_users() {
        let conversations = Conversations::new(Duration::from_secs(300));
        for n in 0..50 {
            conversations.open(&format!("user-{n}"), PromptKind::Send.on(1));
        }
        assert_eq!(conversations.len(), 50);

        tokio::time::advance(Duration::from_secs(301)).await;
        conversations.open("alice", PromptKind::AddToken.on(1));
        assert_eq!(conversations.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reports_whether_a_prompt_was_pending() {
        let conversations = Conversations::new(Duration::from_secs(300));
        conversations.open("alice", PromptKind::Send.on(1));

        assert!(conversations.cancel("alice"));
        assert!(!conversations.cancel("alice"));
        assert_eq!(conversations.take("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_prompt_replaces_older() {
        let conversations = Conversations::new(Duration::from_secs(300));
        conversations.open("alice", PromptKind::AddToken.on(1));
        conversations.open("alice", PromptKind::Send.on(1));
        conversations.open("bob", PromptKind::AddToken.on(1));

        assert_eq!(
            conversations.take("alice"),
            Some(Prompt::AwaitingSendDetails { chain_id: 1 })
        );
        conversations.cancel("bob");
        assert_eq!(conversations.take("bob"), None);
    }

    #[test]
    fn send_details_need_exactly_two_fields() {
        assert_eq!(
            parse_send_details("  0xabc   0.5 ").unwrap(),
            ("0xabc", "0.5")
        );
        for input in ["", "0xabc", "0xabc 0.5 extra"] {
            assert_eq!(parse_send_details(input).unwrap_err().kind(), "invalid_input");
        }
    }
}
