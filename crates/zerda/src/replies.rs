//! Command replies and the seam they are sent through.

use std::fmt;

use async_trait::async_trait;
use reconciler::DirectoryResult;

/// Reply text for failures the user cannot do anything about
pub const UNKNOWN_ERR_MSG: &str = "Something went wrong. I logged the issue so someone can fix it.";

/// Emoji prefix telling the user at a glance how their command went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Bad,
    Meh,
    Good,
}

impl Signal {
    pub fn emoji(self) -> &'static str {
        match self {
            Signal::Bad => ":no_entry:",
            Signal::Meh => ":ok:",
            Signal::Good => ":white_check_mark:",
        }
    }
}

/// A message to send back for one interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub signal: Option<Signal>,
    pub message: String,
    /// Only visible to the invoking user
    pub ephemeral: bool,
}

impl Reply {
    fn signalled(signal: Signal, message: impl Into<String>) -> Self {
        Self {
            signal: Some(signal),
            message: message.into(),
            ephemeral: true,
        }
    }

    pub fn bad(message: impl Into<String>) -> Self {
        Self::signalled(Signal::Bad, message)
    }

    pub fn meh(message: impl Into<String>) -> Self {
        Self::signalled(Signal::Meh, message)
    }

    pub fn good(message: impl Into<String>) -> Self {
        Self::signalled(Signal::Good, message)
    }

    pub fn unknown_error() -> Self {
        Self::bad(UNKNOWN_ERR_MSG)
    }

    /// Informational reply visible to the whole channel
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            signal: None,
            message: message.into(),
            ephemeral: false,
        }
    }

    /// Final message text, emoji included
    pub fn content(&self) -> String {
        match self.signal {
            Some(signal) => format!("{} {}", signal.emoji(), self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content())
    }
}

/// Enough of an interaction to answer it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRef {
    pub id: String,
    pub token: String,
}

/// Sends replies back to the platform
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, interaction: &InteractionRef, reply: &Reply) -> DirectoryResult<()>;
}
