//! Channel naming
//!
//! Channels are dot-separated segments: `orders.eu.created`
//! Each segment must match: [a-zA-Z0-9_-]+

use std::fmt;
use thiserror::Error;

fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_segment_char)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel name cannot be empty")]
    Empty,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidSegment(String),

    #[error("empty segment in channel name")]
    EmptySegment,
}

/// A validated channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    name: String,
}

impl Channel {
    /// Parse and validate a channel name
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }

        for part in name.split('.') {
            if part.is_empty() {
                return Err(ChannelError::EmptySegment);
            }
            if !is_valid_segment(part) {
                return Err(ChannelError::InvalidSegment(part.to_string()));
            }
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Number of dot-separated segments
    pub fn depth(&self) -> usize {
        self.name.split('.').count()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.name
    }
}
