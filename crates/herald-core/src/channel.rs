use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::errors::{NotifyError, Result};

/// Channels every deployment starts with unless configured otherwise.
pub const DEFAULT_CHANNELS: &[&str] = &["avatar", "profile"];

/// A named topic events are published to and subscribed from.
///
/// Only a [`ChannelRegistry`] hands these out, so holding a `Channel` means
/// the name has already been validated.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Channel(Arc<str>);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fixed, ordered set of channels a client may subscribe to.
///
/// Built once at process start and shared read-only afterwards.
#[derive(Clone, Debug)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS
                .iter()
                .map(|name| Channel(Arc::from(*name)))
                .collect(),
        }
    }
}

impl ChannelRegistry {
    /// Build a registry from configured names, preserving their order.
    ///
    /// Names must be non-empty, unique, and made of ASCII alphanumerics or
    /// `_ - . :` so they can appear verbatim in an `event:` line.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut channels: Vec<Channel> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !is_valid_name(name) {
                return Err(NotifyError::InvalidChannel(name.to_string()));
            }
            if channels.iter().any(|c| c.as_str() == name) {
                return Err(NotifyError::InvalidChannel(format!("duplicate channel {name}")));
            }
            channels.push(Channel(Arc::from(name)));
        }
        if channels.is_empty() {
            return Err(NotifyError::InvalidChannel("registry has no channels".into()));
        }
        Ok(Self { channels })
    }

    /// All registered channels, in registration order.
    pub fn all_channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.as_str() == name)
    }

    /// Look up a channel by name.
    pub fn resolve(&self, name: &str) -> Result<Channel> {
        self.channels
            .iter()
            .find(|c| c.as_str() == name)
            .cloned()
            .ok_or_else(|| NotifyError::InvalidChannel(name.to_string()))
    }

    /// Resolve every name or none. Duplicates collapse to one entry.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Channel>> {
        let mut resolved: Vec<Channel> = Vec::with_capacity(names.len());
        for name in names {
            let channel = self.resolve(name.as_ref())?;
            if !resolved.contains(&channel) {
                resolved.push(channel);
            }
        }
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':'))
}
