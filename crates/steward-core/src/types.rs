use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical transport identifier. Drives memory isolation: each tag owns an
/// independent conversation store, and searches never cross tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTag {
    Telegram,
    Email,
    Whatsapp,
    X,
    Linkedin,
    Slack,
    Discord,
    Calendar,
    Web,
    /// Fallback for unknown or absent channels.
    General,
}

impl ChannelTag {
    pub const ALL: [ChannelTag; 10] = [
        ChannelTag::Telegram,
        ChannelTag::Email,
        ChannelTag::Whatsapp,
        ChannelTag::X,
        ChannelTag::Linkedin,
        ChannelTag::Slack,
        ChannelTag::Discord,
        ChannelTag::Calendar,
        ChannelTag::Web,
        ChannelTag::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelTag::Telegram => "telegram",
            ChannelTag::Email => "email",
            ChannelTag::Whatsapp => "whatsapp",
            ChannelTag::X => "x",
            ChannelTag::Linkedin => "linkedin",
            ChannelTag::Slack => "slack",
            ChannelTag::Discord => "discord",
            ChannelTag::Calendar => "calendar",
            ChannelTag::Web => "web",
            ChannelTag::General => "general",
        }
    }

    /// Resolve a raw channel string; unknown names fall back to `General`.
    pub fn resolve(s: &str) -> ChannelTag {
        s.parse().unwrap_or(ChannelTag::General)
    }
}

impl fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(ChannelTag::Telegram),
            "email" => Ok(ChannelTag::Email),
            "whatsapp" => Ok(ChannelTag::Whatsapp),
            "x" => Ok(ChannelTag::X),
            "linkedin" => Ok(ChannelTag::Linkedin),
            "slack" => Ok(ChannelTag::Slack),
            "discord" => Ok(ChannelTag::Discord),
            "calendar" => Ok(ChannelTag::Calendar),
            "web" => Ok(ChannelTag::Web),
            "general" => Ok(ChannelTag::General),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Short trace id correlating one conversation turn across log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        // 8 hex chars are plenty for log correlation within one process.
        let n: u64 = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self(format!("{:08x}", n as u32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
