//! Inbound sender authorization. Every transport consults the allow-list
//! before a message reaches the pipeline; unknown identities are dropped
//! with a warning, never answered.

use tracing::warn;

#[derive(Debug, Clone)]
pub struct AllowList {
    senders: Vec<String>,
}

impl AllowList {
    pub fn new(senders: Vec<String>) -> Self {
        Self { senders }
    }

    /// An empty allow-list admits nobody — the agent serves one principal
    /// and must be explicitly told who that is.
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        let allowed = self.senders.iter().any(|s| s == sender_id);
        if !allowed {
            warn!(sender = %sender_id, "dropping message from non-authorized sender");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_everyone() {
        let list = AllowList::new(vec![]);
        assert!(!list.is_allowed("12345"));
    }

    #[test]
    fn listed_sender_is_allowed() {
        let list = AllowList::new(vec!["12345".into(), "+15551234567".into()]);
        assert!(list.is_allowed("12345"));
        assert!(list.is_allowed("+15551234567"));
        assert!(!list.is_allowed("99999"));
    }
}
