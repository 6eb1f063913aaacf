//! Engine settings, injected by the binary.

use crate::types::Percentage;
use chrono::Duration;

/// Tunables for the closeout services.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseoutSettings {
    /// Age after which an abandoned `FINALIZING` claim may be taken over
    pub claim_ttl: Duration,
    /// Venue table commission rate when the event has none configured
    pub default_venue_rate: Percentage,
}

impl Default for CloseoutSettings {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::seconds(300),
            default_venue_rate: Percentage::from_whole(10),
        }
    }
}
