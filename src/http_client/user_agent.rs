//! Rotating browser identities for outbound requests.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

/// Real browser user agents used for rotation.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Cycles through a shuffled copy of the identity list.
///
/// The order is randomized once at construction; every identity is handed
/// out once per cycle.
pub struct IdentityRotator {
    agents: Vec<String>,
    cursor: AtomicUsize,
}

impl IdentityRotator {
    pub fn new() -> Self {
        Self::with_agents(BROWSER_USER_AGENTS.iter().map(|s| s.to_string()).collect())
    }

    /// Custom list. An empty list falls back to the built-in agents.
    pub fn with_agents(mut agents: Vec<String>) -> Self {
        if agents.is_empty() {
            agents = BROWSER_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        agents.shuffle(&mut rand::rng());
        Self {
            agents,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_agent(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        Self::new()
    }
}
