//! Rotating client identities for the lightweight HTTP strategy.
//!
//! Each request picks a User-Agent from the pool at random. The RNG is
//! seedable so a run can be replayed with the same identity sequence.

use std::sync::{Arc, Mutex};

use propslab_core::util::XorShift64;

/// Sent alongside every rotated identity; a UA without language
/// headers is itself a bot signal.
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Desktop Chrome and Firefox identities. Kept deliberately boring:
/// exotic UA strings attract more scrutiny than stale common ones.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// A shared pool of client identities. Cloning shares the underlying
/// RNG, so clones draw from one sequence.
#[derive(Clone)]
pub struct IdentityPool {
    agents: Arc<Vec<String>>,
    rng: Arc<Mutex<XorShift64>>,
}

impl IdentityPool {
    /// Pool over the default identity set, seeded from the clock.
    pub fn new() -> Self {
        Self::with_agents(
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            XorShift64::from_entropy(),
        )
    }

    /// Deterministic pool for replayable runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_agents(
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            XorShift64::seeded(seed),
        )
    }

    /// Pool over a custom identity set. Falls back to the default set
    /// when `agents` is empty.
    pub fn with_agents(mut agents: Vec<String>, rng: XorShift64) -> Self {
        if agents.is_empty() {
            agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        Self {
            agents: Arc::new(agents),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Draw one identity at random.
    pub fn pick(&self) -> String {
        let index = {
            let mut rng = self.rng.lock().unwrap();
            rng.next_below(self.agents.len() as u64) as usize
        };
        self.agents[index].clone()
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new()
    }
}
