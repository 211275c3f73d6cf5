// Canary traffic routing

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// Which loaded model answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Active,
    Canary,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Active => "active",
            Route::Canary => "canary",
        }
    }

    pub fn is_canary(&self) -> bool {
        matches!(self, Route::Canary)
    }
}

/// Splits single-request traffic between the active and canary models.
///
/// Each call draws a uniform integer in `1..=100` and routes to the canary
/// when the draw is at most the canary's traffic percent. Routing keeps no
/// per-request state; the only shared state is the random source.
pub struct CanaryRouter {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl CanaryRouter {
    /// Deterministic router for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Router over an arbitrary random source.
    pub fn from_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Router seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Picks the model for one request. No draw is made when no canary is
    /// loaded.
    pub fn route(&self, traffic_percent: u8, canary_loaded: bool) -> Route {
        if !canary_loaded {
            return Route::Active;
        }
        let draw: u8 = self.rng.lock().gen_range(1..=100);
        if draw <= traffic_percent {
            Route::Canary
        } else {
            Route::Active
        }
    }
}

impl Default for CanaryRouter {
    fn default() -> Self {
        Self::from_entropy()
    }
}
