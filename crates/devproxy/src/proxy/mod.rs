//! Proxy core: rule-matched forwarding, streaming relay, and correlation.

pub mod correlation;
pub mod forward;
pub mod relay;
pub mod router;

pub use router::ProxyRouter;
