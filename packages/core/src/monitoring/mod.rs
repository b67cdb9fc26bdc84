//! Service monitoring: sweeps, checkers and expiry lookups.

pub mod engine;
pub mod error;
pub mod http_checker;
pub mod tls_expiry;
pub mod types;
pub mod whois;

pub use engine::SweepEngine;
pub use error::{ExpiryError, MonitorError};
pub use http_checker::HttpChecker;
pub use tls_expiry::fetch_tls_expiry;
pub use types::{CheckResult, Checker, ServiceLister, ServiceProbe, StaticLister};
pub use whois::{fetch_domain_expiry, WhoisClient};
