/// Ordered "first success wins" acquisition over a chain of equivalent sources.
///
/// Attempts run strictly one after another, never concurrently, so a chain
/// has at most one request in flight and the winner is always the
/// highest-priority source that works.  Nothing is merged across sources.
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::FetchError;

/// A plain fetch descriptor.  Chains whose sources need extra decoding
/// carry their own descriptor type instead (anything `Display`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub label: String,
    pub url: String,
}

impl Source {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.url)
    }
}

/// Successful chain result plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    /// Index of the winning source in the chain.
    pub source_index: usize,
    /// Attempts made, including the successful one.
    pub attempts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackFetcher {
    attempt_timeout: Option<Duration>,
}

impl FallbackFetcher {
    pub fn new(attempt_timeout: Option<Duration>) -> Self {
        Self { attempt_timeout }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Run `attempt` against each source in order and return the first `Ok`.
    ///
    /// `attempt` is the per-source transform: fetch plus whatever decoding
    /// that source needs.  It receives its own copy of the source.  When every source fails the error is
    /// `AllSourcesExhausted` carrying the last failure.
    pub async fn first_success<S, T, F, Fut>(
        &self,
        chain: &[S],
        mut attempt: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        S: fmt::Display + Clone,
        F: FnMut(S) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut last_error = None;

        for (idx, source) in chain.iter().enumerate() {
            debug!("[fallback] attempt {}/{}: {}", idx + 1, chain.len(), source);

            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt(source.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(limit)),
                },
                None => attempt(source.clone()).await,
            };

            match result {
                Ok(value) => {
                    if idx > 0 {
                        info!("[fallback] recovered via {} after {} failure(s)", source, idx);
                    }
                    return Ok(Fetched {
                        value,
                        source_index: idx,
                        attempts: idx + 1,
                    });
                }
                Err(e) => {
                    warn!("[fallback] {} failed: {}", source, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(FetchError::AllSourcesExhausted {
                attempts: chain.len(),
                last: Box::new(last),
            }),
            None => Err(FetchError::EmptyChain),
        }
    }
}
