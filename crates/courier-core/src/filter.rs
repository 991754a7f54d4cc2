//! Filter pipeline: sequentially-composed message transformers.
//!
//! A filter is a uniform capability taking the pipeline's carried type
//! (receive context on ingress, envelope on egress) and returning either a
//! transformed instance or a failure that aborts the chain. Pipelines are
//! ordered; filter *i+1* sees the output of *i*. Filters may mutate headers
//! (including injecting compression flags) and payload bytes freely.
//!
//! Both endpoints register their chains at startup; the chains are immutable
//! thereafter.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::FilterError;

/// A single pipeline stage.
#[async_trait]
pub trait Filter<T>: Send + Sync {
    /// Transform `item`, or fail and abort the chain.
    async fn apply(&self, item: T) -> Result<T, FilterError>;
}

/// An ordered, immutable-after-startup filter chain.
pub type FilterChain<T> = Vec<Arc<dyn Filter<T>>>;

/// Run `item` through `filters` strictly in order.
///
/// An empty chain is the identity.
///
/// # Errors
///
/// The first [`FilterError`] aborts the chain and propagates.
pub async fn apply_filters<T: Send>(
    filters: &[Arc<dyn Filter<T>>],
    mut item: T,
) -> Result<T, FilterError> {
    for filter in filters {
        item = filter.apply(item).await?;
    }
    Ok(item)
}
