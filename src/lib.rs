//! Split-merge setup kernels for Dirichlet process mixture model MCMC.
//!
//! The outer split-merge sampler owns the accept/reject move; this crate
//! provides the machinery that sets the move up: incrementally maintained
//! conjugate posteriors for a multivariate normal observation model, and a
//! family of anchor-selection kernels of increasing sophistication.
//!
//! Reference: <https://jmlr.org/papers/v18/16-436.html>

pub mod dist;
pub mod linalg;
pub mod mcmc;
pub mod partition;
pub mod utils;
