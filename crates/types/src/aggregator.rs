// This file is part of BLSAgg.
//
// BLSAgg is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// BLSAgg is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with BLSAgg.
// If not, see https://www.gnu.org/licenses/.

//! Signature aggregation seam.
//!
//! The BLS math itself lives behind this trait: backends may verify and
//! aggregate locally with a pairing library, or delegate to the chain (the
//! gateway's view functions and the curve precompiles).

use crate::Bundle;

/// Signature backend errors.
#[derive(Debug, thiserror::Error)]
pub enum SignatureAggregatorError {
    /// The backend could not process the bundle
    #[error("signature backend rejected bundle: {0}")]
    InvalidBundle(String),
    /// Error from the underlying provider or library
    #[error("signature backend error: {0}")]
    Backend(String),
}

/// Result type for signature backend operations.
pub type SignatureAggregatorResult<T> = Result<T, SignatureAggregatorError>;

/// Aggregates and verifies BLS bundle signatures.
#[async_trait::async_trait]
pub trait SignatureAggregator: Send + Sync + 'static {
    /// Combine many bundles into one: keys and operations concatenate in
    /// order, signatures aggregate. Aggregating a single bundle returns a
    /// clone of it; aggregating none returns the empty bundle.
    async fn aggregate(&self, bundles: &[Bundle]) -> SignatureAggregatorResult<Bundle>;

    /// Check a bundle's aggregated signature against its keys and
    /// operations.
    async fn verify(&self, bundle: &Bundle) -> SignatureAggregatorResult<bool>;
}

#[cfg(feature = "test-utils")]
mockall::mock! {
    /// Mock signature backend for consumers' tests
    pub SignatureAggregator {}

    #[async_trait::async_trait]
    impl SignatureAggregator for SignatureAggregator {
        async fn aggregate(&self, bundles: &[Bundle]) -> SignatureAggregatorResult<Bundle>;
        async fn verify(&self, bundle: &Bundle) -> SignatureAggregatorResult<bool>;
    }
}
