//! Hand-rolled AWS plumbing for the collector: SigV4 request signing,
//! env/STS credential resolution, and the Secrets Manager credential store.
//!
//! The API surface is small enough that the clients are written directly over
//! `reqwest` rather than pulling in a vendor SDK.

pub mod credentials;
pub mod error;
pub mod secrets;
pub mod sigv4;

use async_trait::async_trait;
use dbmon_common::types::CredentialRecord;

use crate::error::Result;

/// Credential store contract: lists collection-eligible credential ids and
/// resolves one id to its validated record.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Ids of credentials tagged for collection.
    ///
    /// # Errors
    ///
    /// Returns an error when the store itself is unreachable; per-credential
    /// problems surface from [`CredentialSource::fetch_credential`] instead.
    async fn list_credential_ids(&self) -> Result<Vec<String>>;

    /// Fetches and validates the payload for one credential id.
    ///
    /// # Errors
    ///
    /// Returns an error when the fetch fails or the payload does not satisfy
    /// the credential schema.
    async fn fetch_credential(&self, id: &str) -> Result<CredentialRecord>;
}
