//! A client for the OCI/Docker Registry HTTP API v2: authentication, rate limiting,
//! and manifest/blob transfer.

mod auth;
mod client;
mod rate_limit;

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use sha2::{Digest as Sha2Digest, Sha256};

use crate::model::Digest;
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use auth::{parse_bearer_challenge, BearerChallenge};
pub use client::{MountOutcome, RegistryClient};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the lowercase hex SHA-256 digest of `bytes`, with no `sha256:` prefix.
/// `PutBlob` relies on the registry to validate this server-side via the `?digest=`
/// commit parameter; this helper covers call sites that need to trust-but-verify a
/// digest themselves, such as a manifest whose content digest wasn't advertised in
/// a response header.
pub fn digest_of_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Wraps a blob byte stream and hashes every chunk as it passes through, so the
/// caller doesn't have to trust the registry's own digest confirmation (or lack of
/// one). Once the inner stream is exhausted, the accumulated digest is compared
/// against `expected`; a mismatch surfaces as one final `Err` item rather than a
/// silent success, and the wrapped bytes are never buffered to make the check.
pub struct VerifyingReader {
    inner: BoxStream<'static, ReplicoreResult<Bytes>>,
    hasher: Sha256,
    expected: Digest,
    done: bool,
}

impl VerifyingReader {
    /// Wraps `inner`, verifying its bytes hash to `expected` once fully consumed.
    pub fn new(inner: BoxStream<'static, ReplicoreResult<Bytes>>, expected: Digest) -> Self {
        VerifyingReader { inner, hasher: Sha256::new(), expected, done: false }
    }
}

impl Stream for VerifyingReader {
    type Item = ReplicoreResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.hasher.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                let computed = format!("sha256:{}", hex::encode(std::mem::replace(&mut this.hasher, Sha256::new()).finalize()));
                if computed == this.expected.to_string() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(ReplicoreError::DigestMismatch { expected: this.expected.to_string(), actual: computed })))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures::{StreamExt, TryStreamExt};

    use super::*;

    #[test]
    fn test_digest_of_bytes_matches_known_value() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(
            digest_of_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_verifying_reader_passes_through_matching_bytes() {
        let expected: Digest = format!("sha256:{}", digest_of_bytes(b"hello")).parse().unwrap();
        let inner = futures::stream::iter(vec![crate::Ok(Bytes::from_static(b"hello"))]).boxed();
        let collected: Vec<Bytes> = VerifyingReader::new(inner, expected).try_collect().await.unwrap();
        let mut flat = Vec::new();
        for chunk in collected {
            flat.extend_from_slice(&chunk);
        }
        assert_eq!(flat, b"hello");
    }

    #[tokio::test]
    async fn test_verifying_reader_rejects_mismatched_bytes() {
        let expected: Digest = format!("sha256:{}", digest_of_bytes(b"other")).parse().unwrap();
        let inner = futures::stream::iter(vec![crate::Ok(Bytes::from_static(b"hello"))]).boxed();
        let result: ReplicoreResult<Vec<Bytes>> = VerifyingReader::new(inner, expected).try_collect().await;
        assert!(matches!(result, Err(ReplicoreError::DigestMismatch { .. })));
    }
}
