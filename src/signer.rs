//! The signing protocol: reserve, materialize, patch, extract, invoke,
//! bound-check, finalize.
//!
//! The sequence is strictly sequential with no retries; any failure aborts
//! the whole operation and the document keeps its pre-sign bytes. The
//! cryptographic container itself is produced by an externally supplied
//! async callback: this crate hands it the exact bytes the signature must
//! cover and embeds whatever it returns.

use std::future::Future;

use crate::byterange::{extract_signed_bytes, patch_byte_range, ByteRangeCalculator};
use crate::document::{MaterializedDocument, SigningDocument};
use crate::error::{Error, Result};
use crate::types::SignOptions;

impl SigningDocument {
    /// Sign the document.
    ///
    /// `container_create` receives the concatenation of the two byte
    /// spans the ByteRange will cover and must return the DER-encoded
    /// signature container (e.g. a detached CMS message). Its result is
    /// hex-encoded into the reserved placeholder; if it is larger than
    /// the reservation, signing fails with a protocol error and nothing
    /// is persisted.
    ///
    /// On success the document's bytes are replaced with the signed file,
    /// which is also returned.
    pub async fn sign<F, Fut>(
        &mut self,
        options: SignOptions,
        container_create: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(Vec<u8>) -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        // Reserve: size the placeholder from the caller's container size.
        let calc = ByteRangeCalculator::new(options.container_size);

        // Materialize: the one deterministic serialization. After this,
        // only the ByteRange integers and the Contents hex digits may
        // change, in place.
        let MaterializedDocument {
            mut buffer,
            offsets,
        } = self.materialize(&options, &calc)?;

        // Measure & patch: the placeholder offsets are now exact.
        let range = calc.calculate_byte_range(buffer.len(), offsets.contents_offset);
        patch_byte_range(&mut buffer, offsets.byte_range_offset, &range)?;
        log::debug!(
            "reserved {} hex chars at {}, byte range {:?}",
            offsets.placeholder_size,
            offsets.contents_offset,
            range.0
        );

        // Extract: everything except the signature value itself.
        let signed_bytes = extract_signed_bytes(&buffer, &range)?;

        // Invoke the external signer. A failure here aborts the whole
        // operation; `buffer` is local, so no partial write survives.
        let signature = container_create(signed_bytes).await?;

        // Bound check: an oversized result means the reservation was
        // sized incorrectly by the caller. Fatal, nothing is saved.
        if signature.len() > calc.capacity() {
            return Err(Error::Protocol(format!(
                "signature container ({} bytes) exceeds the reserved size ({} bytes); \
                 re-sign with a larger container_size",
                signature.len(),
                calc.capacity()
            )));
        }

        // Finalize: hex-encode into the reservation, zero-padded. File
        // length is unchanged, so every previously computed offset stays
        // valid.
        calc.insert_signature(&mut buffer, offsets.contents_offset, &signature)?;

        self.replace_bytes(buffer.clone());
        log::info!(
            "signed field '{}' ({} signature bytes in a {}-byte reservation)",
            options.field_name,
            signature.len(),
            calc.capacity()
        );
        Ok(buffer)
    }
}
