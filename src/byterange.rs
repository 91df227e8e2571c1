//! ByteRange reservation, patching and extraction.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>`
//! delimiters. Both the ByteRange integers and the hex value are reserved
//! at fixed width before serialization, so patching them afterwards never
//! changes the file length.

use crate::error::{Error, Result};

/// Fixed ASCII width reserved for each ByteRange integer. Ten digits cover
/// any offset a 32-bit file length can produce.
pub const BYTE_RANGE_INT_WIDTH: usize = 10;

/// The four-integer byte range of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange(pub [i64; 4]);

impl ByteRange {
    /// The reserved placeholder written before the real offsets are known.
    pub fn placeholder() -> Self {
        ByteRange([0, 0, 0, 0])
    }

    /// Offset of the first covered span (always 0 for a conforming file).
    pub fn start(&self) -> i64 {
        self.0[0]
    }

    /// Length of the first covered span = offset of the signature value.
    pub fn before_len(&self) -> i64 {
        self.0[1]
    }

    /// Offset of the second covered span, immediately after the value.
    pub fn after_offset(&self) -> i64 {
        self.0[2]
    }

    /// Length of the second covered span.
    pub fn after_len(&self) -> i64 {
        self.0[3]
    }

    /// Width of the gap between the two covered spans (the `<...>` value).
    pub fn gap_len(&self) -> i64 {
        self.0[2] - self.0[1]
    }

    /// Total number of covered bytes.
    pub fn covered_len(&self) -> i64 {
        self.0[1] + self.0[3]
    }

    /// End of the second covered span.
    pub fn end(&self) -> i64 {
        self.0[2] + self.0[3]
    }
}

/// Calculator for signature byte ranges and placeholder values.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for
    /// the angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator for a signature of at most `container_size`
    /// bytes. The placeholder size is `container_size * 2 + 2` because the
    /// signature is hex-encoded and enclosed in angle brackets.
    pub fn new(container_size: usize) -> Self {
        let placeholder_size = container_size * 2 + 2;
        Self { placeholder_size }
    }

    /// Create a calculator with an explicit placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Maximum signature size in bytes the reservation can hold.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// Generate the placeholder string for the signature contents: `<` plus
    /// hex zeros plus `>`.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// Calculate the ByteRange given the offset of the `/Contents` value
    /// (the position of its opening `<`).
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> ByteRange {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;
        ByteRange([0, before_sig, after_sig_start, after_sig_len])
    }

    /// Replace the placeholder hex value with the actual signature.
    ///
    /// The signature is hex-encoded, left-justified into the reserved width
    /// and padded with ASCII `'0'` digits, so the value stays a valid hex
    /// string and the file length never changes.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> Result<()> {
        let hex_capacity = self.placeholder_size - 2;
        if signature.len() * 2 > hex_capacity {
            return Err(Error::Protocol(format!(
                "signature ({} bytes) exceeds reserved container capacity ({} bytes)",
                signature.len(),
                hex_capacity / 2
            )));
        }
        if contents_offset + self.placeholder_size > pdf_data.len() {
            return Err(Error::Protocol(
                "signature insertion would exceed file bounds".to_string(),
            ));
        }

        let mut value = String::with_capacity(self.placeholder_size);
        value.push('<');
        value.push_str(&bytes_to_hex(signature));
        for _ in 0..hex_capacity - signature.len() * 2 {
            value.push('0');
        }
        value.push('>');

        pdf_data[contents_offset..contents_offset + self.placeholder_size]
            .copy_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        // Default to 8KB signature (enough for most CMS containers with a
        // short chain and a timestamp)
        Self::new(8192)
    }
}

/// Format a ByteRange with each integer padded to [`BYTE_RANGE_INT_WIDTH`].
/// Used both for the reserved placeholder and for the patched values, so
/// the array occupies identical width before and after patching.
pub fn format_byte_range_padded(range: &ByteRange) -> String {
    format!(
        "[{:0w$} {:0w$} {:0w$} {:0w$}]",
        range.0[0],
        range.0[1],
        range.0[2],
        range.0[3],
        w = BYTE_RANGE_INT_WIDTH
    )
}

/// Total ASCII width of a padded ByteRange array, brackets included.
pub fn padded_byte_range_width() -> usize {
    // four integers, three separating spaces, two brackets
    4 * BYTE_RANGE_INT_WIDTH + 3 + 2
}

/// Patch a padded ByteRange array in place at `offset`. The reserved width
/// must already accommodate the values; shorter numbers are zero-padded,
/// never shrunk.
pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, range: &ByteRange) -> Result<()> {
    let formatted = format_byte_range_padded(range);
    let width = formatted.len();
    if offset + width > pdf_data.len() {
        return Err(Error::Protocol(
            "ByteRange patch would exceed file bounds".to_string(),
        ));
    }
    for value in range.0.iter() {
        if *value < 0 || format!("{}", value).len() > BYTE_RANGE_INT_WIDTH {
            return Err(Error::Protocol(format!(
                "ByteRange value {} does not fit the reserved width",
                value
            )));
        }
    }
    pdf_data[offset..offset + width].copy_from_slice(formatted.as_bytes());
    Ok(())
}

/// Extract the bytes covered by a ByteRange: the concatenation of the two
/// disjoint spans. This, and only this, is what gets hashed and signed.
pub fn extract_signed_bytes(pdf_data: &[u8], range: &ByteRange) -> Result<Vec<u8>> {
    let [offset1, length1, offset2, length2] = range.0;
    if offset1 < 0 || length1 < 0 || offset2 < 0 || length2 < 0 {
        return Err(Error::parse("ByteRange", "negative entry"));
    }
    let (offset1, length1) = (offset1 as usize, length1 as usize);
    let (offset2, length2) = (offset2 as usize, length2 as usize);

    if offset1 + length1 > pdf_data.len() {
        return Err(Error::parse(
            "ByteRange",
            format!(
                "first range exceeds file size: {} + {} > {}",
                offset1,
                length1,
                pdf_data.len()
            ),
        ));
    }
    if offset2 + length2 > pdf_data.len() {
        return Err(Error::parse(
            "ByteRange",
            format!(
                "second range exceeds file size: {} + {} > {}",
                offset2,
                length2,
                pdf_data.len()
            ),
        ));
    }

    let mut signed_bytes = Vec::with_capacity(length1 + length2);
    signed_bytes.extend_from_slice(&pdf_data[offset1..offset1 + length1]);
    signed_bytes.extend_from_slice(&pdf_data[offset2..offset2 + length2]);
    Ok(signed_bytes)
}

/// Outcome of checking a ByteRange against the actual file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCheck {
    /// The range covers the file exactly as required
    Exact,
    /// The range ends early but everything after it is whitespace padding,
    /// which legacy serializers emit and verifiers tolerate
    TrailingWhitespace(usize),
    /// The range ends early and non-whitespace bytes follow; suspicious but
    /// not arithmetically inconsistent
    TrailingGarbage(usize),
}

/// Validate the ByteRange arithmetic against the file.
///
/// Hard violations (wrong start, overlap, overrun) are errors. A covered
/// range that stops short of the end of file is classified by what the
/// trailing bytes contain; deciding what to do with that is the caller's
/// policy.
pub fn validate_byte_range(range: &ByteRange, pdf_data: &[u8]) -> Result<RangeCheck> {
    let file_size = pdf_data.len() as i64;
    let [offset1, length1, offset2, length2] = range.0;

    if offset1 != 0 {
        return Err(Error::parse(
            "ByteRange",
            format!("must start at 0, got {}", offset1),
        ));
    }
    if length1 < 0 || length2 < 0 || offset2 < length1 {
        return Err(Error::parse(
            "ByteRange",
            format!(
                "first range ({}) overlaps with second range start ({})",
                length1, offset2
            ),
        ));
    }
    let end = offset2 + length2;
    if end > file_size {
        return Err(Error::parse(
            "ByteRange",
            format!("ends at {} beyond file size {}", end, file_size),
        ));
    }

    if end == file_size {
        return Ok(RangeCheck::Exact);
    }

    let trailing = &pdf_data[end as usize..];
    if trailing
        .iter()
        .all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0))
    {
        Ok(RangeCheck::TrailingWhitespace(trailing.len()))
    } else {
        Ok(RangeCheck::TrailingGarbage(trailing.len()))
    }
}

/// Convert bytes to an uppercase hex string.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_size() {
        let calc = ByteRangeCalculator::new(1024);
        // 1024 bytes * 2 (hex) + 2 (brackets) = 2050
        assert_eq!(calc.placeholder_size(), 2050);
        assert_eq!(calc.capacity(), 1024);
    }

    #[test]
    fn test_generate_placeholder() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let placeholder = calc.generate_placeholder();
        assert_eq!(placeholder, "<00000000>");
        assert_eq!(placeholder.len(), 10);
    }

    #[test]
    fn test_calculate_byte_range() {
        let calc = ByteRangeCalculator::with_placeholder_size(100);
        let range = calc.calculate_byte_range(1000, 400);
        assert_eq!(range.0, [0, 400, 500, 500]);
        assert_eq!(range.gap_len(), 100);
        assert_eq!(range.covered_len(), 900);
        assert_eq!(range.end(), 1000);
    }

    #[test]
    fn test_padded_format_is_fixed_width() {
        let a = format_byte_range_padded(&ByteRange([0, 0, 0, 0]));
        let b = format_byte_range_padded(&ByteRange([0, 123456, 140000, 9876543]));
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), padded_byte_range_width());
        assert_eq!(b, "[0000000000 0000123456 0000140000 0009876543]");
    }

    #[test]
    fn test_patch_byte_range_in_place() {
        let mut data = format!("xx{}yy", format_byte_range_padded(&ByteRange::placeholder()))
            .into_bytes();
        let before_len = data.len();
        patch_byte_range(&mut data, 2, &ByteRange([0, 55, 77, 99])).unwrap();
        assert_eq!(data.len(), before_len);
        let s = String::from_utf8(data).unwrap();
        assert!(s.contains("[0000000000 0000000055 0000000077 0000000099]"));
    }

    #[test]
    fn test_extract_signed_bytes() {
        let pdf_data = b"AAABBBCCC"; // 9 bytes
        let range = ByteRange([0, 3, 6, 3]); // "AAA" + "CCC"
        let signed = extract_signed_bytes(pdf_data, &range).unwrap();
        assert_eq!(signed, b"AAACCC");
    }

    #[test]
    fn test_validate_exact() {
        let data = vec![0u8; 200];
        let range = ByteRange([0, 100, 150, 50]);
        assert_eq!(validate_byte_range(&range, &data).unwrap(), RangeCheck::Exact);
    }

    #[test]
    fn test_validate_invalid_start() {
        let data = vec![0u8; 200];
        let range = ByteRange([10, 100, 150, 50]);
        assert!(validate_byte_range(&range, &data).is_err());
    }

    #[test]
    fn test_validate_trailing_whitespace_tolerated() {
        let mut data = vec![b'x'; 195];
        data.extend_from_slice(b"\r\n   ");
        let range = ByteRange([0, 100, 150, 45]);
        assert_eq!(
            validate_byte_range(&range, &data).unwrap(),
            RangeCheck::TrailingWhitespace(5)
        );
    }

    #[test]
    fn test_validate_trailing_garbage_flagged() {
        let mut data = vec![b'x'; 195];
        data.extend_from_slice(b"evil!");
        let range = ByteRange([0, 100, 150, 45]);
        assert_eq!(
            validate_byte_range(&range, &data).unwrap(),
            RangeCheck::TrailingGarbage(5)
        );
    }

    #[test]
    fn test_insert_signature() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut pdf_data, 2, &[0xAB, 0xCD]).unwrap();
        // 2 signature bytes -> "ABCD", padded with 4 zeros
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");
    }

    #[test]
    fn test_insert_signature_too_large() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let original = pdf_data.clone();
        let result = calc.insert_signature(&mut pdf_data, 2, &[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(Error::Protocol(_))));
        // the buffer must be untouched after a protocol failure
        assert_eq!(pdf_data, original);
    }

    #[test]
    fn test_bytes_to_hex_uppercase() {
        assert_eq!(bytes_to_hex(&[0x0f, 0xa0, 0xff]), "0FA0FF");
        assert_eq!(bytes_to_hex(&[]), "");
    }
}
