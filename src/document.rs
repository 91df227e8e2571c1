//! Byte-level document handle: materialization and signature scanning.
//!
//! The general PDF object model (parsers, filters, cross-reference
//! streams) is outside this crate; what the signing protocol needs from a
//! document is narrow and byte-oriented:
//!
//! - one deterministic serialization that appends an incremental update
//!   holding the reserved signature dictionary, returning the exact byte
//!   offsets of the two values that get patched afterwards;
//! - a scanner that locates existing signature dictionaries in a
//!   serialized file and reads the entries verification needs.
//!
//! The writer appends after the last `%%EOF` and never rewrites earlier
//! bytes, so previously signed revisions stay byte-identical. It handles
//! documents with a classic cross-reference table and trailer; files whose
//! latest revision only has a cross-reference stream are not supported.

use chrono::{DateTime, Utc};

use crate::byterange::{
    format_byte_range_padded, ByteRange, ByteRangeCalculator,
};
use crate::dss::Dss;
use crate::error::{Error, Result};
use crate::types::{CertificationLevel, SignatureInfo, SignatureSubFilter, SignOptions};

/// Byte offsets of the two patchable values inside a materialized buffer.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderOffsets {
    /// Offset of the `/Contents` value's opening `<`
    pub contents_offset: usize,
    /// Offset of the `/ByteRange` array's opening `[`
    pub byte_range_offset: usize,
    /// Total width of the `<...>` placeholder
    pub placeholder_size: usize,
}

/// A document serialized exactly once with a reserved signature container.
#[derive(Debug)]
pub struct MaterializedDocument {
    /// The full serialized file
    pub buffer: Vec<u8>,
    /// Where the patchable values sit
    pub offsets: PlaceholderOffsets,
}

/// An existing signature located in a serialized document.
#[derive(Debug, Clone)]
pub struct SignatureHandle {
    /// Entries read from the dictionary
    pub info: SignatureInfo,
    /// The declared byte range
    pub byte_range: ByteRange,
    /// Absolute offset of the `/Contents` value's opening `<`
    pub contents_offset: usize,
    /// Width of the `<...>` value, brackets included
    pub contents_width: usize,
    /// Decoded `/Contents` bytes, zero padding included
    pub contents_raw: Vec<u8>,
    /// Object number of the signature dictionary
    pub object_number: u32,
}

impl SignatureHandle {
    /// Shallow plausibility check without any cryptography: the dictionary
    /// declares a four-entry ByteRange and a known sub-filter.
    pub fn quick_check(&self) -> bool {
        self.info.byte_range.len() == 4 && self.info.sub_filter.is_some()
    }
}

/// How a dictionary entry's value is encoded. The scanner drives off this
/// table instead of per-entry ad-hoc code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictValueKind {
    /// `/Name` token
    Name,
    /// `(literal string)`
    Literal,
}

/// Signature dictionary entries the scanner reads, with their value
/// encodings. `/ByteRange` and `/Contents` have dedicated handling because
/// their offsets matter, not just their values.
const SIG_DICT_SCHEMA: &[(&str, DictValueKind)] = &[
    ("SubFilter", DictValueKind::Name),
    ("M", DictValueKind::Literal),
    ("Name", DictValueKind::Literal),
    ("Reason", DictValueKind::Literal),
    ("Location", DictValueKind::Literal),
    ("ContactInfo", DictValueKind::Literal),
];

/// A document being signed or verified.
///
/// Owns the serialized bytes and the lazily-created document security
/// store. Signing replaces the owned buffer; nothing is ever persisted on
/// a failed signing operation.
#[derive(Debug)]
pub struct SigningDocument {
    bytes: Vec<u8>,
    version: (u8, u8),
    dss: Option<Dss>,
}

impl SigningDocument {
    /// Wrap a serialized PDF.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let version = parse_header_version(&bytes)?;
        Ok(Self {
            bytes,
            version,
            dss: None,
        })
    }

    /// The current serialized bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Declared PDF version from the header.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// The document security store, created lazily on first access.
    pub fn dss_mut(&mut self) -> &mut Dss {
        self.dss.get_or_insert_with(Dss::new)
    }

    /// The document security store, if it was ever touched.
    pub fn dss(&self) -> Option<&Dss> {
        self.dss.as_ref()
    }

    /// Locate every signature dictionary in the current bytes.
    pub fn signatures(&self) -> Vec<SignatureHandle> {
        scan_signatures(&self.bytes)
    }

    /// Replace the owned buffer after a completed signing operation.
    pub(crate) fn replace_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    /// Serialize the document exactly once with a reserved signature
    /// container appended as an incremental update.
    ///
    /// After this point no structural change is permitted; only the four
    /// ByteRange integers and the `/Contents` hex digits may be
    /// overwritten in place.
    pub(crate) fn materialize(
        &self,
        options: &SignOptions,
        calc: &ByteRangeCalculator,
    ) -> Result<MaterializedDocument> {
        let trailer = parse_last_trailer(&self.bytes)?;
        let catalog_src = extract_object_source(
            &self.bytes,
            trailer.root_number,
            trailer.root_generation,
        )?;

        let base = self.bytes.len();
        let mut section: Vec<u8> = Vec::new();
        if !self.bytes.ends_with(b"\n") && !self.bytes.ends_with(b"\r") {
            section.push(b'\n');
        }

        let mut next_obj = trailer.size;
        let mut xref_entries: Vec<(u32, u16, usize)> = Vec::new();

        // --- signature dictionary -----------------------------------
        let sig_num = next_obj;
        next_obj += 1;
        let sig_offset = base + section.len();
        section.extend_from_slice(format!("{} 0 obj\n", sig_num).as_bytes());
        let mut dict = String::new();
        dict.push_str("<< /Type /Sig /Filter /Adobe.PPKLite");
        dict.push_str(&format!(" /SubFilter /{}", options.sub_filter.as_pdf_name()));
        dict.push_str(" /ByteRange ");
        section.extend_from_slice(dict.as_bytes());

        let byte_range_offset = base + section.len();
        section.extend_from_slice(
            format_byte_range_padded(&ByteRange::placeholder()).as_bytes(),
        );

        section.extend_from_slice(b" /Contents ");
        let contents_offset = base + section.len();
        section.extend_from_slice(calc.generate_placeholder().as_bytes());

        let mut tail = String::new();
        if let Some(ref name) = options.name {
            tail.push_str(&format!(" /Name ({})", escape_pdf_string(name)));
        }
        if let Some(ref reason) = options.reason {
            tail.push_str(&format!(" /Reason ({})", escape_pdf_string(reason)));
        }
        if let Some(ref location) = options.location {
            tail.push_str(&format!(" /Location ({})", escape_pdf_string(location)));
        }
        if let Some(ref contact) = options.contact_info {
            tail.push_str(&format!(" /ContactInfo ({})", escape_pdf_string(contact)));
        }
        tail.push_str(&format!(
            " /M ({})",
            format_pdf_date(options.signing_time.unwrap_or_else(Utc::now))
        ));
        if let Some(level) = options.certification {
            tail.push_str(&format!(
                " /Reference [ << /Type /SigRef /TransformMethod /DocMDP \
                 /TransformParams << /Type /TransformParams /P {} /V /1.2 >> >> ]",
                level.permission_value()
            ));
        }
        tail.push_str(" >>\nendobj\n");
        section.extend_from_slice(tail.as_bytes());
        xref_entries.push((sig_num, 0, sig_offset));

        // --- signature field widget ---------------------------------
        let field_num = next_obj;
        next_obj += 1;
        let field_offset = base + section.len();
        section.extend_from_slice(
            format!(
                "{} 0 obj\n<< /FT /Sig /Type /Annot /Subtype /Widget /T ({}) \
                 /V {} 0 R /F 132 /Rect [0 0 0 0] >>\nendobj\n",
                field_num,
                escape_pdf_string(&options.field_name),
                sig_num
            )
            .as_bytes(),
        );
        xref_entries.push((field_num, 0, field_offset));

        // --- DSS, when dirty ----------------------------------------
        let dss_ref = match self.dss.as_ref().filter(|d| d.is_dirty()) {
            Some(dss) => Some(write_dss_objects(
                dss,
                &mut section,
                &mut xref_entries,
                &mut next_obj,
                base,
            )),
            None => None,
        };

        // --- updated catalog ----------------------------------------
        let catalog_offset = base + section.len();
        let (catalog_src, prior_fields) = remove_acroform_entry(&catalog_src);
        let mut catalog = strip_dict_close(&catalog_src)?;
        let mut fields = prior_fields.trim().to_string();
        if !fields.is_empty() {
            fields.push(' ');
        }
        fields.push_str(&format!("{} 0 R", field_num));
        catalog.push_str(&format!(
            " /AcroForm << /Fields [{}] /SigFlags 3 >>",
            fields
        ));
        if let Some(dss_num) = dss_ref {
            catalog.push_str(&format!(" /DSS {} 0 R", dss_num));
            // Documents below PDF 2.0 need the developer-extension marker
            // so conforming readers honor the DSS.
            if self.version < (2, 0) {
                catalog.push_str(
                    " /Extensions << /ESIC << /BaseVersion /1.7 /ExtensionLevel 2 >> >>",
                );
            }
        }
        catalog.push_str(" >>");
        section.extend_from_slice(
            format!(
                "{} {} obj\n{}\nendobj\n",
                trailer.root_number, trailer.root_generation, catalog
            )
            .as_bytes(),
        );
        xref_entries.push((
            trailer.root_number,
            trailer.root_generation,
            catalog_offset,
        ));

        // --- cross-reference section and trailer --------------------
        let xref_offset = base + section.len();
        section.extend_from_slice(&build_xref_section(&xref_entries));
        section.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {} {} R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
                next_obj,
                trailer.root_number,
                trailer.root_generation,
                trailer.startxref,
                xref_offset
            )
            .as_bytes(),
        );

        let mut buffer = self.bytes.clone();
        buffer.extend_from_slice(&section);
        log::debug!(
            "materialized {} bytes (+{}), contents at {}, byte range at {}",
            buffer.len(),
            section.len(),
            contents_offset,
            byte_range_offset
        );

        Ok(MaterializedDocument {
            buffer,
            offsets: PlaceholderOffsets {
                contents_offset,
                byte_range_offset,
                placeholder_size: calc.placeholder_size(),
            },
        })
    }
}

/// Write the DSS dictionary and its evidence streams; returns the DSS
/// object number.
fn write_dss_objects(
    dss: &Dss,
    section: &mut Vec<u8>,
    xref_entries: &mut Vec<(u32, u16, usize)>,
    next_obj: &mut u32,
    base: usize,
) -> u32 {
    let mut write_streams = |blobs: &[Vec<u8>],
                             section: &mut Vec<u8>,
                             xref_entries: &mut Vec<(u32, u16, usize)>,
                             next_obj: &mut u32|
     -> Vec<u32> {
        let mut nums = Vec::new();
        for blob in blobs {
            let num = *next_obj;
            *next_obj += 1;
            let offset = base + section.len();
            section.extend_from_slice(
                format!("{} 0 obj\n<< /Length {} >>\nstream\n", num, blob.len()).as_bytes(),
            );
            section.extend_from_slice(blob);
            section.extend_from_slice(b"\nendstream\nendobj\n");
            xref_entries.push((num, 0, offset));
            nums.push(num);
        }
        nums
    };

    let cert_nums = write_streams(dss.certs(), section, xref_entries, next_obj);
    let crl_nums = write_streams(dss.crls(), section, xref_entries, next_obj);
    let ocsp_nums = write_streams(dss.ocsps(), section, xref_entries, next_obj);

    // VRI timestamp streams
    let mut vri_entries: Vec<(String, Option<u32>)> = Vec::new();
    for key in dss.vri_keys() {
        let ts_num = dss
            .find_vri(key)
            .and_then(|vri| vri.timestamp())
            .map(|ts| write_streams(&[ts.to_vec()], section, xref_entries, next_obj)[0]);
        vri_entries.push((key.clone(), ts_num));
    }

    let dss_num = *next_obj;
    *next_obj += 1;
    let offset = base + section.len();

    let refs = |nums: &[u32]| {
        nums.iter()
            .map(|n| format!("{} 0 R", n))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut dict = String::from("<< /Type /DSS");
    if !cert_nums.is_empty() {
        dict.push_str(&format!(" /Certs [{}]", refs(&cert_nums)));
    }
    if !crl_nums.is_empty() {
        dict.push_str(&format!(" /CRLs [{}]", refs(&crl_nums)));
    }
    if !ocsp_nums.is_empty() {
        dict.push_str(&format!(" /OCSPs [{}]", refs(&ocsp_nums)));
    }
    if !vri_entries.is_empty() {
        dict.push_str(" /VRI <<");
        for (key, ts_num) in &vri_entries {
            dict.push_str(&format!(" /{} <<", key));
            if !crl_nums.is_empty() {
                dict.push_str(&format!(" /CRL [{}]", refs(&crl_nums)));
            }
            if !ocsp_nums.is_empty() {
                dict.push_str(&format!(" /OCSP [{}]", refs(&ocsp_nums)));
            }
            if let Some(ts) = ts_num {
                dict.push_str(&format!(" /TS {} 0 R", ts));
            }
            dict.push_str(" >>");
        }
        dict.push_str(" >>");
    }
    dict.push_str(" >>");

    section.extend_from_slice(
        format!("{} 0 obj\n{}\nendobj\n", dss_num, dict).as_bytes(),
    );
    xref_entries.push((dss_num, 0, offset));
    dss_num
}

/// Build a classic cross-reference section for the given (number,
/// generation, offset) entries, grouping consecutive object numbers into
/// subsections.
fn build_xref_section(entries: &[(u32, u16, usize)]) -> Vec<u8> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|(num, _, _)| *num);

    let mut out = String::from("xref\n");
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[j].0 + 1 {
            j += 1;
        }
        out.push_str(&format!("{} {}\n", sorted[i].0, j - i + 1));
        for (_, generation, offset) in &sorted[i..=j] {
            out.push_str(&format!("{:010} {:05} n \n", offset, generation));
        }
        i = j + 1;
    }
    out.into_bytes()
}

// --- raw-byte parsing helpers -------------------------------------------

/// Details of the last classic trailer in the file.
#[derive(Debug, Clone)]
struct TrailerInfo {
    size: u32,
    root_number: u32,
    root_generation: u16,
    startxref: usize,
}

fn parse_header_version(bytes: &[u8]) -> Result<(u8, u8)> {
    if !bytes.starts_with(b"%PDF-") {
        let found = String::from_utf8_lossy(&bytes[..bytes.len().min(8)]).into_owned();
        return Err(Error::InvalidHeader(found));
    }
    let major = bytes.get(5).map(|b| b.wrapping_sub(b'0')).unwrap_or(0);
    let minor = bytes.get(7).map(|b| b.wrapping_sub(b'0')).unwrap_or(0);
    if major == 0 || major > 2 {
        return Err(Error::InvalidHeader(
            String::from_utf8_lossy(&bytes[..8.min(bytes.len())]).into_owned(),
        ));
    }
    Ok((major, minor))
}

fn parse_last_trailer(bytes: &[u8]) -> Result<TrailerInfo> {
    let trailer_pos = rfind_sub(bytes, b"trailer")
        .ok_or_else(|| Error::Unsupported(
            "document has no classic trailer (cross-reference streams are not supported)"
                .to_string(),
        ))?;

    let dict_start = find_sub(bytes, b"<<", trailer_pos)
        .ok_or_else(|| Error::parse_at("trailer", trailer_pos, "missing dictionary"))?;
    let dict_end = find_matching_dict_end(bytes, dict_start)
        .ok_or_else(|| Error::parse_at("trailer", dict_start, "unterminated dictionary"))?;
    let dict = &bytes[dict_start..dict_end];

    let size = parse_int_after(dict, b"/Size")
        .ok_or_else(|| Error::parse_at("trailer", dict_start, "missing /Size"))? as u32;
    let (root_number, root_generation) = parse_ref_after(dict, b"/Root")
        .ok_or_else(|| Error::parse_at("trailer", dict_start, "missing /Root"))?;

    let sx_pos = find_sub(bytes, b"startxref", dict_end)
        .ok_or_else(|| Error::parse_at("trailer", dict_end, "missing startxref"))?;
    let startxref = parse_int_at(bytes, sx_pos + b"startxref".len())
        .ok_or_else(|| Error::parse_at("trailer", sx_pos, "bad startxref offset"))?
        as usize;

    Ok(TrailerInfo {
        size,
        root_number,
        root_generation,
        startxref,
    })
}

/// Source text of the latest revision of object `number generation`.
fn extract_object_source(bytes: &[u8], number: u32, generation: u16) -> Result<String> {
    let needle = format!("{} {} obj", number, generation).into_bytes();
    let mut pos = None;
    let mut from = 0;
    while let Some(found) = find_sub(bytes, &needle, from) {
        // guard against matching the tail of a larger object number
        let boundary = found == 0
            || matches!(bytes[found - 1], b' ' | b'\t' | b'\r' | b'\n');
        if boundary {
            pos = Some(found);
        }
        from = found + needle.len();
    }
    let pos = pos.ok_or_else(|| {
        Error::parse(
            "document",
            format!("object {} {} R not found", number, generation),
        )
    })?;

    let body_start = pos + needle.len();
    let end = find_sub(bytes, b"endobj", body_start)
        .ok_or_else(|| Error::parse_at("document", pos, "object without endobj"))?;
    Ok(String::from_utf8_lossy(&bytes[body_start..end])
        .trim()
        .to_string())
}

/// Remove an inline `/AcroForm << ... >>` entry from a catalog source,
/// returning the reduced source and the contents of the removed entry's
/// `/Fields [ ... ]` array so existing signature fields survive a second
/// signing pass. An `/AcroForm` held as an indirect reference cannot be
/// merged at the byte level and is dropped with a warning.
fn remove_acroform_entry(catalog_src: &str) -> (String, String) {
    let Some(key_pos) = catalog_src.find("/AcroForm") else {
        return (catalog_src.to_string(), String::new());
    };
    let after_key = key_pos + "/AcroForm".len();
    let rest = catalog_src[after_key..].trim_start();
    let rest_offset = catalog_src.len() - catalog_src[after_key..].trim_start().len();

    if rest.starts_with("<<") {
        let bytes = catalog_src.as_bytes();
        if let Some(end) = find_matching_dict_end(bytes, rest_offset) {
            let inner = &catalog_src[rest_offset..end];
            let fields = inner
                .find("/Fields")
                .and_then(|p| {
                    let tail = &inner[p + "/Fields".len()..];
                    let open = tail.find('[')?;
                    let close = tail.find(']')?;
                    (open < close).then(|| tail[open + 1..close].trim().to_string())
                })
                .unwrap_or_default();
            let mut reduced = String::with_capacity(catalog_src.len());
            reduced.push_str(&catalog_src[..key_pos]);
            reduced.push_str(&catalog_src[end..]);
            return (reduced, fields);
        }
    } else {
        log::warn!("catalog /AcroForm is an indirect reference; replacing it");
        // strip the "N G R" reference tokens after the key
        let mut tokens = 0;
        let mut consumed = rest.len();
        let mut in_token = false;
        for (i, c) in rest.char_indices() {
            if c.is_whitespace() {
                if in_token {
                    tokens += 1;
                    in_token = false;
                    if tokens == 3 {
                        consumed = i;
                        break;
                    }
                }
            } else {
                in_token = true;
            }
        }
        if tokens == 3 {
            let mut reduced = String::with_capacity(catalog_src.len());
            reduced.push_str(&catalog_src[..key_pos]);
            reduced.push_str(&catalog_src[rest_offset + consumed..]);
            return (reduced, String::new());
        }
    }
    (catalog_src.to_string(), String::new())
}

/// Drop the final `>>` of a dictionary source so entries can be appended.
fn strip_dict_close(dict_src: &str) -> Result<String> {
    let trimmed = dict_src.trim_end();
    let stripped = trimmed
        .strip_suffix(">>")
        .ok_or_else(|| Error::parse("catalog", "object is not a dictionary"))?;
    Ok(stripped.trim_end().to_string())
}

/// Find the end (exclusive) of the dictionary starting at `start`,
/// accounting for nested `<< >>` pairs.
fn find_matching_dict_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1] == b'<' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'>' && bytes[i + 1] == b'>' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

pub(crate) fn find_sub(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

pub(crate) fn rfind_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
        i += 1;
    }
    i
}

fn parse_int_at(bytes: &[u8], from: usize) -> Option<i64> {
    let mut i = skip_ws(bytes, from);
    let start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..i]).ok()?.parse().ok()
}

fn parse_int_after(bytes: &[u8], key: &[u8]) -> Option<i64> {
    let pos = find_sub(bytes, key, 0)?;
    parse_int_at(bytes, pos + key.len())
}

fn parse_ref_after(bytes: &[u8], key: &[u8]) -> Option<(u32, u16)> {
    let pos = find_sub(bytes, key, 0)?;
    let mut i = skip_ws(bytes, pos + key.len());
    let num = parse_int_at(bytes, i)?;
    while i < bytes.len() && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
        i += 1;
    }
    let generation = parse_int_at(bytes, i)?;
    Some((num as u32, generation as u16))
}

// --- signature scanning -------------------------------------------------

/// Locate every signature dictionary in a serialized document by scanning
/// for `/ByteRange` entries and reading the surrounding object.
pub fn scan_signatures(bytes: &[u8]) -> Vec<SignatureHandle> {
    let mut handles = Vec::new();
    let mut from = 0;
    while let Some(br_pos) = find_sub(bytes, b"/ByteRange", from) {
        from = br_pos + b"/ByteRange".len();
        if let Some(handle) = read_signature_at(bytes, br_pos) {
            handles.push(handle);
        }
    }
    handles
}

fn read_signature_at(bytes: &[u8], byte_range_pos: usize) -> Option<SignatureHandle> {
    // The enclosing object: the nearest "obj" before and "endobj" after.
    let obj_pos = rfind_sub(&bytes[..byte_range_pos], b" obj")
        .or_else(|| rfind_sub(&bytes[..byte_range_pos], b"\nobj"))?;
    let end_pos = find_sub(bytes, b"endobj", byte_range_pos)?;
    let line_start = bytes[..obj_pos]
        .iter()
        .rposition(|b| matches!(b, b'\r' | b'\n'))
        .map(|p| p + 1)
        .unwrap_or(0);
    let object_number = parse_int_at(bytes, line_start)? as u32;
    let dict = &bytes[line_start..end_pos];
    let dict_base = line_start;

    // ByteRange array
    let br_rel = byte_range_pos - dict_base + b"/ByteRange".len();
    let open = skip_ws(dict, br_rel);
    if dict.get(open) != Some(&b'[') {
        return None;
    }
    let mut i = open + 1;
    let mut values = Vec::with_capacity(4);
    for _ in 0..4 {
        i = skip_ws(dict, i);
        let start = i;
        while i < dict.len() && dict[i].is_ascii_digit() {
            i += 1;
        }
        let value: i64 = std::str::from_utf8(&dict[start..i]).ok()?.parse().ok()?;
        values.push(value);
    }
    let byte_range = ByteRange([values[0], values[1], values[2], values[3]]);

    // Contents hex value
    let contents_rel = find_sub(dict, b"/Contents", 0)?;
    let mut c = skip_ws(dict, contents_rel + b"/Contents".len());
    if dict.get(c) != Some(&b'<') || dict.get(c + 1) == Some(&b'<') {
        return None;
    }
    let contents_offset = dict_base + c;
    c += 1;
    let hex_start = c;
    while c < dict.len() && dict[c] != b'>' {
        c += 1;
    }
    if c >= dict.len() {
        return None;
    }
    let contents_raw = decode_hex_lenient(&dict[hex_start..c])?;
    let contents_width = c + 1 - (contents_offset - dict_base);

    // Schema-driven entries
    let covers_whole_document = values.len() == 4;
    let mut info = SignatureInfo {
        byte_range: values,
        covers_whole_document,
        ..SignatureInfo::default()
    };
    for (key, kind) in SIG_DICT_SCHEMA {
        let value = match kind {
            DictValueKind::Name => read_name_value(dict, key),
            DictValueKind::Literal => read_literal_value(dict, key),
        };
        if let Some(value) = value {
            match *key {
                "SubFilter" => info.sub_filter = SignatureSubFilter::from_pdf_name(&value),
                "M" => info.signing_time = Some(value),
                "Name" => info.signer_name = Some(value),
                "Reason" => info.reason = Some(value),
                "Location" => info.location = Some(value),
                "ContactInfo" => info.contact_info = Some(value),
                _ => {}
            }
        }
    }

    // DocMDP reference transform
    if find_sub(dict, b"/TransformMethod", 0).is_some()
        && find_sub(dict, b"/DocMDP", 0).is_some()
    {
        info.certification = parse_int_after(dict, b"/P")
            .and_then(CertificationLevel::from_permission_value)
            .or(Some(CertificationLevel::FormFilling));
    }

    // The field's /T lives on the widget that references this dictionary.
    info.field_name = find_field_name(bytes, object_number);

    Some(SignatureHandle {
        info,
        byte_range,
        contents_offset,
        contents_width,
        contents_raw,
        object_number,
    })
}

/// Find `/T (...)` of the widget whose `/V` points at the signature
/// object.
fn find_field_name(bytes: &[u8], sig_number: u32) -> Option<String> {
    let needle = format!("/V {} 0 R", sig_number).into_bytes();
    let v_pos = find_sub(bytes, &needle, 0)?;
    let obj_start = rfind_sub(&bytes[..v_pos], b" obj")?;
    let end = find_sub(bytes, b"endobj", v_pos)?;
    read_literal_value(&bytes[obj_start..end], "T")
}

fn read_name_value(dict: &[u8], key: &str) -> Option<String> {
    let needle = format!("/{}", key).into_bytes();
    let pos = find_sub(dict, &needle, 0)?;
    let mut i = skip_ws(dict, pos + needle.len());
    if dict.get(i) != Some(&b'/') {
        return None;
    }
    i += 1;
    let start = i;
    while i < dict.len()
        && !matches!(dict[i], b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>' | b'[' | b'<' | b'(')
    {
        i += 1;
    }
    Some(String::from_utf8_lossy(&dict[start..i]).into_owned())
}

fn read_literal_value(dict: &[u8], key: &str) -> Option<String> {
    let needle = format!("/{}", key).into_bytes();
    let mut from = 0;
    while let Some(pos) = find_sub(dict, &needle, from) {
        from = pos + needle.len();
        // reject longer keys sharing the prefix, e.g. /Name vs /Names
        let after = dict.get(pos + needle.len());
        if !matches!(after, Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') | Some(b'(')) {
            continue;
        }
        let i = skip_ws(dict, pos + needle.len());
        if dict.get(i) != Some(&b'(') {
            continue;
        }
        let mut j = i + 1;
        let mut out = String::new();
        while j < dict.len() && dict[j] != b')' {
            if dict[j] == b'\\' && j + 1 < dict.len() {
                j += 1;
                match dict[j] {
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    other => out.push(other as char),
                }
            } else {
                out.push(dict[j] as char);
            }
            j += 1;
        }
        return Some(out);
    }
    None
}

/// Decode a PDF hex string body, skipping whitespace; an odd trailing
/// digit is padded with zero as the PDF syntax requires.
fn decode_hex_lenient(hex: &[u8]) -> Option<Vec<u8>> {
    let mut digits: Vec<u8> = Vec::with_capacity(hex.len());
    for &b in hex {
        match b {
            b'0'..=b'9' => digits.push(b - b'0'),
            b'a'..=b'f' => digits.push(b - b'a' + 10),
            b'A'..=b'F' => digits.push(b - b'A' + 10),
            b' ' | b'\t' | b'\r' | b'\n' => {}
            _ => return None,
        }
    }
    if digits.len() % 2 == 1 {
        digits.push(0);
    }
    Some(
        digits
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect(),
    )
}

/// Escape special characters in a PDF literal string.
pub(crate) fn escape_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '(' => result.push_str("\\("),
            ')' => result.push_str("\\)"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a date as a PDF date string.
pub(crate) fn format_pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// A small single-page document with a classic trailer, handy for tests
/// and for trying the signing flow without an external file.
pub fn minimal_test_pdf() -> Vec<u8> {
    let mut out = String::from("%PDF-1.7\n");
    let mut offsets = Vec::new();
    let objects = [
        "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n",
        "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n",
        "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n",
    ];
    for obj in objects {
        offsets.push(out.len());
        out.push_str(obj);
    }
    let xref_offset = out.len();
    out.push_str("xref\n0 4\n0000000000 65535 f \n");
    for offset in &offsets {
        out.push_str(&format!("{:010} 00000 n \n", offset));
    }
    out.push_str(&format!(
        "trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        xref_offset
    ));
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byterange::extract_signed_bytes;
    use crate::byterange::patch_byte_range;

    #[test]
    fn test_header_version() {
        assert_eq!(parse_header_version(b"%PDF-1.7\n...").unwrap(), (1, 7));
        assert_eq!(parse_header_version(b"%PDF-2.0\n...").unwrap(), (2, 0));
        assert!(parse_header_version(b"not a pdf").is_err());
    }

    #[test]
    fn test_parse_trailer_of_minimal_pdf() {
        let pdf = minimal_test_pdf();
        let trailer = parse_last_trailer(&pdf).unwrap();
        assert_eq!(trailer.size, 4);
        assert_eq!(trailer.root_number, 1);
        assert_eq!(trailer.root_generation, 0);
        assert!(trailer.startxref > 0);
    }

    #[test]
    fn test_extract_catalog_source() {
        let pdf = minimal_test_pdf();
        let src = extract_object_source(&pdf, 1, 0).unwrap();
        assert!(src.contains("/Type /Catalog"));
        assert!(src.ends_with(">>"));
    }

    #[test]
    fn test_materialize_offsets_point_at_placeholders() {
        let doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        let calc = ByteRangeCalculator::new(64);
        let opts = SignOptions::default().with_reason("unit test");
        let mat = doc.materialize(&opts, &calc).unwrap();

        let c = mat.offsets.contents_offset;
        assert_eq!(mat.buffer[c], b'<');
        assert_eq!(mat.buffer[c + mat.offsets.placeholder_size - 1], b'>');
        assert!(mat.buffer[c + 1..c + mat.offsets.placeholder_size - 1]
            .iter()
            .all(|&b| b == b'0'));

        let b = mat.offsets.byte_range_offset;
        assert_eq!(mat.buffer[b], b'[');
        // the original bytes are untouched
        assert_eq!(&mat.buffer[..doc.bytes().len()], doc.bytes());
        // and the update ends like a PDF file
        assert!(mat.buffer.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_materialized_document_scans_back() {
        let doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        let calc = ByteRangeCalculator::new(64);
        let opts = SignOptions::default()
            .with_reason("scan me")
            .with_field_name("SigField");
        let mut mat = doc.materialize(&opts, &calc).unwrap();

        let range = calc.calculate_byte_range(mat.buffer.len(), mat.offsets.contents_offset);
        patch_byte_range(&mut mat.buffer, mat.offsets.byte_range_offset, &range).unwrap();

        let sigs = scan_signatures(&mat.buffer);
        assert_eq!(sigs.len(), 1);
        let sig = &sigs[0];
        assert_eq!(sig.byte_range, range);
        assert_eq!(sig.contents_offset, mat.offsets.contents_offset);
        assert_eq!(sig.info.reason.as_deref(), Some("scan me"));
        assert_eq!(sig.info.field_name.as_deref(), Some("SigField"));
        assert_eq!(
            sig.info.sub_filter,
            Some(crate::types::SignatureSubFilter::Pkcs7Detached)
        );
        assert!(sig.info.certification.is_none());
        assert!(sig.quick_check());
        // gap in coverage equals the placeholder width
        assert_eq!(sig.byte_range.gap_len() as usize, calc.placeholder_size());
        // the signed spans exclude exactly the contents value
        let signed = extract_signed_bytes(&mat.buffer, &sig.byte_range).unwrap();
        assert_eq!(signed.len(), mat.buffer.len() - calc.placeholder_size());
    }

    #[test]
    fn test_certification_reference_is_scanned() {
        let doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        let calc = ByteRangeCalculator::new(64);
        let opts = SignOptions::default()
            .with_certification(crate::types::CertificationLevel::NoChanges);
        let mat = doc.materialize(&opts, &calc).unwrap();

        let sigs = scan_signatures(&mat.buffer);
        assert_eq!(
            sigs[0].info.certification,
            Some(crate::types::CertificationLevel::NoChanges)
        );
    }

    #[test]
    fn test_decode_hex_lenient() {
        assert_eq!(decode_hex_lenient(b"ABCD").unwrap(), vec![0xAB, 0xCD]);
        assert_eq!(decode_hex_lenient(b"AB CD\n").unwrap(), vec![0xAB, 0xCD]);
        assert_eq!(decode_hex_lenient(b"ABC").unwrap(), vec![0xAB, 0xC0]);
        assert!(decode_hex_lenient(b"XY").is_none());
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("Hello"), "Hello");
        assert_eq!(escape_pdf_string("Hello (World)"), "Hello \\(World\\)");
        assert_eq!(escape_pdf_string("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_format_pdf_date() {
        use chrono::TimeZone;
        let date = Utc.with_ymd_and_hms(2026, 8, 7, 12, 30, 0).unwrap();
        assert_eq!(format_pdf_date(date), "D:20260807123000Z");
    }

    #[test]
    fn test_dss_persistence_writes_catalog_entries() {
        let mut doc = SigningDocument::new(minimal_test_pdf()).unwrap();
        doc.dss_mut()
            .add(include_bytes!("../tests/fixtures/crl.der"), None)
            .unwrap();
        let calc = ByteRangeCalculator::new(64);
        let mat = doc.materialize(&SignOptions::default(), &calc).unwrap();

        let tail = String::from_utf8_lossy(&mat.buffer[doc.bytes().len()..]);
        assert!(tail.contains("/DSS"));
        assert!(tail.contains("/CRLs"));
        // below PDF 2.0 the extension marker must be recorded
        assert!(tail.contains("/ESIC"));
    }
}
