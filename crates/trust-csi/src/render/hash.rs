//! OpenSSL-compatible certificate subject hashing.
//!
//! Produces the same value as `openssl x509 -subject_hash`, the name used by
//! `c_rehash` for `<hash>.<n>` files. The subject is canonicalized first:
//! string attribute values are decoded, whitespace is trimmed and collapsed,
//! ASCII letters are lowercased and the result is re-tagged as UTF8String.

use sha1::{Digest, Sha1};
use trust_csi_common::{CsiError, CsiResult};
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::asn1_rs::{Any, Class, FromDer, Tag};

const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

/// Subject hash of a parsed certificate.
///
/// # Errors
///
/// Returns [`CsiError::InvalidCertificate`] if the subject cannot be
/// canonicalized.
pub fn certificate_subject_hash(cert: &X509Certificate<'_>) -> CsiResult<String> {
    subject_hash(cert.subject().as_raw())
}

/// Subject hash of a DER encoded X.501 `Name`.
///
/// # Errors
///
/// Returns [`CsiError::InvalidCertificate`] if the input is not a DER
/// SEQUENCE or holds a string value that cannot be decoded.
pub fn subject_hash(subject_der: &[u8]) -> CsiResult<String> {
    let (_, name) = Any::from_der(subject_der).map_err(|e| malformed(&e))?;
    if name.header.class() != Class::Universal || name.header.tag() != Tag::Sequence {
        return Err(CsiError::InvalidCertificate {
            message: "subject is not a SEQUENCE".to_string(),
        });
    }

    // OpenSSL hashes the RDN sets without the enclosing SEQUENCE header.
    let canonical = canonical_children(name.data, false)?;
    let digest = Sha1::digest(&canonical);

    let mut prefix = [digest[0], digest[1], digest[2], digest[3]];
    prefix.reverse();
    Ok(hex::encode(prefix))
}

fn canonical_children(mut content: &[u8], sort: bool) -> CsiResult<Vec<u8>> {
    let mut items = Vec::new();
    while !content.is_empty() {
        let (rest, any) = Any::from_der(content).map_err(|e| malformed(&e))?;
        let raw = &content[..content.len() - rest.len()];
        items.push(canonical_value(&any, raw)?);
        content = rest;
    }

    // SET OF members are ordered by their encoding.
    if sort {
        items.sort();
    }
    Ok(items.concat())
}

fn canonical_value(any: &Any<'_>, raw: &[u8]) -> CsiResult<Vec<u8>> {
    if any.header.class() != Class::Universal {
        return Ok(raw.to_vec());
    }

    let constructed = any.header.is_constructed();
    match any.header.tag() {
        Tag::Sequence if constructed => Ok(encode_tlv(
            TAG_SEQUENCE,
            &canonical_children(any.data, false)?,
        )),
        Tag::Set if constructed => Ok(encode_tlv(TAG_SET, &canonical_children(any.data, true)?)),
        tag if !constructed => match decode_string(tag, any.data)? {
            Some(text) => Ok(encode_tlv(TAG_UTF8_STRING, canonicalize(&text).as_bytes())),
            None => Ok(raw.to_vec()),
        },
        _ => Ok(raw.to_vec()),
    }
}

/// Decode the string types OpenSSL canonicalizes. Other types yield `None`.
fn decode_string(tag: Tag, data: &[u8]) -> CsiResult<Option<String>> {
    let text = match tag {
        Tag::Utf8String => std::str::from_utf8(data)
            .map_err(|_| invalid_string("UTF8String"))?
            .to_string(),
        Tag::PrintableString | Tag::T61String | Tag::Ia5String | Tag::VisibleString => {
            data.iter().map(|&b| char::from(b)).collect()
        }
        Tag::BmpString => {
            if data.len() % 2 != 0 {
                return Err(invalid_string("BMPString"));
            }
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|_| invalid_string("BMPString"))?
        }
        Tag::UniversalString => {
            if data.len() % 4 != 0 {
                return Err(invalid_string("UniversalString"));
            }
            data.chunks_exact(4)
                .map(|quad| char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]])))
                .collect::<Option<String>>()
                .ok_or_else(|| invalid_string("UniversalString"))?
        }
        _ => return Ok(None),
    };

    Ok(Some(text))
}

/// Trim, collapse internal whitespace runs to one space and lowercase ASCII.
pub(crate) fn canonicalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for ch in value.trim_matches(is_space).chars() {
        if is_space(ch) {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

/// The C locale `isspace` set.
const fn is_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\u{0b}' | '\u{0c}' | '\r')
}

#[allow(clippy::cast_possible_truncation)]
fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);

    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }

    out.extend_from_slice(content);
    out
}

fn malformed(err: &impl std::fmt::Display) -> CsiError {
    CsiError::InvalidCertificate {
        message: format!("malformed subject: {err}"),
    }
}

fn invalid_string(kind: &str) -> CsiError {
    CsiError::InvalidCertificate {
        message: format!("subject holds an undecodable {kind}"),
    }
}
