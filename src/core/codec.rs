//! Canonical CBOR encoding for stored metadata objects.
//!
//! Every on-disk and on-wire object has exactly one encoding: definite-length
//! arrays with fields in declaration order. Structural equality of two
//! objects is byte equality of their canonical encodings, and content
//! fingerprints are computed over these bytes.

use bytes::Bytes;
use ed25519_dalek::{Signature, VerifyingKey};
use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use super::crypto::SignatureInfo;
use super::digest::Sha256;
use super::identity::{BranchId, MdId, TlfId, UserId};
use super::metadata::{BareRootMetadata, MergeStatus, RootMetadataSigned, WriterMetadata};
use super::revision::Revision;

/// Hard cap on writer/reader list length when decoding untrusted bytes.
const MAX_USER_LIST: u64 = 4096;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<std::convert::Infallible>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("decode limit exceeded: {0}")]
    DecodeLimit(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("wrong array length for {what}: expected {expected}, got {got}")]
    WrongLength {
        what: &'static str,
        expected: u64,
        got: u64,
    },
    #[error("trailing bytes after encoded object")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

fn expect_array(
    dec: &mut Decoder<'_>,
    what: &'static str,
    expected: u64,
) -> Result<(), DecodeError> {
    match dec.array()? {
        Some(got) if got == expected => Ok(()),
        Some(got) => Err(DecodeError::WrongLength {
            what,
            expected,
            got,
        }),
        None => Err(DecodeError::IndefiniteLength),
    }
}

fn decode_fixed_bytes<const N: usize>(
    dec: &mut Decoder<'_>,
    field: &'static str,
) -> Result<[u8; N], DecodeError> {
    let raw = dec.bytes()?;
    let mut out = [0u8; N];
    if raw.len() != N {
        return Err(DecodeError::InvalidField {
            field,
            reason: format!("expected {} bytes, got {}", N, raw.len()),
        });
    }
    out.copy_from_slice(raw);
    Ok(out)
}

fn decode_user(dec: &mut Decoder<'_>, field: &'static str) -> Result<UserId, DecodeError> {
    let raw = dec.str()?;
    UserId::new(raw).map_err(|err| DecodeError::InvalidField {
        field,
        reason: err.to_string(),
    })
}

fn decode_user_list(dec: &mut Decoder<'_>, field: &'static str) -> Result<Vec<UserId>, DecodeError> {
    let len = dec.array()?.ok_or(DecodeError::IndefiniteLength)?;
    if len > MAX_USER_LIST {
        return Err(DecodeError::DecodeLimit("user list too long"));
    }
    let mut users = Vec::with_capacity(len as usize);
    for _ in 0..len {
        users.push(decode_user(dec, field)?);
    }
    Ok(users)
}

fn encode_user_list(
    enc: &mut Encoder<&mut Vec<u8>>,
    users: &[UserId],
) -> Result<(), EncodeError> {
    enc.array(users.len() as u64)?;
    for user in users {
        enc.str(user.as_str())?;
    }
    Ok(())
}

fn encode_sig_info(
    enc: &mut Encoder<&mut Vec<u8>>,
    sig: &SignatureInfo,
) -> Result<(), EncodeError> {
    enc.array(2)?;
    enc.bytes(&sig.signature().to_bytes())?;
    enc.bytes(sig.verifying_key().as_bytes())?;
    Ok(())
}

fn decode_sig_info(dec: &mut Decoder<'_>) -> Result<SignatureInfo, DecodeError> {
    expect_array(dec, "signature info", 2)?;
    let sig_bytes: [u8; 64] = decode_fixed_bytes(dec, "signature")?;
    let key_bytes: [u8; 32] = decode_fixed_bytes(dec, "verifying key")?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|err| DecodeError::InvalidField {
            field: "verifying key",
            reason: err.to_string(),
        })?;
    Ok(SignatureInfo::new(
        Signature::from_bytes(&sig_bytes),
        verifying_key,
    ))
}

fn encode_writer_metadata_into(
    enc: &mut Encoder<&mut Vec<u8>>,
    wm: &WriterMetadata,
) -> Result<(), EncodeError> {
    enc.array(7)?;
    enc.bytes(wm.tlf_id.as_bytes())?;
    enc.bytes(wm.branch_id.as_bytes())?;
    enc.bool(wm.merge_status == MergeStatus::Unmerged)?;
    encode_user_list(enc, &wm.writers)?;
    enc.str(wm.last_modifying_writer.as_str())?;
    enc.bool(wm.rekey)?;
    enc.bytes(&wm.encrypted_private)?;
    Ok(())
}

fn decode_writer_metadata(dec: &mut Decoder<'_>) -> Result<WriterMetadata, DecodeError> {
    expect_array(dec, "writer metadata", 7)?;
    let tlf_id = TlfId::from_bytes(decode_fixed_bytes(dec, "tlf id")?);
    let branch_id = BranchId::from_bytes(decode_fixed_bytes(dec, "branch id")?);
    let merge_status = if dec.bool()? {
        MergeStatus::Unmerged
    } else {
        MergeStatus::Merged
    };
    let writers = decode_user_list(dec, "writers")?;
    let last_modifying_writer = decode_user(dec, "last modifying writer")?;
    let rekey = dec.bool()?;
    let encrypted_private = Bytes::copy_from_slice(dec.bytes()?);
    Ok(WriterMetadata {
        tlf_id,
        branch_id,
        merge_status,
        writers,
        last_modifying_writer,
        rekey,
        encrypted_private,
    })
}

/// Canonical bytes of the writer-signed portion of a revision.
pub fn encode_writer_metadata(wm: &WriterMetadata) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    encode_writer_metadata_into(&mut enc, wm)?;
    Ok(buf)
}

fn encode_bare_md_into(
    enc: &mut Encoder<&mut Vec<u8>>,
    md: &BareRootMetadata,
) -> Result<(), EncodeError> {
    enc.array(6)?;
    encode_writer_metadata_into(enc, &md.writer_md)?;
    encode_sig_info(enc, &md.writer_sig)?;
    enc.u64(md.revision.get())?;
    enc.bytes(md.prev_root.as_bytes())?;
    encode_user_list(enc, &md.readers)?;
    enc.str(md.last_modifying_user.as_str())?;
    Ok(())
}

fn decode_bare_md_inner(dec: &mut Decoder<'_>) -> Result<BareRootMetadata, DecodeError> {
    expect_array(dec, "root metadata", 6)?;
    let writer_md = decode_writer_metadata(dec)?;
    let writer_sig = decode_sig_info(dec)?;
    let revision = Revision::new(dec.u64()?);
    let prev_root = MdId::from_digest(Sha256(decode_fixed_bytes(dec, "prev root")?));
    let readers = decode_user_list(dec, "readers")?;
    let last_modifying_user = decode_user(dec, "last modifying user")?;
    Ok(BareRootMetadata {
        writer_md,
        writer_sig,
        revision,
        prev_root,
        readers,
        last_modifying_user,
    })
}

/// Canonical bytes of a storable revision; content fingerprints and codec
/// equality are both defined over this encoding.
pub fn encode_bare_md(md: &BareRootMetadata) -> Result<Bytes, EncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    encode_bare_md_into(&mut enc, md)?;
    Ok(Bytes::from(buf))
}

pub fn decode_bare_md(bytes: &[u8]) -> Result<BareRootMetadata, DecodeError> {
    let mut dec = Decoder::new(bytes);
    let md = decode_bare_md_inner(&mut dec)?;
    if dec.position() != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(md)
}

/// Structural equality under the canonical encoding.
pub fn codec_equal(a: &BareRootMetadata, b: &BareRootMetadata) -> Result<bool, EncodeError> {
    Ok(encode_bare_md(a)? == encode_bare_md(b)?)
}

pub fn encode_signed_md(rmds: &RootMetadataSigned) -> Result<Bytes, EncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.array(2)?;
    encode_bare_md_into(&mut enc, &rmds.md)?;
    encode_sig_info(&mut enc, &rmds.sig_info)?;
    Ok(Bytes::from(buf))
}

pub fn decode_signed_md(bytes: &[u8]) -> Result<RootMetadataSigned, DecodeError> {
    let mut dec = Decoder::new(bytes);
    expect_array(&mut dec, "signed root metadata", 2)?;
    let md = decode_bare_md_inner(&mut dec)?;
    let sig_info = decode_sig_info(&mut dec)?;
    if dec.position() != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(RootMetadataSigned { md, sig_info })
}

/// Ordinal-log entry payload: a bare metadata identifier.
pub fn encode_md_id(id: &MdId) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.bytes(id.as_bytes())?;
    Ok(buf)
}

pub fn decode_md_id(bytes: &[u8]) -> Result<MdId, DecodeError> {
    let mut dec = Decoder::new(bytes);
    if dec.datatype()? != Type::Bytes {
        return Err(DecodeError::InvalidField {
            field: "md id",
            reason: "expected byte string".into(),
        });
    }
    let id = MdId::from_digest(Sha256(decode_fixed_bytes(&mut dec, "md id")?));
    if dec.position() != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(id)
}
