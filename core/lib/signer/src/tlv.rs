//! TLV serialization for the LS12 signature file format.
//!
//! A record is either `[flags|tag, len, value]` when the tag fits in five
//! bits and the value in one length byte, or
//! `[flags|FLAG_TLV16|tag_hi, tag_lo, len_hi, len_lo, value]` otherwise.
//! Only writers are provided; the verification tool owns the parser.

use std::io::{self, Write};

use logsig_basic_types::Imprint;

/// Selects the 16-bit header form.
pub(crate) const FLAG_TLV16: u8 = 0x80;
/// Tag bits of the first header byte; the remaining two bits (0x40, 0x20)
/// are forwarded unmodified.
pub(crate) const TYPE_MASK: u8 = 0x1f;

pub(crate) const TAG_BLOCK_HEADER: u16 = 0x0901;
pub(crate) const TAG_RECORD_HASH: u16 = 0x0902;
pub(crate) const TAG_TREE_HASH: u16 = 0x0903;
pub(crate) const TAG_BLOCK_SIGNATURE: u16 = 0x0904;
pub(crate) const TAG_KSI_SIGNATURE: u16 = 0x0905;
pub(crate) const TAG_METADATA: u16 = 0x0911;

/// Number of octets a big-endian minimal-width integer occupies; zero
/// occupies zero octets.
pub(crate) fn int_size(mut val: u64) -> usize {
    let mut n = 0;
    while val != 0 {
        val >>= 8;
        n += 1;
    }
    n
}

/// Header size the given tag/length pair will serialize to.
pub(crate) fn header_size(tag: u16, len: usize) -> usize {
    if tag <= TYPE_MASK as u16 && len <= 0xff {
        2
    } else {
        4
    }
}

fn len16(len: usize) -> io::Result<u16> {
    u16::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "TLV value exceeds 65535 octets"))
}

pub(crate) fn write_header(
    w: &mut impl Write,
    flags: u8,
    tag: u16,
    len: usize,
) -> io::Result<()> {
    debug_assert_eq!(flags & TYPE_MASK, 0);
    let len = len16(len)?;
    if header_size(tag, len as usize) == 2 {
        let buf = [(flags & !FLAG_TLV16) | tag as u8, len as u8];
        w.write_all(&buf)
    } else {
        debug_assert_eq!(tag >> 8 & u16::from(TYPE_MASK), tag >> 8);
        let typ = (u16::from(flags | FLAG_TLV16) << 8) | tag;
        let buf = [
            (typ >> 8) as u8,
            (typ & 0xff) as u8,
            (len >> 8) as u8,
            (len & 0xff) as u8,
        ];
        w.write_all(&buf)
    }
}

pub(crate) fn write_octet_string_tlv(
    w: &mut impl Write,
    flags: u8,
    tag: u16,
    data: &[u8],
) -> io::Result<()> {
    write_header(w, flags, tag, data.len())?;
    w.write_all(data)
}

pub(crate) fn write_int_tlv(w: &mut impl Write, flags: u8, tag: u16, val: u64) -> io::Result<()> {
    let count = int_size(val);
    write_header(w, flags, tag, count)?;
    w.write_all(&val.to_be_bytes()[8 - count..])
}

pub(crate) fn write_imprint_tlv(w: &mut impl Write, tag: u16, imprint: &Imprint) -> io::Result<()> {
    write_octet_string_tlv(w, 0x00, tag, imprint.as_bytes())
}

/// Block header: hash algorithm id, block IV and the last leaf imprint
/// carried over from the previous block.
pub(crate) fn write_block_header(
    w: &mut impl Write,
    hash_algorithm_id: u8,
    iv: &[u8],
    last_leaf: &Imprint,
) -> io::Result<()> {
    let tlv_len = 2 + 1 + 2 + iv.len() + 2 + last_leaf.len();
    write_header(w, 0x00, TAG_BLOCK_HEADER, tlv_len)?;
    write_octet_string_tlv(w, 0x00, 0x01, &[hash_algorithm_id])?;
    write_octet_string_tlv(w, 0x00, 0x02, iv)?;
    write_octet_string_tlv(w, 0x00, 0x03, last_leaf.as_bytes())
}

/// Block signature carrying the record count and the DER-serialized
/// aggregation signature.
pub(crate) fn write_signature(
    w: &mut impl Write,
    record_count: u64,
    der: &[u8],
) -> io::Result<()> {
    let total = 2
        + int_size(record_count)
        + header_size(TAG_KSI_SIGNATURE, der.len())
        + der.len();
    write_header(w, 0x00, TAG_BLOCK_SIGNATURE, total)?;
    write_int_tlv(w, 0x00, 0x01, record_count)?;
    write_octet_string_tlv(w, 0x00, TAG_KSI_SIGNATURE, der)
}

/// "No signature" placeholder: the root imprint instead of a signature,
/// optionally with a NUL-terminated error string.
pub(crate) fn write_no_signature(
    w: &mut impl Write,
    record_count: u64,
    root: &Imprint,
    error_text: Option<&str>,
) -> io::Result<()> {
    let no_sig_size = 2
        + root.len()
        + error_text.map_or(0, |text| {
            header_size(0x02, text.len() + 1) + text.len() + 1
        });
    let total = 2 + int_size(record_count) + header_size(0x02, no_sig_size) + no_sig_size;
    write_header(w, 0x00, TAG_BLOCK_SIGNATURE, total)?;
    write_int_tlv(w, 0x00, 0x01, record_count)?;
    write_header(w, 0x00, 0x02, no_sig_size)?;
    write_octet_string_tlv(w, 0x00, 0x01, root.as_bytes())?;
    if let Some(text) = error_text {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        write_octet_string_tlv(w, 0x00, 0x02, &bytes)?;
    }
    Ok(())
}

/// Encodes a metadata record: the record index plus one key/value attribute.
/// Key and value carry their trailing NUL inside the TLV value.
pub(crate) fn encode_metadata(record_index: u64, key: &str, value: &str) -> io::Result<Vec<u8>> {
    let key_len = key.len() + 1;
    let value_len = value.len() + 1;
    let attrib_len =
        header_size(0x01, key_len) + key_len + header_size(0x02, value_len) + value_len;
    let total = 2 + int_size(record_index) + header_size(0x02, attrib_len) + attrib_len;

    let mut buf = Vec::with_capacity(4 + total);
    write_header(&mut buf, 0x00, TAG_METADATA, total)?;
    write_int_tlv(&mut buf, 0x00, 0x01, record_index)?;
    write_header(&mut buf, 0x00, 0x02, attrib_len)?;

    let mut key_bytes = Vec::with_capacity(key_len);
    key_bytes.extend_from_slice(key.as_bytes());
    key_bytes.push(0);
    write_octet_string_tlv(&mut buf, 0x00, 0x01, &key_bytes)?;

    let mut value_bytes = Vec::with_capacity(value_len);
    value_bytes.extend_from_slice(value.as_bytes());
    value_bytes.push(0);
    write_octet_string_tlv(&mut buf, 0x00, 0x02, &value_bytes)?;

    Ok(buf)
}
