//! Little-endian field helpers shared by every payload codec.
//!
//! Each record type serializes itself to a flat byte payload before it is
//! handed to the storage backend. The layout is bespoke per type; these
//! helpers only standardize the primitive fields (fixed-width integers and
//! length-prefixed byte strings).

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::Result;

pub(crate) fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub(crate) fn put_bool(out: &mut Vec<u8>, v: bool) {
    out.push(u8::from(v));
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_i64(out: &mut Vec<u8>, v: i64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_i64(&mut buf, v);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_f64(out: &mut Vec<u8>, v: f64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_f64(&mut buf, v);
    out.extend_from_slice(&buf);
}

/// Length-prefixed byte string (u32 length, then the raw bytes).
pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) {
    put_bytes(out, s.as_bytes());
}

pub(crate) fn put_opt_str(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            put_bool(out, true);
            put_str(out, s);
        }
        None => put_bool(out, false),
    }
}

pub(crate) fn get_u8(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    Ok(cur.read_u8()?)
}

pub(crate) fn get_bool(cur: &mut Cursor<&[u8]>) -> Result<bool> {
    Ok(cur.read_u8()? != 0)
}

pub(crate) fn get_u32(cur: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(cur.read_u32::<LittleEndian>()?)
}

pub(crate) fn get_u64(cur: &mut Cursor<&[u8]>) -> Result<u64> {
    Ok(cur.read_u64::<LittleEndian>()?)
}

pub(crate) fn get_i64(cur: &mut Cursor<&[u8]>) -> Result<i64> {
    Ok(cur.read_i64::<LittleEndian>()?)
}

pub(crate) fn get_f64(cur: &mut Cursor<&[u8]>) -> Result<f64> {
    Ok(cur.read_f64::<LittleEndian>()?)
}

pub(crate) fn get_bytes(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = get_u32(cur)? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn get_str(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let bytes = get_bytes(cur)?;
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

pub(crate) fn get_opt_str(cur: &mut Cursor<&[u8]>) -> Result<Option<String>> {
    if get_bool(cur)? {
        Ok(Some(get_str(cur)?))
    } else {
        Ok(None)
    }
}
