//! Primitive field codec: VINTs, length-prefixed names, alignment.
//!
//! Reads work on an explicit `Cursor<&[u8]>` so header parsing never touches
//! a live stream; writes go to any `Write`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use super::error::{CfsiError, Result};
use super::structures::{MAX_NAME_LEN, VINT_MARKERS, VINT_SINGLE_BYTE_LIMIT, is_root_folder};

/// Run a fixed-width read, reporting a short buffer as `TruncatedInput`.
fn field<T>(
    cursor: &mut Cursor<&[u8]>,
    needed: u64,
    read: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
) -> Result<T> {
    let offset = cursor.position();
    read(cursor).map_err(|_| CfsiError::TruncatedInput { offset, needed })
}

pub fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    field(cursor, 1, |c| c.read_u8())
}

pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    field(cursor, 2, |c| c.read_u16::<LittleEndian>())
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    field(cursor, 4, |c| c.read_u32::<LittleEndian>())
}

/// Read one VINT: a single byte, or a marker byte followed by a `u16`.
pub fn read_vint(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let first = read_u8(cursor)?;
    if VINT_MARKERS.contains(&first) {
        return Ok(u32::from(read_u16(cursor)?));
    }
    Ok(u32::from(first))
}

/// Write a VINT, using `marker` for the two-byte form.
pub fn write_vint<W: Write>(out: &mut W, value: u32, marker: u8) -> Result<()> {
    if value < VINT_SINGLE_BYTE_LIMIT {
        out.write_u8(value as u8)?;
        return Ok(());
    }
    let wide = u16::try_from(value).map_err(|_| CfsiError::ValueTooLarge {
        what: "vint",
        value: u64::from(value),
    })?;
    out.write_u8(marker)?;
    out.write_u16::<LittleEndian>(wide)?;
    Ok(())
}

/// Read a single-byte-length-prefixed name.
///
/// Bytes map one to one onto chars so names survive a repack unchanged.
pub fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_u8(cursor)?;
    let mut buf = vec![0u8; usize::from(len)];
    field(cursor, u64::from(len), |c| c.read_exact(&mut buf))?;
    Ok(buf.into_iter().map(char::from).collect())
}

/// Write a name with its length byte; backslashes become forward slashes.
pub fn write_string<W: Write>(out: &mut W, text: &str) -> Result<()> {
    let normalized = text.replace('\\', "/");
    let bytes = encode_name(&normalized)?;
    if bytes.len() > MAX_NAME_LEN {
        return Err(CfsiError::PathTooLong {
            path: normalized,
            len: bytes.len(),
        });
    }
    out.write_u8(bytes.len() as u8)?;
    out.write_all(&bytes)?;
    Ok(())
}

/// Write a folder name. The root is a one-byte name holding NUL; an empty
/// name breaks the reader's traversal in some revisions.
pub fn write_folder_name<W: Write>(out: &mut W, folder: &str) -> Result<()> {
    if is_root_folder(folder) {
        out.write_all(&[1, 0])?;
        return Ok(());
    }
    write_string(out, folder)
}

/// Inverse of the byte-to-char mapping in `read_string`.
fn encode_name(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| CfsiError::UnencodableName {
                path: text.to_string(),
            })
        })
        .collect()
}

/// Round `offset` up to the next multiple of `boundary`.
pub fn align(offset: u64, boundary: u64) -> u64 {
    offset + padding(offset, boundary)
}

/// Bytes needed to bring `offset` up to a multiple of `boundary`.
pub fn padding(offset: u64, boundary: u64) -> u64 {
    if boundary <= 1 {
        return 0;
    }
    (boundary - offset % boundary) % boundary
}

/// Write `count` zero bytes.
pub fn write_zeros<W: Write>(out: &mut W, count: u64) -> Result<()> {
    io::copy(&mut io::repeat(0).take(count), out)?;
    Ok(())
}
