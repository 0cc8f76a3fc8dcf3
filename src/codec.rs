//! Fixed-width integer helpers.
//!
//! The `get_*`/`set_*` functions work on byte arrays of exactly the field
//! width. The `Stream` methods layer them on top of `bread`/`bwrite`:
//! `read_*` falls back to zero when fewer bytes arrive than the width,
//! `try_read_*` reports the short read instead.

use crate::core::{Result, StreamError};
use crate::stream::Stream;

pub fn get_u8(b: &[u8; 1]) -> u8 {
    b[0]
}

pub fn get_s8(b: &[u8; 1]) -> i8 {
    b[0] as i8
}

pub fn get_u16_le(b: &[u8; 2]) -> u16 {
    u16::from_le_bytes(*b)
}

pub fn get_s16_le(b: &[u8; 2]) -> i16 {
    i16::from_le_bytes(*b)
}

pub fn get_u16_be(b: &[u8; 2]) -> u16 {
    u16::from_be_bytes(*b)
}

pub fn get_s16_be(b: &[u8; 2]) -> i16 {
    i16::from_be_bytes(*b)
}

pub fn get_u24_le(b: &[u8; 3]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], 0])
}

pub fn get_s24_le(b: &[u8; 3]) -> i32 {
    // sign-extend from bit 23
    ((get_u24_le(b) << 8) as i32) >> 8
}

pub fn get_u24_be(b: &[u8; 3]) -> u32 {
    u32::from_be_bytes([0, b[0], b[1], b[2]])
}

pub fn get_s24_be(b: &[u8; 3]) -> i32 {
    ((get_u24_be(b) << 8) as i32) >> 8
}

pub fn get_u32_le(b: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*b)
}

pub fn get_s32_le(b: &[u8; 4]) -> i32 {
    i32::from_le_bytes(*b)
}

pub fn get_u32_be(b: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*b)
}

pub fn get_s32_be(b: &[u8; 4]) -> i32 {
    i32::from_be_bytes(*b)
}

pub fn set_u8(b: &mut [u8; 1], value: u8) {
    b[0] = value;
}

pub fn set_s8(b: &mut [u8; 1], value: i8) {
    b[0] = value as u8;
}

pub fn set_u16_le(b: &mut [u8; 2], value: u16) {
    *b = value.to_le_bytes();
}

pub fn set_s16_le(b: &mut [u8; 2], value: i16) {
    *b = value.to_le_bytes();
}

pub fn set_u16_be(b: &mut [u8; 2], value: u16) {
    *b = value.to_be_bytes();
}

pub fn set_s16_be(b: &mut [u8; 2], value: i16) {
    *b = value.to_be_bytes();
}

/// Bits above 23 are dropped.
pub fn set_u24_le(b: &mut [u8; 3], value: u32) {
    let [b0, b1, b2, _] = value.to_le_bytes();
    *b = [b0, b1, b2];
}

pub fn set_s24_le(b: &mut [u8; 3], value: i32) {
    set_u24_le(b, value as u32);
}

/// Bits above 23 are dropped.
pub fn set_u24_be(b: &mut [u8; 3], value: u32) {
    let [_, b1, b2, b3] = value.to_be_bytes();
    *b = [b1, b2, b3];
}

pub fn set_s24_be(b: &mut [u8; 3], value: i32) {
    set_u24_be(b, value as u32);
}

pub fn set_u32_le(b: &mut [u8; 4], value: u32) {
    *b = value.to_le_bytes();
}

pub fn set_s32_le(b: &mut [u8; 4], value: i32) {
    *b = value.to_le_bytes();
}

pub fn set_u32_be(b: &mut [u8; 4], value: u32) {
    *b = value.to_be_bytes();
}

pub fn set_s32_be(b: &mut [u8; 4], value: i32) {
    *b = value.to_be_bytes();
}

macro_rules! stream_codec {
    ($($ty:ty, $width:literal, $get:ident, $set:ident, $try_read:ident, $read:ident, $write:ident;)*) => {
        impl Stream {
            $(
                pub fn $try_read(&mut self) -> Result<$ty> {
                    let mut b = [0u8; $width];
                    let n = self.bread(&mut b)?;
                    if n != $width {
                        return Err(StreamError::Underrun {
                            wanted: $width,
                            available: n,
                        });
                    }
                    Ok($get(&b))
                }

                pub fn $read(&mut self) -> $ty {
                    self.$try_read().unwrap_or(0)
                }

                pub fn $write(&mut self, value: $ty) -> Result<()> {
                    let mut b = [0u8; $width];
                    $set(&mut b, value);
                    let written = self.bwrite(&b)?;
                    if written != $width {
                        return Err(StreamError::ShortWrite {
                            wanted: $width,
                            written,
                        });
                    }
                    Ok(())
                }
            )*
        }
    };
}

stream_codec! {
    u8, 1, get_u8, set_u8, try_read_u8, read_u8, write_u8;
    i8, 1, get_s8, set_s8, try_read_s8, read_s8, write_s8;
    u16, 2, get_u16_le, set_u16_le, try_read_u16_le, read_u16_le, write_u16_le;
    i16, 2, get_s16_le, set_s16_le, try_read_s16_le, read_s16_le, write_s16_le;
    u16, 2, get_u16_be, set_u16_be, try_read_u16_be, read_u16_be, write_u16_be;
    i16, 2, get_s16_be, set_s16_be, try_read_s16_be, read_s16_be, write_s16_be;
    u32, 3, get_u24_le, set_u24_le, try_read_u24_le, read_u24_le, write_u24_le;
    i32, 3, get_s24_le, set_s24_le, try_read_s24_le, read_s24_le, write_s24_le;
    u32, 3, get_u24_be, set_u24_be, try_read_u24_be, read_u24_be, write_u24_be;
    i32, 3, get_s24_be, set_s24_be, try_read_s24_be, read_s24_be, write_s24_be;
    u32, 4, get_u32_le, set_u32_le, try_read_u32_le, read_u32_le, write_u32_le;
    i32, 4, get_s32_le, set_s32_le, try_read_s32_le, read_s32_le, write_s32_le;
    u32, 4, get_u32_be, set_u32_be, try_read_u32_be, read_u32_be, write_u32_be;
    i32, 4, get_s32_be, set_s32_be, try_read_s32_be, read_s32_be, write_s32_be;
}
