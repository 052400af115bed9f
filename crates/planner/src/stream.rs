//! Length-prefixed binary stream used to ship plan fragments between nodes.
//!
//! Integers that are usually small (counts, offsets, limits, column
//! indexes) are written as variable-length unsigned ints: 7 payload bits per
//! byte, least significant group first, high bit set on every byte except the
//! last. A `u32` therefore takes between one and five bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dqe_common::{DqeError, Result};

const MAX_VINT_BYTES: usize = 5;

#[derive(Debug, Default)]
pub struct StreamOutput {
    buf: BytesMut,
}

impl StreamOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_vint(&mut self, mut v: u32) {
        while v & !0x7f != 0 {
            self.buf.put_u8(((v & 0x7f) | 0x80) as u8);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn write_string(&mut self, v: &str) -> Result<()> {
        let len = u32::try_from(v.len())
            .map_err(|_| DqeError::Codec(format!("string of {} bytes is too long", v.len())))?;
        self.write_vint(len);
        self.buf.put_slice(v.as_bytes());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[derive(Debug)]
pub struct StreamInput {
    buf: Bytes,
}

impl StreamInput {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_vint(&mut self) -> Result<u32> {
        let mut out: u32 = 0;
        for i in 0..MAX_VINT_BYTES {
            let b = self.read_u8()?;
            let group = u32::from(b & 0x7f);
            if i == MAX_VINT_BYTES - 1 && group > 0x0f {
                return Err(DqeError::Codec("vint overflows u32".to_string()));
            }
            out |= group << (7 * i);
            if b & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(DqeError::Codec(format!(
            "vint longer than {MAX_VINT_BYTES} bytes"
        )))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DqeError::Codec(format!("invalid boolean byte {other}"))),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_vint()? as usize;
        self.ensure(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| DqeError::Codec(format!("string is not valid utf-8: {e}")))
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(DqeError::Codec(format!(
                "unexpected end of stream: need {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
