//! Minimal Borsh-compatible encoding for Token Metadata program data
//!
//! Strings are u32-LE length prefixed, options carry a 0/1 tag byte and
//! booleans are a single byte.

use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn pubkey(&mut self, key: &Pubkey) -> &mut Self {
        self.buf.extend_from_slice(key.as_ref());
        self
    }

    pub fn none(&mut self) -> &mut Self {
        self.u8(0)
    }

    pub fn some(&mut self) -> &mut Self {
        self.u8(1)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("unexpected end of data at offset {}", self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bool(&mut self) -> Result<bool, String> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(format!("invalid bool byte {other}")),
        }
    }

    pub fn string(&mut self) -> Result<String, String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, String> {
        let bytes = self.take(32)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(Pubkey::new_from_array(key))
    }

    /// Read an option tag; `true` means a value follows
    pub fn option(&mut self) -> Result<bool, String> {
        self.bool()
    }

    pub fn skip(&mut self, n: usize) -> Result<(), String> {
        self.take(n).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut w = Writer::new();
        w.string("abc");
        assert_eq!(w.into_bytes(), vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_reader_reports_truncation() {
        let mut r = Reader::new(&[5, 0, 0, 0, b'a']);
        assert!(r.string().is_err());
    }

    #[test]
    fn test_reader_rejects_bad_bool() {
        let mut r = Reader::new(&[2]);
        assert!(r.bool().is_err());
    }
}
