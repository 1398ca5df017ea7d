use std::io::{self, Write};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::mem::MsgBuf;

/// Computes a running mod-256 sum of bytes written through it, while also
/// forwarding them to the wrapped sink.
pub struct ChecksumWriter<W> {
    inner: W,
    sum: u32,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        ChecksumWriter { inner, sum: 0 }
    }

    pub fn checksum(&self) -> u8 {
        (self.sum % 256) as u8
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        for &b in &buf[..n] {
            self.sum += b as u32;
        }
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct AsyncChecksumWriter<W> {
    inner: W,
    sum: u32,
}

impl<W: AsyncWrite + Unpin> AsyncChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        AsyncChecksumWriter { inner, sum: 0 }
    }

    pub fn checksum(&self) -> u8 {
        (self.sum % 256) as u8
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await?;
        for &b in buf {
            self.sum += b as u32;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub fn calc_checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (sum % 256) as u8
}

/// Parses the trailing `10=XXX\x01` field, if the buffer ends with one
/// shaped correctly.
pub fn parse_checksum(msg_buf: &[u8]) -> Option<u8> {
    if msg_buf.len() < 7 {
        return None;
    }
    let tail = &msg_buf[msg_buf.len() - 7..];
    if !tail.starts_with(b"10=") || tail[6] != b'\x01' {
        return None;
    }
    let digits = &tail[3..6];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse::<u16>().ok().map(|n| n as u8)
}

pub fn checksum_is_valid(msg_buf: &MsgBuf) -> bool {
    match parse_checksum(&msg_buf.0) {
        Some(expected) => calc_checksum(&msg_buf.0[..msg_buf.0.len() - 7]) == expected,
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_calc_checksum() {
        assert_eq!(calc_checksum(b"8=FIX.4.2\x019=5\x01"), calc_checksum(b"8=FIX.4.2\x019=5\x01"));
        assert_eq!(calc_checksum(b""), 0);
        assert_eq!(calc_checksum(&[255; 256]), 0);
    }

    #[test]
    fn test_parse_checksum_valid() {
        assert_eq!(parse_checksum(b"junk10=045\x01"), Some(45));
    }

    #[test]
    fn test_parse_checksum_rejects_malformed() {
        assert_eq!(parse_checksum(b"junk10=04X\x01"), None);
        assert_eq!(parse_checksum(b"short"), None);
    }

    #[test]
    fn test_checksum_is_valid_roundtrip() {
        let body = b"8=FIX.4.2\x019=5\x0135=A\x01".to_vec();
        let sum = calc_checksum(&body);
        let mut full = body.clone();
        full.extend(format!("10={:03}\x01", sum).into_bytes());
        let buf: MsgBuf = full.into();
        assert!(checksum_is_valid(&buf));
    }

    #[tokio::test]
    async fn test_async_checksum_writer() {
        let mut out = Vec::new();
        let mut w = AsyncChecksumWriter::new(&mut out);
        w.write_all(b"8=FIX.4.2\x01").await.unwrap();
        assert_eq!(w.checksum(), calc_checksum(b"8=FIX.4.2\x01"));
    }
}
