use std::fmt;
use std::ops::Index;

/// A raw, already-framed FIX message as bytes off (or onto) the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct MsgBuf(pub Vec<u8>);

impl MsgBuf {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<std::ops::RangeFull> for MsgBuf {
    type Output = [u8];
    fn index(&self, _: std::ops::RangeFull) -> &[u8] {
        &self.0[..]
    }
}

impl From<Vec<u8>> for MsgBuf {
    fn from(v: Vec<u8>) -> Self {
        MsgBuf(v)
    }
}

impl AsRef<[u8]> for MsgBuf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MsgBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: String = self
            .0
            .iter()
            .map(|&b| if b == b'\x01' { '|' } else { b as char })
            .collect();
        write!(f, "MsgBuf({rendered})")
    }
}

impl fmt::Display for MsgBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: String = self
            .0
            .iter()
            .map(|&b| if b == b'\x01' { '|' } else { b as char })
            .collect();
        write!(f, "{rendered}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debug_renders_soh_as_pipe() {
        let buf: MsgBuf = b"8=FIX.4.2\x019=5\x01".to_vec().into();
        assert_eq!(format!("{:?}", buf), "MsgBuf(8=FIX.4.2|9=5|)");
    }
}
