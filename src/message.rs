use std::collections::BTreeMap;

/// A decoded message modeled as a tag-indexed bag of raw field values, rather
/// than a per-MsgType struct hierarchy: the session only ever inspects a
/// small fixed set of fields (see `fields::tags`) regardless of MsgType.
#[derive(Debug, Clone, Default)]
pub struct Message {
    fields: BTreeMap<u32, Vec<u8>>,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }

    pub fn set(&mut self, tag: u32, value: impl Into<Vec<u8>>) {
        self.fields.insert(tag, value.into());
    }

    pub fn get_raw(&self, tag: u32) -> Option<&[u8]> {
        self.fields.get(&tag).map(|v| v.as_slice())
    }

    pub fn get_str(&self, tag: u32) -> Option<&str> {
        self.get_raw(tag).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_u32(&self, tag: u32) -> Option<u32> {
        self.get_str(tag).and_then(|s| s.parse().ok())
    }

    pub fn get_char(&self, tag: u32) -> Option<char> {
        self.get_str(tag).and_then(|s| s.chars().next())
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.fields.contains_key(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Vec<u8>)> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fields::tags;

    #[test]
    fn test_set_and_get() {
        let mut msg = Message::new();
        msg.set(tags::MsgSeqNum, b"42".to_vec());
        assert_eq!(msg.get_u32(tags::MsgSeqNum), Some(42));
        assert_eq!(msg.get_str(tags::MsgSeqNum), Some("42"));
        assert!(msg.contains(tags::MsgSeqNum));
        assert!(!msg.contains(tags::BeginSeqNo));
    }

    #[test]
    fn test_get_char() {
        let mut msg = Message::new();
        msg.set(tags::PossDupFlag, b"Y".to_vec());
        assert_eq!(msg.get_char(tags::PossDupFlag), Some('Y'));
    }
}
