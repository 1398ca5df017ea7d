use std::fmt;

/// Immutable identity of a session: the FIX version plus the two comp ids
/// that name its endpoints, with an optional qualifier for running more than
/// one session between the same pair of comp ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionID {
    begin_string: String,
    sender_comp_id: String,
    target_comp_id: String,
    qualifier: Option<String>,
}

impl SessionID {
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        SessionID {
            begin_string: begin_string.into(),
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn begin_string(&self) -> &str {
        &self.begin_string
    }

    pub fn sender_comp_id(&self) -> &str {
        &self.sender_comp_id
    }

    pub fn target_comp_id(&self) -> &str {
        &self.target_comp_id
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// The identity as seen from the other side of the wire.
    pub fn reversed(&self) -> SessionID {
        SessionID {
            begin_string: self.begin_string.clone(),
            sender_comp_id: self.target_comp_id.clone(),
            target_comp_id: self.sender_comp_id.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    /// Parses `BeginString:SenderCompID->TargetCompID[:Qualifier]`. If
    /// `reverse` is set, the sender/target halves are swapped, which is how a
    /// caller matches an inbound header against its own local session.
    pub fn parse(s: &str, reverse: bool) -> Option<SessionID> {
        let (head, qualifier) = match s.split_once(':').map(|(begin, rest)| {
            match rest.split_once(':') {
                Some((comp, q)) => (format!("{begin}:{comp}"), Some(q.to_string())),
                None => (format!("{begin}:{rest}"), None),
            }
        }) {
            Some(v) => v,
            None => return None,
        };
        let (begin_string, comp_part) = head.split_once(':')?;
        let (sender, target) = comp_part.split_once("->")?;
        let (sender_comp_id, target_comp_id) = if reverse {
            (target, sender)
        } else {
            (sender, target)
        };
        Some(SessionID {
            begin_string: begin_string.to_string(),
            sender_comp_id: sender_comp_id.to_string(),
            target_comp_id: target_comp_id.to_string(),
            qualifier,
        })
    }
}

impl fmt::Display for SessionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.begin_string, self.sender_comp_id, self.target_comp_id
        )?;
        if let Some(q) = &self.qualifier {
            write!(f, ":{q}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_and_parse_roundtrip() {
        let id = SessionID::new("FIX.4.2", "ME", "YOU");
        assert_eq!(id.to_string(), "FIX.4.2:ME->YOU");
        let parsed = SessionID::parse(&id.to_string(), false).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_qualifier_roundtrip() {
        let id = SessionID::new("FIX.4.2", "ME", "YOU").with_qualifier("backup");
        assert_eq!(id.to_string(), "FIX.4.2:ME->YOU:backup");
        let parsed = SessionID::parse(&id.to_string(), false).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_reverse_parse_matches_local_session() {
        let local = SessionID::new("FIX.4.2", "ME", "YOU");
        let inbound_header = SessionID::new("FIX.4.2", "YOU", "ME");
        let matched = SessionID::parse(&inbound_header.to_string(), true).unwrap();
        assert_eq!(matched, local);
    }

    #[test]
    fn test_reversed() {
        let id = SessionID::new("FIX.4.2", "ME", "YOU");
        assert_eq!(id.reversed(), SessionID::new("FIX.4.2", "YOU", "ME"));
    }
}
