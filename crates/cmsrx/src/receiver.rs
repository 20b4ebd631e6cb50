//! Receiver identities.
//!
//! Each emulated receiver is one of a closed set of named protocol
//! dialects. The identity ties together the configuration key used in
//! the YAML ports table, the display name used in log tags, and the
//! dialect adapter that drives framing and responses.

use std::fmt;

use crate::dialect::{self, Dialect};

/// The closed set of emulated receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKind {
    /// SIA-DC09 framing, also carries ADM-CID event coding.
    SiaDcs,
    /// XML frames terminated by `</XMLMessageClass>`.
    Masxml,
    /// MASXML-family protocol framed with STX/ETX envelopes.
    Manitou,
    /// XML frames terminated by `</Signals><Checksum>XXXX</Checksum>`.
    Microkey,
    /// Byte-oriented protocol with 0x06/0x15 acknowledgements.
    Sentinel,
}

impl ReceiverKind {
    /// All receiver kinds, in startup order.
    pub const ALL: [ReceiverKind; 5] = [
        ReceiverKind::SiaDcs,
        ReceiverKind::Masxml,
        ReceiverKind::Manitou,
        ReceiverKind::Microkey,
        ReceiverKind::Sentinel,
    ];

    /// The lowercase hyphenated key used in the configuration ports table.
    pub fn config_key(&self) -> &'static str {
        match self {
            ReceiverKind::SiaDcs => "sia-dcs",
            ReceiverKind::Masxml => "masxml",
            ReceiverKind::Manitou => "manitou",
            ReceiverKind::Microkey => "microkey",
            ReceiverKind::Sentinel => "sentinel",
        }
    }

    /// Alternate configuration keys accepted for this receiver.
    ///
    /// Deployments that front a full CMS stack prefix the key with
    /// `cms-`; both spellings resolve to the same receiver.
    pub fn config_aliases(&self) -> [String; 2] {
        [
            self.config_key().to_string(),
            format!("cms-{}", self.config_key()),
        ]
    }

    /// Build the dialect adapter for this receiver.
    ///
    /// This is the static registry: the typed replacement for runtime
    /// protocol registration. Every kind maps to exactly one adapter.
    pub fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            ReceiverKind::SiaDcs => Box::new(dialect::sia_dc09::SiaDc09::new()),
            ReceiverKind::Masxml => Box::new(dialect::masxml::Masxml::new()),
            ReceiverKind::Manitou => Box::new(dialect::manitou::Manitou::new()),
            ReceiverKind::Microkey => Box::new(dialect::microkey::Microkey::new()),
            ReceiverKind::Sentinel => Box::new(dialect::sentinel::Sentinel),
        }
    }

    /// Parse a receiver kind from a config key or alias.
    pub fn from_key(key: &str) -> Option<ReceiverKind> {
        let key = key.trim().to_ascii_lowercase();
        let key = key.strip_prefix("cms-").unwrap_or(&key);
        ReceiverKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.config_key() == key)
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverKind::SiaDcs => "SIA_DCS",
            ReceiverKind::Masxml => "MASXML",
            ReceiverKind::Manitou => "MANITOU",
            ReceiverKind::Microkey => "MICROKEY",
            ReceiverKind::Sentinel => "SENTINEL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_roundtrip() {
        for kind in ReceiverKind::ALL {
            assert_eq!(ReceiverKind::from_key(kind.config_key()), Some(kind));
        }
    }

    #[test]
    fn test_cms_alias() {
        assert_eq!(
            ReceiverKind::from_key("cms-sia-dcs"),
            Some(ReceiverKind::SiaDcs)
        );
        assert_eq!(
            ReceiverKind::from_key("cms-masxml"),
            Some(ReceiverKind::Masxml)
        );
        assert_eq!(ReceiverKind::from_key("unknown"), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ReceiverKind::SiaDcs.to_string(), "SIA_DCS");
        assert_eq!(ReceiverKind::Microkey.to_string(), "MICROKEY");
    }
}
