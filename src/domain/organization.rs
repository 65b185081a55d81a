use serde::{Deserialize, Serialize};

/// The legal entities whose books are kept in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Organization {
    Ooo,
    Ip1,
    Ip2,
    Ip3,
}

impl Organization {
    pub const ALL: [Organization; 4] = [
        Organization::Ooo,
        Organization::Ip1,
        Organization::Ip2,
        Organization::Ip3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Organization::Ooo => "OOO",
            Organization::Ip1 => "IP1",
            Organization::Ip2 => "IP2",
            Organization::Ip3 => "IP3",
        }
    }

    /// Parse either the stored code or the label the sources use
    /// ("ООО", "ИП1", ...).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "OOO" | "ООО" => Some(Organization::Ooo),
            "IP1" | "ИП1" => Some(Organization::Ip1),
            "IP2" | "ИП2" => Some(Organization::Ip2),
            "IP3" | "ИП3" => Some(Organization::Ip3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Organization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_accepts_source_labels() {
        assert_eq!(Organization::from_str("ООО"), Some(Organization::Ooo));
        assert_eq!(Organization::from_str("ИП2"), Some(Organization::Ip2));
        assert_eq!(Organization::from_str(" ip3 "), Some(Organization::Ip3));
        assert_eq!(Organization::from_str("Неизвестно"), None);
    }

    #[test]
    fn test_as_str_round_trips() {
        for org in Organization::ALL {
            assert_eq!(Organization::from_str(org.as_str()), Some(org));
        }
    }
}
