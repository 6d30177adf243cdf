use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProfileError;

/// Social network a profile payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Facebook,
    GooglePlus,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Facebook => "facebook",
            Network::GooglePlus => "googleplus",
        }
    }

    pub(crate) fn table(self) -> &'static NetworkTable {
        match self {
            Network::Facebook => &FACEBOOK,
            Network::GooglePlus => &GOOGLE_PLUS,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ProfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "facebook" => Ok(Network::Facebook),
            "googleplus" | "google_plus" | "google+" => Ok(Network::GooglePlus),
            other => Err(ProfileError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Shape of a vendor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Nested object; only the listed sub-fields are read.
    Object(&'static [&'static str]),
    List,
}

/// Static description of what a network exposes and where it lands on a lead.
#[derive(Debug)]
pub struct NetworkTable {
    pub available: &'static [(&'static str, FieldKind)],
    pub mapping: &'static [(&'static str, &'static str)],
    /// Unmapped text fields keep their vendor name instead of being blanked.
    pub keep_unmapped: bool,
}

impl NetworkTable {
    pub fn lead_field(&self, vendor_field: &str) -> Option<&'static str> {
        self.mapping
            .iter()
            .find(|(vendor, _)| *vendor == vendor_field)
            .map(|(_, lead)| *lead)
    }
}

static FACEBOOK: NetworkTable = NetworkTable {
    available: &[
        ("first_name", FieldKind::Text),
        ("last_name", FieldKind::Text),
        ("name", FieldKind::Text),
        ("gender", FieldKind::Text),
        ("locale", FieldKind::Text),
        ("email", FieldKind::Text),
        ("link", FieldKind::List),
    ],
    mapping: &[
        ("first_name", "firstname"),
        ("last_name", "lastname"),
        ("name", "name"),
        ("gender", "gender"),
        ("locale", "locale"),
        ("email", "email"),
        ("link", "facebook"),
    ],
    keep_unmapped: false,
};

static GOOGLE_PLUS: NetworkTable = NetworkTable {
    available: &[
        ("profileHandle", FieldKind::Text),
        ("nickname", FieldKind::Text),
        ("occupation", FieldKind::Text),
        ("skills", FieldKind::Text),
        ("birthday", FieldKind::Text),
        ("gender", FieldKind::Text),
        ("url", FieldKind::Text),
        ("urls", FieldKind::List),
        ("displayName", FieldKind::Text),
        (
            "name",
            FieldKind::Object(&[
                "familyName",
                "givenName",
                "middleName",
                "honorificPrefix",
                "honorificSuffix",
            ]),
        ),
        ("emails", FieldKind::List),
        ("tagline", FieldKind::Text),
        ("braggingRights", FieldKind::Text),
        ("aboutMe", FieldKind::Text),
        ("currentLocation", FieldKind::Text),
        ("relationshipStatus", FieldKind::Text),
        ("organizations", FieldKind::List),
        ("placesLived", FieldKind::List),
        ("language", FieldKind::Text),
        ("ageRange", FieldKind::Object(&["min", "max"])),
    ],
    mapping: &[
        ("occupation", "position"),
        ("url", "googleplus"),
        ("givenName", "firstname"),
        ("familyName", "lastname"),
        ("locale", "locale"),
        ("account", "email"),
        ("other", "website"),
    ],
    keep_unmapped: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_network_aliases() {
        assert_eq!("Facebook".parse::<Network>().unwrap(), Network::Facebook);
        assert_eq!("google+".parse::<Network>().unwrap(), Network::GooglePlus);
        assert!(matches!(
            "myspace".parse::<Network>(),
            Err(ProfileError::UnknownNetwork(name)) if name == "myspace"
        ));
    }

    #[test]
    fn lead_field_resolves_through_mapping() {
        assert_eq!(Network::GooglePlus.table().lead_field("givenName"), Some("firstname"));
        assert_eq!(Network::GooglePlus.table().lead_field("tagline"), None);
        assert_eq!(Network::Facebook.table().lead_field("link"), Some("facebook"));
    }
}
