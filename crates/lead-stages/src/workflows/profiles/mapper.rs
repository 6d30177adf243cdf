//! Translates a social network profile payload into lead field values.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::tables::{FieldKind, Network, NetworkTable};
use super::ProfileError;

const PRIMARY_SUFFIX: &str = " (primary)";

/// Profile URL patterns per service; the first capture group is the handle.
struct SocialPattern {
    service: &'static str,
    regexes: Vec<Regex>,
}

fn social_patterns() -> &'static [SocialPattern] {
    static PATTERNS: OnceLock<Vec<SocialPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: Vec<(&'static str, Vec<&str>)> = vec![
            ("twitter", vec![r"twitter\.com/(.*?)(?:$|/)"]),
            (
                "facebook",
                vec![r"facebook\.com/(.*?)(?:$|/)", r"fb\.me/(.*?)(?:$|/)"],
            ),
            ("linkedin", vec![r"linkedin\.com/in/(.*?)(?:$|/)"]),
            ("instagram", vec![r"instagram\.com/(.*?)(?:$|/)"]),
            ("foursquare", vec![r"foursquare\.com/(.*?)(?:$|/)"]),
            (
                "youtube",
                vec![
                    r"youtube\.com/user/(.*?)(?:$|/)",
                    r"youtu\.be/user/(.*?)(?:$|/)",
                ],
            ),
            ("flickr", vec![r"flickr\.com/photos/(.*?)(?:$|/)"]),
            ("skype", vec![r"skype:(.*?)(?:$|\?)"]),
            ("google", vec![r"plus\.google\.com/(.*?)(?:$|/)"]),
        ];

        table
            .into_iter()
            .map(|(service, patterns)| SocialPattern {
                service,
                regexes: patterns
                    .into_iter()
                    .map(|pat| Regex::new(pat).expect("Invalid social profile regex"))
                    .collect(),
            })
            .collect()
    })
}

/// First service whose pattern yields a non-empty handle for `url`.
pub fn social_handle(url: &str) -> Option<(&'static str, String)> {
    social_patterns().iter().find_map(|pattern| {
        pattern.regexes.iter().find_map(|regex| {
            regex
                .captures(url)
                .and_then(|captures| captures.get(1))
                .map(|handle| handle.as_str())
                .filter(|handle| !handle.is_empty())
                .map(|handle| (pattern.service, handle.to_string()))
        })
    })
}

pub struct ProfileMapper {
    network: Network,
    table: &'static NetworkTable,
}

impl ProfileMapper {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            table: network.table(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Map every available vendor field. Absent fields come back as empty
    /// strings under their vendor name.
    pub fn match_up(&self, profile: &Value) -> Result<BTreeMap<String, String>, ProfileError> {
        let profile = profile.as_object().ok_or(ProfileError::NotAnObject)?;
        let mut info = BTreeMap::new();

        for (field, kind) in self.table.available {
            let Some(value) = present(profile, field) else {
                info.insert(field.to_string(), String::new());
                continue;
            };

            match kind {
                FieldKind::Text => match self.text_key(field) {
                    Some(key) => {
                        info.insert(key, scalar(value));
                    }
                    None => {
                        info.insert(field.to_string(), String::new());
                    }
                },
                FieldKind::Object(sub_fields) => {
                    self.match_object(field, sub_fields, value, &mut info);
                }
                FieldKind::List => self.match_list(field, value, &mut info),
            }
        }

        if self.network == Network::Facebook {
            facebook_identity(profile, &mut info);
        }

        Ok(info)
    }

    fn text_key(&self, field: &str) -> Option<String> {
        match self.table.lead_field(field) {
            Some(key) => Some(key.to_string()),
            None if self.table.keep_unmapped => Some(field.to_string()),
            None => None,
        }
    }

    fn key_or(&self, vendor_field: &str, fallback: String) -> String {
        self.table
            .lead_field(vendor_field)
            .map(str::to_string)
            .unwrap_or(fallback)
    }

    fn match_object(
        &self,
        field: &str,
        sub_fields: &[&str],
        value: &Value,
        info: &mut BTreeMap<String, String>,
    ) {
        let Some(object) = value.as_object() else {
            return;
        };
        for sub in sub_fields {
            let Some(sub_value) = present(object, sub) else {
                continue;
            };
            let name = if sub.to_lowercase().contains(&field.to_lowercase()) {
                sub.to_string()
            } else {
                format!("{sub}{}", upper_first(field))
            };
            info.insert(self.key_or(sub, name), scalar(sub_value));
        }
    }

    fn match_list(&self, field: &str, value: &Value, info: &mut BTreeMap<String, String>) {
        match field {
            "link" => {
                let key = self.key_or(field, field.to_string());
                info.insert(key, format!("{} ({})", self.network, scalar(value)));
            }
            "urls" => {
                for entry in entries(value) {
                    let url = text(entry, "value");
                    if let Some((service, handle)) = social_handle(&url) {
                        info.insert(format!("{service}ProfileHandle"), handle);
                        continue;
                    }

                    let url_type = text(entry, "type");
                    let key = self.key_or(&url_type, format!("{url_type}Urls"));
                    let rendered = format!("{} ({})", text(entry, "label"), url);
                    info.entry(key)
                        .and_modify(|existing| {
                            existing.push_str(", ");
                            existing.push_str(&rendered);
                        })
                        .or_insert(rendered);
                }
            }
            "organizations" => {
                let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
                for entry in entries(value) {
                    let Some(organization) = describe_organization(entry) else {
                        continue;
                    };
                    let org_type = text(entry, "type");
                    match grouped.iter_mut().find(|(ty, _)| *ty == org_type) {
                        Some((_, orgs)) => orgs.push(organization),
                        None => grouped.push((org_type, vec![organization])),
                    }
                }
                for (org_type, orgs) in grouped {
                    info.insert(self.key_or(&org_type, org_type.clone()), orgs.join("; "));
                }
            }
            "placesLived" => {
                let places: Vec<String> = entries(value)
                    .map(|entry| {
                        let mut place = text(entry, "value");
                        if entry.get("primary").is_some_and(truthy) {
                            place.push_str(PRIMARY_SUFFIX);
                        }
                        place
                    })
                    .collect();
                info.insert(self.key_or(field, field.to_string()), places.join("; "));
            }
            "emails" => {
                for entry in entries(value) {
                    let email_type = text(entry, "type");
                    info.insert(self.key_or(&email_type, email_type.clone()), text(entry, "value"));
                }
            }
            _ => {}
        }
    }
}

const FACEBOOK_PROFILE_PREFIX: &str = "https://www.facebook.com/";

/// `profileHandle` prefers the username, then the profile link path, then the
/// numeric id. `profileImage` needs the id.
fn facebook_identity(profile: &Map<String, Value>, info: &mut BTreeMap<String, String>) {
    let id = present(profile, "id").map(scalar).filter(|id| !id.is_empty());
    let handle = present(profile, "username")
        .map(scalar)
        .or_else(|| {
            present(profile, "link")
                .map(scalar)
                .map(|link| link.replace(FACEBOOK_PROFILE_PREFIX, ""))
        })
        .or_else(|| id.clone());

    if let Some(handle) = handle {
        info.insert("profileHandle".to_string(), handle);
    }
    if let Some(id) = id {
        info.insert(
            "profileImage".to_string(),
            format!("https://graph.facebook.com/{id}/picture?type=large"),
        );
    }
}

fn describe_organization(entry: &Value) -> Option<String> {
    let name = text(entry, "name");
    let title = text(entry, "title");
    let mut organization = match (name.is_empty(), title.is_empty()) {
        (false, false) => format!("{name}, {title}"),
        (false, true) => name,
        (true, false) => title,
        (true, true) => return None,
    };

    let start = text(entry, "startDate");
    let end = text(entry, "endDate");
    match (start.is_empty(), end.is_empty()) {
        (false, false) => organization.push_str(&format!(" {start} - {end}")),
        (false, true) => organization.push_str(&format!(" {start}")),
        (true, false) => organization.push_str(&format!(" {end}")),
        (true, true) => {}
    }

    if entry.get("primary").is_some_and(truthy) {
        organization.push_str(PRIMARY_SUFFIX);
    }
    Some(organization)
}

fn present<'v>(object: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn entries(value: &Value) -> impl Iterator<Item = &Value> {
    value.as_array().into_iter().flatten()
}

fn text(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .filter(|value| !value.is_null())
        .map(scalar)
        .unwrap_or_default()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
