use std::{fmt, str::FromStr};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use thiserror::Error;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(SessionId);
string_newtype!(CommitSha);
string_newtype!(BranchName);

/// OAuth access token. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub login: String,
    pub avatar_url: String,
}

/// An authenticated session: the token plus the identity it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: AccessToken,
    pub login: String,
    pub avatar_url: String,
}

impl Session {
    pub fn identity(&self) -> Identity {
        Identity {
            login: self.login.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("repository must be given as owner/repo, got {0:?}")]
pub struct InvalidRepoSlug(pub String);

/// `owner/repo` coordinates of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = InvalidRepoSlug;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name))
            }
            _ => Err(InvalidRepoSlug(raw.to_string())),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioPin {
    pub pin: String,
    pub function: String,
}

/// Pin → function assignments, kept in the order they were submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioPinMap(Vec<GpioPin>);

impl GpioPinMap {
    /// Returns `None` if `pin` is already assigned.
    pub fn insert(&mut self, pin: impl Into<String>, function: impl Into<String>) -> Option<()> {
        let pin = pin.into();
        if self.0.iter().any(|existing| existing.pin == pin) {
            return None;
        }
        self.0.push(GpioPin {
            pin,
            function: function.into(),
        });
        Some(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &GpioPin> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for GpioPinMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in &self.0 {
            map.serialize_entry(&entry.pin, &entry.function)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GpioPinMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PinMapVisitor;

        impl<'de> Visitor<'de> for PinMapVisitor {
            type Value = GpioPinMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping pin names to function strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                use serde::de::Error as _;

                let mut pins = GpioPinMap::default();
                while let Some((pin, function)) = access.next_entry::<String, String>()? {
                    let pin = pin.trim().to_string();
                    let function = function.trim().to_string();
                    if pin.is_empty() {
                        return Err(A::Error::custom("pin name must not be empty"));
                    }
                    if function.is_empty() {
                        return Err(A::Error::custom(format!(
                            "pin {pin} has an empty function"
                        )));
                    }
                    if pins.insert(pin.clone(), function).is_none() {
                        return Err(A::Error::custom(format!("pin {pin} is assigned twice")));
                    }
                }
                Ok(pins)
            }
        }

        deserializer.deserialize_map(PinMapVisitor)
    }
}

/// Tags with duplicates removed, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn parse_comma_separated(raw: &str) -> Self {
        raw.split(',').map(str::to_string).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn joined(&self) -> String {
        self.0.join(", ")
    }
}

impl FromIterator<String> for TagSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut tags: Vec<String> = Vec::new();
        for tag in iter {
            let tag = tag.trim();
            if tag.is_empty() || tags.iter().any(|seen| seen == tag) {
                continue;
            }
            tags.push(tag.to_string());
        }
        Self(tags)
    }
}

impl From<Vec<String>> for TagSet {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(value: TagSet) -> Self {
        value.0
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// Raw submission fields as they arrive from the form. Nothing is checked yet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionForm {
    pub slug: Option<String>,
    pub board_name: Option<String>,
    pub description: Option<String>,
    pub chip_type: Option<String>,
    pub product_link: Option<String>,
    pub gpio_pins: Option<String>,
    pub tags: Option<String>,
    pub yaml_config: Option<String>,
    #[serde(skip)]
    pub images: Vec<ImageUpload>,
}

/// A submission whose required fields are all present and well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSubmission {
    pub slug: String,
    pub board_name: String,
    pub description: String,
    pub chip_type: String,
    pub product_link: Option<String>,
    pub gpio_pins: GpioPinMap,
    pub tags: TagSet,
    pub yaml_config: String,
    pub images: Vec<ImageUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: BranchName,
    pub base_sha: CommitSha,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkHandle {
    pub repo: RepoSlug,
    pub html_url: Option<String>,
}

/// One file write planned for the submission branch.
#[derive(Clone, PartialEq, Eq)]
pub struct CommittedFile {
    pub path: String,
    pub content: Vec<u8>,
    pub message: String,
}

impl fmt::Debug for CommittedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedFile")
            .field("path", &self.path)
            .field("size_bytes", &self.content.len())
            .field("message", &self.message)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub url: String,
}
