//! Descriptors, store entries and stack frames.
//!
//! A descriptor identifies one build of an application. Both kinds of descriptors share the
//! `(app, platform, version)` triple in [`AppDescriptor`], which acts as the retention group for
//! the entries stored under them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The mobile platform a build targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Platform`].
#[derive(Debug, thiserror::Error)]
#[error("unknown platform `{0}`, expected `android` or `ios`")]
pub struct ParsePlatformError(String);

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(ParsePlatformError(other.to_owned())),
        }
    }
}

/// Identifies a logical line of builds of an application.
///
/// This is the retention group key: caps on the number of stored source maps apply per
/// `AppDescriptor`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub app: String,
    pub platform: Platform,
    pub version: String,
}

impl AppDescriptor {
    pub fn new(app: impl Into<String>, platform: Platform, version: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            platform,
            version: version.into(),
        }
    }
}

impl fmt::Display for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.platform, self.version)
    }
}

/// Identifies a native container build.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDescriptor {
    #[serde(flatten)]
    pub app_descriptor: AppDescriptor,
    pub container_version: String,
}

impl ContainerDescriptor {
    pub fn new(app_descriptor: AppDescriptor, container_version: impl Into<String>) -> Self {
        Self {
            app_descriptor,
            container_version: container_version.into(),
        }
    }
}

impl fmt::Display for ContainerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_descriptor, self.container_version)
    }
}

/// Identifies an over-the-air code push release.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePushDescriptor {
    #[serde(flatten)]
    pub app_descriptor: AppDescriptor,
    pub deployment_name: String,
    pub label: String,
}

impl CodePushDescriptor {
    pub fn new(
        app_descriptor: AppDescriptor,
        deployment_name: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            app_descriptor,
            deployment_name: deployment_name.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for CodePushDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app_descriptor, self.deployment_name, self.label
        )
    }
}

/// The kind of build an entry belongs to.
///
/// Each kind is stored in its own collection and has its own retention limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Container,
    CodePush,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Container => "container",
            EntryKind::CodePush => "codepush",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Container => f.write_str("Container"),
            EntryKind::CodePush => f.write_str("CodePush"),
        }
    }
}

/// A build descriptor that source maps can be stored under.
///
/// Implementors select the collection of the [`Snapshot`] their entries live in, which lets the
/// entry store expose one generic contract for both kinds.
pub trait Descriptor:
    Clone + fmt::Debug + fmt::Display + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind of entries stored under this descriptor.
    const KIND: EntryKind;

    /// The retention group this descriptor belongs to.
    fn app_descriptor(&self) -> &AppDescriptor;

    /// The entries of this kind, in insertion order.
    fn entries(snapshot: &Snapshot) -> &[Entry<Self>];

    fn entries_mut(snapshot: &mut Snapshot) -> &mut Vec<Entry<Self>>;
}

impl Descriptor for ContainerDescriptor {
    const KIND: EntryKind = EntryKind::Container;

    fn app_descriptor(&self) -> &AppDescriptor {
        &self.app_descriptor
    }

    fn entries(snapshot: &Snapshot) -> &[Entry<Self>] {
        &snapshot.container_source_maps
    }

    fn entries_mut(snapshot: &mut Snapshot) -> &mut Vec<Entry<Self>> {
        &mut snapshot.container_source_maps
    }
}

impl Descriptor for CodePushDescriptor {
    const KIND: EntryKind = EntryKind::CodePush;

    fn app_descriptor(&self) -> &AppDescriptor {
        &self.app_descriptor
    }

    fn entries(snapshot: &Snapshot) -> &[Entry<Self>] {
        &snapshot.code_push_source_maps
    }

    fn entries_mut(snapshot: &mut Snapshot) -> &mut Vec<Entry<Self>> {
        &mut snapshot.code_push_source_maps
    }
}

/// Identifier of a stored source map file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Generates a new random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlobId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binds a descriptor to the source map file uploaded for it.
///
/// Entries are never modified after creation. The field names of the serialized form are those
/// of the on-disk database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<D> {
    pub descriptor: D,
    #[serde(rename = "sourcemap")]
    pub blob_id: BlobId,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub inserted_at: DateTime<Utc>,
}

impl<D> Entry<D> {
    /// Creates an entry inserted now.
    ///
    /// The timestamp is truncated to milliseconds, the precision it is persisted with, so that
    /// an entry compares equal to itself after a reload.
    pub fn new(descriptor: D, blob_id: BlobId) -> Self {
        Self {
            descriptor,
            blob_id,
            inserted_at: Utc::now().trunc_subsecs(3),
        }
    }
}

/// The complete state of the entry store, as persisted to disk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Snapshot {
    pub code_push_source_maps: Vec<Entry<CodePushDescriptor>>,
    pub container_source_maps: Vec<Entry<ContainerDescriptor>>,
}

/// A single frame of a JavaScript stack trace.
///
/// `line` and `column` are absent for frames without a known location, `file` is only set by
/// symbolication.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub method_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl StackFrame {
    pub fn new(method_name: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        Self {
            method_name: method_name.into(),
            line,
            column,
            file: None,
        }
    }
}
