//! Family payloads, typed patches, and the diff/apply/merge algebra.
//!
//! A payload is the family-specific portion of a record: the fields that
//! travel to and from the remote store. Each payload type has a matching
//! *patch* type describing a partial update. Patches carry only the fields
//! accepted by the remote write schema; server-assigned fields have no
//! patch slot, so they can never leak into a write.

use crate::state::RecordFamily;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A partial update for one payload type.
pub trait Patch:
    Clone + fmt::Debug + Default + PartialEq + Serialize + Send + Sync + 'static
{
    /// Returns true when the patch carries no fields at all.
    ///
    /// An empty patch is the no-op signal: a push can skip the network
    /// call entirely and just flip the record back to synced.
    fn is_empty(&self) -> bool;
}

/// The family-specific record payload.
///
/// Implementations provide the diff/apply/merge algebra the sync engine is
/// built on. All three operations are pure with respect to external state.
pub trait Payload:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The typed partial-update shape accepted by the remote write schema.
    type Patch: Patch;

    /// The family this payload belongs to.
    const FAMILY: RecordFamily;

    /// Computes the fields of `self` that differ from `base`.
    ///
    /// With no base (first sync), returns the full writable payload.
    /// Identity keys travel beside the patch in the remote call, never
    /// inside it, so an empty patch always means "nothing to send".
    fn diff_from(&self, base: Option<&Self>) -> Self::Patch;

    /// Applies a patch in place. Fields absent from the patch are untouched.
    fn apply(&mut self, patch: &Self::Patch);

    /// Field-level union of `self` (local) onto `remote`.
    ///
    /// Local fields take precedence; keys present only on the remote side
    /// survive (recursively for the tags map). Server-assigned fields are
    /// always taken from the remote copy. When both sides changed the same
    /// field the local value wins: resolution is user-initiated and the
    /// user is looking at the local copy when they choose to merge.
    fn merged_onto(&self, remote: &Self) -> Self;
}

/// Accepts either the structured tag map or the legacy array-of-tags wire
/// shape, normalizing the latter to a map with empty values.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TagShape {
        Structured(BTreeMap<String, String>),
        Legacy(Vec<String>),
    }

    Ok(match TagShape::deserialize(deserializer)? {
        TagShape::Structured(map) => map,
        TagShape::Legacy(keys) => keys.into_iter().map(|k| (k, String::new())).collect(),
    })
}

/// Payload of an entity record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPayload {
    /// Display name.
    pub name: String,
    /// Free-form category labels.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Structured tags. Historical records carried a bare array of tag
    /// names; that shape is normalized to a map on deserialize.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,
    /// Server-assigned URL key. Not writable; has no patch slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Partial update for an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityPatch {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Replacement category labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Replacement notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Replacement tag map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Patch for EntityPatch {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.categories.is_none()
            && self.notes.is_none()
            && self.tags.is_none()
    }
}

impl Payload for EntityPayload {
    type Patch = EntityPatch;

    const FAMILY: RecordFamily = RecordFamily::Entity;

    fn diff_from(&self, base: Option<&Self>) -> EntityPatch {
        let Some(base) = base else {
            return EntityPatch {
                name: Some(self.name.clone()),
                categories: Some(self.categories.clone()),
                notes: Some(self.notes.clone()),
                tags: Some(self.tags.clone()),
            };
        };

        let mut patch = EntityPatch::default();
        if self.name != base.name {
            patch.name = Some(self.name.clone());
        }
        if self.categories != base.categories {
            patch.categories = Some(self.categories.clone());
        }
        if self.notes != base.notes {
            patch.notes = Some(self.notes.clone());
        }
        if self.tags != base.tags {
            patch.tags = Some(self.tags.clone());
        }
        patch
    }

    fn apply(&mut self, patch: &EntityPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(categories) = &patch.categories {
            self.categories = categories.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }

    fn merged_onto(&self, remote: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in &remote.tags {
            merged
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        merged.slug = remote.slug.clone();
        merged
    }
}

/// Payload of a curation record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationPayload {
    /// Title of the curation.
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// Logical id of the referenced entity. `None` is the valid
    /// "unlinked" business state, distinct from a dangling reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<String>,
    /// Structured tags, with the same legacy-array normalization as
    /// entities.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,
}

/// Partial update for a curation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurationPatch {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Linkage change. Outer `None` leaves the link untouched;
    /// `Some(None)` clears it; `Some(Some(id))` points it at an entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<Option<String>>,
    /// Replacement tag map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Patch for CurationPatch {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.entity_ref.is_none()
            && self.tags.is_none()
    }
}

impl Payload for CurationPayload {
    type Patch = CurationPatch;

    const FAMILY: RecordFamily = RecordFamily::Curation;

    fn diff_from(&self, base: Option<&Self>) -> CurationPatch {
        let Some(base) = base else {
            return CurationPatch {
                title: Some(self.title.clone()),
                body: Some(self.body.clone()),
                // A first sync has no link to clear, so an unlinked
                // curation simply omits the field.
                entity_ref: self.entity_ref.clone().map(Some),
                tags: Some(self.tags.clone()),
            };
        };

        let mut patch = CurationPatch::default();
        if self.title != base.title {
            patch.title = Some(self.title.clone());
        }
        if self.body != base.body {
            patch.body = Some(self.body.clone());
        }
        if self.entity_ref != base.entity_ref {
            patch.entity_ref = Some(self.entity_ref.clone());
        }
        if self.tags != base.tags {
            patch.tags = Some(self.tags.clone());
        }
        patch
    }

    fn apply(&mut self, patch: &CurationPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(body) = &patch.body {
            self.body = body.clone();
        }
        if let Some(link) = &patch.entity_ref {
            self.entity_ref = link.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }

    fn merged_onto(&self, remote: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in &remote.tags {
            merged
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if merged.entity_ref.is_none() {
            merged.entity_ref = remote.entity_ref.clone();
        }
        merged
    }
}
