// Pack state model: in-memory representation of a sticker pack and the
// structural rules for the room-state JSON it is stored as. Pure data and
// invariants; no I/O happens here.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Room-state event type under which sticker packs live (MSC2545, the
/// `im.ponies` pack format understood by Cinny and friends). The state key is
/// the pack name.
pub const PACK_EVENT_TYPE: &str = "im.ponies.room_emotes";

/// How clients may use an image of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickerUsage {
    Sticker,
    Emoticon,
}

impl StickerUsage {
    /// Wire name of the usage tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sticker => "sticker",
            Self::Emoticon => "emoticon",
        }
    }

    /// Parse a wire tag. Unknown tags yield `None` and are ignored by the
    /// pack parser rather than invalidating the whole object: another
    /// client's extension tag must not make us treat the pack as missing.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sticker" => Some(Self::Sticker),
            "emoticon" => Some(Self::Emoticon),
            _ => None,
        }
    }
}

/// One image of a pack. Field names mirror the wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerEntry {
    /// Content reference of the uploaded media (`mxc://authority/id`).
    pub url: String,
    /// Usage tags; empty means the pack leaves it to the client.
    pub usage: Vec<StickerUsage>,
}

/// A sticker pack: a display name plus an ordered `shortcode -> entry`
/// mapping. Insertion order is upload order and survives serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    display_name: String,
    images: Vec<(String, StickerEntry)>,
}

impl Pack {
    /// New empty pack. Used when a requested pack does not exist remotely.
    pub fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            images: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn contains(&self, shortcode: &str) -> bool {
        self.images.iter().any(|(key, _)| key == shortcode)
    }

    /// Entries in insertion order.
    pub fn images(&self) -> impl Iterator<Item = (&str, &StickerEntry)> {
        self.images
            .iter()
            .map(|(shortcode, entry)| (shortcode.as_str(), entry))
    }

    /// Append an entry under `shortcode`.
    ///
    /// Fails with [`Error::AlreadyExists`] if the shortcode is taken; the
    /// existing entry is never overwritten.
    pub fn add_entry(&mut self, shortcode: &str, url: &str, usage: &[StickerUsage]) -> Result<()> {
        if self.contains(shortcode) {
            return Err(Error::AlreadyExists(shortcode.to_string()));
        }
        self.images.push((
            shortcode.to_string(),
            StickerEntry {
                url: url.to_string(),
                usage: usage.to_vec(),
            },
        ));
        Ok(())
    }

    /// Serialize to the room-state wire shape:
    /// `{"pack": {"display_name": ..}, "images": {shortcode: {"url": ..,
    /// "usage": [..]?}}}`. Every persist replaces the whole remote value.
    pub fn to_state_value(&self) -> Value {
        let mut images = Map::new();
        for (shortcode, entry) in &self.images {
            let mut image = Map::new();
            image.insert("url".to_string(), Value::String(entry.url.clone()));
            if !entry.usage.is_empty() {
                let tags = entry
                    .usage
                    .iter()
                    .map(|tag| Value::String(tag.as_str().to_string()))
                    .collect();
                image.insert("usage".to_string(), Value::Array(tags));
            }
            images.insert(shortcode.clone(), Value::Object(image));
        }

        let mut meta = Map::new();
        meta.insert(
            "display_name".to_string(),
            Value::String(self.display_name.clone()),
        );

        let mut root = Map::new();
        root.insert("pack".to_string(), Value::Object(meta));
        root.insert("images".to_string(), Value::Object(images));
        Value::Object(root)
    }

    /// Parse a remote state value.
    ///
    /// Returns `None` when the object is not a structurally complete pack: a
    /// missing display name, a missing images mapping, or an image without a
    /// `url` all make the whole value count as nonexistent. There is no such
    /// thing as a partially valid pack.
    pub fn from_state_value(value: &Value) -> Option<Self> {
        let root = value.as_object()?;
        let display_name = root
            .get("pack")?
            .as_object()?
            .get("display_name")?
            .as_str()?;
        let raw_images = root.get("images")?.as_object()?;

        let mut images = Vec::with_capacity(raw_images.len());
        for (shortcode, raw) in raw_images {
            let url = raw.get("url")?.as_str()?;
            let usage = match raw.get("usage") {
                Some(Value::Array(tags)) => tags
                    .iter()
                    .filter_map(|tag| tag.as_str().and_then(StickerUsage::parse))
                    .collect(),
                _ => Vec::new(),
            };
            images.push((
                shortcode.clone(),
                StickerEntry {
                    url: url.to_string(),
                    usage,
                },
            ));
        }

        Some(Self {
            display_name: display_name.to_string(),
            images,
        })
    }
}

/// Structural check used by the synchronizer: a remote value that does not
/// parse as a pack is treated the same as no value at all.
pub fn is_valid_remote_shape(value: &Value) -> bool {
    Pack::from_state_value(value).is_some()
}

/// Split a content reference into `(authority, media id)`.
///
/// The reference must be `mxc://` followed by exactly two non-empty path
/// segments; anything else fails with [`Error::MalformedContentRef`]. Every
/// media lifecycle call parses its reference first, so a corrupted pack entry
/// surfaces here instead of as a confusing server error.
pub fn parse_content_ref(content_ref: &str) -> Result<(String, String)> {
    let malformed = || Error::MalformedContentRef(content_ref.to_string());
    let rest = content_ref.strip_prefix("mxc://").ok_or_else(malformed)?;

    let mut segments = rest.split('/');
    let authority = segments.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    let media_id = segments.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    if segments.next().is_some() {
        return Err(malformed());
    }
    Ok((authority.to_string(), media_id.to_string()))
}
