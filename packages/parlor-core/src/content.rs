//! Message payloads.
//!
//! A message carries exactly one of four payload kinds. [`prepare`] is the
//! single place payloads are normalized and checked; the message store calls
//! it before every insert.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum text length, in characters, after trimming.
pub const MAX_TEXT_CHARS: usize = 1000;
/// Maximum alt-text length, in characters.
pub const MAX_ALT_CHARS: usize = 300;
/// Maximum location name length, in characters.
pub const MAX_LOCATION_NAME_CHARS: usize = 200;

/// A resolved media reference produced by the upload service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// Message payload, tagged by `messageType` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum MessageContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { image: ImageRef },
    #[serde(rename = "post")]
    SharedPost {
        #[serde(rename = "sharedPostId")]
        shared_post_id: String,
    },
    #[serde(rename = "location")]
    Location { location: GeoLocation },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// Value stored in the `message_type` column.
    pub fn message_type(&self) -> &'static str {
        match self {
            MessageContent::Text { .. } => "text",
            MessageContent::Image { .. } => "image",
            MessageContent::SharedPost { .. } => "post",
            MessageContent::Location { .. } => "location",
        }
    }

    /// Post id this payload points at, if any.
    pub fn shared_post_id(&self) -> Option<&str> {
        match self {
            MessageContent::SharedPost { shared_post_id } => Some(shared_post_id),
            _ => None,
        }
    }
}

/// Trim and validate a payload.
///
/// Pure: post ids are only checked for shape here. Whether the post exists is
/// the post directory's call, made by the service before the write.
pub fn prepare(content: MessageContent) -> Result<MessageContent> {
    match content {
        MessageContent::Text { text } => {
            let text = text.trim();
            if text.is_empty() {
                return Err(Error::InvalidContent("text must not be empty".into()));
            }
            if text.chars().count() > MAX_TEXT_CHARS {
                return Err(Error::InvalidContent(format!(
                    "text must be at most {} characters",
                    MAX_TEXT_CHARS
                )));
            }
            Ok(MessageContent::Text { text: text.to_string() })
        }
        MessageContent::Image { image } => {
            let url = image.url.trim();
            if url.is_empty() {
                return Err(Error::InvalidContent("image url must not be empty".into()));
            }
            let alt = image
                .alt
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            if alt.as_ref().is_some_and(|a| a.chars().count() > MAX_ALT_CHARS) {
                return Err(Error::InvalidContent(format!(
                    "image alt text must be at most {} characters",
                    MAX_ALT_CHARS
                )));
            }
            Ok(MessageContent::Image {
                image: ImageRef { url: url.to_string(), alt },
            })
        }
        MessageContent::SharedPost { shared_post_id } => {
            let id = shared_post_id.trim();
            if id.is_empty() {
                return Err(Error::InvalidContent("shared post id must not be empty".into()));
            }
            Ok(MessageContent::SharedPost { shared_post_id: id.to_string() })
        }
        MessageContent::Location { location } => {
            let name = location.name.trim();
            if name.is_empty() {
                return Err(Error::InvalidContent("location name must not be empty".into()));
            }
            if name.chars().count() > MAX_LOCATION_NAME_CHARS {
                return Err(Error::InvalidContent(format!(
                    "location name must be at most {} characters",
                    MAX_LOCATION_NAME_CHARS
                )));
            }
            if !location.lat.is_finite() || !(-90.0..=90.0).contains(&location.lat) {
                return Err(Error::InvalidContent("latitude must be within -90..90".into()));
            }
            if !location.lng.is_finite() || !(-180.0..=180.0).contains(&location.lng) {
                return Err(Error::InvalidContent("longitude must be within -180..180".into()));
            }
            Ok(MessageContent::Location {
                location: GeoLocation { name: name.to_string(), ..location },
            })
        }
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Column values for the payload part of a `messages` row.
#[derive(Debug, Default)]
pub(crate) struct ContentColumns<'a> {
    pub text: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub image_alt: Option<&'a str>,
    pub shared_post_id: Option<&'a str>,
    pub location_name: Option<&'a str>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
}

impl MessageContent {
    pub(crate) fn columns(&self) -> ContentColumns<'_> {
        match self {
            MessageContent::Text { text } => ContentColumns {
                text: Some(text),
                ..Default::default()
            },
            MessageContent::Image { image } => ContentColumns {
                image_url: Some(&image.url),
                image_alt: image.alt.as_deref(),
                ..Default::default()
            },
            MessageContent::SharedPost { shared_post_id } => ContentColumns {
                shared_post_id: Some(shared_post_id),
                ..Default::default()
            },
            MessageContent::Location { location } => ContentColumns {
                location_name: Some(&location.name),
                location_lat: Some(location.lat),
                location_lng: Some(location.lng),
                ..Default::default()
            },
        }
    }

    /// Rebuild a payload from its stored columns.
    pub(crate) fn from_columns(message_type: &str, cols: ContentColumns<'_>) -> Result<Self> {
        let missing = |what: &str| {
            Error::StorageCorrupted(format!("{} message without {}", message_type, what))
        };
        match message_type {
            "text" => Ok(MessageContent::Text {
                text: cols.text.ok_or_else(|| missing("text"))?.to_string(),
            }),
            "image" => Ok(MessageContent::Image {
                image: ImageRef {
                    url: cols.image_url.ok_or_else(|| missing("image_url"))?.to_string(),
                    alt: cols.image_alt.map(str::to_string),
                },
            }),
            "post" => Ok(MessageContent::SharedPost {
                shared_post_id: cols
                    .shared_post_id
                    .ok_or_else(|| missing("shared_post_id"))?
                    .to_string(),
            }),
            "location" => Ok(MessageContent::Location {
                location: GeoLocation {
                    name: cols.location_name.ok_or_else(|| missing("location_name"))?.to_string(),
                    lat: cols.location_lat.ok_or_else(|| missing("location_lat"))?,
                    lng: cols.location_lng.ok_or_else(|| missing("location_lng"))?,
                },
            }),
            other => Err(Error::StorageCorrupted(format!("unknown message type {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(name: &str, lat: f64, lng: f64) -> MessageContent {
        MessageContent::Location {
            location: GeoLocation { name: name.into(), lat, lng },
        }
    }

    #[test]
    fn test_text_is_trimmed() {
        let prepared = prepare(MessageContent::text("  hi there \n")).unwrap();
        assert_eq!(prepared, MessageContent::text("hi there"));
    }

    #[test]
    fn test_text_bounds() {
        assert!(prepare(MessageContent::text("   ")).is_err());
        assert!(prepare(MessageContent::text("a".repeat(MAX_TEXT_CHARS))).is_ok());

        let err = prepare(MessageContent::text("a".repeat(MAX_TEXT_CHARS + 1))).unwrap_err();
        assert!(matches!(err, Error::InvalidContent(_)));
    }

    #[test]
    fn test_text_limit_counts_characters_not_bytes() {
        // 1000 three-byte characters is still within the limit
        assert!(prepare(MessageContent::text("€".repeat(MAX_TEXT_CHARS))).is_ok());
    }

    #[test]
    fn test_image_requires_url_and_drops_blank_alt() {
        let blank = MessageContent::Image {
            image: ImageRef { url: "  ".into(), alt: None },
        };
        assert!(prepare(blank).is_err());

        let prepared = prepare(MessageContent::Image {
            image: ImageRef { url: " https://cdn/x.png ".into(), alt: Some("  ".into()) },
        })
        .unwrap();
        assert_eq!(
            prepared,
            MessageContent::Image {
                image: ImageRef { url: "https://cdn/x.png".into(), alt: None }
            }
        );
    }

    #[test]
    fn test_location_bounds() {
        assert!(prepare(location("Cafe", 48.85, 2.35)).is_ok());
        assert!(prepare(location("Pole", 90.0, -180.0)).is_ok());
        assert!(prepare(location("", 1.0, 1.0)).is_err());
        assert!(prepare(location("x", 90.5, 0.0)).is_err());
        assert!(prepare(location("x", 0.0, 181.0)).is_err());
        assert!(prepare(location("x", f64::NAN, 0.0)).is_err());
        assert!(prepare(location("x", 0.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn test_shared_post_requires_id() {
        let empty = MessageContent::SharedPost { shared_post_id: " ".into() };
        assert!(prepare(empty).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(MessageContent::SharedPost {
            shared_post_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"messageType": "post", "sharedPostId": "p1"}));

        let parsed: MessageContent = serde_json::from_value(serde_json::json!({
            "messageType": "location",
            "location": {"name": "Park", "lat": 1.5, "lng": -2.0}
        }))
        .unwrap();
        assert_eq!(parsed, location("Park", 1.5, -2.0));
    }

    #[test]
    fn test_columns_round_trip() {
        let original = MessageContent::Image {
            image: ImageRef { url: "u".into(), alt: Some("a".into()) },
        };
        let rebuilt = MessageContent::from_columns("image", original.columns()).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_from_columns_rejects_unknown_type() {
        let err = MessageContent::from_columns("video", ContentColumns::default()).unwrap_err();
        assert!(matches!(err, Error::StorageCorrupted(_)));
    }
}
