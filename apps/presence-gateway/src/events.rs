use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const TAG_INVENTORY_EVENT: &str = "tagInventory";

/// One event from the reader's event stream. Only `tagInventory` events carry a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderEvent {
    #[serde(rename = "eventType", alias = "type", default)]
    pub event_type: Option<String>,
    #[serde(
        rename = "tagInventoryEvent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tag_inventory_event: Option<TagInventoryEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInventoryEvent {
    #[serde(rename = "epcHex", default, skip_serializing_if = "Option::is_none")]
    pub epc_hex: Option<String>,
}

impl ReaderEvent {
    pub fn tag_inventory(epc_hex: impl Into<String>) -> Self {
        Self {
            event_type: Some(TAG_INVENTORY_EVENT.to_string()),
            tag_inventory_event: Some(TagInventoryEvent {
                epc_hex: Some(epc_hex.into()),
            }),
        }
    }

    pub fn is_tag_inventory(&self) -> bool {
        self.event_type.as_deref() == Some(TAG_INVENTORY_EVENT)
    }

    /// `tagInventoryEvent.epcHex` of a tag inventory event, if present and non-blank.
    pub fn tag_id(&self) -> Option<&str> {
        if !self.is_tag_inventory() {
            return None;
        }
        self.tag_inventory_event
            .as_ref()?
            .epc_hex
            .as_deref()
            .map(str::trim)
            .filter(|epc| !epc.is_empty())
    }
}

/// Decodes one newline-delimited stream line or one broker payload.
pub fn parse_event_payload(payload: &mut [u8]) -> GatewayResult<ReaderEvent> {
    simd_json::serde::from_slice::<ReaderEvent>(payload).map_err(GatewayError::stream)
}

/// Extracts the tag ids of a `{"tagIds": [...]}` batch. Integer ids are accepted as their
/// decimal text.
pub fn parse_tag_batch(payload: &JsonValue) -> GatewayResult<Vec<String>> {
    let object = payload
        .as_object()
        .ok_or_else(|| GatewayError::validation("expected a JSON object with tagIds"))?;
    let raw = object
        .get("tagIds")
        .ok_or_else(|| GatewayError::validation("missing tagIds"))?;

    let items = match raw {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Array(items) => items,
        _ => return Err(GatewayError::validation("tagIds must be a list")),
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let id = match item {
                JsonValue::String(value) => value.trim().to_string(),
                JsonValue::Number(value) if value.is_i64() || value.is_u64() => value.to_string(),
                _ => {
                    return Err(GatewayError::validation(format!(
                        "tagIds[{idx}] must be a string or integer"
                    )))
                }
            };
            if id.is_empty() {
                return Err(GatewayError::validation(format!("tagIds[{idx}] is blank")));
            }
            Ok(id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> GatewayResult<ReaderEvent> {
        let mut bytes = raw.as_bytes().to_vec();
        parse_event_payload(&mut bytes)
    }

    #[test]
    fn tag_inventory_event_yields_epc() {
        let event =
            parse(r#"{"eventType":"tagInventory","tagInventoryEvent":{"epcHex":"ABC"}}"#).unwrap();
        assert_eq!(event.tag_id(), Some("ABC"));
    }

    #[test]
    fn short_type_key_is_accepted() {
        let event = parse(r#"{"type":"tagInventory","tagInventoryEvent":{"epcHex":"ABC"}}"#).unwrap();
        assert_eq!(event.tag_id(), Some("ABC"));
    }

    #[test]
    fn missing_or_blank_epc_has_no_tag() {
        let event = parse(r#"{"eventType":"tagInventory","tagInventoryEvent":{}}"#).unwrap();
        assert_eq!(event.tag_id(), None);

        let event = parse(r#"{"eventType":"tagInventory","tagInventoryEvent":{"epcHex":" "}}"#)
            .unwrap();
        assert_eq!(event.tag_id(), None);

        let event = parse(r#"{"eventType":"tagInventory"}"#).unwrap();
        assert_eq!(event.tag_id(), None);
    }

    #[test]
    fn other_event_types_have_no_tag() {
        let event =
            parse(r#"{"eventType":"other","tagInventoryEvent":{"epcHex":"ABC"}}"#).unwrap();
        assert!(!event.is_tag_inventory());
        assert_eq!(event.tag_id(), None);
    }

    #[test]
    fn undecodable_payload_is_a_stream_error() {
        let err = parse("not json").unwrap_err();
        assert!(matches!(err, GatewayError::Stream(_)));
    }

    #[test]
    fn batch_accepts_strings_and_integers() {
        let ids = parse_tag_batch(&json!({"tagIds": ["A", 90127838712u64, " B "]})).unwrap();
        assert_eq!(ids, vec!["A", "90127838712", "B"]);
    }

    #[test]
    fn batch_null_tag_ids_is_empty() {
        assert!(parse_tag_batch(&json!({"tagIds": null})).unwrap().is_empty());
    }

    #[test]
    fn batch_rejects_wrong_shapes() {
        for payload in [
            json!(["A"]),
            json!({"ids": ["A"]}),
            json!({"tagIds": "A"}),
            json!({"tagIds": [{"id": "A"}]}),
            json!({"tagIds": [""]}),
            json!({"tagIds": [1.5]}),
        ] {
            let err = parse_tag_batch(&payload).unwrap_err();
            assert!(matches!(err, GatewayError::Validation(_)), "{payload}");
        }
    }
}
