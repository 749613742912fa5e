//! OData plumbing: payload shapes, error classification, field schema XML.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use smartsite_provisioner::{ColumnKind, FieldDefinition, ItemFields, StoreError};

/// `CreateFieldAsXml` option: use the `Name` attribute as the internal name.
pub const ADD_FIELD_INTERNAL_NAME_HINT: u32 = 8;

/// `{"d": ...}` wrapper of verbose responses.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub d: T,
}

/// `{"results": [...]}` wrapper of verbose collections.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    pub results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListEntity {
    pub id: String,
    pub title: String,
    pub base_template: u32,
    #[serde(default)]
    pub list_item_entity_type_full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldEntity {
    pub internal_name: String,
    pub title: String,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemCountEntity {
    pub item_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntity {
    pub name: String,
    pub server_relative_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "odata.error")]
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    message: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    value: String,
}

/// Message of an OData error payload, or the raw body if it is not one.
pub fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if parsed.error.code.is_empty() => parsed.error.message.value,
        Ok(parsed) => format!("{} ({})", parsed.error.message.value, parsed.error.code),
        Err(_) => body.trim().to_string(),
    }
}

/// Map an HTTP failure onto the store's error taxonomy.
///
/// The message is consulted before the status: the service reports some
/// "already exists" and "does not exist" conditions with 400 or 500.
pub fn classify(status: u16, body: &str, resource: &str) -> StoreError {
    let message = error_message(body);
    let lowered = message.to_lowercase();

    if status == 404 || lowered.contains("does not exist") {
        return StoreError::not_found(resource);
    }
    if lowered.contains("already exists") || lowered.contains("duplicate field name") {
        return StoreError::already_exists(resource);
    }

    match status {
        409 => StoreError::conflict(resource, message),
        429 | 503 => StoreError::throttled(message),
        500..=599 => StoreError::server(status, message),
        _ => StoreError::rejected(status, message),
    }
}

/// Quote a string for use inside `'...'` in a URL.
pub fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Escape text for an XML attribute or element.
pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `<Field>` schema for a column definition.
///
/// # Errors
///
/// Returns an error for a lookup whose target list id has not been resolved.
pub fn field_schema_xml(definition: &FieldDefinition) -> Result<String, StoreError> {
    let column = &definition.column;
    let name = xml_escape(&column.internal_name);
    let display = xml_escape(&column.display_name);
    let common = format!("Name=\"{name}\" StaticName=\"{name}\" DisplayName=\"{display}\"");

    let xml = match &column.kind {
        ColumnKind::Text => format!("<Field Type=\"Text\" {common} MaxLength=\"255\" />"),
        ColumnKind::MultilineText => format!(
            "<Field Type=\"Note\" {common} NumLines=\"6\" RichText=\"FALSE\" />"
        ),
        ColumnKind::Choice { choices } => {
            let choices: String = choices
                .iter()
                .map(|c| format!("<CHOICE>{}</CHOICE>", xml_escape(c)))
                .collect();
            format!("<Field Type=\"Choice\" {common} Format=\"Dropdown\"><CHOICES>{choices}</CHOICES></Field>")
        }
        ColumnKind::Boolean => format!("<Field Type=\"Boolean\" {common}><Default>0</Default></Field>"),
        ColumnKind::Number => format!("<Field Type=\"Number\" {common} />"),
        ColumnKind::DateTime => format!("<Field Type=\"DateTime\" {common} Format=\"DateTime\" />"),
        ColumnKind::Url => format!("<Field Type=\"URL\" {common} Format=\"Hyperlink\" />"),
        ColumnKind::Lookup { display_field, .. } => {
            let list_id = definition.lookup_list_id.as_deref().ok_or_else(|| {
                StoreError::invalid_request(format!(
                    "lookup column '{}' has no target list id",
                    column.internal_name
                ))
            })?;
            format!(
                "<Field Type=\"Lookup\" {common} List=\"{{{}}}\" ShowField=\"{}\" />",
                xml_escape(list_id.trim_matches(['{', '}'])),
                xml_escape(display_field)
            )
        }
    };

    Ok(xml)
}

/// Item payload with its entity type and typed values.
///
/// Objects carrying a `Url` key become `SP.FieldUrlValue`s.
pub fn item_payload(entity_type: &str, fields: &ItemFields) -> Value {
    let mut payload = Map::new();
    payload.insert("__metadata".to_string(), json!({ "type": entity_type }));

    for (key, value) in fields {
        let value = match value {
            Value::Object(object) if object.contains_key("Url") => {
                let mut object = object.clone();
                object.insert("__metadata".to_string(), json!({ "type": "SP.FieldUrlValue" }));
                Value::Object(object)
            }
            other => other.clone(),
        };
        payload.insert(key.clone(), value);
    }

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use smartsite_provisioner::ColumnDescriptor;

    use super::*;

    #[test]
    fn test_error_message_from_verbose_payload() {
        let body = r#"{"error":{"code":"-2130575342, Microsoft.SharePoint.SPException","message":{"lang":"en-US","value":"List 'News' does not exist at site with URL 'https://x'."}}}"#;
        assert!(error_message(body).starts_with("List 'News' does not exist"));
    }

    #[test]
    fn test_error_message_from_nometadata_payload() {
        let body = r#"{"odata.error":{"code":"","message":{"lang":"en-US","value":"Throttled"}}}"#;
        assert_eq!(error_message(body), "Throttled");
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        assert_eq!(error_message(" gateway timeout \n"), "gateway timeout");
    }

    #[test]
    fn test_classification() {
        assert!(classify(404, "", "list 'News'").is_not_found());

        let missing = r#"{"error":{"code":"","message":{"value":"Column 'X' does not exist."}}}"#;
        assert!(classify(400, missing, "field").is_not_found());

        let exists = r#"{"error":{"code":"","message":{"value":"A list, survey, discussion board, or document library with the specified title already exists in this Web site."}}}"#;
        assert_eq!(
            classify(500, exists, "list 'News'"),
            StoreError::already_exists("list 'News'")
        );

        let duplicate = r#"{"error":{"code":"","message":{"value":"A duplicate field name \"NewsBody\" was found."}}}"#;
        assert_eq!(
            classify(400, duplicate, "field 'NewsBody'"),
            StoreError::already_exists("field 'NewsBody'")
        );

        assert!(classify(409, "save conflict", "list").is_transient());
        assert!(classify(429, "", "list").is_transient());
        assert!(classify(503, "", "list").is_transient());
        assert!(classify(502, "", "list").is_transient());
        assert!(!classify(400, "bad field type", "list").is_transient());
        assert!(!classify(403, "access denied", "list").is_transient());
    }

    #[test]
    fn test_quote_doubles_single_quotes() {
        assert_eq!(quote("Bob's list"), "Bob''s list");
    }

    #[test]
    fn test_choice_schema_is_escaped() {
        let column = ColumnDescriptor::choice("Kind", ["A & B", "<C>"]).titled("Kind \"quoted\"");
        let xml = field_schema_xml(&FieldDefinition::plain(column)).unwrap();

        assert!(xml.starts_with("<Field Type=\"Choice\" Name=\"Kind\""));
        assert!(xml.contains("DisplayName=\"Kind &quot;quoted&quot;\""));
        assert!(xml.contains("<CHOICE>A &amp; B</CHOICE><CHOICE>&lt;C&gt;</CHOICE>"));
    }

    #[test]
    fn test_lookup_schema_references_list() {
        let column = ColumnDescriptor::lookup("Page", "SmartPages");
        let definition = FieldDefinition::lookup(column, "0f3c-42");

        let xml = field_schema_xml(&definition).unwrap();

        assert!(xml.contains("Type=\"Lookup\""));
        assert!(xml.contains("List=\"{0f3c-42}\""));
        assert!(xml.contains("ShowField=\"Title\""));
    }

    #[test]
    fn test_unresolved_lookup_is_rejected() {
        let column = ColumnDescriptor::lookup("Page", "SmartPages");
        let result = field_schema_xml(&FieldDefinition::plain(column));
        assert!(matches!(result, Err(StoreError::InvalidRequest { .. })));
    }

    #[test]
    fn test_item_payload_types_url_values() {
        let mut fields = ItemFields::new();
        fields.insert("Title".to_string(), json!("Hello"));
        fields.insert("Image".to_string(), json!({ "Url": "/a.svg", "Description": "a" }));

        let payload = item_payload("SP.Data.NewsListItem", &fields);

        assert_eq!(payload["__metadata"]["type"], "SP.Data.NewsListItem");
        assert_eq!(payload["Title"], "Hello");
        assert_eq!(payload["Image"]["__metadata"]["type"], "SP.FieldUrlValue");
        assert_eq!(payload["Image"]["Url"], "/a.svg");
    }
}
