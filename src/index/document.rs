use crate::error::CodecError;
use crate::types::ProfileDocument;
use chrono::DateTime;
use serde_json::{Map, Value};

/// A document in the backend's representation: a flat JSON object keyed by
/// snake_case field name.
pub type BackendDocument = Map<String, Value>;

const MAX_ID_BYTES: usize = 511;

/// Absent optional fields are omitted, never written as null or "".
pub fn encode(doc: &ProfileDocument) -> BackendDocument {
    let mut out = Map::new();
    out.insert("id".to_string(), Value::String(doc.id.clone()));
    out.insert("fid".to_string(), Value::from(doc.fid));
    put_optional(&mut out, "display_name", &doc.display_name);
    put_optional(&mut out, "username", &doc.username);
    put_optional(&mut out, "pfp_url", &doc.pfp_url);
    put_optional(&mut out, "bio", &doc.bio);
    put_optional(&mut out, "url", &doc.url);
    put_optional(&mut out, "location", &doc.location);
    put_optional(&mut out, "twitter", &doc.twitter);
    put_optional(&mut out, "github", &doc.github);
    out.insert("updated_at".to_string(), Value::from(doc.updated_at));
    out
}

fn put_optional(out: &mut BackendDocument, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        out.insert(key.to_string(), Value::String(v.clone()));
    }
}

/// Decode a backend document. Fields the backend adds (`_formatted`,
/// `_rankingScore`, ...) are ignored; null optional fields decode as absent.
pub fn decode(doc: &BackendDocument) -> Result<ProfileDocument, CodecError> {
    Ok(ProfileDocument {
        id: decode_id(doc)?,
        fid: decode_fid(doc)?,
        display_name: optional_string(doc, "display_name")?,
        username: optional_string(doc, "username")?,
        pfp_url: optional_string(doc, "pfp_url")?,
        bio: optional_string(doc, "bio")?,
        url: optional_string(doc, "url")?,
        location: optional_string(doc, "location")?,
        twitter: optional_string(doc, "twitter")?,
        github: optional_string(doc, "github")?,
        updated_at: decode_updated_at(doc)?,
    })
}

/// Checks a document is acceptable as a backend document before it is sent.
pub fn validate(doc: &ProfileDocument) -> Result<(), CodecError> {
    let invalid = |reason: &str| CodecError::InvalidField {
        field: "id".to_string(),
        reason: reason.to_string(),
    };
    if doc.id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if doc.id.len() > MAX_ID_BYTES {
        return Err(invalid("longer than 511 bytes"));
    }
    if !doc
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only [A-Za-z0-9_-] allowed"));
    }
    Ok(())
}

fn present<'a>(doc: &'a BackendDocument, field: &str) -> Option<&'a Value> {
    doc.get(field).filter(|v| !v.is_null())
}

fn missing(field: &str) -> CodecError {
    CodecError::MissingRequiredField {
        field: field.to_string(),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn decode_id(doc: &BackendDocument) -> Result<String, CodecError> {
    match present(doc, "id") {
        None => Err(missing("id")),
        Some(Value::String(s)) if s.is_empty() => Err(invalid("id", "empty string")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        Some(other) => Err(invalid("id", format!("expected string, got {}", other))),
    }
}

fn decode_fid(doc: &BackendDocument) -> Result<u64, CodecError> {
    match present(doc, "fid") {
        None => Err(missing("fid")),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid("fid", format!("not an unsigned integer: {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid("fid", format!("{:?}: {}", s, e))),
        Some(other) => Err(invalid("fid", format!("expected integer, got {}", other))),
    }
}

fn optional_string(doc: &BackendDocument, field: &str) -> Result<Option<String>, CodecError> {
    match present(doc, field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(field, format!("expected string, got {}", other))),
    }
}

/// Seconds since the epoch from an integer, a decimal string or an RFC 3339
/// timestamp. Absent means 0.
fn decode_updated_at(doc: &BackendDocument) -> Result<u64, CodecError> {
    let value = match present(doc, "updated_at") {
        None => return Ok(0),
        Some(v) => v,
    };
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| invalid("updated_at", format!("not an unsigned integer: {}", n))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<u64>() {
                return Ok(secs);
            }
            let ts = DateTime::parse_from_rfc3339(s)
                .map_err(|e| invalid("updated_at", format!("{:?}: {}", s, e)))?;
            u64::try_from(ts.timestamp())
                .map_err(|_| invalid("updated_at", format!("{:?} is before the epoch", s)))
        }
        other => Err(invalid(
            "updated_at",
            format!("expected timestamp, got {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> BackendDocument {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn full() -> ProfileDocument {
        ProfileDocument {
            id: "3".into(),
            fid: 3,
            display_name: Some("Dan Romero".into()),
            username: Some("dwr".into()),
            pfp_url: Some("https://example.com/p.png".into()),
            bio: Some("Working on Farcaster".into()),
            url: Some("https://farcaster.xyz".into()),
            location: Some("Los Angeles".into()),
            twitter: Some("dwr".into()),
            github: Some("danromero".into()),
            updated_at: 1_700_000_000,
        }
    }

    #[test]
    fn round_trip_full() {
        let d = full();
        assert_eq!(decode(&encode(&d)).unwrap(), d);
    }

    #[test]
    fn round_trip_all_optional_absent() {
        let d = ProfileDocument::new("9", 9);
        let encoded = encode(&d);
        assert_eq!(encoded.len(), 3);
        assert!(!encoded.contains_key("bio"));
        assert_eq!(decode(&encoded).unwrap(), d);
    }

    #[test]
    fn empty_string_is_kept_distinct_from_absent() {
        let mut d = ProfileDocument::new("9", 9);
        d.bio = Some(String::new());
        let encoded = encode(&d);
        assert_eq!(encoded["bio"], json!(""));
        assert_eq!(decode(&encoded).unwrap().bio, Some(String::new()));
    }

    #[test]
    fn missing_id_or_fid() {
        assert_eq!(
            decode(&obj(json!({"fid": 1}))),
            Err(CodecError::MissingRequiredField { field: "id".into() })
        );
        assert_eq!(
            decode(&obj(json!({"id": "1"}))),
            Err(CodecError::MissingRequiredField { field: "fid".into() })
        );
        assert_eq!(
            decode(&obj(json!({"id": "1", "fid": null}))),
            Err(CodecError::MissingRequiredField { field: "fid".into() })
        );
    }

    #[test]
    fn null_optional_decodes_absent() {
        let d = decode(&obj(json!({"id": "1", "fid": 1, "bio": null}))).unwrap();
        assert_eq!(d.bio, None);
    }

    #[test]
    fn backend_extras_ignored() {
        let d = decode(&obj(json!({
            "id": "1", "fid": 1, "_rankingScore": 0.9, "_formatted": {"bio": "x"}
        })))
        .unwrap();
        assert_eq!(d, ProfileDocument::new("1", 1));
    }

    #[test]
    fn numeric_id_and_string_fid_accepted() {
        let d = decode(&obj(json!({"id": 42, "fid": "42"}))).unwrap();
        assert_eq!(d.id, "42");
        assert_eq!(d.fid, 42);
    }

    #[test]
    fn negative_fid_rejected() {
        assert!(matches!(
            decode(&obj(json!({"id": "1", "fid": -4}))),
            Err(CodecError::InvalidField { field, .. }) if field == "fid"
        ));
    }

    #[test]
    fn updated_at_forms() {
        let base = json!({"id": "1", "fid": 1});
        let with = |v: Value| {
            let mut m = obj(base.clone());
            m.insert("updated_at".into(), v);
            decode(&m)
        };
        assert_eq!(with(json!(1700000000)).unwrap().updated_at, 1_700_000_000);
        assert_eq!(with(json!("1700000000")).unwrap().updated_at, 1_700_000_000);
        assert_eq!(
            with(json!("2023-11-14T22:13:20Z")).unwrap().updated_at,
            1_700_000_000
        );
        assert!(matches!(
            with(json!("yesterday")),
            Err(CodecError::InvalidField { field, .. }) if field == "updated_at"
        ));
        assert!(matches!(
            with(json!("1969-12-31T00:00:00Z")),
            Err(CodecError::InvalidField { .. })
        ));
    }

    #[test]
    fn non_string_optional_rejected() {
        assert!(matches!(
            decode(&obj(json!({"id": "1", "fid": 1, "location": 12}))),
            Err(CodecError::InvalidField { field, .. }) if field == "location"
        ));
    }

    #[test]
    fn id_validation() {
        assert!(validate(&ProfileDocument::new("user-3_a", 3)).is_ok());
        assert!(validate(&ProfileDocument::new("", 3)).is_err());
        assert!(validate(&ProfileDocument::new("a b", 3)).is_err());
        assert!(validate(&ProfileDocument::new("x".repeat(512), 3)).is_err());
    }
}
