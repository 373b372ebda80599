use std::collections::BTreeMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// `Upload-Metadata` 头：`key base64(value)`，逗号分隔
pub fn to_header(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .filter(|(key, _)| is_valid_key(key))
        .map(|(key, value)| format!("{} {}", key, STANDARD.encode(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decodes a header produced by [`to_header`]. Malformed pairs are skipped.
#[cfg(test)]
pub fn parse_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, ' ');
            let key = parts.next().filter(|key| !key.is_empty())?;
            let value = match parts.next() {
                Some(encoded) => String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?,
                None => String::new(),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

// key 中不能有空格和逗号
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains([' ', ','])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encodes_values() {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), "deck final.pdf".to_string());
        metadata.insert("filetype".to_string(), "application/pdf".to_string());

        let header = to_header(&metadata);
        assert_eq!(header, "filename ZGVjayBmaW5hbC5wZGY=,filetype YXBwbGljYXRpb24vcGRm");
        assert_eq!(parse_header(&header), metadata);
    }

    #[test]
    fn test_invalid_keys_are_dropped() {
        let mut metadata = BTreeMap::new();
        metadata.insert("bad key".to_string(), "x".to_string());
        metadata.insert("title".to_string(), "Night, Again".to_string());

        let parsed = parse_header(&to_header(&metadata));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["title"], "Night, Again");
    }
}
