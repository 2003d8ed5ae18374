//! Decoding of query strings and `application/x-www-form-urlencoded`
//! bodies, which is all the release API carries besides JSON.

/// Decode `a=1&b=two%20words` into pairs, percent-decoding keys and values
/// (`+` is a space). Malformed escapes are kept verbatim rather than
/// rejected, matching what permissive HTTP stacks do.
pub fn parse_form(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// First value for `key`, if present.
pub fn form_value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Every value for `key`, in order.
pub fn form_values<'a>(form: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    form.iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

/// Split a request URL into its path and decoded query pairs.
pub fn split_url(url: &str) -> (&str, Vec<(String, String)>) {
    match url.split_once('?') {
        Some((path, query)) => (path, parse_form(query)),
        None => (url, Vec::new()),
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte {
        Some(b @ b'0'..=b'9') => Some(b - b'0'),
        Some(b @ b'a'..=b'f') => Some(b - b'a' + 10),
        Some(b @ b'A'..=b'F') => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encode a value for use in a query string or form body.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_decodes() {
        let form = parse_form("service=%3Call%3E&image=alpine%3Alatest&msg=two+words");
        assert_eq!(form_value(&form, "service"), Some("<all>"));
        assert_eq!(form_value(&form, "image"), Some("alpine:latest"));
        assert_eq!(form_value(&form, "msg"), Some("two words"));
    }

    #[test]
    fn repeated_keys_keep_order() {
        let form = parse_form("exclude=a&exclude=b");
        assert_eq!(form_values(&form, "exclude"), vec!["a", "b"]);
    }

    #[test]
    fn missing_value_is_empty() {
        let form = parse_form("flag&k=v");
        assert_eq!(form_value(&form, "flag"), Some(""));
        assert_eq!(form_value(&form, "k"), Some("v"));
    }

    #[test]
    fn malformed_escape_is_kept() {
        let form = parse_form("k=%zz");
        assert_eq!(form_value(&form, "k"), Some("%zz"));
    }

    #[test]
    fn split_url_separates_query() {
        let (path, query) = split_url("/v6/images?service=deployment%2Fweb");
        assert_eq!(path, "/v6/images");
        assert_eq!(form_value(&query, "service"), Some("deployment/web"));

        let (path, query) = split_url("/v6/services");
        assert_eq!(path, "/v6/services");
        assert!(query.is_empty());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = "<all latest> & more?";
        let encoded = percent_encode(original);
        let form = parse_form(&format!("k={encoded}"));
        assert_eq!(form_value(&form, "k"), Some(original));
    }
}
