//! Anti-CSRF token discovery
//!
//! Finds anti-CSRF tokens in HTML form responses so fuzzed requests can carry
//! a fresh token on every attempt.

use regex::Regex;

use crate::app::AntiCsrfConfig;
use crate::http::HttpMessage;

/// A token found in a response, with the message that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct AntiCsrfToken {
    pub name: String,
    pub value: String,
    /// Request (and response) the token was found in; resent to refresh it
    pub source_message: HttpMessage,
    /// Form action the token is submitted to
    pub target_url: Option<String>,
}

/// Extracts anti-CSRF tokens from messages
pub trait AntiCsrfTokenSource: Send + Sync {
    /// All tokens in the message's response
    fn get_tokens(&self, message: &HttpMessage) -> Vec<AntiCsrfToken>;

    /// Value of the named token in the message's response
    fn get_token_value(&self, message: &HttpMessage, token_name: &str) -> Option<String> {
        self.get_tokens(message)
            .into_iter()
            .find(|t| t.name == token_name)
            .map(|t| t.value)
    }
}

/// Regex-based extractor for tokens carried in HTML form inputs
pub struct FormTokenExtractor {
    token_names: Vec<String>,
    form_pattern: Regex,
    action_pattern: Regex,
    input_pattern: Regex,
    name_pattern: Regex,
    value_pattern: Regex,
    entity_pattern: Regex,
}

impl FormTokenExtractor {
    pub fn new(config: &AntiCsrfConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            token_names: config
                .token_names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
            form_pattern: Regex::new(r"(?is)<form([^>]*)>(.*?)</form>")?,
            action_pattern: attribute_pattern("action")?,
            input_pattern: Regex::new(r"(?i)<input\b[^>]*>")?,
            name_pattern: attribute_pattern("name")?,
            value_pattern: attribute_pattern("value")?,
            entity_pattern: Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")?,
        })
    }

    /// Attribute value with character references resolved
    fn attribute(&self, pattern: &Regex, tag: &str) -> Option<String> {
        let captures = pattern.captures(tag)?;
        let raw = (1..=3).find_map(|i| captures.get(i))?.as_str();
        Some(self.decode_entities(raw))
    }

    fn decode_entities(&self, text: &str) -> String {
        self.entity_pattern
            .replace_all(text, |caps: &regex::Captures| {
                decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn is_token_name(&self, name: &str) -> bool {
        let name_lower = name.to_lowercase();
        self.token_names.iter().any(|n| name_lower.contains(n.as_str()))
    }
}

impl AntiCsrfTokenSource for FormTokenExtractor {
    fn get_tokens(&self, message: &HttpMessage) -> Vec<AntiCsrfToken> {
        let mut tokens = Vec::new();
        let html = &message.response_body;

        for form in self.form_pattern.captures_iter(html) {
            let attributes = form.get(1).map(|m| m.as_str()).unwrap_or("");
            let form_body = form.get(2).map(|m| m.as_str()).unwrap_or("");

            let target_url = self.attribute(&self.action_pattern, attributes);

            for input in self.input_pattern.find_iter(form_body) {
                let input = input.as_str();
                let name = match self.attribute(&self.name_pattern, input) {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                };
                if !self.is_token_name(&name) {
                    continue;
                }
                let value = self.attribute(&self.value_pattern, input).unwrap_or_default();

                tokens.push(AntiCsrfToken {
                    name,
                    value,
                    source_message: message.clone_all(),
                    target_url: target_url.clone(),
                });
            }
        }

        tracing::debug!(count = tokens.len(), "Extracted anti-CSRF tokens");
        tokens
    }
}

/// Double-quoted, single-quoted or bare attribute value
fn attribute_pattern(attribute: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
        attribute
    ))
}

/// Character for a named or numeric reference, without the `&` and `;`
fn decode_entity(entity: &str) -> Option<String> {
    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(decimal) = entity.strip_prefix('#') {
        decimal.parse().ok()?
    } else {
        let named = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => return None,
        };
        return Some(named.to_string());
    };
    char::from_u32(code).map(String::from)
}

/// Encode a token value the way it appears in a form-encoded body
pub fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestHeader;

    fn page(body: &str) -> HttpMessage {
        let mut msg = HttpMessage::new(RequestHeader::new("GET", "http://example.com/login"), "");
        msg.response_body = body.to_string();
        msg
    }

    fn extractor() -> FormTokenExtractor {
        FormTokenExtractor::new(&AntiCsrfConfig::default()).unwrap()
    }

    #[test]
    fn test_extracts_hidden_token() {
        let msg = page(
            r#"<html><form method="post" action="/login">
                <input type="text" name="user">
                <input type="hidden" name="csrf_token" value="abc123">
            </form></html>"#,
        );

        let tokens = extractor().get_tokens(&msg);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name, "csrf_token");
        assert_eq!(tokens[0].value, "abc123");
        assert_eq!(tokens[0].target_url.as_deref(), Some("/login"));
        assert_eq!(tokens[0].source_message.request_header.uri, "http://example.com/login");
    }

    #[test]
    fn test_value_before_name() {
        let msg = page(r#"<form><input value='tok/+=' type=hidden name='authenticity_token'></form>"#);
        assert_eq!(
            extractor().get_token_value(&msg, "authenticity_token").as_deref(),
            Some("tok/+=")
        );
    }

    #[test]
    fn test_no_token() {
        let msg = page(r#"<form><input name="username" value="x"></form>"#);
        assert!(extractor().get_tokens(&msg).is_empty());
        assert_eq!(extractor().get_token_value(&msg, "csrf"), None);
    }

    #[test]
    fn test_entity_encoded_value_is_decoded() {
        let html = r#"<form action="/save?a=1&amp;b=2"><input type="hidden" name="csrf_token" value="a&amp;b&#39;c&#x2F;d&lt;&gt;&quot;&#43;&bogus;"></form>"#;
        let tokens = extractor().get_tokens(&page(html));

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, "a&b'c/d<>\"+&bogus;");
        assert_eq!(tokens[0].target_url.as_deref(), Some("/save?a=1&b=2"));
    }

    #[test]
    fn test_unquoted_attributes() {
        let html = "<form action=/login><input type=hidden name=csrf_token value=Zx9-Q_1><input name=user></form>";
        let tokens = extractor().get_tokens(&page(html));

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name, "csrf_token");
        assert_eq!(tokens[0].value, "Zx9-Q_1");
        assert_eq!(tokens[0].target_url.as_deref(), Some("/login"));
    }

    #[test]
    fn test_form_encode() {
        assert_eq!(form_encode("abc123"), "abc123");
        assert_eq!(form_encode("a b/c+="), "a+b%2Fc%2B%3D");
    }
}
