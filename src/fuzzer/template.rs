//! Raw request templates with `§...§` fuzz markers
//!
//! Markers are stripped and their spans become fuzz locations in the
//! canonical text of the resulting message.

use super::location::FuzzLocation;
use crate::error::{FuzzerError, GapfuzzError, HttpError};
use crate::http::HttpMessage;

pub const MARKER: char = '§';

/// Base message and the gap locations marked in it
#[derive(Debug, Clone)]
pub struct MarkedRequest {
    pub message: HttpMessage,
    pub locations: Vec<FuzzLocation>,
}

/// Parse a raw request containing `§value§` markers.
///
/// The header is re-rendered canonically, so offsets refer to
/// `request_header_text() + request_body`. Content-Length is set to the
/// unmarked body length before header offsets are taken.
pub fn parse_marked_request(raw: &str) -> Result<MarkedRequest, GapfuzzError> {
    let mut message = HttpMessage::from_raw_request(raw)?;

    let (body, body_locations) = strip_markers(&message.request_body)?;
    let body_len = body.len();
    message.set_request_body_text(body);
    message.set_content_length(body_len);

    let marked_header = message.request_header_text();
    let (header, mut locations) = strip_markers(&marked_header)?;
    message.set_request_header_text(&header)?;

    if message.request_header_text() != header {
        return Err(HttpError::MalformedHeader(
            "fuzz marker changes the header layout when removed".into(),
        )
        .into());
    }

    let header_len = header.len();
    locations.extend(
        body_locations
            .into_iter()
            .map(|l| FuzzLocation::new(l.begin() + header_len, l.end() + header_len)),
    );

    tracing::debug!(gaps = locations.len(), "Parsed request template");
    Ok(MarkedRequest { message, locations })
}

/// Remove marker pairs, returning the clean text and the spans they enclosed
fn strip_markers(text: &str) -> Result<(String, Vec<FuzzLocation>), FuzzerError> {
    let mut clean = String::with_capacity(text.len());
    let mut locations = Vec::new();
    let mut open: Option<usize> = None;

    for ch in text.chars() {
        if ch != MARKER {
            clean.push(ch);
            continue;
        }
        match open.take() {
            Some(begin) => locations.push(FuzzLocation::new(begin, clean.len())),
            None => open = Some(clean.len()),
        }
    }

    match open {
        Some(begin) => Err(FuzzerError::UnbalancedMarker { offset: begin }),
        None => Ok((clean, locations)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(marked: &MarkedRequest, index: usize) -> String {
        let text = format!(
            "{}{}",
            marked.message.request_header_text(),
            marked.message.request_body
        );
        let location = marked.locations[index];
        text[location.begin()..location.end()].to_string()
    }

    #[test]
    fn test_header_and_body_markers() {
        let raw = "GET /item?id=§7§ HTTP/1.1\nHost: shop.test\nX-Role: §user§\n\n";
        let marked = parse_marked_request(raw).unwrap();

        assert_eq!(marked.locations.len(), 2);
        assert_eq!(covered(&marked, 0), "7");
        assert_eq!(covered(&marked, 1), "user");
        assert_eq!(marked.message.request_header.uri, "/item?id=7");
        assert_eq!(marked.message.request_header.content_length(), None);
    }

    #[test]
    fn test_body_offsets_follow_fixed_content_length() {
        let raw = "POST /login HTTP/1.1\r\nHost: app.test\r\nContent-Length: 999\r\n\r\nuser=§admin§&pass=§x§";
        let marked = parse_marked_request(raw).unwrap();

        assert_eq!(marked.message.request_body, "user=admin&pass=x");
        assert_eq!(marked.message.request_header.content_length(), Some(17));
        assert_eq!(covered(&marked, 0), "admin");
        assert_eq!(covered(&marked, 1), "x");
    }

    #[test]
    fn test_empty_marker_is_insertion_point() {
        let raw = "POST /a HTTP/1.1\r\nHost: t\r\n\r\nq=§§";
        let marked = parse_marked_request(raw).unwrap();
        assert!(marked.locations[0].is_empty());
        assert_eq!(marked.message.request_body, "q=");
    }

    #[test]
    fn test_unbalanced_marker() {
        let raw = "POST /a HTTP/1.1\r\nHost: t\r\n\r\nq=§abc";
        let err = parse_marked_request(raw).unwrap_err();
        assert!(matches!(
            err,
            GapfuzzError::Fuzzer(FuzzerError::UnbalancedMarker { offset: 2 })
        ));
    }

    #[test]
    fn test_marker_that_moves_header_text() {
        let raw = "GET / HTTP/1.1\r\nHost: t\r\nX-A: § b§\r\n\r\n";
        assert!(matches!(
            parse_marked_request(raw),
            Err(GapfuzzError::Http(HttpError::MalformedHeader(_)))
        ));
    }
}
