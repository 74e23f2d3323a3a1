//! Payload injection
//!
//! Splices one combination into a base request. Locations address the header
//! text followed by the body text; each location is spliced into exactly one
//! of the two buffers. A location belongs to the header when it ends at or
//! before the header length, so a zero-width location exactly at the boundary
//! is inserted at the end of the header, while a non-empty location starting
//! at the boundary targets the body.
//!
//! This is narrower than classifying by start offset alone: a location whose
//! begin equals the header length is not header-side unless it is also empty.

use super::location::{Combination, FuzzLocation};
use crate::error::FuzzerError;
use crate::http::HttpMessage;

/// Header and body text after splicing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spliced {
    pub header: String,
    pub body: String,
}

/// Splice payloads into header and body text.
pub fn splice(header: &str, body: &str, combination: &Combination) -> Result<Spliced, FuzzerError> {
    check_overlaps(combination)?;

    let boundary = header.len();
    let total = boundary + body.len();

    let mut header_out = String::with_capacity(header.len());
    let mut body_out = String::with_capacity(body.len());
    let mut header_cursor = 0;
    let mut body_cursor = 0;

    // BTreeMap iteration is ordered by begin
    for (location, payload) in combination {
        let (begin, end) = (location.begin(), location.end());
        let invalid = FuzzerError::InvalidLocation { begin, end, len: total };

        if end > total {
            return Err(invalid);
        }

        if end <= boundary {
            if !header.is_char_boundary(begin) || !header.is_char_boundary(end) {
                return Err(invalid);
            }
            header_out.push_str(&header[header_cursor..begin]);
            header_out.push_str(payload.data());
            header_cursor = end;
        } else if begin >= boundary {
            let (begin, end) = (begin - boundary, end - boundary);
            if !body.is_char_boundary(begin) || !body.is_char_boundary(end) {
                return Err(invalid);
            }
            body_out.push_str(&body[body_cursor..begin]);
            body_out.push_str(payload.data());
            body_cursor = end;
        } else {
            return Err(FuzzerError::StraddlesBoundary { begin, end, boundary });
        }
    }

    header_out.push_str(&header[header_cursor..]);
    body_out.push_str(&body[body_cursor..]);

    Ok(Spliced {
        header: header_out,
        body: body_out,
    })
}

/// Produce a mutated copy of `base`'s request with the combination injected.
///
/// The declared content length always matches the new body. If the spliced
/// header no longer parses, the previous header is kept and the body
/// mutation still applies.
pub fn inject(base: &HttpMessage, combination: &Combination) -> Result<HttpMessage, FuzzerError> {
    let spliced = splice(
        &base.request_header_text(),
        base.request_body_text(),
        combination,
    )?;

    let mut message = base.clone_request();
    if let Err(e) = message.set_request_header_text(&spliced.header) {
        tracing::warn!(error = %e, "Injected header could not be parsed, keeping previous header");
    }
    message.set_request_body_text(spliced.body);
    let length = message.request_body.len();
    message.set_content_length(length);
    message.note = Some(combination.values().map(|p| p.data()).collect());

    Ok(message)
}

fn check_overlaps(combination: &Combination) -> Result<(), FuzzerError> {
    let locations: Vec<&FuzzLocation> = combination.keys().collect();
    for (i, first) in locations.iter().enumerate() {
        if let Some(second) = locations[i + 1..].iter().find(|l| first.overlaps(l)) {
            return Err(FuzzerError::OverlappingGaps {
                first_begin: first.begin(),
                first_end: first.end(),
                second_begin: second.begin(),
                second_end: second.end(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzer::Payload;

    const RAW: &str =
        "POST http://example.com/form HTTP/1.1\r\nHost: example.com\r\nContent-Length: 10\r\n\r\nabcdefghij";

    fn base() -> HttpMessage {
        HttpMessage::from_raw_request(RAW).unwrap()
    }

    fn body_location(msg: &HttpMessage, begin: usize, end: usize) -> FuzzLocation {
        let header_len = msg.request_header_text().len();
        FuzzLocation::new(header_len + begin, header_len + end)
    }

    #[test]
    fn test_body_splice() {
        let msg = base();
        let mut combination = Combination::new();
        combination.insert(body_location(&msg, 2, 5), Payload::literal("XYZ"));

        let mutated = inject(&msg, &combination).unwrap();
        assert_eq!(mutated.request_body, "abXYZfghij");
        assert_eq!(mutated.request_header.content_length(), Some(10));
    }

    #[test]
    fn test_length_follows_payload_size() {
        let msg = base();
        let mut combination = Combination::new();
        combination.insert(body_location(&msg, 0, 3), Payload::literal("a much longer value"));
        combination.insert(body_location(&msg, 8, 10), Payload::literal(""));

        let mutated = inject(&msg, &combination).unwrap();
        assert_eq!(mutated.request_body, "a much longer valuedefgh");
        assert_eq!(mutated.request_body.len(), 10 - 3 + 19 - 2);
        assert_eq!(
            mutated.request_header.content_length(),
            Some(mutated.request_body.len())
        );
    }

    #[test]
    fn test_empty_combination_is_identity() {
        let msg = base();
        let mutated = inject(&msg, &Combination::new()).unwrap();
        assert_eq!(mutated.request_header_text(), msg.request_header_text());
        assert_eq!(mutated.request_body, msg.request_body);
    }

    #[test]
    fn test_header_and_body_together() {
        let msg = base();
        let header = msg.request_header_text();
        let host_value = header.find("example.com\r\n").unwrap();

        let mut combination = Combination::new();
        combination.insert(
            FuzzLocation::new(host_value, host_value + "example.com".len()),
            Payload::literal("evil.test"),
        );
        combination.insert(body_location(&msg, 0, 1), Payload::literal("Z"));

        let mutated = inject(&msg, &combination).unwrap();
        assert_eq!(mutated.request_header.header("Host"), Some("evil.test"));
        assert_eq!(mutated.request_body, "Zbcdefghij");
        assert_eq!(mutated.note.as_deref(), Some("evil.testZ"));
    }

    #[test]
    fn test_zero_width_boundary_gap_goes_to_header() {
        let msg = base();
        let header = msg.request_header_text();
        let boundary = header.len();

        let mut combination = Combination::new();
        combination.insert(FuzzLocation::new(boundary, boundary), Payload::literal("EDGE"));

        let spliced = splice(&header, &msg.request_body, &combination).unwrap();
        assert_eq!(spliced.header, format!("{}EDGE", header));
        assert_eq!(spliced.body, "abcdefghij");
    }

    #[test]
    fn test_gap_starting_at_boundary_goes_to_body() {
        let msg = base();
        let mut combination = Combination::new();
        combination.insert(body_location(&msg, 0, 10), Payload::literal("whole"));

        let mutated = inject(&msg, &combination).unwrap();
        assert_eq!(mutated.request_body, "whole");
        assert_eq!(mutated.request_header.content_length(), Some(5));
    }

    #[test]
    fn test_broken_header_keeps_previous_header() {
        let msg = base();
        let boundary = msg.request_header_text().len();

        let mut combination = Combination::new();
        combination.insert(FuzzLocation::new(boundary, boundary), Payload::literal("junk"));
        combination.insert(body_location(&msg, 0, 2), Payload::literal("12345"));

        let mutated = inject(&msg, &combination).unwrap();
        assert_eq!(mutated.request_header.uri, "http://example.com/form");
        assert_eq!(mutated.request_body, "12345cdefghij");
        assert_eq!(mutated.request_header.content_length(), Some(13));
    }

    #[test]
    fn test_overlapping_locations_rejected() {
        let msg = base();
        let mut combination = Combination::new();
        combination.insert(body_location(&msg, 0, 5), Payload::literal("a"));
        combination.insert(body_location(&msg, 3, 8), Payload::literal("b"));

        assert!(matches!(
            inject(&msg, &combination),
            Err(FuzzerError::OverlappingGaps { .. })
        ));
    }

    #[test]
    fn test_straddling_and_out_of_range_rejected() {
        let msg = base();
        let boundary = msg.request_header_text().len();

        let mut straddle = Combination::new();
        straddle.insert(FuzzLocation::new(boundary - 2, boundary + 2), Payload::literal("x"));
        assert!(matches!(
            inject(&msg, &straddle),
            Err(FuzzerError::StraddlesBoundary { .. })
        ));

        let mut past_end = Combination::new();
        past_end.insert(body_location(&msg, 5, 11), Payload::literal("x"));
        assert!(matches!(
            inject(&msg, &past_end),
            Err(FuzzerError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn test_multibyte_body_offsets() {
        let msg = HttpMessage::from_raw_request(
            "POST http://t/ HTTP/1.1\r\nContent-Length: 6\r\n\r\nxé yz",
        )
        .unwrap();

        let mut inside_char = Combination::new();
        inside_char.insert(body_location(&msg, 2, 3), Payload::literal("!"));
        assert!(inject(&msg, &inside_char).is_err());

        let mut ok = Combination::new();
        ok.insert(body_location(&msg, 1, 3), Payload::literal("e"));
        let mutated = inject(&msg, &ok).unwrap();
        assert_eq!(mutated.request_body, "xe yz");
        assert_eq!(mutated.request_header.content_length(), Some(5));
    }
}
