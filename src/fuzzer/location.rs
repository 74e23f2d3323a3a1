//! Fuzz locations and gaps
//!
//! A location is a half-open byte interval into the request header text
//! followed by the request body text.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::payloads::Payload;
use crate::error::FuzzerError;
use crate::http::HttpMessage;

/// Half-open interval `[begin, end)`; ordered by `begin`, then `end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuzzLocation {
    begin: usize,
    end: usize,
}

impl FuzzLocation {
    /// Panics if `begin > end`; use [`FuzzLocation::try_new`] for untrusted input.
    pub fn new(begin: usize, end: usize) -> Self {
        assert!(begin <= end, "location begin {} after end {}", begin, end);
        Self { begin, end }
    }

    pub fn try_new(begin: usize, end: usize) -> Result<Self, FuzzerError> {
        if begin > end {
            return Err(FuzzerError::InvalidLocation { begin, end, len: end });
        }
        Ok(Self { begin, end })
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Touching intervals do not overlap
    pub fn overlaps(&self, other: &FuzzLocation) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// One payload per location for a single fuzz attempt
pub type Combination = BTreeMap<FuzzLocation, Payload>;

/// A location on a base message with its candidate payloads
#[derive(Debug, Clone)]
pub struct FuzzGap {
    location: FuzzLocation,
    payloads: Vec<Payload>,
    message: Arc<HttpMessage>,
}

impl FuzzGap {
    pub fn new(location: FuzzLocation, message: Arc<HttpMessage>) -> Self {
        Self {
            location,
            payloads: Vec::new(),
            message,
        }
    }

    pub fn location(&self) -> FuzzLocation {
        self.location
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn message(&self) -> &Arc<HttpMessage> {
        &self.message
    }

    pub fn add_payload(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }

    pub fn add_payloads(&mut self, payloads: impl IntoIterator<Item = Payload>) {
        self.payloads.extend(payloads);
    }

    pub fn remove_payload(&mut self, index: usize) -> Option<Payload> {
        (index < self.payloads.len()).then(|| self.payloads.remove(index))
    }

    /// The base text this gap covers
    pub fn original_value(&self) -> Result<String, FuzzerError> {
        let header = self.message.request_header_text();
        let body = self.message.request_body_text();
        let combined_len = header.len() + body.len();
        let (begin, end) = (self.location.begin, self.location.end);

        let invalid = FuzzerError::InvalidLocation { begin, end, len: combined_len };
        if end <= header.len() {
            header.get(begin..end).map(str::to_string).ok_or(invalid)
        } else if begin >= header.len() {
            body.get(begin - header.len()..end - header.len())
                .map(str::to_string)
                .ok_or(invalid)
        } else {
            Err(FuzzerError::StraddlesBoundary { begin, end, boundary: header.len() })
        }
    }
}

/// The gaps attached to one base message; pairwise non-overlapping
#[derive(Debug, Clone, Default)]
pub struct FuzzGapSet {
    gaps: Vec<FuzzGap>,
}

impl FuzzGapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping the set sorted; rejects a gap overlapping an existing one
    pub fn add(&mut self, gap: FuzzGap) -> Result<(), FuzzerError> {
        if let Some(existing) = self.gaps.iter().find(|g| g.location.overlaps(&gap.location)) {
            return Err(FuzzerError::OverlappingGaps {
                first_begin: existing.location.begin,
                first_end: existing.location.end,
                second_begin: gap.location.begin,
                second_end: gap.location.end,
            });
        }
        let pos = self.gaps.partition_point(|g| g.location <= gap.location);
        self.gaps.insert(pos, gap);
        Ok(())
    }

    pub fn remove(&mut self, location: &FuzzLocation) -> Option<FuzzGap> {
        let index = self.gaps.iter().position(|g| &g.location == location)?;
        Some(self.gaps.remove(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FuzzGap> {
        self.gaps.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FuzzGap> {
        self.gaps.iter()
    }

    pub fn as_slice(&self) -> &[FuzzGap] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<HttpMessage> {
        Arc::new(
            HttpMessage::from_raw_request(
                "POST http://t/ HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcdefghij",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_overlap() {
        assert!(FuzzLocation::new(0, 10).overlaps(&FuzzLocation::new(5, 15)));
        assert!(!FuzzLocation::new(0, 5).overlaps(&FuzzLocation::new(5, 10)));
        assert!(!FuzzLocation::new(5, 10).overlaps(&FuzzLocation::new(0, 5)));
        assert!(FuzzLocation::new(2, 3).overlaps(&FuzzLocation::new(0, 10)));
    }

    #[test]
    fn test_ordering_by_begin() {
        let mut locations = vec![
            FuzzLocation::new(20, 25),
            FuzzLocation::new(3, 4),
            FuzzLocation::new(10, 12),
        ];
        locations.sort();
        let begins: Vec<usize> = locations.iter().map(|l| l.begin()).collect();
        assert_eq!(begins, vec![3, 10, 20]);
    }

    #[test]
    fn test_try_new_rejects_inverted() {
        assert!(FuzzLocation::try_new(5, 2).is_err());
        assert_eq!(FuzzLocation::try_new(2, 5).unwrap().len(), 3);
    }

    #[test]
    fn test_gap_set_rejects_overlap() {
        let msg = base();
        let mut set = FuzzGapSet::new();
        set.add(FuzzGap::new(FuzzLocation::new(10, 20), msg.clone())).unwrap();
        set.add(FuzzGap::new(FuzzLocation::new(0, 5), msg.clone())).unwrap();
        set.add(FuzzGap::new(FuzzLocation::new(20, 22), msg.clone())).unwrap();

        let err = set.add(FuzzGap::new(FuzzLocation::new(4, 11), msg)).unwrap_err();
        assert!(matches!(err, FuzzerError::OverlappingGaps { first_begin: 0, second_begin: 4, .. }));

        let begins: Vec<usize> = set.iter().map(|g| g.location().begin()).collect();
        assert_eq!(begins, vec![0, 10, 20]);

        assert!(set.remove(&FuzzLocation::new(10, 20)).is_some());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_original_value() {
        let msg = base();
        let header_len = msg.request_header_text().len();

        let body_gap = FuzzGap::new(FuzzLocation::new(header_len + 2, header_len + 5), msg.clone());
        assert_eq!(body_gap.original_value().unwrap(), "cde");

        let header_gap = FuzzGap::new(FuzzLocation::new(0, 4), msg.clone());
        assert_eq!(header_gap.original_value().unwrap(), "POST");

        let straddling = FuzzGap::new(FuzzLocation::new(header_len - 1, header_len + 1), msg);
        assert!(matches!(
            straddling.original_value(),
            Err(FuzzerError::StraddlesBoundary { .. })
        ));
    }

    #[test]
    fn test_payload_add_remove() {
        let mut gap = FuzzGap::new(FuzzLocation::new(0, 1), base());
        gap.add_payloads([Payload::literal("a"), Payload::literal("b")]);
        gap.add_payload(Payload::literal("c"));
        assert_eq!(gap.remove_payload(1), Some(Payload::literal("b")));
        assert_eq!(gap.remove_payload(9), None);
        assert_eq!(gap.payloads().len(), 2);
    }
}
