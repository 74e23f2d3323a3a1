//! Fuzzing result records and groups
//!
//! Completed processes become [`FuzzRecord`]s. Records can be gathered into
//! [`FuzzRecordGroup`]s whose summary columns are recomputed from their
//! members whenever membership changes.

use super::process::{FuzzResult, FuzzResultState};
use crate::error::FuzzerError;
use crate::http::HttpMessage;

/// Status code shown when group members disagree
pub const STATUS_MIXED: i32 = -1;

/// One completed request
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzRecord {
    pub name: String,
    pub method: String,
    pub uri: String,
    /// Round trip time in milliseconds
    pub rtt_ms: u64,
    /// Response body size in bytes
    pub size: usize,
    /// HTTP status, or 0 when no response was received
    pub status: i32,
    pub reason: String,
    pub result: FuzzResultState,
    pub included: bool,
    /// Injected payload values
    pub payloads: Vec<String>,
}

impl FuzzRecord {
    pub fn from_message(
        name: impl Into<String>,
        message: &HttpMessage,
        result: FuzzResultState,
        payloads: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method: message.request_header.method.clone(),
            uri: message.request_header.uri.clone(),
            rtt_ms: message.rtt_ms,
            size: message.response_body.len(),
            status: message.status().map(i32::from).unwrap_or(0),
            reason: message.reason().unwrap_or("").to_string(),
            result,
            included: true,
            payloads,
        }
    }

    pub fn from_result(result: &FuzzResult) -> Self {
        Self::from_message(
            result.id.to_string(),
            &result.message,
            result.state.clone(),
            result.payloads.clone(),
        )
    }
}

/// A record or a nested group
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Record(FuzzRecord),
    Group(FuzzRecordGroup),
}

impl Entry {
    pub fn name(&self) -> String {
        match self {
            Entry::Record(record) => record.name.clone(),
            Entry::Group(group) => group.name(),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Entry::Record(record) => &record.method,
            Entry::Group(group) => &group.method,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Entry::Record(record) => &record.uri,
            Entry::Group(group) => &group.uri,
        }
    }

    pub fn rtt_ms(&self) -> u64 {
        match self {
            Entry::Record(record) => record.rtt_ms,
            Entry::Group(group) => group.avg_rtt_ms,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Entry::Record(record) => record.size,
            Entry::Group(group) => group.avg_size,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            Entry::Record(record) => record.status,
            Entry::Group(group) => group.status,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Entry::Record(record) => &record.reason,
            Entry::Group(group) => &group.reason,
        }
    }

    pub fn result(&self) -> &FuzzResultState {
        match self {
            Entry::Record(record) => &record.result,
            Entry::Group(group) => &group.result,
        }
    }

    pub fn is_included(&self) -> bool {
        match self {
            Entry::Record(record) => record.included,
            Entry::Group(group) => group.included,
        }
    }

    pub fn set_included(&mut self, included: bool) {
        match self {
            Entry::Record(record) => record.included = included,
            Entry::Group(group) => group.set_included(included),
        }
    }

    /// Leaf records in display order
    pub fn records(&self) -> Vec<&FuzzRecord> {
        match self {
            Entry::Record(record) => vec![record],
            Entry::Group(group) => group.members.iter().flat_map(Entry::records).collect(),
        }
    }
}

/// Records shown together under one summary row
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzRecordGroup {
    label: String,
    members: Vec<Entry>,
    pub included: bool,
    method: String,
    uri: String,
    avg_rtt_ms: u64,
    avg_size: usize,
    status: i32,
    reason: String,
    result: FuzzResultState,
}

impl FuzzRecordGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let mut group = Self {
            label: name.into(),
            members: Vec::new(),
            included: true,
            method: String::new(),
            uri: String::new(),
            avg_rtt_ms: 0,
            avg_size: 0,
            status: STATUS_MIXED,
            reason: String::new(),
            result: mixed_result(),
        };
        group.update();
        group
    }

    pub fn with_members(name: impl Into<String>, members: Vec<Entry>) -> Self {
        let mut group = Self::new(name);
        group.members = members;
        group.update();
        group
    }

    /// Display name: "<name> (<member count>)"
    pub fn name(&self) -> String {
        format!("{} ({})", self.label, self.members.len())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn members(&self) -> &[Entry] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Entry> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn avg_rtt_ms(&self) -> u64 {
        self.avg_rtt_ms
    }

    pub fn avg_size(&self) -> usize {
        self.avg_size
    }

    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn result(&self) -> &FuzzResultState {
        &self.result
    }

    pub fn add(&mut self, entry: Entry) {
        self.members.push(entry);
        self.update();
    }

    pub fn remove(&mut self, index: usize) -> Option<Entry> {
        if index >= self.members.len() {
            return None;
        }
        let entry = self.members.remove(index);
        self.update();
        Some(entry)
    }

    /// Applies to every member; the group flag itself is set too
    pub fn set_included(&mut self, included: bool) {
        self.included = included;
        for member in &mut self.members {
            member.set_included(included);
        }
    }

    /// Recompute summary columns from the members.
    ///
    /// Seeded from the first member; any later member that disagrees turns the
    /// column into its sentinel. Averages are truncating integer means.
    pub fn update(&mut self) {
        let first = match self.members.first() {
            Some(first) => first,
            None => {
                self.method.clear();
                self.uri.clear();
                self.avg_rtt_ms = 0;
                self.avg_size = 0;
                self.status = STATUS_MIXED;
                self.reason.clear();
                self.result = mixed_result();
                return;
            }
        };

        let mut method = first.method().to_string();
        let mut uri = first.uri().to_string();
        let mut status = first.status();
        let mut reason = first.reason().to_string();
        let mut result = first.result().clone();
        let mut rtt_total: u64 = 0;
        let mut size_total: usize = 0;

        for member in &self.members {
            rtt_total += member.rtt_ms();
            size_total += member.size();

            if member.method() != method {
                method.clear();
            }
            if member.uri() != uri {
                uri.clear();
            }
            if member.status() != status {
                status = STATUS_MIXED;
            }
            if member.reason() != reason {
                reason.clear();
            }
            if member.result() != &result {
                result = mixed_result();
            }
        }

        let count = self.members.len();
        self.method = method;
        self.uri = uri;
        self.status = status;
        self.reason = reason;
        self.result = result;
        self.avg_rtt_ms = rtt_total / count as u64;
        self.avg_size = size_total / count;
    }
}

fn mixed_result() -> FuzzResultState {
    FuzzResultState::Custom(String::new())
}

/// Top-level result rows of a fuzzing session
#[derive(Debug, Clone, Default)]
pub struct FuzzResultsModel {
    entries: Vec<Entry>,
}

impl FuzzResultsModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result. Results with token fetches become a group of the
    /// token rows followed by the fuzzed request.
    pub fn add_result(&mut self, result: &FuzzResult) {
        let record = FuzzRecord::from_result(result);

        if result.token_request_messages.is_empty() {
            self.entries.push(Entry::Record(record));
            return;
        }

        let mut members: Vec<Entry> = result
            .token_request_messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                Entry::Record(FuzzRecord::from_message(
                    format!("{}.{}", result.id, i + 1),
                    message,
                    FuzzResultState::AntiCsrfTokenRequest,
                    Vec::new(),
                ))
            })
            .collect();
        members.push(Entry::Record(record));

        self.entries.push(Entry::Group(FuzzRecordGroup::with_members(
            result.id.to_string(),
            members,
        )));
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move top-level entries into a new group placed at the lowest index
    pub fn group(&mut self, indices: &[usize], name: &str) -> Result<usize, FuzzerError> {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let first = match indices.first() {
            Some(&first) => first,
            None => return Err(FuzzerError::NoSuchEntry(0)),
        };
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.entries.len()) {
            return Err(FuzzerError::NoSuchEntry(bad));
        }

        let mut members = Vec::with_capacity(indices.len());
        for &index in indices.iter().rev() {
            members.push(self.entries.remove(index));
        }
        members.reverse();

        self.entries
            .insert(first, Entry::Group(FuzzRecordGroup::with_members(name, members)));
        Ok(first)
    }

    /// Replace a group with its members, in order
    pub fn ungroup(&mut self, index: usize) -> Result<usize, FuzzerError> {
        if index >= self.entries.len() {
            return Err(FuzzerError::NoSuchEntry(index));
        }

        let members = match self.entries.remove(index) {
            Entry::Group(group) => group.into_members(),
            record => {
                self.entries.insert(index, record);
                return Err(FuzzerError::NotAGroup(index));
            }
        };
        let count = members.len();
        self.entries.splice(index..index, members);
        Ok(count)
    }

    pub fn included_records(&self) -> impl Iterator<Item = &FuzzRecord> {
        self.entries
            .iter()
            .flat_map(Entry::records)
            .filter(|r| r.included)
    }

    /// Leaf counts per result label
    pub fn state_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in self.entries.iter().flat_map(Entry::records) {
            let label = record.result.label();
            match counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label.to_string(), 1)),
            }
        }
        counts
    }
}
