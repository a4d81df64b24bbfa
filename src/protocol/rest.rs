//! URL-template REST dialect (spec.md §4.4 "REST"), layered over HTTP/1.1
//! framing. Template registration accepts `{name}` placeholders anywhere
//! inside a segment, not only whole-segment — a supplement pulled from
//! `original_source/src/protocol_rest.hpp` (e.g. `/v{version}/books/{id}`)
//! since nothing in the Non-goals excludes it.

use super::{Call, HttpState};
use crate::errors::CoreError;
use crate::scratch::ScratchSpace;
use serde_json::Value;

#[derive(Debug, Clone)]
enum SegmentPart {
    Literal(String),
    Placeholder(String),
}

/// A compiled `METHOD /a/{x}/b/{y}` registration.
#[derive(Debug, Clone)]
pub struct RestTemplate {
    pub method: String,
    pub pattern: String,
    segments: Vec<Vec<SegmentPart>>,
}

impl RestTemplate {
    pub fn compile(method: &str, pattern: &str) -> Result<Self, CoreError> {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(compile_segment)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { method: method.to_ascii_uppercase(), pattern: pattern.to_string(), segments })
    }

    /// Matches strictly by equal segment count (spec.md §9 resolved open
    /// question).
    fn matches<'a>(&self, method: &str, path_segments: &[&'a str]) -> Option<Vec<(String, String)>> {
        if !self.method.eq_ignore_ascii_case(method) || path_segments.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (template_seg, actual) in self.segments.iter().zip(path_segments.iter()) {
            match_segment(template_seg, actual, &mut captured)?;
        }
        Some(captured)
    }
}

fn compile_segment(segment: &str) -> Result<Vec<SegmentPart>, CoreError> {
    let mut parts = Vec::new();
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(SegmentPart::Literal(rest[..open].to_string()));
        }
        let close = rest[open..].find('}').ok_or(CoreError::InvalidFraming)?;
        let name = &rest[open + 1..open + close];
        parts.push(SegmentPart::Placeholder(name.to_string()));
        rest = &rest[open + close + 1..];
    }
    if !rest.is_empty() {
        parts.push(SegmentPart::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn match_segment(parts: &[SegmentPart], actual: &str, out: &mut Vec<(String, String)>) -> Option<()> {
    let mut cursor = actual;
    for (i, part) in parts.iter().enumerate() {
        match part {
            SegmentPart::Literal(lit) => {
                cursor = cursor.strip_prefix(lit.as_str())?;
            }
            SegmentPart::Placeholder(name) => {
                let next_literal = parts[i + 1..].iter().find_map(|p| match p {
                    SegmentPart::Literal(l) => Some(l.as_str()),
                    _ => None,
                });
                let (value, remainder) = match next_literal {
                    Some(lit) => {
                        let pos = cursor.find(lit)?;
                        (&cursor[..pos], &cursor[pos..])
                    }
                    None => (cursor, ""),
                };
                if value.is_empty() {
                    return None;
                }
                out.push((name.clone(), value.to_string()));
                cursor = remainder;
            }
        }
    }
    cursor.is_empty().then_some(())
}

#[derive(Default)]
pub struct RestState {
    pub http: HttpState,
    pub templates: Vec<RestTemplate>,
    pub calls: Vec<Call>,
    pub matched_params: Vec<(String, String)>,
    pub must_close: bool,
}

impl RestState {
    pub fn new(templates: Vec<RestTemplate>) -> Self {
        Self { templates, ..Default::default() }
    }

    pub fn reset(&mut self) {
        self.http.reset();
        self.calls.clear();
        self.matched_params.clear();
        self.must_close = false;
    }

    pub fn parse_headers(&mut self, span: &[u8]) -> Result<(), CoreError> {
        self.http.parse_headers(span)?;
        self.must_close = self.http.must_close;
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.http.header(name)
    }

    pub fn parse_content(&mut self, span: &[u8], scratch: &mut ScratchSpace) -> Result<(), CoreError> {
        self.calls.clear();
        self.matched_params.clear();

        let path_segments: Vec<&str> =
            self.http.path.split('/').filter(|s| !s.is_empty()).collect();

        let matched = self
            .templates
            .iter()
            .find_map(|t| t.matches(&self.http.method, &path_segments).map(|p| (t, p)));

        let Some((template, params)) = matched else {
            return Err(CoreError::NoRoute);
        };
        self.matched_params = params;

        let is_json = self.header("content-type").map(|ct| ct.starts_with("application/json")).unwrap_or(false);
        let body = self.http.body(span);
        let params_value = if is_json && !body.is_empty() {
            scratch.decode(body)?.clone()
        } else {
            Value::Null
        };

        self.calls.push(Call {
            id: None,
            method: template.pattern.clone(),
            params: params_value,
            is_notification: false,
            raw: None,
        });
        Ok(())
    }

    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.matched_params.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_segment_placeholder_matches() {
        let template = RestTemplate::compile("GET", "/books/{id}").unwrap();
        let got = template.matches("GET", &["books", "42"]).unwrap();
        assert_eq!(got, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn partial_segment_placeholder_matches() {
        let template = RestTemplate::compile("GET", "/v{version}/books/{id}").unwrap();
        let got = template.matches("GET", &["v2", "books", "42"]).unwrap();
        assert_eq!(
            got,
            vec![("version".to_string(), "2".to_string()), ("id".to_string(), "42".to_string())]
        );
    }

    #[test]
    fn segment_count_mismatch_rejects() {
        let template = RestTemplate::compile("GET", "/books/{id}").unwrap();
        assert!(template.matches("GET", &["books", "42", "reviews"]).is_none());
        assert!(template.matches("GET", &["books"]).is_none());
    }

    #[test]
    fn method_mismatch_rejects() {
        let template = RestTemplate::compile("GET", "/books/{id}").unwrap();
        assert!(template.matches("POST", &["books", "42"]).is_none());
    }
}
