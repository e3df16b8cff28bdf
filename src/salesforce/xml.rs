//! Decoding of async bulk API XML responses.
//!
//! Salesforce qualifies every element with the `asyncapi/dataload`
//! namespace, and may or may not use a prefix for it. Elements are matched on
//! their local name only. Fields a caller relies on are required: a missing
//! element or an unparsable counter is a `MalformedResponse`, never a silent
//! zero.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::AppError;
use crate::salesforce::types::{BatchRecord, BatchState, ProgressSnapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Element tree
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded element: local name, concatenated text, child elements.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn named(raw: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(raw).into_owned(),
            ..Self::default()
        }
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of a required direct child.
    pub fn required_text(&self, name: &str) -> Result<&str, AppError> {
        self.child(name).map(|c| c.text.as_str()).ok_or_else(|| {
            AppError::MalformedResponse(format!("<{}> is missing <{}>", self.name, name))
        })
    }

    /// Required direct child parsed as a non-negative counter.
    pub fn required_u64(&self, name: &str) -> Result<u64, AppError> {
        let text = self.required_text(name)?;
        text.trim().parse::<u64>().map_err(|_| {
            AppError::MalformedResponse(format!(
                "<{}> in <{}> is not a counter: '{}'",
                name, self.name, text
            ))
        })
    }
}

/// Parses a whole document into its root element.
pub(crate) fn parse_document(body: &str) -> Result<Element, AppError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::named(e.local_name().as_ref())),
            Ok(Event::Empty(e)) => {
                attach(&mut stack, &mut root, Element::named(e.local_name().as_ref()))
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    AppError::MalformedResponse("Unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(t)) => {
                if let Some(open) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| {
                        AppError::MalformedResponse(format!("Invalid XML text: {}", e))
                    })?;
                    open.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AppError::MalformedResponse(format!(
                    "Invalid XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(AppError::MalformedResponse(
            "Document ended inside an element".to_string(),
        ));
    }
    root.ok_or_else(|| AppError::MalformedResponse("Empty XML document".to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoders
// ─────────────────────────────────────────────────────────────────────────────

/// `<id>` of a `jobInfo` document. May be empty; the caller decides.
pub fn decode_job_id(body: &str) -> Result<String, AppError> {
    let root = parse_document(body)?;
    Ok(root.required_text("id")?.trim().to_string())
}

/// `<state>` of a `jobInfo` document.
pub fn decode_job_state(body: &str) -> Result<String, AppError> {
    let root = parse_document(body)?;
    Ok(root.required_text("state")?.trim().to_string())
}

/// `<jobId>` of a `batchInfo` document.
pub fn decode_batch_job_id(body: &str) -> Result<String, AppError> {
    let root = parse_document(body)?;
    Ok(root.required_text("jobId")?.trim().to_string())
}

/// Batch counters of a `jobInfo` document.
pub fn decode_progress(body: &str) -> Result<ProgressSnapshot, AppError> {
    let root = parse_document(body)?;
    Ok(ProgressSnapshot {
        batches_completed: root.required_u64("numberBatchesCompleted")?,
        batches_total: root.required_u64("numberBatchesTotal")?,
        records_processed: root.required_u64("numberRecordsProcessed")?,
    })
}

/// Every entry of a `batchInfoList` document, in server order.
pub fn decode_batch_list(body: &str) -> Result<Vec<BatchRecord>, AppError> {
    let root = parse_document(body)?;
    root.children.iter().map(decode_batch_info).collect()
}

fn decode_batch_info(info: &Element) -> Result<BatchRecord, AppError> {
    let state_text = info.required_text("state")?.trim();
    let state = BatchState::parse(state_text).ok_or_else(|| {
        AppError::MalformedResponse(format!("Unknown batch state '{}'", state_text))
    })?;

    Ok(BatchRecord {
        batch_id: info.required_text("id")?.trim().to_string(),
        job_id: info.required_text("jobId")?.trim().to_string(),
        state,
        records_processed: info.required_u64("numberRecordsProcessed")?,
        result_handles: Vec::new(),
    })
}

/// Result-set handles of a `result-list` document, in server order.
pub fn decode_result_list(body: &str) -> Result<Vec<String>, AppError> {
    let root = parse_document(body)?;
    Ok(root
        .children
        .iter()
        .filter(|c| c.name == "result")
        .map(|c| c.text.trim().to_string())
        .collect())
}

/// Error document returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Decodes an `<error>` document; `None` when the body is something else.
pub fn decode_api_error(body: &str) -> Option<ApiError> {
    let root = parse_document(body).ok()?;
    if root.name != "error" {
        return None;
    }
    Some(ApiError {
        code: root.child("exceptionCode")?.text.trim().to_string(),
        message: root
            .child("exceptionMessage")
            .map(|m| m.text.trim().to_string())
            .unwrap_or_default(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
