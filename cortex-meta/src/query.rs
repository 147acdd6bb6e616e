//! The query language:
//!
//! ```text
//! <tag>:<prop>[@<mintime>[,<maxtime>]][#<limit>][*<by>][=<literal>]
//! ```
//!
//! The literal grammar is explicit and bounded: integers with base
//! prefixes, quoted strings, and tuples of those. Nothing else parses.

use serde::{Deserialize, Serialize};

use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::{parse_int, Guid, Valu};
use cortex_storage::ApiCall;

/// A parsed query. `unparse` renders the canonical text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub tag: String,
    pub prop: String,
    pub valu: Option<Valu>,
    pub mintime: Option<i64>,
    pub maxtime: Option<i64>,
    pub limit: Option<usize>,
    pub by: Option<String>,
}

impl QuerySpec {
    /// Parse a query string. Section order: the literal after the first
    /// `=`, then `*by`, `#limit`, `@mintime[,maxtime]`, and finally the
    /// `tag:prop` split on the first colon.
    pub fn parse(text: &str) -> CortexResult<Self> {
        let bad = |mesg: String| CortexError::BadQuerySyntax {
            query: text.to_string(),
            mesg,
        };

        let mut lhs = text;
        let mut valu = None;
        if let Some((left, right)) = lhs.split_once('=') {
            lhs = left;
            valu = Some(parse_literal(right.trim()).map_err(&bad)?);
        }

        let mut by = None;
        if let Some((left, right)) = lhs.split_once('*') {
            lhs = left;
            let name = right.trim();
            if name.is_empty() {
                return Err(bad("empty by-strategy".to_string()));
            }
            by = Some(name.to_ascii_lowercase());
        }

        let mut limit = None;
        if let Some((left, right)) = lhs.split_once('#') {
            lhs = left;
            let count =
                parse_int(right).ok_or_else(|| bad(format!("bad limit {right:?}")))?;
            if count < 0 {
                return Err(bad("negative limit".to_string()));
            }
            limit = Some(count as usize);
        }

        let mut mintime = None;
        let mut maxtime = None;
        if let Some((left, right)) = lhs.split_once('@') {
            lhs = left;
            let (min, max) = match right.split_once(',') {
                Some((min, max)) => (min, Some(max)),
                None => (right, None),
            };
            mintime = Some(parse_int(min).ok_or_else(|| bad(format!("bad mintime {min:?}")))?);
            if let Some(max) = max {
                maxtime =
                    Some(parse_int(max).ok_or_else(|| bad(format!("bad maxtime {max:?}")))?);
            }
        }

        let (tag, prop) = lhs
            .split_once(':')
            .ok_or_else(|| bad("expected <tag>:<prop>".to_string()))?;
        let tag = tag.trim().to_ascii_lowercase();
        let prop = prop.trim().to_ascii_lowercase();
        if tag.is_empty() || prop.is_empty() {
            return Err(bad("empty tag or prop".to_string()));
        }

        Ok(Self {
            tag,
            prop,
            valu,
            mintime,
            maxtime,
            limit,
            by,
        })
    }

    /// Render the canonical text form. Over canonical queries
    /// `parse(unparse(spec)) == spec`.
    pub fn unparse(&self) -> String {
        let mut text = format!("{}:{}", self.tag, self.prop);
        if let Some(min) = self.mintime {
            text.push('@');
            text.push_str(&min.to_string());
            if let Some(max) = self.maxtime {
                text.push(',');
                text.push_str(&max.to_string());
            }
        }
        if let Some(limit) = self.limit {
            text.push('#');
            text.push_str(&limit.to_string());
        }
        if let Some(by) = &self.by {
            text.push('*');
            text.push_str(by);
        }
        if let Some(valu) = &self.valu {
            text.push('=');
            text.push_str(&render_literal(valu));
        }
        text
    }

    // --- Dispatch selection: which async api serves each query kind ---

    pub(crate) fn rows_call(&self) -> CortexResult<ApiCall> {
        if let Some(by) = &self.by {
            return Ok(ApiCall::GetRowsBy {
                by: by.clone(),
                prop: self.prop.clone(),
                valu: self.req_valu()?,
                limit: self.limit,
            });
        }
        if self.prop == "id" {
            return Ok(ApiCall::GetRowsById { id: self.req_id()? });
        }
        Ok(ApiCall::GetRowsByProp {
            prop: self.prop.clone(),
            valu: self.valu.clone(),
            mintime: self.mintime,
            maxtime: self.maxtime,
            limit: self.limit,
        })
    }

    pub(crate) fn join_call(&self) -> CortexResult<ApiCall> {
        if let Some(by) = &self.by {
            return Ok(ApiCall::GetJoinBy {
                by: by.clone(),
                prop: self.prop.clone(),
                valu: self.req_valu()?,
                limit: self.limit,
            });
        }
        if self.prop == "id" {
            return Ok(ApiCall::GetJoinById { id: self.req_id()? });
        }
        Ok(ApiCall::GetJoinByProp {
            prop: self.prop.clone(),
            valu: self.valu.clone(),
            mintime: self.mintime,
            maxtime: self.maxtime,
            limit: self.limit,
        })
    }

    pub(crate) fn size_call(&self) -> CortexResult<ApiCall> {
        if let Some(by) = &self.by {
            return Ok(ApiCall::GetSizeBy {
                by: by.clone(),
                prop: self.prop.clone(),
                valu: self.req_valu()?,
            });
        }
        if self.prop == "id" {
            return Ok(ApiCall::GetSizeById { id: self.req_id()? });
        }
        Ok(ApiCall::GetSizeByProp {
            prop: self.prop.clone(),
            valu: self.valu.clone(),
            mintime: self.mintime,
            maxtime: self.maxtime,
        })
    }

    fn req_valu(&self) -> CortexResult<Valu> {
        self.valu.clone().ok_or_else(|| CortexError::BadQuerySyntax {
            query: self.unparse(),
            mesg: "by-strategy requires a value".to_string(),
        })
    }

    fn req_id(&self) -> CortexResult<Guid> {
        match &self.valu {
            Some(Valu::Str(text)) => Guid::parse(text),
            _ => Err(CortexError::BadQuerySyntax {
                query: self.unparse(),
                mesg: "id queries take a guid string value".to_string(),
            }),
        }
    }
}

fn render_literal(valu: &Valu) -> String {
    match valu {
        Valu::Int(v) => v.to_string(),
        Valu::Str(s) => format!("\"{s}\""),
        // Bytes are not expressible in the grammar; render as quoted hex.
        Valu::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("\"{hex}\"")
        }
        Valu::List(items) => {
            let parts: Vec<String> = items.iter().map(render_literal).collect();
            format!("({})", parts.join(","))
        }
    }
}

fn parse_literal(text: &str) -> Result<Valu, String> {
    let text = text.trim();
    if let Some(body) = text.strip_prefix('(') {
        let body = body
            .strip_suffix(')')
            .ok_or_else(|| "unterminated tuple".to_string())?;
        let raw = split_scalars(body)?;
        let mut items = Vec::new();
        for (off, part) in raw.iter().enumerate() {
            let part = part.trim();
            if part.is_empty() {
                // A single trailing comma is allowed.
                if off + 1 == raw.len() {
                    continue;
                }
                return Err("empty tuple element".to_string());
            }
            items.push(parse_scalar(part)?);
        }
        return Ok(Valu::List(items));
    }
    parse_scalar(text)
}

/// Split tuple elements on commas outside quotes.
fn split_scalars(body: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (off, ch) in body.char_indices() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == ',' => {
                parts.push(&body[start..off]);
                start = off + 1;
            }
            None => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated string".to_string());
    }
    parts.push(&body[start..]);
    Ok(parts)
}

fn parse_scalar(text: &str) -> Result<Valu, String> {
    if let Some(body) = strip_quoted(text, '"').or_else(|| strip_quoted(text, '\'')) {
        return Ok(Valu::Str(body.to_string()));
    }
    match parse_int(text) {
        Some(v) => Ok(Valu::Int(v)),
        None => Err(format!("{text:?} is not a literal")),
    }
}

fn strip_quoted(text: &str, quote: char) -> Option<&str> {
    let body = text.strip_prefix(quote)?.strip_suffix(quote)?;
    if body.contains(quote) {
        return None;
    }
    Some(body)
}
