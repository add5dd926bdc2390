//! Line codec for the bracketed array grammar shared with the controller firmware.
//!
//! ```text
//! frame := "[" field ("," field)* "]"
//! field := decimal-literal | "NaN" | "nan" | "_"
//! ```
//!
//! Any line containing `!` is an event line and bypasses the frame grammar.

use serde::{Deserialize, Serialize};

/// One positional value of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Number(f64),
    /// Explicit NaN on the wire.
    NotANumber,
    /// `_` placeholder: the receiver keeps its previous value for this slot.
    Unchanged,
}

impl Field {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Field::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Field::Unchanged)
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Field::NotANumber
        } else {
            Field::Number(value)
        }
    }
}

impl From<Option<f64>> for Field {
    fn from(value: Option<f64>) -> Self {
        value.map(Field::from).unwrap_or(Field::Unchanged)
    }
}

/// Fixed-length ordered sequence of fields. Position is the only identifier of meaning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    fields: Vec<Field>,
}

impl Frame {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// A frame of `len` placeholders.
    pub fn unchanged(len: usize) -> Self {
        Self { fields: vec![Field::Unchanged; len] }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Field> {
        self.fields.get(index).copied()
    }

    /// Replace the field at `index`. Returns false if the index is out of range.
    pub fn set(&mut self, index: usize, field: Field) -> bool {
        match self.fields.get_mut(index) {
            Some(slot) => {
                *slot = field;
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

impl From<Vec<Field>> for Frame {
    fn from(fields: Vec<Field>) -> Self {
        Self::new(fields)
    }
}

impl AsRef<[Field]> for Frame {
    fn as_ref(&self) -> &[Field] {
        &self.fields
    }
}

/// What the decoder does with a token that is not a number, `NaN` or `_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnBadToken {
    TreatAsUnchanged,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Decimal places for encoded numbers; `None` writes the shortest exact form.
    #[serde(default)]
    pub decimals: Option<usize>,
    pub on_bad_token: OnBadToken,
    /// Accept the firmware's `[a, b, ]` print style, where an empty final segment is not a field.
    #[serde(default)]
    pub allow_trailing_separator: bool,
}

impl CodecConfig {
    pub fn new(on_bad_token: OnBadToken) -> Self {
        Self {
            decimals: None,
            on_bad_token,
            allow_trailing_separator: false,
        }
    }

    pub fn with_decimals(mut self, decimals: usize) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn with_trailing_separator(mut self, allow: bool) -> Self {
        self.allow_trailing_separator = allow;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Not a valid array ({open} '[' and {close} ']')")]
    NotAnArray { open: usize, close: usize },

    #[error("Incorrect array size: expected {expected} fields, found {found}")]
    WrongArity { expected: usize, found: usize },

    #[error("Unparseable token {token:?} at position {index}")]
    BadToken { index: usize, token: String },
}

/// Kind of a received line, decided before any frame validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Event,
    Telemetry,
    Blank,
}

pub fn classify(line: &str) -> LineKind {
    if line.contains('!') {
        LineKind::Event
    } else if line.trim().is_empty() {
        LineKind::Blank
    } else {
        LineKind::Telemetry
    }
}

/// Alarm tag of an event line: the text after the first `!`, e.g. `overheat`.
pub fn event_tag(line: &str) -> Option<&str> {
    line.split_once('!').map(|(_, tag)| tag.trim())
}

/// Encode fields as one bracketed line (without the trailing newline).
///
/// Exactly one token is written per field, so a frame of `N` fields always
/// carries `N - 1` commas.
pub fn encode(fields: &[Field], config: &CodecConfig) -> String {
    let mut line = String::with_capacity(2 + fields.len() * 8);
    line.push('[');
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_field(&mut line, field, config.decimals);
    }
    line.push(']');
    line
}

fn push_field(out: &mut String, field: &Field, decimals: Option<usize>) {
    use std::fmt::Write;

    match field {
        Field::Number(v) if v.is_finite() => {
            let _ = match decimals {
                Some(places) => write!(out, "{:.*}", places, v),
                None => write!(out, "{}", v),
            };
        }
        Field::Number(_) | Field::NotANumber => out.push_str("NaN"),
        Field::Unchanged => out.push('_'),
    }
}

/// Decode a received line into exactly `expected_len` fields.
///
/// The whole line is validated before any token is parsed, so a corrupt line
/// yields an error and never a partial frame.
pub fn decode(line: &str, expected_len: usize, config: &CodecConfig) -> Result<Frame, DecodeError> {
    let (open, close, commas) = line.bytes().fold((0usize, 0usize, 0usize), |(open, close, commas), b| match b {
        b'[' => (open + 1, close, commas),
        b']' => (open, close + 1, commas),
        b',' if open > 0 && close == 0 => (open, close, commas + 1),
        _ => (open, close, commas),
    });

    if open != 1 || close != 1 {
        return Err(DecodeError::NotAnArray { open, close });
    }
    let (start, end) = match (line.find('['), line.find(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => return Err(DecodeError::NotAnArray { open, close }),
    };
    let body = &line[start + 1..end];

    let mut field_count = commas + 1;
    if config.allow_trailing_separator && commas > 0 {
        let last = body.rsplit(',').next().unwrap_or_default();
        if last.trim().is_empty() {
            field_count -= 1;
        }
    }
    if field_count != expected_len {
        return Err(DecodeError::WrongArity {
            expected: expected_len,
            found: field_count,
        });
    }

    let mut fields = Vec::with_capacity(expected_len);
    for (index, raw) in body.split(',').take(field_count).enumerate() {
        fields.push(parse_token(raw.trim(), index, config.on_bad_token)?);
    }
    Ok(Frame::new(fields))
}

fn parse_token(token: &str, index: usize, policy: OnBadToken) -> Result<Field, DecodeError> {
    if token == "_" {
        return Ok(Field::Unchanged);
    }
    if is_nan_token(token) {
        return Ok(Field::NotANumber);
    }
    // A token without any digit is never handed to the number parser.
    if token.bytes().any(|b| b.is_ascii_digit()) {
        if let Some(value) = parse_leading_float(token) {
            return Ok(Field::Number(value));
        }
    }
    match policy {
        OnBadToken::TreatAsUnchanged => {
            log::debug!("Treating token {:?} at position {} as unchanged", token, index);
            Ok(Field::Unchanged)
        }
        OnBadToken::Fail => Err(DecodeError::BadToken {
            index,
            token: token.to_string(),
        }),
    }
}

fn is_nan_token(token: &str) -> bool {
    token
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(token)
        .eq_ignore_ascii_case("nan")
}

/// Parse the floating literal at the start of `token`, ignoring whatever follows it.
fn parse_leading_float(token: &str) -> Option<f64> {
    let bytes = token.as_bytes();
    let digits_from = |mut at: usize| {
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
        }
        at
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut digit_count = int_end - end;
    end = int_end;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        digit_count += frac_end - (end + 1);
        end = frac_end;
    }
    if digit_count == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_start = end + 1;
        if matches!(bytes.get(exp_start), Some(b'+' | b'-')) {
            exp_start += 1;
        }
        let exp_end = digits_from(exp_start);
        if exp_end > exp_start {
            end = exp_end;
        }
    }

    token[..end].parse::<f64>().ok()
}
