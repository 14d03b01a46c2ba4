//! `scanf`-style field extraction over one line of text.
//!
//! Conversion stops at the first field that does not match; fields converted
//! before that are returned. Suppressed (`%*d`) fields are consumed but not
//! returned.

use crate::error::{DxError, Result};
use std::iter::Peekable;
use std::str::Chars;

/// One converted field
#[derive(Debug, Clone, PartialEq)]
pub enum ScanValue {
    /// `%d`, `%i`
    Int(i64),
    /// `%u`, `%x`, `%o`
    UInt(u64),
    /// `%f`, `%e`, `%g`, `%a`
    Float(f64),
    /// `%s`, `%[...]`
    Str(String),
    /// `%c` (width characters, whitespace included)
    Chars(String),
}

impl ScanValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Chars(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntBase {
    Fixed(u32),
    Auto,
}

#[derive(Debug)]
enum Conversion {
    Signed(IntBase),
    Unsigned(u32),
    Float,
    Word,
    Chars,
    Set { negated: bool, members: Vec<SetItem> },
}

#[derive(Debug)]
enum SetItem {
    Char(char),
    Range(char, char),
}

#[derive(Debug)]
enum Directive {
    /// Any run of format whitespace: skips input whitespace
    Whitespace,
    Literal(char),
    /// `%%`: skips input whitespace, then matches `%`
    Percent,
    Field {
        suppress: bool,
        width: Option<usize>,
        conversion: Conversion,
    },
}

/// A parsed `scanf` format, checked up front so that a bad format is
/// reported before any input is consumed.
#[derive(Debug)]
pub struct ScanFormat {
    directives: Vec<Directive>,
}

impl ScanFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let mut directives = Vec::new();
        let mut fmt = format.chars().peekable();

        while let Some(c) = fmt.next() {
            if c.is_whitespace() {
                directives.push(Directive::Whitespace);
                continue;
            }
            if c != '%' {
                directives.push(Directive::Literal(c));
                continue;
            }
            if eat_char(&mut fmt, '%') {
                directives.push(Directive::Percent);
                continue;
            }

            let suppress = eat_char(&mut fmt, '*');
            let width = parse_width(&mut fmt)?;
            while fmt.next_if(|c| "hlLqjzt".contains(*c)).is_some() {}
            let conversion = parse_conversion(&mut fmt)?;
            directives.push(Directive::Field {
                suppress,
                width,
                conversion,
            });
        }

        Ok(Self { directives })
    }

    /// Match `input` and return the converted fields. Stops at the first
    /// directive that does not match.
    pub fn scan(&self, input: &str) -> Vec<ScanValue> {
        let mut values = Vec::new();
        let mut text = Input::new(input);

        for directive in &self.directives {
            match directive {
                Directive::Whitespace => text.skip_whitespace(),
                Directive::Literal(c) => {
                    if !text.eat(*c) {
                        break;
                    }
                }
                Directive::Percent => {
                    text.skip_whitespace();
                    if !text.eat('%') {
                        break;
                    }
                }
                Directive::Field {
                    suppress,
                    width,
                    conversion,
                } => match convert(&mut text, conversion, *width) {
                    Some(value) if !suppress => values.push(value),
                    Some(_) => {}
                    None => break,
                },
            }
        }

        values
    }
}

/// Run `format` against `input` and return the converted fields
pub fn scan_fields(input: &str, format: &str) -> Result<Vec<ScanValue>> {
    Ok(ScanFormat::parse(format)?.scan(input))
}

fn eat_char(fmt: &mut Peekable<Chars<'_>>, c: char) -> bool {
    fmt.next_if_eq(&c).is_some()
}

fn parse_width(fmt: &mut Peekable<Chars<'_>>) -> Result<Option<usize>> {
    let mut digits = String::new();
    while let Some(d) = fmt.next_if(char::is_ascii_digit) {
        digits.push(d);
    }
    if digits.is_empty() {
        return Ok(None);
    }
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => Err(DxError::InvalidScanFormat(format!("bad field width {}", digits))),
        Ok(width) => Ok(Some(width)),
    }
}

fn parse_conversion(fmt: &mut Peekable<Chars<'_>>) -> Result<Conversion> {
    let c = fmt
        .next()
        .ok_or_else(|| DxError::InvalidScanFormat("incomplete directive".to_string()))?;

    Ok(match c {
        'd' => Conversion::Signed(IntBase::Fixed(10)),
        'i' => Conversion::Signed(IntBase::Auto),
        'u' => Conversion::Unsigned(10),
        'x' | 'X' => Conversion::Unsigned(16),
        'o' => Conversion::Unsigned(8),
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' => Conversion::Float,
        's' => Conversion::Word,
        'c' => Conversion::Chars,
        '[' => parse_set(fmt)?,
        other => {
            return Err(DxError::InvalidScanFormat(format!(
                "unsupported conversion %{}",
                other
            )))
        }
    })
}

fn parse_set(fmt: &mut Peekable<Chars<'_>>) -> Result<Conversion> {
    let negated = eat_char(fmt, '^');
    let mut members = Vec::new();

    // A leading ']' is a member, not the terminator
    if eat_char(fmt, ']') {
        members.push(SetItem::Char(']'));
    }

    loop {
        let c = fmt
            .next()
            .ok_or_else(|| DxError::InvalidScanFormat("unterminated %[ set".to_string()))?;
        if c == ']' {
            break;
        }
        if fmt.peek() == Some(&'-') {
            let mut ahead = fmt.clone();
            ahead.next();
            match ahead.peek() {
                Some(&end) if end != ']' => {
                    fmt.next();
                    fmt.next();
                    members.push(SetItem::Range(c, end));
                    continue;
                }
                _ => {}
            }
        }
        members.push(SetItem::Char(c));
    }

    Ok(Conversion::Set { negated, members })
}

fn convert(text: &mut Input<'_>, conversion: &Conversion, width: Option<usize>) -> Option<ScanValue> {
    match conversion {
        Conversion::Chars | Conversion::Set { .. } => {}
        _ => text.skip_whitespace(),
    }
    let limit = width.unwrap_or(usize::MAX);

    match conversion {
        Conversion::Signed(base) => {
            let (negative, magnitude) = scan_integer(text, *base, limit)?;
            let value = if negative {
                (-(magnitude as i128)).max(i64::MIN as i128) as i64
            } else {
                magnitude.min(i64::MAX as u64) as i64
            };
            Some(ScanValue::Int(value))
        }
        Conversion::Unsigned(radix) => {
            let (negative, magnitude) = scan_integer(text, IntBase::Fixed(*radix), limit)?;
            let value = if negative { magnitude.wrapping_neg() } else { magnitude };
            Some(ScanValue::UInt(value))
        }
        Conversion::Float => scan_float(text, limit).map(ScanValue::Float),
        Conversion::Word => {
            let word = text.take_while(limit, |c| !c.is_whitespace());
            (!word.is_empty()).then_some(ScanValue::Str(word))
        }
        Conversion::Chars => {
            let count = width.unwrap_or(1);
            let taken = text.take_while(count, |_| true);
            (taken.chars().count() == count).then_some(ScanValue::Chars(taken))
        }
        Conversion::Set { negated, members } => {
            let matched = text.take_while(limit, |c| {
                let hit = members.iter().any(|item| match item {
                    SetItem::Char(m) => *m == c,
                    SetItem::Range(lo, hi) => (*lo..=*hi).contains(&c),
                });
                hit != *negated
            });
            (!matched.is_empty()).then_some(ScanValue::Str(matched))
        }
    }
}

/// Scan an optionally signed integer. Returns (negative, magnitude), with
/// the magnitude saturated at `u64::MAX`.
fn scan_integer(text: &mut Input<'_>, base: IntBase, limit: usize) -> Option<(bool, u64)> {
    let start = text.pos;
    let mut budget = limit;

    let mut negative = false;
    if budget > 0 {
        if let Some(sign @ ('+' | '-')) = text.peek() {
            negative = sign == '-';
            text.bump();
            budget -= 1;
        }
    }

    let radix = match base {
        IntBase::Fixed(16) => {
            skip_hex_prefix(text, &mut budget);
            16
        }
        IntBase::Fixed(radix) => radix,
        IntBase::Auto => {
            if skip_hex_prefix(text, &mut budget) {
                16
            } else if text.peek() == Some('0') {
                8
            } else {
                10
            }
        }
    };

    let digits = text.take_while(budget, |c| c.is_digit(radix));
    if digits.is_empty() {
        text.pos = start;
        return None;
    }

    let magnitude = digits.chars().fold(0u64, |acc, d| {
        acc.saturating_mul(radix as u64)
            .saturating_add(d.to_digit(radix).unwrap_or(0) as u64)
    });
    Some((negative, magnitude))
}

/// Consume `0x`/`0X` only when a hex digit follows, so a lone `0` still
/// parses as zero.
fn skip_hex_prefix(text: &mut Input<'_>, budget: &mut usize) -> bool {
    let rest = text.rest();
    let mut chars = rest.chars();
    if *budget >= 3
        && chars.next() == Some('0')
        && matches!(chars.next(), Some('x' | 'X'))
        && chars.next().is_some_and(|c| c.is_ascii_hexdigit())
    {
        text.pos += 2;
        *budget -= 2;
        return true;
    }
    false
}

fn scan_float(text: &mut Input<'_>, limit: usize) -> Option<f64> {
    let start = text.pos;
    let mut budget = limit;
    let mut literal = String::new();

    if budget > 0 {
        if let Some(sign @ ('+' | '-')) = text.peek() {
            literal.push(sign);
            text.bump();
            budget -= 1;
        }
    }

    for word in ["infinity", "inf", "nan"] {
        let rest = text.rest();
        if word.len() <= budget
            && rest.len() >= word.len()
            && rest.is_char_boundary(word.len())
            && rest[..word.len()].eq_ignore_ascii_case(word)
        {
            text.pos += word.len();
            literal.push_str(word);
            return literal.parse().ok();
        }
    }

    let int_part = text.take_while(budget, |c| c.is_ascii_digit());
    budget -= int_part.len();
    literal.push_str(&int_part);

    let mut frac_part = String::new();
    if budget > 0 && text.peek() == Some('.') {
        text.bump();
        budget -= 1;
        frac_part = text.take_while(budget, |c| c.is_ascii_digit());
        budget -= frac_part.len();
        literal.push('.');
        literal.push_str(&frac_part);
    }

    if int_part.is_empty() && frac_part.is_empty() {
        text.pos = start;
        return None;
    }

    // Exponent only counts when digits follow it
    if budget >= 2 && matches!(text.peek(), Some('e' | 'E')) {
        let mark = text.pos;
        let mut exponent = String::from("e");
        text.bump();
        let mut exp_budget = budget - 1;
        if let Some(sign @ ('+' | '-')) = text.peek() {
            exponent.push(sign);
            text.bump();
            exp_budget -= 1;
        }
        let digits = text.take_while(exp_budget, |c| c.is_ascii_digit());
        if digits.is_empty() {
            text.pos = mark;
        } else {
            exponent.push_str(&digits);
            literal.push_str(&exponent);
        }
    }

    literal.parse().ok()
}

/// Cursor over the input line
struct Input<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Input<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Take up to `limit` characters while `pred` holds
    fn take_while(&mut self, limit: usize, pred: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        let mut count = 0;
        while count < limit {
            match self.peek() {
                Some(c) if pred(c) => {
                    taken.push(c);
                    self.bump();
                    count += 1;
                }
                _ => break,
            }
        }
        taken
    }
}
