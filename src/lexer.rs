//! Tokenizer for the PDF object syntax.
//!
//! [`Lexer::next_token`] is a pure function of the buffer and a position, so callers
//! can back up and re-lex freely. The buffer may be a window onto a larger source:
//! positions are always absolute, and a lexer built with `complete == false` answers
//! [`Error::EndOfInput`] rather than guessing when a token runs into the end of the
//! window.

use crate::{Error, Result};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::one_of;
use nom::combinator::{map, map_opt, map_res, opt, recognize, verify};
use nom::error::{ErrorKind, ParseError};
use nom::multi::{fold_many0, many0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{AsBytes, AsChar, IResult, Input, Parser};
use nom_locate::LocatedSpan;

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;
pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

/// Maximum allowed embedding of literal strings.
pub const MAX_BRACKET: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Integer(i64),
    Real(f64),
    /// Name with `#XX` escapes already decoded, without the leading slash.
    Name(Vec<u8>),
    LiteralString(Vec<u8>),
    HexString(Vec<u8>),
    Keyword(Keyword),
    /// Any other run of regular characters.
    Operator(Vec<u8>),
    Delimiter(Delimiter),
    /// Only produced by [`Lexer::next_raw_token`].
    Comment(Vec<u8>),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Obj,
    EndObj,
    Stream,
    EndStream,
    Xref,
    Trailer,
    StartXref,
    R,
    True,
    False,
    Null,
}

impl Keyword {
    fn from_bytes(bytes: &[u8]) -> Option<Keyword> {
        Some(match bytes {
            b"obj" => Keyword::Obj,
            b"endobj" => Keyword::EndObj,
            b"stream" => Keyword::Stream,
            b"endstream" => Keyword::EndStream,
            b"xref" => Keyword::Xref,
            b"trailer" => Keyword::Trailer,
            b"startxref" => Keyword::StartXref,
            b"R" => Keyword::R,
            b"true" => Keyword::True,
            b"false" => Keyword::False,
            b"null" => Keyword::Null,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    BraceStart,
    BraceEnd,
}

/// A token with the absolute span it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

#[inline]
pub(crate) fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
pub(crate) fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
pub(crate) fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

fn number(input: ParserInput) -> NomResult<ParserInput> {
    recognize(pair(
        opt(one_of("+-")),
        take_while1(|c: u8| c.is_ascii_digit() || c == b'.'),
    ))
    .parse(input)
}

fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        verify(take(2usize), |h: &ParserInput| {
            h.as_bytes().iter().copied().all(AsChar::is_hex_digit)
        }),
        |x: ParserInput| u8::from_str_radix(str::from_utf8(&x).unwrap_or_default(), 16),
    )
    .parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        take_while_m_n(1, 3, AsChar::is_oct_digit),
        // Overflow of the octal value is ignored.
        |x: ParserInput| u16::from_str_radix(str::from_utf8(&x).unwrap_or_default(), 8).map(|o| o as u8),
    )
    .parse(input)
}

fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            // A '#' not followed by two hex digits is kept as is.
            map_opt(take(1usize), |c: ParserInput| {
                if is_regular(c[0]) { Some(c[0]) } else { None }
            }),
        ))),
    )
    .parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    )
    .parse(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol,
    Nested(Vec<u8>),
}

impl InnerLiteralString<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) => output.extend_from_slice(s),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Eol => output.push(b'\n'),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, |_| InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )
        .parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            Err(nom::Err::Failure(NomError::from_error_kind(input, ErrorKind::TooLarge)))
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )
            .parse(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| (c[0] as char).to_digit(16).map(|d| d as u8)).parse(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            if let Some(last) = out.last_mut() {
                                *last |= c;
                            }
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| bytes,
    )
    .parse(input)
}

/// Interpret the bytes of a numeric token.
///
/// Every decimal point after the first is dropped, so `1.2.3` reads as `1.23`.
fn number_value(raw: &[u8]) -> Option<Token> {
    let (negative, digits) = match raw.first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let mut integral = String::new();
    let mut fraction = String::new();
    let mut seen_point = false;
    for &c in digits {
        match c {
            b'.' => seen_point = true,
            _ if seen_point => fraction.push(c as char),
            _ => integral.push(c as char),
        }
    }
    if integral.is_empty() && fraction.is_empty() {
        return None;
    }
    let sign = if negative { "-" } else { "" };
    if !seen_point {
        if let Ok(value) = i64::from_str(&format!("{sign}{integral}")) {
            return Some(Token::Integer(value));
        }
    }
    let integral = if integral.is_empty() { "0" } else { &integral };
    f64::from_str(&format!("{sign}{integral}.{fraction}0")).ok().map(Token::Real)
}

#[derive(Clone, Copy)]
pub struct Lexer<'a> {
    buffer: &'a [u8],
    base: usize,
    complete: bool,
}

impl<'a> Lexer<'a> {
    /// Lexer over a whole, self-contained buffer.
    pub fn new(buffer: &'a [u8]) -> Self {
        Lexer {
            buffer,
            base: 0,
            complete: true,
        }
    }

    /// Lexer over `buffer`, which holds the source bytes starting at absolute offset
    /// `base`. `complete` says whether the window reaches the end of the source.
    pub fn with_window(buffer: &'a [u8], base: usize, complete: bool) -> Self {
        Lexer { buffer, base, complete }
    }

    /// First absolute offset of the window.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute offset one past the window.
    pub fn end(&self) -> usize {
        self.base + self.buffer.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes between two absolute offsets, if they lie inside the window.
    pub fn slice(&self, start: usize, end: usize) -> Option<&'a [u8]> {
        let start = start.checked_sub(self.base)?;
        let end = end.checked_sub(self.base)?;
        self.buffer.get(start..end)
    }

    /// Byte at an absolute offset.
    pub fn byte_at(&self, position: usize) -> Option<u8> {
        position.checked_sub(self.base).and_then(|local| self.buffer.get(local)).copied()
    }

    /// Absolute offset of the first occurrence of `pattern` at or after `position`.
    pub fn find(&self, pattern: &[u8], position: usize) -> Option<usize> {
        let local = position.checked_sub(self.base)?;
        self.buffer
            .get(local..)?
            .windows(pattern.len())
            .position(|window| window == pattern)
            .map(|found| self.base + local + found)
    }

    /// Out of input: a real end only when the window reaches the end of the source.
    fn exhausted(&self, position: usize) -> Result<Lexeme> {
        if self.complete {
            Ok(Lexeme {
                token: Token::Eof,
                start: position,
                end: position,
            })
        } else {
            Err(Error::EndOfInput(position))
        }
    }

    /// Skip whitespace and, unless `keep_comments`, comments.
    pub fn skip_space(&self, position: usize) -> Result<usize> {
        self.skip(position, false)
    }

    fn skip(&self, mut position: usize, keep_comments: bool) -> Result<usize> {
        loop {
            match self.byte_at(position) {
                Some(c) if is_whitespace(c) => position += 1,
                Some(b'%') if !keep_comments => {
                    let local = position - self.base;
                    match self.buffer[local..].iter().position(|&c| c == b'\r' || c == b'\n') {
                        Some(len) => position += len,
                        None if self.complete => position = self.end(),
                        None => return Err(Error::EndOfInput(position)),
                    }
                }
                _ => return Ok(position),
            }
        }
    }

    /// Next token at or after `position`, and the position just past it.
    pub fn next_token(&self, position: usize) -> Result<(Token, usize)> {
        let lexeme = self.next_lexeme(position)?;
        Ok((lexeme.token, lexeme.end))
    }

    /// Like [`Lexer::next_token`] but comments are returned as tokens.
    pub fn next_raw_token(&self, position: usize) -> Result<(Token, usize)> {
        let start = self.skip(position, true)?;
        if self.byte_at(start) == Some(b'%') {
            let local = start - self.base;
            let len = self.buffer[local..]
                .iter()
                .position(|&c| c == b'\r' || c == b'\n');
            let end = match len {
                Some(len) => start + len,
                None if self.complete => self.end(),
                None => return Err(Error::EndOfInput(start)),
            };
            let text = self.buffer[local + 1..end - self.base].to_vec();
            return Ok((Token::Comment(text), end));
        }
        let lexeme = self.lex_at(start)?;
        Ok((lexeme.token, lexeme.end))
    }

    pub fn next_lexeme(&self, position: usize) -> Result<Lexeme> {
        if position < self.base {
            return Err(Error::syntax(position, "position before the start of the read window"));
        }
        let start = self.skip(position, false)?;
        self.lex_at(start)
    }

    fn lex_at(&self, start: usize) -> Result<Lexeme> {
        let Some(first) = self.byte_at(start) else {
            return self.exhausted(start);
        };
        let second = self.byte_at(start + 1);
        let delimiter = |delimiter, len: usize| -> Result<Lexeme> {
            Ok(Lexeme {
                token: Token::Delimiter(delimiter),
                start,
                end: start + len,
            })
        };

        match first {
            b'[' => delimiter(Delimiter::ArrayStart, 1),
            b']' => delimiter(Delimiter::ArrayEnd, 1),
            b'{' => delimiter(Delimiter::BraceStart, 1),
            b'}' => delimiter(Delimiter::BraceEnd, 1),
            b'<' if second == Some(b'<') => delimiter(Delimiter::DictStart, 2),
            b'>' if second == Some(b'>') => delimiter(Delimiter::DictEnd, 2),
            b'<' | b'>' if second.is_none() && !self.complete => Err(Error::EndOfInput(start)),
            b'<' => {
                let (bytes, end) = self.run(start, hexadecimal_string, "malformed hexadecimal string")?;
                Ok(Lexeme { token: Token::HexString(bytes), start, end })
            }
            b'>' => Err(Error::Lexical { offset: start, reason: "unexpected '>'" }),
            b')' => Err(Error::Lexical { offset: start, reason: "unbalanced ')'" }),
            b'(' => {
                let (bytes, end) = self.run(start, literal_string, "unterminated literal string")?;
                Ok(Lexeme { token: Token::LiteralString(bytes), start, end })
            }
            b'/' => {
                let (bytes, end) = self.regular(start, name, "malformed name")?;
                Ok(Lexeme { token: Token::Name(bytes), start, end })
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => {
                let (raw, end) = self.regular(start, number, "malformed number")?;
                let token = number_value(raw.fragment()).ok_or(Error::Lexical {
                    offset: start,
                    reason: "malformed number",
                })?;
                Ok(Lexeme { token, start, end })
            }
            _ => {
                let (word, end) = self.regular(start, |input| take_while1(is_regular).parse(input), "unexpected byte")?;
                let token = match Keyword::from_bytes(word.fragment()) {
                    Some(keyword) => Token::Keyword(keyword),
                    None => Token::Operator(word.fragment().to_vec()),
                };
                Ok(Lexeme { token, start, end })
            }
        }
    }

    fn input(&self, position: usize) -> ParserInput<'a> {
        ParserInput::new_extra(self.buffer, "lexer").take_from(position - self.base)
    }

    /// Run a self-delimiting recognizer such as a string.
    fn run<O>(
        &self, start: usize, recognizer: impl Fn(ParserInput<'a>) -> NomResult<'a, O>, reason: &'static str,
    ) -> Result<(O, usize)> {
        match recognizer(self.input(start)) {
            Ok((rest, output)) => Ok((output, self.base + rest.location_offset())),
            Err(_) if !self.complete => Err(Error::EndOfInput(start)),
            Err(_) => Err(Error::Lexical { offset: start, reason }),
        }
    }

    /// Run a recognizer for a token that ends at the next non-regular byte. Such a token
    /// touching the end of an incomplete window might continue past it.
    fn regular<O>(
        &self, start: usize, recognizer: impl Fn(ParserInput<'a>) -> NomResult<'a, O>, reason: &'static str,
    ) -> Result<(O, usize)> {
        let (output, end) = self.run(start, recognizer, reason)?;
        if !self.complete && end == self.end() {
            return Err(Error::EndOfInput(start));
        }
        Ok((output, end))
    }
}
