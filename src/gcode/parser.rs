//! Line-oriented G-code tokenizer.
//! Splits one line into words and comments with span tracking; `ParsedCommand`
//! folds the words into a command name plus numeric parameters.

use std::ops::Range;
use thiserror::Error;

/// Commands whose remaining text is a free-form message, not parameters.
const TEXT_COMMANDS: &[&str] = &["M23", "M28", "M30", "M117", "M118"];

/// Span in the original line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCodeSpan {
    pub range: Range<usize>,
}

/// Token produced by the tokenizer, with span info
#[derive(Debug, Clone, PartialEq)]
pub enum GCodeToken<'a> {
    Word { letter: char, value: &'a str, span: GCodeSpan },
    Comment(&'a str, GCodeSpan),
    Checksum { value: &'a str, span: GCodeSpan },
}

/// Error with span info
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (at {:?})", .span.range)]
pub struct GCodeError {
    pub message: String,
    pub span: GCodeSpan,
}

impl GCodeError {
    fn new(message: impl Into<String>, range: Range<usize>) -> Self {
        Self { message: message.into(), span: GCodeSpan { range } }
    }
}

/// Tokenizer over a single line of G-code
pub struct GCodeParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> GCodeParser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Parses the next word, comment or checksum
    pub fn next_token(&mut self) -> Option<Result<GCodeToken<'a>, GCodeError>> {
        let bytes = self.src.as_bytes();
        let len = bytes.len();
        while self.pos < len && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= len {
            return None;
        }
        let start = self.pos;
        let c = bytes[self.pos] as char;

        // Semicolon comment runs to end of line
        if c == ';' {
            self.pos = len;
            let comment = self.src[start + 1..].trim();
            return Some(Ok(GCodeToken::Comment(comment, GCodeSpan { range: start..len })));
        }

        // Parenthesised comment
        if c == '(' {
            return match self.src[start..].find(')') {
                Some(offset) => {
                    let end = start + offset;
                    self.pos = end + 1;
                    let comment = self.src[start + 1..end].trim();
                    Some(Ok(GCodeToken::Comment(comment, GCodeSpan { range: start..end + 1 })))
                }
                None => {
                    self.pos = len;
                    Some(Err(GCodeError::new("Unclosed comment", start..len)))
                }
            };
        }

        // Checksum (e.g. N12 G1 X10*71)
        if c == '*' {
            self.pos += 1;
            let value_start = self.pos;
            while self.pos < len && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let value = &self.src[value_start..self.pos];
            return Some(Ok(GCodeToken::Checksum { value, span: GCodeSpan { range: start..self.pos } }));
        }

        // Word (e.g. G1, X10.0, e-1.5)
        if c.is_ascii_alphabetic() {
            self.pos += 1;
            let value_start = self.pos;
            while self.pos < len && is_value_byte(bytes[self.pos]) {
                self.pos += 1;
            }
            let value = &self.src[value_start..self.pos];
            let span = GCodeSpan { range: start..self.pos };
            return Some(Ok(GCodeToken::Word { letter: c.to_ascii_uppercase(), value, span }));
        }

        // Unknown character: report it, then skip to the next whitespace
        let width = self.src[start..].chars().next().map_or(1, char::len_utf8);
        let err = GCodeError::new(format!("Unexpected character: {}", &self.src[start..start + width]), start..start + width);
        self.pos = start + width;
        while self.pos < len && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(Err(err))
    }
}

impl<'a> Iterator for GCodeParser<'a> {
    type Item = Result<GCodeToken<'a>, GCodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

fn is_value_byte(b: u8) -> bool {
    b.is_ascii_digit() || b == b'.' || b == b'-' || b == b'+'
}

/// One command with its parameters, e.g. `G1 X10 Y20 E0.5 F1800`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub name: String,
    /// Parameters in source order; `None` for bare flags such as `G28 X`
    pub parameters: Vec<(char, Option<f64>)>,
}

impl ParsedCommand {
    /// Parse a single line. Blank and comment-only lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, GCodeError> {
        if let Some(extended) = Self::parse_extended(line) {
            return Ok(Some(extended));
        }

        let mut parser = GCodeParser::new(line);
        let mut command: Option<ParsedCommand> = None;

        while let Some(token) = parser.next_token() {
            match token? {
                GCodeToken::Comment(..) | GCodeToken::Checksum { .. } => {}
                GCodeToken::Word { letter, value, span } => match command.as_mut() {
                    None if letter == 'N' => {}
                    None => {
                        let name = command_name(letter, value, span)?;
                        let is_text = TEXT_COMMANDS.contains(&name.as_str());
                        command = Some(ParsedCommand { name, parameters: Vec::new() });
                        if is_text {
                            break;
                        }
                    }
                    Some(cmd) => {
                        let parsed = if value.is_empty() {
                            None
                        } else {
                            let number = value.parse::<f64>().map_err(|_| {
                                GCodeError::new(format!("Invalid value for {}: '{}'", letter, value), span.range.clone())
                            })?;
                            Some(number)
                        };
                        cmd.parameters.push((letter, parsed));
                    }
                },
            }
        }

        Ok(command)
    }

    /// Klipper/RepRap style multi-letter commands (`SET_FAN_SPEED FAN=x`)
    fn parse_extended(line: &str) -> Option<Self> {
        let word = line.split_whitespace().next()?;
        let mut chars = word.chars();
        let first = chars.next()?;
        let second = chars.next()?;
        if first.is_ascii_alphabetic() && (second.is_ascii_alphabetic() || second == '_') {
            Some(ParsedCommand { name: word.to_ascii_uppercase(), parameters: Vec::new() })
        } else {
            None
        }
    }

    /// Value of a parameter, if present with a number
    pub fn get(&self, letter: char) -> Option<f64> {
        self.parameters.iter().find(|(l, _)| *l == letter).and_then(|(_, v)| *v)
    }

    /// True if the parameter letter appears, with or without a value
    pub fn has(&self, letter: char) -> bool {
        self.parameters.iter().any(|(l, _)| *l == letter)
    }
}

fn command_name(letter: char, value: &str, span: GCodeSpan) -> Result<String, GCodeError> {
    if !matches!(letter, 'G' | 'M' | 'T') {
        return Err(GCodeError::new(format!("Expected a command, found parameter {}", letter), span.range));
    }
    let number = value
        .parse::<f64>()
        .ok()
        .filter(|n| *n >= 0.0 && n.is_finite())
        .ok_or_else(|| GCodeError::new(format!("Invalid command number: {}{}", letter, value), span.range.clone()))?;
    if number.fract() == 0.0 {
        Ok(format!("{}{}", letter, number as u64))
    } else {
        Ok(format!("{}{}", letter, number))
    }
}
