//! A small hand-rolled lexer for the SQL subset in §6. Not aiming to be a
//! general SQL tokenizer — just enough punctuation/keyword/literal coverage
//! for `SELECT ... FROM ... WHERE ... GROUP BY ... HAVING ... WITH (...)`.
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
	Ident(String),
	Number(f64),
	Str(String),
	Star,
	Comma,
	Dot,
	LParen,
	RParen,
	Eq,
	Neq,
	Lt,
	Lte,
	Gt,
	Gte,
	Plus,
	Minus,
	Slash,
	Percent,
	Eof,
}

pub fn lex(input: &str) -> Result<Vec<Token>> {
	let chars: Vec<char> = input.chars().collect();
	let mut i = 0;
	let mut out = Vec::new();
	while i < chars.len() {
		let c = chars[i];
		match c {
			c if c.is_whitespace() => i += 1,
			'*' => {
				out.push(Token::Star);
				i += 1;
			}
			',' => {
				out.push(Token::Comma);
				i += 1;
			}
			'.' if !(i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) => {
				out.push(Token::Dot);
				i += 1;
			}
			'(' => {
				out.push(Token::LParen);
				i += 1;
			}
			')' => {
				out.push(Token::RParen);
				i += 1;
			}
			'+' => {
				out.push(Token::Plus);
				i += 1;
			}
			'-' => {
				out.push(Token::Minus);
				i += 1;
			}
			'/' => {
				out.push(Token::Slash);
				i += 1;
			}
			'%' => {
				out.push(Token::Percent);
				i += 1;
			}
			'=' => {
				out.push(Token::Eq);
				i += 1;
			}
			'!' if chars.get(i + 1) == Some(&'=') => {
				out.push(Token::Neq);
				i += 2;
			}
			'<' if chars.get(i + 1) == Some(&'>') => {
				out.push(Token::Neq);
				i += 2;
			}
			'<' if chars.get(i + 1) == Some(&'=') => {
				out.push(Token::Lte);
				i += 2;
			}
			'<' => {
				out.push(Token::Lt);
				i += 1;
			}
			'>' if chars.get(i + 1) == Some(&'=') => {
				out.push(Token::Gte);
				i += 2;
			}
			'>' => {
				out.push(Token::Gt);
				i += 1;
			}
			'\'' | '"' => {
				let quote = c;
				i += 1;
				let start = i;
				while i < chars.len() && chars[i] != quote {
					i += 1;
				}
				if i >= chars.len() {
					return Err(Error::Parse(format!("unterminated string literal starting at {start}")));
				}
				let s: String = chars[start..i].iter().collect();
				out.push(Token::Str(s));
				i += 1;
			}
			c if c.is_ascii_digit() => {
				let start = i;
				while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
					i += 1;
				}
				let s: String = chars[start..i].iter().collect();
				let n = s.parse::<f64>().map_err(|_| Error::Parse(format!("invalid number `{s}`")))?;
				out.push(Token::Number(n));
			}
			c if c.is_alphabetic() || c == '_' => {
				let start = i;
				while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
					i += 1;
				}
				let s: String = chars[start..i].iter().collect();
				out.push(Token::Ident(s));
			}
			other => return Err(Error::Parse(format!("unexpected character `{other}`"))),
		}
	}
	out.push(Token::Eof);
	Ok(out)
}
