//! Parser for the canonical text grammar.
//!
//! This is the inverse of `Context::canonical` and `ContextOp::canonical`:
//! `<base+dim:<...>+...>` for values, `[...]` for operators, with `-`,
//! `--` and `---` as the blanking markers. The same grammar doubles as the
//! text-transport payload encoding.

use crate::base::BaseValue;
use crate::context::Context;
use crate::dimension::Dimension;
use crate::error::{ParseError, Result};
use crate::op::ContextOp;

pub(crate) fn parse_context(input: &str) -> Result<Context> {
    let mut p = Parser::new(input);
    let ctx = p.context()?;
    p.finish()?;
    Ok(ctx)
}

pub(crate) fn parse_op(input: &str) -> Result<ContextOp> {
    let mut p = Parser::new(input);
    let op = p.op()?;
    p.finish()?;
    Ok(op)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<char> {
        let c = self.peek().ok_or(ParseError::Eof)?;
        self.pos += 1;
        Ok(c)
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump()? {
            c if c == want => Ok(()),
            c => Err(ParseError::Unexpected {
                at: self.pos - 1,
                found: c,
            }),
        }
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.chars.len() {
            Ok(())
        } else {
            Err(ParseError::Trailing { at: self.pos })
        }
    }

    fn context(&mut self) -> Result<Context> {
        self.expect('<')?;
        let mut ctx = Context::new();
        if self.peek() == Some('>') {
            self.bump()?;
            return Ok(ctx);
        }
        loop {
            self.context_element(&mut ctx)?;
            match self.bump()? {
                '+' => continue,
                '>' => break,
                c => {
                    return Err(ParseError::Unexpected {
                        at: self.pos - 1,
                        found: c,
                    })
                }
            }
        }
        ctx.recount();
        Ok(ctx)
    }

    fn op(&mut self) -> Result<ContextOp> {
        self.expect('[')?;
        let mut op = ContextOp::new();
        if self.peek() == Some(']') {
            self.bump()?;
            return Ok(op);
        }
        loop {
            self.op_element(&mut op)?;
            match self.bump()? {
                '+' => continue,
                ']' => break,
                c => {
                    return Err(ParseError::Unexpected {
                        at: self.pos - 1,
                        found: c,
                    })
                }
            }
        }
        op.recount();
        Ok(op)
    }

    fn context_element(&mut self, ctx: &mut Context) -> Result<()> {
        match self.element_head()? {
            Head::Base(v) => {
                ctx.base = Some(v);
            }
            Head::Marker(_) => {
                return Err(ParseError::BadLiteral {
                    at: self.pos,
                    reason: "blanking markers are only valid in operators",
                });
            }
            Head::Dim(d) => {
                let child = self.context()?;
                ctx.children.insert(d, child);
            }
        }
        Ok(())
    }

    fn op_element(&mut self, op: &mut ContextOp) -> Result<()> {
        match self.element_head()? {
            Head::Base(v) => {
                op.base = Some(v);
            }
            Head::Marker(m) => {
                match m {
                    Marker::ClearBase => op.clear_base = true,
                    Marker::ClearDims => op.clear_dims = true,
                    Marker::ClearAll => {
                        op.clear_base = true;
                        op.clear_dims = true;
                    }
                }
            }
            Head::Dim(d) => {
                let child = self.op()?;
                op.children.insert(d, child);
            }
        }
        Ok(())
    }

    /// Parse one element up to (not including) its `+`/closer, or through
    /// the `:` when the element is a dimension prefix.
    fn element_head(&mut self) -> Result<Head> {
        match self.peek().ok_or(ParseError::Eof)? {
            '"' => Ok(Head::Base(BaseValue::Str(self.quoted()?))),
            '#' => {
                self.bump()?;
                Ok(Head::Base(BaseValue::Binary(self.hex_run()?)))
            }
            '@' => {
                self.bump()?;
                let alias = self.bare_token();
                self.expect('#')?;
                let data = self.hex_run()?;
                Ok(Head::Base(BaseValue::Bound { alias, data }))
            }
            _ => {
                let start = self.pos;
                let token = self.bare_token();
                if token.is_empty() {
                    return Err(ParseError::Unexpected {
                        at: self.pos,
                        found: self.peek().unwrap_or('\0'),
                    });
                }
                if self.peek() == Some(':') {
                    self.bump()?;
                    let dim = Dimension::parse(&token).map_err(|_| ParseError::BadDimension {
                        at: start,
                        reason: "invalid dimension token",
                    })?;
                    return Ok(Head::Dim(dim));
                }
                match token.as_str() {
                    "-" => Ok(Head::Marker(Marker::ClearBase)),
                    "--" => Ok(Head::Marker(Marker::ClearDims)),
                    "---" => Ok(Head::Marker(Marker::ClearAll)),
                    "_" => Ok(Head::Base(BaseValue::Minimal)),
                    "^" => Ok(Head::Base(BaseValue::Maximal)),
                    "nan" => Ok(Head::Base(BaseValue::Number(f64::NAN))),
                    "inf" => Ok(Head::Base(BaseValue::Number(f64::INFINITY))),
                    "-inf" => Ok(Head::Base(BaseValue::Number(f64::NEG_INFINITY))),
                    t => t
                        .parse::<f64>()
                        .map(|n| Head::Base(BaseValue::Number(n)))
                        .map_err(|_| ParseError::BadLiteral {
                            at: start,
                            reason: "expected number, marker, or quoted string",
                        }),
                }
            }
        }
    }

    /// Characters of a bare token: anything except structure characters.
    fn bare_token(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, ':' | '+' | '<' | '>' | '[' | ']' | '#' | '"') {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn hex_run(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                digits.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if digits.len() % 2 != 0 {
            return Err(ParseError::BadLiteral {
                at: start,
                reason: "odd-length hex run",
            });
        }
        let mut out = Vec::with_capacity(digits.len() / 2);
        for chunk in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk).expect("hex digits are ascii");
            out.push(u8::from_str_radix(pair, 16).expect("validated hex"));
        }
        Ok(out)
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '"' => return Ok(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    c => {
                        return Err(ParseError::Unexpected {
                            at: self.pos - 1,
                            found: c,
                        })
                    }
                },
                c => out.push(c),
            }
        }
    }
}

enum Head {
    Base(BaseValue),
    Marker(Marker),
    Dim(Dimension),
}

enum Marker {
    ClearBase,
    ClearDims,
    ClearAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert!(parse_context("<>").unwrap().is_empty());
        assert!(parse_op("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_nested() {
        let ctx = parse_context("<reactor:<core:<pressure:<70>+temp:<10>>>>").unwrap();
        assert_eq!(ctx.basecount(), 2);
        assert_eq!(
            ctx.canonical(),
            "<reactor:<core:<pressure:<70>+temp:<10>>>>"
        );
    }

    #[test]
    fn test_parse_op_with_markers() {
        let op = parse_op("[reactor:[core:[--+temp:[10+--]]]]").unwrap();
        assert_eq!(op.basecount(), 1);
        assert_eq!(op.blankcount(), 2);
        assert_eq!(op.canonical(), "[reactor:[core:[--+temp:[10+--]]]]");
    }

    #[test]
    fn test_parse_base_and_children() {
        let ctx = parse_context("<5+a:<1>+b:<2>>").unwrap();
        assert_eq!(ctx.base(), Some(&BaseValue::Number(5.0)));
        assert_eq!(ctx.basecount(), 3);
    }

    #[test]
    fn test_parse_string_and_binary() {
        let ctx = parse_context("<msg:<\"he\\\"llo\\n\">+blob:<#ab01>>").unwrap();
        assert_eq!(
            ctx.get_at(&"msg".into()).unwrap().base(),
            Some(&BaseValue::string("he\"llo\n"))
        );
        assert_eq!(
            ctx.get_at(&"blob".into()).unwrap().base(),
            Some(&BaseValue::Binary(vec![0xab, 0x01]))
        );
    }

    #[test]
    fn test_parse_negative_number_vs_marker() {
        let op = parse_op("[a:[-5]+b:[-]]").unwrap();
        assert_eq!(
            op.at(&"a".into()).unwrap().base(),
            Some(&BaseValue::Number(-5.0))
        );
        assert!(op.at(&"b".into()).unwrap().clear_base());
    }

    #[test]
    fn test_parse_index_dimensions() {
        let ctx = parse_context("<0:<1>+1:<2>+slot:<3>>").unwrap();
        assert_eq!(ctx.basecount(), 3);
        assert_eq!(ctx.canonical(), "<0:<1>+1:<2>+slot:<3>>");
    }

    #[test]
    fn test_markers_rejected_in_context() {
        assert!(parse_context("<->").is_err());
        assert!(parse_context("<a:<-->>").is_err());
    }

    #[test]
    fn test_trailing_input() {
        assert!(matches!(
            parse_context("<a:<1>>x"),
            Err(ParseError::Trailing { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        for s in [
            "<>",
            "<10>",
            "<_>",
            "<^>",
            "<a:<1>+b:<c:<\"x\">+d:<#00ff>>>",
            "<-2.5>",
        ] {
            let ctx = parse_context(s).unwrap();
            assert_eq!(ctx.canonical(), s);
            let again = parse_context(&ctx.canonical()).unwrap();
            assert_eq!(again, ctx);
        }
        for s in ["[]", "[---]", "[10+--]", "[--+temp:[10+--]]", "[a:[-+b:[1]]]"] {
            let op = parse_op(s).unwrap();
            assert_eq!(op.canonical(), s);
            let again = parse_op(&op.canonical()).unwrap();
            assert_eq!(again, op);
        }
    }
}
