// Parser for textual kernel IR (`.tk` files).
//
// Parses a token stream (from the lexer) into the syntactic AST. Uses
// chumsky combinators. Opcode names and operand shapes are not checked here;
// `resolve` does that against the closed opcode set.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse kernel IR source. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();
    let nl1 = just(Token::Newline).repeated().at_least(1).ignored();

    // ── Names ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let value_ref = select! {
        Token::ValueName(name) = e => ValueRef { name, span: e.span() },
    };

    let int = select! {
        Token::Int(v) => v,
    };

    // ── Type: ident ('<' ident '>')? ('[' int (',' int)* ']')? ──

    let shape = int
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let ty = ident
        .clone()
        .then(
            ident
                .clone()
                .delimited_by(just(Token::Lt), just(Token::Gt))
                .or_not(),
        )
        .then(shape.or_not())
        .map_with(|((base, pointee), shape), e| TypeExpr {
            base,
            pointee,
            shape: shape.unwrap_or_default(),
            span: e.span(),
        });

    // ── Parameters: '%name' ':' type attr* ──

    let attr = ident
        .clone()
        .then(int.delimited_by(just(Token::LParen), just(Token::RParen)))
        .map_with(|(name, value), e| Attr {
            name,
            value,
            span: e.span(),
        });

    let param = value_ref
        .clone()
        .then_ignore(just(Token::Colon))
        .then(ty.clone())
        .then(attr.repeated().collect::<Vec<_>>())
        .map(|((name, ty), attrs)| Param { name, ty, attrs });

    let params = param
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    // ── Operands ──

    let incoming = value_ref
        .clone()
        .then_ignore(just(Token::Comma))
        .then(ident.clone())
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(|(value, block)| Operand::Incoming(value, block));

    let literal = select! {
        Token::Int(v) = e => Operand::Int(v, e.span()),
        Token::Float(v) = e => Operand::Float(v, e.span()),
    };

    let operand = choice((
        incoming,
        value_ref.clone().map(Operand::Value),
        literal,
        ident.clone().map(Operand::Label),
    ));

    // ── Instruction: ('%name' '=')? opcode operands (':' type)? ──

    let inst = value_ref
        .clone()
        .then_ignore(just(Token::Equals))
        .or_not()
        .then(ident.clone())
        .then(
            operand
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>(),
        )
        .then(just(Token::Colon).ignore_then(ty).or_not())
        .map_with(|(((result, opcode), operands), ty), e| InstDef {
            result,
            opcode,
            operands,
            ty,
            span: e.span(),
        });

    // ── Body items: label ':' | instruction ──

    let label = ident.clone().then_ignore(just(Token::Colon));

    let item = label.map(Item::Label).or(inst.map(Item::Inst));

    let body = nl
        .clone()
        .ignore_then(
            item.separated_by(nl1.clone())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    // ── Kernel ──

    let kernel = just(Token::Kernel)
        .ignore_then(ident.clone())
        .then(params)
        .then(body.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map_with(|((name, params), items), e| KernelDef {
            name,
            params,
            items,
            span: e.span(),
        });

    // ── Program ──

    nl.clone()
        .ignore_then(
            kernel
                .separated_by(nl1)
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map(|kernels| Program { kernels })
}

// ── Tests ──
