use super::factor_graph::{FactorKind, VarId};
use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use chumsky::prelude::*;

/// One line of a circuit description: `type;primary;dep;dep;...`.
#[derive(Debug, Clone)]
pub(super) struct Statement {
    pub(super) kind: FactorKind,
    pub(super) primary: VarId,
    pub(super) deps: Vec<VarId>,
}

fn parser() -> impl Parser<char, Vec<Option<Statement>>, Error = Simple<char>> {
    let pad = just(' ').or(just('\t')).repeated();
    let sep = just(';').delimited_by(pad.clone(), pad.clone());
    let kind = text::ident::<char, Simple<char>>()
        .delimited_by(pad.clone(), pad.clone())
        .try_map(|tag: String, span| {
            FactorKind::from_tag(&tag)
                .ok_or_else(|| Simple::custom(span, format!("Unknown factor type {}.", tag)))
        });
    let index = text::int::<char, Simple<char>>(10)
        .delimited_by(pad.clone(), pad)
        .try_map(|idx: String, span| {
            idx.parse::<VarId>()
                .map_err(|e| Simple::custom(span, format!("Invalid variable index {}: {}.", idx, e)))
        });
    let factor = kind
        .then_ignore(sep.clone())
        .then(index.clone())
        .then(sep.clone().ignore_then(index).repeated())
        .then_ignore(sep.or_not())
        .map(|((kind, primary), deps)| Some(Statement { kind, primary, deps }));
    factor
        .recover_with(skip_until(['\n', '\r'], |_| None))
        .separated_by(text::newline())
        .then_ignore(end())
}

/// Parse a circuit description. On error, returns a rendered report listing every
/// offending line.
pub(super) fn parse(src: &str) -> Result<Vec<Statement>, String> {
    // A single line terminator may end the last line.
    let src = src
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .or_else(|| src.strip_suffix('\r'))
        .unwrap_or(src);
    if src.is_empty() {
        return Ok(Vec::new());
    }
    let (stmts, errs) = parser().parse_recovery_verbose(src);
    if errs.is_empty() {
        if let Some(stmts) = stmts {
            return Ok(stmts.into_iter().flatten().collect());
        }
    }
    let mut err_str = Vec::new();
    for e in errs.iter() {
        let msg = if let chumsky::error::SimpleReason::Custom(msg) = e.reason() {
            msg.clone()
        } else {
            let expected = e
                .expected()
                .map(|expected| match expected {
                    Some(c) => format!("{:?}", c),
                    None => "end of input".to_string(),
                })
                .collect::<Vec<_>>();
            format!(
                "Unexpected token, expected {}",
                if expected.is_empty() {
                    "something else".to_string()
                } else {
                    expected.join(", ")
                }
            )
        };
        let label = match e.found() {
            Some(c) => format!("Unexpected token {}", format!("{:?}", c).fg(Color::Red)),
            None if matches!(e.reason(), chumsky::error::SimpleReason::Custom(_)) => {
                msg.clone()
            }
            None => "Unexpected end of input".to_string(),
        };
        let written = Report::build(ReportKind::Error, (), e.span().start)
            .with_message(msg.clone())
            .with_label(Label::new(e.span()).with_message(label).with_color(Color::Red))
            .finish()
            .write(Source::from(src), &mut err_str);
        if written.is_err() {
            err_str.extend_from_slice(msg.as_bytes());
            err_str.push(b'\n');
        }
    }
    if err_str.is_empty() {
        err_str.extend_from_slice(b"Invalid circuit description.");
    }
    Err(String::from_utf8_lossy(&err_str).into_owned())
}
