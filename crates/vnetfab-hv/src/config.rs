//! Switch/bridge startup config-file format: one colon-delimited statement
//! per line, `#` truncating the rest of the line as a comment.

use thiserror::Error;

#[derive(Debug, PartialEq, Eq)]
pub enum Statement {
    /// `IF:name:type:args…` — defines a NIO.
    If { name: String, kind: String, args: Vec<String> },
    /// `VP:in_if:in_vpi:out_if:out_vpi`
    Vp { in_if: String, in_vpi: u32, out_if: String, out_vpi: u32 },
    /// `VC:in_if:in_vpi:in_vci:out_if:out_vpi:out_vci`
    Vc { in_if: String, in_vpi: u32, in_vci: u32, out_if: String, out_vpi: u32, out_vci: u32 },
    /// `BRIDGE:eth_if:atm_if:vpi:vci`
    Bridge { eth_if: String, atm_if: String, vpi: u32, vci: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {0}: unknown statement kind {1:?}")]
    UnknownKind(usize, String),
    #[error("line {0}: expected {1} colon-delimited fields, got {2}")]
    WrongArity(usize, usize, usize),
    #[error("line {0}: {1:?} is not a valid number")]
    BadNumber(usize, String),
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_num(line_no: usize, s: &str) -> Result<u32, ConfigError> {
    s.parse().map_err(|_| ConfigError::BadNumber(line_no, s.to_string()))
}

/// Parses every non-blank, non-comment-only line of `text` into a
/// [`Statement`], in order.
pub fn parse(text: &str) -> Result<Vec<Statement>, ConfigError> {
    let mut statements = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(':').collect();
        match fields[0] {
            "IF" => {
                if fields.len() < 3 {
                    return Err(ConfigError::WrongArity(line_no, 3, fields.len()));
                }
                statements.push(Statement::If {
                    name: fields[1].to_string(),
                    kind: fields[2].to_string(),
                    args: fields[3..].iter().map(|s| s.to_string()).collect(),
                });
            }
            "VP" => {
                if fields.len() != 5 {
                    return Err(ConfigError::WrongArity(line_no, 5, fields.len()));
                }
                statements.push(Statement::Vp {
                    in_if: fields[1].to_string(),
                    in_vpi: parse_num(line_no, fields[2])?,
                    out_if: fields[3].to_string(),
                    out_vpi: parse_num(line_no, fields[4])?,
                });
            }
            "VC" => {
                if fields.len() != 7 {
                    return Err(ConfigError::WrongArity(line_no, 7, fields.len()));
                }
                statements.push(Statement::Vc {
                    in_if: fields[1].to_string(),
                    in_vpi: parse_num(line_no, fields[2])?,
                    in_vci: parse_num(line_no, fields[3])?,
                    out_if: fields[4].to_string(),
                    out_vpi: parse_num(line_no, fields[5])?,
                    out_vci: parse_num(line_no, fields[6])?,
                });
            }
            "BRIDGE" => {
                if fields.len() != 5 {
                    return Err(ConfigError::WrongArity(line_no, 5, fields.len()));
                }
                statements.push(Statement::Bridge {
                    eth_if: fields[1].to_string(),
                    atm_if: fields[2].to_string(),
                    vpi: parse_num(line_no, fields[3])?,
                    vci: parse_num(line_no, fields[4])?,
                });
            }
            other => return Err(ConfigError::UnknownKind(line_no, other.to_string())),
        }
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_statement_kind() {
        let text = "\
            # a comment line\n\
            IF:eth0:tap:tap0\n\
            VP:eth0:1:eth1:2\n\
            VC:eth0:1:32:eth1:2:64\n\
            BRIDGE:eth0:atm0:1:35\n\
        ";
        let statements = parse(text).unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::If { name: "eth0".to_string(), kind: "tap".to_string(), args: vec!["tap0".to_string()] },
                Statement::Vp { in_if: "eth0".to_string(), in_vpi: 1, out_if: "eth1".to_string(), out_vpi: 2 },
                Statement::Vc {
                    in_if: "eth0".to_string(),
                    in_vpi: 1,
                    in_vci: 32,
                    out_if: "eth1".to_string(),
                    out_vpi: 2,
                    out_vci: 64,
                },
                Statement::Bridge { eth_if: "eth0".to_string(), atm_if: "atm0".to_string(), vpi: 1, vci: 35 },
            ]
        );
    }

    #[test]
    fn trailing_hash_comment_is_stripped() {
        let statements = parse("VP:a:1:b:2 # crossconnect a to b\n").unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn unknown_statement_kind_is_rejected() {
        assert_eq!(parse("WAT:1:2"), Err(ConfigError::UnknownKind(1, "WAT".to_string())));
    }

    #[test]
    fn blank_and_comment_only_lines_are_skipped() {
        let statements = parse("\n# just a comment\n   \n").unwrap();
        assert!(statements.is_empty());
    }
}
