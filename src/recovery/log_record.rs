//! Write-ahead log record grammar.
//!
//! Records are newline-delimited, self-describing text lines so the log is
//! parseable without out-of-band schema:
//!
//! ```text
//! TABLE hash movies
//! START 17
//! EDIT 17 movies INSERT 5 0 50
//! EDIT 17 movies UPDATE 5 50 99
//! EDIT 17 movies DELETE 5 99 0
//! COMMIT 17
//! CHECKPOINT 17,33
//! ```
//!
//! Parsing is strict: wrong arity, a non-numeric field, or an unknown
//! prefix is an error, and recovery aborts on it rather than guessing.

use std::fmt;
use std::str::FromStr;

use eyre::{bail, ensure, Result, WrapErr};

use crate::database::TxnId;

/// The logical mutation an edit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EditAction::Insert => "INSERT",
            EditAction::Update => "UPDATE",
            EditAction::Delete => "DELETE",
        })
    }
}

impl FromStr for EditAction {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(EditAction::Insert),
            "UPDATE" => Ok(EditAction::Update),
            "DELETE" => Ok(EditAction::Delete),
            other => bail!("unknown edit action '{other}'"),
        }
    }
}

/// One line of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Table {
        table_type: String,
        name: String,
    },
    Edit {
        txn: TxnId,
        table: String,
        action: EditAction,
        key: i64,
        old_value: i64,
        new_value: i64,
    },
    Start {
        txn: TxnId,
    },
    Commit {
        txn: TxnId,
    },
    Checkpoint {
        active: Vec<TxnId>,
    },
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Table { table_type, name } => write!(f, "TABLE {table_type} {name}"),
            LogRecord::Edit {
                txn,
                table,
                action,
                key,
                old_value,
                new_value,
            } => write!(f, "EDIT {txn} {table} {action} {key} {old_value} {new_value}"),
            LogRecord::Start { txn } => write!(f, "START {txn}"),
            LogRecord::Commit { txn } => write!(f, "COMMIT {txn}"),
            LogRecord::Checkpoint { active } => {
                if active.is_empty() {
                    write!(f, "CHECKPOINT")
                } else {
                    let ids: Vec<String> = active.iter().map(|id| id.to_string()).collect();
                    write!(f, "CHECKPOINT {}", ids.join(","))
                }
            }
        }
    }
}

impl FromStr for LogRecord {
    type Err = eyre::Report;

    fn from_str(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["TABLE", table_type, name] => Ok(LogRecord::Table {
                table_type: (*table_type).to_string(),
                name: (*name).to_string(),
            }),
            ["EDIT", txn, table, action, key, old_value, new_value] => Ok(LogRecord::Edit {
                txn: parse_txn(txn)?,
                table: (*table).to_string(),
                action: action.parse()?,
                key: parse_value(key, "key")?,
                old_value: parse_value(old_value, "old value")?,
                new_value: parse_value(new_value, "new value")?,
            }),
            ["START", txn] => Ok(LogRecord::Start {
                txn: parse_txn(txn)?,
            }),
            ["COMMIT", txn] => Ok(LogRecord::Commit {
                txn: parse_txn(txn)?,
            }),
            ["CHECKPOINT"] => Ok(LogRecord::Checkpoint { active: Vec::new() }),
            ["CHECKPOINT", ids] => {
                let active = ids
                    .split(',')
                    .map(parse_txn)
                    .collect::<Result<Vec<TxnId>>>()?;
                Ok(LogRecord::Checkpoint { active })
            }
            [] => bail!("empty log record"),
            [prefix, ..] => {
                ensure!(
                    !matches!(*prefix, "TABLE" | "EDIT" | "START" | "COMMIT" | "CHECKPOINT"),
                    "malformed {} record: '{}'",
                    prefix,
                    line
                );
                bail!("unrecognized log record '{line}'")
            }
        }
    }
}

fn parse_txn(token: &str) -> Result<TxnId> {
    token
        .parse::<TxnId>()
        .wrap_err_with(|| format!("invalid transaction id '{token}'"))
}

fn parse_value(token: &str, what: &str) -> Result<i64> {
    token
        .parse::<i64>()
        .wrap_err_with(|| format!("invalid {what} '{token}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: LogRecord) {
        let line = record.to_string();
        assert_eq!(line.parse::<LogRecord>().unwrap(), record, "line: {line}");
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(LogRecord::Table {
            table_type: "hash".into(),
            name: "movies".into(),
        });
        round_trip(LogRecord::Edit {
            txn: 17,
            table: "movies".into(),
            action: EditAction::Update,
            key: -5,
            old_value: 50,
            new_value: 99,
        });
        round_trip(LogRecord::Start { txn: 3 });
        round_trip(LogRecord::Commit { txn: 3 });
        round_trip(LogRecord::Checkpoint { active: vec![] });
        round_trip(LogRecord::Checkpoint {
            active: vec![1, 2, 99],
        });
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!("SNAPSHOT 4".parse::<LogRecord>().is_err());
        assert!("".parse::<LogRecord>().is_err());
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!("EDIT 1 movies INSERT 5 0".parse::<LogRecord>().is_err());
        assert!("START".parse::<LogRecord>().is_err());
        assert!("TABLE hash movies extra".parse::<LogRecord>().is_err());
    }

    #[test]
    fn non_numeric_fields_are_rejected() {
        assert!("START seventeen".parse::<LogRecord>().is_err());
        assert!("EDIT 1 t INSERT five 0 0".parse::<LogRecord>().is_err());
        assert!("EDIT 1 t UPSERT 5 0 0".parse::<LogRecord>().is_err());
    }
}
