//! 清单（last_changes.txt）解析与序列化
//!
//! 每行一个条目：`<相对路径>: <YYYY-MM-DD HH:MM:SS>`，按路径排序，
//! 时间统一按 UTC 处理。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{Result, SyncError};

/// 清单文件名，本地与远程相同
pub const LEDGER_NAME: &str = "last_changes.txt";

/// 清单中的时间格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 相对路径 -> 最后修改时间（秒精度）
pub type Ledger = BTreeMap<String, DateTime<Utc>>;

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:]+):\s*(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\s*$")
            .expect("ledger line pattern is valid")
    })
}

/// 清单键必须是模型目录内的相对路径
pub fn check_key(path: &str) -> std::result::Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    if path.starts_with('/') {
        return Err("absolute path");
    }
    if path.contains('\\') {
        return Err("backslash in path");
    }
    if path.chars().any(char::is_control) {
        return Err("control character in path");
    }
    if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err("empty, `.` or `..` path segment");
    }
    Ok(())
}

/// 解析清单文本
pub fn parse(text: &str) -> Result<Ledger> {
    let mut ledger = Ledger::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let caps = line_pattern().captures(line).ok_or_else(|| SyncError::Ledger {
            line: idx + 1,
            reason: format!("expected `<path>: <{}>`, got `{}`", TIMESTAMP_FORMAT, line),
        })?;

        // 路径原样保留，首尾空格也是文件名的一部分
        let path = caps["path"].to_string();
        check_key(&path).map_err(|reason| SyncError::Ledger {
            line: idx + 1,
            reason: format!("`{}`: {}", path, reason),
        })?;
        let naive = NaiveDateTime::parse_from_str(&caps["ts"], TIMESTAMP_FORMAT).map_err(|e| {
            SyncError::Ledger {
                line: idx + 1,
                reason: format!("bad timestamp `{}`: {}", &caps["ts"], e),
            }
        })?;

        // 清单不记录自身
        if path == LEDGER_NAME {
            continue;
        }

        ledger.insert(path, naive.and_utc());
    }

    Ok(ledger)
}

/// 序列化清单，不含结尾换行
pub fn serialize(ledger: &Ledger) -> String {
    ledger
        .iter()
        .filter(|(path, _)| path.as_str() != LEDGER_NAME)
        .map(|(path, ts)| format!("{}: {}", path, ts.format(TIMESTAMP_FORMAT)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 截断到秒
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// 取出 `ledger` 中属于 `keys` 的条目
pub fn restrict<'a, I>(ledger: &Ledger, keys: I) -> Ledger
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .filter_map(|k| ledger.get(k).map(|ts| (k.clone(), *ts)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn empty_text_is_empty_ledger() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("\n\n  \n").unwrap().is_empty());
    }

    #[test]
    fn serializes_sorted_without_trailing_newline() {
        let mut ledger = Ledger::new();
        ledger.insert("vocab/tokens.txt".into(), ts(2021, 3, 4, 5, 6, 7));
        ledger.insert("config.json".into(), ts(2020, 1, 2, 3, 4, 5));

        let text = serialize(&ledger);
        assert_eq!(
            text,
            "config.json: 2020-01-02 03:04:05\nvocab/tokens.txt: 2021-03-04 05:06:07"
        );
        assert_eq!(parse(&text).unwrap(), ledger);
    }

    #[test]
    fn ledger_never_lists_itself() {
        let text = format!("{}: 2020-01-01 00:00:00\na.bin: 2020-01-01 00:00:01", LEDGER_NAME);
        let ledger = parse(&text).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains_key("a.bin"));

        let mut with_self = ledger.clone();
        with_self.insert(LEDGER_NAME.into(), ts(2020, 1, 1, 0, 0, 0));
        assert!(!serialize(&with_self).contains(LEDGER_NAME));
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let ledger = parse("a.bin: 2020-01-01 00:00:01\r\nb.bin: 2020-01-01 00:00:02\r\n").unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger["b.bin"], ts(2020, 1, 1, 0, 0, 2));
    }

    #[test]
    fn rejects_malformed_line_with_line_number() {
        let err = parse("a.bin: 2020-01-01 00:00:01\nb.bin yesterday").unwrap_err();
        match err {
            SyncError::Ledger { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_impossible_date() {
        assert!(parse("a.bin: 2020-13-45 00:00:01").is_err());
    }

    #[test]
    fn rejects_keys_leaving_the_model_dir() {
        for entry in [
            "../escaped.txt: 2020-01-01 00:00:00",
            "vocab/../../x: 2020-01-01 00:00:00",
            "/etc/passwd: 2020-01-01 00:00:00",
            "./a.bin: 2020-01-01 00:00:00",
            "a\\b.bin: 2020-01-01 00:00:00",
            "a//b.bin: 2020-01-01 00:00:00",
        ] {
            let text = format!("ok.bin: 2020-01-01 00:00:00\n{}", entry);
            match parse(&text) {
                Err(SyncError::Ledger { line, .. }) => assert_eq!(line, 2),
                other => panic!("`{entry}` accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn keeps_surrounding_spaces_in_paths() {
        let mut ledger = Ledger::new();
        ledger.insert("weights.bin ".into(), ts(2020, 1, 1, 0, 0, 1));
        ledger.insert(" vocab/a b.txt".into(), ts(2020, 1, 1, 0, 0, 2));

        assert_eq!(parse(&serialize(&ledger)).unwrap(), ledger);
    }

    #[test]
    fn restrict_keeps_only_requested_keys() {
        let mut ledger = Ledger::new();
        ledger.insert("a".into(), ts(2020, 1, 1, 0, 0, 0));
        ledger.insert("b".into(), ts(2020, 1, 1, 0, 0, 1));
        let keys = vec!["b".to_string(), "missing".to_string()];

        let sub = restrict(&ledger, &keys);
        assert_eq!(sub.len(), 1);
        assert!(sub.contains_key("b"));
    }
}
