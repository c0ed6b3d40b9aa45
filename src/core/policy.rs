//! 破坏性或重复操作的确认策略
//!
//! 替代交互式提示：命令行下可以询问用户，无人值守时默认中止。

use std::collections::{BTreeMap, BTreeSet};

/// 需要确认的情况
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// 开始上传前的总体确认
    Upload { models: BTreeMap<String, u32> },
    /// 将要上传的文件已作为另一个版本存在
    DuplicateContent {
        component: String,
        version: u32,
        existing_version: u32,
    },
    /// 切换版本需要删除本地文件，且远程没有备份
    DeleteUnrecoverable {
        component: String,
        version: u32,
        files: BTreeSet<String>,
    },
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Upload { models } => write!(
                f,
                "upload {} to the remote repository?",
                models
                    .iter()
                    .map(|(name, version)| format!("`{}` as version {}", name, version))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Decision::DuplicateContent {
                component,
                version,
                existing_version,
            } => write!(
                f,
                "the files of model `{}` about to be uploaded as version {} already exist as version {}; upload anyway?",
                component, version, existing_version
            ),
            Decision::DeleteUnrecoverable {
                component,
                version,
                files,
            } => write!(
                f,
                "switching model `{}` to version {} deletes {} local file(s) that are not backed up remotely: {:?}; delete them?",
                component,
                version,
                files.len(),
                files
            ),
        }
    }
}

/// 决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Abort,
}

/// 确认策略
pub trait ConfirmPolicy: Send + Sync {
    fn decide(&self, decision: &Decision) -> Verdict;
}

/// 总是中止（无人值守默认）
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortPolicy;

impl ConfirmPolicy for AbortPolicy {
    fn decide(&self, _decision: &Decision) -> Verdict {
        Verdict::Abort
    }
}

/// 总是继续（`--yes`）
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceedPolicy;

impl ConfirmPolicy for ProceedPolicy {
    fn decide(&self, _decision: &Decision) -> Verdict {
        Verdict::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_aborts() {
        let decision = Decision::DuplicateContent {
            component: "bert".into(),
            version: 3,
            existing_version: 2,
        };
        assert_eq!(AbortPolicy.decide(&decision), Verdict::Abort);
        assert_eq!(ProceedPolicy.decide(&decision), Verdict::Proceed);
        assert!(decision.to_string().contains("version 2"));
    }
}
