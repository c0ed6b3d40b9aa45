use crate::core::ledger::Ledger;
use serde::Serialize;
use std::collections::BTreeSet;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 本地 -> 远程
    Up,
    /// 远程 -> 本地
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// 单个模型的传输计划
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub component: String,
    pub version: u32,
    pub direction: Direction,
    /// 需要传输的相对路径
    pub files: BTreeSet<String>,
    /// 权威清单（上传时为本地，下载时为远程）
    pub from_ledger: Ledger,
    /// 被比较的清单
    pub to_ledger: Ledger,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 本地清单
    pub fn local_ledger(&self) -> &Ledger {
        match self.direction {
            Direction::Up => &self.from_ledger,
            Direction::Down => &self.to_ledger,
        }
    }

    /// 远程清单
    pub fn remote_ledger(&self) -> &Ledger {
        match self.direction {
            Direction::Up => &self.to_ledger,
            Direction::Down => &self.from_ledger,
        }
    }
}

/// 反方向的差异提示（下载时本地有更新的文件）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseDrift {
    /// 本地比远程新的文件
    pub newer_locally: BTreeSet<String>,
    /// 只存在于本地的文件
    pub local_only: BTreeSet<String>,
}

impl ReverseDrift {
    pub fn is_empty(&self) -> bool {
        self.newer_locally.is_empty() && self.local_only.is_empty()
    }
}

/// 清单比较器
pub struct SyncPlanner;

impl SyncPlanner {
    /// `from` 中在 `to` 里不存在、或 `to` 的时间严格更早的路径
    pub fn diff(from: &Ledger, to: &Ledger) -> BTreeSet<String> {
        from.iter()
            .filter(|(path, from_time)| match to.get(*path) {
                Some(to_time) => to_time < from_time,
                None => true,
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// 按方向生成传输计划
    pub fn plan(
        direction: Direction,
        component: &str,
        version: u32,
        local: Ledger,
        remote: Ledger,
    ) -> TransferPlan {
        let (from_ledger, to_ledger) = match direction {
            Direction::Up => (local, remote),
            Direction::Down => (remote, local),
        };
        let files = Self::diff(&from_ledger, &to_ledger);

        TransferPlan {
            component: component.to_string(),
            version,
            direction,
            files,
            from_ledger,
            to_ledger,
        }
    }

    /// 下载计划中需要删除的本地文件（本地有、目标版本没有）
    pub fn stale_local_files(plan: &TransferPlan) -> BTreeSet<String> {
        let remote = plan.remote_ledger();
        plan.local_ledger()
            .keys()
            .filter(|k| !remote.contains_key(*k))
            .cloned()
            .collect()
    }

    /// 反方向比较，用于在下载时提醒本地改动
    pub fn reverse_drift(local: &Ledger, remote: &Ledger) -> ReverseDrift {
        let mut drift = ReverseDrift::default();
        for path in Self::diff(local, remote) {
            if remote.contains_key(&path) {
                drift.newer_locally.insert(path);
            } else {
                drift.local_only.insert(path);
            }
        }
        drift
    }
}
