//! 工作区：路径约束与文件操作
//!
//! 所有相对路径先 join 到根目录，再 canonicalize（解析 `..` 与符号链接），
//! 最后按路径分量校验是否仍位于根目录之下。写入目标允许尚不存在：
//! 取最深的已存在祖先 canonicalize，其余部分按词法规范化。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use walkdir::WalkDir;

use super::{helpers, validate_name, Dataset, SandboxConfig, DATA_DIR, HELPER_MODULE, MANIFEST_FILE};
use crate::core::SandboxError;

/// 单次运行的沙箱工作区
#[derive(Debug)]
pub struct Sandbox {
    run_id: String,
    root: PathBuf,
    pub(crate) config: SandboxConfig,
    pub(crate) spawned: AtomicUsize,
    cleaned: AtomicBool,
}

impl Sandbox {
    /// 创建目录（含 data/）并记录 canonical 根路径
    pub(crate) fn open(root: PathBuf, run_id: &str, config: SandboxConfig) -> Result<Self, SandboxError> {
        fs::create_dir_all(root.join(DATA_DIR))?;
        let root = root.canonicalize()?;
        tracing::info!(run_id = %run_id, root = %root.display(), "sandbox created");
        Ok(Self {
            run_id: run_id.to_string(),
            root,
            config,
            spawned: AtomicUsize::new(0),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// canonical 根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// 启动过的子进程数（含失败的启动尝试）
    pub fn spawned_processes(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// 将相对路径解析为根目录内的绝对路径
    ///
    /// `must_exist` 为 true 时目标必须存在（读 / 删 / 运行脚本）。
    /// 越界返回 PathEscape，不存在返回 NotFound。
    pub fn resolve(&self, rel: &str, must_exist: bool) -> Result<PathBuf, SandboxError> {
        let joined = self.root.join(rel);
        let resolved = if must_exist {
            joined
                .canonicalize()
                .map_err(|_| SandboxError::NotFound(rel.to_string()))?
        } else {
            canonicalize_lenient(&joined).ok_or_else(|| SandboxError::PathEscape(rel.to_string()))?
        };
        if !resolved.starts_with(&self.root) {
            tracing::warn!(run_id = %self.run_id, path = %rel, "path escapes sandbox");
            return Err(SandboxError::PathEscape(rel.to_string()));
        }
        Ok(resolved)
    }

    /// 读取文本文件，超过 max_read_chars 时截断并附加 `... [truncated, total N chars]`
    pub fn read_file(&self, rel: &str) -> Result<String, SandboxError> {
        let path = self.resolve(rel, true)?;
        if !path.is_file() {
            return Err(SandboxError::NotAFile(rel.to_string()));
        }
        let bytes = fs::read(&path)?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(truncate_with_marker(&content, self.config.max_read_chars))
    }

    /// 写入文件（自动创建父目录），返回写入的字符数
    pub fn write_file(&self, rel: &str, content: &str) -> Result<usize, SandboxError> {
        let path = self.resolve(rel, false)?;
        if path == self.root || path.is_dir() {
            return Err(SandboxError::NotAFile(rel.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        tracing::debug!(run_id = %self.run_id, path = %rel, "file written");
        Ok(content.chars().count())
    }

    /// 删除单个文件（不删目录）
    pub fn delete_file(&self, rel: &str) -> Result<(), SandboxError> {
        let path = self.resolve(rel, true)?;
        if !path.is_file() {
            return Err(SandboxError::NotAFile(rel.to_string()));
        }
        fs::remove_file(&path)?;
        tracing::debug!(run_id = %self.run_id, path = %rel, "file deleted");
        Ok(())
    }

    /// 列出工作区内所有文件（相对路径，`/` 分隔，有序）
    pub fn list_files(&self) -> Vec<String> {
        list_relative(&self.root, |_| true)
    }

    /// 按扩展名收集文件内容，例如运行结束时收集 `.py` 源码
    pub fn collect_sources(&self, extension: &str) -> BTreeMap<String, String> {
        let mut sources = BTreeMap::new();
        for rel in list_relative(&self.root, |p| p.extension().is_some_and(|e| e == extension)) {
            if let Ok(content) = fs::read_to_string(self.root.join(&rel)) {
                sources.insert(rel, content);
            }
        }
        sources
    }

    /// 把数据集写入 data/<name>.csv，并生成 data_manifest.json，返回 name -> 相对路径
    pub fn inject_data(
        &self,
        datasets: &BTreeMap<String, Dataset>,
    ) -> Result<BTreeMap<String, String>, SandboxError> {
        let data_dir = self.data_dir();
        fs::create_dir_all(&data_dir)?;
        let mut manifest = BTreeMap::new();
        for (name, dataset) in datasets {
            validate_name(name)?;
            let file_name = format!("{name}.csv");
            dataset.write_csv(data_dir.join(&file_name))?;
            manifest.insert(name.clone(), format!("{DATA_DIR}/{file_name}"));
        }
        fs::write(self.manifest_path(), serde_json::to_string_pretty(&manifest)?)?;
        tracing::info!(run_id = %self.run_id, datasets = manifest.len(), "data injected");
        Ok(manifest)
    }

    /// 写入指标计算辅助模块
    pub fn inject_helpers(&self) -> Result<PathBuf, SandboxError> {
        let path = self.root.join(HELPER_MODULE);
        fs::write(&path, helpers::COMPUTE_METRICS_SOURCE)?;
        Ok(path)
    }

    /// 删除整个工作区；幂等，重复调用或目录已不存在均安全
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.root.exists() {
            return;
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => tracing::info!(run_id = %self.run_id, "sandbox cleaned up"),
            Err(e) => tracing::warn!(run_id = %self.run_id, error = %e, "sandbox cleanup failed"),
        }
    }
}

fn list_relative(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && keep(e.path()))
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

/// 截断到 max 个字符，并标注原始总长度
pub(crate) fn truncate_with_marker(content: &str, max: usize) -> String {
    let total = content.chars().count();
    if total <= max {
        return content.to_string();
    }
    let head: String = content.chars().take(max).collect();
    format!("{head}\n... [truncated, total {total} chars]")
}

/// 允许末尾若干分量尚不存在的 canonicalize
///
/// 存在但无法解析的分量（悬空符号链接）返回 None。未解析部分出现 `..` 时同样返回 None：
/// 其后的分量可能经由符号链接指向根目录之外，无法仅靠词法判断。
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component> = path.components().collect();
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        match prefix.canonicalize() {
            Ok(mut resolved) => {
                for c in &components[split..] {
                    match c {
                        Component::ParentDir => return None,
                        Component::CurDir => {}
                        Component::Normal(part) => resolved.push(part),
                        Component::RootDir | Component::Prefix(_) => resolved.push(c.as_os_str()),
                    }
                }
                return Some(resolved);
            }
            Err(_) if fs::symlink_metadata(&prefix).is_ok() => return None,
            Err(_) => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxManager;

    fn sandbox(tmp: &tempfile::TempDir, run_id: &str) -> Sandbox {
        SandboxManager::new(SandboxConfig {
            base_dir: tmp.path().to_path_buf(),
            max_read_chars: 16,
            ..SandboxConfig::default()
        })
        .create(run_id)
        .unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "rw");
        assert_eq!(sb.write_file("src/main.py", "print(1)\n").unwrap(), 9);
        assert_eq!(sb.read_file("src/main.py").unwrap(), "print(1)\n");
        assert_eq!(sb.list_files(), vec!["src/main.py"]);

        // 已存在目录上的 `..` 在 canonicalize 时解析，仍可写入
        sb.write_file("data/../notes.txt", "n").unwrap();
        assert_eq!(sb.read_file("notes.txt").unwrap(), "n");
    }

    #[test]
    fn test_traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "jail");
        std::fs::write(tmp.path().join("outside.txt"), "secret").unwrap();

        assert!(matches!(sb.read_file("../outside.txt"), Err(SandboxError::PathEscape(_))));
        assert!(matches!(sb.write_file("../evil.txt", "x"), Err(SandboxError::PathEscape(_))));
        assert!(matches!(sb.write_file("new/../../evil.txt", "x"), Err(SandboxError::PathEscape(_))));
        assert!(matches!(sb.write_file("/etc/evil.txt", "x"), Err(SandboxError::PathEscape(_))));
        assert!(!tmp.path().join("evil.txt").exists());
        assert!(matches!(sb.delete_file("../outside.txt"), Err(SandboxError::PathEscape(_))));
        assert!(tmp.path().join("outside.txt").exists());
    }

    #[test]
    fn test_sibling_prefix_is_not_inside() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "exp1");
        let _sibling = sandbox(&tmp, "exp10");
        std::fs::write(tmp.path().join("exp10").join("x.txt"), "other").unwrap();
        assert!(sb.read_file("../exp10/x.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "links");
        let outside = tmp.path().join("target_dir");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("f.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, sb.root().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("ghost.txt"), sb.root().join("dangling")).unwrap();

        assert!(matches!(sb.read_file("link/f.txt"), Err(SandboxError::PathEscape(_))));
        assert!(sb.write_file("link/new.txt", "x").is_err());
        assert!(sb.write_file("dangling", "x").is_err());
        assert!(!outside.join("new.txt").exists());
        assert!(!outside.join("ghost.txt").exists());

        // 不存在的目录后接 `..` 再进入符号链接
        assert!(matches!(
            sb.write_file("ghost/../link/pwned.txt", "escaped"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(matches!(
            sb.write_file("ghost/deeper/../../link/pwned.txt", "escaped"),
            Err(SandboxError::PathEscape(_))
        ));
        assert!(!outside.join("pwned.txt").exists());
        assert!(!sb.root().join("ghost").exists());
    }

    #[test]
    fn test_read_truncation_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "trunc");
        sb.write_file("big.txt", &"a".repeat(40)).unwrap();
        let out = sb.read_file("big.txt").unwrap();
        assert!(out.starts_with(&"a".repeat(16)));
        assert!(out.ends_with("... [truncated, total 40 chars]"));
    }

    #[test]
    fn test_missing_and_directory_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "missing");
        assert!(matches!(sb.read_file("nope.txt"), Err(SandboxError::NotFound(_))));
        assert!(matches!(sb.read_file("data"), Err(SandboxError::NotAFile(_))));
        assert!(matches!(sb.write_file("data", "x"), Err(SandboxError::NotAFile(_))));
        assert!(matches!(sb.delete_file("data"), Err(SandboxError::NotAFile(_))));
    }

    #[test]
    fn test_delete_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "del");
        sb.write_file("tmp.txt", "x").unwrap();
        sb.delete_file("tmp.txt").unwrap();
        assert!(sb.list_files().is_empty());
        assert!(sb.delete_file("tmp.txt").is_err());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "gone");
        sb.write_file("a.txt", "x").unwrap();
        sb.cleanup();
        assert!(!sb.root().exists());
        assert!(sb.is_cleaned());
        sb.cleanup();
    }

    #[test]
    fn test_collect_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let sb = sandbox(&tmp, "sources");
        sb.write_file("strategy.py", "x = 1").unwrap();
        sb.write_file("lib/util.py", "y = 2").unwrap();
        sb.write_file("notes.txt", "z").unwrap();
        let sources = sb.collect_sources("py");
        assert_eq!(sources.keys().collect::<Vec<_>>(), vec!["lib/util.py", "strategy.py"]);
    }

    #[test]
    fn test_truncate_with_marker_boundaries() {
        assert_eq!(truncate_with_marker("abc", 3), "abc");
        assert_eq!(truncate_with_marker("abcd", 3), "abc\n... [truncated, total 4 chars]");
    }
}
