use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{NormalizeError, Result};

/// The two external executables the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }

    /// Name of the npm package that ships a static build of this tool.
    fn package(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg-static",
            Tool::Ffprobe => "ffprobe-static",
        }
    }

    pub fn file_name(self, platform: Platform) -> String {
        match platform {
            Platform::Windows => format!("{}.exe", self.name()),
            _ => self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Sub-directory of `bin/` holding the bundled binaries.
    fn bundle_dir(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        }
    }

    /// Layout used by the static npm packages (`bin/<os>/<arch>/`).
    fn package_subdir(self) -> &'static [&'static str] {
        match self {
            Platform::Windows => &["bin", "win32", "x64"],
            Platform::MacOs => &["bin", "darwin", "universal"],
            Platform::Linux => &["bin", "linux", "x64"],
        }
    }
}

/// Resolves tool paths from, in order: the bundled `bin/<platform>/`
/// directory, a `node_modules/<tool>-static` package, then `PATH`.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    platform: Platform,
    roots: Vec<PathBuf>,
    search_path: Option<std::ffi::OsString>,
}

impl Default for ToolLocator {
    fn default() -> Self {
        let mut roots = Vec::new();
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            roots.push(dir);
        }
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        Self {
            platform: Platform::current(),
            roots,
            search_path: std::env::var_os("PATH"),
        }
    }
}

impl ToolLocator {
    /// A locator that only looks under `roots` and the given search path.
    pub fn with_roots(
        platform: Platform,
        roots: Vec<PathBuf>,
        search_path: Option<std::ffi::OsString>,
    ) -> Self {
        Self {
            platform,
            roots,
            search_path,
        }
    }

    pub fn resolve(&self, tool: Tool) -> Result<PathBuf> {
        let file_name = tool.file_name(self.platform);

        for root in &self.roots {
            let bundled = root.join("bin").join(self.platform.bundle_dir()).join(&file_name);
            if is_executable(&bundled) {
                info!("Using bundled {}: {}", tool.name(), bundled.display());
                return Ok(bundled);
            }
        }

        for root in &self.roots {
            if let Some(found) = self.find_in_package(root, tool, &file_name) {
                info!("Using packaged {}: {}", tool.name(), found.display());
                return Ok(found);
            }
        }

        if let Some(paths) = &self.search_path {
            for dir in std::env::split_paths(paths) {
                let candidate = dir.join(&file_name);
                if is_executable(&candidate) {
                    info!("Using system {}: {}", tool.name(), candidate.display());
                    return Ok(candidate);
                }
            }
        }

        let hint = self
            .roots
            .first()
            .map(|r| r.join("bin").join(self.platform.bundle_dir()).display().to_string())
            .unwrap_or_else(|| "bin/".to_string());
        Err(NormalizeError::ToolNotFound {
            tool: tool.name(),
            hint,
        })
    }

    fn find_in_package(&self, root: &Path, tool: Tool, file_name: &str) -> Option<PathBuf> {
        let package = root.join("node_modules").join(tool.package());
        if !package.is_dir() {
            return None;
        }

        let mut structured = package.clone();
        for part in self.platform.package_subdir() {
            structured.push(part);
        }
        structured.push(file_name);
        if is_executable(&structured) {
            return Some(structured);
        }

        // Older package versions put the binary at an arbitrary depth.
        walkdir::WalkDir::new(&package)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .find(|p| p.file_name().is_some_and(|n| n == file_name) && is_executable(p))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Both executables, resolved once at the start of a run.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn resolve() -> Result<Self> {
        Self::resolve_with(&ToolLocator::default())
    }

    pub fn resolve_with(locator: &ToolLocator) -> Result<Self> {
        let paths = Self {
            ffmpeg: locator.resolve(Tool::Ffmpeg)?,
            ffprobe: locator.resolve(Tool::Ffprobe)?,
        };
        debug!(?paths, "Resolved external tools");
        Ok(paths)
    }
}
