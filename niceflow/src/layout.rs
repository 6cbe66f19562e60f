use std::path::{Path, PathBuf};

/// Fixed project layout, resolved relative to the install root. The search
/// directories and manifest paths never move; only the root varies.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The installed binary lives in `<root>/bin`, so the project root is
    /// two levels up from the executable.
    pub fn from_install_root() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        let root = exe
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no install root above {}", exe.display()),
                )
            })?
            .to_path_buf();
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Package sources. These must come first in any manifest that uses them.
    pub fn pkg_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.root.join("test")
    }

    pub fn top_dir(&self) -> PathBuf {
        self.root.join("top")
    }

    pub fn pkg_flist(&self) -> PathBuf {
        self.root.join("pkg.f")
    }

    pub fn top_flist(&self) -> PathBuf {
        self.root.join("top.f")
    }

    pub fn sim_dir(&self) -> PathBuf {
        self.root.join("sim")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_paths() {
        let layout = Layout::new("/proj");
        assert_eq!(layout.pkg_dir(), Path::new("/proj/src"));
        assert_eq!(layout.test_dir(), Path::new("/proj/test"));
        assert_eq!(layout.top_dir(), Path::new("/proj/top"));
        assert_eq!(layout.pkg_flist(), Path::new("/proj/pkg.f"));
        assert_eq!(layout.top_flist(), Path::new("/proj/top.f"));
        assert_eq!(layout.sim_dir(), Path::new("/proj/sim"));
    }
}
