//! # Virtual paths: a host name plus a path on that host.
//!
//! A [`VirtualPath`] is rendered as `host:path`. An empty host means
//! `localhost`, an empty path means the current directory (`.`).
//! Paths are POSIX-style strings because they may live on remote hosts;
//! all manipulation is lexical.
//!
//! ```
//! use tasktree::VirtualPath;
//!
//! let p: VirtualPath = "drihm:/tmp/run/afile.txt".parse().unwrap();
//! assert_eq!(p.dir().to_string(), "drihm:/tmp/run");
//! assert_eq!(p.replace_ext("gz").file_name(), "afile.gz");
//! assert_eq!(VirtualPath::local("").to_string(), "localhost:.");
//! ```

use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Host name used when none is given.
pub const LOCALHOST: &str = "localhost";

/// A path on a named host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    host: String,
    path: String,
}

impl VirtualPath {
    /// Creates a virtual path; empty parts are resolved to `localhost` / `.`.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let mut host = host.into();
        let mut path = path.into();
        if host.is_empty() {
            host = LOCALHOST.to_string();
        }
        if path.is_empty() {
            path = ".".to_string();
        }
        Self { host, path }
    }

    /// Creates a virtual path on `localhost`.
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(LOCALHOST, path)
    }

    /// Host name part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path part.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the path lives on `localhost`.
    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }

    /// Same host, `other` appended to the path (lexically cleaned).
    pub fn join(&self, other: impl AsRef<str>) -> Self {
        let other = other.as_ref();
        if other.is_empty() {
            return Self::new(self.host.clone(), clean(&self.path));
        }
        Self::new(self.host.clone(), clean(&format!("{}/{}", self.path, other)))
    }

    /// Same host, the path of another virtual path appended.
    pub fn join_path(&self, other: &VirtualPath) -> Self {
        self.join(&other.path)
    }

    /// Same host, the parent directory of the path.
    pub fn dir(&self) -> Self {
        let dir = match self.path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => clean(&self.path[..i]),
            None => ".".to_string(),
        };
        Self::new(self.host.clone(), dir)
    }

    /// Last element of the path, with its extension.
    pub fn file_name(&self) -> String {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            return if self.path.is_empty() { ".".into() } else { "/".into() };
        }
        match trimmed.rfind('/') {
            Some(i) => trimmed[i + 1..].to_string(),
            None => trimmed.to_string(),
        }
    }

    /// Same host, the file extension replaced (or added when missing).
    pub fn replace_ext(&self, ext: &str) -> Self {
        if self.path == "." {
            return Self::new(self.host.clone(), format!(".{ext}"));
        }
        let name_start = self.path.rfind('/').map_or(0, |i| i + 1);
        let stem_end = match self.path[name_start..].rfind('.') {
            Some(i) => name_start + i,
            None => self.path.len(),
        };
        Self::new(self.host.clone(), format!("{}.{ext}", &self.path[..stem_end]))
    }

    /// Same host, `.ext` appended to the file name.
    pub fn add_ext(&self, ext: &str) -> Self {
        if self.path == "." {
            return Self::new(self.host.clone(), format!(".{ext}"));
        }
        Self::new(self.host.clone(), format!("{}.{ext}", self.path))
    }
}

impl Default for VirtualPath {
    fn default() -> Self {
        Self::local(".")
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

impl FromStr for VirtualPath {
    type Err = Infallible;

    /// Parses `host:path`; a string without colon is a local path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once(':') {
            Some((host, path)) => Self::new(host, path),
            None => Self::local(s),
        })
    }
}

impl Ord for VirtualPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.host.cmp(&other.host))
    }
}

impl PartialOrd for VirtualPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lexical POSIX path cleaning: collapses `//`, drops `.`, resolves `..`.
fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if !rooted => parts.push(".."),
                _ => {}
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_empty_parts() {
        let p = VirtualPath::new("", "");
        assert_eq!(p.host(), "localhost");
        assert_eq!(p.path(), ".");
        assert_eq!(VirtualPath::default().to_string(), "localhost:.");
    }

    #[test]
    fn test_parse() {
        let p: VirtualPath = "timoteo:/tmp".parse().unwrap();
        assert_eq!(p.to_string(), "timoteo:/tmp");
        let p: VirtualPath = "/tmp/x".parse().unwrap();
        assert_eq!(p.to_string(), "localhost:/tmp/x");
    }

    #[test]
    fn test_join_and_dir() {
        let p = VirtualPath::new("timoteo", "/tmp");
        assert_eq!(p.join("otherPath/subdir").to_string(), "timoteo:/tmp/otherPath/subdir");
        assert_eq!(VirtualPath::default().join("adir").to_string(), "localhost:adir");

        let p1 = VirtualPath::new("timoteo", "/tmp/caio");
        let p2 = VirtualPath::new("localhost", "../other");
        assert_eq!(p1.join_path(&p2).to_string(), "timoteo:/tmp/other");
        assert_eq!(p1.join_path(&VirtualPath::default()).to_string(), "timoteo:/tmp/caio");

        assert_eq!(VirtualPath::new("timoteo", "/tmp/afile.txt").dir().to_string(), "timoteo:/tmp");
        assert_eq!(VirtualPath::new("timoteo", "/afile").dir().to_string(), "timoteo:/");
        assert_eq!(VirtualPath::default().dir().to_string(), "localhost:.");
    }

    #[test]
    fn test_extensions() {
        let p = VirtualPath::new("timoteo", "/tmp/afile.txt");
        assert_eq!(p.file_name(), "afile.txt");
        assert_eq!(p.add_ext("ciao").file_name(), "afile.txt.ciao");
        assert_eq!(p.replace_ext("ciao").file_name(), "afile.ciao");

        let p = VirtualPath::new("timoteo", "/tmp/afile");
        assert_eq!(p.replace_ext("ciao").file_name(), "afile.ciao");

        let p = VirtualPath::new("timoteo", "/tmp.d/afile");
        assert_eq!(p.replace_ext("ciao").to_string(), "timoteo:/tmp.d/afile.ciao");

        assert_eq!(VirtualPath::default().replace_ext("ciao").file_name(), ".ciao");
        assert_eq!(VirtualPath::default().add_ext("ciao").file_name(), ".ciao");
        assert_eq!(VirtualPath::default().file_name(), ".");
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("a//b/./c/.."), "a/b");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("../../a"), "../../a");
        assert_eq!(clean("a/../.."), "..");
        assert_eq!(clean("./"), ".");
    }
}
