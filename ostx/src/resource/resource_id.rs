use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Identity of a shared resource.
///
/// The derived total order is the lock order used inside a module: every module acquires
/// the resources it touched in ascending `ResourceId` order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceId {
    /// A file system path
    Path(PathBuf),
    /// Read end of an anonymous pipe
    PipeRead(u64),
    /// Write end of an anonymous pipe
    PipeWrite(u64),
    /// Application-defined resource
    Named(String),
}

impl ResourceId {
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        ResourceId::Path(path.as_ref().to_path_buf())
    }

    pub fn named(name: &str) -> Self {
        ResourceId::Named(name.to_string())
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, ResourceId::PipeRead(_) | ResourceId::PipeWrite(_))
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Path(path) => write!(f, "path:{}", path.display()),
            ResourceId::PipeRead(id) => write!(f, "pipe:{}:r", id),
            ResourceId::PipeWrite(id) => write!(f, "pipe:{}:w", id),
            ResourceId::Named(name) => write!(f, "named:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ResourceId::path("/tmp/a").to_string(), "path:/tmp/a");
        assert_eq!(ResourceId::PipeRead(3).to_string(), "pipe:3:r");
        assert_eq!(ResourceId::PipeWrite(3).to_string(), "pipe:3:w");
        assert_eq!(ResourceId::named("x").to_string(), "named:x");
    }

    #[test]
    fn test_order_groups_by_variant() {
        let mut ids = vec![
            ResourceId::named("a"),
            ResourceId::PipeWrite(1),
            ResourceId::path("/b"),
            ResourceId::PipeRead(2),
            ResourceId::path("/a"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ResourceId::path("/a"),
                ResourceId::path("/b"),
                ResourceId::PipeRead(2),
                ResourceId::PipeWrite(1),
                ResourceId::named("a"),
            ]
        );
    }

    #[test]
    fn test_is_pipe() {
        assert!(ResourceId::PipeRead(0).is_pipe());
        assert!(!ResourceId::named("p").is_pipe());
    }
}
