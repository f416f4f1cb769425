use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Humanoid,
    Animation,
    PointCloud,
    Unknown,
}

impl AssetKind {
    /// Derives the kind from the URL's path extension. Query strings and
    /// fragments are ignored.
    pub fn from_url(url: &str) -> Self {
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let file = path.rsplit('/').next().unwrap_or_default();

        if file.ends_with(".anim.glb") || file.ends_with(".vrma") {
            return Self::Animation;
        }
        match file.rsplit_once('.').map(|(_, ext)| ext) {
            Some("vrm" | "glb" | "gltf") => Self::Humanoid,
            Some("splat" | "ksplat" | "ply") => Self::PointCloud,
            _ => Self::Unknown,
        }
    }

    /// Humanoid and animation payloads need a second, render-thread decode
    /// stage before the asset counts as finished.
    pub const fn needs_decode(self) -> bool {
        matches!(self, Self::Humanoid | Self::Animation)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Humanoid => "humanoid",
            Self::Animation => "animation",
            Self::PointCloud => "point-cloud",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    pub url: String,
    pub kind: AssetKind,
}

impl AssetDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: name.into(),
            kind: AssetKind::from_url(&url),
            url,
        }
    }

    pub fn with_kind(name: impl Into<String>, url: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(AssetKind::from_url("models/avatar.vrm"), AssetKind::Humanoid);
        assert_eq!(
            AssetKind::from_url("https://cdn.example.com/a/B.GLB?v=3"),
            AssetKind::Humanoid
        );
        assert_eq!(AssetKind::from_url("anims/idle.vrma"), AssetKind::Animation);
        assert_eq!(AssetKind::from_url("anims/idle.anim.glb"), AssetKind::Animation);
        assert_eq!(AssetKind::from_url("scene/room.splat#x"), AssetKind::PointCloud);
        assert_eq!(AssetKind::from_url("scene/room.ply"), AssetKind::PointCloud);
        assert_eq!(AssetKind::from_url("readme"), AssetKind::Unknown);
        assert_eq!(AssetKind::from_url("dir.vrm/file.bin"), AssetKind::Unknown);
    }

    #[test]
    fn only_mesh_kinds_decode() {
        assert!(AssetKind::Humanoid.needs_decode());
        assert!(AssetKind::Animation.needs_decode());
        assert!(!AssetKind::PointCloud.needs_decode());
        assert!(!AssetKind::Unknown.needs_decode());
    }
}
