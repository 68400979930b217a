//! Versioned cache generation names.

use std::fmt;

/// Which logical store a generation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
  /// Install-time app shell
  Shell,
  /// Runtime resources stored on first successful fetch
  Dynamic,
}

impl fmt::Display for GenerationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(match self {
      Self::Shell => "shell",
      Self::Dynamic => "dynamic",
    })
  }
}

/// A named, versioned cache store such as `kelsa-events-v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  name: String,
  kind: GenerationKind,
  version: u32,
}

impl CacheGeneration {
  pub fn shell(prefix: &str, version: u32) -> Self {
    Self {
      name: format!("{}-v{}", prefix, version),
      kind: GenerationKind::Shell,
      version,
    }
  }

  pub fn dynamic(prefix: &str, version: u32) -> Self {
    Self {
      name: format!("{}-dynamic-v{}", prefix, version),
      kind: GenerationKind::Dynamic,
      version,
    }
  }

  /// Recognize a generation name produced under `prefix`.
  ///
  /// Returns `None` for names from any other scheme (e.g. `old-cache-v0`).
  pub fn parse(prefix: &str, name: &str) -> Option<Self> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;

    let (kind, digits) = match rest.strip_prefix("dynamic-v") {
      Some(digits) => (GenerationKind::Dynamic, digits),
      None => (GenerationKind::Shell, rest.strip_prefix('v')?),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
      return None;
    }
    let version = digits.parse().ok()?;

    Some(Self {
      name: name.to_string(),
      kind,
      version,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> GenerationKind {
    self.kind
  }

  pub fn version(&self) -> u32 {
    self.version
  }
}

impl fmt::Display for CacheGeneration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

/// The pair of generations a controller version owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
  pub prefix: String,
  pub shell: CacheGeneration,
  pub dynamic: CacheGeneration,
}

impl GenerationNames {
  pub fn new(prefix: &str, version: u32) -> Self {
    Self {
      prefix: prefix.to_string(),
      shell: CacheGeneration::shell(prefix, version),
      dynamic: CacheGeneration::dynamic(prefix, version),
    }
  }

  pub fn version(&self) -> u32 {
    self.shell.version()
  }

  /// Whether `name` is one of this version's two generations.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.shell.name() || name == self.dynamic.name()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names_follow_prefix_and_version() {
    let names = GenerationNames::new("kelsa-events", 1);
    assert_eq!(names.shell.name(), "kelsa-events-v1");
    assert_eq!(names.dynamic.name(), "kelsa-events-dynamic-v1");
    assert!(names.is_current("kelsa-events-v1"));
    assert!(!names.is_current("kelsa-events-v2"));
  }

  #[test]
  fn test_parse_shell_and_dynamic() {
    let shell = CacheGeneration::parse("kelsa-events", "kelsa-events-v12").unwrap();
    assert_eq!(shell.kind(), GenerationKind::Shell);
    assert_eq!(shell.version(), 12);

    let dynamic = CacheGeneration::parse("kelsa-events", "kelsa-events-dynamic-v3").unwrap();
    assert_eq!(dynamic.kind(), GenerationKind::Dynamic);
    assert_eq!(dynamic.version(), 3);
  }

  #[test]
  fn test_parse_rejects_foreign_names() {
    assert!(CacheGeneration::parse("kelsa-events", "old-cache-v0").is_none());
    assert!(CacheGeneration::parse("kelsa-events", "kelsa-events-vx").is_none());
    assert!(CacheGeneration::parse("kelsa-events", "kelsa-events-v").is_none());
    assert!(CacheGeneration::parse("kelsa-events", "kelsa-eventsv1").is_none());
  }
}
