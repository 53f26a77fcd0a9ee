//! Suffix-indexed registry of format handlers.
//!
//! Handlers are listed at compile time. The index is built on first use and
//! cached for the life of the process.
//!
//! Resolution tests the input's extension chain (the file name from its first
//! dot, lowercased) against every declared suffix. The longest matching
//! suffix wins; among equally long matches the earlier registration wins.

use crate::error::ExtractError;
use crate::strategy::{
    ExtractionStrategy, RarStrategy, TarGzStrategy, TarStrategy, ZipStrategy,
};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static ZIP: ZipStrategy = ZipStrategy;
static RAR: RarStrategy = RarStrategy;
static TAR: TarStrategy = TarStrategy;
static TAR_GZ: TarGzStrategy = TarGzStrategy;

/// Handlers shipped with the crate, in registration order.
pub fn builtin_strategies() -> Vec<&'static dyn ExtractionStrategy> {
    vec![&ZIP, &RAR, &TAR, &TAR_GZ]
}

/// Process-wide registry of the built-in handlers.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry::new(builtin_strategies()))
}

/// A handler together with the suffix that selected it.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    /// Selected handler
    pub strategy: &'static dyn ExtractionStrategy,
    /// Declared suffix that matched
    pub suffix: &'static str,
}

impl Resolution {
    /// Output directory used when the caller gives none: the input path with
    /// the matched suffix removed (`data.tar.gz` becomes `data`).
    pub fn default_output(&self, input: &Path) -> PathBuf {
        let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
            return input.with_extension("");
        };

        let cut = name.len().saturating_sub(self.suffix.len());
        if cut == 0 || !name.is_char_boundary(cut) {
            return input.with_extension("");
        }
        input.with_file_name(&name[..cut])
    }
}

/// Suffix index over a fixed list of handlers.
pub struct Registry {
    strategies: Vec<&'static dyn ExtractionStrategy>,
    /// (suffix, position in `strategies`), longest suffix first
    index: Vec<(&'static str, usize)>,
}

impl Registry {
    /// Index `strategies`; earlier entries win ties.
    pub fn new(strategies: Vec<&'static dyn ExtractionStrategy>) -> Self {
        let mut index: Vec<(&'static str, usize)> = strategies
            .iter()
            .enumerate()
            .flat_map(|(position, s)| s.suffixes().iter().map(move |suffix| (*suffix, position)))
            .collect();
        // Stable sort keeps registration order within the same length.
        index.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self { strategies, index }
    }

    /// Registered handlers in registration order.
    pub fn strategies(&self) -> &[&'static dyn ExtractionStrategy] {
        &self.strategies
    }

    /// Resolve a handler from an extension chain such as `".tar.gz"`.
    pub fn resolve(&self, chain: &str) -> Result<Resolution, ExtractError> {
        let chain = chain.to_lowercase();
        self.index
            .iter()
            .find(|(suffix, _)| chain.ends_with(suffix))
            .map(|(suffix, position)| Resolution {
                strategy: self.strategies[*position],
                suffix: *suffix,
            })
            .ok_or_else(|| {
                if chain.is_empty() {
                    ExtractError::UnsupportedFormat("file has no extension".to_string())
                } else {
                    ExtractError::UnsupportedFormat(format!("unknown extension chain {chain}"))
                }
            })
    }

    /// Resolve a handler for an archive path.
    pub fn resolve_path(&self, path: &Path) -> Result<Resolution, ExtractError> {
        self.resolve(&extension_chain(path))
    }
}

/// Everything from the first dot of the file name on, lowercased.
///
/// Leading dots of hidden files are not treated as separators.
///
/// ```
/// use std::path::Path;
/// use extractor::registry::extension_chain;
///
/// assert_eq!(extension_chain(Path::new("/data/Backup.TAR.GZ")), ".tar.gz");
/// assert_eq!(extension_chain(Path::new(".hidden.zip")), ".zip");
/// assert_eq!(extension_chain(Path::new("README")), "");
/// ```
pub fn extension_chain(path: &Path) -> String {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return String::new();
    };
    let trimmed = name.trim_start_matches('.');
    match trimmed.find('.') {
        Some(dot) => trimmed[dot..].to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ArchiveSource;

    /// A bare `.gz` handler, registered ahead of the tar handlers.
    struct PlainGzip;

    impl ExtractionStrategy for PlainGzip {
        fn name(&self) -> &'static str {
            "GZIP"
        }

        fn suffixes(&self) -> &'static [&'static str] {
            &[".gz"]
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
            Err(ExtractError::UnsupportedFormat("test handler".to_string()))
        }
    }

    static PLAIN_GZIP: PlainGzip = PlainGzip;

    /// Declares exactly the suffix of the built-in gzip tar handler.
    struct ShadowTarGz;

    impl ExtractionStrategy for ShadowTarGz {
        fn name(&self) -> &'static str {
            "SHADOW"
        }

        fn suffixes(&self) -> &'static [&'static str] {
            &[".tar.gz"]
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn ArchiveSource>, ExtractError> {
            Err(ExtractError::UnsupportedFormat("test handler".to_string()))
        }
    }

    static SHADOW: ShadowTarGz = ShadowTarGz;

    #[test]
    fn test_resolve_builtin_formats() {
        let registry = registry();
        assert_eq!(registry.resolve(".zip").unwrap().strategy.name(), "ZIP");
        assert_eq!(registry.resolve(".rar").unwrap().strategy.name(), "RAR");
        assert_eq!(registry.resolve(".tar.bz2").unwrap().strategy.name(), "TAR");
        assert_eq!(registry.resolve(".tar.xz").unwrap().strategy.name(), "TAR");
        assert_eq!(registry.resolve(".tgz").unwrap().strategy.name(), "TAR.GZ");
    }

    #[test]
    fn test_tar_gz_goes_to_gzip_handler() {
        let resolution = registry()
            .resolve_path(Path::new("/tmp/archive.tar.gz"))
            .unwrap();
        assert_eq!(resolution.strategy.name(), "TAR.GZ");
        assert_eq!(resolution.suffix, ".tar.gz");
    }

    #[test]
    fn test_longest_suffix_beats_registration_order() {
        let mut strategies: Vec<&'static dyn ExtractionStrategy> = vec![&PLAIN_GZIP];
        strategies.extend(builtin_strategies());
        let registry = Registry::new(strategies);

        assert_eq!(registry.resolve(".tar.gz").unwrap().strategy.name(), "TAR.GZ");
        assert_eq!(registry.resolve(".log.gz").unwrap().strategy.name(), "GZIP");
    }

    #[test]
    fn test_equal_length_ties_go_to_first_registered() {
        let registry = Registry::new(vec![&SHADOW, &TAR_GZ]);
        assert_eq!(registry.resolve(".tar.gz").unwrap().strategy.name(), "SHADOW");

        let registry = Registry::new(vec![&TAR_GZ, &SHADOW]);
        assert_eq!(registry.resolve(".tar.gz").unwrap().strategy.name(), "TAR.GZ");
        assert_eq!(registry.strategies().len(), 2);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        assert_eq!(registry().resolve(".ZIP").unwrap().strategy.name(), "ZIP");
    }

    #[test]
    fn test_resolve_unsupported() {
        assert!(matches!(
            registry().resolve(".7z"),
            Err(ExtractError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            registry().resolve_path(Path::new("notes")),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_multi_dot_names_match_by_suffix() {
        let resolution = registry()
            .resolve_path(Path::new("release.v1.2.zip"))
            .unwrap();
        assert_eq!(resolution.strategy.name(), "ZIP");
    }

    #[test]
    fn test_default_output_strips_matched_suffix() {
        let registry = registry();
        let cases = [
            ("/data/photos.zip", "/data/photos"),
            ("/data/logs.tar.gz", "/data/logs"),
            ("/data/logs.tar.bz2", "/data/logs"),
            ("/data/Release.v2.RAR", "/data/Release.v2"),
        ];
        for (input, expected) in cases {
            let input = Path::new(input);
            let resolution = registry.resolve_path(input).unwrap();
            assert_eq!(resolution.default_output(input), Path::new(expected));
        }
    }
}
