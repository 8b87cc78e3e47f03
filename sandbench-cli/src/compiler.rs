//! Compilation collaborator boundary.
//!
//! The harness never compiles guest sources itself; a [`Compiler`]
//! implementation turns entry patterns into a loaded [`CompiledModule`] for
//! one target. Optional artifact payloads ride along so the CLI can write
//! them out when the emit flags are set.

use sandbench_guest::GuestModule;
use std::path::PathBuf;

/// Compiles entry patterns into a runnable guest module for one target.
pub trait Compiler {
    /// Compile `entries` for `target` and instantiate the guest.
    fn compile(&mut self, entries: &[String], target: &str) -> anyhow::Result<CompiledModule>;
}

/// One compiled and instantiated guest, plus whatever artifact payloads the
/// compiler produced.
pub struct CompiledModule {
    /// The instantiated guest, ready for registration.
    pub guest: Box<dyn GuestModule>,
    /// Module binary, present when the compiler was asked for one.
    pub binary: Option<Vec<u8>>,
    /// Text-format rendition of the module.
    pub text: Option<String>,
    /// Source map for the binary.
    pub source_map: Option<String>,
}

/// Where the emit flags write their artifacts for one target.
pub struct ArtifactPaths {
    /// `build/bench.{target}.wasm`
    pub binary: PathBuf,
    /// `build/bench.{target}.wat`
    pub text: PathBuf,
    /// `build/bench.{target}.wasm.map`
    pub source_map: PathBuf,
}

/// Artifact file names for `target`, all under `build/`.
pub fn artifact_paths(target: &str) -> ArtifactPaths {
    let dir = PathBuf::from("build");
    ArtifactPaths {
        binary: dir.join(format!("bench.{target}.wasm")),
        text: dir.join(format!("bench.{target}.wat")),
        source_map: dir.join(format!("bench.{target}.wasm.map")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_follow_target_name() {
        let paths = artifact_paths("release");
        assert_eq!(paths.binary, PathBuf::from("build/bench.release.wasm"));
        assert_eq!(paths.text, PathBuf::from("build/bench.release.wat"));
        assert_eq!(
            paths.source_map,
            PathBuf::from("build/bench.release.wasm.map")
        );
    }
}
