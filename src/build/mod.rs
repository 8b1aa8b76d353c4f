//! Artifact building.
//!
//! Helper binaries are compiled first and recorded in the [`BinaryRegistry`].
//! Every test package then gets exactly two binaries: a plain one (coverage
//! instrumented when the problem enforces coverage) and a race-instrumented
//! one. The first compile failure stops the build; nothing is retried.

pub mod registry;

use crate::config::types::{GradeError, Halt, Stage, SubmissionFailure};
use crate::safety::workspace::BinaryCache;
use crate::toolchain::{CompileError, CompileRequest, PackageSet, Toolchain};
use std::path::{Path, PathBuf};

pub use registry::{BinaryRegistry, RegistryBuilder, BINARIES_ENV};

/// Kind of compiled binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Helper,
    Test,
    RaceTest,
}

/// One compiled binary. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// The two test binaries of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub package: String,
    /// Package directory relative to the workspace root
    pub rel_dir: String,
    pub plain: BuildArtifact,
    pub race: BuildArtifact,
}

/// Everything the execution stages need from a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub registry: BinaryRegistry,
    /// Test suites in package order
    pub suites: Vec<TestSuite>,
}

/// Drives a [`Toolchain`] over every package of a problem.
pub struct ArtifactBuilder<'a> {
    toolchain: &'a dyn Toolchain,
    tags: &'a [String],
}

impl<'a> ArtifactBuilder<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, tags: &'a [String]) -> Self {
        Self { toolchain, tags }
    }

    /// Build helpers then test binaries. `cover_packages` is empty when
    /// coverage is not enforced.
    pub(crate) fn build(
        &self,
        workspace_root: &Path,
        cache: &BinaryCache,
        packages: &PackageSet,
        cover_packages: &[String],
    ) -> Result<BuildOutput, Halt> {
        let mut registry = RegistryBuilder::new();
        for package in &packages.binaries {
            log::info!("building {}", package);
            let artifact = self.compile(workspace_root, cache, package, ArtifactKind::Helper, &[])?;
            registry.insert(artifact.name, artifact.path);
        }

        let mut suites = Vec::with_capacity(packages.tests.len());
        for package in &packages.tests {
            log::info!("building test binaries for {}", package);
            let plain =
                self.compile(workspace_root, cache, package, ArtifactKind::Test, cover_packages)?;
            let race = self.compile(workspace_root, cache, package, ArtifactKind::RaceTest, &[])?;
            suites.push(TestSuite {
                package: package.clone(),
                rel_dir: packages.relative_dir(package)?,
                plain,
                race,
            });
        }

        Ok(BuildOutput {
            registry: registry.finish(),
            suites,
        })
    }

    fn compile(
        &self,
        workspace_root: &Path,
        cache: &BinaryCache,
        package: &str,
        kind: ArtifactKind,
        cover_packages: &[String],
    ) -> Result<BuildArtifact, Halt> {
        let output = cache.artifact_path();
        let request = CompileRequest {
            package,
            kind,
            output: &output,
            tags: self.tags,
            cover_packages,
        };

        match self.toolchain.compile(workspace_root, &request) {
            Ok(()) => {
                log::debug!("Built {:?} {} -> {}", kind, package, output.display());
                Ok(BuildArtifact {
                    name: package.to_string(),
                    kind,
                    path: output,
                })
            }
            Err(CompileError::Rejected(detail)) => Err(Halt::Rejected(
                Stage::BuildArtifacts,
                SubmissionFailure::Build {
                    package: package.to_string(),
                    detail,
                },
            )),
            Err(CompileError::Unavailable(detail)) => Err(Halt::Fatal(
                GradeError::Infrastructure(format!(
                    "{} toolchain unavailable while building {}: {}",
                    self.toolchain.name(),
                    package,
                    detail
                )),
            )),
        }
    }
}
